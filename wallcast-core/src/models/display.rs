//! Display and animation mode enums.

use serde::{Deserialize, Serialize};

/// How a single TV renders the broadcast video.
///
/// Tile mode: the TV shows its window of the video, so the wall as a whole
/// shows the video once. Repeat mode: the TV shows the entire video fitted to
/// its own aspect ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisplayMode {
    #[serde(rename = "TILE")]
    Tile,
    #[serde(rename = "REPEAT")]
    Repeat,
}

impl DisplayMode {
    pub const DEFAULT: Self = Self::Tile;

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tile => "TILE",
            Self::Repeat => "REPEAT",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "TILE" => Some(Self::Tile),
            "REPEAT" => Some(Self::Repeat),
            _ => None,
        }
    }

    pub const fn toggled(&self) -> Self {
        match self {
            Self::Tile => Self::Repeat,
            Self::Repeat => Self::Tile,
        }
    }
}

/// Wall-level animation of per-TV display modes, driven by the broadcaster's
/// tick loop.
///
/// `Tile` and `Repeat` are pseudo modes: setting one immediately switches every
/// TV to that display mode and persists `None` as the animation mode. They are
/// never stored; reads infer them when all TVs currently agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnimationMode {
    #[serde(rename = "NONE")]
    None,
    #[serde(rename = "TILE_REPEAT")]
    TileRepeat,
    #[serde(rename = "FULLSCREEN_TILE")]
    FullscreenTile,
    #[serde(rename = "LEFT")]
    Left,
    #[serde(rename = "RIGHT")]
    Right,
    #[serde(rename = "UP")]
    Up,
    #[serde(rename = "DOWN")]
    Down,
    #[serde(rename = "RAIN")]
    Rain,
    #[serde(rename = "SPIRAL")]
    Spiral,
    // Pseudo modes.
    #[serde(rename = "TILE")]
    Tile,
    #[serde(rename = "REPEAT")]
    Repeat,
}

impl AnimationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::TileRepeat => "TILE_REPEAT",
            Self::FullscreenTile => "FULLSCREEN_TILE",
            Self::Left => "LEFT",
            Self::Right => "RIGHT",
            Self::Up => "UP",
            Self::Down => "DOWN",
            Self::Rain => "RAIN",
            Self::Spiral => "SPIRAL",
            Self::Tile => "TILE",
            Self::Repeat => "REPEAT",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "NONE" => Some(Self::None),
            "TILE_REPEAT" => Some(Self::TileRepeat),
            "FULLSCREEN_TILE" => Some(Self::FullscreenTile),
            "LEFT" => Some(Self::Left),
            "RIGHT" => Some(Self::Right),
            "UP" => Some(Self::Up),
            "DOWN" => Some(Self::Down),
            "RAIN" => Some(Self::Rain),
            "SPIRAL" => Some(Self::Spiral),
            "TILE" => Some(Self::Tile),
            "REPEAT" => Some(Self::Repeat),
            _ => None,
        }
    }

    pub const fn is_pseudo(&self) -> bool {
        matches!(self, Self::Tile | Self::Repeat)
    }

    /// The display mode a pseudo animation mode stands for.
    pub const fn implied_display_mode(&self) -> Option<DisplayMode> {
        match self {
            Self::Tile => Some(DisplayMode::Tile),
            Self::Repeat => Some(DisplayMode::Repeat),
            _ => None,
        }
    }

    /// The pseudo animation mode a uniform display mode maps back to.
    pub const fn pseudo_for(display_mode: DisplayMode) -> Self {
        match display_mode {
            DisplayMode::Tile => Self::Tile,
            DisplayMode::Repeat => Self::Repeat,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_mode_string_round_trip() {
        for mode in [DisplayMode::Tile, DisplayMode::Repeat] {
            assert_eq!(DisplayMode::from_str(mode.as_str()), Some(mode));
        }
        assert_eq!(DisplayMode::from_str("FULLSCREEN"), None);
    }

    #[test]
    fn animation_mode_string_round_trip() {
        for mode in [
            AnimationMode::None,
            AnimationMode::TileRepeat,
            AnimationMode::FullscreenTile,
            AnimationMode::Left,
            AnimationMode::Right,
            AnimationMode::Up,
            AnimationMode::Down,
            AnimationMode::Rain,
            AnimationMode::Spiral,
            AnimationMode::Tile,
            AnimationMode::Repeat,
        ] {
            assert_eq!(AnimationMode::from_str(mode.as_str()), Some(mode));
        }
    }

    #[test]
    fn pseudo_modes() {
        assert!(AnimationMode::Tile.is_pseudo());
        assert!(AnimationMode::Repeat.is_pseudo());
        assert!(!AnimationMode::None.is_pseudo());
        assert_eq!(
            AnimationMode::Tile.implied_display_mode(),
            Some(DisplayMode::Tile)
        );
        assert_eq!(
            AnimationMode::pseudo_for(DisplayMode::Repeat),
            AnimationMode::Repeat
        );
    }
}
