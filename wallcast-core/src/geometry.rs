//! Wall geometry and per-TV crop computation.
//!
//! Videos are shown in "fill" mode: no letterboxing and no aspect warping.
//! A centered "displayable" sub-rectangle of the video with the target
//! screen's aspect ratio is chosen, and regions outside it are cropped away.
//! For tile mode the target screen is the whole wall; for repeat mode it is
//! the TV itself.

use tracing::warn;

use crate::models::Rect;
use crate::{Error, Result};

/// A crop window in video pixel coordinates, expressed as two corners the way
/// media players take their crop argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x0: i64,
    pub y0: i64,
    pub x1: i64,
    pub y1: i64,
}

impl CropRect {
    pub const fn width(&self) -> i64 {
        self.x1 - self.x0
    }

    pub const fn height(&self) -> i64 {
        self.y1 - self.y0
    }

    /// Render as the player's crop argument, `x0 y0 x1 y1`.
    pub fn to_arg(&self) -> String {
        format!("{} {} {} {}", self.x0, self.y0, self.x1, self.y1)
    }
}

/// The two crop windows a TV needs: one per display mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropSet {
    pub tile: CropRect,
    pub repeat: CropRect,
}

impl CropSet {
    pub const fn for_mode(&self, mode: crate::models::DisplayMode) -> CropRect {
        match mode {
            crate::models::DisplayMode::Tile => self.tile,
            crate::models::DisplayMode::Repeat => self.repeat,
        }
    }
}

/// Video pixel dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoDimensions {
    pub width: i64,
    pub height: i64,
}

/// The section of the video a screen with the given aspect ratio will display,
/// in video pixels. Taken from the center of the video.
///
/// Units of the screen dimensions do not matter; only the ratio is used. The
/// result can exceed the video dimensions only on misconfigured walls, which
/// is logged but deliberately not clamped so the misconfiguration stays
/// visible.
pub fn displayable_dimensions(
    video: VideoDimensions,
    screen_width: f64,
    screen_height: f64,
) -> Result<(f64, f64)> {
    if video.width <= 0 || video.height <= 0 {
        return Err(Error::InvalidConfig(format!(
            "Non-positive video dimensions: {}x{}",
            video.width, video.height
        )));
    }
    if screen_width <= 0.0 || screen_height <= 0.0 {
        return Err(Error::InvalidConfig(format!(
            "Non-positive screen dimensions: {screen_width}x{screen_height}"
        )));
    }

    let video_ar = video.width as f64 / video.height as f64;
    let screen_ar = screen_width / screen_height;

    let (dw, dh) = if screen_ar >= video_ar {
        // Screen is wider than the video: full width, cropped height.
        (video.width as f64, video.width as f64 / screen_ar)
    } else {
        // Screen is taller than the video: full height, cropped width.
        (screen_ar * video.height as f64, video.height as f64)
    };

    if dw > video.width as f64 {
        warn!(
            displayable_width = dw,
            video_width = video.width,
            "Displayable width exceeds the video width; this may indicate a misconfiguration"
        );
    }
    if dh > video.height as f64 {
        warn!(
            displayable_height = dh,
            video_height = video.height,
            "Displayable height exceeds the video height; this may indicate a misconfiguration"
        );
    }
    Ok((dw, dh))
}

/// Tile-mode crop: the TV's wall rectangle projected onto the wall's
/// displayable area.
pub fn tile_crop(
    video: VideoDimensions,
    tv_rect: Rect,
    wall_width: i64,
    wall_height: i64,
) -> Result<CropRect> {
    let (dw, dh) = displayable_dimensions(video, wall_width as f64, wall_height as f64)?;
    let off_x = (video.width as f64 - dw) / 2.0;
    let off_y = (video.height as f64 - dh) / 2.0;
    let ww = wall_width as f64;
    let wh = wall_height as f64;

    let crop = CropRect {
        x0: (off_x + tv_rect.x as f64 / ww * dw).round() as i64,
        y0: (off_y + tv_rect.y as f64 / wh * dh).round() as i64,
        x1: (off_x + tv_rect.right() as f64 / ww * dw).round() as i64,
        y1: (off_y + tv_rect.bottom() as f64 / wh * dh).round() as i64,
    };
    warn_if_out_of_range(&crop, video);
    Ok(crop)
}

/// Repeat-mode crop: exactly the displayable area for the TV's own aspect
/// ratio, so the TV shows the whole video fitted to itself.
pub fn repeat_crop(video: VideoDimensions, tv_rect: Rect) -> Result<CropRect> {
    let (dw, dh) = displayable_dimensions(video, tv_rect.width as f64, tv_rect.height as f64)?;
    let off_x = (video.width as f64 - dw) / 2.0;
    let off_y = (video.height as f64 - dh) / 2.0;

    let crop = CropRect {
        x0: off_x.round() as i64,
        y0: off_y.round() as i64,
        x1: (off_x + dw).round() as i64,
        y1: (off_y + dh).round() as i64,
    };
    warn_if_out_of_range(&crop, video);
    Ok(crop)
}

/// Both crop windows for one TV. Dual-output TVs get this computed once per
/// output, independently.
pub fn crops_for_tv(
    video: VideoDimensions,
    tv_rect: Rect,
    wall_width: i64,
    wall_height: i64,
) -> Result<CropSet> {
    Ok(CropSet {
        tile: tile_crop(video, tv_rect, wall_width, wall_height)?,
        repeat: repeat_crop(video, tv_rect)?,
    })
}

fn warn_if_out_of_range(crop: &CropRect, video: VideoDimensions) {
    for (name, value, max) in [
        ("x0", crop.x0, video.width),
        ("x1", crop.x1, video.width),
        ("y0", crop.y0, video.height),
        ("y1", crop.y1, video.height),
    ] {
        if value > max {
            warn!(
                coordinate = name,
                value,
                max,
                "Crop coordinate exceeds the video dimensions; this may indicate a misconfiguration"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FHD: VideoDimensions = VideoDimensions { width: 1920, height: 1080 };

    #[test]
    fn matching_aspect_ratios_tile_the_full_video() {
        // Two 960x1080 TVs side by side: the wall is 16:9 like the video.
        let tv1 = Rect::new(0, 0, 960, 1080);
        let tv2 = Rect::new(960, 0, 960, 1080);

        let c1 = tile_crop(FHD, tv1, 1920, 1080).expect("crop tv1");
        let c2 = tile_crop(FHD, tv2, 1920, 1080).expect("crop tv2");
        assert_eq!(c1, CropRect { x0: 0, y0: 0, x1: 960, y1: 1080 });
        assert_eq!(c2, CropRect { x0: 960, y0: 0, x1: 1920, y1: 1080 });
    }

    #[test]
    fn repeat_crop_of_video_shaped_tv_is_the_full_video() {
        let tv = Rect::new(0, 0, 960, 540);
        let c = repeat_crop(FHD, tv).expect("crop");
        assert_eq!(c, CropRect { x0: 0, y0: 0, x1: 1920, y1: 1080 });
    }

    #[test]
    fn repeat_crop_of_narrow_tv_is_centered() {
        // 960x1080 panel (8:9) showing a 16:9 video: full height, centered width.
        let tv = Rect::new(960, 0, 960, 1080);
        let c = repeat_crop(FHD, tv).expect("crop");
        assert_eq!(c, CropRect { x0: 480, y0: 0, x1: 1440, y1: 1080 });
    }

    #[test]
    fn four_by_three_wall_with_sixteen_by_nine_video() {
        // 2x2 wall of 640x480 TVs: wall AR 4:3 < video AR 16:9.
        // Displayable: 1440x1080, x offset 240.
        let top_left = Rect::new(0, 0, 640, 480);
        let c = tile_crop(FHD, top_left, 1280, 960).expect("crop");
        assert_eq!(c, CropRect { x0: 240, y0: 0, x1: 960, y1: 540 });
    }

    #[test]
    fn tile_crops_partition_the_displayable_region() {
        // Union of per-TV tile crops covers the displayable region exactly,
        // with no overlaps (modulo rounding of at most 1 px per edge).
        let tvs = [
            Rect::new(0, 0, 640, 480),
            Rect::new(640, 0, 640, 480),
            Rect::new(0, 480, 640, 480),
            Rect::new(640, 480, 640, 480),
        ];
        let crops: Vec<CropRect> = tvs
            .iter()
            .map(|r| tile_crop(FHD, *r, 1280, 960).expect("crop"))
            .collect();

        // Horizontal neighbors share an edge; vertical neighbors share an edge.
        assert_eq!(crops[0].x1, crops[1].x0);
        assert_eq!(crops[2].x1, crops[3].x0);
        assert_eq!(crops[0].y1, crops[2].y0);
        assert_eq!(crops[1].y1, crops[3].y0);

        // Outer corners hit the displayable region bounds: x 240..1680, y 0..1080.
        assert_eq!((crops[0].x0, crops[0].y0), (240, 0));
        assert_eq!((crops[3].x1, crops[3].y1), (1680, 1080));

        // Areas sum to the displayable area.
        let area: i64 = crops.iter().map(|c| c.width() * c.height()).sum();
        assert_eq!(area, 1440 * 1080);
    }

    #[test]
    fn non_positive_dimensions_are_config_errors() {
        assert!(displayable_dimensions(
            VideoDimensions { width: 0, height: 1080 },
            16.0,
            9.0
        )
        .is_err());
        assert!(displayable_dimensions(FHD, 0.0, 9.0).is_err());
        assert!(tile_crop(FHD, Rect::new(0, 0, 100, 100), 0, 100).is_err());
    }

    #[test]
    fn out_of_range_coordinates_are_not_clamped() {
        // A TV placed beyond the wall bounds projects past the video edge.
        // The value is reported as-is so the misconfiguration stays visible.
        let tv = Rect::new(1280, 0, 640, 960);
        let c = tile_crop(FHD, tv, 1280, 960).expect("crop");
        assert!(c.x1 > 1920);
    }

    #[test]
    fn crop_arg_formatting() {
        let c = CropRect { x0: 240, y0: 0, x1: 960, y1: 540 };
        assert_eq!(c.to_arg(), "240 0 960 540");
    }
}
