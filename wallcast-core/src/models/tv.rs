//! TV identity and placement.
//!
//! A receiver host drives one or two TVs (dual output over HDMI0 + HDMI1).
//! A `tv_id` uniquely identifies a TV on the wall: `<receiver_hostname>_<tv_number>`
//! where `tv_number` is 1 or 2, e.g. `wall3.local_2`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

const TV_ID_DELIM: char = '_';

/// Identity of a single TV: owning receiver hostname plus output number.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TvId {
    pub hostname: String,
    pub tv_number: u8,
}

impl TvId {
    pub fn new(hostname: impl Into<String>, tv_number: u8) -> Self {
        Self { hostname: hostname.into(), tv_number }
    }

    /// Parse `<hostname>_<tv_number>`. Hostnames may themselves contain the
    /// delimiter, so the split is on the last occurrence.
    pub fn parse(s: &str) -> Result<Self> {
        let (hostname, num) = s
            .rsplit_once(TV_ID_DELIM)
            .ok_or_else(|| Error::InvalidInput(format!("Malformed tv_id: {s}")))?;
        let tv_number: u8 = num
            .parse()
            .map_err(|_| Error::InvalidInput(format!("Malformed tv_id number: {s}")))?;
        if hostname.is_empty() || !(1..=2).contains(&tv_number) {
            return Err(Error::InvalidInput(format!("Malformed tv_id: {s}")));
        }
        Ok(Self::new(hostname, tv_number))
    }
}

impl fmt::Display for TvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.hostname, TV_ID_DELIM, self.tv_number)
    }
}

impl Serialize for TvId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TvId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Axis-aligned rectangle in wall coordinates. Units are whatever the operator
/// measured the wall in (inches, centimeters); only ratios matter downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
}

impl Rect {
    pub const fn new(x: i64, y: i64, width: i64, height: i64) -> Self {
        Self { x, y, width, height }
    }

    pub const fn right(&self) -> i64 {
        self.x + self.width
    }

    pub const fn bottom(&self) -> i64 {
        self.y + self.height
    }

    /// Center point, used for row/column bucket assignment.
    pub fn center(&self) -> (f64, f64) {
        (
            self.x as f64 + self.width as f64 / 2.0,
            self.y as f64 + self.height as f64 / 2.0,
        )
    }
}

/// One TV's static placement and output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TvSpec {
    pub tv_id: TvId,
    pub rect: Rect,
    pub audio: String,
    pub video: String,
    /// Rotation in degrees applied by the media player. Default 0.
    pub orientation: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tv_id_round_trips() {
        let id = TvId::new("wall3.local", 2);
        assert_eq!(id.to_string(), "wall3.local_2");
        assert_eq!(TvId::parse("wall3.local_2").unwrap(), id);
    }

    #[test]
    fn tv_id_splits_on_last_delimiter() {
        let id = TvId::parse("my_host_name_1").unwrap();
        assert_eq!(id.hostname, "my_host_name");
        assert_eq!(id.tv_number, 1);
    }

    #[test]
    fn tv_id_rejects_garbage() {
        assert!(TvId::parse("nodelim").is_err());
        assert!(TvId::parse("host_3").is_err());
        assert!(TvId::parse("host_x").is_err());
        assert!(TvId::parse("_1").is_err());
    }

    #[test]
    fn rect_center() {
        let r = Rect::new(960, 0, 960, 1080);
        assert_eq!(r.center(), (1440.0, 540.0));
        assert_eq!(r.right(), 1920);
        assert_eq!(r.bottom(), 1080);
    }
}
