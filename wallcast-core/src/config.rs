use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use config::{Config as ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::models::{Rect, TvId, TvSpec};
use crate::{Error, Result};

/// Application configuration, loaded once from `wallcast.toml` (overridable
/// with `WALLCAST_`-prefixed environment variables).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// One entry per receiver host. A receiver drives one TV, or two when the
    /// dual-output (`*2`) fields are present.
    pub receivers: BTreeMap<String, ReceiverConfig>,
    /// Override for the number of row buckets the animator sweeps over.
    /// Defaults to the number of distinct TV-center rows.
    pub rows: Option<usize>,
    /// Override for the number of column buckets. Defaults likewise.
    pub columns: Option<usize>,
    pub logging: LoggingConfig,
    pub database: DatabaseConfig,
    pub multicast: MulticastConfig,
    pub loading_screens: Vec<LoadingScreenConfig>,
    pub screensavers: Vec<ScreensaverConfig>,
    pub channel_videos: Vec<ChannelVideoConfig>,
    pub use_screensavers: bool,
    pub use_channel_videos_as_screensavers: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
    pub audio: String,
    pub video: String,
    pub orientation: u32,

    // Second TV on a dual-output receiver. All-or-nothing: if any of these is
    // set, the geometry and output fields must all be set.
    pub x2: Option<i64>,
    pub y2: Option<i64>,
    pub width2: Option<i64>,
    pub height2: Option<i64>,
    pub audio2: Option<String>,
    pub video2: Option<String>,
    pub orientation2: Option<u32>,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            x: 0,
            y: 0,
            width: 0,
            height: 0,
            audio: String::new(),
            video: String::new(),
            orientation: 0,
            x2: None,
            y2: None,
            width2: None,
            height2: None,
            audio2: None,
            video2: None,
            orientation2: None,
        }
    }
}

impl ReceiverConfig {
    pub fn is_dual_output(&self) -> bool {
        self.x2.is_some()
            || self.y2.is_some()
            || self.width2.is_some()
            || self.height2.is_some()
            || self.audio2.is_some()
            || self.video2.is_some()
            || self.orientation2.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// "json" or "pretty"
    pub format: String,
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
    pub busy_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("wallcast.db"),
            max_connections: 5,
            busy_timeout_seconds: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MulticastConfig {
    pub group: Ipv4Addr,
    pub video_port: u16,
    pub control_port: u16,
    /// The wired interface multicast is pinned to. Multicast over wifi drops
    /// too many datagrams to stream video.
    pub interface: String,
}

impl Default for MulticastConfig {
    fn default() -> Self {
        Self {
            group: Ipv4Addr::new(239, 0, 1, 23),
            video_port: 1234,
            control_port: 1235,
            interface: "eth0".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoadingScreenConfig {
    pub video_file: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScreensaverConfig {
    pub video_path: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelVideoConfig {
    pub url: String,
    pub title: String,
}

impl Config {
    /// Load and validate configuration. `path` defaults to `wallcast.toml` in
    /// the working directory.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => File::from(p.to_path_buf()),
            None => File::with_name("wallcast"),
        };

        let config: Self = ConfigBuilder::builder()
            .add_source(file)
            .add_source(Environment::with_prefix("WALLCAST").separator("__"))
            .build()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?
            .try_deserialize()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.receivers.is_empty() {
            return Err(Error::InvalidConfig(
                "Config has no receivers".to_string(),
            ));
        }
        for (host, rc) in &self.receivers {
            if rc.width <= 0 || rc.height <= 0 {
                return Err(Error::InvalidConfig(format!(
                    "Non-positive TV dimensions for receiver: {host}"
                )));
            }
            if rc.x < 0 || rc.y < 0 {
                return Err(Error::InvalidConfig(format!(
                    "Negative TV position for receiver: {host}"
                )));
            }
            if rc.audio.is_empty() {
                return Err(Error::InvalidConfig(format!(
                    "Config missing field 'audio' for receiver: {host}"
                )));
            }
            if rc.video.is_empty() {
                return Err(Error::InvalidConfig(format!(
                    "Config missing field 'video' for receiver: {host}"
                )));
            }
            if rc.is_dual_output() {
                for (field, missing) in [
                    ("x2", rc.x2.is_none()),
                    ("y2", rc.y2.is_none()),
                    ("width2", rc.width2.is_none()),
                    ("height2", rc.height2.is_none()),
                    ("audio2", rc.audio2.is_none()),
                    ("video2", rc.video2.is_none()),
                ] {
                    if missing {
                        return Err(Error::InvalidConfig(format!(
                            "Config missing field '{field}' for receiver: {host}"
                        )));
                    }
                }
                if rc.width2.unwrap_or(0) <= 0 || rc.height2.unwrap_or(0) <= 0 {
                    return Err(Error::InvalidConfig(format!(
                        "Non-positive second TV dimensions for receiver: {host}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Derive the wall layout: per-TV rectangles, wall dimensions, dual-output
    /// flag, and row/column buckets.
    pub fn layout(&self) -> Result<WallLayout> {
        self.validate()?;

        let mut tvs = BTreeMap::new();
        let mut is_any_dual_output = false;
        for (host, rc) in &self.receivers {
            let tv_id = TvId::new(host.clone(), 1);
            tvs.insert(
                tv_id.clone(),
                TvSpec {
                    tv_id,
                    rect: Rect::new(rc.x, rc.y, rc.width, rc.height),
                    audio: rc.audio.clone(),
                    video: rc.video.clone(),
                    orientation: rc.orientation,
                },
            );
            if rc.is_dual_output() {
                is_any_dual_output = true;
                let tv_id = TvId::new(host.clone(), 2);
                tvs.insert(
                    tv_id.clone(),
                    TvSpec {
                        tv_id,
                        rect: Rect::new(
                            rc.x2.unwrap_or(0),
                            rc.y2.unwrap_or(0),
                            rc.width2.unwrap_or(0),
                            rc.height2.unwrap_or(0),
                        ),
                        audio: rc.audio2.clone().unwrap_or_default(),
                        video: rc.video2.clone().unwrap_or_default(),
                        orientation: rc.orientation2.unwrap_or(0),
                    },
                );
            }
        }

        let wall_width = tvs.values().map(|tv| tv.rect.right()).max().unwrap_or(0);
        let wall_height = tvs.values().map(|tv| tv.rect.bottom()).max().unwrap_or(0);

        let layout = WallLayout {
            wall_width,
            wall_height,
            is_any_dual_output,
            rows: bucket_tvs(&tvs, wall_height, self.rows, |c| c.1),
            columns: bucket_tvs(&tvs, wall_width, self.columns, |c| c.0),
            tvs,
        };
        info!(
            wall_width = layout.wall_width,
            wall_height = layout.wall_height,
            tvs = layout.tvs.len(),
            rows = layout.rows.len(),
            columns = layout.columns.len(),
            dual_output = layout.is_any_dual_output,
            "Computed wall layout"
        );
        Ok(layout)
    }
}

/// Bucket TVs along one axis by their center coordinate. Without an override,
/// every distinct center value forms its own bucket; with one, the wall extent
/// is split into that many equal bands.
fn bucket_tvs(
    tvs: &BTreeMap<TvId, TvSpec>,
    extent: i64,
    override_count: Option<usize>,
    axis: fn((f64, f64)) -> f64,
) -> Vec<Vec<TvId>> {
    let mut buckets: Vec<Vec<TvId>>;
    match override_count {
        Some(n) if n > 0 => {
            buckets = vec![Vec::new(); n];
            let band = extent as f64 / n as f64;
            for (id, tv) in tvs {
                let mut idx = (axis(tv.rect.center()) / band) as usize;
                idx = idx.min(n - 1);
                buckets[idx].push(id.clone());
            }
        }
        _ => {
            let mut centers: Vec<i64> = tvs
                .values()
                .map(|tv| axis(tv.rect.center()).round() as i64)
                .collect();
            centers.sort_unstable();
            centers.dedup();
            buckets = vec![Vec::new(); centers.len()];
            for (id, tv) in tvs {
                let c = axis(tv.rect.center()).round() as i64;
                if let Ok(idx) = centers.binary_search(&c) {
                    buckets[idx].push(id.clone());
                }
            }
        }
    }
    buckets
}

/// The wall as derived from configuration: every TV's placement plus the
/// bucket structure animations sweep over.
#[derive(Debug, Clone)]
pub struct WallLayout {
    pub tvs: BTreeMap<TvId, TvSpec>,
    pub wall_width: i64,
    pub wall_height: i64,
    pub is_any_dual_output: bool,
    /// Row buckets, top to bottom. `rows[0]` holds the tv_ids whose centers
    /// fall in the topmost band.
    pub rows: Vec<Vec<TvId>>,
    /// Column buckets, left to right.
    pub columns: Vec<Vec<TvId>>,
}

impl WallLayout {
    pub fn tv_ids(&self) -> Vec<TvId> {
        self.tvs.keys().cloned().collect()
    }

    pub fn tvs_for_host(&self, hostname: &str) -> Vec<&TvSpec> {
        self.tvs
            .values()
            .filter(|tv| tv.tv_id.hostname == hostname)
            .collect()
    }

    pub fn receiver_hostnames(&self) -> Vec<String> {
        let mut hosts: Vec<String> = self.tvs.keys().map(|id| id.hostname.clone()).collect();
        hosts.dedup();
        hosts
    }

    /// TVs sitting at the intersection of a row bucket and a column bucket.
    pub fn tvs_in_intersection(&self, row: usize, column: usize) -> Vec<TvId> {
        let (Some(row_tvs), Some(col_tvs)) = (self.rows.get(row), self.columns.get(column)) else {
            return Vec::new();
        };
        col_tvs
            .iter()
            .filter(|id| row_tvs.contains(id))
            .cloned()
            .collect()
    }

    /// Receivers driving two TVs are capped at 720p per output, which caps the
    /// resolution the whole wall can ingest.
    pub const fn max_video_height(&self) -> i64 {
        if self.is_any_dual_output {
            720
        } else {
            1080
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receiver(x: i64, y: i64, w: i64, h: i64) -> ReceiverConfig {
        ReceiverConfig {
            x,
            y,
            width: w,
            height: h,
            audio: "hdmi".to_string(),
            video: "hdmi".to_string(),
            ..ReceiverConfig::default()
        }
    }

    fn two_by_two() -> Config {
        let mut receivers = BTreeMap::new();
        receivers.insert("a.local".to_string(), receiver(0, 0, 640, 480));
        receivers.insert("b.local".to_string(), receiver(640, 0, 640, 480));
        receivers.insert("c.local".to_string(), receiver(0, 480, 640, 480));
        receivers.insert("d.local".to_string(), receiver(640, 480, 640, 480));
        Config {
            receivers,
            ..Config::default()
        }
    }

    #[test]
    fn wall_dimensions_derive_from_receivers() {
        let layout = two_by_two().layout().unwrap();
        assert_eq!(layout.wall_width, 1280);
        assert_eq!(layout.wall_height, 960);
        assert_eq!(layout.tvs.len(), 4);
        assert!(!layout.is_any_dual_output);
        assert_eq!(layout.max_video_height(), 1080);
    }

    #[test]
    fn row_and_column_buckets() {
        let layout = two_by_two().layout().unwrap();
        assert_eq!(layout.rows.len(), 2);
        assert_eq!(layout.columns.len(), 2);
        // Top row: a and b; left column: a and c.
        assert_eq!(
            layout.rows[0],
            vec![TvId::new("a.local", 1), TvId::new("b.local", 1)]
        );
        assert_eq!(
            layout.columns[0],
            vec![TvId::new("a.local", 1), TvId::new("c.local", 1)]
        );
        assert_eq!(
            layout.tvs_in_intersection(1, 1),
            vec![TvId::new("d.local", 1)]
        );
    }

    #[test]
    fn dual_output_expands_to_two_tvs() {
        let mut config = two_by_two();
        {
            let rc = config.receivers.get_mut("a.local").unwrap();
            rc.x2 = Some(0);
            rc.y2 = Some(960);
            rc.width2 = Some(640);
            rc.height2 = Some(480);
            rc.audio2 = Some("hdmi1".to_string());
            rc.video2 = Some("hdmi1".to_string());
        }
        let layout = config.layout().unwrap();
        assert_eq!(layout.tvs.len(), 5);
        assert!(layout.is_any_dual_output);
        assert_eq!(layout.max_video_height(), 720);
        assert_eq!(layout.wall_height, 1440);
        assert_eq!(layout.tvs_for_host("a.local").len(), 2);
    }

    #[test]
    fn dual_output_requires_all_fields() {
        let mut config = two_by_two();
        config.receivers.get_mut("a.local").unwrap().x2 = Some(0);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("y2"), "unexpected error: {err}");
    }

    #[test]
    fn zero_sized_tv_is_rejected() {
        let mut config = two_by_two();
        config.receivers.get_mut("a.local").unwrap().width = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn explicit_row_override_bands_the_wall() {
        let mut config = two_by_two();
        config.rows = Some(1);
        let layout = config.layout().unwrap();
        assert_eq!(layout.rows.len(), 1);
        assert_eq!(layout.rows[0].len(), 4);
    }
}
