//! Screensaver selection for an idle wall.
//!
//! When the queue runs dry the wall can keep moving: either a configured
//! screensaver file or, optionally, one of the channel videos. Clips too tall
//! for a dual-output wall are dropped at load time with a warning.

use std::path::PathBuf;

use rand::prelude::IndexedRandom;
use tracing::{info, warn};

use wallcast_core::config::Config;

use crate::{ffprobe, Result};

/// What the queue should play while idle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Screensaver {
    File(PathBuf),
    ChannelVideo(String),
}

pub struct ScreensaverHelper {
    files: Vec<PathBuf>,
    channel_videos: Vec<String>,
    use_screensavers: bool,
    use_channel_videos: bool,
}

impl ScreensaverHelper {
    pub async fn load(config: &Config) -> Result<Self> {
        let max_height = config.layout()?.max_video_height();

        let mut files = Vec::new();
        for entry in &config.screensavers {
            let path = PathBuf::from(&entry.video_path);
            match ffprobe::video_metadata(&path, &["height"]).await {
                Ok(meta) => {
                    let height: i64 = meta
                        .get("height")
                        .and_then(|h| h.parse().ok())
                        .unwrap_or(i64::MAX);
                    if height > max_height {
                        warn!(
                            path = %path.display(),
                            height,
                            max_height,
                            "Not adding screensaver; resolution too high for this wall"
                        );
                        continue;
                    }
                    files.push(path);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unprobeable screensaver"),
            }
        }
        info!(screensavers = files.len(), "Loaded screensaver metadata");

        Ok(Self {
            files,
            channel_videos: config.channel_videos.iter().map(|c| c.url.clone()).collect(),
            use_screensavers: config.use_screensavers,
            use_channel_videos: config.use_channel_videos_as_screensavers,
        })
    }

    /// Pick something to play on an idle wall, or `None` when screensavers
    /// are disabled or nothing is configured.
    pub fn choose(&self) -> Option<Screensaver> {
        if !self.use_screensavers {
            return None;
        }
        let mut rng = rand::rng();
        if self.use_channel_videos {
            if let Some(url) = self.channel_videos.choose(&mut rng) {
                return Some(Screensaver::ChannelVideo(url.clone()));
            }
        }
        self.files
            .choose(&mut rng)
            .map(|path| Some(Screensaver::File(path.clone())))
            .unwrap_or(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn helper(
        files: Vec<&str>,
        channel_videos: Vec<&str>,
        use_screensavers: bool,
        use_channel_videos: bool,
    ) -> ScreensaverHelper {
        ScreensaverHelper {
            files: files.into_iter().map(PathBuf::from).collect(),
            channel_videos: channel_videos.into_iter().map(String::from).collect(),
            use_screensavers,
            use_channel_videos,
        }
    }

    #[test]
    fn disabled_screensavers_choose_nothing() {
        let h = helper(vec!["a.ts"], vec!["http://ch/1"], false, true);
        assert_eq!(h.choose(), None);
    }

    #[test]
    fn channel_videos_take_precedence_when_enabled() {
        let h = helper(vec!["a.ts"], vec!["http://ch/1"], true, true);
        assert_eq!(
            h.choose(),
            Some(Screensaver::ChannelVideo("http://ch/1".to_string()))
        );
    }

    #[test]
    fn falls_back_to_files() {
        let h = helper(vec!["a.ts"], vec![], true, true);
        assert_eq!(h.choose(), Some(Screensaver::File(PathBuf::from("a.ts"))));
        let h = helper(vec![], vec![], true, false);
        assert_eq!(h.choose(), None);
    }
}
