//! Loading-screen selection and signalling.
//!
//! Loading screens are short clips that live on every receiver's disk. The
//! broadcaster probes their dimensions once and caches the result in a JSON
//! file keyed by a hash of the configured list, because the probe runs inside
//! the per-video broadcast process where a couple of ffprobe invocations per
//! clip would delay every playback start.

use std::path::{Path, PathBuf};

use rand::prelude::IndexedRandom;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use wallcast_core::config::Config;
use wallcast_net::ControlSender;
use wallcast_proto::{ControlMessage, LoadingScreenData};

use crate::{ffprobe, Result};

const CACHE_FILE: &str = "loading_screen_cache.json";

/// Where loading-screen clips live on broadcaster and receivers alike.
const LOADING_SCREEN_DIR: &str = "/var/lib/wallcast/loading_screens";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheFile {
    hash: String,
    loading_screens: Vec<LoadingScreenData>,
}

pub struct LoadingScreenHelper {
    /// All probed clips; dual-output walls may only use the 720p subset.
    screens: Vec<LoadingScreenData>,
    max_height: i64,
}

impl LoadingScreenHelper {
    /// Probe (or load from cache) the configured loading screens.
    pub async fn load(config: &Config, cache_dir: &Path) -> Result<Self> {
        let max_height = config.layout()?.max_video_height();
        let config_hash = config_list_hash(config);
        let cache_path = cache_dir.join(CACHE_FILE);

        if let Some(cached) = read_cache(&cache_path, &config_hash).await {
            info!(screens = cached.len(), "Using loading screen cache file");
            return Ok(Self { screens: cached, max_height });
        }

        info!("Probing loading screen metadata (cache missing or stale)");
        let mut screens = Vec::new();
        for entry in &config.loading_screens {
            let video_path = PathBuf::from(LOADING_SCREEN_DIR).join(&entry.video_file);
            match ffprobe::video_metadata(&video_path, &["width", "height"]).await {
                Ok(meta) => {
                    let (Some(width), Some(height)) = (
                        meta.get("width").and_then(|w| w.parse().ok()),
                        meta.get("height").and_then(|h| h.parse().ok()),
                    ) else {
                        warn!(path = %video_path.display(), "Probe returned non-numeric dimensions");
                        continue;
                    };
                    screens.push(LoadingScreenData {
                        video_path: video_path.display().to_string(),
                        width,
                        height,
                    });
                }
                Err(e) => warn!(path = %video_path.display(), error = %e, "Skipping unprobeable loading screen"),
            }
        }

        write_cache(&cache_path, &config_hash, &screens).await;
        Ok(Self { screens, max_height })
    }

    /// Pick a random loading screen usable on this wall, if any.
    pub fn choose(&self) -> Option<&LoadingScreenData> {
        let candidates: Vec<&LoadingScreenData> = self
            .screens
            .iter()
            .filter(|s| s.height <= self.max_height)
            .collect();
        candidates.choose(&mut rand::rng()).copied()
    }

    /// Signal receivers to show a random loading screen for this broadcast.
    pub async fn send_loading_screen_signal(
        &self,
        control: &ControlSender,
        log_uuid: &str,
    ) -> Result<()> {
        let Some(screen) = self.choose() else {
            return Ok(());
        };
        control
            .send(&ControlMessage::ShowLoadingScreen {
                log_uuid: log_uuid.to_string(),
                loading_screen_data: screen.clone(),
            })
            .await?;
        Ok(())
    }
}

fn config_list_hash(config: &Config) -> String {
    let serialized = serde_json::to_vec(&config.loading_screens).unwrap_or_default();
    hex::encode(Sha256::digest(&serialized))
}

async fn read_cache(path: &Path, expected_hash: &str) -> Option<Vec<LoadingScreenData>> {
    let raw = tokio::fs::read(path).await.ok()?;
    let cache: CacheFile = serde_json::from_slice(&raw).ok()?;
    (cache.hash == expected_hash).then_some(cache.loading_screens)
}

async fn write_cache(path: &Path, hash: &str, screens: &[LoadingScreenData]) {
    let cache = CacheFile {
        hash: hash.to_string(),
        loading_screens: screens.to_vec(),
    };
    match serde_json::to_vec_pretty(&cache) {
        Ok(bytes) => {
            if let Err(e) = tokio::fs::write(path, bytes).await {
                warn!(path = %path.display(), error = %e, "Failed to write loading screen cache");
            }
        }
        Err(e) => warn!(error = %e, "Failed to serialize loading screen cache"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wallcast_core::config::LoadingScreenConfig;

    #[test]
    fn hash_tracks_the_configured_list() {
        let mut a = Config::default();
        let b = Config::default();
        assert_eq!(config_list_hash(&a), config_list_hash(&b));

        a.loading_screens.push(LoadingScreenConfig {
            video_file: "dialup.ts".to_string(),
        });
        assert_ne!(config_list_hash(&a), config_list_hash(&b));
    }

    #[test]
    fn choose_filters_by_wall_resolution_cap() {
        let helper = LoadingScreenHelper {
            screens: vec![
                LoadingScreenData {
                    video_path: "hd.ts".to_string(),
                    width: 1920,
                    height: 1080,
                },
                LoadingScreenData {
                    video_path: "sd.ts".to_string(),
                    width: 1280,
                    height: 720,
                },
            ],
            max_height: 720,
        };
        for _ in 0..20 {
            assert_eq!(helper.choose().expect("candidate").video_path, "sd.ts");
        }
    }

    #[tokio::test]
    async fn cache_round_trips_and_invalidates_on_hash_change() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CACHE_FILE);
        let screens = vec![LoadingScreenData {
            video_path: "x.ts".to_string(),
            width: 640,
            height: 480,
        }];
        write_cache(&path, "abc", &screens).await;

        let hit = read_cache(&path, "abc").await.expect("cache hit");
        assert_eq!(hit.len(), 1);
        assert!(read_cache(&path, "other").await.is_none());
    }
}
