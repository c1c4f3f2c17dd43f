//! The receiver state machine.
//!
//! One event loop: receive a control message, dispatch. The video subsystem
//! moves IDLE → PLAYING_PAUSED (init) → PLAYING (play) → IDLE (skip, player
//! exit, or socket timeout); a new init always tears down the previous video
//! first. An independent loading-screen substate is toggled by its own pair
//! of messages.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, info, warn};

use wallcast_core::config::{Config, WallLayout};
use wallcast_core::geometry::{crops_for_tv, CropSet, VideoDimensions};
use wallcast_core::models::{DisplayMode, TvId, TvSpec};
use wallcast_core::volume::pct_to_millibels;
use wallcast_net::ControlReceiver;
use wallcast_proto::{ControlMessage, LoadingScreenData};

use crate::ingest::IngestTask;
use crate::player::{self, PlayerHandle, PlayerSource, PlayerSpec};
use crate::{console, ReceiverError, Result};

/// Cadence for reaping players that exited on their own.
const REAP_INTERVAL: Duration = Duration::from_secs(1);

pub struct Receiver {
    config: Config,
    layout: WallLayout,
    /// TVs attached to this host, ordered by output number.
    tvs: Vec<TvSpec>,
    control: ControlReceiver,
    video_players: BTreeMap<u8, PlayerHandle>,
    loading_players: BTreeMap<u8, PlayerHandle>,
    /// Crop windows for the active video, per TV output.
    crops: BTreeMap<u8, CropSet>,
    display_modes: BTreeMap<u8, DisplayMode>,
    volume_mb: i64,
    ingest: Option<IngestTask>,
    log_uuid: Option<String>,
}

impl Receiver {
    pub fn new(config: Config) -> Result<Self> {
        let layout = config.layout()?;
        let hostname = local_hostname();
        let tvs = owned_tvs(&layout, &hostname)?;
        info!(
            hostname,
            tvs = tvs.len(),
            "Receiver owns {} TV(s)",
            tvs.len()
        );

        let control = ControlReceiver::join(
            config.multicast.group,
            config.multicast.control_port,
        )?;

        let display_modes = tvs
            .iter()
            .map(|tv| (tv.tv_id.tv_number, DisplayMode::DEFAULT))
            .collect();

        Ok(Self {
            config,
            layout,
            tvs,
            control,
            video_players: BTreeMap::new(),
            loading_players: BTreeMap::new(),
            crops: BTreeMap::new(),
            display_modes,
            volume_mb: 0,
            ingest: None,
            log_uuid: None,
        })
    }

    /// The event loop. Runs until the task is cancelled; call
    /// [`Receiver::shutdown`] afterwards.
    pub async fn run(&mut self) -> Result<()> {
        console::blank().await;
        player::warm_up().await;
        info!("Receiver started");

        loop {
            match tokio::time::timeout(REAP_INTERVAL, self.control.recv()).await {
                Ok(msg) => {
                    let msg = msg?;
                    self.dispatch(msg).await;
                }
                // Quiet control channel: use the lull to reap players that
                // exited on their own.
                Err(_) => self.reap_exited_players().await,
            }
        }
    }

    pub async fn shutdown(&mut self) {
        self.stop_video().await;
        self.stop_loading_screen().await;
        console::restore().await;
        info!("Receiver shut down");
    }

    async fn dispatch(&mut self, msg: ControlMessage) {
        debug!(msg_type = msg.msg_type(), "Received control message");
        match msg {
            ControlMessage::InitVideo {
                log_uuid,
                video_width,
                video_height,
            } => {
                self.init_video(log_uuid, video_width, video_height).await;
            }
            ControlMessage::PlayVideo => self.play_video().await,
            ControlMessage::SkipVideo => {
                info!(log_uuid = self.log_uuid.as_deref().unwrap_or(""), "Skipping video");
                self.stop_video().await;
                self.stop_loading_screen().await;
            }
            ControlMessage::Volume(vol_pct) => self.apply_volume(vol_pct),
            ControlMessage::DisplayMode(modes) => self.apply_display_modes(&modes),
            ControlMessage::ShowLoadingScreen {
                log_uuid,
                loading_screen_data,
            } => self.show_loading_screen(log_uuid, loading_screen_data).await,
            ControlMessage::EndLoadingScreen => self.stop_loading_screen().await,
        }
    }

    /// Stop any prior video, compute both crop windows per owned TV, and
    /// spawn paused players wired to the multicast ingest.
    async fn init_video(&mut self, log_uuid: String, video_width: i64, video_height: i64) {
        self.stop_video().await;
        self.log_uuid = Some(log_uuid.clone());
        info!(log_uuid = %log_uuid, video_width, video_height, "Initializing video players");

        let video = VideoDimensions { width: video_width, height: video_height };
        let mut sinks = Vec::new();
        for tv in &self.tvs {
            let tv_number = tv.tv_id.tv_number;
            let crop_set = match crops_for_tv(
                video,
                tv.rect,
                self.layout.wall_width,
                self.layout.wall_height,
            ) {
                Ok(crops) => crops,
                Err(e) => {
                    warn!(tv = %tv.tv_id, error = %e, "Cannot compute crops; skipping TV");
                    continue;
                }
            };
            self.crops.insert(tv_number, crop_set);

            let mode = self.display_mode_for(tv_number);
            let spec = PlayerSpec {
                handle_name: format!("tv{tv_number}.video"),
                audio_device: audio_device(&tv.audio).unwrap_or_else(|e| {
                    warn!(tv = %tv.tv_id, error = %e, "Unknown audio output; using default");
                    "auto".to_string()
                }),
                video_connector: video_connector(&tv.video).unwrap_or_else(|e| {
                    warn!(tv = %tv.tv_id, error = %e, "Unknown video output; using default");
                    String::new()
                }),
                orientation: tv.orientation,
                crop: crop_set.for_mode(mode),
                volume_mb: self.volume_mb,
                start_paused: true,
                source: PlayerSource::Stdin,
            };
            match PlayerHandle::spawn(&spec) {
                Ok(mut handle) => {
                    if let Some(stdin) = handle.take_stdin() {
                        sinks.push(stdin);
                    }
                    self.video_players.insert(tv_number, handle);
                }
                Err(e) => warn!(tv = %tv.tv_id, error = %e, "Failed to spawn video player"),
            }
        }

        if sinks.is_empty() {
            warn!("No video players running; not starting ingest");
            return;
        }
        match IngestTask::start(
            self.config.multicast.group,
            self.config.multicast.video_port,
            sinks,
        ) {
            Ok(task) => self.ingest = Some(task),
            Err(e) => warn!(error = %e, "Failed to start video ingest"),
        }
    }

    /// The start-sync signal: unpause every video player.
    async fn play_video(&mut self) {
        if self.video_players.is_empty() {
            debug!("Play signal with no players; ignoring");
            return;
        }
        info!(log_uuid = self.log_uuid.as_deref().unwrap_or(""), "Unpausing playback");
        for handle in self.video_players.values() {
            if let Err(e) = handle.set_pause(false).await {
                warn!(handle = handle.name(), error = %e, "Failed to unpause player");
            }
        }
    }

    /// Apply perceptual volume to every active player on this receiver.
    fn apply_volume(&mut self, vol_pct: f64) {
        self.volume_mb = pct_to_millibels(vol_pct);
        for handle in self.video_players.values().chain(self.loading_players.values()) {
            handle.push_volume(self.volume_mb);
        }
    }

    /// Update cached display modes for owned TVs; re-crop active players
    /// immediately.
    fn apply_display_modes(&mut self, modes: &BTreeMap<String, String>) {
        for (tv_id_str, mode_str) in modes {
            let Ok(tv_id) = TvId::parse(tv_id_str) else {
                warn!(tv_id = %tv_id_str, "Malformed tv_id in display-mode message");
                continue;
            };
            if !self.owns(&tv_id) {
                continue;
            }
            let Some(mode) = DisplayMode::from_str(mode_str) else {
                warn!(mode = %mode_str, "Unknown display mode");
                continue;
            };

            let tv_number = tv_id.tv_number;
            let changed = self.display_modes.insert(tv_number, mode) != Some(mode);
            if !changed {
                continue;
            }
            debug!(tv = %tv_id, mode = mode.as_str(), "Display mode changed");
            if let (Some(handle), Some(crop_set)) =
                (self.video_players.get(&tv_number), self.crops.get(&tv_number))
            {
                handle.push_crop(crop_set.for_mode(mode));
            }
        }
    }

    /// Start the auxiliary loading-screen player(s) on their own handles.
    async fn show_loading_screen(&mut self, log_uuid: String, data: LoadingScreenData) {
        if !self.loading_players.is_empty() {
            debug!("Loading screen already showing");
            return;
        }
        info!(log_uuid = %log_uuid, path = %data.video_path, "Showing loading screen");

        let video = VideoDimensions { width: data.width, height: data.height };
        for tv in &self.tvs {
            let tv_number = tv.tv_id.tv_number;
            let crop_set = match crops_for_tv(
                video,
                tv.rect,
                self.layout.wall_width,
                self.layout.wall_height,
            ) {
                Ok(crops) => crops,
                Err(e) => {
                    warn!(tv = %tv.tv_id, error = %e, "Cannot compute loading-screen crops");
                    continue;
                }
            };
            let mode = self.display_mode_for(tv_number);
            let spec = PlayerSpec {
                handle_name: format!("tv{tv_number}.loading"),
                audio_device: audio_device(&tv.audio).unwrap_or_else(|_| "auto".to_string()),
                video_connector: video_connector(&tv.video).unwrap_or_default(),
                orientation: tv.orientation,
                crop: crop_set.for_mode(mode),
                volume_mb: self.volume_mb,
                start_paused: false,
                source: PlayerSource::File(PathBuf::from(&data.video_path)),
            };
            match PlayerHandle::spawn(&spec) {
                Ok(handle) => {
                    self.loading_players.insert(tv_number, handle);
                }
                Err(e) => warn!(tv = %tv.tv_id, error = %e, "Failed to spawn loading screen"),
            }
        }
    }

    async fn stop_video(&mut self) {
        if let Some(ingest) = self.ingest.take() {
            ingest.abort();
        }
        for (_, handle) in std::mem::take(&mut self.video_players) {
            handle.kill().await;
        }
        self.crops.clear();
    }

    async fn stop_loading_screen(&mut self) {
        for (_, handle) in std::mem::take(&mut self.loading_players) {
            handle.kill().await;
        }
    }

    /// Players that exited on their own (end of stream, crash) move the
    /// subsystem back to IDLE without an explicit control message.
    async fn reap_exited_players(&mut self) {
        let exited: Vec<u8> = self
            .video_players
            .iter_mut()
            .filter_map(|(n, h)| h.has_exited().then_some(*n))
            .collect();
        if !exited.is_empty() {
            debug!(count = exited.len(), "Reaping exited video players");
            for n in exited {
                if let Some(handle) = self.video_players.remove(&n) {
                    handle.kill().await;
                }
            }
            if self.video_players.is_empty() {
                if let Some(ingest) = self.ingest.take() {
                    ingest.abort();
                }
                self.crops.clear();
            }
        }

        let exited: Vec<u8> = self
            .loading_players
            .iter_mut()
            .filter_map(|(n, h)| h.has_exited().then_some(*n))
            .collect();
        for n in exited {
            if let Some(handle) = self.loading_players.remove(&n) {
                handle.kill().await;
            }
        }
    }

    fn display_mode_for(&self, tv_number: u8) -> DisplayMode {
        self.display_modes
            .get(&tv_number)
            .copied()
            .unwrap_or(DisplayMode::DEFAULT)
    }

    fn owns(&self, tv_id: &TvId) -> bool {
        self.tvs.iter().any(|tv| &tv.tv_id == tv_id)
    }
}

/// The TVs configured for this host. Config keys may or may not carry the
/// `.local` mDNS suffix, so both spellings are accepted.
fn owned_tvs(layout: &WallLayout, hostname: &str) -> Result<Vec<TvSpec>> {
    let candidates = [
        hostname.to_string(),
        format!("{hostname}.local"),
        hostname.trim_end_matches(".local").to_string(),
    ];
    for candidate in &candidates {
        let tvs: Vec<TvSpec> = layout.tvs_for_host(candidate).into_iter().cloned().collect();
        if !tvs.is_empty() {
            return Ok(tvs);
        }
    }
    Err(ReceiverError::UnknownHost(hostname.to_string()))
}

fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

/// Map the configured audio output kind to a player audio device.
fn audio_device(kind: &str) -> Result<String> {
    match kind {
        "hdmi" | "hdmi0" => Ok("alsa/hdmi:CARD=vc4hdmi0".to_string()),
        "hdmi1" => Ok("alsa/hdmi:CARD=vc4hdmi1".to_string()),
        "headphone" => Ok("alsa/default:CARD=Headphones".to_string()),
        "hdmi_alsa" | "hdmi0_alsa" => Ok("alsa/default:CARD=b1".to_string()),
        "hdmi1_alsa" => Ok("alsa/default:CARD=b2".to_string()),
        other => Err(ReceiverError::Player(format!(
            "Unexpected audio config value: {other}"
        ))),
    }
}

/// Map the configured video output kind to a DRM connector.
fn video_connector(kind: &str) -> Result<String> {
    match kind {
        "hdmi" | "hdmi0" => Ok("HDMI-A-1".to_string()),
        "hdmi1" => Ok("HDMI-A-2".to_string()),
        "composite" => Ok("Composite-1".to_string()),
        other => Err(ReceiverError::Player(format!(
            "Unexpected video config value: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wallcast_core::config::ReceiverConfig;

    fn config_with_host(host: &str) -> Config {
        let mut receivers = BTreeMap::new();
        receivers.insert(
            host.to_string(),
            ReceiverConfig {
                x: 0,
                y: 0,
                width: 1920,
                height: 1080,
                audio: "hdmi".to_string(),
                video: "hdmi".to_string(),
                ..ReceiverConfig::default()
            },
        );
        Config { receivers, ..Config::default() }
    }

    #[test]
    fn owned_tvs_matches_with_and_without_local_suffix() {
        let layout = config_with_host("wall1.local").layout().expect("layout");
        assert_eq!(owned_tvs(&layout, "wall1").expect("match").len(), 1);
        assert_eq!(owned_tvs(&layout, "wall1.local").expect("match").len(), 1);
        assert!(owned_tvs(&layout, "other").is_err());
    }

    #[test]
    fn audio_and_video_mappings_reject_unknown_kinds() {
        assert!(audio_device("hdmi").is_ok());
        assert!(audio_device("headphone").is_ok());
        assert!(audio_device("bluetooth").is_err());
        assert!(video_connector("hdmi").is_ok());
        assert!(video_connector("composite").is_ok());
        assert!(video_connector("vga").is_err());
    }
}
