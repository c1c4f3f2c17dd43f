//! The broadcaster's queue loop.
//!
//! A 50 ms loop that owns playback: it starts a `broadcast` subprocess for
//! the next queued item, watches for skip requests and child exit, falls
//! back to a screensaver when idle, ticks the animator, republishes volume,
//! and services the IR remote.
//!
//! Playback bookkeeping is all compare-and-swap against the playlist store,
//! so the enqueueing surface and this loop can race without corrupting state.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use wallcast_core::animator::{Animator, AnimatorStep, TICKS_PER_SECOND};
use wallcast_core::config::{Config, WallLayout};
use wallcast_core::logging::make_log_uuid;
use wallcast_core::models::settings::SETTING_VOLUME_PCT;
use wallcast_core::models::{EnqueueRequest, ItemKind, PlaylistItem};
use wallcast_core::repository::{PlaylistRepository, SettingsRepository};
use wallcast_net::ControlSender;
use wallcast_proto::ControlMessage;

use crate::display_mode::DisplayModeController;
use crate::remote::{LircRemote, RemoteEvent, RemoteSource};
use crate::screensaver::{Screensaver, ScreensaverHelper};
use crate::Result;

const LOOP_PERIOD: Duration = Duration::from_millis(50);
const ANIMATOR_PERIOD: Duration = Duration::from_millis(1000 / TICKS_PER_SECOND);
const VOLUME_REPUBLISH_PERIOD: Duration = Duration::from_secs(2);
/// Remote input must not steal the loop for long.
const REMOTE_BUDGET: Duration = Duration::from_millis(500);
const CHILD_KILL_WAIT: Duration = Duration::from_secs(10);
const VOLUME_INCREMENT: f64 = 1.0;

/// A running `broadcast` subprocess and what it is playing.
struct RunningBroadcast {
    child: Child,
    /// `None` for screensavers, which have no playlist row.
    item: Option<PlaylistItem>,
    log_uuid: String,
}

pub struct Queue {
    config: Config,
    layout: WallLayout,
    config_path: Option<PathBuf>,
    playlist: PlaylistRepository,
    settings: SettingsRepository,
    display: DisplayModeController,
    control: Arc<ControlSender>,
    animator: Animator,
    screensaver: ScreensaverHelper,
    remote: Option<LircRemote>,
    broadcast: Option<RunningBroadcast>,
    last_animator_tick: Instant,
    last_volume_publish: Instant,
    channel_cursor: usize,
}

impl Queue {
    pub async fn new(
        config: Config,
        config_path: Option<PathBuf>,
        playlist: PlaylistRepository,
        settings: SettingsRepository,
    ) -> Result<Self> {
        let layout = config.layout()?;
        let control = Arc::new(ControlSender::new(
            config.multicast.group,
            config.multicast.control_port,
        )?);
        let display = DisplayModeController::new(
            settings.clone(),
            Arc::clone(&control),
            layout.clone(),
        );
        let screensaver = ScreensaverHelper::load(&config).await?;
        let remote = LircRemote::connect().await?;

        // House keeping: recover rows stuck in PLAYING and start from a known
        // volume.
        playlist.clean_up_state().await?;
        settings.set(SETTING_VOLUME_PCT, "100").await?;

        Ok(Self {
            config,
            layout,
            config_path,
            playlist,
            settings,
            display,
            control,
            animator: Animator::new(),
            screensaver,
            remote,
            broadcast: None,
            last_animator_tick: Instant::now(),
            last_volume_publish: Instant::now() - VOLUME_REPUBLISH_PERIOD,
            channel_cursor: 0,
        })
    }

    /// The queue daemon loop. Never returns under normal operation.
    pub async fn run(&mut self) -> Result<()> {
        info!("Queue loop started");
        let mut ticker = interval(LOOP_PERIOD);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            if self.broadcast.is_some() {
                self.check_running_broadcast().await;
            }
            if self.broadcast.is_none() {
                self.maybe_start_next().await;
            }

            self.maybe_tick_animator().await;
            self.maybe_republish_volume().await;
            self.process_remote_input().await;
        }
    }

    /// Skip requests, screensaver preemption, and child exit.
    async fn check_running_broadcast(&mut self) {
        let current_item_id = match self.broadcast.as_ref() {
            Some(running) => running.item.as_ref().map(|item| item.id),
            None => return,
        };

        if let Some(id) = current_item_id {
            // a. A requested skip of the current item stops the broadcast.
            match self.playlist.should_skip(id).await {
                Ok(true) => {
                    info!(id, "Skip requested; stopping broadcast");
                    self.stop_broadcast(true).await;
                    return;
                }
                Ok(false) => {}
                Err(e) => warn!(error = %e, "Could not read skip flag"),
            }
        } else {
            // b. A screensaver yields as soon as real work arrives.
            match self.playlist.get_next().await {
                Ok(Some(_)) => {
                    info!("Queue no longer empty; stopping screensaver");
                    self.stop_broadcast(true).await;
                    return;
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Could not peek queue"),
            }
        }

        // c. The broadcast subprocess ended on its own.
        let exited = self
            .broadcast
            .as_mut()
            .is_some_and(|running| matches!(running.child.try_wait(), Ok(Some(_))));
        if exited {
            info!("Broadcast process is no longer running; ending playback");
            self.stop_broadcast(false).await;
        }
    }

    /// Start the next queued item, or a screensaver when idle.
    async fn maybe_start_next(&mut self) {
        let next = match self.playlist.get_next().await {
            Ok(next) => next,
            Err(e) => {
                warn!(error = %e, "Could not read queue head");
                return;
            }
        };

        if let Some(item) = next {
            // CAS QUEUED → PLAYING; losing the race (someone removed the
            // item) just means waiting for the next loop pass.
            match self.playlist.set_current(item.id).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(id = item.id, "Item vanished before playback; skipping");
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "Could not set current item");
                    return;
                }
            }
            let log_uuid = make_log_uuid();
            // Loading screens cover the download latency of regular videos;
            // channel videos must start instantly.
            let show_loading_screen = item.kind == ItemKind::Video;
            info!(id = item.id, url = %item.url, log_uuid = %log_uuid, "Starting broadcast");
            match self.spawn_broadcast(&item.url, &log_uuid, show_loading_screen) {
                Ok(child) => {
                    self.broadcast = Some(RunningBroadcast {
                        child,
                        item: Some(item),
                        log_uuid,
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to spawn broadcast; marking item done");
                    let _ = self.playlist.end_video(item.id).await;
                }
            }
            return;
        }

        // Idle wall: screensaver fallback.
        if let Some(screensaver) = self.screensaver.choose() {
            let url = match &screensaver {
                Screensaver::File(path) => path.display().to_string(),
                Screensaver::ChannelVideo(url) => url.clone(),
            };
            let log_uuid = make_log_uuid();
            info!(url = %url, "Queue idle; starting screensaver");
            match self.spawn_broadcast(&url, &log_uuid, false) {
                Ok(child) => {
                    self.broadcast = Some(RunningBroadcast {
                        child,
                        item: None,
                        log_uuid,
                    });
                }
                Err(e) => warn!(error = %e, "Failed to start screensaver"),
            }
        }
    }

    /// Playback runs in a separate `broadcast` process so that a wedged
    /// pipeline can be killed wholesale without touching the queue daemon.
    fn spawn_broadcast(
        &self,
        url: &str,
        log_uuid: &str,
        show_loading_screen: bool,
    ) -> Result<Child> {
        let exe = std::env::current_exe()?;
        let mut cmd = Command::new(exe);
        cmd.arg("broadcast")
            .args(["--url", url, "--log-uuid", log_uuid]);
        if !show_loading_screen {
            cmd.arg("--no-show-loading-screen");
        }
        if let Some(config_path) = &self.config_path {
            cmd.arg("--config").arg(config_path);
        }
        cmd.kill_on_drop(true);
        Ok(cmd.spawn()?)
    }

    /// Stop the running broadcast and settle the playlist row.
    ///
    /// Preemption law: when the stop was a skip, the playing item is a
    /// regular video, and the new queue head is a channel video, the regular
    /// video is reenqueued at the head instead of being marked done, so
    /// channel surfing cannot deplete the queue. Skipped channel videos are
    /// simply done.
    async fn stop_broadcast(&mut self, was_skipped: bool) {
        let Some(mut running) = self.broadcast.take() else {
            return;
        };

        let our_kill = match running.child.try_wait() {
            Ok(Some(_)) => false,
            _ => {
                // Plain SIGTERM: the broadcast process runs its own signal
                // housekeeping (kills its pipeline groups, tells receivers to
                // skip) and then re-raises.
                if let Some(pid) = running.child.id() {
                    terminate_process(pid as i32);
                }
                true
            }
        };
        match tokio::time::timeout(CHILD_KILL_WAIT, running.child.wait()).await {
            Ok(Ok(status)) => {
                use std::os::unix::process::ExitStatusExt;
                // Exit by our own SIGTERM is the expected skip path; the
                // comparison is on the signal, not a negated code.
                let killed_by_us = our_kill && status.signal() == Some(libc::SIGTERM);
                if !status.success() && !killed_by_us {
                    error!(%status, log_uuid = %running.log_uuid, "Broadcast exited abnormally");
                }
            }
            Ok(Err(e)) => warn!(error = %e, "Could not reap broadcast process"),
            Err(_) => {
                warn!("Broadcast ignored SIGTERM; killing");
                let _ = running.child.kill().await;
            }
        }

        if let Some(item) = running.item {
            let preempted_by_channel = was_skipped
                && item.kind == ItemKind::Video
                && matches!(
                    self.playlist.get_next().await,
                    Ok(Some(next)) if next.kind == ItemKind::ChannelVideo
                );
            let result = if preempted_by_channel {
                info!(id = item.id, "Reenqueueing video preempted by a channel video");
                self.playlist.reenqueue(item.id).await
            } else {
                self.playlist.end_video(item.id).await
            };
            if let Err(e) = result {
                warn!(error = %e, "Playlist bookkeeping failed");
            }
        }
    }

    async fn maybe_tick_animator(&mut self) {
        if self.last_animator_tick.elapsed() < ANIMATOR_PERIOD {
            return;
        }
        self.last_animator_tick = Instant::now();

        let mode = match self.display.animation_mode(false).await {
            Ok(mode) => mode,
            Err(e) => {
                debug!(error = %e, "Could not read animation mode");
                return;
            }
        };
        match self.animator.tick(mode, &self.layout) {
            Some(AnimatorStep::RepublishPersisted) => {
                if let Err(e) = self.display.republish_persisted().await {
                    debug!(error = %e, "Display-mode republish failed");
                }
            }
            Some(AnimatorStep::Apply { modes, persist }) => {
                if let Err(e) = self.display.set_display_modes(&modes, persist).await {
                    debug!(error = %e, "Animation frame publish failed");
                }
            }
            None => {}
        }
    }

    /// Receivers converge on volume through periodic republish, so a lost
    /// volume datagram heals within a couple of seconds.
    async fn maybe_republish_volume(&mut self) {
        if self.last_volume_publish.elapsed() < VOLUME_REPUBLISH_PERIOD {
            return;
        }
        self.last_volume_publish = Instant::now();

        match self.current_volume_pct().await {
            Ok(vol_pct) => {
                if let Err(e) = self.control.send(&ControlMessage::Volume(vol_pct)).await {
                    debug!(error = %e, "Volume republish failed");
                }
            }
            Err(e) => debug!(error = %e, "Could not read volume setting"),
        }
    }

    async fn process_remote_input(&mut self) {
        let Some(remote) = self.remote.as_mut() else {
            return;
        };
        let deadline = Instant::now() + REMOTE_BUDGET;
        let mut events = Vec::new();
        while Instant::now() < deadline {
            match remote.poll() {
                Some(event) => events.push(event),
                None => break,
            }
        }
        for event in events {
            if let Err(e) = self.handle_remote_event(event).await {
                warn!(error = %e, "Remote event handling failed");
            }
        }
    }

    async fn handle_remote_event(&mut self, event: RemoteEvent) -> Result<()> {
        match event {
            RemoteEvent::Mute => self.set_volume(0.0).await?,
            RemoteEvent::VolumeUp => {
                let vol = self.current_volume_pct().await?;
                self.set_volume(vol + VOLUME_INCREMENT).await?;
            }
            RemoteEvent::VolumeDown => {
                let vol = self.current_volume_pct().await?;
                self.set_volume(vol - VOLUME_INCREMENT).await?;
            }
            RemoteEvent::ToggleTv(digit) => {
                let tv_ids = self.layout.tv_ids();
                if tv_ids.is_empty() {
                    return Ok(());
                }
                let tv_id = tv_ids[digit as usize % tv_ids.len()].clone();
                info!(tv = %tv_id, "Remote display-mode toggle");
                self.display.toggle_display_modes(&[tv_id]).await?;
            }
            RemoteEvent::Channel => self.surf_channel().await?,
        }
        Ok(())
    }

    /// Channel surfing: enqueue the next configured channel video at maximum
    /// priority and request a skip of whatever is playing, triggering the
    /// preemption path.
    async fn surf_channel(&mut self) -> Result<()> {
        if self.config.channel_videos.is_empty() {
            debug!("No channel videos configured");
            return Ok(());
        }
        let channel = &self.config.channel_videos[self.channel_cursor % self.config.channel_videos.len()];
        self.channel_cursor = self.channel_cursor.wrapping_add(1);

        info!(url = %channel.url, "Channel video requested");
        self.playlist
            .enqueue(
                &EnqueueRequest {
                    url: channel.url.clone(),
                    title: channel.title.clone(),
                    ..EnqueueRequest::default()
                },
                ItemKind::ChannelVideo,
            )
            .await?;

        let playing_item_id = self
            .broadcast
            .as_ref()
            .map(|running| running.item.as_ref().map(|item| item.id));
        match playing_item_id {
            Some(Some(id)) => {
                self.playlist.skip(id).await?;
            }
            Some(None) => {
                // Screensaver: stop it directly, no playlist row to skip.
                self.stop_broadcast(true).await;
            }
            None => {}
        }
        Ok(())
    }

    async fn current_volume_pct(&self) -> Result<f64> {
        let raw = self.settings.get(SETTING_VOLUME_PCT, "100").await?;
        Ok(raw.parse().unwrap_or(100.0))
    }

    async fn set_volume(&mut self, vol_pct: f64) -> Result<()> {
        let vol_pct = wallcast_core::volume::normalize_pct(vol_pct);
        self.settings
            .set(SETTING_VOLUME_PCT, &format!("{vol_pct:.1}"))
            .await?;
        self.control.send(&ControlMessage::Volume(vol_pct)).await?;
        self.last_volume_publish = Instant::now();
        Ok(())
    }
}

/// Plain SIGTERM to one process.
#[allow(unsafe_code)]
fn terminate_process(pid: i32) {
    if pid > 0 {
        // SAFETY: plain syscall; no memory is touched.
        unsafe {
            libc::kill(pid, libc::SIGTERM);
        }
    }
}
