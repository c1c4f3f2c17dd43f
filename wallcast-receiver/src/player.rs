//! Media-player child processes and their IPC control shim.
//!
//! Each TV gets its own player process, remote-controlled over a per-handle
//! JSON IPC unix socket (mpv's `--input-ipc-server` protocol). A dual-output
//! receiver runs up to four handles at once: a video player and a loading
//! screen player per TV.
//!
//! IPC calls are bounded by a short timeout so a hung player can never stall
//! the receive loop. Volume and crop pushes run as background tasks capped at
//! one in-flight request per handle: under a flood of control messages the
//! excess is dropped with a warning rather than queued.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use wallcast_core::geometry::CropRect;
use wallcast_core::volume::player_volume_fraction;

use crate::{ReceiverError, Result};

/// Bound on any single IPC round trip. Matches the `timeout --kill-after`
/// wrapper the player commands used to run under.
const IPC_TIMEOUT: Duration = Duration::from_secs(2);

/// How long to wait for a killed player group to reap before giving up.
const KILL_WAIT: Duration = Duration::from_secs(5);

const PLAYER_BIN: &str = "mpv";

/// Where a player reads its media from.
#[derive(Debug, Clone)]
pub enum PlayerSource {
    /// The multicast video stream, piped in through stdin.
    Stdin,
    /// A local file (loading screens, warm-up clip).
    File(PathBuf),
}

/// Everything needed to spawn one player process.
#[derive(Debug, Clone)]
pub struct PlayerSpec {
    /// Stable handle name, e.g. `tv1.video` or `tv2.loading`. Also names the
    /// IPC socket.
    pub handle_name: String,
    pub audio_device: String,
    /// DRM connector the video goes out on; empty means player default.
    pub video_connector: String,
    pub orientation: u32,
    pub crop: CropRect,
    pub volume_mb: i64,
    /// Spawn paused; the broadcaster's play signal unpauses.
    pub start_paused: bool,
    pub source: PlayerSource,
}

/// Cloneable IPC endpoint for one player, safe to hand to background tasks.
#[derive(Debug, Clone)]
struct PlayerIpc {
    name: String,
    path: PathBuf,
    volume_slot: Arc<Semaphore>,
    crop_slot: Arc<Semaphore>,
}

impl PlayerIpc {
    /// One JSON IPC round trip, bounded by [`IPC_TIMEOUT`]. A fresh
    /// connection per call keeps a wedged previous call from poisoning the
    /// socket.
    async fn command(&self, command: Value) -> Result<()> {
        let payload = serde_json::to_vec(&json!({ "command": command }))
            .map_err(|e| ReceiverError::Player(e.to_string()))?;
        let path = self.path.clone();
        let name = self.name.clone();

        tokio::time::timeout(IPC_TIMEOUT, async move {
            let mut stream = UnixStream::connect(&path).await?;
            stream.write_all(&payload).await?;
            stream.write_all(b"\n").await?;
            stream.flush().await?;

            let mut line = String::new();
            let mut reader = BufReader::new(stream);
            reader.read_line(&mut line).await?;
            debug!(handle = %name, response = line.trim(), "Player IPC reply");
            Ok::<_, std::io::Error>(())
        })
        .await
        .map_err(|_| ReceiverError::Player(format!("IPC timeout on {}", self.name)))?
        .map_err(|e| ReceiverError::Player(format!("IPC error on {}: {e}", self.name)))
    }
}

/// A running player process plus its control socket.
#[derive(Debug)]
pub struct PlayerHandle {
    ipc: PlayerIpc,
    child: Child,
    pgid: i32,
    stdin: Option<ChildStdin>,
}

impl PlayerHandle {
    pub fn spawn(spec: &PlayerSpec) -> Result<Self> {
        let ipc_path = ipc_socket_path(&spec.handle_name);
        // A stale socket from a dead player would confuse the new one.
        let _ = std::fs::remove_file(&ipc_path);

        let mut cmd = Command::new(PLAYER_BIN);
        cmd.arg("--really-quiet")
            .arg("--no-terminal")
            .arg(format!("--input-ipc-server={}", ipc_path.display()))
            .arg(format!("--audio-device={}", spec.audio_device))
            .arg(format!("--video-rotate={}", spec.orientation))
            .arg(format!("--volume={:.2}", volume_arg(spec.volume_mb)))
            .arg(format!("--video-crop={}", crop_arg(&spec.crop)));
        if !spec.video_connector.is_empty() {
            cmd.arg(format!("--drm-connector={}", spec.video_connector));
        }
        if spec.start_paused {
            cmd.arg("--pause");
        }
        match &spec.source {
            PlayerSource::Stdin => {
                cmd.arg("-").stdin(Stdio::piped());
            }
            PlayerSource::File(path) => {
                cmd.arg(path).stdin(Stdio::null());
            }
        }
        // Own process group, so the whole player tree dies on one killpg.
        cmd.process_group(0);
        cmd.kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| ReceiverError::Player(format!("spawning {PLAYER_BIN}: {e}")))?;
        let pgid = child.id().map(|id| id as i32).unwrap_or(0);
        let stdin = child.stdin.take();

        debug!(handle = %spec.handle_name, pgid, "Spawned media player");
        Ok(Self {
            ipc: PlayerIpc {
                name: spec.handle_name.clone(),
                path: ipc_path,
                volume_slot: Arc::new(Semaphore::new(1)),
                crop_slot: Arc::new(Semaphore::new(1)),
            },
            child,
            pgid,
            stdin,
        })
    }

    pub fn name(&self) -> &str {
        &self.ipc.name
    }

    /// Hand the stdin pipe to the video ingest task. Only valid once.
    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.stdin.take()
    }

    /// Whether the child already exited.
    pub fn has_exited(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)))
    }

    /// Unpause. This is the playback start-sync path, so it is awaited rather
    /// than queued.
    pub async fn set_pause(&self, paused: bool) -> Result<()> {
        self.ipc.command(json!(["set_property", "pause", paused])).await
    }

    /// Apply a millibel volume level in the background. At most one in-flight
    /// volume adjustment per handle; excess commands are dropped.
    pub fn push_volume(&self, volume_mb: i64) {
        let Ok(permit) = self.ipc.volume_slot.clone().try_acquire_owned() else {
            warn!(handle = %self.name(), "Dropping volume command; one is already in flight");
            return;
        };
        let ipc = self.ipc.clone();
        tokio::spawn(async move {
            let _permit = permit;
            if let Err(e) = ipc
                .command(json!(["set_property", "volume", volume_arg(volume_mb)]))
                .await
            {
                debug!(handle = %ipc.name, error = %e, "Failed to set player volume");
            }
        });
    }

    /// Push a new crop window in the background. Same one-in-flight cap as
    /// volume.
    pub fn push_crop(&self, crop: CropRect) {
        let Ok(permit) = self.ipc.crop_slot.clone().try_acquire_owned() else {
            warn!(handle = %self.name(), "Dropping crop command; one is already in flight");
            return;
        };
        let ipc = self.ipc.clone();
        tokio::spawn(async move {
            let _permit = permit;
            if let Err(e) = ipc
                .command(json!(["set_property", "video-crop", crop_arg(&crop)]))
                .await
            {
                debug!(handle = %ipc.name, error = %e, "Failed to set player crop");
            }
        });
    }

    /// Terminate the player's whole process group and reap it.
    pub async fn kill(mut self) {
        terminate_group(self.pgid);
        match tokio::time::timeout(KILL_WAIT, self.child.wait()).await {
            Ok(Ok(status)) => debug!(handle = %self.ipc.name, %status, "Player terminated"),
            Ok(Err(e)) => warn!(handle = %self.ipc.name, error = %e, "Failed reaping player"),
            Err(_) => {
                warn!(handle = %self.ipc.name, "Player ignored SIGTERM; killing");
                let _ = self.child.kill().await;
            }
        }
        let _ = std::fs::remove_file(&self.ipc.path);
    }
}

/// SIGTERM an entire process group.
#[allow(unsafe_code)]
pub(crate) fn terminate_group(pgid: i32) {
    if pgid > 0 {
        // SAFETY: plain syscall on a pgid we own; no memory is touched.
        unsafe {
            libc::killpg(pgid, libc::SIGTERM);
        }
    }
}

/// mpv takes crops as `WxH+X+Y`.
fn crop_arg(crop: &CropRect) -> String {
    format!(
        "{}x{}+{}+{}",
        crop.width(),
        crop.height(),
        crop.x0,
        crop.y0
    )
}

/// mpv's volume property is a percentage of its linear scale.
fn volume_arg(volume_mb: i64) -> f64 {
    player_volume_fraction(volume_mb) * 100.0
}

fn ipc_socket_path(handle_name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("wallcast-player.{handle_name}.sock"))
}

/// Play a short silent clip once so the player stack initializes its output
/// devices before the first real video, which would otherwise start late.
pub async fn warm_up() {
    let mut cmd = Command::new(PLAYER_BIN);
    cmd.arg("--really-quiet")
        .arg("--no-terminal")
        .arg("--vo=null")
        .arg("--end=0.2")
        .arg("av://lavfi:anullsrc")
        .stdin(Stdio::null());
    cmd.process_group(0);

    match cmd.spawn() {
        Ok(mut child) => {
            match tokio::time::timeout(Duration::from_secs(10), child.wait()).await {
                Ok(_) => debug!("Player warm-up complete"),
                Err(_) => {
                    warn!("Player warm-up timed out; killing");
                    let _ = child.kill().await;
                }
            }
        }
        Err(e) => warn!(error = %e, "Player warm-up failed to spawn"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crop_arg_is_w_h_x_y() {
        let crop = CropRect { x0: 240, y0: 0, x1: 960, y1: 540 };
        assert_eq!(crop_arg(&crop), "720x540+240+0");
    }

    #[test]
    fn volume_arg_tracks_the_player_curve() {
        assert!((volume_arg(0) - 100.0).abs() < 1e-9);
        assert!((volume_arg(-2000) - 10.0).abs() < 1e-9);
        assert!(volume_arg(wallcast_core::volume::GLOBAL_MIN_VOL_MB) < 1.0);
    }

    #[test]
    fn ipc_paths_are_distinct_per_handle() {
        assert_ne!(ipc_socket_path("tv1.video"), ipc_socket_path("tv1.loading"));
        assert_ne!(ipc_socket_path("tv1.video"), ipc_socket_path("tv2.video"));
    }

    #[tokio::test]
    async fn volume_pushes_are_capped_at_one_in_flight() {
        // No player is listening on the socket, so the first push holds its
        // permit until the connect fails; a second immediate push must be
        // dropped rather than queued.
        let ipc = PlayerIpc {
            name: "test".to_string(),
            path: ipc_socket_path("does-not-exist"),
            volume_slot: Arc::new(Semaphore::new(1)),
            crop_slot: Arc::new(Semaphore::new(1)),
        };
        let first = ipc.volume_slot.clone().try_acquire_owned();
        assert!(first.is_ok());
        assert!(ipc.volume_slot.clone().try_acquire_owned().is_err());
        drop(first);
        assert!(ipc.volume_slot.clone().try_acquire_owned().is_ok());
    }
}
