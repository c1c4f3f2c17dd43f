//! The video broadcast pipeline.
//!
//! A broadcast is two cooperating child-process pipelines joined by an
//! in-process buffered pipe, plus a side FIFO for early dimension discovery:
//!
//! ```text
//! [A: download + mux to MPEG-TS] ──buffered pipe──▶ [B: pace + tee]
//!               │                                        ├─▶ EOF detector (ffmpeg -re → null, touches sentinel file)
//!               └── tee ─▶ ffprobe ─▶ dims FIFO          └─▶ multicast sender (burst + rate limited)
//! ```
//!
//! Pipeline A downloads video and audio as two independent streams through
//! in-memory buffers that absorb transient network stalls, and muxes them
//! into MPEG-TS on stdout. A tee of that output feeds ffprobe, which writes
//! `width,height` to a FIFO as soon as the first frames are decodable.
//!
//! Pipeline B consumes A's output paced to a fixed byte rate so a local file
//! can never saturate the LAN and starve the control channel, duplicating it
//! into a rate-limited local sink used solely to detect end of playback, and
//! into the multicast sender, which appends the end-of-video sentinel as the
//! final datagram.
//!
//! Every child runs in its own process group so teardown is one killpg per
//! pipeline.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use wallcast_core::config::{Config, WallLayout};
use wallcast_net::{pin_multicast_route, ControlSender, MulticastSender};
use wallcast_proto::{ControlMessage, END_OF_VIDEO_MAGIC_BYTES};

use crate::throttle::{BurstThrottler, FALLBACK_BYTES_PER_SEC};
use crate::{BroadcastError, Result};

/// In-memory buffer absorbing video download stalls (~139 s of 1080p avc1).
const VIDEO_DOWNLOAD_BUFFER: usize = 50 * 1024 * 1024;
/// Audio runs much thinner.
const AUDIO_DOWNLOAD_BUFFER: usize = 5 * 1024 * 1024;
/// Buffer in front of the EOF-detector sink so its real-time pacing never
/// backpressures the multicast send.
const EOF_DETECTOR_BUFFER: usize = 200 * 1024 * 1024;
/// The in-process pipe joining pipeline A to pipeline B.
const JOIN_PIPE_BUFFER: usize = 16 * 1024 * 1024;

const READ_CHUNK: usize = 32 * 1024;

/// Seven TS packets per datagram, the usual MPEG-TS-over-UDP alignment.
const VIDEO_DATAGRAM_BYTES: usize = 7 * 188;

/// Empirical pause between INIT_VIDEO and starting the stream, long enough
/// for every receiver to spawn its paused players.
const RECEIVER_INIT_SLEEP: Duration = Duration::from_secs(2);

/// Settle time after the EOF sentinel file appears.
const END_SETTLE_SLEEP: Duration = Duration::from_secs(1);

const DIMENSION_PROBE_TIMEOUT: Duration = Duration::from_secs(60);

/// Transient downloader failures get one retry after updating the downloader.
const MAX_ATTEMPTS: u32 = 2;

const DOWNLOADER_BIN: &str = "yt-dlp";

/// Process groups spawned by a broadcast, shared with the signal-housekeeping
/// path so a dying broadcaster can kill the whole tree.
pub type GroupRegistry = Arc<Mutex<Vec<i32>>>;

#[derive(Debug, Clone)]
pub struct BroadcastOptions {
    pub url: String,
    pub log_uuid: String,
    pub show_loading_screen: bool,
}

pub struct VideoBroadcast {
    config: Config,
    layout: WallLayout,
    control: Arc<ControlSender>,
    options: BroadcastOptions,
    work_dir: PathBuf,
    groups: GroupRegistry,
}

impl VideoBroadcast {
    pub fn new(
        config: Config,
        control: Arc<ControlSender>,
        options: BroadcastOptions,
    ) -> Result<Self> {
        let layout = config.layout()?;
        let work_dir = std::env::temp_dir().join(format!("wallcast-broadcast.{}", options.log_uuid));
        Ok(Self {
            config,
            layout,
            control,
            options,
            work_dir,
            groups: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// The process groups this broadcast has spawned, for signal housekeeping.
    pub fn group_registry(&self) -> GroupRegistry {
        Arc::clone(&self.groups)
    }

    /// Paths that housekeeping must delete on abnormal exit.
    pub fn scratch_paths(&self) -> Vec<PathBuf> {
        vec![self.work_dir.clone()]
    }

    /// Run the full broadcast to completion. Retries once after a downloader
    /// failure, updating the downloader in between.
    pub async fn broadcast(&mut self) -> Result<()> {
        info!(url = %self.options.url, "Starting broadcast");

        // Multicast must leave on the wired interface; wifi drops too much.
        if let Err(e) = pin_multicast_route(
            self.config.multicast.group,
            &self.config.multicast.interface,
        )
        .await
        {
            warn!(error = %e, "Could not pin multicast route; continuing");
        }

        let mut attempt = 1;
        loop {
            match self.broadcast_once().await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < MAX_ATTEMPTS && is_retryable(&e) => {
                    warn!(attempt, error = %e, "Broadcast attempt failed; updating downloader and retrying");
                    update_downloader().await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn broadcast_once(&mut self) -> Result<()> {
        tokio::fs::create_dir_all(&self.work_dir).await?;
        let dims_fifo = self.work_dir.join("dimensions.fifo");
        let sentinel_path = self.work_dir.join("playback_done");
        let result = self.broadcast_inner(&dims_fifo, &sentinel_path).await;
        self.cleanup().await;
        result
    }

    async fn broadcast_inner(&mut self, dims_fifo: &Path, sentinel_path: &Path) -> Result<()> {
        make_fifo(dims_fifo)?;

        if self.options.show_loading_screen {
            let helper =
                crate::loading_screen::LoadingScreenHelper::load(&self.config, &self.work_dir)
                    .await?;
            helper
                .send_loading_screen_signal(&self.control, &self.options.log_uuid)
                .await?;
        }

        // 1. Pipeline A: download/convert, with the dimension probe teed off.
        let mut pipeline_a = self.start_download_pipeline(dims_fifo).await?;

        // 2. Block on the FIFO until the probe has decodable frames.
        let (width, height) = read_dimensions(dims_fifo).await?;
        info!(width, height, "Probed video dimensions");

        check_resolution(&self.layout, height)?;

        // 3. Receivers spawn their players paused.
        self.control
            .send(&ControlMessage::InitVideo {
                log_uuid: self.options.log_uuid.clone(),
                video_width: width,
                video_height: height,
            })
            .await?;

        // 4. Give every receiver time to initialize before bytes flow.
        tokio::time::sleep(RECEIVER_INIT_SLEEP).await;

        // 5. Pipeline B: paced tee into the EOF detector and the multicast
        // sender.
        let join_pipe = pipeline_a
            .output
            .take()
            .ok_or_else(|| BroadcastError::Pipeline("pipeline A had no output".to_string()))?;
        let pipeline_b = self
            .start_broadcast_pipeline(join_pipe, sentinel_path, pipeline_a.target_byte_rate)
            .await?;

        // 6. Unpause all receivers near-simultaneously.
        if self.options.show_loading_screen {
            self.control.send(&ControlMessage::EndLoadingScreen).await?;
        }
        self.control.send(&ControlMessage::PlayVideo).await?;
        info!("Playback started; waiting for stream end");

        // 7. Pipeline A drains first.
        pipeline_a.wait().await?;
        debug!("Download pipeline finished");

        // 8. Pipeline B finishes when the local sink hits EOF and the last
        // datagram (the sentinel) is out.
        pipeline_b.wait().await?;
        if !sentinel_path.exists() {
            warn!("Playback-done sentinel file never appeared");
        }
        tokio::time::sleep(END_SETTLE_SLEEP).await;
        info!("Broadcast complete");
        Ok(())
    }

    /// Pipeline A. Remote sources: two downloader children (video, audio)
    /// pumped through in-memory buffers into FIFOs that ffmpeg muxes into
    /// MPEG-TS. Local files: ffmpeg reads the file directly. Either way the
    /// MPEG-TS output is teed into the dimension probe.
    async fn start_download_pipeline(&mut self, dims_fifo: &Path) -> Result<DownloadPipeline> {
        let url = &self.options.url;
        let mut children = Vec::new();
        let mut tasks = Vec::new();
        let mut target_byte_rate = None;

        let mut mux = if is_remote_url(url) {
            let video_fifo = self.work_dir.join("video.fifo");
            let audio_fifo = self.work_dir.join("audio.fifo");
            make_fifo(&video_fifo)?;
            make_fifo(&audio_fifo)?;

            // Two independent downloads; each buffer rides out reconnects.
            let video_format = format!(
                "bestvideo[vcodec^=avc1][height<={}]",
                self.layout.max_video_height()
            );
            let mut video_dl = spawn_in_group(
                Command::new(DOWNLOADER_BIN)
                    .args(["--quiet", "--retries", "infinite", "-f", &video_format, "-o", "-"])
                    .arg(url)
                    .stdout(Stdio::piped()),
                &self.groups,
            )?;
            let mut audio_dl = spawn_in_group(
                Command::new(DOWNLOADER_BIN)
                    .args(["--quiet", "--retries", "infinite", "-f", "bestaudio", "-o", "-"])
                    .arg(url)
                    .stdout(Stdio::piped()),
                &self.groups,
            )?;

            let video_out = video_dl
                .stdout
                .take()
                .ok_or_else(|| BroadcastError::Pipeline("video downloader has no stdout".into()))?;
            let audio_out = audio_dl
                .stdout
                .take()
                .ok_or_else(|| BroadcastError::Pipeline("audio downloader has no stdout".into()))?;
            tasks.push(tokio::spawn(pump_to_fifo(
                video_out,
                video_fifo.clone(),
                VIDEO_DOWNLOAD_BUFFER,
            )));
            tasks.push(tokio::spawn(pump_to_fifo(
                audio_out,
                audio_fifo.clone(),
                AUDIO_DOWNLOAD_BUFFER,
            )));
            children.push(video_dl);
            children.push(audio_dl);

            spawn_in_group(
                Command::new("ffmpeg")
                    .args(["-hide_banner", "-loglevel", "error"])
                    .arg("-i")
                    .arg(&video_fifo)
                    .arg("-i")
                    .arg(&audio_fifo)
                    .args(["-c:v", "copy", "-c:a", "mp2", "-b:a", "192k", "-f", "mpegts", "pipe:1"])
                    .stdout(Stdio::piped()),
                &self.groups,
            )?
        } else {
            // Local file: known size and duration give the send throttler a
            // real target byte rate.
            let path = PathBuf::from(url);
            if let (Ok(meta), Ok(probe)) = (
                tokio::fs::metadata(&path).await,
                crate::ffprobe::video_metadata(&path, &["duration"]).await,
            ) {
                if let Some(duration) = probe.get("duration").and_then(|d| d.parse::<f64>().ok()) {
                    if duration > 0.0 {
                        target_byte_rate = Some(meta.len() as f64 / duration);
                    }
                }
            }

            spawn_in_group(
                Command::new("ffmpeg")
                    .args(["-hide_banner", "-loglevel", "error"])
                    .arg("-i")
                    .arg(&path)
                    .args(["-c:v", "copy", "-c:a", "copy", "-f", "mpegts", "pipe:1"])
                    .stdout(Stdio::piped()),
                &self.groups,
            )?
        };

        // Dimension probe: tee the muxed stream into ffprobe, whose stdout is
        // redirected to the FIFO. Opening the FIFO O_RDWR never blocks and
        // keeps the read end from seeing EOF before the line arrives.
        let fifo_write = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(dims_fifo)?;
        let mut probe = spawn_in_group(
            Command::new("ffprobe")
                .args([
                    "-hide_banner",
                    "-v",
                    "0",
                    "-of",
                    "csv=p=0",
                    "-select_streams",
                    "v:0",
                    "-show_entries",
                    "stream=width,height",
                    "pipe:0",
                ])
                .stdin(Stdio::piped())
                .stdout(Stdio::from(fifo_write)),
            &self.groups,
        )?;

        let mux_out = mux
            .stdout
            .take()
            .ok_or_else(|| BroadcastError::Pipeline("mux has no stdout".into()))?;
        let probe_in = probe.stdin.take();
        children.push(probe);

        let (tx, rx) = byte_channel(JOIN_PIPE_BUFFER);
        tasks.push(tokio::spawn(tee_mux_output(mux_out, probe_in, tx)));

        children.insert(0, mux);
        Ok(DownloadPipeline {
            children,
            tasks,
            output: Some(rx),
            target_byte_rate,
        })
    }

    /// Pipeline B: paced consumption of A's output, teed into the buffered
    /// EOF-detector sink and the throttled multicast sender.
    async fn start_broadcast_pipeline(
        &mut self,
        mut input: mpsc::Receiver<Bytes>,
        sentinel_path: &Path,
        target_byte_rate: Option<f64>,
    ) -> Result<BroadcastPipeline> {
        // Local sink: ffmpeg with real-time pacing reading to null. Its exit
        // marks end of playback; it exists for nothing else.
        let mut detector = spawn_in_group(
            Command::new("ffmpeg")
                .args([
                    "-hide_banner",
                    "-loglevel",
                    "error",
                    "-re",
                    "-i",
                    "pipe:0",
                    "-f",
                    "null",
                    "-",
                ])
                .stdin(Stdio::piped()),
            &self.groups,
        )?;
        let mut detector_in = detector
            .stdin
            .take()
            .ok_or_else(|| BroadcastError::Pipeline("detector has no stdin".into()))?;
        let (detector_tx, mut detector_rx) = byte_channel(EOF_DETECTOR_BUFFER);
        let detector_writer = tokio::spawn(async move {
            while let Some(chunk) = detector_rx.recv().await {
                if detector_in.write_all(&chunk).await.is_err() {
                    break;
                }
            }
            let _ = detector_in.shutdown().await;
        });

        let sentinel = sentinel_path.to_path_buf();
        let detector_waiter = tokio::spawn(async move {
            match detector.wait().await {
                Ok(status) => debug!(%status, "EOF detector exited"),
                Err(e) => warn!(error = %e, "EOF detector wait failed"),
            }
            if let Err(e) = tokio::fs::write(&sentinel, b"").await {
                warn!(error = %e, "Could not touch playback-done sentinel");
            }
        });

        let sender = MulticastSender::new(self.config.multicast.group)?;
        let video_port = self.config.multicast.video_port;
        let send_task = tokio::spawn(async move {
            // Input pacing: pipeline B as a whole is capped so a fast local
            // source cannot flood the LAN. The multicast sender additionally
            // bursts, then holds the video's own byte rate.
            let mut input_pace = BurstThrottler::with_limits(0, Some(FALLBACK_BYTES_PER_SEC));
            let mut send_pace = BurstThrottler::new(target_byte_rate);
            let mut carry: Vec<u8> = Vec::with_capacity(VIDEO_DATAGRAM_BYTES);

            while let Some(chunk) = input.recv().await {
                let wait = input_pace.pace(chunk.len(), Instant::now());
                if !wait.is_zero() {
                    tokio::time::sleep(wait).await;
                }
                let _ = detector_tx.send(chunk.clone()).await;

                carry.extend_from_slice(&chunk);
                let mut offset = 0;
                while carry.len() - offset >= VIDEO_DATAGRAM_BYTES {
                    let datagram = &carry[offset..offset + VIDEO_DATAGRAM_BYTES];
                    let wait = send_pace.pace(datagram.len(), Instant::now());
                    if !wait.is_zero() {
                        tokio::time::sleep(wait).await;
                    }
                    if let Err(e) = sender.send(datagram, video_port).await {
                        warn!(error = %e, "Multicast send failed");
                    }
                    offset += VIDEO_DATAGRAM_BYTES;
                }
                carry.drain(..offset);
            }

            // Flush the tail, then terminate the stream in-band: the sentinel
            // travels as the final datagram so receivers see it in order.
            if !carry.is_empty() {
                if let Err(e) = sender.send(&carry, video_port).await {
                    warn!(error = %e, "Multicast tail send failed");
                }
            }
            drop(detector_tx);
            if let Err(e) = sender.send(END_OF_VIDEO_MAGIC_BYTES, video_port).await {
                warn!(error = %e, "Failed to send end-of-video sentinel");
            }
            info!("Sent end-of-video sentinel");
        });

        Ok(BroadcastPipeline {
            tasks: vec![send_task, detector_writer, detector_waiter],
        })
    }

    async fn cleanup(&mut self) {
        let groups: Vec<i32> = std::mem::take(&mut *self.groups.lock());
        for pgid in groups {
            terminate_group(pgid);
        }
        if let Err(e) = tokio::fs::remove_dir_all(&self.work_dir).await {
            debug!(error = %e, "Work dir cleanup");
        }
    }
}

struct DownloadPipeline {
    children: Vec<Child>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
    output: Option<mpsc::Receiver<Bytes>>,
    target_byte_rate: Option<f64>,
}

impl DownloadPipeline {
    /// Wait for the mux (the pipeline's spine) to exit. Exit-by-our-SIGTERM
    /// counts as success; any other non-zero exit is a pipeline failure.
    async fn wait(&mut self) -> Result<()> {
        let mux = self
            .children
            .first_mut()
            .ok_or_else(|| BroadcastError::Pipeline("pipeline already reaped".into()))?;
        let status = mux.wait().await?;
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        check_exit("download pipeline", status)
    }
}

struct BroadcastPipeline {
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl BroadcastPipeline {
    async fn wait(self) -> Result<()> {
        for task in self.tasks {
            let _ = task.await;
        }
        Ok(())
    }
}

/// Spawn a child in its own session-like process group and register the group
/// for teardown.
fn spawn_in_group(cmd: &mut Command, groups: &GroupRegistry) -> Result<Child> {
    cmd.process_group(0);
    cmd.kill_on_drop(true);
    let child = cmd.spawn()?;
    if let Some(pid) = child.id() {
        groups.lock().push(pid as i32);
    }
    Ok(child)
}

/// SIGTERM a whole process group.
#[allow(unsafe_code)]
pub fn terminate_group(pgid: i32) {
    if pgid > 0 {
        // SAFETY: plain syscall on a pgid we spawned; no memory is touched.
        unsafe {
            libc::killpg(pgid, libc::SIGTERM);
        }
    }
}

#[allow(unsafe_code)]
fn make_fifo(path: &Path) -> Result<()> {
    use std::os::unix::ffi::OsStrExt;
    let cpath = std::ffi::CString::new(path.as_os_str().as_bytes())
        .map_err(|_| BroadcastError::Pipeline(format!("Bad FIFO path: {}", path.display())))?;
    // SAFETY: cpath is a valid NUL-terminated path for the duration of the call.
    let rc = unsafe { libc::mkfifo(cpath.as_ptr(), 0o644) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.kind() != std::io::ErrorKind::AlreadyExists {
            return Err(err.into());
        }
    }
    Ok(())
}

/// A bounded pipe of byte chunks; capacity approximates the byte budget since
/// producers write [`READ_CHUNK`]-sized chunks.
fn byte_channel(budget_bytes: usize) -> (mpsc::Sender<Bytes>, mpsc::Receiver<Bytes>) {
    mpsc::channel(std::cmp::max(1, budget_bytes / READ_CHUNK))
}

/// Copy a child's stdout into a FIFO through an in-memory buffer, so a
/// stalled reader never blocks the download and a stalled download drains
/// the buffer instead of the reader.
async fn pump_to_fifo(mut src: ChildStdout, fifo: PathBuf, budget: usize) {
    let (tx, mut rx) = byte_channel(budget);
    let reader = tokio::spawn(async move {
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            match src.read(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(n) => {
                    if tx.send(Bytes::copy_from_slice(&buf[..n])).await.is_err() {
                        return;
                    }
                }
            }
        }
    });

    // Opening a FIFO write-only blocks until the muxer opens the read end.
    let fifo_file = tokio::fs::OpenOptions::new().write(true).open(&fifo).await;
    match fifo_file {
        Ok(mut fifo_file) => {
            while let Some(chunk) = rx.recv().await {
                if fifo_file.write_all(&chunk).await.is_err() {
                    break;
                }
            }
            let _ = fifo_file.shutdown().await;
        }
        Err(e) => warn!(fifo = %fifo.display(), error = %e, "Could not open FIFO for writing"),
    }
    let _ = reader.await;
}

/// Pipeline A's tee: every chunk of muxed output goes to pipeline B's pipe
/// and, until the probe exits, to ffprobe's stdin.
async fn tee_mux_output(
    mut src: ChildStdout,
    mut probe_in: Option<tokio::process::ChildStdin>,
    tx: mpsc::Sender<Bytes>,
) {
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match src.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let chunk = Bytes::copy_from_slice(&buf[..n]);
                if let Some(stdin) = probe_in.as_mut() {
                    if stdin.write_all(&chunk).await.is_err() {
                        // Probe got what it needed and exited.
                        probe_in = None;
                    }
                }
                if tx.send(chunk).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Open the dimensions FIFO and read the probe's `width,height` line.
async fn read_dimensions(fifo: &Path) -> Result<(i64, i64)> {
    let fifo = fifo.to_path_buf();
    let line = tokio::time::timeout(
        DIMENSION_PROBE_TIMEOUT,
        tokio::task::spawn_blocking(move || -> std::io::Result<String> {
            use std::io::BufRead;
            let file = std::fs::File::open(&fifo)?;
            let mut line = String::new();
            std::io::BufReader::new(file).read_line(&mut line)?;
            Ok(line)
        }),
    )
    .await
    .map_err(|_| BroadcastError::Probe("Timed out waiting for video dimensions".into()))?
    .map_err(|e| BroadcastError::Probe(format!("Dimension probe task failed: {e}")))??;

    crate::ffprobe::parse_dimensions(&line)
}

fn is_remote_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Dual-output receivers decode two streams at once and cap out at 720p per
/// output; a taller video must refuse to start rather than stutter.
fn check_resolution(layout: &WallLayout, height: i64) -> Result<()> {
    if layout.is_any_dual_output && height > 720 {
        return Err(BroadcastError::UnsupportedResolution { height, max: 720 });
    }
    Ok(())
}

/// SIGTERM from our own teardown is expected; the comparison is against the
/// signal number, not a negated exit code.
fn check_exit(what: &str, status: std::process::ExitStatus) -> Result<()> {
    use std::os::unix::process::ExitStatusExt;
    if status.success() || status.signal() == Some(libc::SIGTERM) {
        return Ok(());
    }
    Err(BroadcastError::Pipeline(format!(
        "{what} exited with {status}"
    )))
}

/// Downloader failures are worth one retry after a self-update; resolution
/// caps and config errors are not.
fn is_retryable(e: &BroadcastError) -> bool {
    !matches!(
        e,
        BroadcastError::UnsupportedResolution { .. } | BroadcastError::Core(_)
    )
}

async fn update_downloader() {
    match Command::new(DOWNLOADER_BIN).arg("-U").output().await {
        Ok(output) if output.status.success() => info!("Updated downloader"),
        Ok(output) => warn!(
            status = %output.status,
            "Downloader update exited non-zero"
        ),
        Err(e) => warn!(error = %e, "Could not run downloader update"),
    }
}
