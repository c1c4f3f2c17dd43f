//! Multicast video ingest.
//!
//! Reads raw MPEG-TS datagrams off the video socket and feeds them to the
//! media players' stdin through a large user-space jitter buffer. The buffer
//! decouples socket reads from player writes: a player stalling on a slow
//! write must never block the socket reader, because a blocked reader lets
//! the kernel UDP buffer overflow and datagrams get dropped.
//!
//! The stream ends when a datagram carrying exactly the end-of-video sentinel
//! arrives; the players' stdins are then closed so they drain and exit.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::process::ChildStdin;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use wallcast_net::MulticastReceiver;
use wallcast_proto::END_OF_VIDEO_MAGIC_BYTES;

use crate::Result;

/// Jitter buffer budget between the socket and the players.
const JITTER_BUFFER_BYTES: usize = 400 * 1024 * 1024;

/// The first datagram can take a long time: the broadcaster may still be
/// probing dimensions and waiting out the receiver init sleep.
const FIRST_DATAGRAM_TIMEOUT: Duration = Duration::from_secs(60);

/// Mid-stream, silence means the broadcast died.
const STEADY_TIMEOUT: Duration = Duration::from_secs(10);

/// Throughput is logged once per window.
const MEASUREMENT_WINDOW: Duration = Duration::from_secs(10);

/// Why the ingest loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestEnd {
    /// The end-of-video sentinel arrived; the stream completed.
    EndOfVideo,
    /// No bytes for the timeout window; the players were cut loose.
    Timeout,
}

/// A running ingest pipeline: socket reader plus buffered player writer.
pub struct IngestTask {
    reader: JoinHandle<Result<IngestEnd>>,
    writer: JoinHandle<()>,
}

impl IngestTask {
    /// Bind the video socket and start pumping into the given player stdins
    /// (one per TV; a dual-output receiver duplicates the stream to both).
    pub fn start(group: Ipv4Addr, video_port: u16, sinks: Vec<ChildStdin>) -> Result<Self> {
        let socket = MulticastReceiver::join(group, video_port)?;
        let (tx, rx) = mpsc::unbounded_channel::<Bytes>();
        let budget = Arc::new(Semaphore::new(JITTER_BUFFER_BYTES));

        let writer = tokio::spawn(write_loop(rx, Arc::clone(&budget), sinks));
        let reader = tokio::spawn(read_loop(socket, tx, budget));
        Ok(Self { reader, writer })
    }

    /// Wait for the stream to finish and the players' stdins to close.
    pub async fn join(self) -> Result<IngestEnd> {
        let end = self
            .reader
            .await
            .unwrap_or(Ok(IngestEnd::Timeout))?;
        let _ = self.writer.await;
        Ok(end)
    }

    /// Tear down mid-stream (skip).
    pub fn abort(self) {
        self.reader.abort();
        self.writer.abort();
    }
}

async fn read_loop(
    mut socket: MulticastReceiver,
    tx: mpsc::UnboundedSender<Bytes>,
    budget: Arc<Semaphore>,
) -> Result<IngestEnd> {
    let mut total_bytes: u64 = 0;
    let mut window_bytes: u64 = 0;
    let mut window_start = Instant::now();

    loop {
        let wait = if total_bytes == 0 {
            FIRST_DATAGRAM_TIMEOUT
        } else {
            STEADY_TIMEOUT
        };
        let payload = match timeout(wait, socket.recv_owned()).await {
            Ok(recv) => recv?,
            Err(_) => {
                warn!(
                    total_bytes,
                    timeout_secs = wait.as_secs(),
                    "Video socket timed out; closing player stdin"
                );
                return Ok(IngestEnd::Timeout);
            }
        };

        if total_bytes == 0 {
            info!("Received first bytes of video");
        }

        if payload == END_OF_VIDEO_MAGIC_BYTES {
            info!(total_bytes, "Received end-of-video sentinel; waiting for playback to drain");
            return Ok(IngestEnd::EndOfVideo);
        }

        total_bytes += payload.len() as u64;
        window_bytes += payload.len() as u64;

        // Reserve jitter-buffer budget before queueing. If the buffer is
        // genuinely full the stream is unrecoverable anyway; blocking here is
        // still better than unbounded memory growth.
        let permits = payload.len() as u32;
        let permit = budget
            .clone()
            .acquire_many_owned(permits)
            .await
            .map_err(|_| std::io::Error::other("jitter buffer closed"))?;
        permit.forget();
        if tx.send(Bytes::from(payload)).is_err() {
            // All players went away (skip); stop reading.
            debug!("Player writer gone; stopping video ingest");
            return Ok(IngestEnd::Timeout);
        }

        let elapsed = window_start.elapsed();
        if elapsed > MEASUREMENT_WINDOW {
            let kb_per_s = window_bytes as f64 / elapsed.as_secs_f64() / 1024.0;
            info!(kb_per_s = format!("{kb_per_s:.2}").as_str(), "Reading video");
            window_start = Instant::now();
            window_bytes = 0;
        }
    }
}

async fn write_loop(
    mut rx: mpsc::UnboundedReceiver<Bytes>,
    budget: Arc<Semaphore>,
    mut sinks: Vec<ChildStdin>,
) {
    while let Some(chunk) = rx.recv().await {
        budget.add_permits(chunk.len());
        // Retain only the sinks that still accept bytes; a player that died
        // mid-stream stops being written to, the rest keep playing.
        let mut alive = Vec::with_capacity(sinks.len());
        for mut sink in sinks {
            match sink.write_all(&chunk).await {
                Ok(()) => alive.push(sink),
                Err(e) => debug!(error = %e, "Dropping dead player sink"),
            }
        }
        sinks = alive;
        if sinks.is_empty() {
            debug!("All player sinks gone; stopping writer");
            return;
        }
    }
    // Channel closed: sentinel or timeout. Close stdins so players drain and
    // exit on their own.
    for mut sink in sinks {
        let _ = sink.shutdown().await;
    }
}
