//! Send-side pacing for the video stream.
//!
//! Two regimes: an initial burst fills the receivers' jitter buffers as fast
//! as the input allows, then the send rate is capped so the LAN is never
//! saturated and the control channel never starves. The steady rate is the
//! video's own byte rate when size and duration are known, else a fixed
//! ceiling.

use std::time::Duration;

use tokio::time::Instant;

/// Hard ceiling on pipeline input when the video byte rate is unknown.
pub const FALLBACK_BYTES_PER_SEC: f64 = 4.0 * 1024.0 * 1024.0;

/// Stop bursting after half a receiver jitter buffer's worth of data.
pub const BURST_AMOUNT_BYTES: u64 = 200 * 1024 * 1024;

#[derive(Debug)]
pub struct BurstThrottler {
    burst_bytes: u64,
    target_bytes_per_sec: f64,
    sent_total: u64,
    sent_since_burst: u64,
    burst_end: Option<Instant>,
}

impl BurstThrottler {
    /// `target_bytes_per_sec` of `None` falls back to the fixed ceiling.
    pub fn new(target_bytes_per_sec: Option<f64>) -> Self {
        Self {
            burst_bytes: BURST_AMOUNT_BYTES,
            target_bytes_per_sec: target_bytes_per_sec
                .filter(|rate| rate.is_finite() && *rate > 0.0)
                .unwrap_or(FALLBACK_BYTES_PER_SEC),
            sent_total: 0,
            sent_since_burst: 0,
            burst_end: None,
        }
    }

    /// Explicit burst size, e.g. zero for a plain rate limiter.
    pub fn with_limits(burst_bytes: u64, target_bytes_per_sec: Option<f64>) -> Self {
        Self {
            burst_bytes,
            ..Self::new(target_bytes_per_sec)
        }
    }

    /// Account for a chunk about to be sent and return how long to sleep
    /// first to hold the target rate. Zero during the burst.
    pub fn pace(&mut self, len: usize, now: Instant) -> Duration {
        if self.sent_total <= self.burst_bytes {
            self.sent_total += len as u64;
            return Duration::ZERO;
        }

        let burst_end = *self.burst_end.get_or_insert(now);
        self.sent_total += len as u64;
        self.sent_since_burst += len as u64;

        // How far ahead of the target rate this chunk puts us.
        let target_elapsed = self.sent_since_burst as f64 / self.target_bytes_per_sec;
        let actual_elapsed = now.duration_since(burst_end).as_secs_f64();
        if target_elapsed > actual_elapsed {
            Duration::from_secs_f64(target_elapsed - actual_elapsed)
        } else {
            Duration::ZERO
        }
    }
}
