//! Infrared remote input.
//!
//! The queue loop polls a remote source each pass. The canonical source is
//! the lircd unix socket, whose line protocol looks like:
//!
//! ```text
//! 0000000000000490 00 KEY_VOLUMEUP RM-729A
//! ```
//!
//! Key parsing is deliberately minimal; the queue only consumes the typed
//! events below.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::UnixStream;
use tracing::{debug, info, warn};

use crate::Result;

const LIRC_SOCKET: &str = "/var/run/lirc/lircd";

/// Typed remote events the queue loop reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteEvent {
    Mute,
    VolumeUp,
    VolumeDown,
    /// Digit key: toggle the display mode of one TV, selected modulo the
    /// number of TVs on the wall.
    ToggleTv(u8),
    /// Channel-surf button: enqueue the next channel video.
    Channel,
}

/// A source of remote events. Seam for tests and for walls without lirc.
pub trait RemoteSource: Send {
    /// A non-blocking-ish poll: returns the next pending event, if any.
    fn poll(&mut self) -> Option<RemoteEvent>;
}

/// Reads key presses from the lircd socket in a background task.
pub struct LircRemote {
    rx: tokio::sync::mpsc::UnboundedReceiver<RemoteEvent>,
}

impl LircRemote {
    /// Connect to lircd. Absence of the socket is not an error; the wall
    /// simply has no remote.
    pub async fn connect() -> Result<Option<Self>> {
        let stream = match UnixStream::connect(LIRC_SOCKET).await {
            Ok(stream) => stream,
            Err(e) => {
                info!(error = %e, "No lirc socket; IR remote disabled");
                return Ok(None);
            }
        };
        info!("Connected to lirc remote socket");

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stream).lines();
            loop {
                match tokio::time::timeout(Duration::from_secs(3600), lines.next_line()).await {
                    Ok(Ok(Some(line))) => {
                        debug!(line = %line, "Remote data");
                        if let Some(event) = parse_lirc_line(&line) {
                            if tx.send(event).is_err() {
                                return;
                            }
                        }
                    }
                    Ok(Ok(None)) => {
                        warn!("lirc socket closed");
                        return;
                    }
                    Ok(Err(e)) => {
                        warn!(error = %e, "lirc read error");
                        return;
                    }
                    Err(_) => {} // idle remote; keep listening
                }
            }
        });
        Ok(Some(Self { rx }))
    }
}

impl RemoteSource for LircRemote {
    fn poll(&mut self) -> Option<RemoteEvent> {
        self.rx.try_recv().ok()
    }
}

/// Parse one lircd line. Repeat events (sequence != 00) are dropped for
/// everything except the volume keys, which auto-repeat while held.
fn parse_lirc_line(line: &str) -> Option<RemoteEvent> {
    let mut parts = line.split_whitespace();
    let _code = parts.next()?;
    let sequence = parts.next()?;
    let key_name = parts.next()?;
    let first_press = sequence == "00";

    match key_name {
        "KEY_VOLUMEUP" => Some(RemoteEvent::VolumeUp),
        "KEY_VOLUMEDOWN" => Some(RemoteEvent::VolumeDown),
        "KEY_MUTE" if first_press => Some(RemoteEvent::Mute),
        "KEY_CHANNELUP" | "KEY_CHANNELDOWN" if first_press => Some(RemoteEvent::Channel),
        _ if first_press && key_name.starts_with("KEY_") => {
            let digit: u8 = key_name.strip_prefix("KEY_")?.parse().ok()?;
            Some(RemoteEvent::ToggleTv(digit))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_keys_repeat() {
        assert_eq!(
            parse_lirc_line("0000000000000490 00 KEY_VOLUMEUP RM-729A"),
            Some(RemoteEvent::VolumeUp)
        );
        assert_eq!(
            parse_lirc_line("0000000000000490 05 KEY_VOLUMEUP RM-729A"),
            Some(RemoteEvent::VolumeUp)
        );
    }

    #[test]
    fn mute_only_fires_on_first_press() {
        assert_eq!(
            parse_lirc_line("0000000000000490 00 KEY_MUTE RM-729A"),
            Some(RemoteEvent::Mute)
        );
        assert_eq!(parse_lirc_line("0000000000000490 01 KEY_MUTE RM-729A"), None);
    }

    #[test]
    fn digit_keys_toggle_tvs() {
        assert_eq!(
            parse_lirc_line("0000000000000490 00 KEY_3 RM-729A"),
            Some(RemoteEvent::ToggleTv(3))
        );
        assert_eq!(parse_lirc_line("0000000000000490 01 KEY_3 RM-729A"), None);
    }

    #[test]
    fn junk_lines_are_ignored() {
        assert_eq!(parse_lirc_line(""), None);
        assert_eq!(parse_lirc_line("useless"), None);
        assert_eq!(parse_lirc_line("0000000000000490 00 KEY_POWER RM-729A"), None);
    }
}
