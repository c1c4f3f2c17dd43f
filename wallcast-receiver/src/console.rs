//! Console blanking.
//!
//! Receivers boot to a text console. Stray kernel or login text between
//! clips looks terrible on a video wall, so at startup the framebuffer is
//! painted black and the cursor hidden; shutdown undoes the cursor.

use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

const FRAMEBUFFER: &str = "/dev/fb0";
const CONSOLE: &str = "/dev/tty1";

/// Paint the framebuffer black and hide the console cursor. Best-effort: on
/// hosts without a framebuffer (development machines) this logs and moves on.
pub async fn blank() {
    match tokio::fs::OpenOptions::new().write(true).open(FRAMEBUFFER).await {
        Ok(mut fb) => {
            // Zero fill until the device reports it is full.
            let zeros = vec![0u8; 1024 * 1024];
            loop {
                match fb.write(&zeros).await {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
            debug!("Blanked framebuffer");
        }
        Err(e) => warn!(error = %e, "Unable to blank framebuffer"),
    }

    set_cursor_visible(false).await;
}

/// Undo what [`blank`] did to the cursor.
pub async fn restore() {
    set_cursor_visible(true).await;
}

async fn set_cursor_visible(visible: bool) {
    let seq: &[u8] = if visible { b"\x1b[?25h" } else { b"\x1b[?25l" };
    match tokio::fs::OpenOptions::new().write(true).open(CONSOLE).await {
        Ok(mut tty) => {
            let _ = tty.write_all(seq).await;
        }
        Err(e) => debug!(error = %e, "No console tty to adjust"),
    }
}
