//! Thin ffprobe wrapper for local file metadata.

use std::collections::BTreeMap;
use std::path::Path;

use tokio::process::Command;
use tracing::debug;

use crate::{BroadcastError, Result};

/// Probe selected stream fields of a local video file, e.g.
/// `["width", "height", "duration"]`. Returned values are the raw CSV cells.
pub async fn video_metadata(
    video_path: &Path,
    fields: &[&str],
) -> Result<BTreeMap<String, String>> {
    let entries = format!("stream={}", fields.join(","));
    let output = Command::new("ffprobe")
        .args([
            "-hide_banner",
            "-v",
            "0",
            "-of",
            "csv=p=0",
            "-select_streams",
            "v:0",
            "-show_entries",
            &entries,
        ])
        .arg(video_path)
        .output()
        .await?;

    if !output.status.success() {
        return Err(BroadcastError::Probe(format!(
            "ffprobe failed on {}: {}",
            video_path.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let first_line = stdout.lines().next().unwrap_or_default();
    debug!(path = %video_path.display(), line = first_line, "ffprobe output");
    let cells: Vec<&str> = first_line.split(',').collect();
    if cells.len() < fields.len() {
        return Err(BroadcastError::Probe(format!(
            "ffprobe returned {} fields for {} requested on {}",
            cells.len(),
            fields.len(),
            video_path.display()
        )));
    }

    Ok(fields
        .iter()
        .zip(cells)
        .map(|(field, cell)| ((*field).to_string(), cell.trim().to_string()))
        .collect())
}

/// Parse the `width,height` line a dimension probe emits.
pub fn parse_dimensions(line: &str) -> Result<(i64, i64)> {
    let mut parts = line.trim().split(',');
    let width = parts
        .next()
        .and_then(|w| w.trim().parse().ok())
        .ok_or_else(|| BroadcastError::Probe(format!("Bad dimension line: {line:?}")))?;
    let height = parts
        .next()
        .and_then(|h| h.trim().parse().ok())
        .ok_or_else(|| BroadcastError::Probe(format!("Bad dimension line: {line:?}")))?;
    Ok((width, height))
}
