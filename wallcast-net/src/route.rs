use std::net::Ipv4Addr;

use tokio::process::Command;
use tracing::{debug, info};

use crate::{NetError, Result};

/// Pin the multicast group to the wired interface with a host route.
///
/// Without this the kernel may pick the wifi interface, and multicast over
/// wifi drops far too many datagrams to stream video. Idempotent: an already
/// existing route is success.
pub async fn pin_multicast_route(group: Ipv4Addr, interface: &str) -> Result<()> {
    let output = Command::new("ip")
        .args(["route", "add", &format!("{group}/32"), "dev", interface])
        .output()
        .await?;

    if output.status.success() {
        info!(%group, interface, "Pinned multicast route");
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    if stderr.contains("File exists") {
        debug!(%group, interface, "Multicast route already present");
        return Ok(());
    }
    Err(NetError::Route(format!(
        "ip route add {group}/32 dev {interface}: {}",
        stderr.trim()
    )))
}
