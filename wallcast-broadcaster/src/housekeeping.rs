//! Signal housekeeping for the broadcast process.
//!
//! A dying broadcast must not leave receivers playing into a dead stream or
//! child encoders running: on any catchable terminating signal the pipeline
//! process groups are killed, receivers are told to skip, scratch files
//! (FIFOs, sentinel) are removed, and the signal is re-raised so the exit
//! status reflects what happened.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

use wallcast_net::ControlSender;
use wallcast_proto::ControlMessage;

use crate::pipeline::{terminate_group, GroupRegistry};

pub struct Housekeeping {
    groups: GroupRegistry,
    scratch_paths: Vec<PathBuf>,
    control: Arc<ControlSender>,
}

impl Housekeeping {
    pub fn new(
        groups: GroupRegistry,
        scratch_paths: Vec<PathBuf>,
        control: Arc<ControlSender>,
    ) -> Self {
        Self {
            groups,
            scratch_paths,
            control,
        }
    }

    /// Kill both pipeline process groups, tell receivers to skip, and delete
    /// scratch files.
    pub async fn run(&self) {
        let groups: Vec<i32> = std::mem::take(&mut *self.groups.lock());
        for pgid in &groups {
            terminate_group(*pgid);
        }
        info!(groups = groups.len(), "Killed pipeline process groups");

        if let Err(e) = self.control.send(&ControlMessage::SkipVideo).await {
            warn!(error = %e, "Could not send skip to receivers");
        }

        for path in &self.scratch_paths {
            let _ = tokio::fs::remove_dir_all(path).await;
            let _ = tokio::fs::remove_file(path).await;
        }
    }
}

/// Run housekeeping when any catchable terminating signal arrives, then
/// re-raise the signal with default disposition so the caught signal stays
/// visible in our exit status.
pub fn install_signal_handlers(housekeeping: Housekeeping) {
    tokio::spawn(async move {
        let mut hup = match signal(SignalKind::hangup()) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "Could not install signal handlers");
                return;
            }
        };
        let mut int = signal(SignalKind::interrupt()).expect("SIGINT handler");
        let mut quit = signal(SignalKind::quit()).expect("SIGQUIT handler");
        let mut term = signal(SignalKind::terminate()).expect("SIGTERM handler");

        let caught = tokio::select! {
            _ = hup.recv() => libc::SIGHUP,
            _ = int.recv() => libc::SIGINT,
            _ = quit.recv() => libc::SIGQUIT,
            _ = term.recv() => libc::SIGTERM,
        };
        info!(signal = caught, "Caught terminating signal; running housekeeping");
        housekeeping.run().await;
        reraise(caught);
    });
}

#[allow(unsafe_code)]
fn reraise(sig: i32) {
    // SAFETY: restoring the default disposition and re-raising are plain
    // syscalls; nothing else runs after this.
    unsafe {
        libc::signal(sig, libc::SIG_DFL);
        libc::raise(sig);
    }
}
