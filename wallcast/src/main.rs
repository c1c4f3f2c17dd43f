//! The wallcast CLI.
//!
//! One binary, four roles: the long-lived queue daemon and receiver process,
//! the per-video `broadcast` subprocess the queue spawns, and the low-level
//! `msend-video` stdin-to-multicast sender.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::AsyncReadExt;
use tracing::{error, info};

use wallcast_broadcaster::housekeeping::{install_signal_handlers, Housekeeping};
use wallcast_broadcaster::pipeline::{BroadcastOptions, VideoBroadcast};
use wallcast_broadcaster::queue::Queue;
use wallcast_broadcaster::throttle::BurstThrottler;
use wallcast_core::logging::{broadcast_span, init_logging, make_log_uuid};
use wallcast_core::repository::{PlaylistRepository, SettingsRepository};
use wallcast_core::Config;
use wallcast_net::{ControlSender, MulticastSender};
use wallcast_receiver::Receiver;

#[derive(Parser)]
#[command(name = "wallcast", about = "Multi-TV video wall control", version)]
struct Cli {
    /// Path to the wall configuration file (default: ./wallcast.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the queue daemon: plays queued videos, ticks the animator,
    /// republishes volume, and services the IR remote.
    Queue,

    /// Broadcast a single video to all receivers. Normally spawned by the
    /// queue daemon.
    Broadcast {
        /// Video source: a remote URL or a local file path.
        #[arg(long)]
        url: String,
        /// Log correlation id; generated when absent.
        #[arg(long)]
        log_uuid: Option<String>,
        /// Skip the loading screen (screensavers, channel videos).
        #[arg(long)]
        no_show_loading_screen: bool,
    },

    /// Run the receiver process on a TV host.
    Receive,

    /// Read bytes from stdin and multicast them on the video port, ending
    /// with the end-of-video sentinel datagram.
    MsendVideo {
        /// Log correlation id; generated when absent.
        #[arg(long)]
        log_uuid: Option<String>,
        /// Override the stream-terminating sentinel.
        #[arg(long)]
        end_of_video_magic_bytes: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref()).context("loading configuration")?;
    init_logging(&config.logging).context("initializing logging")?;

    match cli.command {
        Commands::Queue => run_queue(config, cli.config).await,
        Commands::Broadcast {
            url,
            log_uuid,
            no_show_loading_screen,
        } => {
            run_broadcast(
                config,
                url,
                log_uuid.unwrap_or_else(make_log_uuid),
                !no_show_loading_screen,
            )
            .await
        }
        Commands::Receive => run_receive(config).await,
        Commands::MsendVideo {
            log_uuid,
            end_of_video_magic_bytes,
        } => {
            run_msend_video(
                config,
                log_uuid.unwrap_or_else(make_log_uuid),
                end_of_video_magic_bytes,
            )
            .await
        }
    }
}

async fn run_queue(config: Config, config_path: Option<PathBuf>) -> Result<()> {
    let pool = wallcast_core::db::init_database(&config.database)
        .await
        .context("opening the embedded store")?;
    wallcast_core::migrations::run_migrations(&pool)
        .await
        .context("migrating the embedded store")?;

    let playlist = PlaylistRepository::new(pool.clone());
    let settings = SettingsRepository::new(pool);
    let mut queue = Queue::new(config, config_path, playlist, settings)
        .await
        .context("constructing the queue")?;

    tokio::select! {
        result = queue.run() => result.context("queue loop"),
        _ = tokio::signal::ctrl_c() => {
            info!("Queue daemon interrupted; exiting");
            Ok(())
        }
    }
}

async fn run_broadcast(
    config: Config,
    url: String,
    log_uuid: String,
    show_loading_screen: bool,
) -> Result<()> {
    let span = broadcast_span(&log_uuid);
    let _guard = span.enter();

    let control = Arc::new(
        ControlSender::new(config.multicast.group, config.multicast.control_port)
            .context("opening the control channel")?,
    );
    let options = BroadcastOptions {
        url,
        log_uuid,
        show_loading_screen,
    };
    let mut broadcast = VideoBroadcast::new(config, Arc::clone(&control), options)
        .context("constructing the broadcast")?;

    // On any terminating signal: kill both pipeline groups, send SKIP to the
    // receivers, delete scratch files, re-raise.
    install_signal_handlers(Housekeeping::new(
        broadcast.group_registry(),
        broadcast.scratch_paths(),
        control,
    ));

    match broadcast.broadcast().await {
        Ok(()) => Ok(()),
        Err(e) => {
            error!(error = %e, "Broadcast failed");
            Err(e.into())
        }
    }
}

async fn run_receive(config: Config) -> Result<()> {
    let mut receiver = Receiver::new(config).context("constructing the receiver")?;
    let result = tokio::select! {
        result = receiver.run() => result.map_err(Into::into),
        _ = tokio::signal::ctrl_c() => {
            info!("Receiver interrupted");
            Ok(())
        }
    };
    receiver.shutdown().await;
    result
}

/// The stdin-to-multicast leg of the broadcast pipeline as a standalone tool,
/// for plumbing experiments and receiver soak tests.
async fn run_msend_video(
    config: Config,
    log_uuid: String,
    sentinel_override: Option<String>,
) -> Result<()> {
    let span = broadcast_span(&log_uuid);
    let _guard = span.enter();

    const DATAGRAM: usize = 7 * 188;
    let sentinel: Vec<u8> = sentinel_override
        .map(String::into_bytes)
        .unwrap_or_else(|| wallcast_proto::END_OF_VIDEO_MAGIC_BYTES.to_vec());

    let sender = MulticastSender::new(config.multicast.group).context("opening video socket")?;
    let port = config.multicast.video_port;
    let mut throttler = BurstThrottler::new(None);

    let mut stdin = tokio::io::stdin();
    let mut buf = vec![0u8; DATAGRAM];
    let mut filled = 0;
    let mut total: u64 = 0;
    loop {
        let n = stdin.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
        if filled == buf.len() {
            let wait = throttler.pace(filled, tokio::time::Instant::now());
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }
            sender.send(&buf, port).await?;
            total += filled as u64;
            filled = 0;
        }
    }
    if filled > 0 {
        sender.send(&buf[..filled], port).await?;
        total += filled as u64;
    }
    sender.send(&sentinel, port).await?;
    info!(total, "Sent video stream and end-of-video sentinel");

    // Give the kernel a beat to flush the last datagrams before exit.
    tokio::time::sleep(Duration::from_millis(100)).await;
    Ok(())
}
