//! Broadcaster node: ingests a video source, transcodes it to MPEG-TS, and
//! multicasts the bytes to every receiver while driving receiver state over
//! the control channel. Hosts the playlist queue loop, the animator, and the
//! loading-screen/screensaver helpers.

pub mod display_mode;
pub mod ffprobe;
pub mod housekeeping;
pub mod loading_screen;
pub mod pipeline;
pub mod queue;
pub mod remote;
pub mod screensaver;
pub mod throttle;

#[derive(thiserror::Error, Debug)]
pub enum BroadcastError {
    #[error("Transport error: {0}")]
    Net(#[from] wallcast_net::NetError),

    #[error("Core error: {0}")]
    Core(#[from] wallcast_core::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("Video is {height}p but a dual-output receiver caps the wall at {max}p")]
    UnsupportedResolution { height: i64, max: i64 },

    #[error("Probe error: {0}")]
    Probe(String),
}

pub type Result<T> = std::result::Result<T, BroadcastError>;
