//! Receiver node: one long-lived process per receiver host.
//!
//! Reacts to control messages from the broadcaster, ingests the multicast
//! video stream, and drives one media player per attached TV (plus a separate
//! loading-screen player), keeping per-TV display modes and crops current.

pub mod console;
pub mod ingest;
pub mod player;
pub mod receiver;

pub use receiver::Receiver;

#[derive(thiserror::Error, Debug)]
pub enum ReceiverError {
    #[error("Transport error: {0}")]
    Net(#[from] wallcast_net::NetError),

    #[error("Core error: {0}")]
    Core(#[from] wallcast_core::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Player error: {0}")]
    Player(String),

    #[error("This host ({0}) is not a configured receiver")]
    UnknownHost(String),
}

pub type Result<T> = std::result::Result<T, ReceiverError>;
