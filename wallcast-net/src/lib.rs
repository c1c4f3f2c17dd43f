//! UDP multicast transport.
//!
//! Two logical channels share one class-D group: the video stream and the
//! control protocol, on separate ports. Both are plain UDP: the video channel
//! tolerates loss as visible artifacts, the control channel tolerates loss
//! because every state write is periodically republished.

mod channel;
mod multicast;
mod route;

pub use channel::{ControlReceiver, ControlSender};
pub use multicast::{MulticastReceiver, MulticastSender, MAX_DATAGRAM_BYTES};
pub use route::pin_multicast_route;

#[derive(thiserror::Error, Debug)]
pub enum NetError {
    #[error("Socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Control protocol error: {0}")]
    Proto(#[from] wallcast_proto::ProtoError),

    #[error("Route command failed: {0}")]
    Route(String),
}

pub type Result<T> = std::result::Result<T, NetError>;
