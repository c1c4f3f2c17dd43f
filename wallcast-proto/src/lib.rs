//! Control protocol for the wallcast video wall.
//!
//! Broadcaster-to-receiver messages travel as UTF-8 JSON, one object per UDP
//! datagram, framed as `{"msg_type": <tag>, "content": <value>}`. Delivery is
//! fire-and-forget: every operation is idempotent at the receiver and lossy
//! delivery is tolerated because state is periodically republished.

mod control;

pub use control::{
    decode, encode, ControlMessage, LoadingScreenData, RawFrame, CONTENT_KEY, MSG_TYPE_KEY,
};

/// Stream terminator for the video channel: a datagram whose payload is
/// exactly these bytes marks end of video. Receivers close the player's stdin
/// when they see it. The literal is part of the wire format.
pub const END_OF_VIDEO_MAGIC_BYTES: &[u8] = b"PIWALL2_END_OF_VIDEO_MAGIC_BYTES";

#[derive(thiserror::Error, Debug)]
pub enum ProtoError {
    #[error("Control frame is not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ProtoError>;
