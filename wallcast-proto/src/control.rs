use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::Result;

pub const MSG_TYPE_KEY: &str = "msg_type";
pub const CONTENT_KEY: &str = "content";

/// The raw wire frame. Decoding is two-stage — frame first, typed message
/// second — so a frame with an unknown `msg_type` can be logged and ignored
/// instead of failing the receive loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFrame {
    pub msg_type: String,
    #[serde(default)]
    pub content: Value,
}

/// Metadata a receiver needs to start a loading-screen player: a clip that
/// exists on every receiver's disk, plus its dimensions for cropping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadingScreenData {
    pub video_path: String,
    pub width: i64,
    pub height: i64,
}

/// Typed control messages, broadcaster to receivers.
///
/// All of these are idempotent at the receiver and tolerate reordering,
/// except that `InitVideo` must arrive before `PlayVideo`; the broadcaster
/// guarantees that by pausing between the two sends.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    /// Stop any prior video and spawn paused players for a video with these
    /// dimensions.
    InitVideo {
        log_uuid: String,
        video_width: i64,
        video_height: i64,
    },
    /// Unpause the players. This is the start-sync signal.
    PlayVideo,
    /// Terminate the current video players and any loading screen.
    SkipVideo,
    /// Perceptual volume percentage in [0, 100], applied to all active
    /// players on the receiver.
    Volume(f64),
    /// New display mode per tv_id. Receivers apply the entries for TVs they
    /// own and re-crop active players immediately.
    DisplayMode(BTreeMap<String, String>),
    /// Start an auxiliary loading-screen player.
    ShowLoadingScreen {
        log_uuid: String,
        loading_screen_data: LoadingScreenData,
    },
    /// Terminate the loading-screen player.
    EndLoadingScreen,
}

impl ControlMessage {
    pub fn msg_type(&self) -> &'static str {
        match self {
            Self::InitVideo { .. } => "init_video",
            Self::PlayVideo => "play_video",
            Self::SkipVideo => "skip_video",
            Self::Volume(_) => "volume",
            Self::DisplayMode(_) => "display_mode",
            Self::ShowLoadingScreen { .. } => "show_loading_screen",
            Self::EndLoadingScreen => "end_loading_screen",
        }
    }

    pub fn to_frame(&self) -> RawFrame {
        let content = match self {
            Self::InitVideo {
                log_uuid,
                video_width,
                video_height,
            } => json!({
                "log_uuid": log_uuid,
                "video_width": video_width,
                "video_height": video_height,
            }),
            Self::PlayVideo | Self::SkipVideo | Self::EndLoadingScreen => json!({}),
            Self::Volume(vol_pct) => json!(vol_pct),
            Self::DisplayMode(modes) => {
                json!(modes)
            }
            Self::ShowLoadingScreen {
                log_uuid,
                loading_screen_data,
            } => json!({
                "log_uuid": log_uuid,
                "loading_screen_data": loading_screen_data,
            }),
        };
        RawFrame {
            msg_type: self.msg_type().to_string(),
            content,
        }
    }

    /// Typed view of a frame. `None` for unknown message types or malformed
    /// content; the caller logs the raw frame and carries on.
    pub fn from_frame(frame: &RawFrame) -> Option<Self> {
        match frame.msg_type.as_str() {
            "init_video" => {
                let content = frame.content.as_object()?;
                Some(Self::InitVideo {
                    log_uuid: content.get("log_uuid")?.as_str()?.to_string(),
                    video_width: content.get("video_width")?.as_i64()?,
                    video_height: content.get("video_height")?.as_i64()?,
                })
            }
            "play_video" => Some(Self::PlayVideo),
            "skip_video" => Some(Self::SkipVideo),
            "volume" => Some(Self::Volume(frame.content.as_f64()?)),
            "display_mode" => {
                let modes = serde_json::from_value(frame.content.clone()).ok()?;
                Some(Self::DisplayMode(modes))
            }
            "show_loading_screen" => {
                let content = frame.content.as_object()?;
                Some(Self::ShowLoadingScreen {
                    log_uuid: content.get("log_uuid")?.as_str()?.to_string(),
                    loading_screen_data: serde_json::from_value(
                        content.get("loading_screen_data")?.clone(),
                    )
                    .ok()?,
                })
            }
            _ => None,
        }
    }
}

/// Serialize a message into one datagram payload.
pub fn encode(msg: &ControlMessage) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&msg.to_frame())?)
}

/// Parse one datagram payload into a raw frame.
pub fn decode(payload: &[u8]) -> Result<RawFrame> {
    Ok(serde_json::from_slice(payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(msg: ControlMessage) {
        let bytes = encode(&msg).expect("encode");
        let frame = decode(&bytes).expect("decode");
        assert_eq!(frame.msg_type, msg.msg_type());
        assert_eq!(ControlMessage::from_frame(&frame), Some(msg));
    }

    #[test]
    fn every_message_round_trips_through_the_wire_frame() {
        round_trip(ControlMessage::InitVideo {
            log_uuid: "3b241101e2bb42558caf4770e214ff01".to_string(),
            video_width: 1920,
            video_height: 1080,
        });
        round_trip(ControlMessage::PlayVideo);
        round_trip(ControlMessage::SkipVideo);
        round_trip(ControlMessage::Volume(62.5));
        let mut modes = BTreeMap::new();
        modes.insert("a.local_1".to_string(), "TILE".to_string());
        modes.insert("a.local_2".to_string(), "REPEAT".to_string());
        round_trip(ControlMessage::DisplayMode(modes));
        round_trip(ControlMessage::ShowLoadingScreen {
            log_uuid: "3b241101e2bb42558caf4770e214ff01".to_string(),
            loading_screen_data: LoadingScreenData {
                video_path: "/var/lib/wallcast/loading/dialup.ts".to_string(),
                width: 1280,
                height: 720,
            },
        });
        round_trip(ControlMessage::EndLoadingScreen);
    }

    #[test]
    fn unknown_msg_type_decodes_to_a_raw_frame_only() {
        let frame = decode(br#"{"msg_type":"reboot","content":{}}"#).expect("decode");
        assert_eq!(frame.msg_type, "reboot");
        assert_eq!(ControlMessage::from_frame(&frame), None);
    }

    #[test]
    fn missing_content_defaults_to_null() {
        let frame = decode(br#"{"msg_type":"play_video"}"#).expect("decode");
        assert_eq!(ControlMessage::from_frame(&frame), Some(ControlMessage::PlayVideo));
    }

    #[test]
    fn malformed_content_is_tolerated() {
        let frame = decode(br#"{"msg_type":"volume","content":"loud"}"#).expect("decode");
        assert_eq!(ControlMessage::from_frame(&frame), None);

        let frame = decode(br#"{"msg_type":"init_video","content":{"log_uuid":"x"}}"#)
            .expect("decode");
        assert_eq!(ControlMessage::from_frame(&frame), None);
    }

    #[test]
    fn non_json_payload_is_a_decode_error() {
        assert!(decode(b"\x00\x01\x02").is_err());
        assert!(decode(b"").is_err());
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let frame = decode(
            br#"{"msg_type":"init_video","content":{"log_uuid":"x","video_width":640,"video_height":480,"extra":true},"trailer":1}"#,
        )
        .expect("decode");
        assert_eq!(
            ControlMessage::from_frame(&frame),
            Some(ControlMessage::InitVideo {
                log_uuid: "x".to_string(),
                video_width: 640,
                video_height: 480,
            })
        );
    }

    #[test]
    fn volume_accepts_integral_json_numbers() {
        let frame = decode(br#"{"msg_type":"volume","content":100}"#).expect("decode");
        assert_eq!(ControlMessage::from_frame(&frame), Some(ControlMessage::Volume(100.0)));
    }

    #[test]
    fn sentinel_is_the_exact_literal() {
        assert_eq!(
            crate::END_OF_VIDEO_MAGIC_BYTES,
            b"PIWALL2_END_OF_VIDEO_MAGIC_BYTES"
        );
    }
}
