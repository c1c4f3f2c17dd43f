//! Playlist item model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Channel videos always sort ahead of everything else in the queue.
pub const CHANNEL_VIDEO_PRIORITY: i64 = i64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemStatus {
    #[serde(rename = "QUEUED")]
    Queued,
    #[serde(rename = "PLAYING")]
    Playing,
    #[serde(rename = "DONE")]
    Done,
    #[serde(rename = "DELETED")]
    Deleted,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Playing => "PLAYING",
            Self::Done => "DONE",
            Self::Deleted => "DELETED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "QUEUED" => Some(Self::Queued),
            "PLAYING" => Some(Self::Playing),
            "DONE" => Some(Self::Done),
            "DELETED" => Some(Self::Deleted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemKind {
    /// A regular user-enqueued video.
    #[serde(rename = "VIDEO")]
    Video,
    /// A short pre-authored clip enqueued at maximum priority by a remote
    /// button press. Preempts regular videos.
    #[serde(rename = "CHANNEL_VIDEO")]
    ChannelVideo,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Video => "VIDEO",
            Self::ChannelVideo => "CHANNEL_VIDEO",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "VIDEO" => Some(Self::Video),
            "CHANNEL_VIDEO" => Some(Self::ChannelVideo),
            _ => None,
        }
    }

    pub const fn default_priority(&self) -> i64 {
        match self {
            Self::Video => 0,
            Self::ChannelVideo => CHANNEL_VIDEO_PRIORITY,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistItem {
    pub id: i64,
    pub kind: ItemKind,
    pub created_at: DateTime<Utc>,
    pub url: String,
    pub thumbnail: String,
    pub title: String,
    pub duration: String,
    pub status: ItemStatus,
    pub skip_requested: bool,
    /// Opaque per-item settings blob, reserved for the enqueueing surface.
    pub settings: String,
    pub priority: i64,
}

/// Metadata supplied when enqueueing a video.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnqueueRequest {
    pub url: String,
    pub thumbnail: String,
    pub title: String,
    pub duration: String,
    pub settings: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_and_kind_round_trip() {
        for s in [
            ItemStatus::Queued,
            ItemStatus::Playing,
            ItemStatus::Done,
            ItemStatus::Deleted,
        ] {
            assert_eq!(ItemStatus::from_str(s.as_str()), Some(s));
        }
        for k in [ItemKind::Video, ItemKind::ChannelVideo] {
            assert_eq!(ItemKind::from_str(k.as_str()), Some(k));
        }
    }

    #[test]
    fn channel_videos_carry_the_sentinel_priority() {
        assert_eq!(ItemKind::Video.default_priority(), 0);
        assert_eq!(
            ItemKind::ChannelVideo.default_priority(),
            CHANNEL_VIDEO_PRIORITY
        );
        assert!(ItemKind::ChannelVideo.default_priority() > ItemKind::Video.default_priority());
    }
}
