pub mod display;
pub mod playlist;
pub mod settings;
pub mod tv;

pub use display::{AnimationMode, DisplayMode};
pub use playlist::{EnqueueRequest, ItemKind, ItemStatus, PlaylistItem, CHANNEL_VIDEO_PRIORITY};
pub use tv::{Rect, TvId, TvSpec};
