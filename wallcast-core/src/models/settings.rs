//! Settings key constants and per-TV key composition.
//!
//! Settings are runtime-modifiable key/value pairs persisted in the embedded
//! store and re-read during execution. Per-TV keys are composed as
//! `<setting>__<tv_id>`.

use crate::models::TvId;
use crate::{Error, Result};

/// Per-TV setting: whether the TV is in tile or repeat mode.
pub const SETTING_DISPLAY_MODE: &str = "display_mode";

/// Global setting driving the animator.
pub const SETTING_ANIMATION_MODE: &str = "animation_mode";

/// Global setting: the wall's perceptual volume percentage, republished to
/// receivers every couple of seconds.
pub const SETTING_VOLUME_PCT: &str = "volume_pct";

/// Opaque secret used by the enqueueing surface for metadata lookups.
pub const SETTING_VIDEO_API_KEY: &str = "video_api_key";

const TV_KEY_DELIM: &str = "__";

/// Compose the per-TV key for a setting, e.g. `display_mode__wall3.local_1`.
pub fn tv_key(setting: &str, tv_id: &TvId) -> String {
    format!("{setting}{TV_KEY_DELIM}{tv_id}")
}

/// Extract the `TvId` back out of a per-TV settings key.
pub fn tv_id_from_key(key: &str) -> Result<TvId> {
    let (_, id) = key
        .split_once(TV_KEY_DELIM)
        .ok_or_else(|| Error::InvalidInput(format!("Not a per-TV settings key: {key}")))?;
    TvId::parse(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tv_key_round_trips() {
        let id = TvId::new("wall3.local", 1);
        let key = tv_key(SETTING_DISPLAY_MODE, &id);
        assert_eq!(key, "display_mode__wall3.local_1");
        assert_eq!(tv_id_from_key(&key).unwrap(), id);
    }

    #[test]
    fn tv_id_from_key_rejects_global_keys() {
        assert!(tv_id_from_key(SETTING_ANIMATION_MODE).is_err());
    }
}
