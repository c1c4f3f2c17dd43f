//! Display-mode and animation-mode control.
//!
//! The settings store is the source of truth; receivers learn about changes
//! over the control channel and converge through the republish loop. Pseudo
//! animation modes (`TILE`, `REPEAT`) are never persisted: setting one writes
//! the implied display mode to every TV and stores `NONE`, and reads infer
//! the pseudo mode back when all TVs agree.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::warn;

use wallcast_core::animator::infer_pseudo_mode;
use wallcast_core::config::WallLayout;
use wallcast_core::models::settings::SETTING_ANIMATION_MODE;
use wallcast_core::models::{AnimationMode, DisplayMode, TvId};
use wallcast_core::repository::SettingsRepository;
use wallcast_net::ControlSender;
use wallcast_proto::ControlMessage;

use crate::Result;

pub struct DisplayModeController {
    settings: SettingsRepository,
    control: Arc<ControlSender>,
    layout: WallLayout,
}

impl DisplayModeController {
    pub fn new(
        settings: SettingsRepository,
        control: Arc<ControlSender>,
        layout: WallLayout,
    ) -> Self {
        Self {
            settings,
            control,
            layout,
        }
    }

    /// Publish a display-mode assignment to the receivers and, when
    /// `persist` is set, write it to the settings store. Publishing without
    /// persisting is how animation frames avoid wearing out flash storage.
    pub async fn set_display_modes(
        &self,
        modes: &BTreeMap<TvId, DisplayMode>,
        persist: bool,
    ) -> Result<()> {
        self.publish(modes).await?;
        if persist {
            if let Err(e) = self.settings.set_display_modes(modes).await {
                // A briefly locked store is recoverable: the next persisting
                // frame converges it.
                warn!(error = %e, "Skipping display-mode persist");
            }
        }
        Ok(())
    }

    /// Publish the currently persisted per-TV modes (eventual-consistency
    /// republish while no animation runs).
    pub async fn republish_persisted(&self) -> Result<()> {
        let modes = self.settings.display_modes(&self.layout).await?;
        self.publish(&modes).await
    }

    pub async fn display_modes(&self) -> Result<BTreeMap<TvId, DisplayMode>> {
        Ok(self.settings.display_modes(&self.layout).await?)
    }

    /// Flip the display mode of the given TVs (IR remote digit keys).
    pub async fn toggle_display_modes(&self, tv_ids: &[TvId]) -> Result<()> {
        let keys: Vec<String> = tv_ids
            .iter()
            .map(|id| {
                wallcast_core::models::settings::tv_key(
                    wallcast_core::models::settings::SETTING_DISPLAY_MODE,
                    id,
                )
            })
            .collect();
        self.settings
            .toggle_multi(
                &keys,
                DisplayMode::Tile.as_str(),
                DisplayMode::Repeat.as_str(),
            )
            .await?;
        self.republish_persisted().await
    }

    /// Set the animation mode. A pseudo mode is resolved on the spot: every
    /// TV gets the implied display mode and `NONE` is persisted instead.
    pub async fn set_animation_mode(&self, mode: AnimationMode) -> Result<()> {
        let mut store_mode = mode;
        if let Some(display_mode) = mode.implied_display_mode() {
            let modes: BTreeMap<TvId, DisplayMode> = self
                .layout
                .tv_ids()
                .into_iter()
                .map(|id| (id, display_mode))
                .collect();
            self.set_display_modes(&modes, true).await?;
            store_mode = AnimationMode::None;
        }
        self.settings
            .set(SETTING_ANIMATION_MODE, store_mode.as_str())
            .await?;
        Ok(())
    }

    /// The persisted animation mode, optionally with pseudo-mode inference:
    /// when nothing is animating but every TV shares one display mode, the
    /// matching pseudo mode is reported instead of `NONE`.
    pub async fn animation_mode(&self, infer_pseudo: bool) -> Result<AnimationMode> {
        let raw = self
            .settings
            .get(SETTING_ANIMATION_MODE, AnimationMode::None.as_str())
            .await?;
        let mode = AnimationMode::from_str(&raw).unwrap_or_else(|| {
            warn!(value = %raw, "Unknown persisted animation mode; treating as NONE");
            AnimationMode::None
        });

        if !infer_pseudo || (mode != AnimationMode::None && !mode.is_pseudo()) {
            return Ok(mode);
        }
        let display_modes = self.settings.display_modes(&self.layout).await?;
        Ok(infer_pseudo_mode(&display_modes))
    }

    async fn publish(&self, modes: &BTreeMap<TvId, DisplayMode>) -> Result<()> {
        let wire: BTreeMap<String, String> = modes
            .iter()
            .map(|(id, mode)| (id.to_string(), mode.as_str().to_string()))
            .collect();
        self.control.send(&ControlMessage::DisplayMode(wire)).await?;
        Ok(())
    }
}
