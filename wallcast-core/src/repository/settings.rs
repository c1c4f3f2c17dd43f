//! Settings repository.
//!
//! Runtime-modifiable key/value pairs. The broadcaster's store is the single
//! source of truth for display and animation modes; receivers converge on it
//! through the republish loop rather than reading it directly.

use std::collections::BTreeMap;

use chrono::Utc;
use sqlx::{Row, SqlitePool};

use crate::config::WallLayout;
use crate::models::settings::{tv_id_from_key, tv_key, SETTING_DISPLAY_MODE};
use crate::models::{DisplayMode, TvId};
use crate::Result;

#[derive(Clone)]
pub struct SettingsRepository {
    pool: SqlitePool,
}

impl SettingsRepository {
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, key: &str, default: &str) -> Result<String> {
        let row = sqlx::query("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row {
            Some(row) => row.try_get("value")?,
            None => default.to_string(),
        })
    }

    /// Multi-get. Every requested key is present in the result; keys missing
    /// from the store map to `default`.
    pub async fn get_multi(&self, keys: &[String], default: &str) -> Result<BTreeMap<String, String>> {
        let mut values: BTreeMap<String, String> = keys
            .iter()
            .map(|k| (k.clone(), default.to_string()))
            .collect();
        if keys.is_empty() {
            return Ok(values);
        }

        let placeholders = vec!["?"; keys.len()].join(", ");
        let sql = format!("SELECT key, value FROM settings WHERE key IN ({placeholders})");
        let mut query = sqlx::query(&sql);
        for key in keys {
            query = query.bind(key);
        }
        for row in query.fetch_all(&self.pool).await? {
            let key: String = row.try_get("key")?;
            let value: String = row.try_get("value")?;
            values.insert(key, value);
        }
        Ok(values)
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            r"
            INSERT INTO settings (key, value, created_at, updated_at) VALUES (?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            ",
        )
        .bind(key)
        .bind(value)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Multi-set as a single UPSERT statement, so a tick's display-mode write
    /// hits the (possibly slow) storage once.
    pub async fn set_multi(&self, values: &BTreeMap<String, String>) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        let now = Utc::now();
        let placeholders = vec!["(?, ?, ?, ?)"; values.len()].join(", ");
        let sql = format!(
            "INSERT INTO settings (key, value, created_at, updated_at) VALUES {placeholders}
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at"
        );
        let mut query = sqlx::query(&sql);
        for (key, value) in values {
            query = query.bind(key).bind(value).bind(now).bind(now);
        }
        query.execute(&self.pool).await?;
        Ok(())
    }

    /// Flip each key between two values in one statement: keys currently at
    /// `value1` become `value2`, anything else becomes `value1`. Used by the
    /// IR remote's display-mode toggle.
    pub async fn toggle_multi(&self, keys: &[String], value1: &str, value2: &str) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let placeholders = vec!["?"; keys.len()].join(", ");
        let sql = format!(
            "UPDATE settings SET value = CASE WHEN value = ? THEN ? ELSE ? END, updated_at = ?
             WHERE key IN ({placeholders})"
        );
        let mut query = sqlx::query(&sql)
            .bind(value1)
            .bind(value2)
            .bind(value1)
            .bind(Utc::now());
        for key in keys {
            query = query.bind(key);
        }
        query.execute(&self.pool).await?;
        Ok(())
    }

    pub async fn is_enabled(&self, key: &str, default: bool) -> Result<bool> {
        let fallback = if default { "1" } else { "0" };
        let value = self.get(key, fallback).await?;
        Ok(value == "1" || value.eq_ignore_ascii_case("true"))
    }

    /// Display mode per TV. Every TV of the wall is guaranteed a key in the
    /// result; TVs never written default to tile mode.
    pub async fn display_modes(&self, layout: &WallLayout) -> Result<BTreeMap<TvId, DisplayMode>> {
        let keys: Vec<String> = layout
            .tv_ids()
            .iter()
            .map(|id| tv_key(SETTING_DISPLAY_MODE, id))
            .collect();
        let raw = self.get_multi(&keys, DisplayMode::DEFAULT.as_str()).await?;

        let mut modes = BTreeMap::new();
        for (key, value) in raw {
            let tv_id = tv_id_from_key(&key)?;
            modes.insert(
                tv_id,
                DisplayMode::from_str(&value).unwrap_or(DisplayMode::DEFAULT),
            );
        }
        Ok(modes)
    }

    /// Persist display modes for a subset of TVs.
    pub async fn set_display_modes(&self, modes: &BTreeMap<TvId, DisplayMode>) -> Result<()> {
        let values: BTreeMap<String, String> = modes
            .iter()
            .map(|(id, mode)| (tv_key(SETTING_DISPLAY_MODE, id), mode.as_str().to_string()))
            .collect();
        self.set_multi(&values).await
    }
}
