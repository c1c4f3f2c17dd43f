//! Playlist repository.
//!
//! The queue is strictly producer/consumer: the enqueueing surface produces
//! enqueue/skip/clear, the broadcaster's queue loop consumes. Atomicity is
//! enforced with compare-and-swap updates on the `status` column, checked via
//! `rows_affected`.

use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::{info, warn};

use crate::models::{EnqueueRequest, ItemKind, ItemStatus, PlaylistItem};
use crate::{Error, Result};

const ITEM_COLUMNS: &str =
    "id, type, created_at, url, thumbnail, title, duration, status, skip_requested, settings, priority";

#[derive(Clone)]
pub struct PlaylistRepository {
    pool: SqlitePool,
}

impl PlaylistRepository {
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new queued item. Channel videos get the maximum sentinel
    /// priority so they always preempt regular videos.
    pub async fn enqueue(&self, request: &EnqueueRequest, kind: ItemKind) -> Result<i64> {
        let result = sqlx::query(
            r"
            INSERT INTO playlist_videos
                (type, created_at, url, thumbnail, title, duration, status, settings, priority)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(kind.as_str())
        .bind(Utc::now())
        .bind(&request.url)
        .bind(&request.thumbnail)
        .bind(&request.title)
        .bind(&request.duration)
        .bind(ItemStatus::Queued.as_str())
        .bind(&request.settings)
        .bind(kind.default_priority())
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        info!(id, kind = kind.as_str(), url = %request.url, "Enqueued playlist item");
        Ok(id)
    }

    /// Highest-priority queued item, ties broken by insertion order.
    pub async fn get_next(&self) -> Result<Option<PlaylistItem>> {
        let row = sqlx::query(&format!(
            "SELECT {ITEM_COLUMNS} FROM playlist_videos
             WHERE status = ? ORDER BY priority DESC, id ASC LIMIT 1"
        ))
        .bind(ItemStatus::Queued.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(item_from_row).transpose()
    }

    pub async fn get(&self, id: i64) -> Result<Option<PlaylistItem>> {
        let row = sqlx::query(&format!(
            "SELECT {ITEM_COLUMNS} FROM playlist_videos WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(item_from_row).transpose()
    }

    /// The item currently marked PLAYING, if any. At most one exists.
    pub async fn get_current(&self) -> Result<Option<PlaylistItem>> {
        let row = sqlx::query(&format!(
            "SELECT {ITEM_COLUMNS} FROM playlist_videos WHERE status = ? LIMIT 1"
        ))
        .bind(ItemStatus::Playing.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(item_from_row).transpose()
    }

    /// Everything visible on the queue surface: the playing item first, then
    /// queued items in play order.
    pub async fn get_queue(&self) -> Result<Vec<PlaylistItem>> {
        let rows = sqlx::query(&format!(
            "SELECT {ITEM_COLUMNS} FROM playlist_videos
             WHERE status IN (?, ?)
             ORDER BY status = ? DESC, priority DESC, id ASC"
        ))
        .bind(ItemStatus::Playing.as_str())
        .bind(ItemStatus::Queued.as_str())
        .bind(ItemStatus::Playing.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(item_from_row).collect()
    }

    /// Atomically move an item from QUEUED to PLAYING. Fails (returns false)
    /// if the item was removed from the queue between `get_next` and here, so
    /// two concurrent callers can never both succeed.
    pub async fn set_current(&self, id: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE playlist_videos SET status = ? WHERE status = ? AND id = ?",
        )
        .bind(ItemStatus::Playing.as_str())
        .bind(ItemStatus::Queued.as_str())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Request a skip of the item with this id, provided it is still the one
    /// playing. Passing the id keeps skips atomic: the user skips the video
    /// they meant to, not whatever started playing since.
    pub async fn skip(&self, id: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE playlist_videos SET skip_requested = 1 WHERE status = ? AND id = ?",
        )
        .bind(ItemStatus::Playing.as_str())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() >= 1)
    }

    /// Put a preempted item back at the head of the regular queue: status back
    /// to QUEUED, skip flag cleared, priority one above every queued regular
    /// video. Rapid channel surfing therefore never depletes the real queue.
    pub async fn reenqueue(&self, id: i64) -> Result<()> {
        sqlx::query(
            r"
            UPDATE playlist_videos
            SET status = ?, skip_requested = 0,
                priority = 1 + COALESCE(
                    (SELECT MAX(priority) FROM playlist_videos WHERE status = ? AND type = ?), 0)
            WHERE id = ?
            ",
        )
        .bind(ItemStatus::Queued.as_str())
        .bind(ItemStatus::Queued.as_str())
        .bind(ItemKind::Video.as_str())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn end_video(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE playlist_videos SET status = ? WHERE id = ?")
            .bind(ItemStatus::Done.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Bump a queued item so it plays next, ahead of other queued regular
    /// videos (channel videos still outrank it).
    pub async fn play_next(&self, id: i64) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE playlist_videos
            SET priority = 1 + COALESCE(
                (SELECT MAX(priority) FROM playlist_videos WHERE status = ? AND type = ?), 0)
            WHERE id = ? AND status = ?
            ",
        )
        .bind(ItemStatus::Queued.as_str())
        .bind(ItemKind::Video.as_str())
        .bind(id)
        .bind(ItemStatus::Queued.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() >= 1)
    }

    /// Remove a queued item. CAS on status so an item that already started
    /// playing is left alone.
    pub async fn remove(&self, id: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE playlist_videos SET status = ? WHERE id = ? AND status = ?",
        )
        .bind(ItemStatus::Deleted.as_str())
        .bind(id)
        .bind(ItemStatus::Queued.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() >= 1)
    }

    /// Drop every queued item and request a skip of whatever is playing.
    pub async fn clear(&self) -> Result<()> {
        sqlx::query("UPDATE playlist_videos SET status = ? WHERE status = ?")
            .bind(ItemStatus::Deleted.as_str())
            .bind(ItemStatus::Queued.as_str())
            .execute(&self.pool)
            .await?;
        sqlx::query("UPDATE playlist_videos SET skip_requested = 1 WHERE status = ?")
            .bind(ItemStatus::Playing.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Recovery from unclean shutdowns: any row stuck in PLAYING becomes DONE.
    pub async fn clean_up_state(&self) -> Result<()> {
        let result = sqlx::query("UPDATE playlist_videos SET status = ? WHERE status = ?")
            .bind(ItemStatus::Done.as_str())
            .bind(ItemStatus::Playing.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() > 0 {
            warn!(
                rows = result.rows_affected(),
                "Recovered PLAYING rows left over from an unclean shutdown"
            );
        }
        Ok(())
    }

    /// Whether the currently playing item matches `id` and has a pending skip
    /// request. A mismatch means the database and the queue loop disagree
    /// about what is playing; that is logged and treated as "do not skip".
    pub async fn should_skip(&self, id: i64) -> Result<bool> {
        let Some(current) = self.get_current().await? else {
            return Ok(false);
        };
        if current.id != id {
            warn!(
                db_id = current.id,
                loop_id = id,
                "Database and queue loop disagree about the playing item"
            );
            return Ok(false);
        }
        Ok(current.skip_requested)
    }
}

fn item_from_row(row: SqliteRow) -> Result<PlaylistItem> {
    let status_str: String = row.try_get("status")?;
    let kind_str: String = row.try_get("type")?;
    Ok(PlaylistItem {
        id: row.try_get("id")?,
        kind: ItemKind::from_str(&kind_str)
            .ok_or_else(|| Error::Internal(format!("Unknown playlist item type: {kind_str}")))?,
        created_at: row.try_get("created_at")?,
        url: row.try_get("url")?,
        thumbnail: row.try_get("thumbnail")?,
        title: row.try_get("title")?,
        duration: row.try_get("duration")?,
        status: ItemStatus::from_str(&status_str)
            .ok_or_else(|| Error::Internal(format!("Unknown playlist status: {status_str}")))?,
        skip_requested: row.try_get::<i64, _>("skip_requested")? != 0,
        settings: row.try_get("settings")?,
        priority: row.try_get("priority")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::scratch_pool;
    use crate::models::CHANNEL_VIDEO_PRIORITY;

    fn request(url: &str) -> EnqueueRequest {
        EnqueueRequest {
            url: url.to_string(),
            title: url.to_string(),
            ..EnqueueRequest::default()
        }
    }

    #[tokio::test]
    async fn queue_orders_by_priority_then_id() {
        let (_dir, pool) = scratch_pool().await;
        let repo = PlaylistRepository::new(pool);

        let a = repo.enqueue(&request("a"), ItemKind::Video).await.expect("enqueue a");
        let _b = repo.enqueue(&request("b"), ItemKind::Video).await.expect("enqueue b");

        let next = repo.get_next().await.expect("next").expect("item");
        assert_eq!(next.id, a, "FIFO among equal priorities");

        let c = repo
            .enqueue(&request("c"), ItemKind::ChannelVideo)
            .await
            .expect("enqueue c");
        let next = repo.get_next().await.expect("next").expect("item");
        assert_eq!(next.id, c, "channel video preempts the queue head");
        assert_eq!(next.priority, CHANNEL_VIDEO_PRIORITY);
    }

    #[tokio::test]
    async fn set_current_is_a_cas() {
        let (_dir, pool) = scratch_pool().await;
        let repo = PlaylistRepository::new(pool);

        let id = repo.enqueue(&request("a"), ItemKind::Video).await.expect("enqueue");
        assert!(repo.set_current(id).await.expect("first cas"));
        assert!(!repo.set_current(id).await.expect("second cas"), "CAS must fail once PLAYING");

        let current = repo.get_current().await.expect("current").expect("item");
        assert_eq!(current.id, id);
        assert_eq!(current.status, ItemStatus::Playing);
    }

    #[tokio::test]
    async fn set_current_fails_for_removed_item() {
        let (_dir, pool) = scratch_pool().await;
        let repo = PlaylistRepository::new(pool);

        let id = repo.enqueue(&request("a"), ItemKind::Video).await.expect("enqueue");
        assert!(repo.remove(id).await.expect("remove"));
        assert!(!repo.set_current(id).await.expect("cas"));
    }

    #[tokio::test]
    async fn skip_targets_only_the_playing_row() {
        let (_dir, pool) = scratch_pool().await;
        let repo = PlaylistRepository::new(pool);

        let a = repo.enqueue(&request("a"), ItemKind::Video).await.expect("enqueue a");
        let b = repo.enqueue(&request("b"), ItemKind::Video).await.expect("enqueue b");
        assert!(repo.set_current(a).await.expect("cas"));

        assert!(!repo.skip(b).await.expect("skip queued"), "queued item cannot be skipped");
        assert!(repo.skip(a).await.expect("skip playing"));
        assert!(repo.should_skip(a).await.expect("should_skip"));
        assert!(!repo.should_skip(b).await.expect("should_skip other"));
    }

    #[tokio::test]
    async fn reenqueue_law_puts_preempted_video_at_the_head() {
        let (_dir, pool) = scratch_pool().await;
        let repo = PlaylistRepository::new(pool);

        // S3: regular A playing, regular B queued, channel C arrives.
        let a = repo.enqueue(&request("a"), ItemKind::Video).await.expect("enqueue a");
        let _b = repo.enqueue(&request("b"), ItemKind::Video).await.expect("enqueue b");
        assert!(repo.set_current(a).await.expect("cas"));
        let c = repo
            .enqueue(&request("c"), ItemKind::ChannelVideo)
            .await
            .expect("enqueue c");

        assert_eq!(repo.get_next().await.expect("next").expect("item").id, c);

        // Channel-induced skip of A: A goes back to the head of the regular queue.
        repo.reenqueue(a).await.expect("reenqueue");
        let a_row = repo.get(a).await.expect("get").expect("row");
        assert_eq!(a_row.status, ItemStatus::Queued);
        assert!(!a_row.skip_requested);

        // C plays and ends; A must come back before B.
        assert!(repo.set_current(c).await.expect("cas c"));
        repo.end_video(c).await.expect("end c");
        assert_eq!(repo.get_next().await.expect("next").expect("item").id, a);
    }

    #[tokio::test]
    async fn play_next_outranks_queued_regulars_but_not_channels() {
        let (_dir, pool) = scratch_pool().await;
        let repo = PlaylistRepository::new(pool);

        let _a = repo.enqueue(&request("a"), ItemKind::Video).await.expect("enqueue a");
        let b = repo.enqueue(&request("b"), ItemKind::Video).await.expect("enqueue b");
        assert!(repo.play_next(b).await.expect("play_next"));
        assert_eq!(repo.get_next().await.expect("next").expect("item").id, b);

        let c = repo
            .enqueue(&request("c"), ItemKind::ChannelVideo)
            .await
            .expect("enqueue c");
        assert_eq!(repo.get_next().await.expect("next").expect("item").id, c);
    }

    #[tokio::test]
    async fn clear_deletes_queued_and_flags_playing() {
        let (_dir, pool) = scratch_pool().await;
        let repo = PlaylistRepository::new(pool);

        let a = repo.enqueue(&request("a"), ItemKind::Video).await.expect("enqueue a");
        let _b = repo.enqueue(&request("b"), ItemKind::Video).await.expect("enqueue b");
        assert!(repo.set_current(a).await.expect("cas"));

        repo.clear().await.expect("clear");
        assert!(repo.get_next().await.expect("next").is_none());
        assert!(repo.should_skip(a).await.expect("should_skip"));
    }

    #[tokio::test]
    async fn clean_up_state_recovers_playing_rows() {
        let (_dir, pool) = scratch_pool().await;
        let repo = PlaylistRepository::new(pool);

        let a = repo.enqueue(&request("a"), ItemKind::Video).await.expect("enqueue a");
        assert!(repo.set_current(a).await.expect("cas"));
        repo.clean_up_state().await.expect("clean up");

        assert!(repo.get_current().await.expect("current").is_none());
        let row = repo.get(a).await.expect("get").expect("row");
        assert_eq!(row.status, ItemStatus::Done);
    }
}
