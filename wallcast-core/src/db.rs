//! Embedded store initialization.

use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use tracing::info;

use crate::config::DatabaseConfig;
use crate::Result;

/// Open (creating if missing) the embedded SQLite store.
///
/// WAL mode so the queue loop's writes never block the web surface's readers;
/// a busy timeout so brief writer contention surfaces as a recoverable
/// `StoreBusy` only after waiting.
pub async fn init_database(config: &DatabaseConfig) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .filename(&config.path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(config.busy_timeout_seconds));

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(options)
        .await?;

    info!(path = %config.path.display(), "Opened embedded store");
    Ok(pool)
}
