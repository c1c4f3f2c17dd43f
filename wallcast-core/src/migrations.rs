//! Forward-only schema migrations for the embedded store.
//!
//! The current schema version is persisted in a `schema_version` table and
//! migrations are applied forward at start-up. Migrations ship in code rather
//! than as external SQL files because the store lives on appliance-class hosts
//! where the binary is the only deployment artifact.

use sqlx::{Row, SqlitePool};
use tracing::info;

use crate::{Error, Result};

/// Zero-indexed schema version (the first shipped schema is v0).
const SCHEMA_VERSION: i64 = 3;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let mut tx = pool.begin().await?;

    let current = match sqlx::query("SELECT version FROM schema_version")
        .fetch_optional(&mut *tx)
        .await
    {
        Ok(Some(row)) => row.try_get::<i64, _>("version")?,
        // Table missing or empty: virgin database.
        _ => -1,
    };
    info!(current_schema_version = current, "Checked schema version");

    if current == -1 {
        info!("Constructing database schema from scratch");
        construct_from_scratch(&mut tx).await?;
    } else if current < SCHEMA_VERSION {
        info!(
            from = current,
            to = SCHEMA_VERSION,
            "Database schema is outdated, applying forward migrations"
        );
        for version in (current + 1)..=SCHEMA_VERSION {
            match version {
                1 => migrate_to_v1(&mut tx).await?,
                2 => migrate_to_v2(&mut tx).await?,
                3 => migrate_to_v3(&mut tx).await?,
                _ => {
                    return Err(Error::Internal(format!(
                        "No migration defined for schema version {version}"
                    )))
                }
            }
            sqlx::query("UPDATE schema_version SET version = ?")
                .bind(version)
                .execute(&mut *tx)
                .await?;
        }
    } else if current == SCHEMA_VERSION {
        info!("Database schema is up to date");
        return Ok(());
    } else {
        return Err(Error::Internal(format!(
            "Database schema version {current} is newer than this binary supports ({SCHEMA_VERSION})"
        )));
    }

    tx.commit().await?;
    info!("Database schema constructed successfully");
    Ok(())
}

/// Create the latest schema directly on a virgin database.
async fn construct_from_scratch(tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>) -> Result<()> {
    sqlx::query(
        r"
        CREATE TABLE playlist_videos (
            id INTEGER PRIMARY KEY,
            type TEXT NOT NULL DEFAULT 'VIDEO',
            created_at DATETIME NOT NULL,
            url TEXT NOT NULL,
            thumbnail TEXT NOT NULL DEFAULT '',
            title TEXT NOT NULL DEFAULT '',
            duration TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL,
            skip_requested INTEGER NOT NULL DEFAULT 0,
            settings TEXT NOT NULL DEFAULT '',
            priority INTEGER NOT NULL DEFAULT 0
        )
        ",
    )
    .execute(&mut **tx)
    .await?;
    sqlx::query(
        "CREATE INDEX status_type_priority_idx ON playlist_videos (status, type, priority)",
    )
    .execute(&mut **tx)
    .await?;
    sqlx::query(
        "CREATE INDEX status_priority_idx ON playlist_videos (status, priority DESC, id ASC)",
    )
    .execute(&mut **tx)
    .await?;

    sqlx::query(
        r"
        CREATE TABLE settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL
        )
        ",
    )
    .execute(&mut **tx)
    .await?;

    sqlx::query("CREATE TABLE schema_version (version INTEGER)")
        .execute(&mut **tx)
        .await?;
    sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
        .bind(SCHEMA_VERSION)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// v1: settings table.
async fn migrate_to_v1(tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>) -> Result<()> {
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL
        )
        ",
    )
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// v2: item kind column.
async fn migrate_to_v2(tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>) -> Result<()> {
    sqlx::query("ALTER TABLE playlist_videos ADD COLUMN type TEXT NOT NULL DEFAULT 'VIDEO'")
        .execute(&mut **tx)
        .await?;
    sqlx::query("DROP INDEX IF EXISTS status_idx")
        .execute(&mut **tx)
        .await?;
    sqlx::query("CREATE INDEX status_type_idx ON playlist_videos (status, type, id ASC)")
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// v3: priority column plus the queue-ordering indexes.
async fn migrate_to_v3(tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>) -> Result<()> {
    sqlx::query("ALTER TABLE playlist_videos ADD COLUMN priority INTEGER NOT NULL DEFAULT 0")
        .execute(&mut **tx)
        .await?;
    sqlx::query("DROP INDEX IF EXISTS status_type_idx")
        .execute(&mut **tx)
        .await?;
    sqlx::query(
        "CREATE INDEX status_type_priority_idx ON playlist_videos (status, type, priority)",
    )
    .execute(&mut **tx)
    .await?;
    sqlx::query(
        "CREATE INDEX status_priority_idx ON playlist_videos (status, priority DESC, id ASC)",
    )
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::db::init_database;

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = DatabaseConfig {
            path: dir.path().join("test.db"),
            ..DatabaseConfig::default()
        };
        let pool = init_database(&config).await.expect("open");
        run_migrations(&pool).await.expect("first run");
        run_migrations(&pool).await.expect("second run");

        let row = sqlx::query("SELECT version FROM schema_version")
            .fetch_one(&pool)
            .await
            .expect("version row");
        let version: i64 = row.try_get("version").expect("version column");
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[tokio::test]
    async fn newer_schema_is_refused() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = DatabaseConfig {
            path: dir.path().join("test.db"),
            ..DatabaseConfig::default()
        };
        let pool = init_database(&config).await.expect("open");
        run_migrations(&pool).await.expect("migrate");
        sqlx::query("UPDATE schema_version SET version = ?")
            .bind(SCHEMA_VERSION + 1)
            .execute(&pool)
            .await
            .expect("bump");
        assert!(run_migrations(&pool).await.is_err());
    }
}
