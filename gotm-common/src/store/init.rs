//! Store initialization
//!
//! Opens (or creates) the SQLite database backing the Resource Store and
//! creates the resource table if needed. Safe to call on every startup.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

use super::ResourceStore;
use crate::Result;

/// Open the store at `db_path`, or a private in-memory database when `None`.
pub async fn open_store(db_path: Option<&Path>, table: &str) -> Result<ResourceStore> {
    let pool = match db_path {
        Some(path) => {
            let newly_created = !path.exists();
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }

            let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))?
                .create_if_missing(true)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .busy_timeout(std::time::Duration::from_millis(5000));
            let pool = SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?;

            if newly_created {
                info!("Initialized new database: {}", path.display());
            } else {
                info!("Opened existing database: {}", path.display());
            }
            pool
        }
        // Every connection to :memory: is its own database, so pin the pool to one.
        None => {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect("sqlite::memory:")
                .await?
        }
    };

    let store = ResourceStore::new(pool, table)?;
    create_resources_table(&store).await?;
    Ok(store)
}

/// Create the single resource table (idempotent)
pub async fn create_resources_table(store: &ResourceStore) -> Result<()> {
    let sql = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {} (
            endpoint TEXT NOT NULL,
            tag TEXT NOT NULL,
            attributes TEXT NOT NULL DEFAULT '{{}}',
            PRIMARY KEY (endpoint, tag)
        )
        "#,
        store.table()
    );
    sqlx::query(&sql).execute(store.pool()).await?;
    Ok(())
}
