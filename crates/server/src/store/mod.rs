mod hierarchy_log;
mod metadata;
mod migrations;
mod nodes;
mod search;
mod similarity;
mod taxonomy;
mod tree;

pub use migrations::{Migration, MIGRATIONS};
pub use tree::{TreeNode, TreeResponse};

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

use decant_common::types::HierarchyView;

/// SQLite client for the node store.
///
/// The single mutable resource of the process: writers serialize through
/// WAL, readers proceed concurrently, and every multi-statement mutation
/// goes through a transaction.
pub struct Store {
    pool: SqlitePool,
    tree_cache: Mutex<HashMap<HierarchyView, tree::CachedTree>>,
}

impl Store {
    /// Open (creating if missing) the database file and return a client.
    pub async fn connect(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Connection(format!("create {}: {}", parent.display(), e))
            })?;
        }

        tracing::info!(path = %path.display(), "Opening SQLite database");

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let client = Self {
            pool,
            tree_cache: Mutex::new(HashMap::new()),
        };
        client.health_check().await?;
        tracing::info!("SQLite connection established");

        Ok(client)
    }

    /// In-memory database for tests. A single connection keeps every
    /// statement on the same memory instance.
    pub async fn connect_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        Ok(Self {
            pool,
            tree_cache: Mutex::new(HashMap::new()),
        })
    }

    /// Verify the connection is alive.
    pub async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Drop the cached tree for one view.
    pub(crate) fn invalidate_tree(&self, view: HierarchyView) {
        self.tree_cache.lock().unwrap().remove(&view);
        metrics::counter!("store.tree_cache.invalidations", "view" => view.as_str()).increment(1);
    }

    /// Drop every cached tree (batch hierarchy mutations).
    pub(crate) fn invalidate_all_trees(&self) {
        self.tree_cache.lock().unwrap().clear();
        metrics::counter!("store.tree_cache.invalidations", "view" => "all").increment(1);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite connection error: {0}")]
    Connection(String),

    #[error("SQLite query error: {0}")]
    Query(String),

    #[error("SQLite migration error: {0}")]
    Migration(String),

    #[error("Duplicate URL: {0}")]
    DuplicateUrl(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<StoreError> for decant_common::DecantError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateUrl(url) => decant_common::DecantError::DuplicateUrl(url),
            StoreError::NotFound(what) => decant_common::DecantError::NotFound(what),
            StoreError::Conflict(what) => decant_common::DecantError::Conflict(what),
            other => decant_common::DecantError::Database(other.to_string()),
        }
    }
}
