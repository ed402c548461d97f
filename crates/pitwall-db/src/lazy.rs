//! Lazily-built, rebuildable connection pool handle.

use std::sync::{Mutex, MutexGuard};

use crate::migrations::run_migrations;
use crate::pool::{create_pool, DbConnection, DbPool, DbRuntimeSettings, PoolError};

/// A connection pool that is created on first use and can be discarded at
/// any time.
///
/// The first call to [`LazyPool::get`] opens the database, builds the pool,
/// and runs pending migrations. When a connection cannot be checked out the
/// pool is dropped so the next call starts from cold. The handle holds no
/// durable state of its own.
#[derive(Debug)]
pub struct LazyPool {
    db_path: String,
    settings: DbRuntimeSettings,
    slot: Mutex<Option<DbPool>>,
}

impl LazyPool {
    /// Creates an unopened handle for the database at `db_path`.
    ///
    /// `:memory:` databases are private to each connection, so the pool size
    /// is pinned to one for them.
    pub fn new(db_path: impl Into<String>, mut settings: DbRuntimeSettings) -> Self {
        let db_path = db_path.into();
        if db_path == ":memory:" {
            settings.pool_max_size = 1;
        }
        Self {
            db_path,
            settings,
            slot: Mutex::new(None),
        }
    }

    /// The database path this handle opens.
    pub fn path(&self) -> &str {
        &self.db_path
    }

    /// Returns the pool, building it (and migrating the schema) if needed.
    ///
    /// # Errors
    ///
    /// Returns `PoolError` if the pool cannot be built or the schema cannot
    /// be migrated. Nothing is cached on failure.
    pub fn pool(&self) -> Result<DbPool, PoolError> {
        let mut slot = self.lock_slot();
        if let Some(pool) = slot.as_ref() {
            return Ok(pool.clone());
        }

        let pool = create_pool(&self.db_path, self.settings)?;
        {
            let conn = pool.get().map_err(PoolError::Checkout)?;
            let applied = run_migrations(&conn)?;
            if applied > 0 {
                tracing::info!(count = applied, path = %self.db_path, "applied database migrations");
            }
        }

        tracing::debug!(path = %self.db_path, "database pool initialized");
        *slot = Some(pool.clone());
        Ok(pool)
    }

    /// Checks out a connection, invalidating the pool if none is available.
    ///
    /// # Errors
    ///
    /// Returns `PoolError` if the pool cannot be built or no connection could
    /// be obtained within the configured timeout.
    pub fn get(&self) -> Result<DbConnection, PoolError> {
        let pool = self.pool()?;
        pool.get().map_err(|e| {
            self.invalidate();
            PoolError::Checkout(e)
        })
    }

    /// Drops the cached pool. The next call to [`LazyPool::get`] rebuilds it.
    pub fn invalidate(&self) {
        if self.lock_slot().take().is_some() {
            tracing::warn!(path = %self.db_path, "database pool discarded, will rebuild on next use");
        }
    }

    /// Whether a pool is currently cached.
    pub fn is_initialized(&self) -> bool {
        self.lock_slot().is_some()
    }

    fn lock_slot(&self) -> MutexGuard<'_, Option<DbPool>> {
        // A panic while holding the lock cannot leave the Option half-written.
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_settings() -> DbRuntimeSettings {
        DbRuntimeSettings {
            connect_timeout_ms: 200,
            ..DbRuntimeSettings::default()
        }
    }

    #[test]
    fn builds_on_first_use() {
        let lazy = LazyPool::new(":memory:", DbRuntimeSettings::default());
        assert!(!lazy.is_initialized());

        let conn = lazy.get().expect("should open in-memory database");
        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'telemetry_events'",
                [],
                |row| row.get(0),
            )
            .expect("should query sqlite_master");
        assert_eq!(tables, 1, "migrations should run on first use");
        assert!(lazy.is_initialized());
    }

    #[test]
    fn memory_database_pins_pool_size() {
        let lazy = LazyPool::new(":memory:", DbRuntimeSettings::default());
        let pool = lazy.pool().expect("should build pool");
        assert_eq!(pool.max_size(), 1);
    }

    #[test]
    fn failed_build_caches_nothing() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = dir.path().join("later").join("events.db");
        let lazy = LazyPool::new(path.to_str().unwrap(), fast_settings());

        assert!(lazy.get().is_err());
        assert!(!lazy.is_initialized());

        std::fs::create_dir_all(dir.path().join("later")).expect("should create dir");
        lazy.get().expect("should open once the directory exists");
        assert!(lazy.is_initialized());
    }

    #[test]
    fn invalidate_forces_rebuild_without_losing_data() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = dir.path().join("events.db");
        let lazy = LazyPool::new(path.to_str().unwrap(), fast_settings());

        lazy.get()
            .expect("should open")
            .execute(
                "INSERT INTO id_sequences (stream, last_id) VALUES ('telemetry', 7)",
                [],
            )
            .expect("should insert");

        lazy.invalidate();
        assert!(!lazy.is_initialized());

        let last_id: i64 = lazy
            .get()
            .expect("should reopen")
            .query_row(
                "SELECT last_id FROM id_sequences WHERE stream = 'telemetry'",
                [],
                |row| row.get(0),
            )
            .expect("row should survive a rebuild");
        assert_eq!(last_id, 7);
    }
}
