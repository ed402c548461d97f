//! Database layer for Pitwall.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode initialization,
//! embedded SQL migrations, and a lazily-built connection handle that can be
//! torn down and rebuilt after a failure.
//!
//! # Design decisions
//!
//! - **SQLite with WAL mode**: the durable event store needs no external
//!   database process. WAL mode allows concurrent readers with a single
//!   writer, which matches the append-then-poll access pattern.
//! - **`r2d2` connection pool**: bounded connection reuse without manual
//!   lifetime management.
//! - **[`LazyPool`]**: the pool is created on first use and dropped when a
//!   connection cannot be obtained, so a later request rebuilds it. All
//!   durable state lives in the database file, never in the handle.
//! - **Embedded migrations**: SQL files are compiled into the binary via
//!   `include_str!` and cannot drift from the code that depends on them.

mod lazy;
mod migrations;
mod pool;

pub use lazy::LazyPool;
pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, DbConnection, DbPool, DbRuntimeSettings, PoolError};
