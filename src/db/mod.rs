//! Database layer
//!
//! SQLite-backed persistence for users, sessions, uploaded file metadata and
//! the generic document table every record class is stored in.
//!
//! ```ignore
//! use customs_tracker::config::DatabaseConfig;
//! use customs_tracker::db::{create_pool, migrations};
//!
//! let pool = create_pool(&DatabaseConfig::default()).await?;
//! migrations::run_migrations(&pool).await?;
//! pool.ping().await?;
//! ```

pub mod migrations;
pub mod pool;
pub mod repositories;

pub use pool::{create_pool, create_test_pool, DatabasePool, DynDatabasePool, SqliteDatabase};
