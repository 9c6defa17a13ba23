//! Database layer
//!
//! Storage for identities and sessions. Two backends are supported:
//! - SQLite (default, single-file deployment)
//! - MySQL
//!
//! The backend is selected by `database.driver` in the configuration.
//!
//! # Usage
//!
//! ```ignore
//! use playopia::config::DatabaseConfig;
//! use playopia::db::{create_pool, migrations};
//!
//! let pool = create_pool(&DatabaseConfig::default()).await?;
//! migrations::run_migrations(&pool).await?;
//! pool.ping().await?;
//! ```

pub mod migrations;
pub mod pool;
pub mod repositories;

pub use pool::{
    create_pool, create_test_pool, DatabasePool, DynDatabasePool, MysqlDatabase, SqliteDatabase,
};
