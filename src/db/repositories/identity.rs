//! Identity repository
//!
//! Database operations for registered identities.
//!
//! This module provides:
//! - `IdentityRepository` trait defining the interface for identity data access
//! - `SqlxIdentityRepository` implementing the trait for SQLite and MySQL
//! - `UniqueViolation`, returned (inside `anyhow::Error`) when an insert hits
//!   the username or email UNIQUE constraint
//!
//! Inserts are not preceded by an existence check. Concurrent registrations
//! of the same username or email are settled by the schema constraints.

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::{Identity, NewIdentity};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{MySqlPool, Row, SqlitePool};
use std::fmt;
use std::sync::Arc;

/// Identity repository trait
#[async_trait]
pub trait IdentityRepository: Send + Sync {
    /// Insert a new identity.
    ///
    /// A duplicate username or email fails with an error that downcasts to
    /// [`UniqueViolation`].
    async fn create(&self, identity: &NewIdentity) -> Result<Identity>;

    /// Get identity by ID
    async fn get_by_id(&self, id: i64) -> Result<Option<Identity>>;

    /// Get identity by username (exact, case-sensitive match)
    async fn get_by_username(&self, username: &str) -> Result<Option<Identity>>;

    /// Count registered identities
    async fn count(&self) -> Result<i64>;

    /// Delete an identity and, through the foreign key, its sessions.
    /// Returns whether a row was removed.
    async fn delete(&self, id: i64) -> Result<bool>;
}

/// Column whose UNIQUE constraint rejected an insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityField {
    Username,
    Email,
}

impl fmt::Display for IdentityField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityField::Username => write!(f, "username"),
            IdentityField::Email => write!(f, "email"),
        }
    }
}

/// Insert rejected by a UNIQUE constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{field} is already in use")]
pub struct UniqueViolation {
    pub field: IdentityField,
}

impl UniqueViolation {
    /// Inspect a sqlx error and classify it if it is a unique violation.
    ///
    /// SQLite reports `UNIQUE constraint failed: users.email`, MySQL reports
    /// `Duplicate entry '..' for key 'uq_users_email'`. Only the part naming
    /// the key is inspected so the duplicated value itself cannot mislead the
    /// match. Unknown keys fall back to `Username`.
    pub fn from_sqlx(err: &sqlx::Error) -> Option<Self> {
        let db_err = err.as_database_error()?;
        if !db_err.is_unique_violation() {
            return None;
        }

        let message = db_err.message();
        let key = db_err
            .constraint()
            .or_else(|| message.rsplit("for key").next())
            .unwrap_or(message);

        let field = if key.contains("uq_users_email") || key.contains("users.email") {
            IdentityField::Email
        } else {
            IdentityField::Username
        };

        Some(Self { field })
    }
}

fn map_insert_error(err: sqlx::Error) -> anyhow::Error {
    match UniqueViolation::from_sqlx(&err) {
        Some(violation) => anyhow::Error::new(violation),
        None => anyhow::Error::new(err).context("Failed to create identity"),
    }
}

/// SQLx-based identity repository implementation
///
/// Supports both SQLite and MySQL databases.
pub struct SqlxIdentityRepository {
    pool: DynDatabasePool,
}

impl SqlxIdentityRepository {
    /// Create a new SQLx identity repository
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn IdentityRepository> {
        Arc::new(Self::new(pool))
    }

    fn sqlite(&self) -> Result<&SqlitePool> {
        self.pool.as_sqlite().context("SQLite pool expected")
    }

    fn mysql(&self) -> Result<&MySqlPool> {
        self.pool.as_mysql().context("MySQL pool expected")
    }
}

#[async_trait]
impl IdentityRepository for SqlxIdentityRepository {
    async fn create(&self, identity: &NewIdentity) -> Result<Identity> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => create_identity_sqlite(self.sqlite()?, identity).await,
            DatabaseDriver::Mysql => create_identity_mysql(self.mysql()?, identity).await,
        }
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Identity>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => get_identity_by_id_sqlite(self.sqlite()?, id).await,
            DatabaseDriver::Mysql => get_identity_by_id_mysql(self.mysql()?, id).await,
        }
    }

    async fn get_by_username(&self, username: &str) -> Result<Option<Identity>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                get_identity_by_username_sqlite(self.sqlite()?, username).await
            }
            DatabaseDriver::Mysql => get_identity_by_username_mysql(self.mysql()?, username).await,
        }
    }

    async fn count(&self) -> Result<i64> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => count_identities_sqlite(self.sqlite()?).await,
            DatabaseDriver::Mysql => count_identities_mysql(self.mysql()?).await,
        }
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        let affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query("DELETE FROM users WHERE id = ?")
                    .bind(id)
                    .execute(self.sqlite()?)
                    .await
                    .context("Failed to delete identity")?
                    .rows_affected()
            }
            DatabaseDriver::Mysql => {
                sqlx::query("DELETE FROM users WHERE id = ?")
                    .bind(id)
                    .execute(self.mysql()?)
                    .await
                    .context("Failed to delete identity")?
                    .rows_affected()
            }
        };

        Ok(affected > 0)
    }
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_identity_sqlite(pool: &SqlitePool, identity: &NewIdentity) -> Result<Identity> {
    let now = Utc::now();

    let result = sqlx::query(
        r#"
        INSERT INTO users (username, email, password_hash, created_at)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(&identity.username)
    .bind(&identity.email)
    .bind(&identity.password_hash)
    .bind(now)
    .execute(pool)
    .await
    .map_err(map_insert_error)?;

    Ok(Identity {
        id: result.last_insert_rowid(),
        username: identity.username.clone(),
        email: identity.email.clone(),
        password_hash: identity.password_hash.clone(),
        created_at: now,
    })
}

async fn get_identity_by_id_sqlite(pool: &SqlitePool, id: i64) -> Result<Option<Identity>> {
    let row = sqlx::query(
        r#"
        SELECT id, username, email, password_hash, created_at
        FROM users
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("Failed to get identity by ID")?;

    row.as_ref().map(row_to_identity_sqlite).transpose()
}

async fn get_identity_by_username_sqlite(
    pool: &SqlitePool,
    username: &str,
) -> Result<Option<Identity>> {
    let row = sqlx::query(
        r#"
        SELECT id, username, email, password_hash, created_at
        FROM users
        WHERE username = ?
        "#,
    )
    .bind(username)
    .fetch_optional(pool)
    .await
    .context("Failed to get identity by username")?;

    row.as_ref().map(row_to_identity_sqlite).transpose()
}

async fn count_identities_sqlite(pool: &SqlitePool) -> Result<i64> {
    let row = sqlx::query("SELECT COUNT(*) AS count FROM users")
        .fetch_one(pool)
        .await
        .context("Failed to count identities")?;

    Ok(row.get("count"))
}

fn row_to_identity_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<Identity> {
    Ok(Identity {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        created_at: row.try_get("created_at")?,
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_identity_mysql(pool: &MySqlPool, identity: &NewIdentity) -> Result<Identity> {
    let now = Utc::now();

    let result = sqlx::query(
        r#"
        INSERT INTO users (username, email, password_hash, created_at)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(&identity.username)
    .bind(&identity.email)
    .bind(&identity.password_hash)
    .bind(now)
    .execute(pool)
    .await
    .map_err(map_insert_error)?;

    Ok(Identity {
        id: result.last_insert_id() as i64,
        username: identity.username.clone(),
        email: identity.email.clone(),
        password_hash: identity.password_hash.clone(),
        created_at: now,
    })
}

async fn get_identity_by_id_mysql(pool: &MySqlPool, id: i64) -> Result<Option<Identity>> {
    let row = sqlx::query(
        r#"
        SELECT id, username, email, password_hash, created_at
        FROM users
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("Failed to get identity by ID")?;

    row.as_ref().map(row_to_identity_mysql).transpose()
}

async fn get_identity_by_username_mysql(
    pool: &MySqlPool,
    username: &str,
) -> Result<Option<Identity>> {
    let row = sqlx::query(
        r#"
        SELECT id, username, email, password_hash, created_at
        FROM users
        WHERE username = ?
        "#,
    )
    .bind(username)
    .fetch_optional(pool)
    .await
    .context("Failed to get identity by username")?;

    row.as_ref().map(row_to_identity_mysql).transpose()
}

async fn count_identities_mysql(pool: &MySqlPool) -> Result<i64> {
    let row = sqlx::query("SELECT COUNT(*) AS count FROM users")
        .fetch_one(pool)
        .await
        .context("Failed to count identities")?;

    Ok(row.get("count"))
}

fn row_to_identity_mysql(row: &sqlx::mysql::MySqlRow) -> Result<Identity> {
    Ok(Identity {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        created_at: row.try_get("created_at")?,
    })
}
