//! Typed, transactional persistence for dnsctld (C1).
//!
//! Backed by `sqlx` against the `Any` driver so the same queries run against
//! PostgreSQL in production and an in-memory SQLite pool in tests. Every
//! mutating operation opens exactly one [`Tx`], mirroring the "one critical
//! section per mutation" discipline the daemon otherwise uses for its
//! in-memory `Center` state.

use std::fmt;

use jiff::Timestamp;
use sqlx::any::{Any, AnyPoolOptions};
use sqlx::{Pool, Row, Transaction};

pub mod rows;

pub use rows::*;

/// A connection pool plus embedded migrations.
#[derive(Debug, Clone)]
pub struct Store {
    pool: Pool<Any>,
}

impl Store {
    /// Connect to `url`, running migrations. A failed migration is fatal
    /// (spec. §4.1): the caller should abort startup on `Err`.
    pub async fn connect(url: &str, db_timeout: std::time::Duration) -> Result<Self, StoreError> {
        sqlx::any::install_default_drivers();

        let pool = AnyPoolOptions::new()
            .max_connections(16)
            .acquire_timeout(db_timeout)
            .connect(url)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Database(format!("migration failed: {e}")))?;

        Ok(Self { pool })
    }

    /// Open one transaction. Every mutating `DnsService` method calls this
    /// exactly once (spec. §4.1).
    pub async fn begin(&self) -> Result<Tx<'_>, StoreError> {
        let inner = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(Tx { inner })
    }

    pub fn pool(&self) -> &Pool<Any> {
        &self.pool
    }
}

/// One open transaction. Dropping without calling [`Tx::commit`] rolls back.
pub struct Tx<'c> {
    inner: Transaction<'c, Any>,
}

impl<'c> Tx<'c> {
    pub async fn commit(self) -> Result<(), StoreError> {
        self.inner
            .commit()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    pub async fn rollback(self) -> Result<(), StoreError> {
        self.inner
            .rollback()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    pub(crate) fn conn(&mut self) -> &mut Transaction<'c, Any> {
        &mut self.inner
    }
}

//----------- StoreError --------------------------------------------------------

/// Errors surfaced by the store. Kept as a closed, hand-`Display`-impl'd
/// enum in the same unadorned style used throughout the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    AlreadyExists,
    Conflict,
    NotFound,
    Unavailable,
    Database(String),
}

impl std::error::Error for StoreError {}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyExists => f.write_str("an entity with this key already exists"),
            Self::Conflict => f.write_str("optimistic version mismatch"),
            Self::NotFound => f.write_str("no such entity was found"),
            Self::Unavailable => f.write_str("the store is temporarily unavailable"),
            Self::Database(msg) => write!(f, "database error: {msg}"),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            sqlx::Error::Database(ref dbe) if dbe.is_unique_violation() => StoreError::AlreadyExists,
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => StoreError::Unavailable,
            other => StoreError::Database(other.to_string()),
        }
    }
}

//----------- Pagination --------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub offset: i64,
    pub limit: i64,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

pub(crate) fn parse_timestamp(row: &sqlx::any::AnyRow, col: &str) -> Result<Timestamp, StoreError> {
    let s: String = row.try_get(col)?;
    s.parse::<Timestamp>()
        .map_err(|e| StoreError::Database(format!("bad timestamp in column {col}: {e}")))
}

pub(crate) fn parse_opt_timestamp(
    row: &sqlx::any::AnyRow,
    col: &str,
) -> Result<Option<Timestamp>, StoreError> {
    let s: Option<String> = row.try_get(col)?;
    s.map(|s| {
        s.parse::<Timestamp>()
            .map_err(|e| StoreError::Database(format!("bad timestamp in column {col}: {e}")))
    })
    .transpose()
}
