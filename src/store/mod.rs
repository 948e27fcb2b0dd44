//! The backing-store seam: everything the session needs from a database
//! connection, expressed over named statements and column rows.

use crate::core::{DbError, Result, Row};
use async_trait::async_trait;

pub mod memory;

pub use memory::{InMemoryConnection, InMemoryStore};

/// One connection/transaction against the backing store.
///
/// Errors are propagated unchanged by the session; retries are the caller's business.
#[async_trait]
pub trait StoreExecutor: Send {
    async fn select_one(&mut self, statement: &str, params: &Row) -> Result<Option<Row>>;

    async fn select_many(
        &mut self,
        statement: &str,
        params: &Row,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Row>>;

    async fn insert(&mut self, statement: &str, row: &Row) -> Result<()>;

    /// Returns the number of physically affected rows.
    async fn update(&mut self, statement: &str, row: &Row) -> Result<u64>;

    async fn delete(&mut self, statement: &str, params: &Row) -> Result<()>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;

    async fn close(&mut self) -> Result<()>;

    async fn table_exists(&mut self, table: &str) -> Result<bool> {
        Err(DbError::Configuration(format!(
            "store does not support table metadata lookups (table '{}')",
            table
        )))
    }

    async fn execute_script(&mut self, statement: &str) -> Result<()> {
        Err(DbError::Configuration(format!(
            "store does not support schema scripts (statement '{}')",
            statement
        )))
    }
}

/// Opens fresh executors; one per session.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn StoreExecutor>>;
}
