//! Persistence for the bot's planned orders and deals.

mod sqlite;

pub use sqlite::{SqliteStorage, SqliteStorageConfig};

use async_trait::async_trait;

use crate::domain::{DealBook, OrderTable};

/// PlanStorage persists the order table and the deal book between runs.
#[async_trait]
pub trait PlanStorage: Send + Sync {
    /// Loads every stored order.
    async fn load_orders(&self) -> Result<OrderTable, StorageError>;

    /// Upserts the current order table.
    async fn save_orders(&self, orders: &OrderTable) -> Result<(), StorageError>;

    /// Loads every stored deal.
    async fn load_deals(&self) -> Result<DealBook, StorageError>;

    /// Upserts the current deal book.
    async fn save_deals(&self, deals: &DealBook) -> Result<(), StorageError>;

    /// Closes the storage connection.
    async fn close(&self) -> Result<(), StorageError>;
}

/// StorageError represents errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
