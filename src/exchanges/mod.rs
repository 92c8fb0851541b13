//! Exchange integration abstractions and implementations.

mod cache;
mod manager;
#[cfg(test)]
pub(crate) mod mock;

pub mod kraken;

pub use cache::OrderCache;
pub use manager::Manager;

use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::{Action, ExchangeOrder, ExchangeOrderStatus, PairData};

/// Exchange errors.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// Trading pair is not supported by this exchange.
    #[error("pair {0} is not supported")]
    PairNotSupported(String),

    /// Insufficient funds for the operation.
    #[error("insufficient funds")]
    InsufficientFunds,

    /// Order not found.
    #[error("order {0} not found")]
    OrderNotFound(String),

    /// Connection error.
    #[error("connection error: {0}")]
    Connection(String),

    /// The request did not complete within the deadline. The outcome on
    /// the exchange side is unknown.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// The local rate limit window is exhausted.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// API error from the exchange.
    #[error("API error: {0}")]
    Api(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ExchangeError {
    /// True for failures that are expected to clear on their own; the
    /// caller retries next cycle instead of mutating any order state.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ExchangeError::Connection(_)
                | ExchangeError::Timeout(_)
                | ExchangeError::RateLimited(_)
        )
    }
}

/// Result type for exchange operations.
pub type Result<T> = std::result::Result<T, ExchangeError>;

/// ExchangeClient is the contract the core requires from a concrete
/// exchange integration for one account.
///
/// Implementations keep a local snapshot of exchange orders keyed by
/// txid (see [`OrderCache`]) plus cached balances and pair metadata, so
/// the synchronous accessors never touch the network. Repeated queries
/// for a closed txid must keep returning the same terminal state.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Exchange kind backing this client (e.g. "kraken").
    fn name(&self) -> &str;

    /// Account id this client trades for.
    fn account(&self) -> &str;

    /// Verifies connectivity and warms the pair/balance caches.
    async fn connect(&self) -> Result<()>;

    /// Returns the exchange's view of an order. Served from the local
    /// snapshot unless `redownload` is set or the txid is unknown.
    async fn get_exchange_order(
        &self,
        txid: &str,
        redownload: bool,
    ) -> Result<Option<ExchangeOrder>>;

    /// Snapshot lookup without any network fallback.
    fn local_order(&self, txid: &str) -> Option<ExchangeOrder>;

    fn has_local_order(&self, txid: &str) -> bool;

    /// Records new remote information in the snapshot. A cached entry is
    /// replaced only when the status differs, so a stale open view never
    /// clobbers a terminal one.
    fn record_exchange_order(&self, order: ExchangeOrder);

    /// All orders currently in the snapshot.
    fn cached_orders(&self) -> Vec<ExchangeOrder>;

    /// Downloads the account's order history for one remote status,
    /// recording every order in the snapshot. Returns how many orders
    /// were downloaded.
    async fn download_orders(&self, status: ExchangeOrderStatus) -> Result<usize>;

    /// Bulk-refreshes specific orders by txid.
    async fn download_orders_by_txid(&self, txids: &[String]) -> Result<()>;

    /// Fetches fresh balances, replacing the cached view.
    async fn request_balance(&self) -> Result<HashMap<String, Decimal>>;

    /// Cached available balance for a currency (zero when unknown).
    fn balance(&self, currency: &str) -> Decimal;

    /// Fetches last-trade prices for the given pair ids.
    async fn request_tickers(&self, pairs: &[String]) -> Result<HashMap<String, Decimal>>;

    /// Precision/rounding metadata for a pair, if supported.
    fn pair_data(&self, pair: &str) -> Option<PairData>;

    /// Submits a new order, returning the exchange transaction id.
    async fn submit_order(&self, action: &Action) -> Result<String>;

    /// Replaces a live order, returning the new transaction id.
    async fn edit_order(&self, action: &Action) -> Result<String>;

    /// Cancels a live order.
    async fn cancel_order(&self, action: &Action) -> Result<()>;
}
