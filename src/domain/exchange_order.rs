//! Read-only projection of an order as the exchange reports it.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::order::{OrderSide, OrderType};

/// Remote order status as reported by the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeOrderStatus {
    Open,
    Closed,
    Cancelled,
}

impl std::fmt::Display for ExchangeOrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExchangeOrderStatus::Open => write!(f, "open"),
            ExchangeOrderStatus::Closed => write!(f, "closed"),
            ExchangeOrderStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// ExchangeOrder mirrors remote state. The core never constructs these
/// from local intent; they are supplied by an exchange client and cached
/// keyed by transaction id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeOrder {
    /// Exchange transaction id.
    pub txid: String,
    pub pair: String,
    pub side: OrderSide,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub status: ExchangeOrderStatus,
    /// Executed base volume.
    pub volume: Decimal,
    /// Average execution price (limit price while open).
    pub price: Decimal,
    /// Total quote-currency cost of the fill.
    pub cost: Decimal,
    /// Fees charged, in quote currency.
    pub fees: Decimal,
    pub open_date: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close_date: Option<DateTime<Utc>>,
}

impl ExchangeOrder {
    pub fn is_open(&self) -> bool {
        self.status == ExchangeOrderStatus::Open
    }

    pub fn is_closed(&self) -> bool {
        self.status == ExchangeOrderStatus::Closed
    }
}
