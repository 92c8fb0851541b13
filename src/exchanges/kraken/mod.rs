//! Kraken exchange integration.

mod client;
mod exchange;

pub use client::{ApiError, Client, ClientConfig, ClientError};
pub use exchange::{alias_currency, KrakenExchange};
