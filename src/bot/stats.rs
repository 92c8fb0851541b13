//! Runtime statistics for the bot.

use rust_decimal::Decimal;

/// Runtime statistics for the bot.
#[derive(Debug, Clone, Default)]
pub struct Stats {
    pub cycles: u64,
    pub orders_submitted: u64,
    pub orders_filled: u64,
    pub orders_cancelled: u64,
    pub orders_replaced: u64,
    pub deals_completed: u64,
    pub deals_recovered: u64,
    pub realized_profit: Decimal,
}
