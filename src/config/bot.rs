//! Per-bot configuration: pair, strategy selection and strategy options.

use rust_decimal::Decimal;
use serde::Deserialize;

/// Which decision policy a bot runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    /// Accumulation-only: buys on a schedule, never sells.
    Stacker,
    /// Deal-based: entry plus safety ladder plus take-profit.
    Trader,
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyKind::Stacker => write!(f, "stacker"),
            StrategyKind::Trader => write!(f, "trader"),
        }
    }
}

/// Buying schedule for a Stacker bot.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ScheduleOptions {
    /// Buy every `frequency_hours`, at most `max_orders_per_day` fills
    /// per calendar day.
    Recurring {
        frequency_hours: u32,
        #[serde(default = "default_max_orders_per_day")]
        max_orders_per_day: u32,
    },
    /// Buy once a month on the given day (clamped to the month's end).
    Monthly { day: u32 },
}

fn default_max_orders_per_day() -> u32 {
    1
}

/// Safety-ladder parameters for a Trader bot.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DealOptions {
    /// Quote size of the entry market buy.
    pub initial_order_size: Decimal,
    /// Quote size of the first safety order.
    pub safety_order_size: Decimal,
    /// Ladder depth.
    pub max_safety_orders: u32,
    /// Price deviation of the first safety order below the entry.
    pub price_deviation: Decimal,
    /// Geometric factor applied to the deviation per step.
    pub step_scale: Decimal,
    /// Geometric factor applied to the quote size per step.
    pub volume_scale: Decimal,
    /// Profit fraction the take-profit must clear after maker fees.
    pub profit_target: Decimal,
}

/// Settings for a single bot.
#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    /// Account this bot trades on.
    pub account: String,
    /// Trading pair in "base/quote" format.
    pub pair: String,
    /// Decision policy.
    pub strategy: StrategyKind,
    #[serde(default)]
    pub active: bool,
    /// Quote budget per stacker order.
    pub max_volume_quote: Option<Decimal>,
    /// Buys are clamped to a limit at this price when the market trades
    /// above it.
    pub max_price: Option<Decimal>,
    /// Stacker schedule; required when `strategy = stacker`.
    pub schedule: Option<ScheduleOptions>,
    /// Trader ladder options; required when `strategy = trader`.
    pub deal: Option<DealOptions>,
}
