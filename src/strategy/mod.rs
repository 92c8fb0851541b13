//! Strategy engine: the per-cycle decision loop shared by the two
//! trading policies.
//!
//! A strategy never acts while it scans. Each cycle it classifies every
//! relevant order, records [`Proposal`]s into an ordered list, and only
//! then validates the whole list against balances and schedules, turning
//! the survivors into [`Action`]s. The caller executes the actions.

mod recovery;
mod stacker;
mod trader;

pub use stacker::StackerStrategy;
pub use trader::TraderStrategy;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{BotConfig, StrategyKind};
use crate::domain::{
    Action, DealBook, ExchangeOrder, OrderTable, PairData, TransitionError, ValidationError,
};
use crate::exchanges::{ExchangeClient, ExchangeError};
use crate::planner::PlannerError;

/// Strategy errors.
#[derive(Debug, Error)]
pub enum StrategyError {
    /// A proposed action failed validation. This is a planning bug, not
    /// a transient exchange issue, and aborts the cycle.
    #[error("invalid action: {0}")]
    InvalidAction(#[from] ValidationError),

    /// Planning failed for the current deal.
    #[error(transparent)]
    Planner(#[from] PlannerError),

    #[error("exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    /// Local state contradicts itself.
    #[error("inconsistent state: {0}")]
    Inconsistent(String),
}

impl From<TransitionError> for StrategyError {
    fn from(e: TransitionError) -> Self {
        StrategyError::Inconsistent(e.to_string())
    }
}

/// One intent raised during the scan phase. Proposals are collected in
/// raise order and validated in a single pass per cycle, so detection
/// stays decoupled from execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Proposal {
    /// A planned order whose open date has been reached.
    SubmitPlanned { order_id: String },
    /// A pending order stale past the daily cutoff, to be cancelled and
    /// re-submitted as a market order.
    ReplacePending { order_id: String },
    /// The next rung of a deal's safety ladder.
    SubmitSafetyOrder { order_id: String, deal_id: String },
    /// A deal is missing its take-profit sell.
    SubmitTakeProfit { order_id: String, deal_id: String },
    /// A live take-profit no longer matches the held balance.
    EditTakeProfit { order_id: String },
}

impl Proposal {
    pub fn name(&self) -> &'static str {
        match self {
            Proposal::SubmitPlanned { .. } => "submit_planned_order",
            Proposal::ReplacePending { .. } => "replace_pending_order",
            Proposal::SubmitSafetyOrder { .. } => "submit_safety_order",
            Proposal::SubmitTakeProfit { .. } => "submit_take_profit",
            Proposal::EditTakeProfit { .. } => "edit_take_profit",
        }
    }
}

/// Everything one decision cycle may read or mutate.
///
/// `decide` must not be invoked concurrently for the same bot; the
/// coordinator guarantees one cycle runs to completion before the next.
pub struct CycleContext<'a> {
    pub bot_id: &'a str,
    pub settings: &'a BotConfig,
    pub pair: PairData,
    pub now: DateTime<Utc>,
    pub current_price: Decimal,
    pub maker_fee: Decimal,
    pub taker_fee: Decimal,
    pub client: &'a dyn ExchangeClient,
    pub orders: &'a mut OrderTable,
    pub deals: &'a mut DealBook,
}

/// What one cycle decided: actions to execute, the audit trail, and the
/// deal-level events the coordinator should report.
#[derive(Debug, Default)]
pub struct CycleOutcome {
    pub actions: Vec<Action>,
    pub messages: Vec<String>,
    /// Names of the proposals raised this cycle.
    pub proposals: Vec<&'static str>,
    /// Deals closed this cycle with their realized profit.
    pub completed_deals: Vec<(String, Decimal)>,
    /// Deal rebuilt from exchange history, if recovery ran.
    pub recovered_deal: Option<String>,
}

impl CycleOutcome {
    /// Records a status line. Every state-changing decision logs one,
    /// even when no action is taken, so the trail can be audited later.
    pub fn log(&mut self, message: impl Into<String>) {
        let message = message.into();
        info!("{}", message);
        self.messages.push(message);
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("{}", message);
        self.messages.push(message);
    }

    /// The cycle's human-readable status report.
    pub fn status(&self) -> String {
        self.messages.join("\n")
    }
}

/// A decision policy. Selected per bot by [`StrategyKind`].
#[async_trait]
pub trait Strategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    fn bot_id(&self) -> &str;

    /// True while the bot has orders or deals that need watching.
    fn has_active_orders(&self, orders: &OrderTable, deals: &DealBook, now: DateTime<Utc>)
        -> bool;

    /// Whether the coordinator should run a cycle now.
    fn wants_cycle(&self, orders: &OrderTable, deals: &DealBook, now: DateTime<Utc>) -> bool {
        self.has_active_orders(orders, deals, now)
    }

    /// Runs one decision cycle.
    async fn decide(&self, ctx: &mut CycleContext<'_>) -> Result<CycleOutcome, StrategyError>;
}

/// Checks that the account's free quote balance covers `volume_quote`.
/// Advisory: a failed check defers the order to the next cycle.
pub(crate) fn balance_check(
    ctx: &CycleContext<'_>,
    outcome: &mut CycleOutcome,
    volume_quote: Decimal,
) -> bool {
    let available = ctx.client.balance(&ctx.pair.quote);
    let sufficient = available >= volume_quote;
    let base_volume = if ctx.current_price.is_zero() {
        Decimal::ZERO
    } else {
        ctx.pair.round_volume(volume_quote / ctx.current_price)
    };
    outcome.log(format!(
        "order for {} {} ({} {}) {} be executed at current market price",
        ctx.pair.round_price(volume_quote),
        ctx.pair.quote,
        base_volume,
        ctx.pair.base,
        if sufficient { "can" } else { "cannot" },
    ));
    outcome.log(format!(
        "{}: {} available: {} {}",
        ctx.pair.id,
        ctx.pair.round_price(ctx.current_price),
        ctx.pair.round_price(available),
        ctx.pair.quote,
    ));
    sufficient
}

/// Checks that the held base balance covers a sell volume.
pub(crate) fn volume_check(
    ctx: &CycleContext<'_>,
    outcome: &mut CycleOutcome,
    volume: Decimal,
) -> bool {
    let available = ctx.client.balance(&ctx.pair.base);
    let sufficient = available >= volume;
    outcome.log(format!(
        "{}: requested {} available: {} {}",
        ctx.pair.id,
        ctx.pair.round_volume(volume),
        ctx.pair.round_volume(available),
        ctx.pair.base,
    ));
    sufficient
}

/// Resolves the exchange fills behind a deal's executed orders, in the
/// order the ids appear.
pub(crate) fn resolve_fills(ctx: &CycleContext<'_>, ids: &[String]) -> Vec<ExchangeOrder> {
    ids.iter()
        .filter_map(|id| ctx.orders.get(id))
        .filter(|order| order.is_closed())
        .filter_map(|order| order.txid().and_then(|txid| ctx.client.local_order(txid)))
        .collect()
}

#[cfg(test)]
mod tests;
