//! Pure planning computations: deal ladders and accumulation schedules.

mod deal;
mod schedule;

pub use deal::{
    cost_basis, profit_target, realized_profit, volumes_balanced, DealMetrics, DealPlanner,
    DealProposal,
};
pub use schedule::SchedulePlanner;

use rust_decimal::Decimal;
use thiserror::Error;

/// Planning errors. Any of these aborts the whole planning call; the
/// caller must not apply a partially planned deal.
#[derive(Debug, Error)]
pub enum PlannerError {
    /// The supplied market price cannot produce a ladder.
    #[error("invalid current price: {0}")]
    InvalidPrice(Decimal),

    /// A ladder step produced a non-positive price or a zero volume.
    #[error("ladder step {index} produced a non-positive price or zero volume")]
    LadderStep { index: usize },

    /// The deal has no executed buy order to anchor the ladder on.
    #[error("deal {0} has no executed buy orders")]
    NoExecutedBuys(String),

    /// The deal has no closed buy volume, so a cost basis is undefined.
    #[error("deal {0} has no closed buy volume for a cost basis")]
    EmptyCostBasis(String),

    /// The schedule options cannot produce a valid open date.
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),
}
