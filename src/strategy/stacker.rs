//! Accumulation-only strategy: buy on a schedule, convert stale limit
//! orders to market fills before the day ends, never sell.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::config::{BotConfig, ScheduleOptions, StrategyKind};
use crate::domain::{Action, DealBook, OrderStatus, OrderTable, OrderType};
use crate::planner::SchedulePlanner;

use super::{balance_check, CycleContext, CycleOutcome, Proposal, Strategy, StrategyError};

/// StackerStrategy fills a rolling plan of scheduled market buys.
pub struct StackerStrategy {
    bot_id: String,
    settings: BotConfig,
}

impl StackerStrategy {
    pub fn new(bot_id: &str, settings: BotConfig) -> Self {
        Self {
            bot_id: bot_id.to_string(),
            settings,
        }
    }

    fn schedule(&self) -> &ScheduleOptions {
        self.settings
            .schedule
            .as_ref()
            .expect("stacker config validated at load")
    }

    fn order_budget(&self) -> Decimal {
        self.settings.max_volume_quote.unwrap_or_default()
    }

    /// True when every planned order has executed, so the plan needs its
    /// next entry.
    fn requires_new_planned_order(&self, orders: &OrderTable) -> bool {
        orders.for_bot(&self.bot_id).iter().all(|o| o.is_closed())
    }

    /// Scan phase: classify one order, raising at most one proposal.
    fn classify_order(
        &self,
        ctx: &mut CycleContext<'_>,
        outcome: &mut CycleOutcome,
        order_id: &str,
        remote_is_open: Option<bool>,
        proposals: &mut Vec<Proposal>,
    ) {
        let Some(order) = ctx.orders.get(order_id) else {
            return;
        };

        match (order.status(), remote_is_open) {
            (OrderStatus::Planned, None) => {
                let hours = order.hours_elapsed(ctx.now, false);
                if ctx.now > order.open_date {
                    outcome.log(format!(
                        "[{}] needs to be executed, {:.1} hours past",
                        order_id, hours
                    ));
                    proposals.push(Proposal::SubmitPlanned {
                        order_id: order_id.to_string(),
                    });
                } else {
                    outcome.log(format!(
                        "[{}] no action needed for {:.1} hours (next action on {})",
                        self.bot_id,
                        hours,
                        order.open_date.format("%Y-%m-%d %H:%M"),
                    ));
                }
            }
            (OrderStatus::Pending, Some(true)) => {
                outcome.log(format!("[{}] still pending", order_id));
                let cutoff = daily_cutoff(order.open_date);
                if ctx.now >= cutoff {
                    // The intent is "fill today at a reasonable price",
                    // not indefinite patience.
                    outcome.log(format!(
                        "[{}] stale past {}, converting to market",
                        order_id,
                        cutoff.format("%H:%M"),
                    ));
                    if let Some(order) = ctx.orders.get_mut(order_id) {
                        order.set_order_type(OrderType::Market);
                    }
                    proposals.push(Proposal::ReplacePending {
                        order_id: order_id.to_string(),
                    });
                } else {
                    outcome.log(format!(
                        "waiting until {} before replacing [{}]",
                        cutoff.format("%Y-%m-%d %H:%M"),
                        order_id,
                    ));
                }
            }
            (OrderStatus::Executed, _) | (OrderStatus::Cancelled, _) => {}
            (status, remote) => {
                // Never silently drop state the classifier cannot place.
                outcome.warn(format!(
                    "[{}] unexpected state: local {} remote open={:?}, skipping",
                    order_id, status, remote
                ));
            }
        }
    }

    /// Checks whether the plan is exhausted and schedules its next order.
    fn check_plan(
        &self,
        ctx: &mut CycleContext<'_>,
        outcome: &mut CycleOutcome,
        proposals: &mut Vec<Proposal>,
    ) -> Result<(), StrategyError> {
        if !self.requires_new_planned_order(ctx.orders) {
            outcome.log(format!("[{}] does not require a new order", self.bot_id));
            return Ok(());
        }

        let orders = ctx.orders.for_bot(&self.bot_id);
        let allowed = match *self.schedule() {
            ScheduleOptions::Recurring {
                max_orders_per_day, ..
            } => {
                let today = orders
                    .iter()
                    .filter(|o| {
                        o.close_date()
                            .map(|d| d.date_naive() == ctx.now.date_naive())
                            .unwrap_or(false)
                    })
                    .count();
                if today > 0 {
                    outcome.log(format!("{} orders executed today for {}", today, self.bot_id));
                }
                (today as u32) < max_orders_per_day
            }
            ScheduleOptions::Monthly { .. } => {
                // An execution this month only moves the next order to
                // the following month; planning continues.
                true
            }
        };

        if !allowed {
            outcome.log(format!(
                "[{}] daily order limit reached, planning deferred",
                self.bot_id
            ));
            return Ok(());
        }

        let last_executed = orders
            .iter()
            .filter(|o| o.is_closed())
            .max_by_key(|o| o.close_date())
            .map(|o| (*o).clone());

        let planner = SchedulePlanner::new(
            &self.bot_id,
            &self.settings.account,
            &self.settings.pair,
            self.schedule(),
            self.order_budget(),
        );
        let order = planner.propose_next(last_executed.as_ref(), ctx.now)?;
        order.validate()?;
        outcome.log(format!("[{}] requires a new order: {}", self.bot_id, order));

        proposals.push(Proposal::SubmitPlanned {
            order_id: order.id.clone(),
        });
        ctx.orders.insert(order);
        Ok(())
    }

    /// Validation pass: turn surviving proposals into actions.
    fn check_proposals(
        &self,
        ctx: &mut CycleContext<'_>,
        outcome: &mut CycleOutcome,
        proposals: Vec<Proposal>,
    ) -> Result<(), StrategyError> {
        for proposal in proposals {
            outcome.proposals.push(proposal.name());
            match &proposal {
                Proposal::SubmitPlanned { order_id } => {
                    let Some(order) = ctx.orders.get(order_id) else {
                        continue;
                    };
                    let budget = order.volume_quote().unwrap_or_else(|| self.order_budget());
                    let scheduled_today = order.is_scheduled_for(ctx.now) && order.is_planned();
                    if balance_check(ctx, outcome, budget) && scheduled_today {
                        let action = self.submission_action(ctx, outcome, order_id)?;
                        outcome.actions.push(action);
                    } else if order.is_active() {
                        outcome.log(format!("[{}] is already planned or active", order_id));
                    } else {
                        outcome.log(format!("[{}] cannot be submitted", order_id));
                    }
                }
                Proposal::ReplacePending { order_id } => {
                    let Some(order) = ctx.orders.get(order_id).cloned() else {
                        continue;
                    };
                    let budget = order.volume_quote().unwrap_or_else(|| self.order_budget());
                    if !balance_check(ctx, outcome, budget) {
                        outcome.log(format!("[{}] cannot be replaced now", order_id));
                        continue;
                    }
                    if let Some(txid) = order.txid() {
                        if ctx.client.has_local_order(txid) {
                            outcome.actions.push(Action::cancel(&order, &order.account));
                        }
                    }
                    let action = Action::market(&order, &ctx.pair, &order.account)?;
                    action.perform_checks()?;
                    outcome.actions.push(action);
                }
                other => {
                    outcome.warn(format!("unrecognised proposal: {}", other.name()));
                }
            }
        }
        Ok(())
    }

    /// Builds the submission for a due planned order, sizing it at the
    /// current price. Above the configured ceiling the buy is clamped to
    /// a limit order at the ceiling instead of a market order.
    fn submission_action(
        &self,
        ctx: &mut CycleContext<'_>,
        outcome: &mut CycleOutcome,
        order_id: &str,
    ) -> Result<Action, StrategyError> {
        let order = ctx
            .orders
            .get_mut(order_id)
            .ok_or_else(|| StrategyError::Inconsistent(format!("order {} vanished", order_id)))?;

        let budget = order.volume_quote().unwrap_or_default();
        let volume = ctx
            .pair
            .clamp_volume(ctx.pair.round_volume(budget / ctx.current_price));

        let clamp_price = match self.settings.max_price {
            Some(max_price) if ctx.current_price > max_price => Some(max_price),
            _ => None,
        };

        let action = if let Some(max_price) = clamp_price {
            outcome.log(format!(
                "[{}] above max price, setting limit at {}",
                order_id, max_price
            ));
            order.set_order_type(OrderType::Limit);
            order.size_planned(volume, Some(ctx.pair.round_price(max_price)))?;
            Action::limit(order, &ctx.pair, &self.settings.account)?
        } else {
            order.set_order_type(OrderType::Market);
            order.size_planned(volume, None)?;
            Action::market(order, &ctx.pair, &self.settings.account)?
        };

        action.perform_checks()?;
        Ok(action)
    }
}

#[async_trait]
impl Strategy for StackerStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Stacker
    }

    fn bot_id(&self) -> &str {
        &self.bot_id
    }

    fn has_active_orders(
        &self,
        orders: &OrderTable,
        _deals: &DealBook,
        now: DateTime<Utc>,
    ) -> bool {
        orders
            .for_bot(&self.bot_id)
            .iter()
            .any(|o| (o.is_planned() && o.is_scheduled_for(now)) || o.is_active())
    }

    fn wants_cycle(&self, orders: &OrderTable, deals: &DealBook, now: DateTime<Utc>) -> bool {
        self.has_active_orders(orders, deals, now) || self.requires_new_planned_order(orders)
    }

    async fn decide(&self, ctx: &mut CycleContext<'_>) -> Result<CycleOutcome, StrategyError> {
        let mut outcome = CycleOutcome::default();
        let order_ids: Vec<String> = ctx
            .orders
            .for_bot(&self.bot_id)
            .iter()
            .map(|o| o.id.clone())
            .collect();

        outcome.log(format!(
            "processing [{}]: {} orders in plan",
            self.bot_id,
            order_ids.len()
        ));

        let mut proposals = Vec::new();
        for order_id in &order_ids {
            // One failing order is skipped; it must not abort the batch.
            let remote_is_open = match self.remote_state(ctx, order_id).await {
                Ok(state) => state,
                Err(e) => {
                    outcome.warn(format!("[{}] exchange lookup failed: {}", order_id, e));
                    continue;
                }
            };
            self.classify_order(ctx, &mut outcome, order_id, remote_is_open, &mut proposals);
        }

        self.check_plan(ctx, &mut outcome, &mut proposals)?;
        self.check_proposals(ctx, &mut outcome, proposals)?;

        Ok(outcome)
    }
}

impl StackerStrategy {
    /// Fetches the exchange's view of one order: `None` when the order
    /// was never submitted, otherwise whether it is still open.
    async fn remote_state(
        &self,
        ctx: &CycleContext<'_>,
        order_id: &str,
    ) -> Result<Option<bool>, StrategyError> {
        let txid = ctx
            .orders
            .get(order_id)
            .and_then(|o| o.txid().map(str::to_string));
        let Some(txid) = txid else {
            return Ok(None);
        };
        let remote = ctx.client.get_exchange_order(&txid, false).await?;
        Ok(remote.map(|o| o.is_open()))
    }
}

/// The time of day after which a pending stacker order is re-submitted
/// as a market order: 23:30 on its open date.
fn daily_cutoff(open_date: DateTime<Utc>) -> DateTime<Utc> {
    open_date
        .date_naive()
        .and_hms_opt(23, 30, 0)
        .map(|naive| naive.and_utc())
        .unwrap_or(open_date)
}
