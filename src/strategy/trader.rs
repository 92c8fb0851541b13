//! Deal-based strategy: entry buy, geometric safety ladder, one
//! take-profit sell per deal.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::config::{BotConfig, DealOptions, StrategyKind};
use crate::domain::{Action, DealBook, OrderSide, OrderStatus, OrderTable};
use crate::planner::{realized_profit, volumes_balanced, DealMetrics, DealPlanner};

use super::{
    balance_check, recovery, resolve_fills, volume_check, CycleContext, CycleOutcome, Proposal,
    Strategy, StrategyError,
};

/// TraderStrategy runs DCA deals: it keeps the safety ladder filled, the
/// take-profit sized to the held balance, and closes deals once the sell
/// side has executed and volumes balance.
pub struct TraderStrategy {
    bot_id: String,
    settings: BotConfig,
}

impl TraderStrategy {
    pub fn new(bot_id: &str, settings: BotConfig) -> Self {
        Self {
            bot_id: bot_id.to_string(),
            settings,
        }
    }

    fn options(&self) -> &DealOptions {
        self.settings
            .deal
            .as_ref()
            .expect("trader config validated at load")
    }

    fn planner<'p>(&'p self, ctx: &'p CycleContext<'_>) -> DealPlanner<'p> {
        DealPlanner::new(
            &self.bot_id,
            &self.settings.account,
            self.options(),
            &ctx.pair,
            ctx.maker_fee,
            ctx.taker_fee,
        )
    }

    /// Starts a fresh DCA cycle: plans the ladder, balance-checks it and
    /// submits the buy side. The take-profit is created later, once
    /// something has actually been bought.
    async fn start_deal(
        &self,
        ctx: &mut CycleContext<'_>,
        outcome: &mut CycleOutcome,
    ) -> Result<(), StrategyError> {
        let index = ctx.deals.next_index(&self.bot_id);
        let planner = self.planner(ctx);
        let proposal = planner.propose_deal(
            ctx.current_price,
            self.options().max_safety_orders,
            index,
            ctx.now,
        )?;

        if !balance_check(ctx, outcome, proposal.balance_required) {
            // Advisory only: wait for funds instead of failing the cycle.
            outcome.log(format!(
                "[{}] insufficient balance to start deal {} ({} {} required), deferring",
                self.bot_id,
                proposal.deal.id,
                ctx.pair.round_price(proposal.balance_required),
                ctx.pair.quote,
            ));
            return Ok(());
        }

        outcome.log(format!(
            "[{}] starting deal {} at {}",
            self.bot_id, proposal.deal.id, ctx.current_price
        ));

        for order in proposal
            .orders
            .into_iter()
            .filter(|o| o.side == OrderSide::Buy)
        {
            let action = Action::submit(&order, &ctx.pair, &self.settings.account)?;
            action.perform_checks()?;
            ctx.orders.insert(order);
            outcome.actions.push(action);
        }
        ctx.deals.insert(proposal.deal);
        Ok(())
    }

    /// Closes the deal once every sell has executed and the bought and
    /// sold volumes balance. Idempotent: an already-closed deal reports
    /// closed without recomputing anything.
    fn check_completion(
        &self,
        ctx: &mut CycleContext<'_>,
        outcome: &mut CycleOutcome,
        deal_id: &str,
    ) -> Result<bool, StrategyError> {
        let Some(deal) = ctx.deals.get(deal_id) else {
            return Err(StrategyError::Inconsistent(format!(
                "deal {} vanished mid-cycle",
                deal_id
            )));
        };
        if !deal.is_open() {
            return Ok(true);
        }

        let sells_executed = !deal.sell_orders.is_empty()
            && deal
                .sell_orders
                .iter()
                .all(|id| ctx.orders.get(id).map(|o| o.is_closed()).unwrap_or(false));
        if !sells_executed {
            return Ok(false);
        }

        let buy_fills = resolve_fills(ctx, &deal.buy_orders.clone());
        let sell_fills = resolve_fills(ctx, &deal.sell_orders.clone());
        if !volumes_balanced(&buy_fills, &sell_fills, ctx.pair.min_volume) {
            outcome.warn(format!(
                "[{}] sells executed but volumes do not balance yet",
                deal_id
            ));
            return Ok(false);
        }

        let basis = crate::planner::cost_basis(&buy_fills)
            .map(|(_, basis)| basis)
            .unwrap_or_default();
        let profit = realized_profit(&sell_fills, basis);
        outcome.log(format!(
            "[{}] deal completed, profit: {} {}",
            deal_id,
            ctx.pair.round_price(profit),
            ctx.pair.quote,
        ));

        if let Some(deal) = ctx.deals.get_mut(deal_id) {
            deal.close();
        }
        outcome.completed_deals.push((deal_id.to_string(), profit));
        Ok(true)
    }

    /// Scan phase for one deal's orders.
    fn classify_orders(
        &self,
        ctx: &mut CycleContext<'_>,
        outcome: &mut CycleOutcome,
        deal_id: &str,
        proposals: &mut Vec<Proposal>,
    ) {
        let order_ids: Vec<String> = ctx
            .deals
            .get(deal_id)
            .map(|d| d.order_ids().cloned().collect())
            .unwrap_or_default();

        for order_id in order_ids {
            let Some(order) = ctx.orders.get(&order_id) else {
                continue;
            };
            match order.status() {
                OrderStatus::Planned => {
                    if ctx.now > order.open_date {
                        outcome.log(format!(
                            "[{}] needs to be executed, {:.1} hours past",
                            order_id,
                            order.hours_elapsed(ctx.now, false)
                        ));
                        proposals.push(Proposal::SubmitPlanned { order_id });
                    } else {
                        outcome.log(format!(
                            "[{}] scheduled for {}",
                            order_id,
                            order.open_date.format("%Y-%m-%d %H:%M")
                        ));
                    }
                }
                OrderStatus::Pending => {
                    outcome.log(format!(
                        "[{}] {} {} order is still pending",
                        order_id, order.order_type, order.side
                    ));
                }
                OrderStatus::Executed => {
                    if let Some(close_date) = order.close_date() {
                        outcome.log(format!(
                            "[{}] {} {} order was filled on {}",
                            order_id,
                            order.order_type,
                            order.side,
                            close_date.format("%Y-%m-%d %H:%M"),
                        ));
                    }
                }
                OrderStatus::Cancelled => {}
            }
        }
    }

    /// Deal-level integrity checks: prune dangling references, keep the
    /// safety ladder supplied and the take-profit present and sized to
    /// the held balance.
    fn check_deal_integrity(
        &self,
        ctx: &mut CycleContext<'_>,
        outcome: &mut CycleOutcome,
        deal_id: &str,
        metrics: &DealMetrics,
        proposals: &mut Vec<Proposal>,
    ) -> Result<(), StrategyError> {
        let Some(deal) = ctx.deals.get_mut(deal_id) else {
            return Ok(());
        };
        let pruned = deal.prune_missing(ctx.orders);
        for id in pruned {
            outcome.warn(format!(
                "[{}] pruned unknown order reference {}",
                deal_id, id
            ));
        }

        let deal = ctx.deals.get(deal_id).cloned().ok_or_else(|| {
            StrategyError::Inconsistent(format!("deal {} vanished mid-cycle", deal_id))
        })?;

        // Safety ladder: a new rung is due once every current buy has
        // filled and depth remains.
        let max_safety = self.options().max_safety_orders;
        if (deal.buy_orders.len() as u32) < max_safety + 1 {
            outcome.log(format!(
                "{} more safety orders possible for [{}]",
                max_safety + 1 - deal.buy_orders.len() as u32,
                deal_id,
            ));
            let all_buys_closed = deal
                .buy_orders
                .iter()
                .all(|id| ctx.orders.get(id).map(|o| o.is_closed()).unwrap_or(false));
            if all_buys_closed {
                outcome.warn(format!("[{}] requires a new limit buy order", deal_id));
                let buy_fills = resolve_fills(ctx, &deal.buy_orders);
                let planner = self.planner(ctx);
                if let Some(order) =
                    planner.calculate_safety_order(&deal, &buy_fills, ctx.now)?
                {
                    proposals.push(Proposal::SubmitSafetyOrder {
                        order_id: order.id.clone(),
                        deal_id: deal_id.to_string(),
                    });
                    if let Some(deal) = ctx.deals.get_mut(deal_id) {
                        deal.push_buy(order.id.clone());
                    }
                    ctx.orders.insert(order);
                }
            } else if let Some(open_buy) = deal
                .buy_orders
                .iter()
                .find(|id| ctx.orders.get(id).map(|o| !o.is_closed()).unwrap_or(false))
            {
                outcome.log(format!(
                    "[{}] already has an open buy order: {}",
                    deal_id, open_buy
                ));
            }
        } else {
            outcome.log(format!("no more safety orders possible for [{}]", deal_id));
        }

        // Take-profit: must exist while the deal holds inventory, and
        // must match the currently held balance.
        let deal = ctx.deals.get(deal_id).cloned().unwrap();
        let pending_sell = deal
            .sell_orders
            .iter()
            .filter_map(|id| ctx.orders.get(id))
            .find(|o| o.is_active())
            .cloned();

        let held = ctx.client.balance(&ctx.pair.base);
        match pending_sell {
            None => {
                outcome.warn(format!("[{}] missing take-profit order", deal_id));
                let planner = self.planner(ctx);
                let mut order = planner.propose_take_profit_order(metrics, held, ctx.now)?;
                // Never price the exit below the market.
                if order.price().unwrap_or_default() < ctx.current_price {
                    let volume = order.volume().unwrap_or_default();
                    order.size_planned(volume, Some(ctx.pair.round_price(ctx.current_price)))?;
                }
                proposals.push(Proposal::SubmitTakeProfit {
                    order_id: order.id.clone(),
                    deal_id: deal_id.to_string(),
                });
                if let Some(deal) = ctx.deals.get_mut(deal_id) {
                    deal.push_sell(order.id.clone());
                }
                ctx.orders.insert(order);
            }
            Some(sell) if sell.volume() != Some(held) && held > Decimal::ZERO => {
                outcome.warn(format!(
                    "[{}] take-profit volume {} does not match held balance {}",
                    deal_id,
                    sell.volume().unwrap_or_default(),
                    ctx.pair.round_volume(held),
                ));
                proposals.push(Proposal::EditTakeProfit {
                    order_id: sell.id.clone(),
                });
            }
            Some(_) => {}
        }

        Ok(())
    }

    /// Validation pass: one sweep over everything the scan proposed.
    fn check_proposals(
        &self,
        ctx: &mut CycleContext<'_>,
        outcome: &mut CycleOutcome,
        metrics: Option<&DealMetrics>,
        proposals: Vec<Proposal>,
    ) -> Result<(), StrategyError> {
        for proposal in proposals {
            outcome.proposals.push(proposal.name());
            match &proposal {
                Proposal::SubmitPlanned { order_id }
                | Proposal::SubmitSafetyOrder { order_id, .. }
                | Proposal::SubmitTakeProfit { order_id, .. } => {
                    let Some(order) = ctx.orders.get(order_id).cloned() else {
                        continue;
                    };
                    let submittable = match order.side {
                        OrderSide::Buy => {
                            balance_check(ctx, outcome, order.volume_quote().unwrap_or_default())
                        }
                        OrderSide::Sell => {
                            volume_check(ctx, outcome, order.volume().unwrap_or_default())
                        }
                    } && order.is_scheduled_for(ctx.now);

                    if submittable {
                        let action = Action::submit(&order, &ctx.pair, &self.settings.account)?;
                        action.perform_checks()?;
                        outcome.actions.push(action);
                    } else if order.is_active() {
                        outcome.log(format!("[{}] is already planned or active", order_id));
                    } else {
                        outcome.log(format!("[{}] cannot be submitted", order_id));
                    }
                }
                Proposal::EditTakeProfit { order_id } => {
                    let Some(order) = ctx.orders.get(order_id) else {
                        continue;
                    };
                    let Some(metrics) = metrics else {
                        continue;
                    };
                    let held = ctx.client.balance(&ctx.pair.base);
                    let mut edited = order.clone();
                    edited.edited(
                        ctx.pair.round_volume(held),
                        Some(ctx.pair.round_price(metrics.target_price)),
                    )?;
                    let action = Action::replace(&edited, &ctx.pair, &self.settings.account);
                    action.perform_checks()?;
                    outcome.warn(format!("[{}] replacing take-profit order", order_id));
                    outcome.actions.push(action);
                }
                Proposal::ReplacePending { order_id } => {
                    outcome.warn(format!("unrecognised proposal for [{}]", order_id));
                }
            }
        }
        Ok(())
    }

    /// Status report for an open deal: cost basis, target and distance.
    fn report_deal_status(
        &self,
        ctx: &CycleContext<'_>,
        outcome: &mut CycleOutcome,
        deal_id: &str,
        metrics: &DealMetrics,
    ) {
        outcome.log(format!(
            "[{}] cost basis: {} average price: {}",
            deal_id,
            ctx.pair.round_price(metrics.cost_basis),
            ctx.pair.round_price(metrics.average_price),
        ));
        let distance = if metrics.target_price.is_zero() {
            Decimal::ZERO
        } else {
            (Decimal::ONE_HUNDRED * (ctx.current_price - metrics.target_price))
                / metrics.target_price
        };
        outcome.log(format!(
            "current price: {} target: {} ({:.2}%)",
            ctx.pair.round_price(ctx.current_price),
            ctx.pair.round_price(metrics.target_price),
            distance,
        ));
    }
}

#[async_trait]
impl Strategy for TraderStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Trader
    }

    fn bot_id(&self) -> &str {
        &self.bot_id
    }

    fn has_active_orders(
        &self,
        _orders: &OrderTable,
        deals: &DealBook,
        _now: DateTime<Utc>,
    ) -> bool {
        !deals.open_deals(&self.bot_id).is_empty()
    }

    /// A trader always wants its cycle: without an open deal it must
    /// still detect drift (held balance) or start the next deal.
    fn wants_cycle(&self, _orders: &OrderTable, _deals: &DealBook, _now: DateTime<Utc>) -> bool {
        true
    }

    async fn decide(&self, ctx: &mut CycleContext<'_>) -> Result<CycleOutcome, StrategyError> {
        let mut outcome = CycleOutcome::default();
        let open_deals = ctx.deals.open_deals(&self.bot_id);

        if open_deals.is_empty() {
            let held = ctx.client.balance(&ctx.pair.base);
            if held > ctx.pair.min_volume {
                outcome.warn(format!(
                    "invalid state: non-zero {} balance with no open deal, likely a previous deal was not closed correctly",
                    ctx.pair.base
                ));
                recovery::recover_deal(ctx, &mut outcome).await?;
                return Ok(outcome);
            }
            outcome.log(format!("[{}] no active open deals", self.bot_id));
            self.start_deal(ctx, &mut outcome).await?;
            return Ok(outcome);
        }

        for deal_id in open_deals {
            // Per-deal proposal list, validated before the next deal is
            // scanned (mirrors the flag lifecycle of the decision loop).
            let mut proposals = Vec::new();
            outcome.log(format!("processing [{}]: {}", self.bot_id, deal_id));

            match self.check_completion(ctx, &mut outcome, &deal_id) {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    outcome.warn(format!("[{}] completion check failed: {}", deal_id, e));
                    continue;
                }
            }

            self.classify_orders(ctx, &mut outcome, &deal_id, &mut proposals);

            // Planning errors are fatal to this deal's cycle only.
            let buy_ids: Vec<String> = ctx
                .deals
                .get(&deal_id)
                .map(|d| d.buy_orders.clone())
                .unwrap_or_default();
            let buy_fills = resolve_fills(ctx, &buy_ids);
            let metrics = {
                let deal = ctx.deals.get(&deal_id).cloned();
                match deal {
                    Some(deal) => match self.planner(ctx).deal_metrics(&deal, &buy_fills) {
                        Ok(metrics) => Some(metrics),
                        Err(e) => {
                            outcome.warn(format!("[{}] no deal metrics yet: {}", deal_id, e));
                            None
                        }
                    },
                    None => None,
                }
            };

            if let Some(metrics) = &metrics {
                self.report_deal_status(ctx, &mut outcome, &deal_id, metrics);
                if let Err(e) =
                    self.check_deal_integrity(ctx, &mut outcome, &deal_id, metrics, &mut proposals)
                {
                    outcome.warn(format!("[{}] integrity check failed: {}", deal_id, e));
                }
            }

            self.check_proposals(ctx, &mut outcome, metrics.as_ref(), proposals)?;
        }

        Ok(outcome)
    }
}
