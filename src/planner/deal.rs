//! Deal planning: safety-order ladders, cost basis and profit targets.
//!
//! Everything here is pure computation from configuration plus a current
//! price; submission and state changes belong to the strategy engine.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::config::DealOptions;
use crate::domain::{Deal, ExchangeOrder, Order, OrderSide, OrderType, PairData};

use super::PlannerError;

/// Margin applied below the observed price for the entry market buy, so
/// the sized volume survives small upward slippage.
fn slippage_margin() -> Decimal {
    Decimal::new(5, 4) // 0.0005
}

/// A fully planned deal: the orders to submit, the deal referencing the
/// buy ids, and the quote balance the buys will consume.
///
/// Callers must balance-check `balance_required` before submitting
/// anything; the planner never applies a deal partially.
#[derive(Debug)]
pub struct DealProposal {
    pub orders: Vec<Order>,
    pub deal: Deal,
    pub balance_required: Decimal,
}

/// Cost basis and exit target for a deal's executed buys.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DealMetrics {
    /// Volume-weighted average price paid, fees included.
    pub average_price: Decimal,
    /// Total quote spent on the executed buys.
    pub cost_basis: Decimal,
    /// Sell price that clears the profit target after maker fees.
    pub target_price: Decimal,
}

/// Closed-form take-profit price: the sell price at which
/// `price × volume × (1 − fee)` equals
/// `average × volume × (1 + target_profit)`.
pub fn profit_target(
    average_price: Decimal,
    target_profit: Decimal,
    maker_fee: Decimal,
) -> Decimal {
    average_price * (Decimal::ONE + target_profit) / (Decimal::ONE - maker_fee)
}

/// Weighted average price and total cost of the executed buys.
///
/// Orders still open on the exchange contribute to neither the numerator
/// nor the denominator. Returns `None` when nothing has filled yet.
pub fn cost_basis(buy_fills: &[ExchangeOrder]) -> Option<(Decimal, Decimal)> {
    let mut sum_value = Decimal::ZERO;
    let mut sum_volume = Decimal::ZERO;
    for fill in buy_fills.iter().filter(|f| f.is_closed()) {
        sum_value += fill.volume * fill.price + fill.fees;
        sum_volume += fill.volume;
    }
    if sum_volume.is_zero() {
        return None;
    }
    let average_price = sum_value / sum_volume;
    Some((average_price, average_price * sum_volume))
}

/// Realized profit of a deal: executed sell proceeds net of fees, minus
/// the cost basis. The cost basis is subtracted exactly once.
pub fn realized_profit(sell_fills: &[ExchangeOrder], cost_basis: Decimal) -> Decimal {
    let proceeds: Decimal = sell_fills
        .iter()
        .filter(|f| f.is_closed())
        .map(|f| f.volume * f.price - f.fees)
        .sum();
    proceeds - cost_basis
}

/// True when bought and sold volumes match within the pair's minimum
/// tradable volume.
pub fn volumes_balanced(
    buy_fills: &[ExchangeOrder],
    sell_fills: &[ExchangeOrder],
    min_volume: Decimal,
) -> bool {
    let bought: Decimal = buy_fills
        .iter()
        .filter(|f| f.is_closed())
        .map(|f| f.volume)
        .sum();
    let sold: Decimal = sell_fills
        .iter()
        .filter(|f| f.is_closed())
        .map(|f| f.volume)
        .sum();
    (bought - sold).abs() <= min_volume
}

/// DealPlanner derives order ladders for one bot from its deal options
/// and the pair's precision contract.
pub struct DealPlanner<'a> {
    bot_id: &'a str,
    account: &'a str,
    options: &'a DealOptions,
    pair: &'a PairData,
    maker_fee: Decimal,
    taker_fee: Decimal,
}

impl<'a> DealPlanner<'a> {
    pub fn new(
        bot_id: &'a str,
        account: &'a str,
        options: &'a DealOptions,
        pair: &'a PairData,
        maker_fee: Decimal,
        taker_fee: Decimal,
    ) -> Self {
        Self {
            bot_id,
            account,
            options,
            pair,
            maker_fee,
            taker_fee,
        }
    }

    /// Plans a complete new deal at the given price: one entry market
    /// buy, up to `max_safety_orders` limit buys at geometrically scaled
    /// deviations below the entry, and one take-profit sell sized to the
    /// entry volume.
    pub fn propose_deal(
        &self,
        current_price: Decimal,
        max_safety_orders: u32,
        deal_index: u32,
        now: DateTime<Utc>,
    ) -> Result<DealProposal, PlannerError> {
        if current_price <= Decimal::ZERO {
            return Err(PlannerError::InvalidPrice(current_price));
        }

        let entry_price = current_price * (Decimal::ONE - slippage_margin());
        let entry_volume = self
            .pair
            .round_volume(self.options.initial_order_size / entry_price);
        if entry_volume.is_zero() {
            return Err(PlannerError::LadderStep { index: 0 });
        }

        let mut orders = Vec::new();
        orders.push(
            Order::planned(
                self.bot_id,
                self.account,
                &self.pair.id,
                OrderSide::Buy,
                OrderType::Market,
                now,
                self.options.initial_order_size,
            )
            .with_volume(entry_volume)
            .with_fees(self.pair.round_price(self.taker_fee * self.options.initial_order_size)),
        );

        let mut deviation = self.options.price_deviation;
        let mut quote_size = self.options.safety_order_size;
        for i in 0..max_safety_orders {
            let order = self.ladder_order(entry_price, deviation, quote_size, i as usize + 1, now)?;
            orders.push(order);
            deviation *= self.options.step_scale;
            quote_size *= self.options.volume_scale;
        }

        // Take-profit for the entry buy alone; safety-order fills later
        // reshape it through the integrity checks.
        let average_price = entry_price * (Decimal::ONE + self.taker_fee);
        let target_price = self.pair.round_price(profit_target(
            average_price,
            self.options.profit_target,
            self.maker_fee,
        ));
        let sell_quote = self.pair.round_price(target_price * entry_volume);
        orders.push(
            Order::planned(
                self.bot_id,
                self.account,
                &self.pair.id,
                OrderSide::Sell,
                OrderType::Limit,
                now,
                sell_quote,
            )
            .with_price(target_price)
            .with_volume(entry_volume)
            .with_fees(self.pair.round_price(self.maker_fee * sell_quote)),
        );

        let balance_required: Decimal = orders
            .iter()
            .filter(|o| o.side == OrderSide::Buy)
            .map(|o| {
                o.volume_quote().unwrap_or_default()
                    + match &o.state {
                        crate::domain::OrderState::Planned { fees, .. } => {
                            fees.unwrap_or_default()
                        }
                        _ => Decimal::ZERO,
                    }
            })
            .sum();

        let mut deal = Deal::new(self.bot_id, self.account, deal_index);
        for order in orders.iter().filter(|o| o.side == OrderSide::Buy) {
            deal.push_buy(order.id.clone());
        }

        Ok(DealProposal {
            orders,
            deal,
            balance_required,
        })
    }

    /// Computes the next safety order for an open deal by replaying the
    /// ladder from the first fill's price (or the manual override),
    /// advanced by the number of buys the deal already holds.
    ///
    /// Returns `None` once the ladder depth is exhausted.
    pub fn calculate_safety_order(
        &self,
        deal: &Deal,
        buy_fills: &[ExchangeOrder],
        now: DateTime<Utc>,
    ) -> Result<Option<Order>, PlannerError> {
        let placed = deal.buy_orders.len();
        if placed == 0 {
            return Err(PlannerError::NoExecutedBuys(deal.id.clone()));
        }
        if placed as u32 - 1 >= self.options.max_safety_orders {
            return Ok(None);
        }

        let base_price = match deal.override_average_price {
            Some(p) if p > Decimal::ZERO => p,
            _ => {
                let mut fills: Vec<&ExchangeOrder> =
                    buy_fills.iter().filter(|f| !f.is_open()).collect();
                fills.sort_by_key(|f| f.close_date.unwrap_or(f.open_date));
                fills
                    .first()
                    .map(|f| f.price)
                    .ok_or_else(|| PlannerError::NoExecutedBuys(deal.id.clone()))?
            }
        };

        let mut deviation = self.options.price_deviation;
        let mut quote_size = self.options.safety_order_size;
        for _ in 0..placed - 1 {
            deviation *= self.options.step_scale;
            quote_size *= self.options.volume_scale;
        }

        self.ladder_order(base_price, deviation, quote_size, placed, now)
            .map(Some)
    }

    /// Proposes a take-profit sell for the whole held base balance at the
    /// deal's target price.
    pub fn propose_take_profit_order(
        &self,
        metrics: &DealMetrics,
        available_volume: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Order, PlannerError> {
        let volume = self.pair.round_volume(available_volume);
        if volume.is_zero() {
            return Err(PlannerError::LadderStep { index: 0 });
        }
        let price = self.pair.round_price(metrics.target_price);
        let quote = self.pair.round_price(price * volume);
        Ok(Order::planned(
            self.bot_id,
            self.account,
            &self.pair.id,
            OrderSide::Sell,
            OrderType::Limit,
            now,
            quote,
        )
        .with_price(price)
        .with_volume(volume)
        .with_fees(self.pair.round_price(self.maker_fee * quote)))
    }

    /// Cost basis plus take-profit target for a deal's executed buys.
    pub fn deal_metrics(
        &self,
        deal: &Deal,
        buy_fills: &[ExchangeOrder],
    ) -> Result<DealMetrics, PlannerError> {
        let (average_price, basis) =
            cost_basis(buy_fills).ok_or_else(|| PlannerError::EmptyCostBasis(deal.id.clone()))?;
        let average_price = match deal.override_average_price {
            Some(p) if p > Decimal::ZERO => p,
            _ => average_price,
        };
        Ok(DealMetrics {
            average_price,
            cost_basis: basis,
            target_price: profit_target(
                average_price,
                self.options.profit_target,
                self.maker_fee,
            ),
        })
    }

    fn ladder_order(
        &self,
        base_price: Decimal,
        deviation: Decimal,
        quote_size: Decimal,
        index: usize,
        now: DateTime<Utc>,
    ) -> Result<Order, PlannerError> {
        let price = self
            .pair
            .round_price(base_price * (Decimal::ONE - deviation));
        if price <= Decimal::ZERO {
            return Err(PlannerError::LadderStep { index });
        }
        let volume = self.pair.round_volume(quote_size / price);
        if volume.is_zero() {
            return Err(PlannerError::LadderStep { index });
        }
        Ok(Order::planned(
            self.bot_id,
            self.account,
            &self.pair.id,
            OrderSide::Buy,
            OrderType::Limit,
            now,
            quote_size,
        )
        .with_price(price)
        .with_volume(volume)
        .with_fees(self.pair.round_price(self.maker_fee * quote_size)))
    }
}
