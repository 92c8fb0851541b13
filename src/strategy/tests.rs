//! Tests for the strategy engine, driven through a scripted exchange.

use super::*;
use crate::config::{BotConfig, DealOptions, ScheduleOptions, StrategyKind};
use crate::domain::{
    ActionCommand, Deal, ExchangeOrder, ExchangeOrderStatus, Order, OrderSide, OrderType,
};
use crate::exchanges::mock::MockExchangeClient;
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 3, 10, 0, 0).unwrap()
}

fn stacker_settings() -> BotConfig {
    BotConfig {
        account: "kraken-main".to_string(),
        pair: "btc/eur".to_string(),
        strategy: StrategyKind::Stacker,
        active: true,
        max_volume_quote: Some(dec("50")),
        max_price: Some(dec("60000")),
        schedule: Some(ScheduleOptions::Recurring {
            frequency_hours: 24,
            max_orders_per_day: 1,
        }),
        deal: None,
    }
}

fn trader_settings() -> BotConfig {
    BotConfig {
        account: "kraken-main".to_string(),
        pair: "btc/eur".to_string(),
        strategy: StrategyKind::Trader,
        active: true,
        max_volume_quote: None,
        max_price: None,
        schedule: None,
        deal: Some(DealOptions {
            initial_order_size: dec("100"),
            safety_order_size: dec("100"),
            max_safety_orders: 2,
            price_deviation: dec("0.02"),
            step_scale: dec("1.5"),
            volume_scale: dec("1.3"),
            profit_target: dec("0.01"),
        }),
    }
}

struct Fixture {
    client: MockExchangeClient,
    orders: crate::domain::OrderTable,
    deals: crate::domain::DealBook,
    settings: BotConfig,
}

impl Fixture {
    fn new(settings: BotConfig) -> Self {
        Self {
            client: MockExchangeClient::new("kraken-main", "btc/eur"),
            orders: crate::domain::OrderTable::new(),
            deals: crate::domain::DealBook::new(),
            settings,
        }
    }

    fn ctx(&mut self, bot_id: &'static str, price: &str) -> CycleContext<'_> {
        CycleContext {
            bot_id,
            settings: &self.settings,
            pair: self.client.pair_data("btc/eur").unwrap(),
            now: now(),
            current_price: dec(price),
            maker_fee: dec("0.0016"),
            taker_fee: dec("0.0026"),
            client: &self.client,
            orders: &mut self.orders,
            deals: &mut self.deals,
        }
    }
}

fn closed_fill(txid: &str, side: OrderSide, volume: &str, price: &str, fees: &str) -> ExchangeOrder {
    ExchangeOrder {
        txid: txid.to_string(),
        pair: "btc/eur".to_string(),
        side,
        order_type: OrderType::Limit,
        status: ExchangeOrderStatus::Closed,
        volume: dec(volume),
        price: dec(price),
        cost: dec(volume) * dec(price),
        fees: dec(fees),
        open_date: now() - chrono::Duration::hours(2),
        close_date: Some(now() - chrono::Duration::hours(1)),
    }
}

// ==================== Stacker ====================

#[tokio::test]
async fn test_stacker_submits_due_planned_order_as_market_buy() {
    let mut fx = Fixture::new(stacker_settings());
    fx.client.set_balance("eur", dec("500"));

    let order = Order::planned(
        "btc-stacker",
        "kraken-main",
        "btc/eur",
        OrderSide::Buy,
        OrderType::Market,
        Utc.with_ymd_and_hms(2024, 5, 3, 8, 0, 0).unwrap(),
        dec("50"),
    );
    let order_id = order.id.clone();
    fx.orders.insert(order);

    let strategy = StackerStrategy::new("btc-stacker", stacker_settings());
    let mut ctx = fx.ctx("btc-stacker", "30000");
    let outcome = strategy.decide(&mut ctx).await.unwrap();

    assert_eq!(outcome.actions.len(), 1);
    let action = &outcome.actions[0];
    assert_eq!(action.command, ActionCommand::SubmitOrder);
    assert_eq!(action.order.order_type, OrderType::Market);
    // Sized at the current price, rounded to the pair's base digits.
    assert_eq!(action.order.volume(), Some(dec("0.00166667")));
    assert_eq!(action.order_id(), order_id);
    assert!(outcome.proposals.contains(&"submit_planned_order"));
}

#[tokio::test]
async fn test_stacker_clamps_to_limit_above_max_price() {
    let mut fx = Fixture::new(stacker_settings());
    fx.client.set_balance("eur", dec("500"));

    fx.orders.insert(Order::planned(
        "btc-stacker",
        "kraken-main",
        "btc/eur",
        OrderSide::Buy,
        OrderType::Market,
        Utc.with_ymd_and_hms(2024, 5, 3, 8, 0, 0).unwrap(),
        dec("50"),
    ));

    let strategy = StackerStrategy::new("btc-stacker", stacker_settings());
    let mut ctx = fx.ctx("btc-stacker", "65000");
    let outcome = strategy.decide(&mut ctx).await.unwrap();

    assert_eq!(outcome.actions.len(), 1);
    let action = &outcome.actions[0];
    assert_eq!(action.order.order_type, OrderType::Limit);
    assert_eq!(action.order.price(), Some(dec("60000")));
}

#[tokio::test]
async fn test_stacker_insufficient_balance_defers_without_error() {
    let mut fx = Fixture::new(stacker_settings());
    fx.client.set_balance("eur", dec("10"));

    let order = Order::planned(
        "btc-stacker",
        "kraken-main",
        "btc/eur",
        OrderSide::Buy,
        OrderType::Market,
        Utc.with_ymd_and_hms(2024, 5, 3, 8, 0, 0).unwrap(),
        dec("50"),
    );
    let order_id = order.id.clone();
    fx.orders.insert(order);

    let strategy = StackerStrategy::new("btc-stacker", stacker_settings());
    let mut ctx = fx.ctx("btc-stacker", "30000");
    let outcome = strategy.decide(&mut ctx).await.unwrap();

    assert!(outcome.actions.is_empty());
    // The order stays planned for the next cycle.
    assert!(fx.orders.get(&order_id).unwrap().is_planned());
}

#[tokio::test]
async fn test_stacker_replaces_stale_pending_order() {
    let mut fx = Fixture::new(stacker_settings());
    fx.client.set_balance("eur", dec("500"));

    let mut order = Order::planned(
        "btc-stacker",
        "kraken-main",
        "btc/eur",
        OrderSide::Buy,
        OrderType::Limit,
        Utc.with_ymd_and_hms(2024, 5, 2, 8, 0, 0).unwrap(),
        dec("50"),
    )
    .with_price(dec("29000"));
    order
        .submitted("TX-1".to_string(), dec("0.0017"), Some(dec("29000")))
        .unwrap();
    let order_id = order.id.clone();
    fx.orders.insert(order);

    // The exchange still reports the limit order open past the cutoff.
    let mut remote = closed_fill("TX-1", OrderSide::Buy, "0.0017", "29000", "0");
    remote.status = ExchangeOrderStatus::Open;
    remote.close_date = None;
    fx.client.preload_order(remote);

    let strategy = StackerStrategy::new("btc-stacker", stacker_settings());
    let mut ctx = fx.ctx("btc-stacker", "30000");
    // now() is 2024-05-03 10:00, past the 2024-05-02 23:30 cutoff.
    let outcome = strategy.decide(&mut ctx).await.unwrap();

    assert!(outcome.proposals.contains(&"replace_pending_order"));
    assert_eq!(outcome.actions.len(), 2);
    assert_eq!(outcome.actions[0].command, ActionCommand::CancelOrder);
    assert_eq!(outcome.actions[1].command, ActionCommand::SubmitOrder);
    assert_eq!(outcome.actions[1].order.order_type, OrderType::Market);
    // The table order was converted in place.
    assert_eq!(
        fx.orders.get(&order_id).unwrap().order_type,
        OrderType::Market
    );
}

#[tokio::test]
async fn test_stacker_plans_next_order_when_plan_exhausted() {
    let mut fx = Fixture::new(stacker_settings());
    fx.client.set_balance("eur", dec("500"));

    let mut executed = Order::planned(
        "btc-stacker",
        "kraken-main",
        "btc/eur",
        OrderSide::Buy,
        OrderType::Market,
        Utc.with_ymd_and_hms(2024, 5, 2, 9, 0, 0).unwrap(),
        dec("50"),
    );
    executed
        .filled(
            "TX-0".to_string(),
            dec("0.0017"),
            Some(dec("49.9")),
            Utc.with_ymd_and_hms(2024, 5, 2, 9, 0, 10).unwrap(),
        )
        .unwrap();
    fx.orders.insert(executed);

    let strategy = StackerStrategy::new("btc-stacker", stacker_settings());
    let mut ctx = fx.ctx("btc-stacker", "30000");
    let outcome = strategy.decide(&mut ctx).await.unwrap();

    // A new planned order was proposed 24h after the last close, which
    // lands today and is immediately submittable.
    assert_eq!(fx.orders.len(), 2);
    let new_order = fx
        .orders
        .iter()
        .find(|o| o.txid() != Some("TX-0"))
        .unwrap();
    assert_eq!(
        new_order.open_date,
        Utc.with_ymd_and_hms(2024, 5, 3, 9, 0, 10).unwrap()
    );
    assert!(outcome.proposals.contains(&"submit_planned_order"));
}

#[tokio::test]
async fn test_stacker_wants_cycle_when_plan_exhausted() {
    let fx = Fixture::new(stacker_settings());
    let strategy = StackerStrategy::new("btc-stacker", stacker_settings());
    // Empty table: everything is (vacuously) closed, so a cycle is due.
    assert!(strategy.wants_cycle(&fx.orders, &fx.deals, now()));
    assert!(!strategy.has_active_orders(&fx.orders, &fx.deals, now()));
}

// ==================== Trader ====================

/// Builds a trader fixture with one open deal holding one executed
/// entry buy at 29985.
fn trader_with_open_deal() -> (Fixture, String, String) {
    let mut fx = Fixture::new(trader_settings());
    fx.client.set_balance("eur", dec("1000"));
    fx.client.set_balance("btc", dec("0.00333500"));

    let mut entry = Order::planned(
        "btc-trader",
        "kraken-main",
        "btc/eur",
        OrderSide::Buy,
        OrderType::Market,
        now() - chrono::Duration::hours(2),
        dec("100"),
    )
    .with_volume(dec("0.00333500"));
    entry
        .filled(
            "TX-ENTRY".to_string(),
            dec("0.00333500"),
            Some(dec("100.02")),
            now() - chrono::Duration::hours(1),
        )
        .unwrap();
    let entry_id = entry.id.clone();
    fx.orders.insert(entry);
    fx.client.preload_order(closed_fill(
        "TX-ENTRY",
        OrderSide::Buy,
        "0.00333500",
        "29985",
        "0.26",
    ));

    let mut deal = Deal::new("btc-trader", "kraken-main", 1);
    deal.push_buy(entry_id.clone());
    let deal_id = deal.id.clone();
    fx.deals.insert(deal);

    (fx, deal_id, entry_id)
}

#[tokio::test]
async fn test_trader_synthesizes_safety_and_take_profit_orders() {
    let (mut fx, deal_id, entry_id) = trader_with_open_deal();

    let strategy = TraderStrategy::new("btc-trader", trader_settings());
    let mut ctx = fx.ctx("btc-trader", "29500");
    let outcome = strategy.decide(&mut ctx).await.unwrap();

    assert!(outcome.proposals.contains(&"submit_safety_order"));
    assert!(outcome.proposals.contains(&"submit_take_profit"));

    let deal = fx.deals.get(&deal_id).unwrap();
    assert_eq!(deal.buy_orders.len(), 2);
    assert_eq!(deal.sell_orders.len(), 1);

    // The safety order replays the ladder from the entry fill price.
    let safety_id = deal.buy_orders.iter().find(|id| *id != &entry_id).unwrap();
    let safety = fx.orders.get(safety_id).unwrap();
    assert_eq!(safety.price(), Some(dec("29385.3")));
    assert_eq!(safety.volume_quote(), Some(dec("100")));

    // The take-profit sells the whole held balance above cost basis.
    let sell = fx.orders.get(&deal.sell_orders[0]).unwrap();
    assert_eq!(sell.side, OrderSide::Sell);
    assert_eq!(sell.volume(), Some(dec("0.00333500")));
    assert!(sell.price().unwrap() > dec("29985"));

    // Both synthesized orders passed validation and became actions.
    assert_eq!(outcome.actions.len(), 2);
}

#[tokio::test]
async fn test_trader_resizes_take_profit_to_held_balance() {
    let (mut fx, deal_id, _) = trader_with_open_deal();

    // A live take-profit sized for less than the held balance.
    let mut sell = Order::planned(
        "btc-trader",
        "kraken-main",
        "btc/eur",
        OrderSide::Sell,
        OrderType::Limit,
        now() - chrono::Duration::hours(1),
        dec("95"),
    )
    .with_price(dec("30500"))
    .with_volume(dec("0.003"));
    sell.submitted("TX-TP".to_string(), dec("0.003"), Some(dec("30500")))
        .unwrap();
    let sell_id = sell.id.clone();
    fx.orders.insert(sell);
    fx.deals.get_mut(&deal_id).unwrap().push_sell(sell_id.clone());

    // Fill the ladder so only the take-profit check fires.
    for id in ["so1", "so2"] {
        fx.deals
            .get_mut(&deal_id)
            .unwrap()
            .push_buy(format!("btc-trader:{}", id));
        let mut order = Order::planned(
            "btc-trader",
            "kraken-main",
            "btc/eur",
            OrderSide::Buy,
            OrderType::Limit,
            now() - chrono::Duration::hours(2),
            dec("100"),
        )
        .with_price(dec("29000"));
        order.id = format!("btc-trader:{}", id);
        order
            .submitted(format!("TX-{}", id), dec("0.0034"), Some(dec("29000")))
            .unwrap();
        fx.orders.insert(order);
    }

    let strategy = TraderStrategy::new("btc-trader", trader_settings());
    let mut ctx = fx.ctx("btc-trader", "29500");
    let outcome = strategy.decide(&mut ctx).await.unwrap();

    assert!(outcome.proposals.contains(&"edit_take_profit"));
    let edit = outcome
        .actions
        .iter()
        .find(|a| a.command == ActionCommand::EditOrder)
        .expect("edit action");
    assert_eq!(edit.order_id(), sell_id);
    assert_eq!(edit.order.volume(), Some(dec("0.00333500")));
}

#[tokio::test]
async fn test_trader_completes_deal_once() {
    let (mut fx, deal_id, _) = trader_with_open_deal();

    // Executed sell matching the bought volume.
    let mut sell = Order::planned(
        "btc-trader",
        "kraken-main",
        "btc/eur",
        OrderSide::Sell,
        OrderType::Limit,
        now() - chrono::Duration::hours(1),
        dec("103"),
    )
    .with_price(dec("31000"))
    .with_volume(dec("0.00333500"));
    sell.submitted("TX-SELL".to_string(), dec("0.00333500"), Some(dec("31000")))
        .unwrap();
    sell.filled(
        "TX-SELL".to_string(),
        dec("0.00333500"),
        Some(dec("103.39")),
        now() - chrono::Duration::minutes(30),
    )
    .unwrap();
    let sell_id = sell.id.clone();
    fx.orders.insert(sell);
    fx.deals.get_mut(&deal_id).unwrap().push_sell(sell_id);
    fx.client.preload_order(closed_fill(
        "TX-SELL",
        OrderSide::Sell,
        "0.00333500",
        "31000",
        "0.17",
    ));
    // Inventory is gone once the sell filled.
    fx.client.set_balance("btc", Decimal::ZERO);
    fx.client.set_balance("eur", Decimal::ZERO);

    let strategy = TraderStrategy::new("btc-trader", trader_settings());

    let outcome = {
        let mut ctx = fx.ctx("btc-trader", "31000");
        strategy.decide(&mut ctx).await.unwrap()
    };
    assert_eq!(outcome.completed_deals.len(), 1);
    assert_eq!(outcome.completed_deals[0].0, deal_id);
    // proceeds 0.003335*31000 - 0.17, basis 0.003335*29985 + 0.26
    let expected_profit = dec("0.00333500") * dec("31000")
        - dec("0.17")
        - (dec("0.00333500") * dec("29985") + dec("0.26"));
    assert_eq!(outcome.completed_deals[0].1, expected_profit);
    assert!(!fx.deals.get(&deal_id).unwrap().is_open());

    // Second cycle: the closed deal is not reprocessed and profit is not
    // recomputed (no balance, so no new deal starts either).
    let outcome = {
        let mut ctx = fx.ctx("btc-trader", "31000");
        strategy.decide(&mut ctx).await.unwrap()
    };
    assert!(outcome.completed_deals.is_empty());
    assert!(!fx.deals.get(&deal_id).unwrap().is_open());
}

#[tokio::test]
async fn test_trader_starts_deal_when_flat() {
    let mut fx = Fixture::new(trader_settings());
    fx.client.set_balance("eur", dec("1000"));
    fx.client.set_balance("btc", Decimal::ZERO);

    let strategy = TraderStrategy::new("btc-trader", trader_settings());
    let mut ctx = fx.ctx("btc-trader", "30000");
    let outcome = strategy.decide(&mut ctx).await.unwrap();

    // Entry plus two safety orders submitted; the sell waits until the
    // bot actually holds something.
    assert_eq!(outcome.actions.len(), 3);
    assert!(outcome
        .actions
        .iter()
        .all(|a| a.command == ActionCommand::SubmitOrder && a.order.side == OrderSide::Buy));
    assert_eq!(fx.deals.len(), 1);
    let deal = fx.deals.iter().next().unwrap();
    assert_eq!(deal.buy_orders.len(), 3);
    assert!(deal.sell_orders.is_empty());
}

#[tokio::test]
async fn test_trader_defers_deal_start_on_insufficient_balance() {
    let mut fx = Fixture::new(trader_settings());
    fx.client.set_balance("eur", dec("10"));

    let strategy = TraderStrategy::new("btc-trader", trader_settings());
    let mut ctx = fx.ctx("btc-trader", "30000");
    let outcome = strategy.decide(&mut ctx).await.unwrap();

    assert!(outcome.actions.is_empty());
    assert!(fx.deals.is_empty());
    assert!(fx.orders.is_empty());
}

// ==================== Recovery ====================

/// Builds the drift scenario: a planned order that was submitted and
/// filled on the exchange, but whose local state never left "planned".
fn drifted_fixture() -> (Fixture, String) {
    let mut fx = Fixture::new(trader_settings());
    fx.client.set_balance("btc", dec("0.00333500"));
    fx.client.set_balance("eur", dec("500"));

    let planned = Order::planned(
        "btc-trader",
        "kraken-main",
        "btc/eur",
        OrderSide::Buy,
        OrderType::Market,
        now() - chrono::Duration::hours(2),
        dec("100"),
    )
    .with_volume(dec("0.00333500"));
    let planned_id = planned.id.clone();
    fx.orders.insert(planned);

    // The fill only shows up after a forced history download.
    let mut fill = closed_fill("TX-LOST", OrderSide::Buy, "0.00333500", "29985", "0.26");
    fill.order_type = OrderType::Market;
    fill.open_date = now() - chrono::Duration::hours(2);
    fx.client.stage_history(fill);

    (fx, planned_id)
}

#[tokio::test]
async fn test_recovery_rebuilds_deal_from_history() {
    let (mut fx, planned_id) = drifted_fixture();

    let strategy = TraderStrategy::new("btc-trader", trader_settings());
    let mut ctx = fx.ctx("btc-trader", "30000");
    let outcome = strategy.decide(&mut ctx).await.unwrap();

    let recovered_id = outcome.recovered_deal.expect("recovered deal");
    let deal = fx.deals.get(&recovered_id).unwrap();
    assert_eq!(deal.buy_orders, vec![planned_id.clone()]);
    // Every matched order had closed, so the deal recovers as closed.
    assert!(!deal.is_open());

    let order = fx.orders.get(&planned_id).unwrap();
    assert!(order.is_closed());
    assert_eq!(order.txid(), Some("TX-LOST"));
    assert!(fx.client.downloads.load(std::sync::atomic::Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn test_recovery_is_idempotent() {
    let (mut fx, _) = drifted_fixture();
    let strategy = TraderStrategy::new("btc-trader", trader_settings());

    {
        let mut ctx = fx.ctx("btc-trader", "30000");
        strategy.decide(&mut ctx).await.unwrap();
    }
    assert_eq!(fx.deals.len(), 1);

    // Same exchange history, second run: the bound txid de-duplicates,
    // so no orphans remain and no second deal appears.
    let outcome = {
        let mut ctx = fx.ctx("btc-trader", "30000");
        strategy.decide(&mut ctx).await.unwrap()
    };
    assert_eq!(fx.deals.len(), 1);
    assert!(outcome.recovered_deal.is_none());
}

#[tokio::test]
async fn test_recovery_never_guesses_on_unmatched_orders() {
    let mut fx = Fixture::new(trader_settings());
    fx.client.set_balance("btc", dec("0.5"));

    // An orphan fill with no plausible planned counterpart.
    let fill = closed_fill("TX-ALIEN", OrderSide::Buy, "0.5", "20000", "1.0");
    fx.client.stage_history(fill);

    let strategy = TraderStrategy::new("btc-trader", trader_settings());
    let mut ctx = fx.ctx("btc-trader", "30000");
    let outcome = strategy.decide(&mut ctx).await.unwrap();

    assert!(outcome.recovered_deal.is_none());
    assert!(fx.deals.is_empty());
    assert!(outcome
        .messages
        .iter()
        .any(|m| m.contains("no matching planned orders")));
}
