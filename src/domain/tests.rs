//! Tests for the domain entities.

use super::*;
use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn btc_eur() -> PairData {
    PairData {
        id: "btc/eur".to_string(),
        base: "btc".to_string(),
        quote: "eur".to_string(),
        min_volume: dec("0.0001"),
        max_base_digits: 8,
        max_quote_digits: 2,
    }
}

fn planned_buy(volume_quote: &str) -> Order {
    Order::planned(
        "btc-stacker",
        "kraken-main",
        "btc/eur",
        OrderSide::Buy,
        OrderType::Market,
        Utc.with_ymd_and_hms(2024, 5, 3, 8, 0, 0).unwrap(),
        dec(volume_quote),
    )
}

// ==================== Order validation ====================

#[test]
fn test_planned_order_without_quote_budget_is_invalid() {
    let order = planned_buy("0");
    let err = order.validate().unwrap_err();
    assert_eq!(err.field, "volume_quote");
}

#[test]
fn test_limit_order_without_price_is_invalid() {
    let mut order = planned_buy("100");
    order.order_type = OrderType::Limit;
    let err = order.validate().unwrap_err();
    assert_eq!(err.field, "price");
}

#[test]
fn test_limit_order_with_price_is_valid() {
    let order = planned_buy("100")
        .with_price(dec("29985"))
        .with_volume(dec("0.0033"));
    let mut order = order;
    order.order_type = OrderType::Limit;
    assert!(order.validate().is_ok());
}

#[test]
fn test_pending_order_requires_volume() {
    let mut order = planned_buy("100");
    order
        .submitted("TX-1".to_string(), Decimal::ZERO, None)
        .unwrap();
    let err = order.validate().unwrap_err();
    assert_eq!(err.field, "volume");
}

#[test]
fn test_empty_pair_is_invalid() {
    let mut order = planned_buy("100");
    order.pair = String::new();
    assert_eq!(order.validate().unwrap_err().field, "pair");
}

// ==================== Order transitions ====================

#[test]
fn test_submit_then_fill() {
    let mut order = planned_buy("100");
    assert!(order.txid().is_none());

    order
        .submitted("TX-1".to_string(), dec("0.0033"), None)
        .unwrap();
    assert_eq!(order.status(), OrderStatus::Pending);
    assert_eq!(order.txid(), Some("TX-1"));
    assert!(order.is_active());

    let close = Utc.with_ymd_and_hms(2024, 5, 3, 9, 0, 0).unwrap();
    order
        .filled("TX-1".to_string(), dec("0.0033"), Some(dec("99.5")), close)
        .unwrap();
    assert_eq!(order.status(), OrderStatus::Executed);
    assert_eq!(order.close_date(), Some(close));
}

#[test]
fn test_market_fill_skips_pending() {
    let mut order = planned_buy("100");
    let close = Utc.with_ymd_and_hms(2024, 5, 3, 8, 0, 5).unwrap();
    order
        .filled("TX-2".to_string(), dec("0.0033"), None, close)
        .unwrap();
    assert!(order.is_closed());
}

#[test]
fn test_executed_order_cannot_be_resubmitted() {
    let mut order = planned_buy("100");
    order
        .filled("TX-3".to_string(), dec("0.0033"), None, Utc::now())
        .unwrap();

    let err = order
        .submitted("TX-4".to_string(), dec("0.0033"), None)
        .unwrap_err();
    assert_eq!(err.from, OrderStatus::Executed);
    assert_eq!(err.target, OrderStatus::Pending);
}

#[test]
fn test_cancel_requires_pending() {
    let mut order = planned_buy("100");
    assert!(order.cancelled(None).is_err());

    order
        .submitted("TX-5".to_string(), dec("0.0033"), None)
        .unwrap();
    order.cancelled(Some(Utc::now())).unwrap();
    assert_eq!(order.status(), OrderStatus::Cancelled);
    // The txid survives into the terminal state.
    assert_eq!(order.txid(), Some("TX-5"));
}

#[test]
fn test_resubmit_replaces_txid() {
    let mut order = planned_buy("100");
    order
        .submitted("TX-6".to_string(), dec("0.0033"), None)
        .unwrap();
    order.resubmitted("TX-7".to_string()).unwrap();
    assert_eq!(order.txid(), Some("TX-7"));
    assert_eq!(order.status(), OrderStatus::Pending);
}

#[test]
fn test_scheduled_for_today() {
    let order = planned_buy("100");
    let same_day = Utc.with_ymd_and_hms(2024, 5, 3, 23, 0, 0).unwrap();
    let next_day = Utc.with_ymd_and_hms(2024, 5, 4, 0, 30, 0).unwrap();
    assert!(order.is_scheduled_for(same_day));
    assert!(!order.is_scheduled_for(next_day));
}

#[test]
fn test_hours_elapsed_from_open_date() {
    let order = planned_buy("100");
    let now = Utc.with_ymd_and_hms(2024, 5, 3, 14, 0, 0).unwrap();
    assert_eq!(order.hours_elapsed(now, false), 6.0);
}

#[test]
fn test_generated_ids_carry_bot_prefix() {
    let a = generate_order_id("btc-stacker");
    let b = generate_order_id("btc-stacker");
    assert!(a.starts_with("btc-stacker:"));
    assert_ne!(a, b);
}

// ==================== Order state serialization ====================

#[test]
fn test_planned_state_serializes_with_status_tag() {
    let order = planned_buy("100");
    let json = serde_json::to_value(&order).unwrap();
    assert_eq!(json["status"], "planned");
    assert_eq!(json["type"], "market");
    assert!(json.get("txid").is_none());
}

#[test]
fn test_executed_state_round_trips() {
    let mut order = planned_buy("100");
    order
        .filled("TX-8".to_string(), dec("0.0033"), Some(dec("99.9")), Utc::now())
        .unwrap();
    let json = serde_json::to_string(&order).unwrap();
    let back: Order = serde_json::from_str(&json).unwrap();
    assert_eq!(back, order);
}

// ==================== Deal ====================

#[test]
fn test_deal_prune_missing_orders() {
    let mut orders = OrderTable::new();
    let kept = planned_buy("100");
    let kept_id = kept.id.clone();
    orders.insert(kept);

    let mut deal = Deal::new("btc-trader", "kraken-main", 1);
    deal.push_buy(kept_id.clone());
    deal.push_buy("btc-trader:gone");
    deal.push_sell("btc-trader:also-gone");

    let pruned = deal.prune_missing(&orders);
    assert_eq!(pruned.len(), 2);
    assert_eq!(deal.buy_orders, vec![kept_id]);
    assert!(deal.sell_orders.is_empty());
}

#[test]
fn test_deal_book_next_index_is_monotonic() {
    let mut deals = DealBook::new();
    assert_eq!(deals.next_index("btc-trader"), 1);

    let mut closed = Deal::new("btc-trader", "kraken-main", 1);
    closed.close();
    deals.insert(closed);
    deals.insert(Deal::new("btc-trader", "kraken-main", 2));

    // Closed deals still count towards the ladder position.
    assert_eq!(deals.next_index("btc-trader"), 3);
    assert_eq!(deals.open_deals("btc-trader").len(), 1);
}

#[test]
fn test_deal_has_order_checks_both_sides() {
    let mut deal = Deal::new("btc-trader", "kraken-main", 1);
    deal.push_buy("a");
    deal.push_sell("b");
    assert!(deal.has_order("a"));
    assert!(deal.has_order("b"));
    assert!(!deal.has_order("c"));
}

// ==================== Action ====================

#[test]
fn test_market_action_rejects_limit_order() {
    let mut order = planned_buy("100");
    order.order_type = OrderType::Limit;
    let err = Action::market(&order, &btc_eur(), "kraken-main").unwrap_err();
    assert_eq!(err.field, "type");
}

#[test]
fn test_submit_action_checks_pass_for_valid_market_buy() {
    let order = planned_buy("100");
    let action = Action::submit(&order, &btc_eur(), "kraken-main").unwrap();
    assert_eq!(action.command, ActionCommand::SubmitOrder);
    assert!(action.perform_checks().is_ok());
}

#[test]
fn test_cancel_action_requires_txid() {
    let order = planned_buy("100");
    let action = Action::cancel(&order, "kraken-main");
    assert_eq!(action.perform_checks().unwrap_err().field, "txid");
}

#[test]
fn test_action_volume_falls_back_to_quote_budget() {
    let order = planned_buy("100");
    let action = Action::submit(&order, &btc_eur(), "kraken-main").unwrap();
    let volume = action.volume_at(dec("25000")).unwrap();
    assert_eq!(volume, dec("0.004"));
}

// ==================== PairData ====================

#[test]
fn test_pair_rounding_uses_pair_digits() {
    let pair = btc_eur();
    assert_eq!(pair.round_volume(dec("0.123456789")), dec("0.12345679"));
    assert_eq!(pair.round_price(dec("29985.4567")), dec("29985.46"));
}

#[test]
fn test_pair_clamps_dust_volume() {
    let pair = btc_eur();
    assert_eq!(pair.clamp_volume(dec("0.00000001")), pair.min_volume);
    assert_eq!(pair.clamp_volume(dec("0.5")), dec("0.5"));
}
