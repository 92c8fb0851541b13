//! Tests for the bot coordinator.

use super::*;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{AccountConfig, AppConfig, BotConfig, ScheduleOptions};
use crate::domain::{Order, OrderSide, OrderType};
use crate::domain::{ExchangeOrder, ExchangeOrderStatus};
use crate::exchanges::mock::MockExchangeClient;
use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn test_config() -> Config {
    Config {
        app: AppConfig {
            name: "eca-bot".to_string(),
            env: "development".to_string(),
            log_level: None,
            poll_interval_secs: Some(60),
            closed_sync_interval_secs: Some(1800),
        },
        accounts: HashMap::from([(
            "kraken-main".to_string(),
            AccountConfig {
                enabled: true,
                exchange: "kraken".to_string(),
                api_key: String::new(),
                api_secret: String::new(),
                maker_fee: dec("0.0016"),
                taker_fee: dec("0.0026"),
                rate_limit: None,
                watch_balance: vec![],
            },
        )]),
        bots: HashMap::from([(
            "btc-stacker".to_string(),
            BotConfig {
                account: "kraken-main".to_string(),
                pair: "btc/eur".to_string(),
                strategy: StrategyKind::Stacker,
                active: true,
                max_volume_quote: Some(dec("50")),
                max_price: None,
                schedule: Some(ScheduleOptions::Recurring {
                    frequency_hours: 24,
                    max_orders_per_day: 1,
                }),
                deal: None,
            },
        )]),
        notification: None,
        storage: None,
    }
}

async fn test_bot(client: Arc<MockExchangeClient>) -> Bot {
    let manager = Manager::new();
    manager.register(client).await;
    Bot::assemble(
        test_config(),
        manager,
        BotOptions {
            dry_run: false,
            version: "0.0.0-test".to_string(),
        },
    )
    .await
    .unwrap()
}

fn pending_order(txid: &str) -> Order {
    let mut order = Order::planned(
        "btc-stacker",
        "kraken-main",
        "btc/eur",
        OrderSide::Buy,
        OrderType::Market,
        Utc.with_ymd_and_hms(2024, 5, 3, 8, 0, 0).unwrap(),
        dec("50"),
    );
    order
        .submitted(txid.to_string(), dec("0.0017"), None)
        .unwrap();
    order
}

fn remote_order(txid: &str, status: ExchangeOrderStatus) -> ExchangeOrder {
    ExchangeOrder {
        txid: txid.to_string(),
        pair: "btc/eur".to_string(),
        side: OrderSide::Buy,
        order_type: OrderType::Market,
        status,
        volume: dec("0.0017"),
        price: dec("29500"),
        cost: dec("50.15"),
        fees: dec("0.13"),
        open_date: Utc.with_ymd_and_hms(2024, 5, 3, 8, 0, 5).unwrap(),
        close_date: Some(Utc.with_ymd_and_hms(2024, 5, 3, 8, 30, 0).unwrap()),
    }
}

#[tokio::test]
async fn test_pending_order_executes_when_exchange_reports_closed() {
    let client = Arc::new(MockExchangeClient::new("kraken-main", "btc/eur"));
    client.preload_order(remote_order("TX-1", ExchangeOrderStatus::Closed));

    let bot = test_bot(client).await;
    bot.insert_order(pending_order("TX-1")).await;

    bot.check_pending_orders().await;

    let orders = bot.orders_snapshot().await;
    let order = &orders[0];
    assert!(order.is_closed());
    assert_eq!(order.txid(), Some("TX-1"));
    assert_eq!(
        order.close_date(),
        Some(Utc.with_ymd_and_hms(2024, 5, 3, 8, 30, 0).unwrap())
    );
    assert_eq!(order.volume_quote(), Some(dec("50.15")));
    assert_eq!(bot.stats().await.orders_filled, 1);
}

#[tokio::test]
async fn test_pending_order_cancelled_when_exchange_reports_cancelled() {
    let client = Arc::new(MockExchangeClient::new("kraken-main", "btc/eur"));
    client.preload_order(remote_order("TX-2", ExchangeOrderStatus::Cancelled));

    let bot = test_bot(client).await;
    bot.insert_order(pending_order("TX-2")).await;

    bot.check_pending_orders().await;

    let orders = bot.orders_snapshot().await;
    assert_eq!(orders[0].status(), crate::domain::OrderStatus::Cancelled);
    assert_eq!(bot.stats().await.orders_cancelled, 1);
}

#[tokio::test]
async fn test_pending_order_untouched_while_still_open() {
    let client = Arc::new(MockExchangeClient::new("kraken-main", "btc/eur"));
    client.preload_order(remote_order("TX-3", ExchangeOrderStatus::Open));

    let bot = test_bot(client).await;
    bot.insert_order(pending_order("TX-3")).await;

    bot.check_pending_orders().await;

    let orders = bot.orders_snapshot().await;
    assert!(orders[0].is_active());
}

#[tokio::test]
async fn test_execute_actions_submits_and_binds_txid() {
    let client = Arc::new(MockExchangeClient::new("kraken-main", "btc/eur"));
    client.queue_txid("TX-NEW");

    let bot = test_bot(client.clone()).await;
    let mut order = Order::planned(
        "btc-stacker",
        "kraken-main",
        "btc/eur",
        OrderSide::Buy,
        OrderType::Market,
        Utc::now(),
        dec("50"),
    );
    order.size_planned(dec("0.0017"), None).unwrap();
    let order_id = order.id.clone();
    bot.insert_order(order.clone()).await;

    let pair = client.pair_data("btc/eur").unwrap();
    let action = Action::submit(&order, &pair, "kraken-main").unwrap();

    let mut orders = bot.orders.lock().await;
    let executed = bot
        .execute_actions(client.as_ref(), vec![action], &mut orders)
        .await
        .unwrap();
    assert_eq!(executed, 1);

    let stored = orders.get(&order_id).unwrap();
    assert!(stored.is_active());
    assert_eq!(stored.txid(), Some("TX-NEW"));
    assert_eq!(client.submitted.lock().unwrap().len(), 1);
    drop(orders);
    assert_eq!(bot.stats().await.orders_submitted, 1);
}

#[tokio::test]
async fn test_execute_actions_aborts_on_invalid_action() {
    let client = Arc::new(MockExchangeClient::new("kraken-main", "btc/eur"));
    let bot = test_bot(client.clone()).await;

    // Zero quote budget: perform_checks must fail before any network call.
    let order = Order::planned(
        "btc-stacker",
        "kraken-main",
        "btc/eur",
        OrderSide::Buy,
        OrderType::Market,
        Utc::now(),
        Decimal::ZERO,
    );
    let pair = client.pair_data("btc/eur").unwrap();
    let action = Action::submit(&order, &pair, "kraken-main").unwrap();

    let mut orders = bot.orders.lock().await;
    let result = bot
        .execute_actions(client.as_ref(), vec![action], &mut orders)
        .await;
    assert!(matches!(result, Err(BotError::InvalidAction(_))));
    assert!(client.submitted.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_execute_actions_leaves_order_untouched_on_timeout() {
    let client = Arc::new(MockExchangeClient::new("kraken-main", "btc/eur"));
    *client.fail_submissions.write().unwrap() =
        Some(ExchangeError::Timeout("deadline exceeded".to_string()));

    let bot = test_bot(client.clone()).await;
    let mut order = Order::planned(
        "btc-stacker",
        "kraken-main",
        "btc/eur",
        OrderSide::Buy,
        OrderType::Market,
        Utc::now(),
        dec("50"),
    );
    order.size_planned(dec("0.0017"), None).unwrap();
    let order_id = order.id.clone();
    bot.insert_order(order.clone()).await;

    let pair = client.pair_data("btc/eur").unwrap();
    let action = Action::submit(&order, &pair, "kraken-main").unwrap();

    let mut orders = bot.orders.lock().await;
    let executed = bot
        .execute_actions(client.as_ref(), vec![action], &mut orders)
        .await
        .unwrap();

    // Unknown outcome: no speculative state change, retried next cycle.
    assert_eq!(executed, 0);
    assert!(orders.get(&order_id).unwrap().is_planned());
}

#[tokio::test]
async fn test_run_cycle_submits_due_stacker_order() {
    let client = Arc::new(MockExchangeClient::new("kraken-main", "btc/eur"));
    client.set_price("btc/eur", dec("30000"));
    client.set_balance("eur", dec("500"));
    client.queue_txid("TX-CYCLE");

    let bot = test_bot(client.clone()).await;
    let open_date = Utc::now() - chrono::Duration::minutes(5);
    let order = Order::planned(
        "btc-stacker",
        "kraken-main",
        "btc/eur",
        OrderSide::Buy,
        OrderType::Market,
        open_date,
        dec("50"),
    );
    let order_id = order.id.clone();
    bot.insert_order(order).await;

    bot.run_cycle().await;

    assert_eq!(client.submitted.lock().unwrap().len(), 1);
    let orders = bot.orders_snapshot().await;
    let submitted = orders.iter().find(|o| o.id == order_id).unwrap();
    assert!(submitted.is_active());
    assert_eq!(submitted.txid(), Some("TX-CYCLE"));
    assert_eq!(bot.stats().await.cycles, 1);
}
