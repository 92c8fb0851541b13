//! Notification event model and delivery contract.

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Kind of notification event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// An order was submitted or replaced on an exchange.
    OrderSubmitted,
    /// An order filled.
    OrderFilled,
    /// An order was cancelled.
    OrderCancelled,
    /// A deal closed with realized profit.
    DealCompleted,
    /// A deal was rebuilt from exchange history.
    DealRecovered,
    /// An error occurred.
    Error,
    /// The bot started.
    Startup,
    /// The bot stopped.
    Shutdown,
    /// Periodic statistics overview.
    Overview,
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::OrderSubmitted => write!(f, "order_submitted"),
            EventType::OrderFilled => write!(f, "order_filled"),
            EventType::OrderCancelled => write!(f, "order_cancelled"),
            EventType::DealCompleted => write!(f, "deal_completed"),
            EventType::DealRecovered => write!(f, "deal_recovered"),
            EventType::Error => write!(f, "error"),
            EventType::Startup => write!(f, "startup"),
            EventType::Shutdown => write!(f, "shutdown"),
            EventType::Overview => write!(f, "overview"),
        }
    }
}

/// Order lifecycle event data.
#[derive(Debug, Clone)]
pub struct OrderData {
    pub bot_id: String,
    pub order_id: String,
    pub account: String,
    pub pair: String,
    pub side: String,
    pub order_type: String,
    pub price: Option<Decimal>,
    pub cost: Option<Decimal>,
}

/// Deal completion data.
#[derive(Debug, Clone)]
pub struct DealCompletedData {
    pub bot_id: String,
    pub deal_id: String,
    pub profit: Decimal,
    pub quote: String,
}

/// Deal recovery data.
#[derive(Debug, Clone)]
pub struct DealRecoveredData {
    pub bot_id: String,
    pub deal_id: String,
    pub orders_matched: usize,
    pub still_open: bool,
}

/// Error event data.
#[derive(Debug, Clone)]
pub struct ErrorData {
    pub component: String,
    pub message: String,
}

/// Startup event data.
#[derive(Debug, Clone)]
pub struct StartupData {
    pub version: String,
    pub accounts: Vec<String>,
    pub bots: Vec<String>,
    pub dry_run: bool,
}

/// Shutdown event data.
#[derive(Debug, Clone)]
pub struct ShutdownData {
    pub reason: String,
    pub uptime: Duration,
    pub graceful: bool,
}

/// Periodic overview data.
#[derive(Debug, Clone)]
pub struct OverviewData {
    pub uptime: Duration,
    pub cycles: u64,
    pub orders_submitted: u64,
    pub orders_filled: u64,
    pub deals_completed: u64,
    pub realized_profit: Decimal,
    pub dry_run: bool,
}

/// Event payload.
#[derive(Debug, Clone)]
pub enum EventData {
    Order(OrderData),
    DealCompleted(DealCompletedData),
    DealRecovered(DealRecoveredData),
    Error(ErrorData),
    Startup(StartupData),
    Shutdown(ShutdownData),
    Overview(OverviewData),
}

/// A notification event.
#[derive(Debug, Clone)]
pub struct Event {
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub data: EventData,
}

impl Event {
    pub fn new(event_type: EventType, data: EventData) -> Self {
        Self {
            event_type,
            timestamp: Utc::now(),
            data,
        }
    }

    pub fn order_submitted(data: OrderData) -> Self {
        Self::new(EventType::OrderSubmitted, EventData::Order(data))
    }

    pub fn order_filled(data: OrderData) -> Self {
        Self::new(EventType::OrderFilled, EventData::Order(data))
    }

    pub fn order_cancelled(data: OrderData) -> Self {
        Self::new(EventType::OrderCancelled, EventData::Order(data))
    }

    pub fn deal_completed(data: DealCompletedData) -> Self {
        Self::new(EventType::DealCompleted, EventData::DealCompleted(data))
    }

    pub fn deal_recovered(data: DealRecoveredData) -> Self {
        Self::new(EventType::DealRecovered, EventData::DealRecovered(data))
    }

    pub fn error(data: ErrorData) -> Self {
        Self::new(EventType::Error, EventData::Error(data))
    }

    pub fn startup(data: StartupData) -> Self {
        Self::new(EventType::Startup, EventData::Startup(data))
    }

    pub fn shutdown(data: ShutdownData) -> Self {
        Self::new(EventType::Shutdown, EventData::Shutdown(data))
    }

    pub fn overview(data: OverviewData) -> Self {
        Self::new(EventType::Overview, EventData::Overview(data))
    }
}

/// Delivery contract for notification channels.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    /// Sends an event, waiting for delivery.
    async fn send(&self, event: &Event) -> Result<(), NotificationError>;

    /// Queues an event without blocking.
    fn send_async(&self, event: Event);

    /// Whether this channel wants events of the given type.
    fn is_enabled(&self, event_type: EventType) -> bool;

    /// Shuts the channel down.
    async fn close(&self) -> Result<(), NotificationError>;
}

/// Notification error.
#[derive(Debug, Clone)]
pub struct NotificationError {
    pub message: String,
}

impl fmt::Display for NotificationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NotificationError: {}", self.message)
    }
}

impl std::error::Error for NotificationError {}

impl NotificationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// No-op notifier used when no channel is configured.
#[derive(Default)]
pub struct NoopNotifier;

impl NoopNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl Notifier for NoopNotifier {
    async fn send(&self, _event: &Event) -> Result<(), NotificationError> {
        Ok(())
    }

    fn send_async(&self, _event: Event) {}

    fn is_enabled(&self, _event_type: EventType) -> bool {
        false
    }

    async fn close(&self) -> Result<(), NotificationError> {
        Ok(())
    }
}

/// Fans one event out to several channels.
pub struct MultiNotifier {
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl MultiNotifier {
    pub fn new(notifiers: Vec<Arc<dyn Notifier>>) -> Self {
        Self { notifiers }
    }
}

#[async_trait::async_trait]
impl Notifier for MultiNotifier {
    async fn send(&self, event: &Event) -> Result<(), NotificationError> {
        let mut errors = Vec::new();
        for notifier in &self.notifiers {
            if notifier.is_enabled(event.event_type) {
                if let Err(e) = notifier.send(event).await {
                    errors.push(e.message);
                }
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(NotificationError::new(errors.join("; ")))
        }
    }

    fn send_async(&self, event: Event) {
        for notifier in &self.notifiers {
            if notifier.is_enabled(event.event_type) {
                notifier.send_async(event.clone());
            }
        }
    }

    fn is_enabled(&self, event_type: EventType) -> bool {
        self.notifiers.iter().any(|n| n.is_enabled(event_type))
    }

    async fn close(&self) -> Result<(), NotificationError> {
        let mut errors = Vec::new();
        for notifier in &self.notifiers {
            if let Err(e) = notifier.close().await {
                errors.push(e.message);
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(NotificationError::new(errors.join("; ")))
        }
    }
}

// === Formatting ===

/// Formats an order lifecycle event.
pub fn format_order(event_type: EventType, data: &OrderData) -> String {
    let verb = match event_type {
        EventType::OrderSubmitted => "submitted",
        EventType::OrderFilled => "filled",
        EventType::OrderCancelled => "cancelled",
        _ => "updated",
    };
    let price = data
        .price
        .map(|p| format!(" at {}", p))
        .unwrap_or_default();
    let cost = data
        .cost
        .map(|c| format!(" ({} {})", c, parse_pair_quote(&data.pair)))
        .unwrap_or_default();
    format!(
        "[{}] {} {} order {}{}{} on {} #{}",
        data.order_id,
        data.order_type,
        data.side,
        verb,
        price,
        cost,
        data.account,
        format_pair_tag(&data.pair),
    )
}

/// Formats a deal completion.
pub fn format_deal_completed(data: &DealCompletedData) -> String {
    format!(
        "*Deal completed* [{}]\nProfit: *{} {}*\n{}",
        data.deal_id,
        data.profit,
        data.quote,
        Utc::now().format("%H:%M:%S UTC"),
    )
}

/// Formats a deal recovery report.
pub fn format_deal_recovered(data: &DealRecoveredData) -> String {
    format!(
        "*Deal recovered* [{}]\n{} orders matched from exchange history, deal is {}",
        data.deal_id,
        data.orders_matched,
        if data.still_open { "open" } else { "closed" },
    )
}

/// Formats an error.
pub fn format_error(data: &ErrorData) -> String {
    format!(
        "*Error* in {}\n{}\n{}",
        data.component,
        data.message,
        Utc::now().format("%H:%M:%S UTC"),
    )
}

/// Formats the startup announcement.
pub fn format_startup(data: &StartupData) -> String {
    let mode = if data.dry_run { "DRY RUN" } else { "LIVE" };
    format!(
        "*Bot started* v{} ({})\nAccounts: {}\nBots: {}",
        data.version,
        mode,
        data.accounts.join(", "),
        data.bots.join(", "),
    )
}

/// Formats the shutdown announcement.
pub fn format_shutdown(data: &ShutdownData) -> String {
    format!(
        "*Bot stopped* ({})\nReason: {}\nUptime: {}",
        if data.graceful { "graceful" } else { "forced" },
        data.reason,
        format_duration(data.uptime),
    )
}

/// Formats the periodic overview.
pub fn format_overview(data: &OverviewData) -> String {
    let mode = if data.dry_run { "DRY RUN" } else { "LIVE" };
    format!(
        "*Overview* {}\nUptime: {}\nCycles: {}\nOrders submitted: {} filled: {}\nDeals completed: {}\nRealized profit: *{}*",
        mode,
        format_duration(data.uptime),
        add_thousand_separators(data.cycles),
        data.orders_submitted,
        data.orders_filled,
        data.deals_completed,
        data.realized_profit,
    )
}

/// Formats any event into the channel message body.
pub fn format_event(event: &Event) -> String {
    match &event.data {
        EventData::Order(data) => format_order(event.event_type, data),
        EventData::DealCompleted(data) => format_deal_completed(data),
        EventData::DealRecovered(data) => format_deal_recovered(data),
        EventData::Error(data) => format_error(data),
        EventData::Startup(data) => format_startup(data),
        EventData::Shutdown(data) => format_shutdown(data),
        EventData::Overview(data) => format_overview(data),
    }
}

// === Helpers ===

/// Extracts the quote currency from a pair ("eur" from "btc/eur").
fn parse_pair_quote(pair: &str) -> &str {
    pair.split('/').nth(1).unwrap_or(pair)
}

/// Converts a pair into hashtag form ("btc/eur" -> "btc\_eur").
/// Underscore escaped for Telegram Markdown compatibility.
fn format_pair_tag(pair: &str) -> String {
    pair.replace('/', "\\_")
}

/// Formats a duration as the largest two applicable units.
fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs < 86400 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
    }
}

/// Adds thousand separators to a counter.
fn add_thousand_separators(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::new();
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

#[cfg(test)]
#[path = "tests.rs"]
mod tests;
