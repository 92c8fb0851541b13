//! Status notifications: the core emits human-readable events, delivery
//! channels decide where they go.

mod notifier;
mod telegram;

pub use notifier::{
    format_deal_completed, format_deal_recovered, format_error, format_event, format_order,
    format_overview, format_shutdown, format_startup, DealCompletedData, DealRecoveredData,
    ErrorData, Event, EventData, EventType, MultiNotifier, NoopNotifier, NotificationError,
    Notifier, OrderData, OverviewData, ShutdownData, StartupData,
};
pub use telegram::{TelegramConfig, TelegramNotifier};
