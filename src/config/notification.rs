//! Notification configuration.

use serde::Deserialize;

/// Notification settings.
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    /// Telegram bot notifications.
    pub telegram: Option<TelegramConfig>,
}

/// Telegram notification settings.
#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    /// Whether Telegram notifications are active.
    #[serde(default)]
    pub enabled: bool,
    /// Bot token (loaded from TELEGRAM_BOT_TOKEN env var).
    #[serde(skip)]
    pub bot_token: String,
    /// Target chat/channel ID (loaded from TELEGRAM_CHAT_ID env var).
    #[serde(skip)]
    pub chat_id: String,
    /// Target chat ID for error notifications (loaded from TELEGRAM_ERROR_CHAT_ID env var).
    #[serde(skip)]
    pub error_chat_id: String,
    /// Send alerts when orders are submitted or replaced.
    #[serde(default)]
    pub notify_orders: bool,
    /// Send alerts when orders fill or deals complete.
    #[serde(default)]
    pub notify_fills: bool,
    /// Send alerts when errors occur.
    #[serde(default)]
    pub notify_errors: bool,
    /// Send periodic overview notifications with stats.
    #[serde(default)]
    pub notify_overview: bool,
    /// Seconds between overview notifications (default: 3600).
    pub overview_interval_secs: Option<u64>,
}
