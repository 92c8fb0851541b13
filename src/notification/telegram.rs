//! Telegram delivery channel for notification events.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error};

use crate::notification::{format_event, Event, EventType, NotificationError, Notifier};

const TELEGRAM_API_URL: &str = "https://api.telegram.org/bot";
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_MESSAGE_LENGTH: usize = 4096;
const ASYNC_QUEUE_SIZE: usize = 100;

/// Telegram notifier configuration.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    /// Bot token from BotFather.
    pub bot_token: String,
    /// Chat id notifications are sent to.
    pub chat_id: String,
    /// Optional separate chat id for error events.
    pub error_chat_id: Option<String>,
    pub notify_orders: bool,
    pub notify_fills: bool,
    pub notify_errors: bool,
    pub notify_overview: bool,
}

impl TelegramConfig {
    pub fn new(bot_token: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            bot_token: bot_token.into(),
            chat_id: chat_id.into(),
            error_chat_id: None,
            notify_orders: true,
            notify_fills: true,
            notify_errors: true,
            notify_overview: true,
        }
    }

    pub fn with_error_chat_id(mut self, chat_id: impl Into<String>) -> Self {
        self.error_chat_id = Some(chat_id.into());
        self
    }
}

impl From<&crate::config::TelegramConfig> for TelegramConfig {
    fn from(cfg: &crate::config::TelegramConfig) -> Self {
        let mut telegram = TelegramConfig::new(cfg.bot_token.clone(), cfg.chat_id.clone());
        if !cfg.error_chat_id.is_empty() {
            telegram = telegram.with_error_chat_id(cfg.error_chat_id.clone());
        }
        telegram.notify_orders = cfg.notify_orders;
        telegram.notify_fills = cfg.notify_fills;
        telegram.notify_errors = cfg.notify_errors;
        telegram.notify_overview = cfg.notify_overview;
        telegram
    }
}

/// Sends notification events through the Telegram Bot API.
///
/// `send_async` goes through a bounded queue drained by a background
/// worker, so the decision loop never blocks on chat delivery.
pub struct TelegramNotifier {
    config: TelegramConfig,
    http_client: reqwest::Client,
    api_url: String,
    sender: mpsc::Sender<Event>,
    shutdown: Arc<Mutex<bool>>,
}

impl TelegramNotifier {
    pub fn new(config: TelegramConfig) -> Result<Self, NotificationError> {
        if config.bot_token.is_empty() {
            return Err(NotificationError::new("bot_token is required"));
        }
        if config.chat_id.is_empty() {
            return Err(NotificationError::new("chat_id is required"));
        }

        let http_client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| NotificationError::new(format!("failed to create HTTP client: {}", e)))?;

        let api_url = format!("{}{}", TELEGRAM_API_URL, config.bot_token);

        let (sender, receiver) = mpsc::channel(ASYNC_QUEUE_SIZE);
        let shutdown = Arc::new(Mutex::new(false));

        let notifier = Self {
            config: config.clone(),
            http_client: http_client.clone(),
            api_url: api_url.clone(),
            sender,
            shutdown: shutdown.clone(),
        };

        Self::spawn_worker(receiver, config, http_client, api_url, shutdown);

        Ok(notifier)
    }

    fn spawn_worker(
        mut receiver: mpsc::Receiver<Event>,
        config: TelegramConfig,
        http_client: reqwest::Client,
        api_url: String,
        shutdown: Arc<Mutex<bool>>,
    ) {
        tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                if *shutdown.lock().await {
                    break;
                }
                let chat_id = Self::chat_for(&config, event.event_type);
                let text = format_event(&event);
                if let Err(e) =
                    Self::deliver(&http_client, &api_url, chat_id, &text).await
                {
                    error!(
                        event_type = %event.event_type,
                        error = %e,
                        "failed to deliver telegram notification"
                    );
                }
            }
        });
    }

    fn chat_for(config: &TelegramConfig, event_type: EventType) -> &str {
        if event_type == EventType::Error {
            config.error_chat_id.as_deref().unwrap_or(&config.chat_id)
        } else {
            &config.chat_id
        }
    }

    /// Posts one message, splitting it when it exceeds the API limit.
    async fn deliver(
        http_client: &reqwest::Client,
        api_url: &str,
        chat_id: &str,
        text: &str,
    ) -> Result<(), NotificationError> {
        for chunk in chunk_message(text) {
            let response = http_client
                .post(format!("{}/sendMessage", api_url))
                .json(&serde_json::json!({
                    "chat_id": chat_id,
                    "text": chunk,
                    "parse_mode": "Markdown",
                }))
                .send()
                .await
                .map_err(|e| NotificationError::new(e.to_string()))?;

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                return Err(NotificationError::new(format!(
                    "telegram api {}: {}",
                    status, body
                )));
            }
            debug!(chat_id = %chat_id, "telegram notification delivered");
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, event: &Event) -> Result<(), NotificationError> {
        let chat_id = Self::chat_for(&self.config, event.event_type);
        let text = format_event(event);
        Self::deliver(&self.http_client, &self.api_url, chat_id, &text).await
    }

    fn send_async(&self, event: Event) {
        if self.sender.try_send(event).is_err() {
            error!("telegram notification queue full, dropping event");
        }
    }

    fn is_enabled(&self, event_type: EventType) -> bool {
        match event_type {
            EventType::OrderSubmitted | EventType::OrderCancelled => self.config.notify_orders,
            EventType::OrderFilled | EventType::DealCompleted | EventType::DealRecovered => {
                self.config.notify_fills
            }
            EventType::Error => self.config.notify_errors,
            EventType::Overview => self.config.notify_overview,
            EventType::Startup | EventType::Shutdown => true,
        }
    }

    async fn close(&self) -> Result<(), NotificationError> {
        *self.shutdown.lock().await = true;
        Ok(())
    }
}

/// Splits a message into chunks the API will accept.
fn chunk_message(text: &str) -> Vec<&str> {
    if text.len() <= MAX_MESSAGE_LENGTH {
        return vec![text];
    }
    let mut chunks = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        let mut end = rest.len().min(MAX_MESSAGE_LENGTH);
        while !rest.is_char_boundary(end) {
            end -= 1;
        }
        let (chunk, tail) = rest.split_at(end);
        chunks.push(chunk);
        rest = tail;
    }
    chunks
}
