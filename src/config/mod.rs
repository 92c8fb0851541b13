//! Configuration loading and validation for the DCA bot.
//!
//! Uses serde_yaml to load YAML configuration files with support for
//! environment variable overrides for sensitive credentials.

mod account;
mod app;
mod bot;
mod error;
mod notification;
mod storage;

pub use account::AccountConfig;
pub use app::AppConfig;
pub use bot::{BotConfig, DealOptions, ScheduleOptions, StrategyKind};
pub use error::ConfigError;
pub use notification::{NotificationConfig, TelegramConfig};
pub use storage::StorageConfig;

use serde::Deserialize;
use std::{collections::HashMap, env, fs};

/// Root configuration structure for the DCA bot.
///
/// Required sections: app, accounts, bots.
/// Optional sections: notification, storage.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Application-level settings like name and environment.
    pub app: AppConfig,
    /// Maps account ids to their exchange configurations.
    pub accounts: HashMap<String, AccountConfig>,
    /// Maps bot ids to their strategy configurations.
    pub bots: HashMap<String, BotConfig>,
    /// Alert channels like Telegram (optional).
    pub notification: Option<NotificationConfig>,
    /// Order/deal persistence (optional).
    pub storage: Option<StorageConfig>,
}

impl Config {
    /// Load configuration from a YAML file at the given path.
    ///
    /// First loads environment variables from `.env` file (if exists),
    /// then loads YAML config and credentials from environment variables:
    /// - `{ACCOUNT}_API_KEY`, `{ACCOUNT}_API_SECRET`
    /// - `TELEGRAM_BOT_TOKEN`, `TELEGRAM_CHAT_ID`, `TELEGRAM_ERROR_CHAT_ID`
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        // Load .env file if it exists (ignore error if not found)
        dotenvy::dotenv().ok();

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        let mut config: Config = serde_yaml::from_str(&content)?;

        config.load_credentials_from_env();
        config.validate()?;

        Ok(config)
    }

    /// Load credentials from environment variables.
    fn load_credentials_from_env(&mut self) {
        for (name, account) in self.accounts.iter_mut() {
            if !account.enabled {
                continue;
            }

            let env_prefix = name.to_uppercase().replace('-', "_");
            account.api_key = env::var(format!("{}_API_KEY", env_prefix)).unwrap_or_default();
            account.api_secret = env::var(format!("{}_API_SECRET", env_prefix)).unwrap_or_default();
        }

        if let Some(ref mut notification) = self.notification {
            if let Some(ref mut telegram) = notification.telegram {
                if telegram.enabled {
                    telegram.bot_token = env::var("TELEGRAM_BOT_TOKEN").unwrap_or_default();
                    telegram.chat_id = env::var("TELEGRAM_CHAT_ID").unwrap_or_default();
                    telegram.error_chat_id =
                        env::var("TELEGRAM_ERROR_CHAT_ID").unwrap_or_default();
                }
            }
        }
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.app.name.is_empty() {
            return Err(ConfigError::Validation("app.name is required".into()));
        }

        let is_production = self.app.env != "development";

        let mut enabled_accounts = 0;
        for (name, account) in &self.accounts {
            if !account.enabled {
                continue;
            }
            enabled_accounts += 1;

            if account.exchange.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "account {}: exchange is required",
                    name
                )));
            }

            // Only require credentials in production/staging
            if is_production && (account.api_key.is_empty() || account.api_secret.is_empty()) {
                let env_prefix = name.to_uppercase().replace('-', "_");
                return Err(ConfigError::Validation(format!(
                    "account {}: API credentials not found (set {}_API_KEY and {}_API_SECRET env vars)",
                    name, env_prefix, env_prefix
                )));
            }
        }

        if enabled_accounts == 0 {
            return Err(ConfigError::Validation(
                "at least one account must be enabled".into(),
            ));
        }

        for (id, bot) in &self.bots {
            if !bot.active {
                continue;
            }
            if !self.accounts.contains_key(&bot.account) {
                return Err(ConfigError::Validation(format!(
                    "bot {}: unknown account {}",
                    id, bot.account
                )));
            }
            if bot.pair.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "bot {}: pair is required",
                    id
                )));
            }
            match bot.strategy {
                StrategyKind::Stacker => {
                    if bot.schedule.is_none() {
                        return Err(ConfigError::Validation(format!(
                            "bot {}: stacker strategy requires a schedule section",
                            id
                        )));
                    }
                    if bot.max_volume_quote.is_none() {
                        return Err(ConfigError::Validation(format!(
                            "bot {}: stacker strategy requires max_volume_quote",
                            id
                        )));
                    }
                }
                StrategyKind::Trader => {
                    if bot.deal.is_none() {
                        return Err(ConfigError::Validation(format!(
                            "bot {}: trader strategy requires a deal section",
                            id
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    /// Ids of the active bots trading on the given account.
    pub fn bots_for_account(&self, account: &str) -> Vec<&str> {
        self.bots
            .iter()
            .filter(|(_, b)| b.active && b.account == account)
            .map(|(id, _)| id.as_str())
            .collect()
    }
}
