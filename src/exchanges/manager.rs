//! Manager for the exchange clients of all configured accounts.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{error, info, warn};

use super::kraken::KrakenExchange;
use super::{ExchangeClient, ExchangeError, Result};
use crate::config::{AccountConfig, Config};

/// Manager owns one exchange client per account.
pub struct Manager {
    /// Map of account id to exchange client.
    clients: Arc<RwLock<HashMap<String, Arc<dyn ExchangeClient>>>>,
}

impl Manager {
    /// Creates a new Manager instance.
    pub fn new() -> Self {
        Self {
            clients: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Creates a Manager from configuration. Only enabled accounts are
    /// instantiated; an account with an unknown exchange kind is fatal
    /// for that account alone and is skipped with an error log.
    pub async fn from_config(config: &Config) -> Self {
        let manager = Self::new();

        for (account, account_config) in &config.accounts {
            if !account_config.enabled {
                info!(account = %account, "skipping disabled account");
                continue;
            }

            match Self::create_client(account, account_config) {
                Ok(client) => manager.register(client).await,
                Err(e) => {
                    error!(account = %account, error = %e, "failed to create exchange client");
                }
            }
        }

        manager
    }

    /// Factory for one account's exchange client.
    fn create_client(
        account: &str,
        config: &AccountConfig,
    ) -> Result<Arc<dyn ExchangeClient>> {
        match config.exchange.to_lowercase().as_str() {
            "kraken" => Ok(Arc::new(KrakenExchange::from_config(account, config))),
            other => Err(ExchangeError::Internal(format!(
                "unknown exchange: {}",
                other
            ))),
        }
    }

    /// Registers a client under its account id.
    pub async fn register(&self, client: Arc<dyn ExchangeClient>) {
        let account = client.account().to_string();
        let mut clients = self.clients.write().await;
        info!(account = %account, exchange = %client.name(), "registering exchange client");
        clients.insert(account, client);
    }

    /// Returns the client for an account, if configured.
    pub async fn get(&self, account: &str) -> Option<Arc<dyn ExchangeClient>> {
        let clients = self.clients.read().await;
        clients.get(account).cloned()
    }

    /// Returns all configured account ids.
    pub async fn accounts(&self) -> Vec<String> {
        let clients = self.clients.read().await;
        clients.keys().cloned().collect()
    }

    /// Returns all clients.
    pub async fn all(&self) -> Vec<Arc<dyn ExchangeClient>> {
        let clients = self.clients.read().await;
        clients.values().cloned().collect()
    }

    /// Connects every client. A failing account is logged and skipped;
    /// the others keep working.
    pub async fn connect_all(&self) -> usize {
        let clients = self.clients.read().await;
        let mut connected = 0;
        for (account, client) in clients.iter() {
            info!(account = %account, "connecting to exchange");
            match client.connect().await {
                Ok(()) => connected += 1,
                Err(e) => {
                    warn!(account = %account, error = %e, "failed to connect account");
                }
            }
        }
        connected
    }

    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }
}

impl Default for Manager {
    fn default() -> Self {
        Self::new()
    }
}
