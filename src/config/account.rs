//! Exchange-account configuration.

use rust_decimal::Decimal;
use serde::Deserialize;

/// Settings for one exchange account.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    /// Whether this account should be used.
    #[serde(default)]
    pub enabled: bool,
    /// Exchange kind backing the account (e.g. "kraken").
    pub exchange: String,
    /// API key (loaded from environment variable).
    #[serde(skip)]
    pub api_key: String,
    /// API secret (loaded from environment variable).
    #[serde(skip)]
    pub api_secret: String,
    /// Maker fee as a fraction (e.g. 0.0016 for 0.16%).
    pub maker_fee: Decimal,
    /// Taker fee as a fraction (e.g. 0.0026 for 0.26%).
    pub taker_fee: Decimal,
    /// Maximum API requests per minute.
    pub rate_limit: Option<i32>,
    /// Currencies whose balances the overview should report.
    #[serde(default)]
    pub watch_balance: Vec<String>,
}
