//! Kraken implementation of the exchange client contract.

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::config::AccountConfig;
use crate::domain::{
    Action, ActionCommand, ExchangeOrder, ExchangeOrderStatus, OrderSide, OrderType, PairData,
};
use crate::exchanges::kraken::client::{Client, ClientError};
use crate::exchanges::{ExchangeClient, ExchangeError, OrderCache, Result};

const EXCHANGE_NAME: &str = "kraken";

/// Maximum acceptable clock drift between local and server time.
const MAX_CLOCK_DRIFT: chrono::Duration = chrono::Duration::seconds(5);

/// Kraken exchange client for one account.
pub struct KrakenExchange {
    account: String,
    client: Client,
    orders: OrderCache,
    balances: RwLock<HashMap<String, Decimal>>,
    /// Pair metadata keyed by our pair id ("btc/eur").
    pairs: RwLock<HashMap<String, PairData>>,
    /// Kraken pair names (both primary and altname) to our pair id.
    native_to_id: RwLock<HashMap<String, String>>,
    /// Our pair id to the altname used in requests.
    id_to_native: RwLock<HashMap<String, String>>,
    connected: AtomicBool,
}

impl KrakenExchange {
    /// Creates a KrakenExchange for one configured account.
    pub fn from_config(account: &str, config: &AccountConfig) -> Self {
        Self {
            account: account.to_string(),
            client: Client::from_config(config),
            orders: OrderCache::new(),
            balances: RwLock::new(HashMap::new()),
            pairs: RwLock::new(HashMap::new()),
            native_to_id: RwLock::new(HashMap::new()),
            id_to_native: RwLock::new(HashMap::new()),
            connected: AtomicBool::new(false),
        }
    }

    /// Downloads AssetPairs and rebuilds the pair metadata tables.
    async fn download_pairs(&self) -> Result<()> {
        let result = self
            .client
            .public("AssetPairs", None)
            .await
            .map_err(map_client_error)?;

        let entries = result
            .as_object()
            .ok_or_else(|| ExchangeError::Api("unexpected AssetPairs response".into()))?;

        let mut pairs = HashMap::new();
        let mut native_to_id = HashMap::new();
        let mut id_to_native = HashMap::new();

        for (native, data) in entries {
            let Some((pair, altname)) = convert_pair(data) else {
                continue;
            };
            native_to_id.insert(native.clone(), pair.id.clone());
            native_to_id.insert(altname.clone(), pair.id.clone());
            id_to_native.insert(pair.id.clone(), altname);
            pairs.insert(pair.id.clone(), pair);
        }

        info!(account = %self.account, pairs = pairs.len(), "downloaded pair metadata");

        *self.pairs.write().unwrap() = pairs;
        *self.native_to_id.write().unwrap() = native_to_id;
        *self.id_to_native.write().unwrap() = id_to_native;
        Ok(())
    }

    fn native_pair(&self, pair: &str) -> Result<String> {
        self.id_to_native
            .read()
            .unwrap()
            .get(pair)
            .cloned()
            .ok_or_else(|| ExchangeError::PairNotSupported(pair.to_string()))
    }

    fn pair_id_for_native(&self, native: &str) -> Option<String> {
        self.native_to_id.read().unwrap().get(native).cloned()
    }

    /// Converts one order payload, records it, and returns the result.
    fn record_payload(&self, txid: &str, payload: &serde_json::Value) -> Option<ExchangeOrder> {
        match self.convert_order(txid, payload) {
            Ok(order) => {
                self.orders.record(order.clone());
                Some(order)
            }
            Err(e) => {
                warn!(account = %self.account, txid = %txid, error = %e, "unparseable order payload");
                None
            }
        }
    }

    /// Converts a Kraken order payload into an [`ExchangeOrder`].
    fn convert_order(
        &self,
        txid: &str,
        payload: &serde_json::Value,
    ) -> std::result::Result<ExchangeOrder, String> {
        let descr = payload
            .get("descr")
            .ok_or_else(|| "missing descr".to_string())?;

        let order_type = match descr.get("ordertype").and_then(|v| v.as_str()) {
            Some("market") => OrderType::Market,
            Some(_) => OrderType::Limit,
            None => return Err("missing ordertype".to_string()),
        };
        let side = match descr.get("type").and_then(|v| v.as_str()) {
            Some("buy") => OrderSide::Buy,
            Some("sell") => OrderSide::Sell,
            _ => return Err("missing side".to_string()),
        };
        let status = match payload.get("status").and_then(|v| v.as_str()) {
            Some("open") | Some("pending") => ExchangeOrderStatus::Open,
            Some("closed") => ExchangeOrderStatus::Closed,
            Some("canceled") | Some("cancelled") | Some("expired") => {
                ExchangeOrderStatus::Cancelled
            }
            other => return Err(format!("unknown status: {:?}", other)),
        };

        let volume = if order_type == OrderType::Market {
            decimal_field(payload, "vol_exec")?
        } else {
            decimal_field(payload, "vol")?
        };
        let executed_price = decimal_field(payload, "price").unwrap_or_default();
        let price = if executed_price.is_zero() {
            decimal_field(descr, "price").unwrap_or_default()
        } else {
            executed_price
        };
        let cost = if order_type == OrderType::Market {
            decimal_field(payload, "cost").unwrap_or_default()
        } else {
            price * volume
        };
        let fees = decimal_field(payload, "fee").unwrap_or_default();

        let open_date = timestamp_field(payload, "opentm").unwrap_or_else(Utc::now);
        let close_date = if status == ExchangeOrderStatus::Open {
            None
        } else {
            timestamp_field(payload, "closetm")
        };

        let native_pair = descr
            .get("pair")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let pair = self
            .pair_id_for_native(native_pair)
            .unwrap_or_else(|| native_pair.to_lowercase());

        Ok(ExchangeOrder {
            txid: txid.to_string(),
            pair,
            side,
            order_type,
            status,
            volume,
            price,
            cost,
            fees,
            open_date,
            close_date,
        })
    }

    /// Builds the AddOrder/EditOrder parameter set for an action.
    fn order_params(&self, action: &Action) -> Result<BTreeMap<String, String>> {
        let order = &action.order;
        let mut params = BTreeMap::new();
        params.insert("pair".to_string(), self.native_pair(&order.pair)?);
        params.insert("type".to_string(), order.side.to_string());
        params.insert("ordertype".to_string(), order.order_type.to_string());
        let volume = order
            .volume()
            .ok_or_else(|| ExchangeError::Internal(format!("order {} has no volume", order.id)))?;
        params.insert("volume".to_string(), volume.normalize().to_string());
        if order.order_type == OrderType::Limit {
            let price = order.price().ok_or_else(|| {
                ExchangeError::Internal(format!("order {} has no price", order.id))
            })?;
            params.insert("price".to_string(), price.normalize().to_string());
        }
        Ok(params)
    }
}

#[async_trait]
impl ExchangeClient for KrakenExchange {
    fn name(&self) -> &str {
        EXCHANGE_NAME
    }

    fn account(&self) -> &str {
        &self.account
    }

    async fn connect(&self) -> Result<()> {
        let server_time = self
            .client
            .get_server_time()
            .await
            .map_err(|e| ExchangeError::Connection(format!("connect to kraken: {}", e)))?;

        let drift = (Utc::now() - server_time).abs();
        info!(
            account = %self.account,
            server_time = %server_time,
            clock_drift = ?drift,
            "connected to kraken"
        );
        if drift > MAX_CLOCK_DRIFT {
            warn!(account = %self.account, clock_drift = ?drift, "local clock drifts from exchange");
        }

        self.download_pairs().await?;
        self.request_balance().await?;
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn get_exchange_order(
        &self,
        txid: &str,
        redownload: bool,
    ) -> Result<Option<ExchangeOrder>> {
        if !redownload {
            if let Some(order) = self.orders.get(txid) {
                return Ok(Some(order));
            }
        }

        let mut params = BTreeMap::new();
        params.insert("txid".to_string(), txid.to_string());
        let result = self
            .client
            .private("QueryOrders", Some(params))
            .await
            .map_err(map_client_error)?;

        let Some(payload) = result.get(txid) else {
            debug!(account = %self.account, txid = %txid, "order not found on exchange");
            return Ok(None);
        };
        Ok(self.record_payload(txid, payload))
    }

    fn local_order(&self, txid: &str) -> Option<ExchangeOrder> {
        self.orders.get(txid)
    }

    fn has_local_order(&self, txid: &str) -> bool {
        self.orders.contains(txid)
    }

    fn record_exchange_order(&self, order: ExchangeOrder) {
        self.orders.record(order);
    }

    fn cached_orders(&self) -> Vec<ExchangeOrder> {
        self.orders.all()
    }

    async fn download_orders(&self, status: ExchangeOrderStatus) -> Result<usize> {
        let (endpoint, key) = match status {
            ExchangeOrderStatus::Open => ("OpenOrders", "open"),
            _ => ("ClosedOrders", "closed"),
        };
        let result = self
            .client
            .private(endpoint, None)
            .await
            .map_err(map_client_error)?;

        let mut count = 0;
        if let Some(orders) = result.get(key).and_then(|v| v.as_object()) {
            for (txid, payload) in orders {
                if self.record_payload(txid, payload).is_some() {
                    count += 1;
                }
            }
        }
        debug!(account = %self.account, endpoint = %endpoint, count, "downloaded orders");
        Ok(count)
    }

    async fn download_orders_by_txid(&self, txids: &[String]) -> Result<()> {
        // QueryOrders accepts at most 50 comma-separated txids per call.
        for chunk in txids.chunks(50) {
            let mut params = BTreeMap::new();
            params.insert("txid".to_string(), chunk.join(","));
            let result = self
                .client
                .private("QueryOrders", Some(params))
                .await
                .map_err(map_client_error)?;
            if let Some(orders) = result.as_object() {
                for (txid, payload) in orders {
                    self.record_payload(txid, payload);
                }
            }
        }
        Ok(())
    }

    async fn request_balance(&self) -> Result<HashMap<String, Decimal>> {
        let result = self
            .client
            .private("Balance", None)
            .await
            .map_err(map_client_error)?;

        let mut balances = HashMap::new();
        if let Some(entries) = result.as_object() {
            for (currency, amount) in entries {
                let amount = amount
                    .as_str()
                    .and_then(|s| Decimal::from_str(s).ok())
                    .unwrap_or_default();
                balances.insert(alias_currency(currency), amount);
            }
        }

        *self.balances.write().unwrap() = balances.clone();
        Ok(balances)
    }

    fn balance(&self, currency: &str) -> Decimal {
        self.balances
            .read()
            .unwrap()
            .get(&currency.to_lowercase())
            .copied()
            .unwrap_or_default()
    }

    async fn request_tickers(&self, pairs: &[String]) -> Result<HashMap<String, Decimal>> {
        if pairs.is_empty() {
            return Ok(HashMap::new());
        }
        let natives: Vec<String> = pairs
            .iter()
            .map(|p| self.native_pair(p))
            .collect::<Result<_>>()?;

        let mut params = BTreeMap::new();
        params.insert("pair".to_string(), natives.join(","));
        let result = self
            .client
            .public("Ticker", Some(params))
            .await
            .map_err(map_client_error)?;

        let mut prices = HashMap::new();
        if let Some(entries) = result.as_object() {
            for (native, ticker) in entries {
                let Some(pair) = self.pair_id_for_native(native) else {
                    continue;
                };
                // "c" holds [last trade price, lot volume].
                let last = ticker
                    .get("c")
                    .and_then(|v| v.get(0))
                    .and_then(|v| v.as_str())
                    .and_then(|s| Decimal::from_str(s).ok());
                if let Some(price) = last {
                    prices.insert(pair, price);
                }
            }
        }
        Ok(prices)
    }

    fn pair_data(&self, pair: &str) -> Option<PairData> {
        self.pairs.read().unwrap().get(pair).cloned()
    }

    async fn submit_order(&self, action: &Action) -> Result<String> {
        debug_assert!(action.command == ActionCommand::SubmitOrder);
        let params = self.order_params(action)?;
        let result = self
            .client
            .private("AddOrder", Some(params))
            .await
            .map_err(map_client_error)?;

        let txid = result
            .get("txid")
            .and_then(|v| v.get(0))
            .and_then(|v| v.as_str())
            .ok_or_else(|| ExchangeError::Api("AddOrder returned no txid".into()))?;
        info!(account = %self.account, order = %action.order.id, txid = %txid, "order submitted");
        Ok(txid.to_string())
    }

    async fn edit_order(&self, action: &Action) -> Result<String> {
        let original_txid = action
            .order
            .txid()
            .ok_or_else(|| ExchangeError::Internal("edit without txid".into()))?;

        let mut params = self.order_params(action)?;
        params.insert("txid".to_string(), original_txid.to_string());
        let result = self
            .client
            .private("EditOrder", Some(params))
            .await
            .map_err(map_client_error)?;

        let txid = result
            .get("txid")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ExchangeError::Api("EditOrder returned no txid".into()))?;
        info!(account = %self.account, order = %action.order.id, txid = %txid, "order replaced");
        Ok(txid.to_string())
    }

    async fn cancel_order(&self, action: &Action) -> Result<()> {
        let txid = action
            .order
            .txid()
            .ok_or_else(|| ExchangeError::Internal("cancel without txid".into()))?;

        let mut params = BTreeMap::new();
        params.insert("txid".to_string(), txid.to_string());
        self.client
            .private("CancelOrder", Some(params))
            .await
            .map_err(map_client_error)?;
        info!(account = %self.account, order = %action.order.id, txid = %txid, "order cancelled");
        Ok(())
    }
}

/// Maps transport-level failures onto the contract's error taxonomy.
fn map_client_error(error: ClientError) -> ExchangeError {
    match error {
        ClientError::RateLimitExceeded { current, limit } => {
            ExchangeError::RateLimited(format!("{}/{} per minute", current, limit))
        }
        ClientError::Request(e) if e.is_timeout() => ExchangeError::Timeout(e.to_string()),
        ClientError::Request(e) => ExchangeError::Connection(e.to_string()),
        ClientError::Json(e) => ExchangeError::Api(e.to_string()),
        ClientError::InvalidSecret(e) => ExchangeError::Internal(e),
        ClientError::Api(e) => {
            let message = e.message;
            if message.contains("Insufficient funds") {
                ExchangeError::InsufficientFunds
            } else if message.contains("Unknown order") {
                ExchangeError::OrderNotFound(message)
            } else {
                ExchangeError::Api(message)
            }
        }
    }
}

/// Normalizes Kraken's legacy asset codes ("XXBT", "ZEUR") to plain
/// lowercase currency names.
pub fn alias_currency(code: &str) -> String {
    match code.to_uppercase().as_str() {
        "XXBT" | "XBT" => "btc".to_string(),
        "XETH" | "ETH2" => "eth".to_string(),
        "XXDG" | "XDG" => "doge".to_string(),
        "ZEUR" => "eur".to_string(),
        "ZUSD" => "usd".to_string(),
        "XXRP" => "xrp".to_string(),
        other => other.to_lowercase(),
    }
}

fn convert_pair(data: &serde_json::Value) -> Option<(PairData, String)> {
    let altname = data.get("altname")?.as_str()?.to_string();
    let base = alias_currency(data.get("base")?.as_str()?);
    let quote = alias_currency(data.get("quote")?.as_str()?);
    let pair = PairData {
        id: format!("{}/{}", base, quote),
        base,
        quote,
        min_volume: data
            .get("ordermin")
            .and_then(|v| v.as_str())
            .and_then(|s| Decimal::from_str(s).ok())
            .unwrap_or_default(),
        max_base_digits: data.get("lot_decimals").and_then(|v| v.as_u64()).unwrap_or(8) as u32,
        max_quote_digits: data.get("pair_decimals").and_then(|v| v.as_u64()).unwrap_or(2) as u32,
    };
    Some((pair, altname))
}

fn decimal_field(value: &serde_json::Value, field: &str) -> std::result::Result<Decimal, String> {
    let raw = value
        .get(field)
        .ok_or_else(|| format!("missing {}", field))?;
    match raw {
        serde_json::Value::String(s) => {
            Decimal::from_str(s).map_err(|e| format!("bad {}: {}", field, e))
        }
        serde_json::Value::Number(n) => Decimal::from_str(&n.to_string())
            .map_err(|e| format!("bad {}: {}", field, e)),
        _ => Err(format!("bad {}", field)),
    }
}

fn timestamp_field(value: &serde_json::Value, field: &str) -> Option<DateTime<Utc>> {
    let seconds = value.get(field)?.as_f64()?;
    if seconds <= 0.0 {
        return None;
    }
    DateTime::from_timestamp_millis((seconds * 1000.0) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(status: &str, ordertype: &str) -> serde_json::Value {
        serde_json::json!({
            "status": status,
            "opentm": 1714723200.5,
            "closetm": 1714726800.0,
            "vol": "0.00340306",
            "vol_exec": "0.00333500",
            "cost": "100.02",
            "fee": "0.26",
            "price": "29985.0",
            "descr": {
                "pair": "XBTEUR",
                "type": "buy",
                "ordertype": ordertype,
                "price": "29385.3"
            }
        })
    }

    fn exchange() -> KrakenExchange {
        let config = AccountConfig {
            enabled: true,
            exchange: "kraken".to_string(),
            api_key: String::new(),
            api_secret: String::new(),
            maker_fee: Decimal::new(16, 4),
            taker_fee: Decimal::new(26, 4),
            rate_limit: None,
            watch_balance: vec![],
        };
        KrakenExchange::from_config("kraken-main", &config)
    }

    #[test]
    fn test_convert_closed_market_order() {
        let ex = exchange();
        let order = ex.convert_order("TX-1", &payload("closed", "market")).unwrap();
        assert_eq!(order.status, ExchangeOrderStatus::Closed);
        assert_eq!(order.order_type, OrderType::Market);
        assert_eq!(order.volume, Decimal::from_str("0.00333500").unwrap());
        assert_eq!(order.cost, Decimal::from_str("100.02").unwrap());
        assert!(order.close_date.is_some());
    }

    #[test]
    fn test_convert_open_limit_order_uses_descr_volume() {
        let ex = exchange();
        let mut raw = payload("open", "limit");
        raw["price"] = serde_json::Value::String("0".to_string());
        let order = ex.convert_order("TX-2", &raw).unwrap();
        assert_eq!(order.status, ExchangeOrderStatus::Open);
        assert_eq!(order.volume, Decimal::from_str("0.00340306").unwrap());
        // No executed price yet, so the limit price applies.
        assert_eq!(order.price, Decimal::from_str("29385.3").unwrap());
        assert!(order.close_date.is_none());
    }

    #[test]
    fn test_convert_cancelled_status() {
        let ex = exchange();
        let order = ex.convert_order("TX-3", &payload("canceled", "limit")).unwrap();
        assert_eq!(order.status, ExchangeOrderStatus::Cancelled);
    }

    #[test]
    fn test_unknown_status_is_an_error() {
        let ex = exchange();
        assert!(ex.convert_order("TX-4", &payload("queued", "limit")).is_err());
    }

    #[test]
    fn test_alias_currency_normalizes_legacy_codes() {
        assert_eq!(alias_currency("XXBT"), "btc");
        assert_eq!(alias_currency("ZEUR"), "eur");
        assert_eq!(alias_currency("XXDG"), "doge");
        assert_eq!(alias_currency("SOL"), "sol");
    }

    #[test]
    fn test_convert_pair_builds_precision_contract() {
        let data = serde_json::json!({
            "altname": "XBTEUR",
            "base": "XXBT",
            "quote": "ZEUR",
            "pair_decimals": 1,
            "lot_decimals": 8,
            "ordermin": "0.0001"
        });
        let (pair, altname) = convert_pair(&data).unwrap();
        assert_eq!(altname, "XBTEUR");
        assert_eq!(pair.id, "btc/eur");
        assert_eq!(pair.max_quote_digits, 1);
        assert_eq!(pair.max_base_digits, 8);
        assert_eq!(pair.min_volume, Decimal::from_str("0.0001").unwrap());
    }
}
