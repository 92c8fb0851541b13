//! Scripted in-memory exchange client for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::domain::{Action, ExchangeOrder, ExchangeOrderStatus, PairData};
use crate::exchanges::{ExchangeClient, ExchangeError, OrderCache, Result};

/// MockExchangeClient replays scripted balances, histories and txids.
pub struct MockExchangeClient {
    account: String,
    pair: PairData,
    cache: OrderCache,
    balances: RwLock<HashMap<String, Decimal>>,
    prices: RwLock<HashMap<String, Decimal>>,
    /// Orders revealed to the cache by the next `download_orders` call.
    history: Mutex<Vec<ExchangeOrder>>,
    /// Txids handed out for submissions/edits, in order.
    txids: Mutex<VecDeque<String>>,
    pub submitted: Mutex<Vec<Action>>,
    pub edited: Mutex<Vec<Action>>,
    pub cancelled: Mutex<Vec<String>>,
    pub downloads: AtomicUsize,
    pub fail_submissions: RwLock<Option<ExchangeError>>,
}

impl MockExchangeClient {
    pub fn new(account: &str, pair_id: &str) -> Self {
        let (base, quote) = pair_id.split_once('/').unwrap_or(("btc", "eur"));
        Self {
            account: account.to_string(),
            pair: PairData {
                id: pair_id.to_string(),
                base: base.to_string(),
                quote: quote.to_string(),
                min_volume: Decimal::new(1, 4),
                max_base_digits: 8,
                max_quote_digits: 2,
            },
            cache: OrderCache::new(),
            balances: RwLock::new(HashMap::new()),
            prices: RwLock::new(HashMap::new()),
            history: Mutex::new(Vec::new()),
            txids: Mutex::new(VecDeque::new()),
            submitted: Mutex::new(Vec::new()),
            edited: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            downloads: AtomicUsize::new(0),
            fail_submissions: RwLock::new(None),
        }
    }

    pub fn set_balance(&self, currency: &str, amount: Decimal) {
        self.balances
            .write()
            .unwrap()
            .insert(currency.to_string(), amount);
    }

    pub fn set_price(&self, pair: &str, price: Decimal) {
        self.prices
            .write()
            .unwrap()
            .insert(pair.to_string(), price);
    }

    /// Puts an order straight into the local snapshot.
    pub fn preload_order(&self, order: ExchangeOrder) {
        self.cache.record(order);
    }

    /// Stages an order that only becomes visible after a download.
    pub fn stage_history(&self, order: ExchangeOrder) {
        self.history.lock().unwrap().push(order);
    }

    /// Queues the txid returned by the next submission or edit.
    pub fn queue_txid(&self, txid: &str) {
        self.txids.lock().unwrap().push_back(txid.to_string());
    }

    fn next_txid(&self) -> String {
        self.txids
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| format!("MOCK-{}", self.cache.len() + 1))
    }
}

#[async_trait]
impl ExchangeClient for MockExchangeClient {
    fn name(&self) -> &str {
        "mock"
    }

    fn account(&self) -> &str {
        &self.account
    }

    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn get_exchange_order(
        &self,
        txid: &str,
        _redownload: bool,
    ) -> Result<Option<ExchangeOrder>> {
        Ok(self.cache.get(txid))
    }

    fn local_order(&self, txid: &str) -> Option<ExchangeOrder> {
        self.cache.get(txid)
    }

    fn has_local_order(&self, txid: &str) -> bool {
        self.cache.contains(txid)
    }

    fn record_exchange_order(&self, order: ExchangeOrder) {
        self.cache.record(order);
    }

    fn cached_orders(&self) -> Vec<ExchangeOrder> {
        self.cache.all()
    }

    async fn download_orders(&self, _status: ExchangeOrderStatus) -> Result<usize> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        let staged: Vec<ExchangeOrder> = self.history.lock().unwrap().clone();
        let count = staged.len();
        for order in staged {
            self.cache.record(order);
        }
        Ok(count)
    }

    async fn download_orders_by_txid(&self, _txids: &[String]) -> Result<()> {
        Ok(())
    }

    async fn request_balance(&self) -> Result<HashMap<String, Decimal>> {
        Ok(self.balances.read().unwrap().clone())
    }

    fn balance(&self, currency: &str) -> Decimal {
        self.balances
            .read()
            .unwrap()
            .get(currency)
            .copied()
            .unwrap_or_default()
    }

    async fn request_tickers(&self, pairs: &[String]) -> Result<HashMap<String, Decimal>> {
        let prices = self.prices.read().unwrap();
        Ok(pairs
            .iter()
            .filter_map(|p| prices.get(p).map(|v| (p.clone(), *v)))
            .collect())
    }

    fn pair_data(&self, pair: &str) -> Option<PairData> {
        if pair == self.pair.id {
            Some(self.pair.clone())
        } else {
            None
        }
    }

    async fn submit_order(&self, action: &Action) -> Result<String> {
        if let Some(error) = self.fail_submissions.write().unwrap().take() {
            return Err(error);
        }
        self.submitted.lock().unwrap().push(action.clone());
        Ok(self.next_txid())
    }

    async fn edit_order(&self, action: &Action) -> Result<String> {
        self.edited.lock().unwrap().push(action.clone());
        Ok(self.next_txid())
    }

    async fn cancel_order(&self, action: &Action) -> Result<()> {
        self.cancelled
            .lock()
            .unwrap()
            .push(action.order.txid().unwrap_or_default().to_string());
        Ok(())
    }
}
