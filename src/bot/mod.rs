//! Bot coordinator: owns the order table, deal book, exchange clients
//! and strategies, and drives the periodic decision cycle.

mod error;
mod stats;

pub use error::BotError;
pub use stats::Stats;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::future::join_all;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::{Config, StrategyKind};
use crate::domain::{Action, ActionCommand, DealBook, OrderStatus, OrderTable};
use crate::exchanges::{ExchangeClient, ExchangeError, Manager};
use crate::notification::{
    DealCompletedData, DealRecoveredData, ErrorData, Event, NoopNotifier, Notifier, OrderData,
    OverviewData, ShutdownData, StartupData, TelegramNotifier,
};
use crate::storage::{PlanStorage, SqliteStorage, SqliteStorageConfig};
use crate::strategy::{
    CycleContext, CycleOutcome, StackerStrategy, Strategy, StrategyError, TraderStrategy,
};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);
const DEFAULT_CLOSED_SYNC_INTERVAL: Duration = Duration::from_secs(1800);
const DEFAULT_OVERVIEW_INTERVAL: Duration = Duration::from_secs(3600);

/// Bot startup options.
pub struct BotOptions {
    /// Log actions without sending anything to an exchange.
    pub dry_run: bool,
    /// Application version, reported in notifications.
    pub version: String,
}

/// Bot coordinates accounts, strategies, persistence and notifications.
pub struct Bot {
    cfg: Config,
    accounts: Manager,
    storage: Option<SqliteStorage>,
    notifier: Arc<dyn Notifier>,
    strategies: Vec<Box<dyn Strategy>>,

    orders: Mutex<OrderTable>,
    deals: Mutex<DealBook>,
    prices: Mutex<HashMap<String, Decimal>>,

    running: Mutex<bool>,
    started_at: Mutex<Option<Instant>>,
    stats: Mutex<Stats>,
    /// Order ids with a live submission, to keep submissions
    /// at-most-once per order per cycle.
    in_flight: Mutex<HashSet<String>>,
    last_closed_sync: Mutex<Option<Instant>>,

    dry_run: bool,
    version: String,
}

impl Bot {
    /// Builds a Bot from a loaded configuration.
    pub async fn from_config(cfg: Config, options: BotOptions) -> Result<Self, BotError> {
        let accounts = Manager::from_config(&cfg).await;
        if accounts.is_empty().await {
            return Err(BotError::Config("no usable accounts".into()));
        }
        Self::assemble(cfg, accounts, options).await
    }

    /// Builds a Bot from a config file path.
    pub async fn from_config_path(path: &str, options: BotOptions) -> Result<Self, BotError> {
        let cfg = Config::load(path).map_err(|e| BotError::Config(e.to_string()))?;
        Self::from_config(cfg, options).await
    }

    /// Assembly used by both the public constructor and the tests, which
    /// inject a manager with scripted clients.
    pub(crate) async fn assemble(
        cfg: Config,
        accounts: Manager,
        options: BotOptions,
    ) -> Result<Self, BotError> {
        // Persistence, when configured.
        let storage = match cfg.storage.as_ref() {
            Some(storage_cfg) if storage_cfg.enabled => {
                let storage = SqliteStorage::new(SqliteStorageConfig {
                    path: storage_cfg
                        .path
                        .clone()
                        .unwrap_or_else(|| SqliteStorageConfig::default().path),
                    ..SqliteStorageConfig::default()
                })
                .await?;
                Some(storage)
            }
            _ => None,
        };

        let (orders, deals) = match storage.as_ref() {
            Some(storage) => (storage.load_orders().await?, storage.load_deals().await?),
            None => (OrderTable::new(), DealBook::new()),
        };
        info!(
            orders = orders.len(),
            deals = deals.len(),
            "local state loaded"
        );

        // Notification channel, when configured.
        let notifier: Arc<dyn Notifier> = match cfg
            .notification
            .as_ref()
            .and_then(|n| n.telegram.as_ref())
            .filter(|t| t.enabled && !t.bot_token.is_empty() && !t.chat_id.is_empty())
        {
            Some(telegram) => match TelegramNotifier::new(telegram.into()) {
                Ok(notifier) => {
                    info!("Telegram notifier created");
                    Arc::new(notifier)
                }
                Err(e) => {
                    warn!(error = %e, "failed to create Telegram notifier");
                    Arc::new(NoopNotifier::new())
                }
            },
            None => Arc::new(NoopNotifier::new()),
        };

        // One strategy instance per active bot.
        let mut strategies: Vec<Box<dyn Strategy>> = Vec::new();
        for (bot_id, bot_cfg) in &cfg.bots {
            if !bot_cfg.active {
                info!(bot = %bot_id, "skipping inactive bot");
                continue;
            }
            let strategy: Box<dyn Strategy> = match bot_cfg.strategy {
                StrategyKind::Stacker => {
                    Box::new(StackerStrategy::new(bot_id, bot_cfg.clone()))
                }
                StrategyKind::Trader => Box::new(TraderStrategy::new(bot_id, bot_cfg.clone())),
            };
            info!(bot = %bot_id, strategy = %bot_cfg.strategy, "bot configured");
            strategies.push(strategy);
        }

        Ok(Self {
            cfg,
            accounts,
            storage,
            notifier,
            strategies,
            orders: Mutex::new(orders),
            deals: Mutex::new(deals),
            prices: Mutex::new(HashMap::new()),
            running: Mutex::new(false),
            started_at: Mutex::new(None),
            stats: Mutex::new(Stats::default()),
            in_flight: Mutex::new(HashSet::new()),
            last_closed_sync: Mutex::new(None),
            dry_run: options.dry_run,
            version: options.version,
        })
    }

    /// Starts the bot and the periodic decision loop.
    pub async fn start(&self) -> Result<(), BotError> {
        {
            let mut running = self.running.lock().await;
            if *running {
                return Err(BotError::AlreadyRunning);
            }
            *running = true;
        }
        {
            let mut started_at = self.started_at.lock().await;
            *started_at = Some(Instant::now());
        }

        let connected = self.accounts.connect_all().await;
        if connected == 0 {
            *self.running.lock().await = false;
            return Err(BotError::Exchange("no account could connect".into()));
        }

        let accounts = self.accounts.accounts().await;
        let bots: Vec<String> = self
            .strategies
            .iter()
            .map(|s| s.bot_id().to_string())
            .collect();

        info!(
            version = %self.version,
            dry_run = self.dry_run,
            accounts = ?accounts,
            bots = ?bots,
            "starting bot"
        );
        self.send_notification(Event::startup(StartupData {
            version: self.version.clone(),
            accounts,
            bots,
            dry_run: self.dry_run,
        }))
        .await;

        self.run_main_loop().await
    }

    /// Gracefully stops the bot.
    pub async fn stop(&self) -> Result<(), BotError> {
        {
            let mut running = self.running.lock().await;
            if !*running {
                return Ok(());
            }
            *running = false;
        }

        info!("stopping bot...");
        self.persist().await;

        let uptime = self.uptime().await;
        self.send_notification(Event::shutdown(ShutdownData {
            reason: "graceful shutdown".to_string(),
            uptime,
            graceful: true,
        }))
        .await;

        if let Err(e) = self.notifier.close().await {
            debug!(error = %e, "notifier close failed");
        }
        if let Some(storage) = &self.storage {
            storage.close().await?;
        }

        info!(uptime = ?uptime, "bot stopped");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        *self.running.lock().await
    }

    pub async fn stats(&self) -> Stats {
        self.stats.lock().await.clone()
    }

    pub async fn uptime(&self) -> Duration {
        self.started_at
            .lock()
            .await
            .map(|s| s.elapsed())
            .unwrap_or(Duration::ZERO)
    }

    fn poll_interval(&self) -> Duration {
        self.cfg
            .app
            .poll_interval_secs
            .map(Duration::from_secs)
            .filter(|d| !d.is_zero())
            .unwrap_or(DEFAULT_POLL_INTERVAL)
    }

    fn closed_sync_interval(&self) -> Duration {
        self.cfg
            .app
            .closed_sync_interval_secs
            .map(Duration::from_secs)
            .filter(|d| !d.is_zero())
            .unwrap_or(DEFAULT_CLOSED_SYNC_INTERVAL)
    }

    fn overview_interval(&self) -> Duration {
        self.cfg
            .notification
            .as_ref()
            .and_then(|n| n.telegram.as_ref())
            .and_then(|t| t.overview_interval_secs)
            .map(Duration::from_secs)
            .filter(|d| !d.is_zero())
            .unwrap_or(DEFAULT_OVERVIEW_INTERVAL)
    }

    /// Main decision loop: one cycle per poll tick, overview on its own
    /// timer. Cycles run to completion before the next starts.
    async fn run_main_loop(&self) -> Result<(), BotError> {
        let mut poll = tokio::time::interval(self.poll_interval());
        let mut overview = tokio::time::interval(self.overview_interval());
        overview.tick().await; // skip the immediate first tick

        info!(
            poll_interval = ?self.poll_interval(),
            overview_interval = ?self.overview_interval(),
            "starting decision loop"
        );

        loop {
            tokio::select! {
                _ = poll.tick() => {
                    if !self.is_running().await {
                        break;
                    }
                    self.run_cycle().await;
                }
                _ = overview.tick() => {
                    if !self.is_running().await {
                        break;
                    }
                    self.send_overview().await;
                }
            }
        }

        Ok(())
    }

    /// One full decision cycle across every bot.
    pub async fn run_cycle(&self) {
        {
            let mut stats = self.stats.lock().await;
            stats.cycles += 1;
        }

        self.update_prices().await;
        self.sync_exchange_status_if_due().await;
        self.check_pending_orders().await;

        for strategy in &self.strategies {
            self.run_bot_cycle(strategy.as_ref()).await;
        }

        self.persist().await;
    }

    /// Refreshes last-trade prices for every pair the bots watch.
    /// Settle-all: one failing account must not block the others.
    async fn update_prices(&self) {
        let clients = self.accounts.all().await;
        let tasks = clients.into_iter().map(|client| {
            let pairs: Vec<String> = self
                .cfg
                .bots_for_account(client.account())
                .iter()
                .filter_map(|bot_id| self.cfg.bots.get(*bot_id))
                .map(|b| b.pair.clone())
                .collect();
            async move {
                let account = client.account().to_string();
                (account, client.request_tickers(&pairs).await)
            }
        });

        for (account, result) in join_all(tasks).await {
            match result {
                Ok(tickers) => {
                    let mut prices = self.prices.lock().await;
                    for (pair, price) in tickers {
                        prices.insert(pair, price);
                    }
                }
                Err(e) => warn!(account = %account, error = %e, "ticker update failed"),
            }
        }
    }

    /// Periodically re-downloads open/closed order history and balances
    /// for every account, then refreshes any locally missing orders.
    async fn sync_exchange_status_if_due(&self) {
        {
            let last = self.last_closed_sync.lock().await;
            if let Some(last) = *last {
                if last.elapsed() < self.closed_sync_interval() {
                    return;
                }
            }
        }
        info!("syncing exchange order history");

        let clients = self.accounts.all().await;
        let tasks = clients.into_iter().map(|client| async move {
            let account = client.account().to_string();
            let mut errors = Vec::new();
            if let Err(e) = client
                .download_orders(crate::domain::ExchangeOrderStatus::Open)
                .await
            {
                errors.push(e);
            }
            if let Err(e) = client
                .download_orders(crate::domain::ExchangeOrderStatus::Closed)
                .await
            {
                errors.push(e);
            }
            if let Err(e) = client.request_balance().await {
                errors.push(e);
            }
            (account, errors)
        });

        for (account, errors) in join_all(tasks).await {
            for e in errors {
                warn!(account = %account, error = %e, "exchange sync failed");
            }
        }

        self.download_missing_orders().await;
        *self.last_closed_sync.lock().await = Some(Instant::now());
    }

    /// Executed orders whose txids the local snapshot does not know are
    /// bulk-refreshed, so profit math never runs on missing fills.
    async fn download_missing_orders(&self) {
        let missing: HashMap<String, Vec<String>> = {
            let orders = self.orders.lock().await;
            let mut missing: HashMap<String, Vec<String>> = HashMap::new();
            for order in orders.iter().filter(|o| o.is_closed()) {
                if let Some(txid) = order.txid() {
                    missing
                        .entry(order.account.clone())
                        .or_default()
                        .push(txid.to_string());
                }
            }
            missing
        };

        for (account, txids) in missing {
            let Some(client) = self.accounts.get(&account).await else {
                continue;
            };
            let unknown: Vec<String> = txids
                .into_iter()
                .filter(|t| !client.has_local_order(t))
                .collect();
            if unknown.is_empty() {
                continue;
            }
            debug!(account = %account, count = unknown.len(), "refreshing missing orders");
            if let Err(e) = client.download_orders_by_txid(&unknown).await {
                warn!(account = %account, error = %e, "failed to refresh missing orders");
            }
        }
    }

    /// Applies the exchange's verdict to every pending order: a closed
    /// remote order executes the local one, a cancelled remote order
    /// cancels it. Deal re-evaluation follows in the same cycle.
    pub async fn check_pending_orders(&self) {
        let pending: Vec<(String, String, String)> = {
            let orders = self.orders.lock().await;
            orders
                .iter()
                .filter(|o| o.status() == OrderStatus::Pending)
                .filter_map(|o| {
                    o.txid()
                        .map(|t| (o.id.clone(), o.account.clone(), t.to_string()))
                })
                .collect()
        };

        for (order_id, account, txid) in pending {
            let Some(client) = self.accounts.get(&account).await else {
                continue;
            };
            let remote = match client.get_exchange_order(&txid, false).await {
                Ok(remote) => remote,
                Err(e) => {
                    // Transient: never mutate local state speculatively.
                    warn!(order = %order_id, error = %e, "pending order lookup failed");
                    continue;
                }
            };
            let Some(remote) = remote else {
                continue;
            };

            let mut orders = self.orders.lock().await;
            let Some(order) = orders.get_mut(&order_id) else {
                continue;
            };
            match remote.status {
                crate::domain::ExchangeOrderStatus::Closed => {
                    let close_date = remote.close_date.unwrap_or_else(Utc::now);
                    if let Err(e) = order.filled(
                        txid.clone(),
                        remote.volume,
                        Some(remote.cost),
                        close_date,
                    ) {
                        warn!(order = %order_id, error = %e, "fill transition failed");
                        continue;
                    }
                    info!(order = %order_id, txid = %txid, "order filled");
                    self.stats.lock().await.orders_filled += 1;
                    self.send_notification(Event::order_filled(OrderData {
                        bot_id: order.bot_id.clone(),
                        order_id: order_id.clone(),
                        account: account.clone(),
                        pair: order.pair.clone(),
                        side: order.side.to_string(),
                        order_type: order.order_type.to_string(),
                        price: Some(remote.price),
                        cost: Some(remote.cost),
                    }))
                    .await;
                }
                crate::domain::ExchangeOrderStatus::Cancelled => {
                    if let Err(e) = order.cancelled(remote.close_date) {
                        warn!(order = %order_id, error = %e, "cancel transition failed");
                        continue;
                    }
                    warn!(order = %order_id, txid = %txid, "order cancelled on exchange");
                    self.stats.lock().await.orders_cancelled += 1;
                    self.send_notification(Event::order_cancelled(OrderData {
                        bot_id: order.bot_id.clone(),
                        order_id: order_id.clone(),
                        account: account.clone(),
                        pair: order.pair.clone(),
                        side: order.side.to_string(),
                        order_type: order.order_type.to_string(),
                        price: None,
                        cost: None,
                    }))
                    .await;
                }
                crate::domain::ExchangeOrderStatus::Open => {}
            }
        }
    }

    /// Runs one strategy's decision cycle and executes its actions.
    async fn run_bot_cycle(&self, strategy: &dyn Strategy) {
        let bot_id = strategy.bot_id();
        let Some(settings) = self.cfg.bots.get(bot_id) else {
            return;
        };
        let Some(client) = self.accounts.get(&settings.account).await else {
            warn!(bot = %bot_id, account = %settings.account, "no client for account");
            return;
        };
        let Some(account_cfg) = self.cfg.accounts.get(&settings.account) else {
            return;
        };

        let now = Utc::now();
        let mut orders = self.orders.lock().await;
        let mut deals = self.deals.lock().await;

        if !strategy.wants_cycle(&orders, &deals, now) {
            debug!(bot = %bot_id, "no active orders");
            return;
        }

        let Some(current_price) = self.prices.lock().await.get(&settings.pair).copied() else {
            warn!(bot = %bot_id, pair = %settings.pair, "price not available, skipping cycle");
            return;
        };
        let Some(pair) = client.pair_data(&settings.pair) else {
            warn!(bot = %bot_id, pair = %settings.pair, "pair metadata not available, skipping cycle");
            return;
        };

        let mut outcome = {
            let mut ctx = CycleContext {
                bot_id,
                settings,
                pair,
                now,
                current_price,
                maker_fee: account_cfg.maker_fee,
                taker_fee: account_cfg.taker_fee,
                client: client.as_ref(),
                orders: &mut orders,
                deals: &mut deals,
            };
            match strategy.decide(&mut ctx).await {
                Ok(outcome) => outcome,
                Err(e @ StrategyError::InvalidAction(_)) => {
                    error!(bot = %bot_id, error = %e, "cycle aborted");
                    self.send_notification(Event::error(ErrorData {
                        component: bot_id.to_string(),
                        message: e.to_string(),
                    }))
                    .await;
                    return;
                }
                Err(e) => {
                    warn!(bot = %bot_id, error = %e, "cycle failed");
                    return;
                }
            }
        };

        let actions = std::mem::take(&mut outcome.actions);
        if !actions.is_empty() {
            match self
                .execute_actions(client.as_ref(), actions, &mut orders)
                .await
            {
                Ok(executed) => {
                    debug!(bot = %bot_id, executed, "actions executed");
                }
                Err(e) => {
                    error!(bot = %bot_id, error = %e, "action execution aborted");
                    self.send_notification(Event::error(ErrorData {
                        component: bot_id.to_string(),
                        message: e.to_string(),
                    }))
                    .await;
                }
            }
        }
        drop(orders);
        drop(deals);

        self.report_outcome(bot_id, settings, &outcome).await;
        debug!(bot = %bot_id, status = %outcome.status(), "cycle complete");
    }

    /// Pushes a cycle's deal-level events to the notifier and stats.
    async fn report_outcome(
        &self,
        bot_id: &str,
        settings: &crate::config::BotConfig,
        outcome: &CycleOutcome,
    ) {
        let quote = settings
            .pair
            .split('/')
            .nth(1)
            .unwrap_or_default()
            .to_string();

        for (deal_id, profit) in &outcome.completed_deals {
            let mut stats = self.stats.lock().await;
            stats.deals_completed += 1;
            stats.realized_profit += *profit;
            drop(stats);
            self.send_notification(Event::deal_completed(DealCompletedData {
                bot_id: bot_id.to_string(),
                deal_id: deal_id.clone(),
                profit: *profit,
                quote: quote.clone(),
            }))
            .await;
        }

        if let Some(deal_id) = &outcome.recovered_deal {
            self.stats.lock().await.deals_recovered += 1;
            let (matched, still_open) = {
                let deals = self.deals.lock().await;
                deals
                    .get(deal_id)
                    .map(|d| (d.order_ids().count(), d.is_open()))
                    .unwrap_or((0, false))
            };
            self.send_notification(Event::deal_recovered(DealRecoveredData {
                bot_id: bot_id.to_string(),
                deal_id: deal_id.clone(),
                orders_matched: matched,
                still_open,
            }))
            .await;
        }
    }

    /// Executes one cycle's validated actions in order. A validation
    /// failure aborts the batch; a transient exchange failure leaves the
    /// order untouched for the next cycle ("unknown outcome").
    pub(crate) async fn execute_actions(
        &self,
        client: &dyn ExchangeClient,
        actions: Vec<Action>,
        orders: &mut OrderTable,
    ) -> Result<usize, BotError> {
        // Ids that get re-submitted later in this batch: their cancel is
        // half of a replace, not a terminal cancellation.
        let resubmitted: HashSet<String> = actions
            .iter()
            .filter(|a| a.command == ActionCommand::SubmitOrder)
            .map(|a| a.order_id().to_string())
            .collect();

        let mut executed = 0;
        for action in actions {
            if let Err(e) = action.perform_checks() {
                return Err(BotError::InvalidAction(e.to_string()));
            }

            let order_id = action.order_id().to_string();
            {
                let mut in_flight = self.in_flight.lock().await;
                if !in_flight.insert(order_id.clone()) {
                    warn!(order = %order_id, "submission already in flight, skipping");
                    continue;
                }
            }

            let result = self
                .apply_action(client, &action, orders, &resubmitted)
                .await;
            self.in_flight.lock().await.remove(&order_id);

            match result {
                Ok(()) => executed += 1,
                Err(e) if e.is_transient() => {
                    // The exchange may still have accepted it; re-query
                    // next cycle instead of assuming failure.
                    warn!(order = %order_id, error = %e, "action outcome unknown, will re-check next cycle");
                }
                Err(e) => {
                    warn!(order = %order_id, error = %e, "action failed");
                }
            }
        }
        Ok(executed)
    }

    async fn apply_action(
        &self,
        client: &dyn ExchangeClient,
        action: &Action,
        orders: &mut OrderTable,
        resubmitted: &HashSet<String>,
    ) -> Result<(), ExchangeError> {
        info!(order = %action.order_id(), command = %action.command, "executing action");
        if self.dry_run {
            info!(action = %action, "[dry run] action skipped");
            return Ok(());
        }

        match action.command {
            ActionCommand::SubmitOrder => {
                let txid = client.submit_order(action).await?;
                let volume = action.order.volume().unwrap_or_default();
                let price = action.order.price();

                if let Some(order) = orders.get_mut(action.order_id()) {
                    // Market orders usually close immediately; reflect
                    // whatever the exchange already reports.
                    let remote = client.get_exchange_order(&txid, true).await.ok().flatten();
                    let transition = match remote {
                        Some(remote) if remote.is_closed() => order.filled(
                            txid.clone(),
                            remote.volume,
                            Some(remote.cost),
                            remote.close_date.unwrap_or_else(Utc::now),
                        ),
                        _ => {
                            if order.is_active() {
                                order.resubmitted(txid.clone())
                            } else {
                                order.submitted(txid.clone(), volume, price)
                            }
                        }
                    };
                    if let Err(e) = transition {
                        warn!(order = %action.order_id(), error = %e, "state update failed after submit");
                    }
                }

                self.stats.lock().await.orders_submitted += 1;
                self.send_notification(Event::order_submitted(OrderData {
                    bot_id: action.order.bot_id.clone(),
                    order_id: action.order_id().to_string(),
                    account: action.account.clone(),
                    pair: action.order.pair.clone(),
                    side: action.order.side.to_string(),
                    order_type: action.order.order_type.to_string(),
                    price,
                    cost: action.order.volume_quote(),
                }))
                .await;
            }
            ActionCommand::EditOrder => {
                let new_txid = client.edit_order(action).await?;
                if let Some(order) = orders.get_mut(action.order_id()) {
                    let update = order
                        .edited(
                            action.order.volume().unwrap_or_default(),
                            action.order.price(),
                        )
                        .and_then(|_| order.resubmitted(new_txid));
                    if let Err(e) = update {
                        warn!(order = %action.order_id(), error = %e, "state update failed after edit");
                    }
                }
                self.stats.lock().await.orders_replaced += 1;
            }
            ActionCommand::CancelOrder => {
                client.cancel_order(action).await?;
                if resubmitted.contains(action.order_id()) {
                    // Replace flow: the follow-up submission owns the
                    // state transition.
                    debug!(order = %action.order_id(), "cancelled for replacement");
                } else if let Some(order) = orders.get_mut(action.order_id()) {
                    if let Err(e) = order.cancelled(Some(Utc::now())) {
                        warn!(order = %action.order_id(), error = %e, "state update failed after cancel");
                    }
                    self.stats.lock().await.orders_cancelled += 1;
                }
            }
        }
        Ok(())
    }

    /// Writes the order table and deal book through the storage layer.
    async fn persist(&self) {
        let Some(storage) = &self.storage else {
            return;
        };
        let orders = self.orders.lock().await;
        if let Err(e) = storage.save_orders(&orders).await {
            error!(error = %e, "failed to persist orders");
        }
        drop(orders);

        let deals = self.deals.lock().await;
        if let Err(e) = storage.save_deals(&deals).await {
            error!(error = %e, "failed to persist deals");
        }
    }

    async fn send_notification(&self, event: Event) {
        if !self.notifier.is_enabled(event.event_type) {
            return;
        }
        if let Err(e) = self.notifier.send(&event).await {
            debug!(event_type = %event.event_type, error = %e, "failed to send notification");
        }
    }

    async fn send_overview(&self) {
        let stats = self.stats().await;
        let uptime = self.uptime().await;
        self.send_notification(Event::overview(OverviewData {
            uptime,
            cycles: stats.cycles,
            orders_submitted: stats.orders_submitted,
            orders_filled: stats.orders_filled,
            deals_completed: stats.deals_completed,
            realized_profit: stats.realized_profit,
            dry_run: self.dry_run,
        }))
        .await;
    }

    #[cfg(test)]
    pub(crate) async fn orders_snapshot(&self) -> Vec<crate::domain::Order> {
        self.orders.lock().await.iter().cloned().collect()
    }

    #[cfg(test)]
    pub(crate) async fn insert_order(&self, order: crate::domain::Order) {
        self.orders.lock().await.insert(order);
    }
}

#[cfg(test)]
mod tests;
