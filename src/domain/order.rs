//! Planned-order entity and its lifecycle state machine.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// OrderSide represents the direction of an order (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    /// OrderSideBuy indicates a buy order.
    Buy,
    /// OrderSideSell indicates a sell order.
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

/// OrderType represents the type of order execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    /// OrderTypeMarket is a market order that executes immediately at the best available price.
    Market,
    /// OrderTypeLimit is a limit order that executes at the specified price or better.
    Limit,
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderType::Market => write!(f, "market"),
            OrderType::Limit => write!(f, "limit"),
        }
    }
}

/// Lifecycle stage of a planned order, carrying only the fields valid for
/// that stage. Stage changes go through the explicit transition methods
/// on [`Order`]; there is no way to end up with a pending order without a
/// transaction id or a planned order without a quote budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum OrderState {
    /// Scheduled locally, not yet submitted to any exchange.
    Planned {
        /// Quote-currency budget this order is allowed to spend.
        volume_quote: Decimal,
        /// Limit price, pre-computed by the planner for ladder orders.
        #[serde(skip_serializing_if = "Option::is_none")]
        price: Option<Decimal>,
        /// Base volume, pre-sized by the planner where known.
        #[serde(skip_serializing_if = "Option::is_none")]
        volume: Option<Decimal>,
        /// Estimated fees in quote currency.
        #[serde(skip_serializing_if = "Option::is_none")]
        fees: Option<Decimal>,
    },
    /// Submitted and live on the exchange.
    Pending {
        txid: String,
        volume: Decimal,
        #[serde(skip_serializing_if = "Option::is_none")]
        price: Option<Decimal>,
        #[serde(skip_serializing_if = "Option::is_none")]
        volume_quote: Option<Decimal>,
    },
    /// Filled. Terminal.
    Executed {
        txid: String,
        volume: Decimal,
        #[serde(skip_serializing_if = "Option::is_none")]
        volume_quote: Option<Decimal>,
        close_date: DateTime<Utc>,
    },
    /// Cancelled before filling. Terminal.
    Cancelled {
        #[serde(skip_serializing_if = "Option::is_none")]
        txid: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        close_date: Option<DateTime<Utc>>,
    },
}

/// Discriminant of [`OrderState`], used for logging and storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Planned,
    Pending,
    Executed,
    Cancelled,
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderStatus::Planned => write!(f, "planned"),
            OrderStatus::Pending => write!(f, "pending"),
            OrderStatus::Executed => write!(f, "executed"),
            OrderStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "planned" => Ok(OrderStatus::Planned),
            "pending" => Ok(OrderStatus::Pending),
            "executed" => Ok(OrderStatus::Executed),
            "cancelled" => Ok(OrderStatus::Cancelled),
            _ => Err(format!("unknown order status: {}", s)),
        }
    }
}

/// A parameter of an order or action failed validation.
#[derive(Debug, Clone, thiserror::Error)]
#[error("[{id}]: invalid order parameter: {{{field}}}")]
pub struct ValidationError {
    /// Id of the offending order.
    pub id: String,
    /// Name of the offending field.
    pub field: &'static str,
}

impl ValidationError {
    pub fn new(id: impl Into<String>, field: &'static str) -> Self {
        Self { id: id.into(), field }
    }
}

/// An order was asked to change stage from a stage that does not allow it.
#[derive(Debug, Clone, thiserror::Error)]
#[error("[{id}]: cannot transition to {target} from {from}")]
pub struct TransitionError {
    pub id: String,
    pub from: OrderStatus,
    pub target: OrderStatus,
}

/// Order represents one unit of local trading intent.
///
/// Identity and trading parameters are fixed at creation; everything that
/// varies over the lifecycle lives in [`OrderState`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Stable identifier: bot id plus a random suffix.
    pub id: String,
    pub bot_id: String,
    pub account: String,
    /// Trading pair in "base/quote" format (e.g. "btc/eur").
    pub pair: String,
    pub side: OrderSide,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    /// When this order becomes actionable.
    pub open_date: DateTime<Utc>,
    #[serde(flatten)]
    pub state: OrderState,
}

impl Order {
    /// Creates a new planned order with a generated id.
    pub fn planned(
        bot_id: &str,
        account: &str,
        pair: &str,
        side: OrderSide,
        order_type: OrderType,
        open_date: DateTime<Utc>,
        volume_quote: Decimal,
    ) -> Self {
        Self {
            id: generate_order_id(bot_id),
            bot_id: bot_id.to_string(),
            account: account.to_string(),
            pair: pair.to_string(),
            side,
            order_type,
            open_date,
            state: OrderState::Planned {
                volume_quote,
                price: None,
                volume: None,
                fees: None,
            },
        }
    }

    /// Sets the pre-computed limit price on a planned order.
    pub fn with_price(mut self, value: Decimal) -> Self {
        if let OrderState::Planned { ref mut price, .. } = self.state {
            *price = Some(value);
        }
        self
    }

    /// Sets the pre-sized base volume on a planned order.
    pub fn with_volume(mut self, value: Decimal) -> Self {
        if let OrderState::Planned { ref mut volume, .. } = self.state {
            *volume = Some(value);
        }
        self
    }

    /// Sets the estimated fees on a planned order.
    pub fn with_fees(mut self, value: Decimal) -> Self {
        if let OrderState::Planned { ref mut fees, .. } = self.state {
            *fees = Some(value);
        }
        self
    }

    pub fn status(&self) -> OrderStatus {
        match self.state {
            OrderState::Planned { .. } => OrderStatus::Planned,
            OrderState::Pending { .. } => OrderStatus::Pending,
            OrderState::Executed { .. } => OrderStatus::Executed,
            OrderState::Cancelled { .. } => OrderStatus::Cancelled,
        }
    }

    pub fn is_planned(&self) -> bool {
        self.status() == OrderStatus::Planned
    }

    /// An order is active while it is live on the exchange.
    pub fn is_active(&self) -> bool {
        self.status() == OrderStatus::Pending
    }

    pub fn is_closed(&self) -> bool {
        self.status() == OrderStatus::Executed
    }

    /// Remote transaction id, absent until submitted.
    pub fn txid(&self) -> Option<&str> {
        match &self.state {
            OrderState::Planned { .. } => None,
            OrderState::Pending { txid, .. } | OrderState::Executed { txid, .. } => {
                Some(txid.as_str())
            }
            OrderState::Cancelled { txid, .. } => txid.as_deref(),
        }
    }

    /// Base volume, where known for the current stage.
    pub fn volume(&self) -> Option<Decimal> {
        match &self.state {
            OrderState::Planned { volume, .. } => *volume,
            OrderState::Pending { volume, .. } | OrderState::Executed { volume, .. } => {
                Some(*volume)
            }
            OrderState::Cancelled { .. } => None,
        }
    }

    /// Quote-currency budget or realized cost, where known.
    pub fn volume_quote(&self) -> Option<Decimal> {
        match &self.state {
            OrderState::Planned { volume_quote, .. } => Some(*volume_quote),
            OrderState::Pending { volume_quote, .. }
            | OrderState::Executed { volume_quote, .. } => *volume_quote,
            OrderState::Cancelled { .. } => None,
        }
    }

    /// Limit price, where known for the current stage.
    pub fn price(&self) -> Option<Decimal> {
        match &self.state {
            OrderState::Planned { price, .. } | OrderState::Pending { price, .. } => *price,
            _ => None,
        }
    }

    pub fn close_date(&self) -> Option<DateTime<Utc>> {
        match &self.state {
            OrderState::Executed { close_date, .. } => Some(*close_date),
            OrderState::Cancelled { close_date, .. } => *close_date,
            _ => None,
        }
    }

    /// Hours between `now` and this order's open date (or close date).
    pub fn hours_elapsed(&self, now: DateTime<Utc>, use_close_date: bool) -> f64 {
        let reference = if use_close_date {
            self.close_date().unwrap_or(self.open_date)
        } else {
            self.open_date
        };
        (now - reference).num_seconds().abs() as f64 / 3600.0
    }

    /// True if the open date falls on the same UTC calendar day as `now`.
    pub fn is_scheduled_for(&self, now: DateTime<Utc>) -> bool {
        self.open_date.date_naive() == now.date_naive()
    }

    /// Validates the stage invariants, naming the offending field.
    ///
    /// A planned order must carry a non-zero quote budget; any other
    /// live stage must carry a non-zero base volume; a limit order must
    /// carry a positive price while it can still be submitted.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.pair.is_empty() {
            return Err(ValidationError::new(&self.id, "pair"));
        }
        match &self.state {
            OrderState::Planned { volume_quote, .. } => {
                if volume_quote.is_zero() {
                    return Err(ValidationError::new(&self.id, "volume_quote"));
                }
            }
            OrderState::Pending { volume, .. } | OrderState::Executed { volume, .. } => {
                if volume.is_zero() {
                    return Err(ValidationError::new(&self.id, "volume"));
                }
            }
            OrderState::Cancelled { .. } => {}
        }
        if self.order_type == OrderType::Limit
            && !matches!(
                self.state,
                OrderState::Executed { .. } | OrderState::Cancelled { .. }
            )
        {
            match self.price() {
                Some(p) if p > Decimal::ZERO => {}
                _ => return Err(ValidationError::new(&self.id, "price")),
            }
        }
        Ok(())
    }

    /// Fills in the computed sizing on a planned order at submission
    /// time (the single rounding point for stacker market buys).
    pub fn size_planned(
        &mut self,
        new_volume: Decimal,
        new_price: Option<Decimal>,
    ) -> Result<(), TransitionError> {
        match &mut self.state {
            OrderState::Planned { volume, price, .. } => {
                *volume = Some(new_volume);
                if new_price.is_some() {
                    *price = new_price;
                }
                Ok(())
            }
            _ => Err(self.transition_error(OrderStatus::Planned)),
        }
    }

    /// Changes the execution type, e.g. when a stale pending limit order
    /// is re-submitted as a market order.
    pub fn set_order_type(&mut self, order_type: OrderType) {
        self.order_type = order_type;
    }

    /// Updates the live volume/price of a pending order after an edit.
    pub fn edited(
        &mut self,
        new_volume: Decimal,
        new_price: Option<Decimal>,
    ) -> Result<(), TransitionError> {
        match &mut self.state {
            OrderState::Pending { volume, price, .. } => {
                *volume = new_volume;
                if new_price.is_some() {
                    *price = new_price;
                }
                Ok(())
            }
            _ => Err(self.transition_error(OrderStatus::Pending)),
        }
    }

    /// Planned -> pending: the exchange accepted the submission.
    pub fn submitted(
        &mut self,
        txid: String,
        volume: Decimal,
        price: Option<Decimal>,
    ) -> Result<(), TransitionError> {
        match &self.state {
            OrderState::Planned { volume_quote, .. } => {
                self.state = OrderState::Pending {
                    txid,
                    volume,
                    price,
                    volume_quote: Some(*volume_quote),
                };
                Ok(())
            }
            _ => Err(self.transition_error(OrderStatus::Pending)),
        }
    }

    /// Pending -> pending with a fresh txid, after a cancel-and-replace.
    pub fn resubmitted(&mut self, new_txid: String) -> Result<(), TransitionError> {
        match &mut self.state {
            OrderState::Pending { txid, .. } => {
                *txid = new_txid;
                Ok(())
            }
            _ => Err(self.transition_error(OrderStatus::Pending)),
        }
    }

    /// Pending -> executed. Market orders may skip the pending stage, so
    /// planned -> executed is also allowed when the fill is reported in
    /// the submission response.
    pub fn filled(
        &mut self,
        txid: String,
        volume: Decimal,
        volume_quote: Option<Decimal>,
        close_date: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        match &self.state {
            OrderState::Planned { .. } | OrderState::Pending { .. } => {
                self.state = OrderState::Executed {
                    txid,
                    volume,
                    volume_quote,
                    close_date,
                };
                Ok(())
            }
            _ => Err(self.transition_error(OrderStatus::Executed)),
        }
    }

    /// Pending -> cancelled.
    pub fn cancelled(&mut self, close_date: Option<DateTime<Utc>>) -> Result<(), TransitionError> {
        match &self.state {
            OrderState::Pending { txid, .. } => {
                self.state = OrderState::Cancelled {
                    txid: Some(txid.clone()),
                    close_date,
                };
                Ok(())
            }
            _ => Err(self.transition_error(OrderStatus::Cancelled)),
        }
    }

    fn transition_error(&self, target: OrderStatus) -> TransitionError {
        TransitionError {
            id: self.id.clone(),
            from: self.status(),
            target,
        }
    }
}

impl std::fmt::Display for Order {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {} {} order on {} open from {}",
            self.id,
            self.order_type,
            self.side,
            self.account,
            self.open_date.format("%Y-%m-%d %H:%M")
        )
    }
}

/// Generates a stable order id from the bot id plus a random suffix.
pub fn generate_order_id(bot_id: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}:{}", bot_id, &suffix[..12])
}

/// Arena of planned orders keyed by order id.
///
/// Deals reference entries here by id; the table is the single owner.
#[derive(Debug, Default)]
pub struct OrderTable {
    orders: BTreeMap<String, Order>,
}

impl OrderTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, order: Order) {
        self.orders.insert(order.id.clone(), order);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.orders.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Order> {
        self.orders.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Order> {
        self.orders.get_mut(id)
    }

    pub fn remove(&mut self, id: &str) -> Option<Order> {
        self.orders.remove(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Order> {
        self.orders.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Order> {
        self.orders.values_mut()
    }

    /// All orders belonging to one bot.
    pub fn for_bot(&self, bot_id: &str) -> Vec<&Order> {
        self.orders.values().filter(|o| o.bot_id == bot_id).collect()
    }

    /// Finds an order by its exchange transaction id.
    pub fn by_txid(&self, txid: &str) -> Option<&Order> {
        self.orders.values().find(|o| o.txid() == Some(txid))
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}
