//! Action: a validated, exchange-facing command derived from an order.

use rust_decimal::Decimal;

use super::order::{Order, OrderType, ValidationError};
use super::pair::PairData;

/// The exchange operation an action requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionCommand {
    SubmitOrder,
    EditOrder,
    CancelOrder,
}

impl std::fmt::Display for ActionCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionCommand::SubmitOrder => write!(f, "submitOrder"),
            ActionCommand::EditOrder => write!(f, "editOrder"),
            ActionCommand::CancelOrder => write!(f, "cancelOrder"),
        }
    }
}

/// Action carries one intent towards an exchange with complete,
/// pre-validated parameters. Construction snapshots the order, so the
/// executor never reads mutable strategy state.
#[derive(Debug, Clone)]
pub struct Action {
    pub command: ActionCommand,
    pub account: String,
    pub order: Order,
    /// Pair metadata; absent only for cancellations.
    pub pair: Option<PairData>,
}

impl Action {
    /// Builds a submission action for a market order.
    ///
    /// Constructing a market action from a limit order is a contract
    /// violation and fails immediately.
    pub fn market(order: &Order, pair: &PairData, account: &str) -> Result<Self, ValidationError> {
        if order.order_type != OrderType::Market {
            return Err(ValidationError::new(&order.id, "type"));
        }
        Ok(Self {
            command: ActionCommand::SubmitOrder,
            account: account.to_string(),
            order: order.clone(),
            pair: Some(pair.clone()),
        })
    }

    /// Builds a submission action for a limit order.
    pub fn limit(order: &Order, pair: &PairData, account: &str) -> Result<Self, ValidationError> {
        if order.order_type != OrderType::Limit {
            return Err(ValidationError::new(&order.id, "type"));
        }
        Ok(Self {
            command: ActionCommand::SubmitOrder,
            account: account.to_string(),
            order: order.clone(),
            pair: Some(pair.clone()),
        })
    }

    /// Builds a submission action matching the order's declared type.
    pub fn submit(order: &Order, pair: &PairData, account: &str) -> Result<Self, ValidationError> {
        match order.order_type {
            OrderType::Market => Self::market(order, pair, account),
            OrderType::Limit => Self::limit(order, pair, account),
        }
    }

    /// Builds an edit (replace-in-place) action for a pending order.
    pub fn replace(order: &Order, pair: &PairData, account: &str) -> Self {
        Self {
            command: ActionCommand::EditOrder,
            account: account.to_string(),
            order: order.clone(),
            pair: Some(pair.clone()),
        }
    }

    /// Builds a cancellation for a pending order.
    pub fn cancel(order: &Order, account: &str) -> Self {
        Self {
            command: ActionCommand::CancelOrder,
            account: account.to_string(),
            order: order.clone(),
            pair: None,
        }
    }

    /// Validates the action before any network call.
    ///
    /// Submissions and edits need a valid order (type, direction, volume,
    /// pair, positive limit price) and pair metadata; cancellations need
    /// a transaction id.
    pub fn perform_checks(&self) -> Result<(), ValidationError> {
        match self.command {
            ActionCommand::SubmitOrder | ActionCommand::EditOrder => {
                if self.pair.is_none() {
                    return Err(ValidationError::new(&self.order.id, "pair"));
                }
                self.order.validate()
            }
            ActionCommand::CancelOrder => match self.order.txid() {
                Some(_) => Ok(()),
                None => Err(ValidationError::new(&self.order.id, "txid")),
            },
        }
    }

    pub fn order_id(&self) -> &str {
        &self.order.id
    }

    /// Base volume the action will trade, falling back to the planned
    /// quote budget divided by the given price when no volume was sized.
    pub fn volume_at(&self, price: Decimal) -> Option<Decimal> {
        self.order.volume().or_else(|| {
            if price.is_zero() {
                None
            } else {
                self.order.volume_quote().map(|q| q / price)
            }
        })
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} on {}", self.command, self.order.id, self.account)
    }
}
