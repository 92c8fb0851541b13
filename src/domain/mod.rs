//! Domain models for the order/deal lifecycle.

mod action;
mod deal;
mod exchange_order;
mod order;
mod pair;

pub use action::{Action, ActionCommand};
pub use deal::{Deal, DealBook, DealStatus};
pub use exchange_order::{ExchangeOrder, ExchangeOrderStatus};
pub use order::{
    generate_order_id, Order, OrderSide, OrderState, OrderStatus, OrderTable, OrderType,
    TransitionError, ValidationError,
};
pub use pair::PairData;

#[cfg(test)]
mod tests;
