//! Per-account snapshot of exchange orders keyed by transaction id.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::domain::ExchangeOrder;

/// OrderCache holds the last known remote state of every order the
/// account has touched.
///
/// Concurrent fetches can race: a bulk open-order download may return an
/// order that a targeted query has already seen close. New information
/// therefore replaces old only when the status differs from what is
/// cached, never rewriting a terminal entry with identical status but
/// staler fields.
#[derive(Debug, Default)]
pub struct OrderCache {
    orders: RwLock<HashMap<String, ExchangeOrder>>,
}

impl OrderCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an order. Returns true if the snapshot changed.
    pub fn record(&self, order: ExchangeOrder) -> bool {
        let mut orders = self.orders.write().expect("order cache poisoned");
        match orders.get(&order.txid) {
            Some(existing) if existing.status == order.status => false,
            _ => {
                orders.insert(order.txid.clone(), order);
                true
            }
        }
    }

    pub fn get(&self, txid: &str) -> Option<ExchangeOrder> {
        self.orders
            .read()
            .expect("order cache poisoned")
            .get(txid)
            .cloned()
    }

    pub fn contains(&self, txid: &str) -> bool {
        self.orders
            .read()
            .expect("order cache poisoned")
            .contains_key(txid)
    }

    pub fn all(&self) -> Vec<ExchangeOrder> {
        self.orders
            .read()
            .expect("order cache poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.orders.read().expect("order cache poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ExchangeOrderStatus, OrderSide, OrderType};
    use chrono::Utc;
    use rust_decimal::Decimal;

    fn order(txid: &str, status: ExchangeOrderStatus, volume: Decimal) -> ExchangeOrder {
        ExchangeOrder {
            txid: txid.to_string(),
            pair: "btc/eur".to_string(),
            side: OrderSide::Buy,
            order_type: OrderType::Limit,
            status,
            volume,
            price: Decimal::from(30000),
            cost: volume * Decimal::from(30000),
            fees: Decimal::ZERO,
            open_date: Utc::now(),
            close_date: None,
        }
    }

    #[test]
    fn test_record_new_order() {
        let cache = OrderCache::new();
        assert!(cache.record(order("TX-1", ExchangeOrderStatus::Open, Decimal::ONE)));
        assert!(cache.contains("TX-1"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_status_change_replaces_entry() {
        let cache = OrderCache::new();
        cache.record(order("TX-1", ExchangeOrderStatus::Open, Decimal::ONE));
        assert!(cache.record(order("TX-1", ExchangeOrderStatus::Closed, Decimal::TWO)));
        let cached = cache.get("TX-1").unwrap();
        assert_eq!(cached.status, ExchangeOrderStatus::Closed);
        assert_eq!(cached.volume, Decimal::TWO);
    }

    #[test]
    fn test_same_status_does_not_clobber() {
        let cache = OrderCache::new();
        cache.record(order("TX-1", ExchangeOrderStatus::Closed, Decimal::TWO));
        // A stale snapshot with the same status must not replace the
        // terminal fields already recorded.
        assert!(!cache.record(order("TX-1", ExchangeOrderStatus::Closed, Decimal::ONE)));
        assert_eq!(cache.get("TX-1").unwrap().volume, Decimal::TWO);
    }

    #[test]
    fn test_get_unknown_is_none() {
        let cache = OrderCache::new();
        assert!(cache.get("TX-404").is_none());
        assert!(cache.is_empty());
    }
}
