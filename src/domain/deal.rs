//! Deal entity: one DCA cycle grouping an entry buy, its safety orders
//! and the take-profit sell.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::order::OrderTable;

/// Deal status. A deal is never deleted; it is closed once balanced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DealStatus {
    Open,
    Closed,
}

impl std::fmt::Display for DealStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DealStatus::Open => write!(f, "open"),
            DealStatus::Closed => write!(f, "closed"),
        }
    }
}

impl std::str::FromStr for DealStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(DealStatus::Open),
            "closed" => Ok(DealStatus::Closed),
            _ => Err(format!("unknown deal status: {}", s)),
        }
    }
}

/// Deal groups the orders of one DCA cycle by id.
///
/// Orders are owned by the bot's [`OrderTable`]; a deal holds references
/// only, in insertion order (which is submission order).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deal {
    pub id: String,
    pub bot_id: String,
    pub account: String,
    /// Monotonic position of this deal in the bot's history.
    pub index: u32,
    pub buy_orders: Vec<String>,
    pub sell_orders: Vec<String>,
    pub status: DealStatus,
    /// Manual correction of the average entry price, used instead of the
    /// first executed buy when replaying the safety ladder.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub override_average_price: Option<Decimal>,
}

impl Deal {
    /// Creates an empty open deal with a deterministic id.
    pub fn new(bot_id: &str, account: &str, index: u32) -> Self {
        Self {
            id: format!("{}-{:04}", bot_id, index),
            bot_id: bot_id.to_string(),
            account: account.to_string(),
            index,
            buy_orders: Vec::new(),
            sell_orders: Vec::new(),
            status: DealStatus::Open,
            override_average_price: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == DealStatus::Open
    }

    pub fn has_order(&self, id: &str) -> bool {
        self.buy_orders.iter().any(|o| o == id) || self.sell_orders.iter().any(|o| o == id)
    }

    /// All referenced order ids, buys first.
    pub fn order_ids(&self) -> impl Iterator<Item = &String> {
        self.buy_orders.iter().chain(self.sell_orders.iter())
    }

    pub fn push_buy(&mut self, id: impl Into<String>) {
        self.buy_orders.push(id.into());
    }

    pub fn push_sell(&mut self, id: impl Into<String>) {
        self.sell_orders.push(id.into());
    }

    pub fn close(&mut self) {
        self.status = DealStatus::Closed;
    }

    /// Drops references to orders the table no longer tracks, returning
    /// the pruned ids so the caller can report them.
    pub fn prune_missing(&mut self, orders: &OrderTable) -> Vec<String> {
        let mut pruned = Vec::new();
        for list in [&mut self.buy_orders, &mut self.sell_orders] {
            list.retain(|id| {
                let known = orders.contains(id);
                if !known {
                    pruned.push(id.clone());
                }
                known
            });
        }
        pruned
    }
}

/// Arena of deals keyed by deal id.
#[derive(Debug, Default)]
pub struct DealBook {
    deals: BTreeMap<String, Deal>,
}

impl DealBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, deal: Deal) {
        self.deals.insert(deal.id.clone(), deal);
    }

    pub fn get(&self, id: &str) -> Option<&Deal> {
        self.deals.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Deal> {
        self.deals.get_mut(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Deal> {
        self.deals.values()
    }

    /// Ids of the open deals belonging to one bot, ordered by deal index.
    pub fn open_deals(&self, bot_id: &str) -> Vec<String> {
        let mut open: Vec<&Deal> = self
            .deals
            .values()
            .filter(|d| d.bot_id == bot_id && d.is_open())
            .collect();
        open.sort_by_key(|d| d.index);
        open.iter().map(|d| d.id.clone()).collect()
    }

    /// Next free deal index for a bot (monotonic over open and closed deals).
    pub fn next_index(&self, bot_id: &str) -> u32 {
        self.deals
            .values()
            .filter(|d| d.bot_id == bot_id)
            .map(|d| d.index + 1)
            .max()
            .unwrap_or(1)
    }

    pub fn len(&self) -> usize {
        self.deals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deals.is_empty()
    }
}
