//! Trading-pair metadata: the precision and minimum-volume contract.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// PairData describes one trading pair as reported by the exchange.
///
/// Every price/volume rounding in the crate goes through these values;
/// digit counts are never hard-coded anywhere else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairData {
    /// Pair identifier in "base/quote" format (e.g. "btc/eur").
    pub id: String,
    /// Base currency (the asset being accumulated).
    pub base: String,
    /// Quote currency (the asset being spent).
    pub quote: String,
    /// Smallest base volume the exchange accepts for an order.
    pub min_volume: Decimal,
    /// Maximum number of decimal digits for base volumes.
    pub max_base_digits: u32,
    /// Maximum number of decimal digits for quote prices.
    pub max_quote_digits: u32,
}

impl PairData {
    /// Rounds a base-currency volume to the pair's volume precision.
    pub fn round_volume(&self, volume: Decimal) -> Decimal {
        volume.round_dp(self.max_base_digits)
    }

    /// Rounds a quote-currency price or cost to the pair's price precision.
    pub fn round_price(&self, price: Decimal) -> Decimal {
        price.round_dp(self.max_quote_digits)
    }

    /// Raises a volume to the exchange minimum when it falls below it.
    pub fn clamp_volume(&self, volume: Decimal) -> Decimal {
        if volume < self.min_volume {
            self.min_volume
        } else {
            volume
        }
    }
}
