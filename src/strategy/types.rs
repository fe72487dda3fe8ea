//! Value types shared by the strategy components.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Capital split produced by the optimizer, as fractions of total capital.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    /// Quote supplied to the lending venue as collateral
    pub supply_to_lending: Decimal,
    /// Quote kept out of lending
    pub reserve_uninvested: Decimal,
    /// Quote deployed into the pool
    pub quote_in_pool: Decimal,
    /// Base value deployed into the pool
    pub base_in_pool: Decimal,
    /// Base value borrowed from the lending venue
    pub base_borrowed: Decimal,
    /// Borrowed base value swapped into quote
    pub quote_from_borrow_swap: Decimal,
}

impl Allocation {
    /// Capital working in the pool, the quantity the optimizer maximizes.
    pub fn amm_deployed(&self) -> Decimal {
        self.quote_in_pool + self.base_in_pool
    }

    /// Fields in optimizer variable order `x0..x5`.
    pub fn as_array(&self) -> [Decimal; 6] {
        [
            self.supply_to_lending,
            self.reserve_uninvested,
            self.quote_in_pool,
            self.base_in_pool,
            self.base_borrowed,
            self.quote_from_borrow_swap,
        ]
    }
}

/// Price band as multipliers of the spot price at entry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub h: Decimal,
    pub l: Decimal,
}

impl Band {
    pub fn new(h: Decimal, l: Decimal) -> Self {
        Self { h, l }
    }

    pub fn width(&self) -> Decimal {
        self.h - self.l
    }

    /// `l < 1 < h` with at least `min_width` between the bounds.
    pub fn is_usable(&self, min_width: Decimal) -> bool {
        self.l > Decimal::ZERO
            && self.l < Decimal::ONE
            && self.h > Decimal::ONE
            && self.width() >= min_width
    }

    pub fn upper_price(&self, price: Decimal) -> Decimal {
        price * self.h
    }

    pub fn lower_price(&self, price: Decimal) -> Decimal {
        price * self.l
    }
}

/// The open hedged position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Position {
    pub band: Band,
    pub sigma_at_entry: f64,
    pub allocation: Allocation,
    /// Net value (fees excluded) when the position was opened
    pub entry_net_value: Decimal,
    pub entry_timestamp: DateTime<Utc>,
    pub entry_price: Decimal,
    pub h_price: Decimal,
    pub l_price: Decimal,
}

impl Position {
    /// Spot outside `[l_price, h_price]`.
    pub fn is_out_of_range(&self, price: Decimal) -> bool {
        price < self.l_price || price > self.h_price
    }
}
