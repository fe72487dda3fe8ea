//! Shared market types: position keys, balances and action records.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Handle for a lending supply position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SupplyKey(pub u64);

/// Handle for a lending borrow position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BorrowKey(pub u64);

/// Handle for a concentrated-liquidity position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LiquidityKey(pub u64);

impl fmt::Display for SupplyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "supply#{}", self.0)
    }
}

impl fmt::Display for BorrowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "borrow#{}", self.0)
    }
}

impl fmt::Display for LiquidityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lp#{}", self.0)
    }
}

/// A supply or borrow held at the lending venue.
#[derive(Debug, Clone, PartialEq)]
pub struct LendingPosition {
    pub asset: String,
    /// Principal plus accrued interest, in asset units
    pub amount: Decimal,
}

/// A concentrated-liquidity position in the pool.
#[derive(Debug, Clone, PartialEq)]
pub struct LiquidityPosition {
    pub key: LiquidityKey,
    pub lower_price: Decimal,
    pub upper_price: Decimal,
    pub liquidity: f64,
    /// Fees earned but not yet collected
    pub uncollected_base: Decimal,
    pub uncollected_quote: Decimal,
}

/// Fees paid out when liquidity is removed.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CollectedFees {
    pub base: Decimal,
    pub quote: Decimal,
}

impl CollectedFees {
    pub fn is_zero(&self) -> bool {
        self.base.is_zero() && self.quote.is_zero()
    }
}

impl std::ops::AddAssign for CollectedFees {
    fn add_assign(&mut self, rhs: Self) {
        self.base += rhs.base;
        self.quote += rhs.quote;
    }
}

/// Result of a spot conversion in the pool.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SwapFill {
    /// Base units bought or sold
    pub base_amount: Decimal,
    /// Quote units paid or received, fee included
    pub quote_amount: Decimal,
    pub price: Decimal,
    pub fee: Decimal,
}

/// Snapshot of everything the simulator holds outside plain balances.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MarketBalance {
    pub uncollected_base: Decimal,
    pub uncollected_quote: Decimal,
    /// Supplied value minus borrowed value, in quote units
    pub lending_net_value: Decimal,
    /// Current value of all liquidity positions, fees excluded
    pub liquidity_value: Decimal,
    pub supply_keys: Vec<SupplyKey>,
    pub borrow_keys: Vec<BorrowKey>,
    pub liquidity_keys: Vec<LiquidityKey>,
}

/// One command executed against the simulator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum MarketAction {
    Supply { asset: String, amount: Decimal },
    Borrow { asset: String, amount: Decimal },
    Repay { key: BorrowKey, amount: Decimal },
    Withdraw { key: SupplyKey, amount: Decimal },
    Buy { amount: Decimal, price: Decimal },
    Sell { amount: Decimal, price: Decimal },
    AddLiquidity { lower: Decimal, upper: Decimal, liquidity: f64 },
    RemoveLiquidity { fees: CollectedFees },
}

impl MarketAction {
    /// Short name used in logs and ordering checks.
    pub fn kind(&self) -> &'static str {
        match self {
            MarketAction::Supply { .. } => "supply",
            MarketAction::Borrow { .. } => "borrow",
            MarketAction::Repay { .. } => "repay",
            MarketAction::Withdraw { .. } => "withdraw",
            MarketAction::Buy { .. } => "buy",
            MarketAction::Sell { .. } => "sell",
            MarketAction::AddLiquidity { .. } => "add_liquidity",
            MarketAction::RemoveLiquidity { .. } => "remove_liquidity",
        }
    }
}

/// A timestamped [`MarketAction`].
#[derive(Debug, Clone, Serialize)]
pub struct ActionRecord {
    pub timestamp: Option<DateTime<Utc>>,
    pub action: MarketAction,
}
