//! Venue-agnostic interface to the lending venue and the AMM pool.
//!
//! The position controller only talks to this trait, so the in-process
//! [`SimulatedMarket`](super::SimulatedMarket) can be swapped for any other
//! execution backend without touching strategy code.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;

use super::error::MarketError;
use super::types::{
    BorrowKey, CollectedFees, LiquidityKey, LiquidityPosition, MarketBalance, SupplyKey, SwapFill,
};

/// Commands and queries against a lending venue plus a two-asset
/// concentrated-liquidity pool.
///
/// Swap amounts are always expressed in base units. Commands complete before
/// they return; callers await them one at a time.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketSimulator: Send + Sync {
    /// Supply `amount` of `asset` as collateral.
    async fn supply(&mut self, asset: &str, amount: Decimal) -> Result<SupplyKey, MarketError>;

    /// Borrow `amount` of `asset` against supplied collateral.
    async fn borrow(&mut self, asset: &str, amount: Decimal) -> Result<BorrowKey, MarketError>;

    /// Repay a borrow in full. Returns the amount repaid.
    async fn repay(&mut self, key: BorrowKey) -> Result<Decimal, MarketError>;

    /// Withdraw a supply in full. Returns the amount withdrawn.
    async fn withdraw(&mut self, key: SupplyKey) -> Result<Decimal, MarketError>;

    /// Buy `amount` base with quote.
    async fn buy(&mut self, amount: Decimal) -> Result<SwapFill, MarketError>;

    /// Sell `amount` base for quote.
    async fn sell(&mut self, amount: Decimal) -> Result<SwapFill, MarketError>;

    /// Provide as much liquidity as current balances allow over `[low_price, high_price]`.
    async fn add_liquidity(
        &mut self,
        low_price: Decimal,
        high_price: Decimal,
    ) -> Result<LiquidityKey, MarketError>;

    /// Close every liquidity position, returning the fees collected.
    async fn remove_all_liquidity(&mut self) -> Result<CollectedFees, MarketError>;

    /// Uncollected fees, lending net value and open position keys.
    fn market_balance(&self) -> MarketBalance;

    /// Free balance of every asset held.
    fn balances(&self) -> HashMap<String, Decimal>;

    /// Free balance of one asset (zero if never held).
    fn balance(&self, asset: &str) -> Decimal;

    /// Outstanding amount of a borrow, interest included.
    fn borrow_amount(&self, key: BorrowKey) -> Option<Decimal>;

    /// Open liquidity positions.
    fn liquidity_positions(&self) -> Vec<LiquidityPosition>;

    /// Pool swap fee rate.
    fn fee_rate(&self) -> Decimal;
}
