//! In-process market simulator for backtesting.
//!
//! Models a lending venue (supply/borrow with simple interest and an LTV cap)
//! and a two-asset concentrated-liquidity pool (fee-bearing swaps, range
//! positions that earn a share of pool fees while in range).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

use super::amm::{liquidity_for_amounts, position_amounts};
use super::error::MarketError;
use super::feed::MarketRow;
use super::traits::MarketSimulator;
use super::types::{
    ActionRecord, BorrowKey, CollectedFees, LendingPosition, LiquidityKey, LiquidityPosition,
    MarketAction, MarketBalance, SupplyKey, SwapFill,
};
use crate::config::MarketConfig;
use crate::utils::decimal::{to_decimal_or_zero, to_f64};

const MINUTES_PER_YEAR: Decimal = dec!(525600);

/// Scale kept on interest-bearing amounts so repeated accrual stays bounded.
const ACCRUAL_PRECISION: u32 = 18;

/// Simulated lending venue + AMM pool.
#[derive(Debug)]
pub struct SimulatedMarket {
    config: MarketConfig,
    balances: HashMap<String, Decimal>,
    prices: HashMap<String, Decimal>,
    supplies: BTreeMap<SupplyKey, LendingPosition>,
    borrows: BTreeMap<BorrowKey, LendingPosition>,
    liquidity: BTreeMap<LiquidityKey, LiquidityPosition>,
    key_counter: u64,
    now: Option<DateTime<Utc>>,
    actions: Vec<ActionRecord>,
    total_swap_fees: Decimal,
    total_interest_paid: Decimal,
}

impl SimulatedMarket {
    /// Create an empty market. Seed capital with [`set_balance`](Self::set_balance).
    pub fn new(config: MarketConfig) -> Self {
        Self {
            config,
            balances: HashMap::new(),
            prices: HashMap::new(),
            supplies: BTreeMap::new(),
            borrows: BTreeMap::new(),
            liquidity: BTreeMap::new(),
            key_counter: 0,
            now: None,
            actions: Vec::new(),
            total_swap_fees: Decimal::ZERO,
            total_interest_paid: Decimal::ZERO,
        }
    }

    pub fn config(&self) -> &MarketConfig {
        &self.config
    }

    /// Overwrite the free balance of an asset.
    pub fn set_balance(&mut self, asset: &str, amount: Decimal) {
        self.balances.insert(asset.to_string(), amount);
    }

    /// Overwrite the spot price of an asset.
    pub fn set_price(&mut self, asset: &str, price: Decimal) {
        self.prices.insert(asset.to_string(), price);
    }

    /// Advance to a new market row: accrue interest for the elapsed time,
    /// take the new prices, then accrue LP fees for the row's volume.
    pub fn update(&mut self, row: &MarketRow) {
        if let Some(prev) = self.now {
            let minutes = (row.timestamp - prev).num_minutes();
            if minutes > 0 {
                self.accrue_interest(Decimal::from(minutes));
            }
        }
        self.now = Some(row.timestamp);

        for (asset, price) in &row.prices {
            self.prices.insert(asset.clone(), *price);
        }

        self.accrue_fees(row.volume, row.pool_liquidity);
    }

    /// Every command executed so far, oldest first.
    pub fn actions(&self) -> &[ActionRecord] {
        &self.actions
    }

    /// Swap fees paid on buys and sells.
    pub fn total_swap_fees(&self) -> Decimal {
        self.total_swap_fees
    }

    /// Borrow interest accrued, in quote units at accrual-time prices.
    pub fn total_interest_paid(&self) -> Decimal {
        self.total_interest_paid
    }

    fn accrue_interest(&mut self, minutes: Decimal) {
        let year_fraction = minutes / MINUTES_PER_YEAR;
        let supply_factor = self.config.supply_apy * year_fraction;
        let borrow_factor = self.config.borrow_apy * year_fraction;

        for position in self.supplies.values_mut() {
            position.amount =
                (position.amount + position.amount * supply_factor).round_dp(ACCRUAL_PRECISION);
        }

        let mut interest_value = Decimal::ZERO;
        for position in self.borrows.values_mut() {
            let interest = (position.amount * borrow_factor).round_dp(ACCRUAL_PRECISION);
            position.amount += interest;
            let price = self.prices.get(&position.asset).copied().unwrap_or(Decimal::ZERO);
            interest_value += interest * price;
        }
        self.total_interest_paid += interest_value;
    }

    fn accrue_fees(&mut self, volume: Decimal, pool_liquidity: Decimal) {
        if volume <= Decimal::ZERO || self.liquidity.is_empty() {
            return;
        }
        let Some(price) = self.prices.get(&self.config.base_asset).copied() else {
            return;
        };
        if price <= Decimal::ZERO {
            return;
        }

        let others = to_f64(pool_liquidity).max(0.0);
        let pool_fee = volume * self.config.fee_rate;

        for position in self.liquidity.values_mut() {
            if price < position.lower_price || price > position.upper_price {
                continue;
            }
            let share = to_decimal_or_zero(position.liquidity / (position.liquidity + others));
            let earned = pool_fee * share;
            // Half the flow pays fees in quote, half in base.
            position.uncollected_quote += earned / Decimal::TWO;
            position.uncollected_base += earned / Decimal::TWO / price;
        }
    }

    fn price(&self, asset: &str) -> Result<Decimal, MarketError> {
        match self.prices.get(asset) {
            Some(price) => Ok(*price),
            None if asset == self.config.quote_asset => Ok(Decimal::ONE),
            None => Err(MarketError::MissingPrice(asset.to_string())),
        }
    }

    fn price_or_zero(&self, asset: &str) -> Decimal {
        self.price(asset).unwrap_or(Decimal::ZERO)
    }

    fn lending_value<'a>(
        &self,
        positions: impl Iterator<Item = &'a LendingPosition>,
    ) -> Result<Decimal, MarketError> {
        let mut total = Decimal::ZERO;
        for position in positions {
            total += position.amount * self.price(&position.asset)?;
        }
        Ok(total)
    }

    fn credit(&mut self, asset: &str, amount: Decimal) {
        *self.balances.entry(asset.to_string()).or_insert(Decimal::ZERO) += amount;
    }

    fn debit(&mut self, asset: &str, amount: Decimal) -> Result<(), MarketError> {
        let available = self.balance(asset);
        if available < amount {
            return Err(MarketError::InsufficientBalance {
                asset: asset.to_string(),
                required: amount,
                available,
            });
        }
        self.balances.insert(asset.to_string(), available - amount);
        Ok(())
    }

    fn next_key(&mut self) -> u64 {
        self.key_counter += 1;
        self.key_counter
    }

    fn record(&mut self, action: MarketAction) {
        self.actions.push(ActionRecord {
            timestamp: self.now,
            action,
        });
    }

    fn ensure_positive(amount: Decimal) -> Result<(), MarketError> {
        if amount <= Decimal::ZERO {
            return Err(MarketError::InvalidAmount(amount));
        }
        Ok(())
    }
}

#[async_trait]
impl MarketSimulator for SimulatedMarket {
    async fn supply(&mut self, asset: &str, amount: Decimal) -> Result<SupplyKey, MarketError> {
        Self::ensure_positive(amount)?;
        self.debit(asset, amount)?;

        let key = SupplyKey(self.next_key());
        self.supplies.insert(
            key,
            LendingPosition {
                asset: asset.to_string(),
                amount,
            },
        );
        self.record(MarketAction::Supply {
            asset: asset.to_string(),
            amount,
        });

        debug!(%key, %asset, %amount, "Supplied collateral");
        Ok(key)
    }

    async fn borrow(&mut self, asset: &str, amount: Decimal) -> Result<BorrowKey, MarketError> {
        Self::ensure_positive(amount)?;

        let price = self.price(asset)?;
        let borrow_value = self.lending_value(self.borrows.values())? + amount * price;
        let collateral_value = self.lending_value(self.supplies.values())?;
        if borrow_value > collateral_value * self.config.max_ltv {
            return Err(MarketError::LtvExceeded {
                borrow_value,
                collateral_value,
                max_ltv: self.config.max_ltv,
            });
        }

        self.credit(asset, amount);
        let key = BorrowKey(self.next_key());
        self.borrows.insert(
            key,
            LendingPosition {
                asset: asset.to_string(),
                amount,
            },
        );
        self.record(MarketAction::Borrow {
            asset: asset.to_string(),
            amount,
        });

        debug!(%key, %asset, %amount, %price, "Borrowed against collateral");
        Ok(key)
    }

    async fn repay(&mut self, key: BorrowKey) -> Result<Decimal, MarketError> {
        let position = self
            .borrows
            .get(&key)
            .cloned()
            .ok_or(MarketError::UnknownBorrow(key))?;

        self.debit(&position.asset, position.amount)?;
        self.borrows.remove(&key);
        self.record(MarketAction::Repay {
            key,
            amount: position.amount,
        });

        debug!(%key, asset = %position.asset, amount = %position.amount, "Repaid borrow");
        Ok(position.amount)
    }

    async fn withdraw(&mut self, key: SupplyKey) -> Result<Decimal, MarketError> {
        let position = self
            .supplies
            .get(&key)
            .cloned()
            .ok_or(MarketError::UnknownSupply(key))?;

        let borrow_value = self.lending_value(self.borrows.values())?;
        if borrow_value > Decimal::ZERO {
            let remaining = self.lending_value(self.supplies.values())?
                - position.amount * self.price(&position.asset)?;
            if borrow_value > remaining * self.config.max_ltv {
                return Err(MarketError::LtvExceeded {
                    borrow_value,
                    collateral_value: remaining,
                    max_ltv: self.config.max_ltv,
                });
            }
        }

        self.supplies.remove(&key);
        self.credit(&position.asset, position.amount);
        self.record(MarketAction::Withdraw {
            key,
            amount: position.amount,
        });

        debug!(%key, asset = %position.asset, amount = %position.amount, "Withdrew supply");
        Ok(position.amount)
    }

    async fn buy(&mut self, amount: Decimal) -> Result<SwapFill, MarketError> {
        Self::ensure_positive(amount)?;

        let base = self.config.base_asset.clone();
        let quote = self.config.quote_asset.clone();
        let price = self.price(&base)?;
        let notional = amount * price;
        let fee = notional * self.config.fee_rate;

        self.debit(&quote, notional + fee)?;
        self.credit(&base, amount);
        self.total_swap_fees += fee;
        self.record(MarketAction::Buy { amount, price });

        debug!(%amount, %price, %fee, "Bought base");
        Ok(SwapFill {
            base_amount: amount,
            quote_amount: notional + fee,
            price,
            fee,
        })
    }

    async fn sell(&mut self, amount: Decimal) -> Result<SwapFill, MarketError> {
        Self::ensure_positive(amount)?;

        let base = self.config.base_asset.clone();
        let quote = self.config.quote_asset.clone();
        let price = self.price(&base)?;
        let notional = amount * price;
        let fee = notional * self.config.fee_rate;

        self.debit(&base, amount)?;
        self.credit(&quote, notional - fee);
        self.total_swap_fees += fee;
        self.record(MarketAction::Sell { amount, price });

        debug!(%amount, %price, %fee, "Sold base");
        Ok(SwapFill {
            base_amount: amount,
            quote_amount: notional - fee,
            price,
            fee,
        })
    }

    async fn add_liquidity(
        &mut self,
        low_price: Decimal,
        high_price: Decimal,
    ) -> Result<LiquidityKey, MarketError> {
        if low_price <= Decimal::ZERO || high_price <= low_price {
            return Err(MarketError::InvalidRange {
                low: low_price,
                high: high_price,
            });
        }

        let base = self.config.base_asset.clone();
        let quote = self.config.quote_asset.clone();
        let price = self.price(&base)?;
        let base_available = self.balance(&base);
        let quote_available = self.balance(&quote);

        let liquidity = liquidity_for_amounts(
            to_f64(price),
            to_f64(low_price),
            to_f64(high_price),
            to_f64(base_available),
            to_f64(quote_available),
        );
        if !(liquidity.is_finite() && liquidity > 0.0) {
            return Err(MarketError::ZeroLiquidity {
                low: low_price,
                high: high_price,
            });
        }

        let amounts = position_amounts(liquidity, price, low_price, high_price);
        self.debit(&base, amounts.base.min(base_available))?;
        self.debit(&quote, amounts.quote.min(quote_available))?;

        let key = LiquidityKey(self.next_key());
        self.liquidity.insert(
            key,
            LiquidityPosition {
                key,
                lower_price: low_price,
                upper_price: high_price,
                liquidity,
                uncollected_base: Decimal::ZERO,
                uncollected_quote: Decimal::ZERO,
            },
        );
        self.record(MarketAction::AddLiquidity {
            lower: low_price,
            upper: high_price,
            liquidity,
        });

        info!(
            %key,
            lower = %low_price,
            upper = %high_price,
            base_used = %amounts.base,
            quote_used = %amounts.quote,
            "Liquidity added"
        );
        Ok(key)
    }

    async fn remove_all_liquidity(&mut self) -> Result<CollectedFees, MarketError> {
        if self.liquidity.is_empty() {
            return Ok(CollectedFees::default());
        }

        let base = self.config.base_asset.clone();
        let quote = self.config.quote_asset.clone();
        let price = self.price(&base)?;

        let mut fees = CollectedFees::default();
        for (_, position) in std::mem::take(&mut self.liquidity) {
            let amounts = position_amounts(
                position.liquidity,
                price,
                position.lower_price,
                position.upper_price,
            );
            self.credit(&base, amounts.base + position.uncollected_base);
            self.credit(&quote, amounts.quote + position.uncollected_quote);
            fees += CollectedFees {
                base: position.uncollected_base,
                quote: position.uncollected_quote,
            };
        }

        self.record(MarketAction::RemoveLiquidity { fees });
        info!(fee_base = %fees.base, fee_quote = %fees.quote, "Liquidity removed");
        Ok(fees)
    }

    fn market_balance(&self) -> MarketBalance {
        let base_price = self.price_or_zero(&self.config.base_asset);
        let quote_price = self.price_or_zero(&self.config.quote_asset);

        let supplied: Decimal = self
            .supplies
            .values()
            .map(|p| p.amount * self.price_or_zero(&p.asset))
            .sum();
        let borrowed: Decimal = self
            .borrows
            .values()
            .map(|p| p.amount * self.price_or_zero(&p.asset))
            .sum();

        let mut balance = MarketBalance {
            lending_net_value: supplied - borrowed,
            supply_keys: self.supplies.keys().copied().collect(),
            borrow_keys: self.borrows.keys().copied().collect(),
            liquidity_keys: self.liquidity.keys().copied().collect(),
            ..Default::default()
        };

        for position in self.liquidity.values() {
            balance.uncollected_base += position.uncollected_base;
            balance.uncollected_quote += position.uncollected_quote;
            balance.liquidity_value += position_amounts(
                position.liquidity,
                base_price,
                position.lower_price,
                position.upper_price,
            )
            .value(base_price, quote_price);
        }

        balance
    }

    fn balances(&self) -> HashMap<String, Decimal> {
        self.balances.clone()
    }

    fn balance(&self, asset: &str) -> Decimal {
        self.balances.get(asset).copied().unwrap_or(Decimal::ZERO)
    }

    fn borrow_amount(&self, key: BorrowKey) -> Option<Decimal> {
        self.borrows.get(&key).map(|p| p.amount)
    }

    fn liquidity_positions(&self) -> Vec<LiquidityPosition> {
        self.liquidity.values().cloned().collect()
    }

    fn fee_rate(&self) -> Decimal {
        self.config.fee_rate
    }
}
