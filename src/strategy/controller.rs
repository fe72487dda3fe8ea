//! Position controller: the tick-driven state machine that opens, monitors
//! and unwinds the hedged lending + liquidity position.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::band::BandCalculator;
use super::error::StrategyError;
use super::optimizer::AllocationOptimizer;
use super::types::{Band, Position};
use super::volatility::VolatilityEstimator;
use crate::config::{Config, StrategyConfig};
use crate::market::amm::position_amounts;
use crate::market::{CollectedFees, MarketRow, MarketSimulator, PriceSeries};
use crate::utils::decimal::{relative_change, to_decimal_or_zero, DECIMAL_PRECISION};

/// Everything the controller talks to: the execution backend and the price history.
pub struct MarketContext<M> {
    pub market: M,
    pub feed: Arc<PriceSeries>,
}

impl<M> MarketContext<M> {
    pub fn new(market: M, feed: Arc<PriceSeries>) -> Self {
        Self { market, feed }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ControllerState {
    Idle,
    Invested,
}

/// Why an open position was unwound.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ExitReason {
    /// Spot left `[low, high]`
    OutOfRange {
        price: Decimal,
        low: Decimal,
        high: Decimal,
    },
    /// Net value moved beyond the rebalance tolerance
    NetValueDrift { current: Decimal, entry: Decimal },
}

impl ExitReason {
    pub fn label(&self) -> &'static str {
        match self {
            ExitReason::OutOfRange { .. } => "out_of_range",
            ExitReason::NetValueDrift { .. } => "net_value_drift",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExitOutcome {
    NothingToExit,
    Closed {
        reason: ExitReason,
        fees: CollectedFees,
    },
}

/// Why `invest` left the controller idle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SkipReason {
    MarketUnstable { sigma: f64 },
    DegenerateBand { band: Band },
    NoCapital,
}

impl SkipReason {
    pub fn label(&self) -> &'static str {
        match self {
            SkipReason::MarketUnstable { .. } => "market_unstable",
            SkipReason::DegenerateBand { .. } => "degenerate_band",
            SkipReason::NoCapital => "no_capital",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InvestOutcome {
    AlreadyInvested,
    Skipped(SkipReason),
    Opened(Position),
}

/// What happened during one tick.
///
/// A completed exit is reported even when the reinvest that follows fails.
#[derive(Debug)]
pub struct TickOutcome {
    pub exit: Option<ExitOutcome>,
    pub invest: Result<InvestOutcome, StrategyError>,
}

/// Drives a single hedged position against a [`MarketSimulator`].
pub struct PositionController<M: MarketSimulator> {
    context: MarketContext<M>,
    config: StrategyConfig,
    base_asset: String,
    quote_asset: String,
    volatility: VolatilityEstimator,
    band: BandCalculator,
    optimizer: AllocationOptimizer,
    position: Option<Position>,
    /// Fees collected on every exit so far, never reset
    collected_fees: CollectedFees,
}

impl<M: MarketSimulator> PositionController<M> {
    pub fn new(context: MarketContext<M>, config: &Config) -> Self {
        Self {
            context,
            volatility: VolatilityEstimator::from_config(&config.strategy),
            band: BandCalculator::from_config(&config.strategy),
            optimizer: AllocationOptimizer::new(),
            config: config.strategy.clone(),
            base_asset: config.market.base_asset.clone(),
            quote_asset: config.market.quote_asset.clone(),
            position: None,
            collected_fees: CollectedFees::default(),
        }
    }

    pub fn state(&self) -> ControllerState {
        if self.position.is_some() {
            ControllerState::Invested
        } else {
            ControllerState::Idle
        }
    }

    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    pub fn market(&self) -> &M {
        &self.context.market
    }

    pub fn market_mut(&mut self) -> &mut M {
        &mut self.context.market
    }

    pub fn into_context(self) -> MarketContext<M> {
        self.context
    }

    /// Fees collected on exits so far.
    pub fn collected_fees(&self) -> CollectedFees {
        self.collected_fees
    }

    /// Collected fees plus fees still sitting in open liquidity positions.
    pub fn accumulated_fees(&self) -> CollectedFees {
        let balance = self.context.market.market_balance();
        let mut fees = self.collected_fees;
        fees += CollectedFees {
            base: balance.uncollected_base,
            quote: balance.uncollected_quote,
        };
        fees
    }

    /// Process one tick: exit on band breach or value drift, then invest if idle.
    ///
    /// Errors only when the exit check or the unwind fails; reinvest
    /// failures are carried in [`TickOutcome::invest`].
    pub async fn on_tick(&mut self, row: &MarketRow) -> Result<TickOutcome, StrategyError> {
        let mut exit = None;

        if let Some(reason) = self.exit_trigger(row)? {
            info!(
                timestamp = %row.timestamp,
                reason = reason.label(),
                "Exit triggered"
            );
            exit = Some(self.exit(reason).await?);
        }

        let invest = self.invest(row).await;
        Ok(TickOutcome { exit, invest })
    }

    /// Band breach is checked before value drift.
    fn exit_trigger(&self, row: &MarketRow) -> Result<Option<ExitReason>, StrategyError> {
        let Some(position) = &self.position else {
            return Ok(None);
        };

        let price = self.price_of(row, &self.base_asset)?;
        if position.is_out_of_range(price) {
            return Ok(Some(ExitReason::OutOfRange {
                price,
                low: position.l_price,
                high: position.h_price,
            }));
        }

        let current = self.net_value(row)?;
        let tolerance = self.config.rebalance_tolerance;
        let lower = position.entry_net_value * (Decimal::ONE - tolerance);
        let upper = position.entry_net_value * (Decimal::ONE + tolerance);
        if current < lower || current > upper {
            return Ok(Some(ExitReason::NetValueDrift {
                current,
                entry: position.entry_net_value,
            }));
        }

        debug!(
            %price,
            net_value = %current,
            drift = %relative_change(current, position.entry_net_value),
            "Position within band and tolerance"
        );
        Ok(None)
    }

    /// Open a position if idle and the market allows it.
    pub async fn invest(&mut self, row: &MarketRow) -> Result<InvestOutcome, StrategyError> {
        if self.position.is_some() {
            return Ok(InvestOutcome::AlreadyInvested);
        }

        let sigma = self.volatility.estimate(&self.context.feed, row.timestamp);
        let sigma_dec = to_decimal_or_zero(sigma);
        if sigma_dec > self.config.volatility_threshold {
            warn!(
                timestamp = %row.timestamp,
                sigma,
                threshold = %self.config.volatility_threshold,
                "Market too unstable, staying idle"
            );
            return Ok(InvestOutcome::Skipped(SkipReason::MarketUnstable { sigma }));
        }

        let band = self
            .band
            .compute(sigma_dec, self.config.upper_amp, self.config.lower_amp);
        if !band.is_usable(self.config.min_band_width) {
            debug!(h = %band.h, l = %band.l, sigma, "Degenerate band, staying idle");
            return Ok(InvestOutcome::Skipped(SkipReason::DegenerateBand { band }));
        }

        let base_price = self.price_of(row, &self.base_asset)?;
        let quote_price = self.price_of(row, &self.quote_asset)?;
        let total_capital = self.cash_value(row)?;
        if total_capital <= Decimal::ZERO {
            debug!("No capital to deploy");
            return Ok(InvestOutcome::Skipped(SkipReason::NoCapital));
        }

        // No simulator command is issued before the allocation is known
        let allocation =
            self.optimizer
                .solve_band(&band, self.config.alpha, self.config.target_delta)?;

        let position = Position {
            band,
            sigma_at_entry: sigma,
            allocation,
            entry_net_value: self.net_value(row)?,
            entry_timestamp: row.timestamp,
            entry_price: base_price,
            h_price: band.upper_price(base_price),
            l_price: band.lower_price(base_price),
        };
        self.position = Some(position.clone());

        let alpha = self.config.alpha;
        let market = &mut self.context.market;

        let wanted_supply = (allocation.supply_to_lending * total_capital / quote_price)
            .round_dp(DECIMAL_PRECISION);
        let supply_amount = wanted_supply.min(market.balance(&self.quote_asset));
        if supply_amount > Decimal::ZERO {
            market.supply(&self.quote_asset, supply_amount).await?;

            let borrow_amount =
                (supply_amount * quote_price * alpha / base_price).round_dp(DECIMAL_PRECISION);
            if borrow_amount > Decimal::ZERO {
                market.borrow(&self.base_asset, borrow_amount).await?;
            }
        }

        let swap_amount = (allocation.quote_from_borrow_swap * total_capital / base_price)
            .round_dp(DECIMAL_PRECISION);
        if swap_amount > Decimal::ZERO {
            market.sell(swap_amount).await?;
        }

        market
            .add_liquidity(position.l_price, position.h_price)
            .await?;

        info!(
            timestamp = %row.timestamp,
            sigma,
            h = %band.h,
            l = %band.l,
            price = %base_price,
            low = %position.l_price,
            high = %position.h_price,
            capital = %total_capital,
            "Position opened"
        );
        Ok(InvestOutcome::Opened(position))
    }

    /// Unwind the open position: pull liquidity, repay borrows, withdraw
    /// collateral and sell leftover base into quote.
    ///
    /// The position stays recorded until every step succeeds, so a failed
    /// unwind leaves the controller invested.
    pub async fn exit(&mut self, reason: ExitReason) -> Result<ExitOutcome, StrategyError> {
        let Some(entry_timestamp) = self.entry_timestamp() else {
            debug!("Nothing to exit");
            return Ok(ExitOutcome::NothingToExit);
        };

        let market = &mut self.context.market;

        let fees = market.remove_all_liquidity().await?;
        self.collected_fees += fees;

        let fee_rate = market.fee_rate();
        let lending = market.market_balance();
        for key in lending.borrow_keys {
            let owed = market.borrow_amount(key).unwrap_or(Decimal::ZERO);
            let shortfall = owed - market.balance(&self.base_asset);
            if shortfall > Decimal::ZERO {
                market
                    .buy((shortfall * (Decimal::ONE + fee_rate)).round_dp(DECIMAL_PRECISION))
                    .await?;
            }
            market.repay(key).await?;
        }

        for key in lending.supply_keys {
            market.withdraw(key).await?;
        }

        let residual = market.balance(&self.base_asset);
        if residual > Decimal::ZERO {
            market.sell(residual).await?;
        }
        self.position = None;

        info!(
            reason = reason.label(),
            entry = %entry_timestamp,
            fee_base = %fees.base,
            fee_quote = %fees.quote,
            "Position closed"
        );
        Ok(ExitOutcome::Closed { reason, fees })
    }

    /// Value of free balances only.
    pub fn cash_value(&self, row: &MarketRow) -> Result<Decimal, StrategyError> {
        let mut total = Decimal::ZERO;
        for (asset, amount) in self.context.market.balances() {
            if amount.is_zero() {
                continue;
            }
            total += amount * self.price_of(row, &asset)?;
        }
        Ok(total)
    }

    /// Cash + lending net value + liquidity positions at current prices,
    /// uncollected fees excluded.
    pub fn net_value(&self, row: &MarketRow) -> Result<Decimal, StrategyError> {
        let base_price = self.price_of(row, &self.base_asset)?;
        let quote_price = self.price_of(row, &self.quote_asset)?;
        let market = &self.context.market;

        let lp_value: Decimal = market
            .liquidity_positions()
            .iter()
            .map(|p| {
                position_amounts(p.liquidity, base_price, p.lower_price, p.upper_price)
                    .value(base_price, quote_price)
            })
            .sum();

        Ok(self.cash_value(row)? + market.market_balance().lending_net_value + lp_value)
    }

    fn price_of(&self, row: &MarketRow, asset: &str) -> Result<Decimal, StrategyError> {
        match row.price(asset) {
            Some(price) => Ok(price),
            None if asset == self.quote_asset => Ok(Decimal::ONE),
            None => Err(StrategyError::MissingPrice(asset.to_string())),
        }
    }

    /// Timestamp the open position was entered at.
    pub fn entry_timestamp(&self) -> Option<DateTime<Utc>> {
        self.position.as_ref().map(|p| p.entry_timestamp)
    }
}
