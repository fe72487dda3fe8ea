//! Errors raised by market simulator operations.

use rust_decimal::Decimal;
use thiserror::Error;

use super::types::{BorrowKey, SupplyKey};

/// Failures reported by a [`MarketSimulator`](super::MarketSimulator).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MarketError {
    #[error("insufficient {asset} balance: required {required}, available {available}")]
    InsufficientBalance {
        asset: String,
        required: Decimal,
        available: Decimal,
    },

    #[error("unknown supply position {0}")]
    UnknownSupply(SupplyKey),

    #[error("unknown borrow position {0}")]
    UnknownBorrow(BorrowKey),

    #[error("borrow value {borrow_value} would exceed {max_ltv} of collateral {collateral_value}")]
    LtvExceeded {
        borrow_value: Decimal,
        collateral_value: Decimal,
        max_ltv: Decimal,
    },

    #[error("no price available for {0}")]
    MissingPrice(String),

    #[error("amount must be positive, got {0}")]
    InvalidAmount(Decimal),

    #[error("invalid liquidity range [{low}, {high}]")]
    InvalidRange { low: Decimal, high: Decimal },

    #[error("balances support no liquidity in range [{low}, {high}]")]
    ZeroLiquidity { low: Decimal, high: Decimal },
}
