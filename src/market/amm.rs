//! Concentrated-liquidity position math.
//!
//! Prices are quoted as quote units per base unit. For a range `[pa, pb]` and
//! liquidity `L` at price `P`:
//!
//! - `P <= pa`: only base, `x = L (1/√pa - 1/√pb)`
//! - `pa < P < pb`: `x = L (1/√P - 1/√pb)`, `y = L (√P - √pa)`
//! - `P >= pb`: only quote, `y = L (√pb - √pa)`
//!
//! where `x` is the base amount and `y` the quote amount.

use rust_decimal::Decimal;

use crate::utils::decimal::{to_decimal_or_zero, to_f64};

/// Token amounts held by a liquidity position.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TokenAmounts {
    pub base: Decimal,
    pub quote: Decimal,
}

impl TokenAmounts {
    /// Value of both legs in quote units.
    pub fn value(&self, base_price: Decimal, quote_price: Decimal) -> Decimal {
        self.base * base_price + self.quote * quote_price
    }
}

/// Base and quote amounts for `liquidity` over `[lower, upper]` at `price`.
pub fn amounts_for_liquidity(liquidity: f64, price: f64, lower: f64, upper: f64) -> (f64, f64) {
    if liquidity <= 0.0 || lower <= 0.0 || upper <= lower || price <= 0.0 {
        return (0.0, 0.0);
    }

    let sp = price.sqrt();
    let sa = lower.sqrt();
    let sb = upper.sqrt();

    if sp <= sa {
        (liquidity * (1.0 / sa - 1.0 / sb), 0.0)
    } else if sp >= sb {
        (0.0, liquidity * (sb - sa))
    } else {
        (liquidity * (1.0 / sp - 1.0 / sb), liquidity * (sp - sa))
    }
}

/// Largest liquidity that `base` and `quote` can fund over `[lower, upper]` at `price`.
pub fn liquidity_for_amounts(price: f64, lower: f64, upper: f64, base: f64, quote: f64) -> f64 {
    if lower <= 0.0 || upper <= lower || price <= 0.0 {
        return 0.0;
    }

    let sp = price.sqrt();
    let sa = lower.sqrt();
    let sb = upper.sqrt();

    let from_base = |sp: f64| base.max(0.0) / (1.0 / sp - 1.0 / sb);
    let from_quote = |sp: f64| quote.max(0.0) / (sp - sa);

    if sp <= sa {
        from_base(sa)
    } else if sp >= sb {
        from_quote(sb)
    } else {
        from_base(sp).min(from_quote(sp))
    }
}

/// Decimal wrapper over [`amounts_for_liquidity`].
pub fn position_amounts(
    liquidity: f64,
    price: Decimal,
    lower: Decimal,
    upper: Decimal,
) -> TokenAmounts {
    let (base, quote) = amounts_for_liquidity(liquidity, to_f64(price), to_f64(lower), to_f64(upper));
    TokenAmounts {
        base: to_decimal_or_zero(base),
        quote: to_decimal_or_zero(quote),
    }
}
