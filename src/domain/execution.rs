//! Fill price arithmetic shared by the risk manager and the paper exchange.

/// Buy fill: `market_price * (1 + slippage_pct / 100)`
pub fn apply_slippage_buy(market_price: f64, slippage_pct: f64) -> f64 {
    market_price * (1.0 + slippage_pct / 100.0)
}

/// Sell fill: `market_price * (1 - slippage_pct / 100)`
pub fn apply_slippage_sell(market_price: f64, slippage_pct: f64) -> f64 {
    market_price * (1.0 - slippage_pct / 100.0)
}

/// Relative deviation of a fill from the price seen when the signal fired.
pub fn relative_slippage(expected_price: f64, fill_price: f64) -> f64 {
    if expected_price <= 0.0 {
        return 0.0;
    }
    ((fill_price - expected_price) / expected_price).abs()
}

/// Base quantity bought with `balance * size_fraction` at `price`.
pub fn order_quantity(balance: f64, size_fraction: f64, price: f64) -> f64 {
    if price <= 0.0 {
        return 0.0;
    }
    balance * size_fraction / price
}
