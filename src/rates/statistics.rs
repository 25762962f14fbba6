//! Trade statistics behind the fiat conversion rate
//!
//! Median is over prices only. Mean and standard deviation are weighted by
//! trade amount, so a handful of thin trades cannot drag the rate around.

use crate::types::MarketTrade;

/// Summary of a set of trades
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TradeStats {
    pub median: f64,
    pub weighted_mean: f64,
    pub std_dev: f64,
    pub sum_amounts: f64,
}

/// Median, amount-weighted mean and amount-weighted population standard
/// deviation of `trades`. Empty input (or zero total amount) gives all zeros.
pub fn compute(trades: &[MarketTrade]) -> TradeStats {
    let n = trades.len();
    if n == 0 {
        return TradeStats::default();
    }

    let mut sorted = trades.to_vec();
    sorted.sort_by(|a, b| a.price.total_cmp(&b.price));

    let median = if n % 2 == 0 {
        (sorted[n / 2 - 1].price + sorted[n / 2].price) / 2.0
    } else {
        sorted[n / 2].price
    };

    let sum_amounts: f64 = sorted.iter().map(|t| t.amount).sum();
    if sum_amounts <= 0.0 {
        return TradeStats::default();
    }

    let weighted_sum: f64 = sorted.iter().map(|t| t.price * t.amount).sum();
    let weighted_mean = weighted_sum / sum_amounts;

    let weighted_sq_diffs: f64 = sorted
        .iter()
        .map(|t| {
            let diff = t.price - weighted_mean;
            t.amount * diff * diff
        })
        .sum();
    let std_dev = (weighted_sq_diffs / sum_amounts).sqrt();

    TradeStats {
        median,
        weighted_mean,
        std_dev,
        sum_amounts,
    }
}
