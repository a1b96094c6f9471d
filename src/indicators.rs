//! Window statistics
//!
//! Price-series measures used by the regime classifier and the run summary.

use itertools::Itertools;
use statrs::statistics::Statistics;

/// Simple daily returns
pub fn daily_returns(closes: &[f64]) -> Vec<f64> {
    closes
        .iter()
        .tuple_windows()
        .map(|(prev, next)| if *prev > 0.0 { next / prev - 1.0 } else { 0.0 })
        .collect()
}

/// Return from the first to the last value, as a fraction
pub fn total_return(values: &[f64]) -> f64 {
    match (values.first(), values.last()) {
        (Some(&first), Some(&last)) if first > 0.0 => last / first - 1.0,
        _ => 0.0,
    }
}

/// Largest peak-to-trough decline, as a fraction
pub fn max_drawdown(values: &[f64]) -> f64 {
    let mut peak = f64::NEG_INFINITY;
    let mut worst = 0.0_f64;
    for &v in values {
        peak = peak.max(v);
        if peak > 0.0 {
            worst = worst.max((peak - v) / peak);
        }
    }
    worst
}

/// Sample standard deviation of returns, 0 with fewer than two
pub fn volatility(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    returns.iter().std_dev()
}

/// Fraction of returns that are strictly positive
pub fn up_day_ratio(returns: &[f64]) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    returns.iter().filter(|r| **r > 0.0).count() as f64 / returns.len() as f64
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Swing {
    Up,
    Down,
}

/// Count direction reversals of at least `threshold` (zigzag pivots).
/// The first qualifying move sets the direction and is not a reversal.
pub fn swing_reversals(closes: &[f64], threshold: f64) -> usize {
    let Some(&first) = closes.first() else {
        return 0;
    };

    let mut trend: Option<Swing> = None;
    let mut extreme = first;
    let mut reversals = 0;

    for &price in &closes[1..] {
        if extreme <= 0.0 {
            extreme = price;
            continue;
        }
        let change = price / extreme - 1.0;
        match trend {
            None => {
                if change >= threshold {
                    trend = Some(Swing::Up);
                    extreme = price;
                } else if change <= -threshold {
                    trend = Some(Swing::Down);
                    extreme = price;
                }
            }
            Some(Swing::Up) => {
                if price > extreme {
                    extreme = price;
                } else if -change >= threshold {
                    trend = Some(Swing::Down);
                    extreme = price;
                    reversals += 1;
                }
            }
            Some(Swing::Down) => {
                if price < extreme {
                    extreme = price;
                } else if change >= threshold {
                    trend = Some(Swing::Up);
                    extreme = price;
                    reversals += 1;
                }
            }
        }
    }

    reversals
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_returns_and_total() {
        let closes = [100.0, 110.0, 99.0];
        let r = daily_returns(&closes);
        assert_eq!(r.len(), 2);
        assert_relative_eq!(r[0], 0.10);
        assert_relative_eq!(r[1], -0.10);
        assert_relative_eq!(total_return(&closes), -0.01);
        assert_eq!(total_return(&[]), 0.0);
    }

    #[test]
    fn test_max_drawdown() {
        assert_relative_eq!(max_drawdown(&[100.0, 120.0, 90.0, 130.0, 117.0]), 0.25);
        assert_eq!(max_drawdown(&[1.0, 2.0, 3.0]), 0.0);
    }

    #[test]
    fn test_volatility_and_ratio() {
        assert_eq!(volatility(&[0.01]), 0.0);
        assert_relative_eq!(volatility(&[0.01, 0.03]), 0.014142135623730951, epsilon = 1e-12);
        assert_relative_eq!(up_day_ratio(&[0.01, -0.02, 0.0, 0.03]), 0.5);
    }

    #[test]
    fn test_swing_reversals() {
        let zigzag = [100.0, 105.0, 100.0, 106.0, 99.0, 104.0];
        assert_eq!(swing_reversals(&zigzag, 0.03), 4);
        let trend = [100.0, 101.0, 102.0, 103.0, 104.0];
        assert_eq!(swing_reversals(&trend, 0.03), 0);
        // moves below the threshold are noise
        assert_eq!(swing_reversals(&[100.0, 102.0, 100.0, 102.0], 0.03), 0);
    }
}
