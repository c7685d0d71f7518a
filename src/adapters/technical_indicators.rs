//! Default technical indicator calculator.
//!
//! Every indicator is evaluated point-in-time on closing prices up to and
//! including `day`. Too little history yields 0.
//!
//! - SMA: mean of the last n prices.
//! - EMA: k = 2/(n+1), seeded with the price 3n bars back (or the first bar).
//! - RSI: Wilder smoothing, avg = (prev_avg * (n-1) + current) / n, seeded
//!   with the simple mean of the first n changes in the 3n-bar window.
//!   RSI = 100 - 100 / (1 + avg_gain / avg_loss); 100 when avg_loss == 0.
//! - Vol: sample standard deviation of n log returns, times sqrt(252).
//! - Return: (P[day] - P[day-n]) / P[day-n].
//! - PastPrice: P[day-n].

use crate::domain::ast::{IndicatorSpec, IndicatorType};
use crate::domain::market::PriceHistory;
use crate::ports::indicator_port::IndicatorCalculator;

const ANNUALISATION_DAYS: f64 = 252.0;

#[derive(Debug, Clone, Copy, Default)]
pub struct TechnicalIndicators;

impl IndicatorCalculator for TechnicalIndicators {
    fn calculate(&self, spec: &IndicatorSpec, history: &PriceHistory, day: usize) -> f64 {
        let Some(series) = history.series(&spec.asset) else {
            return 0.0;
        };
        if day >= series.len() {
            return 0.0;
        }
        let prices: Vec<f64> = series[..=day].iter().map(|p| p.price).collect();
        let period = spec.effective_period();
        if period == 0 {
            return 0.0;
        }

        match spec.kind {
            IndicatorType::Sma => sma(&prices, period, day),
            IndicatorType::Ema => ema(&prices, period, day),
            IndicatorType::Rsi => rsi(&prices, period, day),
            IndicatorType::Vol => volatility(&prices, period, day),
            IndicatorType::Return => simple_return(&prices, period, day),
            IndicatorType::PastPrice => past_price(&prices, period, day),
        }
    }
}

fn sma(prices: &[f64], period: usize, day: usize) -> f64 {
    if day + 1 < period {
        return 0.0;
    }
    prices[day + 1 - period..=day].iter().sum::<f64>() / period as f64
}

fn ema(prices: &[f64], period: usize, day: usize) -> f64 {
    if day + 1 < period {
        return 0.0;
    }
    let start = day.saturating_sub(period * 3);
    let k = 2.0 / (period as f64 + 1.0);
    prices[start + 1..=day]
        .iter()
        .fold(prices[start], |ema, &price| price * k + ema * (1.0 - k))
}

fn rsi(prices: &[f64], period: usize, day: usize) -> f64 {
    if day < period {
        return 0.0;
    }
    let start = day.saturating_sub(period * 3).max(1);
    let n = period as f64;

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in start..start + period {
        let change = prices[i] - prices[i - 1];
        if change > 0.0 {
            avg_gain += change;
        } else {
            avg_loss -= change;
        }
    }
    avg_gain /= n;
    avg_loss /= n;

    for i in start + period..=day {
        let change = prices[i] - prices[i - 1];
        avg_gain = (avg_gain * (n - 1.0) + change.max(0.0)) / n;
        avg_loss = (avg_loss * (n - 1.0) + (-change).max(0.0)) / n;
    }

    if avg_loss == 0.0 {
        100.0
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    }
}

fn volatility(prices: &[f64], period: usize, day: usize) -> f64 {
    if day < period || period < 2 {
        return 0.0;
    }
    let returns: Vec<f64> = (day + 1 - period..=day)
        .map(|i| {
            if prices[i - 1] > 0.0 && prices[i] > 0.0 {
                (prices[i] / prices[i - 1]).ln()
            } else {
                0.0
            }
        })
        .collect();
    let mean = returns.iter().sum::<f64>() / period as f64;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (period - 1) as f64;
    variance.sqrt() * ANNUALISATION_DAYS.sqrt()
}

fn simple_return(prices: &[f64], period: usize, day: usize) -> f64 {
    if day < period {
        return 0.0;
    }
    let past = prices[day - period];
    if past == 0.0 {
        0.0
    } else {
        (prices[day] - past) / past
    }
}

fn past_price(prices: &[f64], period: usize, day: usize) -> f64 {
    if day < period {
        return 0.0;
    }
    prices[day - period]
}
