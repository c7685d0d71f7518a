//! Black-Scholes option pricer.
//!
//! European pricing with time measured in calendar days over 365. At or
//! after expiry an option is worth its intrinsic value and has no greeks.
//! Vega and rho are per 1% move, theta per calendar day.

use crate::domain::position::ConcreteOption;
use crate::ports::pricer_port::{Greeks, OptionPricer};

const DAYS_PER_YEAR: f64 = 365.0;
const SOLVER_MAX_ITERATIONS: usize = 50;
const SOLVER_TOLERANCE: f64 = 1e-5;
const MIN_SLOPE: f64 = 1e-9;
const MIN_VOLATILITY: f64 = 1e-9;

/// Standard normal CDF (Abramowitz & Stegun 26.2.17, error < 7.5e-8).
pub fn normal_cdf(x: f64) -> f64 {
    let t = 1.0 / (1.0 + 0.2316419 * x.abs());
    let poly = t
        * (0.319381530
            + t * (-0.356563782 + t * (1.781477937 + t * (-1.821255978 + t * 1.330274429))));
    let tail = normal_pdf(x) * poly;
    if x >= 0.0 { 1.0 - tail } else { tail }
}

pub fn normal_pdf(x: f64) -> f64 {
    (-0.5 * x * x).exp() / (2.0 * std::f64::consts::PI).sqrt()
}

fn d1_d2(spot: f64, strike: f64, t: f64, sigma: f64, r: f64) -> (f64, f64) {
    if t <= 0.0 || sigma <= 0.0 || spot <= 0.0 || strike <= 0.0 {
        return (0.0, 0.0);
    }
    let sqrt_t = t.sqrt();
    let d1 = ((spot / strike).ln() + (r + 0.5 * sigma * sigma) * t) / (sigma * sqrt_t);
    (d1, d1 - sigma * sqrt_t)
}

fn years_to_expiry(option: &ConcreteOption, day: usize) -> f64 {
    option.days_to_expiry(day) as f64 / DAYS_PER_YEAR
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BlackScholesPricer;

impl OptionPricer for BlackScholesPricer {
    fn price(&self, option: &ConcreteOption, spot: f64, volatility: f64, day: usize, r: f64) -> f64 {
        let t = years_to_expiry(option, day);
        if t <= 0.0 {
            return option.intrinsic(spot);
        }
        let discounted_strike = option.strike * (-r * t).exp();
        if volatility <= MIN_VOLATILITY {
            return if option.is_call {
                (spot - discounted_strike).max(0.0)
            } else {
                (discounted_strike - spot).max(0.0)
            };
        }

        let (d1, d2) = d1_d2(spot, option.strike, t, volatility, r);
        if option.is_call {
            spot * normal_cdf(d1) - discounted_strike * normal_cdf(d2)
        } else {
            discounted_strike * normal_cdf(-d2) - spot * normal_cdf(-d1)
        }
    }

    fn greeks(&self, option: &ConcreteOption, spot: f64, volatility: f64, day: usize, r: f64) -> Greeks {
        let t = years_to_expiry(option, day);
        if t <= 0.0 || volatility <= MIN_VOLATILITY || spot <= 0.0 {
            return Greeks::default();
        }

        let (d1, d2) = d1_d2(spot, option.strike, t, volatility, r);
        let pdf = normal_pdf(d1);
        let sqrt_t = t.sqrt();
        let discount = (-r * t).exp();
        let theta_common = -(spot * pdf * volatility) / (2.0 * sqrt_t);

        let (delta, theta, rho) = if option.is_call {
            (
                normal_cdf(d1),
                theta_common - r * option.strike * discount * normal_cdf(d2),
                option.strike * t * discount * normal_cdf(d2),
            )
        } else {
            (
                normal_cdf(d1) - 1.0,
                theta_common + r * option.strike * discount * normal_cdf(-d2),
                -option.strike * t * discount * normal_cdf(-d2),
            )
        };

        Greeks {
            delta,
            gamma: pdf / (spot * volatility * sqrt_t),
            theta: theta / DAYS_PER_YEAR,
            vega: spot * pdf * sqrt_t * 0.01,
            rho: rho * 0.01,
        }
    }

    /// Newton-Raphson on the strike, starting at the money.
    ///
    /// Targets of magnitude 1 or more, and degenerate inputs, trade at spot.
    fn strike_for_delta(
        &self,
        target_delta: f64,
        is_call: bool,
        spot: f64,
        volatility: f64,
        days_to_expiry: usize,
        r: f64,
    ) -> f64 {
        let t = days_to_expiry as f64 / DAYS_PER_YEAR;
        if target_delta.abs() >= 1.0 || t <= 0.0 || volatility <= MIN_VOLATILITY || spot <= 0.0 {
            return spot;
        }

        let sqrt_t = t.sqrt();
        let mut strike = spot;
        for _ in 0..SOLVER_MAX_ITERATIONS {
            let (d1, _) = d1_d2(spot, strike, t, volatility, r);
            let delta = if is_call { normal_cdf(d1) } else { normal_cdf(d1) - 1.0 };
            let diff = delta - target_delta;
            if diff.abs() < SOLVER_TOLERANCE {
                break;
            }
            let slope = -normal_pdf(d1) / (strike * volatility * sqrt_t);
            if slope.abs() < MIN_SLOPE {
                break;
            }
            strike = (strike - diff / slope).max(spot * 1e-3);
        }
        strike
    }
}
