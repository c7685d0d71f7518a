//! Option pricing port.

use crate::domain::position::ConcreteOption;

/// Per-contract sensitivities. Vega and rho are per 1% move, theta per day.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Greeks {
    pub delta: f64,
    pub gamma: f64,
    pub theta: f64,
    pub vega: f64,
    pub rho: f64,
}

pub trait OptionPricer: Send + Sync {
    /// Price of one share's worth of the option on `day`.
    fn price(
        &self,
        option: &ConcreteOption,
        spot: f64,
        volatility: f64,
        day: usize,
        risk_free_rate: f64,
    ) -> f64;

    fn greeks(
        &self,
        option: &ConcreteOption,
        spot: f64,
        volatility: f64,
        day: usize,
        risk_free_rate: f64,
    ) -> Greeks;

    /// Strike whose delta equals `target_delta` for an option expiring in
    /// `days_to_expiry` days.
    fn strike_for_delta(
        &self,
        target_delta: f64,
        is_call: bool,
        spot: f64,
        volatility: f64,
        days_to_expiry: usize,
        risk_free_rate: f64,
    ) -> f64;
}
