//! Price histories and the valuation context shared by the engine stages.

use std::collections::HashMap;

use super::ast::{AssetReference, OptionSpec};
use super::error::InterpreterError;
use super::portfolio::Portfolio;
use super::position::{ConcreteOption, PositionInstance, ResolvedInstrument};
use crate::ports::indicator_port::IndicatorCalculator;
use crate::ports::pricer_port::{Greeks, OptionPricer};

/// Price and annualised volatility of one ticker on one day.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarketDataPoint {
    pub price: f64,
    pub volatility: f64,
}

/// Daily series keyed by price key (`spy`, `3x_spy`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriceHistory {
    series: HashMap<String, Vec<MarketDataPoint>>,
}

impl PriceHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, points: Vec<MarketDataPoint>) {
        self.series.insert(key.into(), points);
    }

    pub fn with_series(mut self, key: impl Into<String>, points: Vec<MarketDataPoint>) -> Self {
        self.insert(key, points);
        self
    }

    pub fn series(&self, key: &str) -> Option<&[MarketDataPoint]> {
        self.series.get(key).map(Vec::as_slice)
    }

    pub fn point(&self, key: &str, day: usize) -> Option<MarketDataPoint> {
        self.series.get(key).and_then(|s| s.get(day)).copied()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.series.contains_key(key)
    }

    /// Length of the shortest series.
    pub fn len(&self) -> usize {
        self.series.values().map(Vec::len).min().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Daily-compounded leveraged path derived from its base path.
///
/// The leveraged price starts at the base price, moves by `leverage` times
/// the base daily return, and is floored at zero (a wiped-out fund stays
/// wiped out). Volatility scales with |leverage|.
pub fn derive_leveraged_series(base: &[MarketDataPoint], leverage: f64) -> Vec<MarketDataPoint> {
    let mut out = Vec::with_capacity(base.len());
    let Some(first) = base.first() else {
        return out;
    };
    out.push(MarketDataPoint {
        price: first.price,
        volatility: first.volatility * leverage.abs(),
    });
    for window in base.windows(2) {
        let prev_price = out.last().map(|p| p.price).unwrap_or(0.0);
        let daily_return = if window[0].price > 0.0 {
            window[1].price / window[0].price - 1.0
        } else {
            0.0
        };
        out.push(MarketDataPoint {
            price: (prev_price * (1.0 + leverage * daily_return)).max(0.0),
            volatility: window[1].volatility * leverage.abs(),
        });
    }
    out
}

/// Everything needed to value instruments on a given day.
#[derive(Clone, Copy)]
pub struct MarketContext<'a> {
    pub history: &'a PriceHistory,
    pub pricer: &'a dyn OptionPricer,
    pub indicators: &'a dyn IndicatorCalculator,
    pub risk_free_rate: f64,
}

impl<'a> MarketContext<'a> {
    pub fn new(
        history: &'a PriceHistory,
        pricer: &'a dyn OptionPricer,
        indicators: &'a dyn IndicatorCalculator,
        risk_free_rate: f64,
    ) -> Self {
        Self {
            history,
            pricer,
            indicators,
            risk_free_rate,
        }
    }

    pub fn point(&self, asset: &AssetReference, day: usize) -> Result<MarketDataPoint, InterpreterError> {
        self.history
            .point(&asset.price_key(), day)
            .ok_or_else(|| {
                InterpreterError::new(format!("No market data for '{}' on day {}.", asset, day))
            })
    }

    /// Volatility of the instrument's underlying.
    pub fn volatility(&self, instrument: &ResolvedInstrument, day: usize) -> Result<f64, InterpreterError> {
        let asset = match instrument {
            ResolvedInstrument::Asset(asset) => asset,
            ResolvedInstrument::Option(option) => &option.underlying,
            ResolvedInstrument::Compound => return Ok(0.0),
        };
        Ok(self.point(asset, day)?.volatility)
    }

    /// Price of one unit before the contract multiplier. Compound holdings
    /// mark at zero.
    pub fn unit_price(&self, instrument: &ResolvedInstrument, day: usize) -> Result<f64, InterpreterError> {
        match instrument {
            ResolvedInstrument::Asset(asset) => Ok(self.point(asset, day)?.price),
            ResolvedInstrument::Compound => Ok(0.0),
            ResolvedInstrument::Option(option) => {
                let underlying = self.point(&option.underlying, day)?;
                Ok(self.pricer.price(
                    option,
                    underlying.price,
                    underlying.volatility,
                    day,
                    self.risk_free_rate,
                ))
            }
        }
    }

    pub fn unit_value(&self, instrument: &ResolvedInstrument, day: usize) -> Result<f64, InterpreterError> {
        Ok(self.unit_price(instrument, day)? * instrument.multiplier())
    }

    pub fn lot_value(&self, lot: &PositionInstance, day: usize) -> Result<f64, InterpreterError> {
        Ok(lot.quantity * self.unit_value(&lot.instrument, day)?)
    }

    /// Cash plus the mark-to-market value of every lot.
    pub fn portfolio_value(&self, portfolio: &Portfolio, day: usize) -> Result<f64, InterpreterError> {
        portfolio
            .positions
            .iter()
            .try_fold(portfolio.cash, |acc, lot| Ok(acc + self.lot_value(lot, day)?))
    }

    /// Per-contract greeks; zero for non-options.
    pub fn greeks(&self, instrument: &ResolvedInstrument, day: usize) -> Result<Greeks, InterpreterError> {
        match instrument {
            ResolvedInstrument::Asset(_) | ResolvedInstrument::Compound => Ok(Greeks::default()),
            ResolvedInstrument::Option(option) => {
                let underlying = self.point(&option.underlying, day)?;
                Ok(self.pricer.greeks(
                    option,
                    underlying.price,
                    underlying.volatility,
                    day,
                    self.risk_free_rate,
                ))
            }
        }
    }

    pub fn indicator(&self, spec: &super::ast::IndicatorSpec, day: usize) -> Result<f64, InterpreterError> {
        if !self.history.contains(&spec.asset) {
            return Err(InterpreterError::new(format!(
                "No market data for indicator '{}'.",
                spec
            )));
        }
        Ok(self.indicators.calculate(spec, self.history, day))
    }

    /// Fix an option leg's strike and expiry as of `day`.
    ///
    /// A positive target is a call and a negative one a put. The strike
    /// comes from the pricer's delta solver whatever greek the leg names.
    pub fn resolve_option(&self, spec: &OptionSpec, day: usize) -> Result<ConcreteOption, InterpreterError> {
        let underlying = self.point(&spec.underlying, day)?;
        let is_call = spec.value > 0.0;
        let strike = self.pricer.strike_for_delta(
            spec.value,
            is_call,
            underlying.price,
            underlying.volatility,
            spec.dte as usize,
            self.risk_free_rate,
        );
        Ok(ConcreteOption {
            underlying: spec.underlying.clone(),
            strike,
            expiry_day: day + spec.dte as usize,
            is_call,
        })
    }
}
