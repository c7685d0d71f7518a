//! Technical indicator port.

use crate::domain::ast::IndicatorSpec;
use crate::domain::market::PriceHistory;

pub trait IndicatorCalculator: Send + Sync {
    /// Indicator value on `day`; 0 when there is not enough history.
    fn calculate(&self, spec: &IndicatorSpec, history: &PriceHistory, day: usize) -> f64;
}
