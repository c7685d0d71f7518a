//! Historical market data port.

use crate::domain::error::StratsimError;
use crate::domain::market::MarketDataPoint;
use chrono::NaiveDate;

/// One dated observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DatedPoint {
    pub date: NaiveDate,
    pub point: MarketDataPoint,
}

pub trait HistoricalDataPort {
    /// Observations for `ticker`, oldest first.
    fn load_prices(&self, ticker: &str) -> Result<Vec<DatedPoint>, StratsimError>;

    fn list_tickers(&self) -> Result<Vec<String>, StratsimError>;
}
