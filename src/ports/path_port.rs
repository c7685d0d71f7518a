//! Price path generation port.

use std::collections::HashMap;

use crate::domain::error::SimulationError;
use crate::domain::market::{MarketDataPoint, PriceHistory};
use crate::domain::simulation::{AssetConfig, Correlation};

/// What to generate for one iteration.
#[derive(Debug, Clone, Copy)]
pub struct PathRequest<'a> {
    pub assets: &'a [AssetConfig],
    pub correlations: &'a [Correlation],
    /// Number of steps; each series has `days + 1` points.
    pub days: usize,
    pub historical: &'a HashMap<String, Vec<MarketDataPoint>>,
}

pub trait PricePathProvider: Send + Sync {
    fn generate(&self, request: &PathRequest<'_>, seed: u64)
    -> Result<PriceHistory, SimulationError>;
}
