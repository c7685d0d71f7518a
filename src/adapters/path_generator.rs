//! Built-in price path generator.
//!
//! Geometric Brownian motion driven by correlated standard normals, plus
//! replay and block bootstrap of historical series. Every path has
//! `days + 1` points; point 0 is the starting price.

use rand::prelude::*;
use rand::rngs::StdRng;

use crate::domain::error::SimulationError;
use crate::domain::market::{MarketDataPoint, PriceHistory};
use crate::domain::simulation::{AssetConfig, Correlation, PriceModel};
use crate::ports::path_port::{PathRequest, PricePathProvider};

const TRADING_DAYS_PER_YEAR: f64 = 252.0;

fn path_error(reason: impl Into<String>) -> SimulationError {
    SimulationError::PricePath {
        reason: reason.into(),
    }
}

/// Standard normal via Box-Muller.
fn next_normal(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.r#gen::<f64>().max(1e-15);
    let u2: f64 = rng.r#gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

fn correlation_matrix(assets: &[AssetConfig], correlations: &[Correlation]) -> Vec<Vec<f64>> {
    let n = assets.len();
    let mut matrix = vec![vec![0.0; n]; n];
    for (i, row) in matrix.iter_mut().enumerate() {
        for (j, cell) in row.iter_mut().enumerate() {
            *cell = if i == j {
                1.0
            } else {
                let (a, b) = (&assets[i].ticker, &assets[j].ticker);
                correlations
                    .iter()
                    .find(|c| (&c.a == a && &c.b == b) || (&c.a == b && &c.b == a))
                    .map(|c| c.rho)
                    .unwrap_or(0.0)
            };
        }
    }
    matrix
}

/// Lower-triangular `L` with `L * L^T == matrix`.
pub fn cholesky(matrix: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, SimulationError> {
    let n = matrix.len();
    let mut lower = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..=i {
            let sum: f64 = (0..j).map(|k| lower[i][k] * lower[j][k]).sum();
            if i == j {
                let diagonal = matrix[i][i] - sum;
                if diagonal <= 0.0 {
                    return Err(path_error("correlation matrix is not positive definite"));
                }
                lower[i][j] = diagonal.sqrt();
            } else {
                lower[i][j] = (matrix[i][j] - sum) / lower[j][j];
            }
        }
    }
    Ok(lower)
}

/// `days` rows of correlated shocks, one column per asset.
fn correlated_drivers(rng: &mut StdRng, lower: &[Vec<f64>], days: usize) -> Vec<Vec<f64>> {
    let n = lower.len();
    (0..days)
        .map(|_| {
            let independent: Vec<f64> = (0..n).map(|_| next_normal(rng)).collect();
            lower
                .iter()
                .map(|row| row.iter().zip(&independent).map(|(l, z)| l * z).sum())
                .collect()
        })
        .collect()
}

fn gbm_path(initial_price: f64, drift: f64, volatility: f64, shocks: impl Iterator<Item = f64>) -> Vec<MarketDataPoint> {
    let dt = 1.0 / TRADING_DAYS_PER_YEAR;
    let step_drift = (drift - 0.5 * volatility * volatility) * dt;
    let diffusion = volatility * dt.sqrt();

    let mut price = initial_price;
    let mut path = vec![MarketDataPoint {
        price,
        volatility,
    }];
    for z in shocks {
        price *= (step_drift + diffusion * z).exp();
        path.push(MarketDataPoint { price, volatility });
    }
    path
}

fn replay_path(ticker: &str, history: &[MarketDataPoint], days: usize) -> Result<Vec<MarketDataPoint>, SimulationError> {
    if history.len() < days + 1 {
        return Err(path_error(format!(
            "history for '{}' has {} points, {} needed",
            ticker,
            history.len(),
            days + 1
        )));
    }
    Ok(history[history.len() - (days + 1)..].to_vec())
}

fn bootstrap_path(
    asset: &AssetConfig,
    history: &[MarketDataPoint],
    block_size: usize,
    days: usize,
    rng: &mut StdRng,
) -> Result<Vec<MarketDataPoint>, SimulationError> {
    let returns: Vec<(f64, f64)> = history
        .windows(2)
        .filter(|w| w[0].price > 0.0 && w[1].price > 0.0)
        .map(|w| ((w[1].price / w[0].price).ln(), w[1].volatility))
        .collect();
    if block_size == 0 || returns.len() < block_size {
        return Err(path_error(format!(
            "history for '{}' is shorter than the bootstrap block size {}",
            asset.ticker, block_size
        )));
    }

    let last = history.last().copied();
    let mut price = if asset.initial_price > 0.0 {
        asset.initial_price
    } else {
        last.map(|p| p.price).unwrap_or(0.0)
    };
    let mut path = Vec::with_capacity(days + 1);
    path.push(MarketDataPoint {
        price,
        volatility: last.map(|p| p.volatility).unwrap_or(0.0),
    });

    let max_start = returns.len() - block_size;
    while path.len() <= days {
        let start = rng.gen_range(0..=max_start);
        for &(log_return, volatility) in returns[start..start + block_size].iter().take(days + 1 - path.len()) {
            price *= log_return.exp();
            path.push(MarketDataPoint { price, volatility });
        }
    }
    Ok(path)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PathGenerator;

impl PricePathProvider for PathGenerator {
    fn generate(&self, request: &PathRequest<'_>, seed: u64) -> Result<PriceHistory, SimulationError> {
        let mut rng = StdRng::seed_from_u64(seed);
        let lower = cholesky(&correlation_matrix(request.assets, request.correlations))?;
        let drivers = correlated_drivers(&mut rng, &lower, request.days);

        let mut history = PriceHistory::new();
        for (idx, asset) in request.assets.iter().enumerate() {
            let observed = request.historical.get(&asset.ticker).map(Vec::as_slice);
            let path = match (&asset.model, observed) {
                (PriceModel::Gbm { drift, volatility }, _) => gbm_path(
                    asset.initial_price,
                    *drift,
                    *volatility,
                    drivers.iter().map(|row| row[idx]),
                ),
                (PriceModel::Historical, Some(observed)) => replay_path(&asset.ticker, observed, request.days)?,
                (PriceModel::BlockBootstrap { block_size }, Some(observed)) => {
                    bootstrap_path(asset, observed, *block_size, request.days, &mut rng)?
                }
                (model, None) => {
                    return Err(path_error(format!(
                        "{} model for '{}' needs historical data",
                        model.name(),
                        asset.ticker
                    )));
                }
            };
            history.insert(asset.ticker.clone(), path);
        }
        Ok(history)
    }
}
