//! Monte-Carlo orchestration.
//!
//! A compiled program is shared read-only by every iteration. Iterations
//! are numbered from 1 and iteration `i` draws its price path with seed
//! `base_seed + i`, runs the evaluator from a fresh portfolio, and reports
//! either a result or an isolated error. The evaluator trades through the
//! warm-up days like any other day; they are only dropped from the front
//! of the equity curve.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::NaiveDate;
use rayon::prelude::*;
use tracing::{info, warn};

use super::compiler::{CompiledProgram, compile};
use super::error::{CompileError, IterationError, SimulationError};
use super::evaluator::{EvaluatorConfig, FinancialScenario, TaxConfig, evaluate};
use super::execution::ExecutionCosts;
use super::market::{MarketContext, MarketDataPoint, PriceHistory, derive_leveraged_series};
use super::value::EvaluationState;
use crate::ports::indicator_port::IndicatorCalculator;
use crate::ports::path_port::{PathRequest, PricePathProvider};
use crate::ports::pricer_port::OptionPricer;

#[derive(Debug, Clone, PartialEq)]
pub enum PriceModel {
    /// Geometric Brownian motion with annualised drift and volatility.
    Gbm { drift: f64, volatility: f64 },
    /// Replay the loaded history as-is.
    Historical,
    /// Resample blocks of historical log returns.
    BlockBootstrap { block_size: usize },
}

impl PriceModel {
    pub fn name(&self) -> &'static str {
        match self {
            PriceModel::Gbm { .. } => "gbm",
            PriceModel::Historical => "historical",
            PriceModel::BlockBootstrap { .. } => "bootstrap",
        }
    }

    pub fn needs_history(&self) -> bool {
        !matches!(self, PriceModel::Gbm { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssetConfig {
    pub ticker: String,
    pub initial_price: f64,
    pub model: PriceModel,
}

/// Pairwise correlation of daily shocks.
#[derive(Debug, Clone, PartialEq)]
pub struct Correlation {
    pub a: String,
    pub b: String,
    pub rho: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    pub assets: Vec<AssetConfig>,
    pub correlations: Vec<Correlation>,
    pub trading_days: usize,
    pub iterations: usize,
    pub risk_free_rate: f64,
    pub granularity: usize,
    pub initial_cash: f64,
    pub base_seed: u64,
    pub start_date: NaiveDate,
    pub scenario: FinancialScenario,
    pub costs: ExecutionCosts,
    pub tax: TaxConfig,
    /// Per-ticker history for the historical and bootstrap models.
    pub historical: HashMap<String, Vec<MarketDataPoint>>,
}

impl SimulationConfig {
    pub fn tickers(&self) -> Vec<&str> {
        self.assets.iter().map(|a| a.ticker.as_str()).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimulationRunResult {
    /// 1-based iteration number.
    pub run_id: usize,
    /// Portfolio value for reported days `0..=trading_days`.
    pub equity_curve: Vec<f64>,
    pub final_state: EvaluationState,
}

#[derive(Debug, Default)]
pub struct SimulationOutcome {
    /// Successful runs, ordered by run id.
    pub runs: Vec<SimulationRunResult>,
    pub failures: Vec<IterationError>,
    pub warmup_days: usize,
}

pub struct SimulationEngine<'a> {
    paths: &'a dyn PricePathProvider,
    pricer: &'a dyn OptionPricer,
    indicators: &'a dyn IndicatorCalculator,
    parallel: bool,
}

impl<'a> SimulationEngine<'a> {
    pub fn new(
        paths: &'a dyn PricePathProvider,
        pricer: &'a dyn OptionPricer,
        indicators: &'a dyn IndicatorCalculator,
    ) -> Self {
        Self {
            paths,
            pricer,
            indicators,
            parallel: true,
        }
    }

    /// Enables or disables parallel execution. Results are identical either way.
    pub fn with_parallelism(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Compile `source` against the configured tickers and run it.
    pub fn run_source(&self, source: &str, config: &SimulationConfig) -> Result<SimulationOutcome, CompileError> {
        let compiled = compile(source, config.tickers().as_slice())?;
        Ok(self.run(&compiled, config))
    }

    pub fn run(&self, compiled: &CompiledProgram, config: &SimulationConfig) -> SimulationOutcome {
        self.run_with_progress(compiled, config, |_, _| {})
    }

    /// Run every iteration, calling `on_progress(completed, total)` after
    /// each one finishes.
    pub fn run_with_progress<F>(
        &self,
        compiled: &CompiledProgram,
        config: &SimulationConfig,
        on_progress: F,
    ) -> SimulationOutcome
    where
        F: Fn(usize, usize) + Send + Sync,
    {
        let warmup_days = compiled.warmup_days();
        let total = config.iterations;
        info!(
            iterations = total,
            trading_days = config.trading_days,
            warmup_days,
            parallel = self.parallel,
            "simulation started"
        );

        let evaluator = EvaluatorConfig {
            trading_days: warmup_days + config.trading_days,
            initial_cash: config.initial_cash,
            granularity: config.granularity,
            scenario: config.scenario.clone(),
            costs: config.costs.clone(),
            tax: config.tax.clone(),
        };
        let completed = AtomicUsize::new(0);
        let run_one = |run_id: usize| {
            let result = self
                .run_iteration(compiled, config, &evaluator, run_id)
                .map_err(|source| IterationError { run_id, source });
            let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
            on_progress(done, total);
            result
        };

        let results: Vec<Result<SimulationRunResult, IterationError>> = if self.parallel {
            (1..=total).into_par_iter().map(run_one).collect()
        } else {
            (1..=total).map(run_one).collect()
        };

        let mut outcome = SimulationOutcome {
            warmup_days,
            ..SimulationOutcome::default()
        };
        for result in results {
            match result {
                Ok(run) => outcome.runs.push(run),
                Err(e) => {
                    warn!(run_id = e.run_id, error = %e.source, "iteration failed");
                    outcome.failures.push(e);
                }
            }
        }
        info!(
            succeeded = outcome.runs.len(),
            failed = outcome.failures.len(),
            "simulation finished"
        );
        outcome
    }

    fn run_iteration(
        &self,
        compiled: &CompiledProgram,
        config: &SimulationConfig,
        evaluator: &EvaluatorConfig,
        run_id: usize,
    ) -> Result<SimulationRunResult, SimulationError> {
        let warmup_days = compiled.warmup_days();
        let days = warmup_days + config.trading_days;
        let request = PathRequest {
            assets: &config.assets,
            correlations: &config.correlations,
            days,
            historical: &config.historical,
        };
        let seed = config.base_seed.wrapping_add(run_id as u64);
        let history = self.paths.generate(&request, seed)?;
        let history = with_leveraged_series(history, compiled)?;
        if history.len() < days + 1 {
            return Err(SimulationError::PricePath {
                reason: format!(
                    "price path has {} days, {} required",
                    history.len(),
                    days + 1
                ),
            });
        }

        let market = MarketContext::new(&history, self.pricer, self.indicators, config.risk_free_rate);
        let outcome = evaluate(&compiled.program, &market, evaluator)?;
        let mut equity_curve = outcome.equity_curve;
        equity_curve.drain(..warmup_days.min(equity_curve.len()));
        Ok(SimulationRunResult {
            run_id,
            equity_curve,
            final_state: outcome.final_state,
        })
    }
}

/// Add a derived series for every leveraged asset the program uses.
fn with_leveraged_series(
    mut history: PriceHistory,
    compiled: &CompiledProgram,
) -> Result<PriceHistory, SimulationError> {
    for asset in &compiled.leveraged_assets {
        let base = history
            .series(asset.ticker())
            .ok_or_else(|| SimulationError::PricePath {
                reason: format!("no base path for leveraged asset '{}'", asset),
            })?;
        let derived = derive_leveraged_series(base, asset.leverage());
        history.insert(asset.price_key(), derived);
    }
    Ok(history)
}
