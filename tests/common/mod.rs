#![allow(dead_code)]

use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use stratsim::adapters::black_scholes::BlackScholesPricer;
use stratsim::adapters::path_generator::PathGenerator;
use stratsim::adapters::technical_indicators::TechnicalIndicators;
use stratsim::domain::ast::Program;
use stratsim::domain::compiler::{CompiledProgram, compile};
use stratsim::domain::error::SimulationError;
use stratsim::domain::evaluator::{FinancialScenario, TaxConfig};
use stratsim::domain::execution::ExecutionCosts;
use stratsim::domain::market::{MarketDataPoint, PriceHistory};
use stratsim::domain::simulation::{AssetConfig, PriceModel, SimulationConfig, SimulationEngine};
use stratsim::ports::path_port::{PathRequest, PricePathProvider};

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn flat_points(price: f64, days: usize) -> Vec<MarketDataPoint> {
    vec![
        MarketDataPoint {
            price,
            volatility: 0.2,
        };
        days + 1
    ]
}

/// Every ticker at a constant price for `days + 1` points.
pub fn flat_history(tickers: &[&str], price: f64, days: usize) -> PriceHistory {
    tickers.iter().fold(PriceHistory::new(), |history, t| {
        history.with_series(*t, flat_points(price, days))
    })
}

pub fn program(source: &str, tickers: &[&str]) -> Program {
    compile(source, tickers).unwrap().program
}

pub fn compiled(source: &str, tickers: &[&str]) -> CompiledProgram {
    compile(source, tickers).unwrap()
}

/// Constant paths at each asset's initial price; counts calls.
#[derive(Default)]
pub struct FlatPaths {
    pub calls: AtomicUsize,
}

impl PricePathProvider for FlatPaths {
    fn generate(&self, request: &PathRequest<'_>, _seed: u64) -> Result<PriceHistory, SimulationError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(request.assets.iter().fold(PriceHistory::new(), |history, asset| {
            history.with_series(asset.ticker.clone(), flat_points(asset.initial_price, request.days))
        }))
    }
}

pub fn gbm_asset(ticker: &str, initial_price: f64) -> AssetConfig {
    AssetConfig {
        ticker: ticker.into(),
        initial_price,
        model: PriceModel::Gbm {
            drift: 0.07,
            volatility: 0.2,
        },
    }
}

pub fn sim_config(assets: Vec<AssetConfig>, iterations: usize, trading_days: usize) -> SimulationConfig {
    SimulationConfig {
        assets,
        correlations: Vec::new(),
        trading_days,
        iterations,
        risk_free_rate: 0.0,
        granularity: 1,
        initial_cash: 100_000.0,
        base_seed: 42,
        start_date: date(2024, 1, 2),
        scenario: FinancialScenario::None,
        costs: ExecutionCosts::zero(),
        tax: TaxConfig::default(),
        historical: HashMap::new(),
    }
}

pub fn default_engine(paths: &dyn PricePathProvider) -> SimulationEngine<'_> {
    SimulationEngine::new(paths, &BlackScholesPricer, &TechnicalIndicators)
}

pub static GBM_PATHS: PathGenerator = PathGenerator;

pub const SAMPLE_INI: &str = r#"
[simulation]
tickers = spy, qqq
trading_days = 20
iterations = 8
risk_free_rate = 0.03
granularity = 1
initial_cash = 50000
seed = 7
start_date = 2024-01-05
correlations = spy:qqq:0.7

[asset.spy]
initial_price = 100
model = gbm
drift = 0.06
volatility = 0.2

[asset.qqq]
initial_price = 50
model = gbm
drift = 0.08
volatility = 0.3

[costs]
commission_per_order = 1.0
commission_per_unit = 0.0
default_spread = 0.0
"#;
