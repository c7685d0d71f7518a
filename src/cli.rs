//! CLI definition and dispatch.

use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use crate::adapters::black_scholes::BlackScholesPricer;
use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::csv_report_adapter::CsvReportAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::path_generator::PathGenerator;
use crate::adapters::technical_indicators::TechnicalIndicators;
use crate::domain::compiler::{CompiledProgram, compile};
use crate::domain::config_validation::{
    asset_config, costs_config, parse_correlations, scenario_config, start_date, tax_config, tickers,
    validate_simulation_config,
};
use crate::domain::error::StratsimError;
use crate::domain::metrics::{RunMetrics, SUMMARY_PERCENTILES, SimulationSummary};
use crate::domain::simulation::{SimulationConfig, SimulationEngine, SimulationOutcome};
use crate::ports::config_port::ConfigPort;
use crate::ports::data_port::HistoricalDataPort;
use crate::ports::report_port::ReportPort;

/// Exit code when no iteration completed.
const NO_RESULTS_EXIT: u8 = 5;

#[derive(Parser, Debug)]
#[command(name = "stratsim", about = "Monte-Carlo trading strategy simulator")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compile a strategy without running it
    Check {
        #[arg(short, long)]
        strategy: PathBuf,
        /// Tickers the strategy may reference, comma separated
        #[arg(short, long, value_delimiter = ',', required = true)]
        tickers: Vec<String>,
    },
    /// Run a Monte-Carlo simulation
    Simulate {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        strategy: PathBuf,
        /// Equity curve CSV
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long)]
        iterations: Option<usize>,
        #[arg(long)]
        seed: Option<u64>,
        /// Run iterations on the current thread only
        #[arg(long)]
        sequential: bool,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Check { strategy, tickers } => run_check(&strategy, &tickers),
        Command::Simulate {
            config,
            strategy,
            output,
            iterations,
            seed,
            sequential,
        } => run_simulate(
            &config,
            &strategy,
            output.as_deref(),
            iterations,
            seed,
            sequential,
        ),
    }
}

fn fail(err: StratsimError) -> ExitCode {
    eprintln!("error: {err}");
    (&err).into()
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(fail)
}

fn read_strategy(path: &Path) -> Result<String, ExitCode> {
    fs::read_to_string(path).map_err(|e| {
        eprintln!("error: failed to read strategy {}: {}", path.display(), e);
        ExitCode::from(&StratsimError::Io(e))
    })
}

/// Compile, printing errors with source context.
pub fn compile_strategy<T: AsRef<str>>(source: &str, tickers: &[T]) -> Result<CompiledProgram, ExitCode> {
    compile(source, tickers).map_err(|e| {
        eprintln!("error: {}\n{}", e, e.display_with_context(source));
        ExitCode::from(&StratsimError::Compile(e))
    })
}

fn run_check(strategy_path: &Path, tickers: &[String]) -> ExitCode {
    let source = match read_strategy(strategy_path) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let tickers: Vec<String> = tickers.iter().map(|t| t.trim().to_ascii_lowercase()).collect();
    let compiled = match compile_strategy(&source, tickers.as_slice()) {
        Ok(c) => c,
        Err(code) => return code,
    };

    eprintln!("Strategy compiled: {}", strategy_path.display());
    eprintln!("  Statements:  {}", compiled.program.statements.len());
    eprintln!("  Look-back:   {} days", compiled.lookback);
    eprintln!("  Warm-up:     {} days", compiled.warmup_days());
    if !compiled.leveraged_assets.is_empty() {
        let leveraged: Vec<String> = compiled.leveraged_assets.iter().map(ToString::to_string).collect();
        eprintln!("  Leveraged:   {}", leveraged.join(", "));
    }
    ExitCode::SUCCESS
}

/// Build a run configuration from validated INI sections. Historical
/// series are left empty; see [`load_historical`].
pub fn build_simulation_config(config: &dyn ConfigPort) -> Result<SimulationConfig, StratsimError> {
    let tickers = tickers(config)?;
    let assets = tickers
        .iter()
        .map(|t| asset_config(config, t))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(SimulationConfig {
        correlations: parse_correlations(&config.get_list("simulation", "correlations"), &tickers)?,
        assets,
        trading_days: config.get_int("simulation", "trading_days", 252).max(0) as usize,
        iterations: config.get_int("simulation", "iterations", 1000).max(0) as usize,
        risk_free_rate: config.get_double("simulation", "risk_free_rate", 0.0),
        granularity: config.get_int("simulation", "granularity", 1).max(1) as usize,
        initial_cash: config.get_double("simulation", "initial_cash", 100_000.0),
        base_seed: config.get_int("simulation", "seed", 42).max(0) as u64,
        start_date: start_date(config)?,
        scenario: scenario_config(config)?,
        costs: costs_config(config)?,
        tax: tax_config(config)?,
        historical: Default::default(),
    })
}

/// Load history for every asset whose model replays or resamples it.
pub fn load_historical(sim: &mut SimulationConfig, data: &dyn HistoricalDataPort) -> Result<(), StratsimError> {
    for asset in sim.assets.iter().filter(|a| a.model.needs_history()) {
        let points = data.load_prices(&asset.ticker)?;
        if points.len() < 2 {
            return Err(StratsimError::Data {
                reason: format!("not enough history for '{}'", asset.ticker),
            });
        }
        sim.historical
            .insert(asset.ticker.clone(), points.into_iter().map(|p| p.point).collect());
    }
    Ok(())
}

/// Per-run metrics and the cross-run summary.
pub fn summarize(outcome: &SimulationOutcome, sim: &SimulationConfig) -> (Vec<RunMetrics>, SimulationSummary) {
    let target = sim.scenario.target_wealth();
    let metrics: Vec<RunMetrics> = outcome
        .runs
        .iter()
        .map(|run| RunMetrics::compute(run, sim.risk_free_rate, target))
        .collect();
    let summary = SimulationSummary::compute(&metrics, outcome.failures.len(), target.is_some());
    (metrics, summary)
}

fn print_summary(summary: &SimulationSummary, metrics: &[RunMetrics]) {
    let mean = |f: fn(&RunMetrics) -> f64| {
        if metrics.is_empty() {
            0.0
        } else {
            metrics.iter().map(f).sum::<f64>() / metrics.len() as f64
        }
    };

    eprintln!("\n=== Simulation Summary ===");
    eprintln!(
        "Iterations:       {} ({} failed)",
        summary.iterations, summary.failed_iterations
    );
    eprintln!("Mean Wealth:      ${:.2}", summary.mean_final_wealth);
    for (p, value) in SUMMARY_PERCENTILES.iter().zip(summary.final_wealth_percentiles) {
        eprintln!("  P{:<2}            ${:.2}", p, value);
    }
    eprintln!("Mean CAGR:        {:.2}%", mean(|m| m.cagr) * 100.0);
    eprintln!("Avg Sharpe:       {:.2}", summary.average_sharpe);
    eprintln!("Avg Max Drawdown: -{:.1}%", summary.average_max_drawdown * 100.0);
    eprintln!("P(ruin):          {:.1}%", summary.probability_of_ruin * 100.0);
    eprintln!("P(success):       {:.1}%", summary.probability_of_success * 100.0);
    eprintln!("Avg Commission:   ${:.2}", mean(|m| m.total_commission));
}

fn run_simulate(
    config_path: &Path,
    strategy_path: &Path,
    output_path: Option<&Path>,
    iterations: Option<usize>,
    seed: Option<u64>,
    sequential: bool,
) -> ExitCode {
    // Stage 1: config
    eprintln!("Loading config from {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    if let Err(e) = validate_simulation_config(&adapter) {
        return fail(e);
    }
    let mut sim = match build_simulation_config(&adapter) {
        Ok(c) => c,
        Err(e) => return fail(e),
    };
    if let Some(n) = iterations {
        sim.iterations = n;
    }
    if let Some(s) = seed {
        sim.base_seed = s;
    }
    if let Some(dir) = adapter.get_string("simulation", "historical_dir") {
        if let Err(e) = load_historical(&mut sim, &CsvAdapter::new(PathBuf::from(dir))) {
            return fail(e);
        }
    }

    // Stage 2: strategy
    eprintln!("Loading strategy from {}", strategy_path.display());
    let source = match read_strategy(strategy_path) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let compiled = match compile_strategy(&source, sim.tickers().as_slice()) {
        Ok(c) => c,
        Err(code) => return code,
    };

    // Stage 3: simulate
    eprintln!(
        "Running {} iterations of {} days (warm-up {} days)",
        sim.iterations,
        sim.trading_days,
        compiled.warmup_days()
    );
    let engine = SimulationEngine::new(&PathGenerator, &BlackScholesPricer, &TechnicalIndicators)
        .with_parallelism(!sequential);
    let step = (sim.iterations / 10).max(1);
    let outcome = engine.run_with_progress(&compiled, &sim, |done, total| {
        if done % step == 0 || done == total {
            eprintln!("  Progress: {}/{}", done, total);
        }
    });
    for failure in outcome.failures.iter().take(5) {
        eprintln!("warning: {failure}");
    }

    // Stage 4: metrics
    let (metrics, summary) = summarize(&outcome, &sim);
    print_summary(&summary, &metrics);
    if outcome.runs.is_empty() {
        eprintln!("error: no iteration completed");
        return ExitCode::from(NO_RESULTS_EXIT);
    }

    // Stage 5: report
    if let Some(path) = output_path {
        let path_str = path.to_string_lossy();
        if let Err(e) = CsvReportAdapter.write(&outcome.runs, sim.start_date, &path_str) {
            return fail(e);
        }
        eprintln!("\nEquity curves written to: {}", path.display());
    }
    ExitCode::SUCCESS
}
