//! Configuration validation.
//!
//! Checks every simulation field before a run and turns the structured
//! sections (assets, costs, scenario, tax) into domain values.

use crate::domain::error::StratsimError;
use crate::domain::evaluator::{FinancialScenario, TaxConfig, TaxPaymentMode};
use crate::domain::execution::{ExecutionCosts, SlippageModel, SlippageTier};
use crate::domain::simulation::{AssetConfig, Correlation, PriceModel};
use crate::ports::config_port::ConfigPort;
use chrono::NaiveDate;

const SIMULATION: &str = "simulation";
const COSTS: &str = "costs";
const SCENARIO: &str = "scenario";
const TAX: &str = "tax";

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> StratsimError {
    StratsimError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn missing(section: &str, key: &str) -> StratsimError {
    StratsimError::ConfigMissing {
        section: section.to_string(),
        key: key.to_string(),
    }
}

pub fn asset_section(ticker: &str) -> String {
    format!("asset.{}", ticker.to_ascii_lowercase())
}

pub fn validate_simulation_config(config: &dyn ConfigPort) -> Result<(), StratsimError> {
    let tickers = tickers(config)?;
    validate_counts(config)?;
    validate_rates(config)?;
    start_date(config)?;
    parse_correlations(&config.get_list(SIMULATION, "correlations"), &tickers)?;

    let mut needs_history = false;
    for ticker in &tickers {
        needs_history |= asset_config(config, ticker)?.model.needs_history();
    }
    if needs_history && config.get_string(SIMULATION, "historical_dir").is_none() {
        return Err(missing(SIMULATION, "historical_dir"));
    }

    costs_config(config)?;
    scenario_config(config)?;
    tax_config(config)?;
    Ok(())
}

pub fn tickers(config: &dyn ConfigPort) -> Result<Vec<String>, StratsimError> {
    let tickers: Vec<String> = config
        .get_list(SIMULATION, "tickers")
        .into_iter()
        .map(|t| t.to_ascii_lowercase())
        .collect();
    if tickers.is_empty() {
        return Err(missing(SIMULATION, "tickers"));
    }
    if let Some(bad) = tickers
        .iter()
        .find(|t| !t.chars().all(|c| c.is_ascii_alphanumeric()))
    {
        return Err(invalid(
            SIMULATION,
            "tickers",
            format!("ticker '{}' must be alphanumeric", bad),
        ));
    }
    Ok(tickers)
}

fn validate_counts(config: &dyn ConfigPort) -> Result<(), StratsimError> {
    for key in ["trading_days", "iterations"] {
        if config.get_int(SIMULATION, key, 0) <= 0 {
            return Err(invalid(SIMULATION, key, format!("{} must be positive", key)));
        }
    }
    if config.get_int(SIMULATION, "granularity", 1) < 1 {
        return Err(invalid(SIMULATION, "granularity", "granularity must be at least 1"));
    }
    if config.get_int(SIMULATION, "seed", 0) < 0 {
        return Err(invalid(SIMULATION, "seed", "seed must be non-negative"));
    }
    Ok(())
}

fn validate_rates(config: &dyn ConfigPort) -> Result<(), StratsimError> {
    let rate = config.get_double(SIMULATION, "risk_free_rate", 0.0);
    if !(0.0..1.0).contains(&rate) {
        return Err(invalid(
            SIMULATION,
            "risk_free_rate",
            "risk_free_rate must be between 0 and 1",
        ));
    }
    if config.get_double(SIMULATION, "initial_cash", 0.0) < 0.0 {
        return Err(invalid(SIMULATION, "initial_cash", "initial_cash must be non-negative"));
    }
    Ok(())
}

pub fn start_date(config: &dyn ConfigPort) -> Result<NaiveDate, StratsimError> {
    let raw = config
        .get_string(SIMULATION, "start_date")
        .ok_or_else(|| missing(SIMULATION, "start_date"))?;
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| invalid(SIMULATION, "start_date", "invalid start_date format, expected YYYY-MM-DD"))
}

/// `a:b:rho` items; both tickers must be simulated and `rho` in [-1, 1].
pub fn parse_correlations(items: &[String], tickers: &[String]) -> Result<Vec<Correlation>, StratsimError> {
    items
        .iter()
        .map(|item| {
            let parts: Vec<&str> = item.split(':').map(str::trim).collect();
            let [a, b, rho] = parts.as_slice() else {
                return Err(invalid(
                    SIMULATION,
                    "correlations",
                    format!("'{}' is not of the form a:b:rho", item),
                ));
            };
            let (a, b) = (a.to_ascii_lowercase(), b.to_ascii_lowercase());
            for t in [&a, &b] {
                if !tickers.contains(t) {
                    return Err(invalid(
                        SIMULATION,
                        "correlations",
                        format!("unknown ticker '{}'", t),
                    ));
                }
            }
            if a == b {
                return Err(invalid(SIMULATION, "correlations", format!("'{}' correlates a ticker with itself", item)));
            }
            let rho: f64 = rho
                .parse()
                .map_err(|_| invalid(SIMULATION, "correlations", format!("invalid rho in '{}'", item)))?;
            if !(-1.0..=1.0).contains(&rho) {
                return Err(invalid(SIMULATION, "correlations", "rho must be between -1 and 1"));
            }
            Ok(Correlation { a, b, rho })
        })
        .collect()
}

pub fn asset_config(config: &dyn ConfigPort, ticker: &str) -> Result<AssetConfig, StratsimError> {
    let section = asset_section(ticker);
    let model_name = config
        .get_string(&section, "model")
        .unwrap_or_else(|| "gbm".to_string())
        .to_ascii_lowercase();
    let model = match model_name.trim() {
        "gbm" => {
            let volatility = config.get_double(&section, "volatility", 0.2);
            if volatility < 0.0 {
                return Err(invalid(&section, "volatility", "volatility must be non-negative"));
            }
            PriceModel::Gbm {
                drift: config.get_double(&section, "drift", 0.0),
                volatility,
            }
        }
        "historical" => PriceModel::Historical,
        "bootstrap" => {
            let block_size = config.get_int(&section, "block_size", 20);
            if block_size < 1 {
                return Err(invalid(&section, "block_size", "block_size must be at least 1"));
            }
            PriceModel::BlockBootstrap {
                block_size: block_size as usize,
            }
        }
        other => {
            return Err(invalid(
                &section,
                "model",
                format!("unknown model '{}', expected gbm, historical or bootstrap", other),
            ));
        }
    };

    let initial_price = config.get_double(&section, "initial_price", 0.0);
    if !model.needs_history() && initial_price <= 0.0 {
        return Err(invalid(&section, "initial_price", "initial_price must be positive"));
    }
    Ok(AssetConfig {
        ticker: ticker.to_ascii_lowercase(),
        initial_price,
        model,
    })
}

/// `min:max:spread` items with `min < max` and a non-negative spread.
pub fn parse_slippage_tiers(items: &[String]) -> Result<Vec<SlippageTier>, StratsimError> {
    items
        .iter()
        .map(|item| {
            let values: Vec<f64> = item
                .split(':')
                .map(|p| p.trim().parse::<f64>())
                .collect::<Result<_, _>>()
                .map_err(|_| invalid(COSTS, "slippage_tiers", format!("invalid number in '{}'", item)))?;
            let [min_vol, max_vol, spread] = values.as_slice() else {
                return Err(invalid(
                    COSTS,
                    "slippage_tiers",
                    format!("'{}' is not of the form min:max:spread", item),
                ));
            };
            if min_vol >= max_vol || *spread < 0.0 {
                return Err(invalid(
                    COSTS,
                    "slippage_tiers",
                    format!("'{}' needs min < max and a non-negative spread", item),
                ));
            }
            Ok(SlippageTier {
                min_vol: *min_vol,
                max_vol: *max_vol,
                spread: *spread,
            })
        })
        .collect()
}

pub fn costs_config(config: &dyn ConfigPort) -> Result<ExecutionCosts, StratsimError> {
    let mut values = [0.0; 3];
    for (slot, key) in values
        .iter_mut()
        .zip(["commission_per_order", "commission_per_unit", "default_spread"])
    {
        *slot = config.get_double(COSTS, key, 0.0);
        if *slot < 0.0 {
            return Err(invalid(COSTS, key, format!("{} must be non-negative", key)));
        }
    }
    let [commission_per_order, commission_per_unit, default_spread] = values;
    Ok(ExecutionCosts {
        commission_per_order,
        commission_per_unit,
        slippage: SlippageModel {
            default_spread,
            tiers: parse_slippage_tiers(&config.get_list(COSTS, "slippage_tiers"))?,
        },
    })
}

fn non_negative(config: &dyn ConfigPort, key: &str) -> Result<f64, StratsimError> {
    let value = config.get_double(SCENARIO, key, 0.0);
    if value < 0.0 {
        return Err(invalid(SCENARIO, key, format!("{} must be non-negative", key)));
    }
    Ok(value)
}

pub fn scenario_config(config: &dyn ConfigPort) -> Result<FinancialScenario, StratsimError> {
    let kind = config
        .get_string(SCENARIO, "type")
        .unwrap_or_else(|| "none".to_string())
        .to_ascii_lowercase();
    match kind.trim() {
        "none" => Ok(FinancialScenario::None),
        "accumulation" => {
            let target_wealth = match config.get_string(SCENARIO, "target_wealth") {
                Some(_) => Some(non_negative(config, "target_wealth")?),
                None => None,
            };
            Ok(FinancialScenario::Accumulation {
                monthly_contribution: non_negative(config, "monthly_contribution")?,
                contribution_growth_rate: config.get_double(SCENARIO, "contribution_growth_rate", 0.0),
                target_wealth,
            })
        }
        "retirement" => {
            let initial_portfolio = non_negative(config, "initial_portfolio")?;
            if initial_portfolio <= 0.0 {
                return Err(invalid(
                    SCENARIO,
                    "initial_portfolio",
                    "initial_portfolio must be positive",
                ));
            }
            let pension_start_month = config.get_int(SCENARIO, "pension_start_month", 0);
            if pension_start_month < 0 {
                return Err(invalid(
                    SCENARIO,
                    "pension_start_month",
                    "pension_start_month must be non-negative",
                ));
            }
            Ok(FinancialScenario::Retirement {
                monthly_withdrawal: non_negative(config, "monthly_withdrawal")?,
                inflation_rate: config.get_double(SCENARIO, "inflation_rate", 0.0),
                initial_portfolio,
                pension_start_month: pension_start_month as usize,
                monthly_pension: non_negative(config, "monthly_pension")?,
            })
        }
        other => Err(invalid(
            SCENARIO,
            "type",
            format!("unknown scenario '{}', expected none, accumulation or retirement", other),
        )),
    }
}

/// `[tax]`: an absent section means annual settlement at a zero rate.
pub fn tax_config(config: &dyn ConfigPort) -> Result<TaxConfig, StratsimError> {
    let defaults = TaxConfig::default();
    let payment_mode = match config.get_string(TAX, "payment_mode") {
        Some(name) => TaxPaymentMode::parse(&name).ok_or_else(|| {
            invalid(
                TAX,
                "payment_mode",
                format!("unknown payment_mode '{}', expected immediate or periodic", name.trim()),
            )
        })?,
        None => defaults.payment_mode,
    };
    let frequency = config.get_int(TAX, "settlement_frequency", defaults.settlement_frequency as i64);
    if frequency < 1 {
        return Err(invalid(
            TAX,
            "settlement_frequency",
            "settlement_frequency must be at least 1",
        ));
    }
    let wealth_tax_rate = config.get_double(TAX, "wealth_tax_rate", defaults.wealth_tax_rate);
    if !(0.0..=1.0).contains(&wealth_tax_rate) {
        return Err(invalid(TAX, "wealth_tax_rate", "wealth_tax_rate must be between 0 and 1"));
    }
    Ok(TaxConfig {
        payment_mode,
        settlement_frequency: frequency as usize,
        wealth_tax_rate,
    })
}
