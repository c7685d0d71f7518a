//! Margin and risk checks.
//!
//! Buying power is cash plus mark-to-market holdings, minus for every
//! underlying-ticker group the worst loss across a fixed set of joint
//! price/volatility shocks. Every trade set must leave buying power and
//! cash non-negative before it is committed.

use std::collections::BTreeMap;

use super::error::{InterpreterError, RiskValidationError};
use super::execution::{ExecutionCosts, PrimitiveTrade, TradeOrder, execute_trades};
use super::market::MarketContext;
use super::portfolio::Portfolio;
use super::position::{PositionInstance, ResolvedInstrument};

/// Fallback for `calculate_max_quantity` when one unit costs no buying power.
pub const FALLBACK_MAX_QUANTITY: f64 = 10_000.0;

/// Slack for float noise when checking buying power.
const BUYING_POWER_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StressScenario {
    pub price_multiplier: f64,
    pub vol_multiplier: f64,
}

pub const STRESS_SCENARIOS: [StressScenario; 6] = [
    StressScenario {
        price_multiplier: 1.0,
        vol_multiplier: 1.0,
    },
    StressScenario {
        price_multiplier: 0.8,
        vol_multiplier: 1.3,
    },
    StressScenario {
        price_multiplier: 0.5,
        vol_multiplier: 2.0,
    },
    StressScenario {
        price_multiplier: 0.01,
        vol_multiplier: 1.0,
    },
    StressScenario {
        price_multiplier: 1.2,
        vol_multiplier: 0.9,
    },
    StressScenario {
        price_multiplier: 2.0,
        vol_multiplier: 1.5,
    },
];

/// Shocked spot for an asset; a leveraged asset moves by its leverage
/// times the base shock and cannot go below zero.
fn shocked_spot(price: f64, leverage: f64, scenario: &StressScenario) -> f64 {
    (price * (1.0 + (scenario.price_multiplier - 1.0) * leverage)).max(0.0)
}

fn shocked_lot_value(
    lot: &PositionInstance,
    market: &MarketContext<'_>,
    day: usize,
    scenario: &StressScenario,
) -> Result<f64, InterpreterError> {
    let unit = match &lot.instrument {
        ResolvedInstrument::Asset(asset) => {
            let point = market.point(asset, day)?;
            shocked_spot(point.price, asset.leverage(), scenario)
        }
        ResolvedInstrument::Option(option) => {
            let point = market.point(&option.underlying, day)?;
            let spot = shocked_spot(point.price, option.underlying.leverage(), scenario);
            market.pricer.price(
                option,
                spot,
                point.volatility * scenario.vol_multiplier,
                day,
                market.risk_free_rate,
            )
        }
        ResolvedInstrument::Compound => 0.0,
    };
    Ok(lot.quantity * unit * lot.instrument.multiplier())
}

/// Cash + holdings − Σ per-group worst-case stress loss.
pub fn buying_power(
    portfolio: &Portfolio,
    market: &MarketContext<'_>,
    day: usize,
) -> Result<f64, InterpreterError> {
    let mut groups: BTreeMap<&str, Vec<&PositionInstance>> = BTreeMap::new();
    for lot in &portfolio.positions {
        groups.entry(lot.instrument.ticker()).or_default().push(lot);
    }

    let mut holdings = 0.0;
    let mut margin = 0.0;
    for lots in groups.values() {
        let current: f64 = lots
            .iter()
            .map(|lot| market.lot_value(lot, day))
            .sum::<Result<f64, _>>()?;
        holdings += current;

        let mut worst_pnl: f64 = 0.0;
        for scenario in &STRESS_SCENARIOS {
            let shocked: f64 = lots
                .iter()
                .map(|lot| shocked_lot_value(lot, market, day, scenario))
                .sum::<Result<f64, _>>()?;
            worst_pnl = worst_pnl.min(shocked - current);
        }
        margin += -worst_pnl;
    }
    Ok(portfolio.cash + holdings - margin)
}

fn apply_cost_free(
    trades: &[PrimitiveTrade],
    portfolio: &Portfolio,
    market: &MarketContext<'_>,
    day: usize,
) -> Result<Portfolio, InterpreterError> {
    let (scratch, _) = execute_trades(trades, portfolio.clone(), market, &ExecutionCosts::zero(), day)?;
    Ok(scratch)
}

/// Accept `trades` only if buying power and cash stay non-negative after
/// applying them to a scratch copy of the portfolio.
pub fn validate_trades(
    trades: &[PrimitiveTrade],
    portfolio: &Portfolio,
    market: &MarketContext<'_>,
    day: usize,
) -> Result<(), RiskValidationError> {
    let scratch = apply_cost_free(trades, portfolio, market, day)?;
    let buying_power = buying_power(&scratch, market, day)?;
    if buying_power < -BUYING_POWER_TOLERANCE || scratch.cash < -BUYING_POWER_TOLERANCE {
        return Err(RiskValidationError::InsufficientBuyingPower { buying_power });
    }
    Ok(())
}

/// Whole units of `unit_trades` (the trades for one unit) that current
/// buying power and cash can carry.
pub fn calculate_max_quantity(
    unit_trades: &[PrimitiveTrade],
    portfolio: &Portfolio,
    market: &MarketContext<'_>,
    day: usize,
) -> Result<f64, InterpreterError> {
    let before = buying_power(portfolio, market, day)?;
    let scratch = apply_cost_free(unit_trades, portfolio, market, day)?;
    let after = buying_power(&scratch, market, day)?;

    let units = |available: f64, cost: f64| {
        if cost <= 0.0 {
            FALLBACK_MAX_QUANTITY
        } else {
            (available / cost).floor().max(0.0)
        }
    };
    let by_margin = units(before, before - after);
    let by_cash = units(portfolio.cash, portfolio.cash - scratch.cash);
    Ok(by_margin.min(by_cash))
}

#[derive(Debug, Clone, PartialEq)]
pub struct RebalancePlan {
    pub is_achievable: bool,
    pub preparatory_trades: Vec<PrimitiveTrade>,
    pub reason: Option<String>,
}

/// Lots liquidated together: a whole batch group, or one unpaired long lot.
fn sellable_units(portfolio: &Portfolio, exclude: &ResolvedInstrument) -> Vec<Vec<PositionInstance>> {
    let mut grouped: BTreeMap<u64, Vec<PositionInstance>> = BTreeMap::new();
    let mut units = Vec::new();
    for lot in portfolio.positions.iter().filter(|l| &l.instrument != exclude) {
        match lot.group_id {
            Some(g) => grouped.entry(g).or_default().push(lot.clone()),
            None if lot.is_long() => units.push(vec![lot.clone()]),
            None => {}
        }
    }
    units.extend(grouped.into_values());
    units
}

fn closing_trades(unit: &[PositionInstance]) -> Vec<PrimitiveTrade> {
    unit.iter()
        .map(|lot| {
            let order = TradeOrder::new(lot.instrument.clone(), lot.quantity.abs()).closing(lot.id);
            if lot.is_long() {
                PrimitiveTrade::Sell(order)
            } else {
                PrimitiveTrade::Buy(order)
            }
        })
        .collect()
}

/// Plan `rebalance_to target_percent instrument`.
///
/// If the rebalance alone would breach buying power, whole sellable units
/// are liquidated in descending order of the buying power they free until
/// the rebalance fits or nothing is left to sell.
pub fn analyze_and_plan_rebalance(
    instrument: &ResolvedInstrument,
    target_percent: f64,
    portfolio: &Portfolio,
    market: &MarketContext<'_>,
    day: usize,
) -> Result<RebalancePlan, InterpreterError> {
    let rebalance = PrimitiveTrade::Rebalance {
        instrument: instrument.clone(),
        target_percent,
    };

    let fits = |prep: &[PrimitiveTrade]| -> Result<bool, InterpreterError> {
        let mut trades = prep.to_vec();
        trades.push(rebalance.clone());
        let scratch = apply_cost_free(&trades, portfolio, market, day)?;
        Ok(buying_power(&scratch, market, day)? >= -BUYING_POWER_TOLERANCE)
    };

    if fits(&[])? {
        return Ok(RebalancePlan {
            is_achievable: true,
            preparatory_trades: Vec::new(),
            reason: None,
        });
    }

    let base = buying_power(portfolio, market, day)?;
    let mut candidates = Vec::new();
    for unit in sellable_units(portfolio, instrument) {
        let trades = closing_trades(&unit);
        let scratch = apply_cost_free(&trades, portfolio, market, day)?;
        let impact = buying_power(&scratch, market, day)? - base;
        let first_id = unit.first().map(|l| l.id).unwrap_or(0);
        candidates.push((impact, first_id, trades));
    }
    candidates.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));

    let mut preparatory = Vec::new();
    for (_, _, trades) in candidates {
        preparatory.extend(trades);
        if fits(&preparatory)? {
            return Ok(RebalancePlan {
                is_achievable: true,
                preparatory_trades: preparatory,
                reason: None,
            });
        }
    }

    Ok(RebalancePlan {
        is_achievable: false,
        preparatory_trades: Vec::new(),
        reason: Some(format!(
            "Insufficient buying power to rebalance {} to {}% even after liquidating all sellable units.",
            instrument,
            super::ast::fmt_number(target_percent)
        )),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::black_scholes::BlackScholesPricer;
    use crate::adapters::technical_indicators::TechnicalIndicators;
    use crate::domain::ast::AssetReference;
    use crate::domain::market::{MarketDataPoint, PriceHistory};
    use crate::domain::position::ConcreteOption;
    use approx::assert_relative_eq;

    fn flat(price: f64) -> Vec<MarketDataPoint> {
        vec![
            MarketDataPoint {
                price,
                volatility: 0.2
            };
            40
        ]
    }

    fn asset(ticker: &str) -> ResolvedInstrument {
        ResolvedInstrument::Asset(AssetReference::Simple(ticker.into()))
    }

    fn buy(instrument: ResolvedInstrument, quantity: f64) -> PrimitiveTrade {
        PrimitiveTrade::Buy(TradeOrder::new(instrument, quantity))
    }

    fn with_market<T>(f: impl FnOnce(&MarketContext<'_>) -> T) -> T {
        let history = PriceHistory::new()
            .with_series("spy", flat(100.0))
            .with_series("qqq", flat(50.0))
            .with_series("3x_spy", flat(100.0));
        let market = MarketContext::new(&history, &BlackScholesPricer, &TechnicalIndicators, 0.0);
        f(&market)
    }

    fn holding(trades: &[PrimitiveTrade], cash: f64, market: &MarketContext<'_>) -> Portfolio {
        execute_trades(trades, Portfolio::new(cash), market, &ExecutionCosts::zero(), 0)
            .unwrap()
            .0
    }

    #[test]
    fn cash_only_buying_power_is_cash() {
        with_market(|market| {
            assert_relative_eq!(buying_power(&Portfolio::new(1000.0), market, 0).unwrap(), 1000.0);
        });
    }

    #[test]
    fn long_stock_margin_is_crash_loss() {
        with_market(|market| {
            let portfolio = holding(&[buy(asset("spy"), 10.0)], 1000.0, market);
            // worst case is the -99% scenario: 10 * 99 lost
            assert_relative_eq!(
                buying_power(&portfolio, market, 0).unwrap(),
                1000.0 - 990.0,
                epsilon = 1e-9
            );
        });
    }

    #[test]
    fn short_stock_margin_is_doubling_loss() {
        with_market(|market| {
            let portfolio = execute_trades(
                &[PrimitiveTrade::Sell(TradeOrder::new(asset("spy"), 1.0))],
                Portfolio::new(0.0),
                market,
                &ExecutionCosts::zero(),
                0,
            )
            .unwrap()
            .0;
            // +100% scenario: short loses 100
            assert_relative_eq!(buying_power(&portfolio, market, 0).unwrap(), -100.0, epsilon = 1e-9);
        });
    }

    #[test]
    fn leveraged_asset_shock_is_amplified() {
        let lev = ResolvedInstrument::Asset(AssetReference::Leveraged {
            ticker: "spy".into(),
            leverage: 3.0,
        });
        with_market(|market| {
            let portfolio = holding(&[buy(lev, 1.0)], 0.0, market);
            // -50% base shock wipes out a 3x fund: loss of the whole 100
            assert_relative_eq!(buying_power(&portfolio, market, 0).unwrap(), -100.0, epsilon = 1e-9);
        });
    }

    #[test]
    fn validate_rejects_overspend() {
        with_market(|market| {
            let portfolio = Portfolio::new(1000.0);
            assert!(validate_trades(&[buy(asset("spy"), 10.0)], &portfolio, market, 0).is_ok());
            let err = validate_trades(&[buy(asset("spy"), 20.0)], &portfolio, market, 0).unwrap_err();
            assert!(matches!(err, RiskValidationError::InsufficientBuyingPower { .. }));
        });
    }

    #[test]
    fn max_quantity_is_bounded_by_cash() {
        with_market(|market| {
            let portfolio = Portfolio::new(100_000.0);
            let max = calculate_max_quantity(&[buy(asset("spy"), 1.0)], &portfolio, market, 0).unwrap();
            // margin alone would allow floor(100000 / 99)
            assert_eq!(max, 1000.0);
            let filled = holding(&[buy(asset("spy"), max)], 100_000.0, market);
            assert!(buying_power(&filled, market, 0).unwrap() >= 0.0);
        });
    }

    #[test]
    fn max_quantity_is_bounded_by_margin_for_shorts() {
        with_market(|market| {
            let portfolio = Portfolio::new(10_000.0);
            let unit = [PrimitiveTrade::Sell(TradeOrder::new(asset("spy"), 1.0))];
            // each short share costs its +100% shock
            let max = calculate_max_quantity(&unit, &portfolio, market, 0).unwrap();
            assert_eq!(max, 100.0);
        });
    }

    #[test]
    fn max_quantity_fallback_when_unit_is_free() {
        with_market(|market| {
            let max = calculate_max_quantity(&[], &Portfolio::new(10.0), market, 0).unwrap();
            assert_eq!(max, FALLBACK_MAX_QUANTITY);
        });
    }

    #[test]
    fn covered_call_margin_is_less_than_naked() {
        let call = ResolvedInstrument::Option(ConcreteOption {
            underlying: AssetReference::Simple("spy".into()),
            strike: 110.0,
            expiry_day: 30,
            is_call: true,
        });
        with_market(|market| {
            let sell_call = PrimitiveTrade::Sell(TradeOrder::new(call.clone(), 1.0));
            let naked = holding(&[sell_call.clone()], 20_000.0, market);
            let covered = holding(&[buy(asset("spy"), 100.0), sell_call], 30_000.0, market);
            let naked_margin = market.portfolio_value(&naked, 0).unwrap()
                - buying_power(&naked, market, 0).unwrap();
            let covered_margin = market.portfolio_value(&covered, 0).unwrap()
                - buying_power(&covered, market, 0).unwrap();
            assert!(naked_margin > 0.0);
            assert!(covered_margin < 100.0 * 100.0);
            assert!(naked_margin > 5_000.0);
        });
    }

    #[test]
    fn rebalance_plan_fits_without_preparation() {
        with_market(|market| {
            let plan =
                analyze_and_plan_rebalance(&asset("spy"), 50.0, &Portfolio::new(10_000.0), market, 0)
                    .unwrap();
            assert!(plan.is_achievable);
            assert!(plan.preparatory_trades.is_empty());
        });
    }

    #[test]
    fn rebalance_plan_liquidates_other_holdings() {
        with_market(|market| {
            // overdrawn and fully invested in qqq
            let mut portfolio = holding(&[buy(asset("qqq"), 200.0)], 10_000.0, market);
            portfolio.cash = -9_800.0;
            let plan = analyze_and_plan_rebalance(&asset("spy"), 90.0, &portfolio, market, 0).unwrap();
            assert!(plan.is_achievable);
            assert!(!plan.preparatory_trades.is_empty());
            assert!(matches!(plan.preparatory_trades[0], PrimitiveTrade::Sell(_)));
        });
    }

    #[test]
    fn rebalance_plan_unachievable_when_nothing_to_sell() {
        with_market(|market| {
            let portfolio = Portfolio::new(-500.0);
            let plan = analyze_and_plan_rebalance(&asset("spy"), 100.0, &portfolio, market, 0).unwrap();
            assert!(!plan.is_achievable);
            assert!(plan.reason.is_some());
        });
    }
}
