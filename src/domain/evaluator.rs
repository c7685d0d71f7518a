//! Day-stepping strategy evaluator.
//!
//! Each day: settle expired options, pay tax on settlement days, apply the
//! scheduled cashflow, run the interpreter when the day is eligible, and
//! sample total portfolio value.

use tracing::debug;

use super::ast::Program;
use super::error::InterpreterError;
use super::execution::ExecutionCosts;
use super::interpreter::interpret_step;
use super::market::MarketContext;
use super::portfolio::{Portfolio, Side, Transaction};
use super::position::OPTION_MULTIPLIER;
use super::reconciler::reconcile_cash;
use super::value::EvaluationState;

pub const EXPIRY_TAG: &str = "EXPIRY";
pub const CONTRIBUTION_TAG: &str = "CONTRIBUTION";
pub const TAX_PAYMENT_TAG: &str = "TAX_PAYMENT";

/// Settlement period when tax is paid once a year.
pub const ANNUAL_SETTLEMENT_DAYS: usize = 252;

/// Cashflows fire on multiples of this many days.
pub const CASHFLOW_PERIOD_DAYS: usize = 30;
const DAYS_PER_YEAR: usize = 365;

#[derive(Debug, Clone, PartialEq, Default)]
pub enum FinancialScenario {
    #[default]
    None,
    Accumulation {
        monthly_contribution: f64,
        contribution_growth_rate: f64,
        target_wealth: Option<f64>,
    },
    Retirement {
        monthly_withdrawal: f64,
        inflation_rate: f64,
        initial_portfolio: f64,
        pension_start_month: usize,
        monthly_pension: f64,
    },
}

impl FinancialScenario {
    /// Opening cash; a retirement starts from its own portfolio.
    pub fn starting_cash(&self, initial_cash: f64) -> f64 {
        match self {
            FinancialScenario::Retirement {
                initial_portfolio, ..
            } => *initial_portfolio,
            _ => initial_cash,
        }
    }

    pub fn target_wealth(&self) -> Option<f64> {
        match self {
            FinancialScenario::Accumulation { target_wealth, .. } => *target_wealth,
            _ => None,
        }
    }

    /// Signed cashflow due on `day`: positive deposits, negative withdraws.
    pub fn cashflow(&self, day: usize) -> f64 {
        if day == 0 || day % CASHFLOW_PERIOD_DAYS != 0 {
            return 0.0;
        }
        let years = (day / DAYS_PER_YEAR) as i32;
        let month = day / CASHFLOW_PERIOD_DAYS;
        match self {
            FinancialScenario::None => 0.0,
            FinancialScenario::Accumulation {
                monthly_contribution,
                contribution_growth_rate,
                ..
            } => monthly_contribution * (1.0 + contribution_growth_rate).powi(years),
            FinancialScenario::Retirement {
                monthly_withdrawal,
                inflation_rate,
                pension_start_month,
                monthly_pension,
                ..
            } => {
                let inflation = (1.0 + inflation_rate).powi(years);
                let pension = if month >= *pension_start_month {
                    monthly_pension * inflation
                } else {
                    0.0
                };
                pension - monthly_withdrawal * inflation
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaxPaymentMode {
    /// Settle once a year.
    #[default]
    Immediate,
    /// Settle every `settlement_frequency` days.
    Periodic,
}

impl TaxPaymentMode {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "immediate" => Some(TaxPaymentMode::Immediate),
            "periodic" => Some(TaxPaymentMode::Periodic),
            _ => None,
        }
    }
}

/// Wealth tax charged on the marked portfolio value at each settlement.
#[derive(Debug, Clone, PartialEq)]
pub struct TaxConfig {
    pub payment_mode: TaxPaymentMode,
    pub settlement_frequency: usize,
    pub wealth_tax_rate: f64,
}

impl Default for TaxConfig {
    fn default() -> Self {
        TaxConfig {
            payment_mode: TaxPaymentMode::Immediate,
            settlement_frequency: ANNUAL_SETTLEMENT_DAYS,
            wealth_tax_rate: 0.0,
        }
    }
}

impl TaxConfig {
    pub fn settlement_period(&self) -> usize {
        match self.payment_mode {
            TaxPaymentMode::Immediate => ANNUAL_SETTLEMENT_DAYS,
            TaxPaymentMode::Periodic => self.settlement_frequency.max(1),
        }
    }

    pub fn is_settlement_day(&self, day: usize) -> bool {
        day > 0 && day % self.settlement_period() == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvaluatorConfig {
    pub trading_days: usize,
    pub initial_cash: f64,
    /// The interpreter runs on day 0 and every `granularity` days after.
    pub granularity: usize,
    pub scenario: FinancialScenario,
    pub costs: ExecutionCosts,
    pub tax: TaxConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationOutcome {
    /// Total portfolio value for days `0..=trading_days`.
    pub equity_curve: Vec<f64>,
    pub final_state: EvaluationState,
}

/// Pay out every option lot whose expiry is on or before `day` at intrinsic
/// value and remove it.
pub fn settle_expired_options(
    portfolio: Portfolio,
    market: &MarketContext<'_>,
    day: usize,
) -> Result<(Portfolio, Vec<Transaction>), InterpreterError> {
    let mut portfolio = portfolio;
    let mut transactions = Vec::new();
    for lot in portfolio.positions.iter_mut() {
        let Some(option) = lot.instrument.as_option() else {
            continue;
        };
        if !option.is_expired(day) {
            continue;
        }
        let spot = market.point(&option.underlying, day)?.price;
        let intrinsic = option.intrinsic(spot);
        let payoff = intrinsic * lot.quantity * OPTION_MULTIPLIER;
        portfolio.cash += payoff;
        transactions.push(Transaction {
            day,
            ticker: lot.instrument.to_string(),
            side: if lot.is_long() { Side::Sell } else { Side::Buy },
            quantity: lot.quantity.abs(),
            price: intrinsic,
            notional: payoff.abs(),
            commission: 0.0,
            slippage: 0.0,
            tag: EXPIRY_TAG.to_string(),
        });
        lot.quantity = 0.0;
    }
    portfolio.prune();
    Ok((portfolio, transactions))
}

/// On a settlement day, pay the wealth tax on the marked portfolio value,
/// liquidating holdings if cash runs short.
fn settle_tax(
    state: EvaluationState,
    tax: &TaxConfig,
    market: &MarketContext<'_>,
    costs: &ExecutionCosts,
    day: usize,
) -> Result<EvaluationState, InterpreterError> {
    if !tax.is_settlement_day(day) {
        return Ok(state);
    }
    let owed = market.portfolio_value(&state.portfolio, day)?.max(0.0) * tax.wealth_tax_rate;
    if owed <= 0.0 {
        return Ok(state);
    }
    debug!(day, owed, "tax settled");
    let mut state = state;
    let (portfolio, transactions) = reconcile_cash(state.portfolio, owed, market, costs, day)?;
    state.portfolio = portfolio;
    state.transactions.extend(transactions);
    state.transactions.push(Transaction {
        day,
        ticker: String::new(),
        side: Side::Sell,
        quantity: 0.0,
        price: 0.0,
        notional: owed,
        commission: 0.0,
        slippage: 0.0,
        tag: TAX_PAYMENT_TAG.to_string(),
    });
    Ok(state)
}

fn apply_cashflow(
    state: EvaluationState,
    scenario: &FinancialScenario,
    market: &MarketContext<'_>,
    costs: &ExecutionCosts,
    day: usize,
) -> Result<EvaluationState, InterpreterError> {
    let flow = scenario.cashflow(day);
    let mut state = state;
    if flow > 0.0 {
        state.portfolio.cash += flow;
        state.transactions.push(Transaction {
            day,
            ticker: String::new(),
            side: Side::Buy,
            quantity: 0.0,
            price: 0.0,
            notional: flow,
            commission: 0.0,
            slippage: 0.0,
            tag: CONTRIBUTION_TAG.to_string(),
        });
    } else if flow < 0.0 {
        let (portfolio, transactions) = reconcile_cash(state.portfolio, -flow, market, costs, day)?;
        state.portfolio = portfolio;
        state.transactions.extend(transactions);
    }
    Ok(state)
}

/// Run `program` over `0..=trading_days`.
pub fn evaluate(
    program: &Program,
    market: &MarketContext<'_>,
    config: &EvaluatorConfig,
) -> Result<EvaluationOutcome, InterpreterError> {
    let granularity = config.granularity.max(1);
    let mut state = EvaluationState::new(
        config.scenario.starting_cash(config.initial_cash),
        market.risk_free_rate,
    );
    let mut equity_curve = Vec::with_capacity(config.trading_days + 1);

    for day in 0..=config.trading_days {
        state.current_day = day;

        let (portfolio, settled) = settle_expired_options(state.portfolio, market, day)?;
        state.portfolio = portfolio;
        state.transactions.extend(settled);

        state = settle_tax(state, &config.tax, market, &config.costs, day)?;
        state = apply_cashflow(state, &config.scenario, market, &config.costs, day)?;

        let has_exposure = !state.portfolio.positions.is_empty() || state.portfolio.cash > 0.0;
        if has_exposure && (day == 0 || day % granularity == 0) {
            state = interpret_step(program, state, market, &config.costs)?;
        }

        let equity = market.portfolio_value(&state.portfolio, day)?;
        if equity <= 0.0 && equity_curve.last().is_some_and(|&prev: &f64| prev > 0.0) {
            debug!(day, "portfolio ruined");
        }
        equity_curve.push(equity);
    }

    Ok(EvaluationOutcome {
        equity_curve,
        final_state: state,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::black_scholes::BlackScholesPricer;
    use crate::adapters::technical_indicators::TechnicalIndicators;
    use crate::domain::ast::AssetReference;
    use crate::domain::elaborator::elaborate;
    use crate::domain::lexer::lex;
    use crate::domain::market::{MarketDataPoint, PriceHistory};
    use crate::domain::parser::parse;
    use crate::domain::position::{ConcreteOption, PositionInstance, ResolvedInstrument};
    use approx::assert_relative_eq;

    fn compile(source: &str) -> Program {
        elaborate(parse(lex(&["spy"], source).unwrap()).unwrap()).unwrap()
    }

    fn history(days: usize) -> PriceHistory {
        PriceHistory::new().with_series(
            "spy",
            vec![
                MarketDataPoint {
                    price: 100.0,
                    volatility: 0.2
                };
                days + 1
            ],
        )
    }

    fn config(trading_days: usize, scenario: FinancialScenario) -> EvaluatorConfig {
        EvaluatorConfig {
            trading_days,
            initial_cash: 10_000.0,
            granularity: 1,
            scenario,
            costs: ExecutionCosts::zero(),
            tax: TaxConfig::default(),
        }
    }

    fn run(source: &str, config: &EvaluatorConfig) -> EvaluationOutcome {
        let history = history(config.trading_days);
        let market = MarketContext::new(&history, &BlackScholesPricer, &TechnicalIndicators, 0.0);
        evaluate(&compile(source), &market, config).unwrap()
    }

    #[test]
    fn equity_curve_covers_every_day() {
        let outcome = run("buy 1 spy", &config(20, FinancialScenario::None));
        assert_eq!(outcome.equity_curve.len(), 21);
        assert!(outcome.equity_curve.iter().all(|&v| (v - 10_000.0).abs() < 1e-9));
    }

    #[test]
    fn granularity_limits_interpreter_days() {
        let cfg = EvaluatorConfig {
            granularity: 5,
            ..config(10, FinancialScenario::None)
        };
        let outcome = run("buy 1 spy", &cfg);
        assert_eq!(outcome.final_state.transactions.len(), 3);
    }

    #[test]
    fn retirement_without_assets_is_ruin() {
        let scenario = FinancialScenario::Retirement {
            monthly_withdrawal: 5_000.0,
            inflation_rate: 0.0,
            initial_portfolio: 1_000.0,
            pension_start_month: 100,
            monthly_pension: 0.0,
        };
        let outcome = run("when cash_available > $1000000: buy 1 spy end", &config(60, scenario));
        assert_relative_eq!(outcome.equity_curve[0], 1_000.0);
        assert_relative_eq!(outcome.equity_curve[29], 1_000.0);
        assert!(outcome.equity_curve[30..].iter().all(|&v| v == 0.0));
        assert_eq!(outcome.final_state.portfolio.cash, 0.0);
        assert!(outcome.final_state.portfolio.positions.is_empty());
    }

    #[test]
    fn accumulation_deposits_monthly() {
        let scenario = FinancialScenario::Accumulation {
            monthly_contribution: 100.0,
            contribution_growth_rate: 0.0,
            target_wealth: None,
        };
        let outcome = run("when false: buy 1 spy end", &config(60, scenario));
        assert_relative_eq!(outcome.equity_curve[29], 10_000.0);
        assert_relative_eq!(outcome.equity_curve[30], 10_100.0);
        assert_relative_eq!(outcome.equity_curve[60], 10_200.0);
    }

    #[test]
    fn pension_above_withdrawal_is_deposited() {
        let scenario = FinancialScenario::Retirement {
            monthly_withdrawal: 100.0,
            inflation_rate: 0.05,
            initial_portfolio: 0.0,
            pension_start_month: 0,
            monthly_pension: 300.0,
        };
        assert_relative_eq!(scenario.cashflow(30), 200.0);
        // one year in, both legs carry a year of inflation
        assert_relative_eq!(scenario.cashflow(390), 200.0 * 1.05, epsilon = 1e-9);
        assert_eq!(scenario.cashflow(31), 0.0);
        assert_eq!(scenario.cashflow(0), 0.0);
    }

    #[test]
    fn retirement_withdrawal_sells_holdings() {
        let scenario = FinancialScenario::Retirement {
            monthly_withdrawal: 2_000.0,
            inflation_rate: 0.0,
            initial_portfolio: 10_000.0,
            pension_start_month: 100,
            monthly_pension: 0.0,
        };
        let outcome = run("buy_max spy", &config(30, scenario));
        let state = &outcome.final_state;
        assert!(state.portfolio.cash >= 0.0);
        assert!(state.transactions.iter().any(|t| t.tag == "LIQUIDATION"));
        assert_relative_eq!(outcome.equity_curve[30], 8_000.0, epsilon = 1e-6);
    }

    #[test]
    fn expired_call_settles_at_intrinsic() {
        let history = history(10);
        let market = MarketContext::new(&history, &BlackScholesPricer, &TechnicalIndicators, 0.0);
        let mut portfolio = Portfolio::new(0.0);
        let id = portfolio.allocate_id();
        portfolio.positions.push(PositionInstance {
            id,
            group_id: None,
            definition_name: String::new(),
            component_name: None,
            parent_id: None,
            buy_price: 12.0,
            buy_date: 0,
            quantity: 2.0,
            instrument: ResolvedInstrument::Option(ConcreteOption {
                underlying: AssetReference::Simple("spy".into()),
                strike: 90.0,
                expiry_day: 5,
                is_call: true,
            }),
        });

        let (same, none) = settle_expired_options(portfolio.clone(), &market, 4).unwrap();
        assert_eq!(same.positions.len(), 1);
        assert!(none.is_empty());

        let (settled, txs) = settle_expired_options(portfolio, &market, 5).unwrap();
        assert!(settled.positions.is_empty());
        assert_relative_eq!(settled.cash, 2.0 * 10.0 * 100.0);
        assert_eq!(txs[0].tag, EXPIRY_TAG);
    }

    #[test]
    fn wealth_tax_settles_once_a_year_by_default() {
        let cfg = EvaluatorConfig {
            tax: TaxConfig {
                wealth_tax_rate: 0.01,
                ..TaxConfig::default()
            },
            ..config(300, FinancialScenario::None)
        };
        let outcome = run("when false: buy 1 spy end", &cfg);
        let taxes: Vec<_> = outcome
            .final_state
            .transactions
            .iter()
            .filter(|t| t.tag == TAX_PAYMENT_TAG)
            .collect();
        assert_eq!(taxes.len(), 1);
        assert_eq!(taxes[0].day, 252);
        assert_relative_eq!(taxes[0].notional, 100.0);
        assert_relative_eq!(outcome.equity_curve[251], 10_000.0);
        assert_relative_eq!(outcome.equity_curve[252], 9_900.0);
    }

    #[test]
    fn periodic_tax_uses_the_settlement_frequency() {
        let cfg = EvaluatorConfig {
            tax: TaxConfig {
                payment_mode: TaxPaymentMode::Periodic,
                settlement_frequency: 10,
                wealth_tax_rate: 0.1,
            },
            ..config(25, FinancialScenario::None)
        };
        let outcome = run("when false: buy 1 spy end", &cfg);
        let days: Vec<usize> = outcome
            .final_state
            .transactions
            .iter()
            .filter(|t| t.tag == TAX_PAYMENT_TAG)
            .map(|t| t.day)
            .collect();
        assert_eq!(days, vec![10, 20]);
        assert_relative_eq!(outcome.equity_curve[25], 8_100.0, epsilon = 1e-9);
    }

    #[test]
    fn tax_liquidates_holdings_when_cash_is_short() {
        let cfg = EvaluatorConfig {
            tax: TaxConfig {
                payment_mode: TaxPaymentMode::Periodic,
                settlement_frequency: 5,
                wealth_tax_rate: 0.05,
            },
            ..config(5, FinancialScenario::None)
        };
        let outcome = run("when position_quantity(spy) == 0: buy_max spy end", &cfg);
        let state = &outcome.final_state;
        assert!(state.transactions.iter().any(|t| t.tag == "LIQUIDATION"));
        assert!(state.transactions.iter().any(|t| t.tag == TAX_PAYMENT_TAG && t.day == 5));
        assert!(state.portfolio.cash >= 0.0);
        assert_relative_eq!(outcome.equity_curve[5], 9_500.0, epsilon = 1e-6);
    }

    #[test]
    fn zero_rate_records_no_tax() {
        let outcome = run("when false: buy 1 spy end", &config(300, FinancialScenario::None));
        assert!(outcome.final_state.transactions.iter().all(|t| t.tag != TAX_PAYMENT_TAG));
    }

    #[test]
    fn payment_mode_names() {
        assert_eq!(TaxPaymentMode::parse("Periodic"), Some(TaxPaymentMode::Periodic));
        assert_eq!(TaxPaymentMode::parse("immediate"), Some(TaxPaymentMode::Immediate));
        assert_eq!(TaxPaymentMode::parse("quarterly"), None);
    }
}
