//! End-to-end tests through the compiler, evaluator and simulation engine.
//!
//! Tests cover:
//! - Composite definitions bought then maxed out against cash
//! - Option-leg lexing with DTE and delta targets
//! - Conditions that block a trade leave the portfolio untouched
//! - Retirement withdrawals that exhaust the portfolio
//! - Seeded simulations are reproducible, parallel or sequential
//! - Warm-up days trade but stay out of the equity curve
//! - Periodic wealth tax settles through the cash reconciler
//! - Equity equals cash plus holdings marked to the final price
//! - Oversized longs and shorts are rejected by the margin check
//! - Cyclic definitions fail compilation
//! - Rendered programs parse back to the same tree

mod common;

use common::*;
use std::collections::HashMap;
use std::sync::atomic::Ordering;

use stratsim::adapters::black_scholes::BlackScholesPricer;
use stratsim::adapters::technical_indicators::TechnicalIndicators;
use stratsim::domain::ast::{AssetReference, GreekType};
use stratsim::domain::compiler::compile;
use stratsim::domain::elaborator::elaborate;
use stratsim::domain::evaluator::{EvaluatorConfig, FinancialScenario, TaxConfig, evaluate};
use stratsim::domain::execution::{ExecutionCosts, SlippageModel};
use stratsim::domain::lexer::lex;
use stratsim::domain::market::MarketContext;
use stratsim::domain::parser::parse;
use stratsim::domain::portfolio::Side;
use stratsim::domain::risk::buying_power;
use stratsim::domain::token::Token;
use stratsim::ports::path_port::{PathRequest, PricePathProvider};

fn evaluator(trading_days: usize, initial_cash: f64) -> EvaluatorConfig {
    EvaluatorConfig {
        trading_days,
        initial_cash,
        granularity: 1,
        scenario: FinancialScenario::None,
        costs: ExecutionCosts::zero(),
        tax: TaxConfig::default(),
    }
}

fn total_quantity(state: &stratsim::domain::value::EvaluationState) -> f64 {
    state.portfolio.positions.iter().map(|lot| lot.quantity).sum()
}

mod composite_positions {
    use super::*;

    #[test]
    fn buy_max_spends_remaining_cash() {
        let program = program("define x as: buy 1 spy\nbuy 1 x\nbuy_max x", &["spy"]);
        let history = flat_history(&["spy"], 100.0, 0);
        let market = MarketContext::new(&history, &BlackScholesPricer, &TechnicalIndicators, 0.0);

        let outcome = evaluate(&program, &market, &evaluator(0, 100_000.0)).unwrap();
        let state = &outcome.final_state;

        assert!((total_quantity(state) - 1000.0).abs() < 1e-9);
        assert!(state.portfolio.cash.abs() < 1e-6);
        assert!(state.portfolio.cash >= -1e-6);
        assert!(
            state
                .portfolio
                .positions
                .iter()
                .all(|lot| lot.definition_name == "x")
        );
        assert_eq!(outcome.equity_curve.len(), 1);
        assert!((outcome.equity_curve[0] - 100_000.0).abs() < 1e-6);
    }

    #[test]
    fn sell_all_closes_every_lot() {
        let program = program("define x as: buy 2 spy\nbuy 3 x\nsell_all x", &["spy"]);
        let history = flat_history(&["spy"], 50.0, 0);
        let market = MarketContext::new(&history, &BlackScholesPricer, &TechnicalIndicators, 0.0);

        let outcome = evaluate(&program, &market, &evaluator(0, 10_000.0)).unwrap();
        assert!(outcome.final_state.portfolio.positions.is_empty());
        assert!((outcome.final_state.portfolio.cash - 10_000.0).abs() < 1e-9);
        let sells = outcome
            .final_state
            .transactions
            .iter()
            .filter(|t| t.side == Side::Sell)
            .count();
        assert!(sells >= 1);
    }
}

mod option_legs {
    use super::*;

    #[test]
    fn dte_and_delta_are_decoded() {
        let tokens = lex(&["aapl"], "aapl_30dte_70delta").unwrap();
        match &tokens[0].token {
            Token::OptionLeg(spec) => {
                assert_eq!(spec.underlying, AssetReference::Simple("aapl".into()));
                assert_eq!(spec.dte, 30);
                assert_eq!(spec.greek, GreekType::Delta);
                assert!((spec.value - 0.7).abs() < 1e-12);
            }
            other => panic!("expected option leg, got {:?}", other),
        }
        assert_eq!(tokens.last().map(|s| &s.token), Some(&Token::Eof));
    }

    #[test]
    fn option_purchase_uses_contract_multiplier() {
        let program = program("buy 1 spy_30dte_50delta", &["spy"]);
        let history = flat_history(&["spy"], 100.0, 5);
        let market = MarketContext::new(&history, &BlackScholesPricer, &TechnicalIndicators, 0.0);

        let outcome = evaluate(&program, &market, &evaluator(0, 10_000.0)).unwrap();
        let state = &outcome.final_state;
        assert_eq!(state.portfolio.positions.len(), 1);
        let premium = 10_000.0 - state.portfolio.cash;
        // one contract of a near-ATM 30 day call on a $100 stock
        assert!(premium > 100.0 && premium < 1_000.0, "premium {}", premium);
    }
}

mod guarded_trades {
    use super::*;

    #[test]
    fn false_condition_makes_no_trade() {
        let program = program("when cash_available > $1000: buy 1 spy end", &["spy"]);
        let history = flat_history(&["spy"], 100.0, 3);
        let market = MarketContext::new(&history, &BlackScholesPricer, &TechnicalIndicators, 0.0);

        let outcome = evaluate(&program, &market, &evaluator(3, 500.0)).unwrap();
        assert!(outcome.final_state.transactions.is_empty());
        assert!(outcome.final_state.portfolio.positions.is_empty());
        assert_eq!(outcome.equity_curve, vec![500.0; 4]);
    }
}

mod retirement {
    use super::*;

    #[test]
    fn withdrawals_exhaust_the_portfolio() {
        let mut sim = sim_config(vec![gbm_asset("spy", 100.0)], 2, 60);
        sim.scenario = FinancialScenario::Retirement {
            monthly_withdrawal: 5_000.0,
            inflation_rate: 0.0,
            initial_portfolio: 1_000.0,
            pension_start_month: 0,
            monthly_pension: 0.0,
        };
        let paths = FlatPaths::default();
        let outcome = default_engine(&paths)
            .run_source("buy 5 spy", &sim)
            .unwrap();

        assert!(outcome.failures.is_empty());
        assert_eq!(outcome.runs.len(), 2);
        for run in &outcome.runs {
            assert_eq!(run.equity_curve.len(), 61);
            assert!((run.equity_curve[0] - 1_000.0).abs() < 1e-6);
            assert!(run.equity_curve[30..].iter().all(|&v| v == 0.0));
        }

        let (metrics, summary) = stratsim::cli::summarize(&outcome, &sim);
        assert!(metrics.iter().all(|m| m.ruined));
        assert!((summary.probability_of_ruin - 1.0).abs() < 1e-12);
        assert_eq!(summary.probability_of_success, 0.0);
    }

    #[test]
    fn accumulation_contributions_raise_cash() {
        let mut sim = sim_config(vec![gbm_asset("spy", 100.0)], 1, 60);
        sim.initial_cash = 0.0;
        sim.scenario = FinancialScenario::Accumulation {
            monthly_contribution: 1_000.0,
            contribution_growth_rate: 0.0,
            target_wealth: Some(1_500.0),
        };
        let paths = FlatPaths::default();
        let outcome = default_engine(&paths).run_source("", &sim).unwrap();
        let curve = &outcome.runs[0].equity_curve;
        assert_eq!(curve[29], 0.0);
        assert_eq!(curve[30], 1_000.0);
        assert_eq!(curve[60], 2_000.0);

        let (metrics, summary) = stratsim::cli::summarize(&outcome, &sim);
        assert!(metrics[0].reached_goal);
        assert_eq!(metrics[0].days_to_goal, Some(60));
        assert_eq!(summary.probability_of_success, 1.0);
    }
}

mod reproducibility {
    use super::*;

    const STRATEGY: &str = "when spy > spy_sma_10: buy 1 spy end\n\
                            when spy < spy_sma_10: sell_all spy end";

    #[test]
    fn same_seed_gives_identical_runs() {
        let sim = sim_config(vec![gbm_asset("spy", 100.0)], 1000, 20);
        let compiled = compiled(STRATEGY, &["spy"]);
        let engine = default_engine(&GBM_PATHS);

        let first = engine.run(&compiled, &sim);
        let second = engine.run(&compiled, &sim);
        assert_eq!(first.runs.len(), 1000);
        assert!(first.failures.is_empty());
        assert_eq!(first.warmup_days, 20);
        assert_eq!(first.runs, second.runs);
    }

    #[test]
    fn parallel_matches_sequential() {
        let sim = sim_config(vec![gbm_asset("spy", 100.0)], 64, 20);
        let compiled = compiled(STRATEGY, &["spy"]);

        let parallel = default_engine(&GBM_PATHS).run(&compiled, &sim);
        let sequential = default_engine(&GBM_PATHS)
            .with_parallelism(false)
            .run(&compiled, &sim);
        assert_eq!(parallel.runs, sequential.runs);
        let ids: Vec<usize> = parallel.runs.iter().map(|r| r.run_id).collect();
        assert_eq!(ids, (1..=64).collect::<Vec<_>>());
    }

    #[test]
    fn different_seeds_diverge() {
        let mut sim = sim_config(vec![gbm_asset("spy", 100.0)], 4, 20);
        let compiled = compiled(STRATEGY, &["spy"]);
        let engine = default_engine(&GBM_PATHS);
        let a = engine.run(&compiled, &sim);
        sim.base_seed = 43;
        let b = engine.run(&compiled, &sim);
        assert_ne!(a.runs[0].equity_curve, b.runs[0].equity_curve);
        // run 1 at seed 43 draws the same path as run 2 at seed 42
        assert_eq!(a.runs[1].equity_curve, b.runs[0].equity_curve);
    }

    #[test]
    fn path_provider_called_once_per_iteration() {
        let sim = sim_config(vec![gbm_asset("spy", 100.0)], 12, 5);
        let paths = FlatPaths::default();
        let outcome = default_engine(&paths).run_source("buy 1 spy", &sim).unwrap();
        assert_eq!(outcome.runs.len(), 12);
        assert_eq!(paths.calls.load(Ordering::Relaxed), 12);
    }
}

mod warmup {
    use super::*;

    #[test]
    fn warmup_days_are_traded_then_trimmed() {
        let sim = sim_config(vec![gbm_asset("spy", 100.0)], 1, 10);
        let paths = FlatPaths::default();
        let outcome = default_engine(&paths)
            .run_source("define s as spy_sma_5\nbuy 1 spy", &sim)
            .unwrap();
        assert_eq!(outcome.warmup_days, 15);

        let run = &outcome.runs[0];
        assert_eq!(run.run_id, 1);
        assert_eq!(run.equity_curve.len(), 11);
        let buys = run
            .final_state
            .transactions
            .iter()
            .filter(|t| t.side == Side::Buy)
            .count();
        assert_eq!(buys, 26);
        assert_eq!(total_quantity(&run.final_state), 26.0);
        assert!(run.equity_curve.iter().all(|&v| (v - 100_000.0).abs() < 1e-9));
    }
}

mod tax {
    use super::*;
    use stratsim::domain::evaluator::{TAX_PAYMENT_TAG, TaxPaymentMode};

    #[test]
    fn periodic_wealth_tax_reduces_equity() {
        let mut sim = sim_config(vec![gbm_asset("spy", 100.0)], 2, 10);
        sim.tax = TaxConfig {
            payment_mode: TaxPaymentMode::Periodic,
            settlement_frequency: 5,
            wealth_tax_rate: 0.01,
        };
        let paths = FlatPaths::default();
        let outcome = default_engine(&paths)
            .run_source("when false: buy 1 spy end", &sim)
            .unwrap();
        for run in &outcome.runs {
            let paid: Vec<f64> = run
                .final_state
                .transactions
                .iter()
                .filter(|t| t.tag == TAX_PAYMENT_TAG)
                .map(|t| t.notional)
                .collect();
            assert_eq!(paid.len(), 2);
            assert!((paid[0] - 1_000.0).abs() < 1e-9);
            assert!((paid[1] - 990.0).abs() < 1e-9);
            assert!((run.equity_curve[4] - 100_000.0).abs() < 1e-9);
            assert!((run.equity_curve[10] - 98_010.0).abs() < 1e-9);
        }
    }
}

mod conservation {
    use super::*;

    #[test]
    fn final_equity_is_cash_plus_marked_holdings() {
        let sim = sim_config(vec![gbm_asset("spy", 100.0)], 8, 30);
        let compiled = compiled(
            "when spy > $95: buy 3 spy end\nwhen spy > $110: sell_all spy end",
            &["spy"],
        );
        let outcome = default_engine(&GBM_PATHS).run(&compiled, &sim);
        assert_eq!(outcome.runs.len(), 8);

        let days = compiled.warmup_days() + sim.trading_days;
        let no_history = HashMap::new();
        for run in &outcome.runs {
            let request = PathRequest {
                assets: &sim.assets,
                correlations: &sim.correlations,
                days,
                historical: &no_history,
            };
            let path = GBM_PATHS
                .generate(&request, sim.base_seed + run.run_id as u64)
                .unwrap();
            let last_price = path.point("spy", days).unwrap().price;

            let portfolio = &run.final_state.portfolio;
            let held: f64 = portfolio.positions.iter().map(|lot| lot.quantity).sum();
            let expected = portfolio.cash + held * last_price;
            let equity = *run.equity_curve.last().unwrap();
            assert!(
                (equity - expected).abs() < 1e-6 * expected.abs().max(1.0),
                "run {}: {} vs {}",
                run.run_id,
                equity,
                expected
            );
        }
    }

    #[test]
    fn round_trip_with_costs_loses_only_costs() {
        let program = program("when portfolio_value > $0: buy 10 spy end", &["spy"]);
        let history = flat_history(&["spy"], 100.0, 0);
        let market = MarketContext::new(&history, &BlackScholesPricer, &TechnicalIndicators, 0.0);
        let mut config = evaluator(0, 10_000.0);
        config.costs = ExecutionCosts {
            commission_per_order: 1.0,
            commission_per_unit: 0.0,
            slippage: SlippageModel {
                default_spread: 0.01,
                tiers: Vec::new(),
            },
        };

        let bought = evaluate(&program, &market, &config).unwrap().final_state;
        let fill = &bought.transactions[0];
        assert_eq!(fill.side, Side::Buy);
        assert!(fill.commission > 0.0);
        assert!(bought.portfolio.cash < 10_000.0 - 1_000.0);

        let sell = stratsim::domain::compiler::compile("sell_all spy", &["spy"])
            .unwrap()
            .program;
        let closed = stratsim::domain::interpreter::interpret_step(&sell, bought, &market, &config.costs)
            .unwrap();
        assert!(closed.portfolio.positions.is_empty());
        let lost = 10_000.0 - closed.portfolio.cash;
        let costs: f64 = closed
            .transactions
            .iter()
            .map(|t| t.commission + t.slippage)
            .sum();
        assert!(lost > 0.0);
        assert!((lost - costs).abs() < 1e-6, "lost {} costs {}", lost, costs);
    }
}

mod margin {
    use super::*;

    fn run_zero_day(source: &str) -> stratsim::domain::value::EvaluationState {
        let program = program(source, &["spy"]);
        let history = flat_history(&["spy"], 100.0, 0);
        let market = MarketContext::new(&history, &BlackScholesPricer, &TechnicalIndicators, 0.0);
        evaluate(&program, &market, &evaluator(0, 100_000.0))
            .unwrap()
            .final_state
    }

    #[test]
    fn oversized_long_is_rejected() {
        let state = run_zero_day("buy 5000 spy");
        assert!(state.transactions.is_empty());
        assert_eq!(state.portfolio.cash, 100_000.0);
    }

    #[test]
    fn oversized_short_is_rejected() {
        let state = run_zero_day("sell 2000 spy");
        assert!(state.transactions.is_empty());
        assert_eq!(state.portfolio.cash, 100_000.0);
    }

    #[test]
    fn modest_short_is_accepted() {
        let state = run_zero_day("sell 500 spy");
        assert!((total_quantity(&state) + 500.0).abs() < 1e-9);
        assert!((state.portfolio.cash - 150_000.0).abs() < 1e-6);
    }

    #[test]
    fn buying_power_never_negative_on_flat_paths() {
        let sim = sim_config(vec![gbm_asset("spy", 100.0), gbm_asset("qqq", 50.0)], 4, 5);
        let compiled = compiled(
            "buy_max spy\nsell 300 qqq\nbuy_max qqq\nsell 100 spy",
            &["spy", "qqq"],
        );
        let paths = FlatPaths::default();
        let outcome = default_engine(&paths).run(&compiled, &sim);
        assert_eq!(outcome.runs.len(), 4);

        let no_history = HashMap::new();
        let request = PathRequest {
            assets: &sim.assets,
            correlations: &sim.correlations,
            days: sim.trading_days,
            historical: &no_history,
        };
        let path = paths.generate(&request, 0).unwrap();
        let market = MarketContext::new(&path, &BlackScholesPricer, &TechnicalIndicators, 0.0);
        for run in &outcome.runs {
            let portfolio = &run.final_state.portfolio;
            assert!(!run.final_state.transactions.is_empty());
            assert!(portfolio.cash >= -1e-6);
            let bp = buying_power(portfolio, &market, sim.trading_days).unwrap();
            assert!(bp >= -1e-6, "run {}: buying power {}", run.run_id, bp);
        }
    }
}

mod compile_errors {
    use super::*;

    #[test]
    fn cyclic_definitions_are_rejected() {
        let err = compile("define a as: buy 1 b\ndefine b as: buy 1 a\nbuy 1 a", &["spy"]).unwrap_err();
        assert!(err.message().contains("Cyclic position definition detected"));
    }

    #[test]
    fn unknown_identifier_is_rejected() {
        let err = compile("buy 1 tsla", &["spy"]).unwrap_err();
        assert!(err.message().contains("tsla"));
    }

    #[test]
    fn simulation_rejects_uncompilable_source() {
        let sim = sim_config(vec![gbm_asset("spy", 100.0)], 1, 1);
        let paths = FlatPaths::default();
        assert!(default_engine(&paths).run_source("buy spy spy", &sim).is_err());
        assert_eq!(paths.calls.load(Ordering::Relaxed), 0);
    }
}

mod round_trip {
    use super::*;
    use proptest::prelude::*;

    fn statement() -> impl Strategy<Value = String> {
        prop_oneof![
            (1u32..500).prop_map(|n| format!("buy {} spy", n)),
            (1u32..500).prop_map(|n| format!("sell {} qqq", n)),
            (1u32..500, 1u32..200).prop_map(|(p, n)| format!(
                "when spy > ${}: buy {} spy end",
                p, n
            )),
            (2u32..60, 1u32..1000).prop_map(|(k, p)| format!(
                "when spy_sma_{} < spy or cash_available > ${}: sell_all spy end",
                k, p
            )),
            (1u32..100).prop_map(|pct| format!("rebalance_to {}% qqq", pct)),
            (1u32..9, 1u32..9).prop_map(|(a, b)| format!(
                "define n as {}\nset n to (n + {}) * - 2",
                a, b
            )),
            (1u32..99).prop_map(|d| format!(
                "define leg as: sell 1 spy_30dte_minus{}delta\nbuy_max leg",
                d
            )),
            (1u32..50).prop_map(|v| format!(
                "for_any_position spy as p: when p.value > ${}: sell_all p end end",
                v
            )),
        ]
    }

    fn source() -> impl Strategy<Value = String> {
        prop::collection::vec(statement(), 0..6).prop_map(|s| s.join("\n"))
    }

    proptest! {
        #[test]
        fn rendered_program_parses_back(source in source()) {
            let tickers = ["spy", "qqq"];
            let program = parse(lex(&tickers, &source).unwrap()).unwrap();
            let rendered = program.to_string();
            let reparsed = parse(lex(&tickers, &rendered).unwrap()).unwrap();
            prop_assert_eq!(reparsed, program);
        }

        #[test]
        fn elaboration_is_idempotent(source in source()) {
            let tickers = ["spy", "qqq"];
            let program = parse(lex(&tickers, &source).unwrap()).unwrap();
            if let Ok(elaborated) = elaborate(program) {
                prop_assert_eq!(elaborate(elaborated.clone()).unwrap(), elaborated);
            }
        }
    }
}
