//! Forced liquidation when a scheduled cash need exceeds available cash.
//!
//! Candidates are unpaired long lots and paired units (a short option
//! matched with the long lot that covers it, closed together as a spread).
//! They are consumed greedily, earliest expiry first and richest first
//! within an expiry, until the deficit is covered. Running out of
//! candidates is ruin: the portfolio is zeroed rather than left with
//! negative cash.

use std::cmp::Ordering;
use std::collections::HashMap;

use super::error::InterpreterError;
use super::execution::ExecutionCosts;
use super::market::MarketContext;
use super::portfolio::{Portfolio, QUANTITY_EPSILON, Side, Transaction};
use super::position::{OPTION_MULTIPLIER, PositionInstance, ResolvedInstrument};

pub const LIQUIDATION_TAG: &str = "LIQUIDATION";

#[derive(Debug, Clone)]
enum Candidate {
    /// `units` contracts of `short_id` closed against `long_id`.
    Pair {
        short_id: u64,
        long_id: u64,
        /// Long-leg quantity consumed per contract (100 shares or 1 contract).
        long_per_unit: f64,
        units: f64,
        /// Long unit value minus short buy-back cost, per contract.
        unit_net: f64,
        short_unit_value: f64,
        long_unit_value: f64,
        expiry: usize,
    },
    Free {
        lot_id: u64,
        quantity: f64,
        unit_value: f64,
        expiry: usize,
    },
}

impl Candidate {
    fn value(&self) -> f64 {
        match self {
            Candidate::Pair {
                units, unit_net, ..
            } => units * unit_net,
            Candidate::Free {
                quantity,
                unit_value,
                ..
            } => quantity * unit_value,
        }
    }

    fn expiry(&self) -> usize {
        match self {
            Candidate::Pair { expiry, .. } | Candidate::Free { expiry, .. } => *expiry,
        }
    }
}

fn is_share_lot_of(lot: &PositionInstance, short: &PositionInstance) -> bool {
    match (&lot.instrument, short.instrument.as_option()) {
        (ResolvedInstrument::Asset(asset), Some(option)) => asset == &option.underlying,
        _ => false,
    }
}

/// Whether long option `lot` covers short option `short` as a spread.
fn covers(lot: &PositionInstance, short: &PositionInstance) -> bool {
    let (Some(long), Some(sold)) = (lot.instrument.as_option(), short.instrument.as_option()) else {
        return false;
    };
    if long.underlying != sold.underlying || long.is_call != sold.is_call {
        return false;
    }
    if long.expiry_day < sold.expiry_day {
        return false;
    }
    if sold.is_call {
        long.strike <= sold.strike
    } else {
        long.strike >= sold.strike
    }
}

fn build_candidates(
    portfolio: &Portfolio,
    market: &MarketContext<'_>,
    day: usize,
) -> Result<Vec<Candidate>, InterpreterError> {
    let mut available: HashMap<u64, f64> = portfolio
        .positions
        .iter()
        .filter(|l| l.is_long())
        .map(|l| (l.id, l.quantity))
        .collect();
    let mut unit_values: HashMap<u64, f64> = HashMap::new();
    for lot in &portfolio.positions {
        unit_values.insert(lot.id, market.unit_value(&lot.instrument, day)?);
    }

    let mut candidates = Vec::new();
    let short_options = portfolio
        .positions
        .iter()
        .filter(|l| l.is_short() && l.instrument.as_option().is_some());
    for short in short_options {
        let Some(sold) = short.instrument.as_option() else {
            continue;
        };
        let mut remaining = short.quantity.abs();
        let short_unit_value = unit_values.get(&short.id).copied().unwrap_or(0.0);

        let partners = portfolio.positions.iter().filter(|lot| {
            lot.is_long() && ((sold.is_call && is_share_lot_of(lot, short)) || covers(lot, short))
        });
        for lot in partners {
            if remaining <= QUANTITY_EPSILON {
                break;
            }
            let long_per_unit = match lot.instrument {
                ResolvedInstrument::Asset(_) => OPTION_MULTIPLIER,
                ResolvedInstrument::Option(_) | ResolvedInstrument::Compound => 1.0,
            };
            let free = available.get(&lot.id).copied().unwrap_or(0.0);
            let units = remaining.min((free / long_per_unit).floor());
            if units < 1.0 {
                continue;
            }
            let long_unit_value = unit_values.get(&lot.id).copied().unwrap_or(0.0);
            available.insert(lot.id, free - units * long_per_unit);
            remaining -= units;
            candidates.push(Candidate::Pair {
                short_id: short.id,
                long_id: lot.id,
                long_per_unit,
                units,
                unit_net: long_unit_value * long_per_unit - short_unit_value,
                short_unit_value,
                long_unit_value,
                expiry: sold.expiry_day,
            });
        }
    }

    for lot in portfolio.positions.iter().filter(|l| l.is_long()) {
        let quantity = available.get(&lot.id).copied().unwrap_or(0.0);
        if quantity > QUANTITY_EPSILON {
            candidates.push(Candidate::Free {
                lot_id: lot.id,
                quantity,
                unit_value: unit_values.get(&lot.id).copied().unwrap_or(0.0),
                expiry: lot.instrument.expiry_day(),
            });
        }
    }

    candidates.retain(|c| c.value() > 0.0);
    candidates.sort_by(|a, b| {
        a.expiry()
            .cmp(&b.expiry())
            .then(b.value().partial_cmp(&a.value()).unwrap_or(Ordering::Equal))
    });
    Ok(candidates)
}

fn ticker_of(portfolio: &Portfolio, id: u64) -> String {
    portfolio
        .position(id)
        .map(|l| l.instrument.to_string())
        .unwrap_or_default()
}

/// Pay `required_cash`, liquidating holdings if cash alone cannot.
pub fn reconcile_cash(
    portfolio: Portfolio,
    required_cash: f64,
    market: &MarketContext<'_>,
    costs: &ExecutionCosts,
    day: usize,
) -> Result<(Portfolio, Vec<Transaction>), InterpreterError> {
    let mut portfolio = portfolio;
    let mut deficit = required_cash - portfolio.cash;
    if deficit <= 0.0 {
        portfolio.cash -= required_cash;
        return Ok((portfolio, Vec::new()));
    }

    let half_spread = costs.slippage.default_spread / 2.0;
    let mut reductions: Vec<(u64, f64)> = Vec::new();
    let mut transactions = Vec::new();
    let mut proceeds = 0.0;

    for candidate in build_candidates(&portfolio, market, day)? {
        if deficit <= 0.0 {
            break;
        }
        match candidate {
            Candidate::Pair {
                short_id,
                long_id,
                long_per_unit,
                units,
                unit_net,
                short_unit_value,
                long_unit_value,
                ..
            } => {
                let units = units.min((deficit / unit_net).ceil());
                let commission = costs.commission(units) + costs.commission(units);
                let slippage = unit_net * units * half_spread;
                let net = unit_net * units - commission - slippage;
                deficit -= net;
                proceeds += net;
                reductions.push((short_id, units));
                reductions.push((long_id, -units * long_per_unit));
                transactions.push(Transaction {
                    day,
                    ticker: ticker_of(&portfolio, short_id),
                    side: Side::Buy,
                    quantity: units,
                    price: short_unit_value / OPTION_MULTIPLIER,
                    notional: short_unit_value * units,
                    commission: costs.commission(units),
                    slippage: 0.0,
                    tag: LIQUIDATION_TAG.to_string(),
                });
                transactions.push(Transaction {
                    day,
                    ticker: ticker_of(&portfolio, long_id),
                    side: Side::Sell,
                    quantity: units * long_per_unit,
                    price: long_unit_value,
                    notional: long_unit_value * units * long_per_unit,
                    commission: costs.commission(units),
                    slippage,
                    tag: LIQUIDATION_TAG.to_string(),
                });
            }
            Candidate::Free {
                lot_id,
                quantity,
                unit_value,
                ..
            } => {
                let quantity = quantity.min((deficit / unit_value).ceil());
                let commission = costs.commission(quantity);
                let slippage = unit_value * quantity * half_spread;
                let net = unit_value * quantity - commission - slippage;
                deficit -= net;
                proceeds += net;
                reductions.push((lot_id, -quantity));
                let multiplier = portfolio
                    .position(lot_id)
                    .map(|l| l.instrument.multiplier())
                    .unwrap_or(1.0);
                transactions.push(Transaction {
                    day,
                    ticker: ticker_of(&portfolio, lot_id),
                    side: Side::Sell,
                    quantity,
                    price: unit_value / multiplier,
                    notional: unit_value * quantity,
                    commission,
                    slippage,
                    tag: LIQUIDATION_TAG.to_string(),
                });
            }
        }
    }

    if deficit > QUANTITY_EPSILON {
        tracing::debug!(day, deficit, required_cash, "liquidation exhausted, portfolio ruined");
        return Ok((portfolio.liquidated(), Vec::new()));
    }

    for (id, delta) in reductions {
        if let Some(lot) = portfolio.positions.iter_mut().find(|l| l.id == id) {
            lot.quantity += delta;
        }
    }
    portfolio.prune();
    portfolio.cash = portfolio.cash + proceeds - required_cash;
    Ok((portfolio, transactions))
}
