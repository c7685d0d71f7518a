//! Trade execution and fill simulation.
//!
//! Applies primitive trades to a portfolio: buys cover shorts oldest-first
//! before opening a long lot, sells consume longs oldest-first before
//! opening a short lot, and rebalances are re-dispatched as a buy or sell.

use std::collections::BTreeMap;

use super::error::InterpreterError;
use super::market::MarketContext;
use super::portfolio::{CompositeMetadata, Portfolio, QUANTITY_EPSILON, Side, Transaction};
use super::position::{PositionInstance, ResolvedInstrument};

/// Definition name recorded on short lots opened without one.
pub const SHORT_TAG: &str = "SHORT";
pub const REBALANCE_TAG: &str = "REBALANCE";

/// Bid/ask spread applied when volatility falls in `[min_vol, max_vol)`.
#[derive(Debug, Clone, PartialEq)]
pub struct SlippageTier {
    pub min_vol: f64,
    pub max_vol: f64,
    pub spread: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SlippageModel {
    pub default_spread: f64,
    pub tiers: Vec<SlippageTier>,
}

impl SlippageModel {
    pub fn spread_for(&self, volatility: f64) -> f64 {
        self.tiers
            .iter()
            .find(|t| volatility >= t.min_vol && volatility < t.max_vol)
            .map(|t| t.spread)
            .unwrap_or(self.default_spread)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExecutionCosts {
    pub commission_per_order: f64,
    pub commission_per_unit: f64,
    pub slippage: SlippageModel,
}

impl ExecutionCosts {
    /// No commission and no spread; used for risk what-ifs.
    pub fn zero() -> Self {
        Self::default()
    }

    /// Commission: per_order + per_unit * |quantity|.
    pub fn commission(&self, quantity: f64) -> f64 {
        self.commission_per_order + self.commission_per_unit * quantity.abs()
    }
}

/// A buy or sell request for one resolved instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeOrder {
    pub instrument: ResolvedInstrument,
    pub quantity: f64,
    pub definition_name: Option<String>,
    pub component_name: Option<String>,
    /// Lot to close first (instance targets).
    pub target_lot: Option<u64>,
}

impl TradeOrder {
    pub fn new(instrument: ResolvedInstrument, quantity: f64) -> Self {
        Self {
            instrument,
            quantity,
            definition_name: None,
            component_name: None,
            target_lot: None,
        }
    }

    pub fn named(mut self, definition_name: Option<String>, component_name: Option<String>) -> Self {
        self.definition_name = definition_name;
        self.component_name = component_name;
        self
    }

    pub fn closing(mut self, lot_id: u64) -> Self {
        self.target_lot = Some(lot_id);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PrimitiveTrade {
    Buy(TradeOrder),
    Sell(TradeOrder),
    /// Move the instrument to `target_percent` (face value) of total value.
    Rebalance {
        instrument: ResolvedInstrument,
        target_percent: f64,
    },
}

impl PrimitiveTrade {
    pub fn definition_name(&self) -> Option<&str> {
        match self {
            PrimitiveTrade::Buy(o) | PrimitiveTrade::Sell(o) => o.definition_name.as_deref(),
            PrimitiveTrade::Rebalance { .. } => None,
        }
    }

    pub fn instrument(&self) -> &ResolvedInstrument {
        match self {
            PrimitiveTrade::Buy(o) | PrimitiveTrade::Sell(o) => &o.instrument,
            PrimitiveTrade::Rebalance { instrument, .. } => instrument,
        }
    }
}

/// Batch-group state for one `execute_trades` call.
struct Batch {
    groups: BTreeMap<String, u64>,
    heads: BTreeMap<u64, u64>,
}

fn fill_price(mid: f64, spread: f64, side: Side) -> f64 {
    match side {
        Side::Buy => mid * (1.0 + spread / 2.0),
        Side::Sell => mid * (1.0 - spread / 2.0),
    }
}

/// Reduce lots of `instrument` on the opposite side of `side`, oldest first
/// (after `target_lot`). Returns the quantity left over.
fn offset_lots(
    portfolio: &mut Portfolio,
    instrument: &ResolvedInstrument,
    side: Side,
    quantity: f64,
    target_lot: Option<u64>,
) -> f64 {
    let opposite = |lot: &PositionInstance| match side {
        Side::Buy => lot.is_short(),
        Side::Sell => lot.is_long(),
    };
    let mut order: Vec<usize> = portfolio
        .positions
        .iter()
        .enumerate()
        .filter(|(_, lot)| &lot.instrument == instrument && opposite(lot))
        .map(|(i, _)| i)
        .collect();
    order.sort_by_key(|&i| {
        let lot = &portfolio.positions[i];
        (Some(lot.id) != target_lot, lot.buy_date, lot.id)
    });

    let mut remaining = quantity;
    for i in order {
        if remaining <= QUANTITY_EPSILON {
            break;
        }
        let lot = &mut portfolio.positions[i];
        let take = remaining.min(lot.quantity.abs());
        match side {
            Side::Buy => lot.quantity += take,
            Side::Sell => lot.quantity -= take,
        }
        remaining -= take;
    }
    remaining.max(0.0)
}

fn execute_order(
    portfolio: &mut Portfolio,
    batch: &mut Batch,
    order: &TradeOrder,
    side: Side,
    market: &MarketContext<'_>,
    costs: &ExecutionCosts,
    day: usize,
) -> Result<Option<Transaction>, InterpreterError> {
    let quantity = order.quantity.abs();
    if quantity <= QUANTITY_EPSILON {
        return Ok(None);
    }

    let mid = market.unit_price(&order.instrument, day)?;
    let spread = costs
        .slippage
        .spread_for(market.volatility(&order.instrument, day)?);
    let price = fill_price(mid, spread, side);
    let multiplier = order.instrument.multiplier();
    let notional = price * quantity * multiplier;
    let commission = costs.commission(quantity);

    let remainder = offset_lots(portfolio, &order.instrument, side, quantity, order.target_lot);
    if remainder > QUANTITY_EPSILON {
        let definition_name = order.definition_name.clone().unwrap_or_else(|| match side {
            Side::Buy => String::new(),
            Side::Sell => SHORT_TAG.to_string(),
        });
        let group_id = order
            .definition_name
            .as_ref()
            .and_then(|name| batch.groups.get(name).copied());
        let id = portfolio.allocate_id();
        let parent_id = match group_id {
            Some(g) => match batch.heads.get(&g) {
                Some(&head) => Some(head),
                None => {
                    batch.heads.insert(g, id);
                    None
                }
            },
            None => None,
        };
        if let Some(g) = group_id {
            let entry = portfolio
                .composite_registry
                .entry(g)
                .or_insert_with(|| CompositeMetadata {
                    group_id: g,
                    definition_name: definition_name.clone(),
                    buy_date: day,
                    initial_quantity: remainder,
                    legs: Vec::new(),
                });
            entry.legs.push(id);
        }
        portfolio.positions.push(PositionInstance {
            id,
            group_id,
            definition_name,
            component_name: order.component_name.clone(),
            parent_id,
            buy_price: price,
            buy_date: day,
            quantity: match side {
                Side::Buy => remainder,
                Side::Sell => -remainder,
            },
            instrument: order.instrument.clone(),
        });
    }

    match side {
        Side::Buy => portfolio.cash -= notional + commission,
        Side::Sell => portfolio.cash += notional - commission,
    }

    Ok(Some(Transaction {
        day,
        ticker: order.instrument.to_string(),
        side,
        quantity,
        price,
        notional,
        commission,
        slippage: (price - mid).abs() * quantity * multiplier,
        tag: order.definition_name.clone().unwrap_or_default(),
    }))
}

/// Apply `trades` in order, returning the new portfolio and the fills.
///
/// Trades sharing a definition name within one call share a fresh batch
/// group id; zero-quantity trades are skipped and not recorded.
pub fn execute_trades(
    trades: &[PrimitiveTrade],
    portfolio: Portfolio,
    market: &MarketContext<'_>,
    costs: &ExecutionCosts,
    day: usize,
) -> Result<(Portfolio, Vec<Transaction>), InterpreterError> {
    let mut portfolio = portfolio;
    let mut batch = Batch {
        groups: BTreeMap::new(),
        heads: BTreeMap::new(),
    };
    for name in trades.iter().filter_map(PrimitiveTrade::definition_name) {
        if !name.is_empty() && !batch.groups.contains_key(name) {
            let group_id = portfolio.allocate_id();
            batch.groups.insert(name.to_string(), group_id);
        }
    }

    let mut transactions = Vec::new();
    for trade in trades {
        let fill = match trade {
            PrimitiveTrade::Buy(order) => {
                execute_order(&mut portfolio, &mut batch, order, Side::Buy, market, costs, day)?
            }
            PrimitiveTrade::Sell(order) => {
                execute_order(&mut portfolio, &mut batch, order, Side::Sell, market, costs, day)?
            }
            PrimitiveTrade::Rebalance {
                instrument,
                target_percent,
            } => {
                let total = market.portfolio_value(&portfolio, day)?;
                let unit_value = market.unit_value(instrument, day)?;
                if unit_value == 0.0 {
                    None
                } else {
                    let current = portfolio.holding(instrument) * unit_value;
                    let diff = total * target_percent / 100.0 - current;
                    let order = TradeOrder::new(instrument.clone(), diff.abs() / unit_value)
                        .named(Some(REBALANCE_TAG.to_string()), None);
                    let side = if diff > 0.0 { Side::Buy } else { Side::Sell };
                    execute_order(&mut portfolio, &mut batch, &order, side, market, costs, day)?
                }
            }
        };
        transactions.extend(fill);
    }

    portfolio.prune();
    Ok((portfolio, transactions))
}
