//! Tree-walking interpreter for one trading day.
//!
//! `interpret_step` runs every statement of the program against the
//! evaluation state. Actions expand into primitive trades, pass through
//! risk validation as one set, and are either committed in full or
//! discarded for the day.

use std::collections::HashMap;

use tracing::debug;

use super::ast::{
    Action, Condition, DefinitionValue, Expression, Instrument, Literal, LogicalOp, PortfolioQuery,
    PositionComponent, PositionExpression, Program, Quantity, Statement, Target,
};
use super::error::{InterpreterError, RiskValidationError};
use super::execution::{ExecutionCosts, PrimitiveTrade, TradeOrder, execute_trades};
use super::market::MarketContext;
use super::portfolio::QUANTITY_EPSILON;
use super::position::{PositionInstance, ResolvedInstrument};
use super::risk::{analyze_and_plan_rebalance, calculate_max_quantity, validate_trades};
use super::value::{EvaluationState, Value};

/// Run `program` once for `state.current_day`.
pub fn interpret_step(
    program: &Program,
    state: EvaluationState,
    market: &MarketContext<'_>,
    costs: &ExecutionCosts,
) -> Result<EvaluationState, InterpreterError> {
    let interpreter = Interpreter { market, costs };
    interpreter.run_block(&program.statements, state)
}

struct Interpreter<'m, 'a> {
    market: &'m MarketContext<'a>,
    costs: &'m ExecutionCosts,
}

fn closing_trade(lot: &PositionInstance, quantity: f64) -> PrimitiveTrade {
    let order = TradeOrder::new(lot.instrument.clone(), quantity).closing(lot.id);
    if lot.is_long() {
        PrimitiveTrade::Sell(order)
    } else {
        PrimitiveTrade::Buy(order)
    }
}

/// The lot itself (current state if still held) and its child legs.
fn instance_members(lot: &PositionInstance, state: &EvaluationState) -> Vec<PositionInstance> {
    let mut members: Vec<PositionInstance> = state
        .portfolio
        .position(lot.id)
        .cloned()
        .into_iter()
        .collect();
    members.extend(
        state
            .portfolio
            .positions
            .iter()
            .filter(|l| l.parent_id == Some(lot.id))
            .cloned(),
    );
    members
}

impl Interpreter<'_, '_> {
    fn run_block(&self, block: &[Statement], state: EvaluationState) -> Result<EvaluationState, InterpreterError> {
        block
            .iter()
            .try_fold(state, |state, stmt| self.execute(stmt, state))
    }

    fn run_scoped(
        &self,
        block: &[Statement],
        state: EvaluationState,
        bindings: HashMap<String, Value>,
    ) -> Result<EvaluationState, InterpreterError> {
        let state = self.run_block(block, state.push_scope(bindings))?;
        Ok(state.pop_scope())
    }

    fn execute(&self, stmt: &Statement, state: EvaluationState) -> Result<EvaluationState, InterpreterError> {
        match stmt {
            Statement::Define { name, value } => {
                if state.at_top_level() && state.globals.contains_key(name) {
                    return Ok(state);
                }
                let value = match value {
                    DefinitionValue::Expression(expr) => self.evaluate(expr, &state)?,
                    DefinitionValue::Position(expression) => Value::Position {
                        name: name.clone(),
                        expression: expression.clone(),
                    },
                };
                Ok(state.define(name, value))
            }
            Statement::Set { name, value } => {
                let value = self.evaluate(value, &state)?;
                state.assign(name, value)
            }
            Statement::Action(action) => {
                let trades = self.action_trades(action, &state)?;
                self.commit(action, trades, state)
            }
            Statement::When { condition, block } => {
                if self.condition(condition, &state)? {
                    self.run_scoped(block, state, HashMap::new())
                } else {
                    Ok(state)
                }
            }
            Statement::ForAnyPosition {
                position_type,
                variable,
                block,
            } => {
                // snapshot: lots opened inside the loop are not visited today
                let roots = self.matching_roots(position_type, &state)?;
                roots.into_iter().try_fold(state, |state, lot| {
                    let bindings = HashMap::from([(variable.clone(), Value::Instance(Box::new(lot)))]);
                    self.run_scoped(block, state, bindings)
                })
            }
        }
    }

    fn matching_roots(&self, target: &Target, state: &EvaluationState) -> Result<Vec<PositionInstance>, InterpreterError> {
        match target {
            Target::Asset(asset) => {
                let instrument = ResolvedInstrument::Asset(asset.clone());
                Ok(state
                    .portfolio
                    .positions
                    .iter()
                    .filter(|lot| lot.parent_id.is_none() && lot.instrument == instrument)
                    .cloned()
                    .collect())
            }
            Target::Identifier(name) => match self.lookup(name, state)? {
                Value::Position { name: definition, .. } => Ok(state.portfolio.definition_roots(definition)),
                other => Err(InterpreterError::new(format!(
                    "'{}' is a {}, not a position definition.",
                    name,
                    other.type_name()
                ))),
            },
        }
    }

    fn lookup<'s>(&self, name: &str, state: &'s EvaluationState) -> Result<&'s Value, InterpreterError> {
        state
            .lookup(name)
            .ok_or_else(|| InterpreterError::new(format!("Unbound identifier '{}'.", name)))
    }

    // ---- expressions ------------------------------------------------------

    fn evaluate(&self, expr: &Expression, state: &EvaluationState) -> Result<Value, InterpreterError> {
        let day = state.current_day;
        match expr {
            Expression::Literal(Literal::Number(n)) => Ok(Value::Float(*n)),
            Expression::Literal(Literal::Percent(p)) => Ok(Value::Percent(*p)),
            Expression::Literal(Literal::Dollar(d)) => Ok(Value::Dollar(*d)),
            Expression::Literal(Literal::Bool(b)) => Ok(Value::Bool(*b)),
            Expression::Identifier(name) => self.lookup(name, state).cloned(),
            Expression::Asset(asset) => Ok(Value::Dollar(self.market.point(asset, day)?.price)),
            Expression::Option(spec) => Err(InterpreterError::new(format!(
                "Option leg '{}' can only be traded inside a position definition.",
                spec
            ))),
            Expression::PropertyAccess(inner, property) => match self.evaluate(inner, state)? {
                Value::Instance(lot) => self.property(&lot, property, state),
                other => Err(InterpreterError::new(format!(
                    "Invalid property '{}' on a value of type {}.",
                    property,
                    other.type_name()
                ))),
            },
            Expression::Indicator(spec) => Ok(Value::Float(self.market.indicator(spec, day)?)),
            Expression::Query(query) => self.query(query, state),
            Expression::Arithmetic(op, left, right) => {
                let left = self.evaluate(left, state)?;
                let right = self.evaluate(right, state)?;
                Value::arithmetic(*op, left, right)
            }
            Expression::UnaryMinus(inner) => self.evaluate(inner, state)?.negate(),
            Expression::Paren(inner) => self.evaluate(inner, state),
        }
    }

    fn property(&self, lot: &PositionInstance, property: &str, state: &EvaluationState) -> Result<Value, InterpreterError> {
        let day = state.current_day;
        let lot = state.portfolio.position(lot.id).unwrap_or(lot);
        let value = match property {
            "quantity" => Value::Float(lot.quantity),
            "buy_price" => Value::Dollar(lot.buy_price),
            "buy_date" => Value::Float(lot.buy_date as f64),
            "price" => Value::Dollar(self.market.unit_price(&lot.instrument, day)?),
            "value" => Value::Dollar(self.market.lot_value(lot, day)?),
            "dte" => Value::Float(
                lot.instrument
                    .as_option()
                    .map(|o| o.days_to_expiry(day) as f64)
                    .unwrap_or(0.0),
            ),
            "delta" | "gamma" | "theta" | "vega" | "rho" => {
                let greeks = self.market.greeks(&lot.instrument, day)?;
                Value::Float(match property {
                    "delta" => greeks.delta,
                    "gamma" => greeks.gamma,
                    "theta" => greeks.theta,
                    "vega" => greeks.vega,
                    _ => greeks.rho,
                })
            }
            leg => {
                let found = state.portfolio.positions.iter().find(|l| {
                    l.component_name.as_deref() == Some(leg)
                        && (l.parent_id == Some(lot.id) || (lot.group_id.is_some() && l.group_id == lot.group_id))
                });
                match found {
                    Some(l) => Value::Instance(Box::new(l.clone())),
                    None => {
                        return Err(InterpreterError::new(format!(
                            "Invalid property '{}' on position '{}'.",
                            leg, lot.definition_name
                        )));
                    }
                }
            }
        };
        Ok(value)
    }

    fn query(&self, query: &PortfolioQuery, state: &EvaluationState) -> Result<Value, InterpreterError> {
        let day = state.current_day;
        let portfolio = &state.portfolio;
        match query {
            PortfolioQuery::CashAvailable => Ok(Value::Dollar(portfolio.cash)),
            PortfolioQuery::PortfolioValue => Ok(Value::Dollar(self.market.portfolio_value(portfolio, day)?)),
            PortfolioQuery::PositionQuantity(target) => {
                let quantity = match self.target_lots(target, state)? {
                    TargetLots::Asset(instrument) => portfolio.holding(&instrument),
                    TargetLots::Definition(name) => portfolio
                        .definition_roots(&name)
                        .iter()
                        .map(|lot| lot.quantity)
                        .sum(),
                    TargetLots::Instance(lot) => portfolio.position(lot.id).map(|l| l.quantity).unwrap_or(0.0),
                };
                Ok(Value::Float(quantity))
            }
            PortfolioQuery::PositionValue(target) => {
                let lots: Vec<PositionInstance> = match self.target_lots(target, state)? {
                    TargetLots::Asset(instrument) => portfolio.lots_of(&instrument).cloned().collect(),
                    TargetLots::Definition(name) => portfolio
                        .positions
                        .iter()
                        .filter(|lot| lot.definition_name == name)
                        .cloned()
                        .collect(),
                    TargetLots::Instance(lot) => instance_members(&lot, state),
                };
                let value = lots
                    .iter()
                    .map(|lot| self.market.lot_value(lot, day))
                    .sum::<Result<f64, _>>()?;
                Ok(Value::Dollar(value))
            }
        }
    }

    fn target_lots(&self, target: &Target, state: &EvaluationState) -> Result<TargetLots, InterpreterError> {
        match target {
            Target::Asset(asset) => Ok(TargetLots::Asset(ResolvedInstrument::Asset(asset.clone()))),
            Target::Identifier(name) => match self.lookup(name, state)? {
                Value::Position { name, .. } => Ok(TargetLots::Definition(name.clone())),
                Value::Instance(lot) => Ok(TargetLots::Instance(lot.as_ref().clone())),
                other => Err(InterpreterError::new(format!(
                    "'{}' is a {}, not a position.",
                    name,
                    other.type_name()
                ))),
            },
        }
    }

    fn condition(&self, condition: &Condition, state: &EvaluationState) -> Result<bool, InterpreterError> {
        match condition {
            Condition::Comparison(left, op, right) => {
                let left = self.evaluate(left, state)?;
                let right = self.evaluate(right, state)?;
                Value::compare(*op, &left, &right)
            }
            Condition::Logical(LogicalOp::And, left, right) => {
                Ok(self.condition(left, state)? && self.condition(right, state)?)
            }
            Condition::Logical(LogicalOp::Or, left, right) => {
                Ok(self.condition(left, state)? || self.condition(right, state)?)
            }
            Condition::Not(inner) => Ok(!self.condition(inner, state)?),
            Condition::Paren(inner) => self.condition(inner, state),
            Condition::BooleanExpr(expr) => match self.evaluate(expr, state)? {
                Value::Bool(b) => Ok(b),
                other => Err(InterpreterError::new(format!(
                    "Condition must be a Bool, found {}.",
                    other.type_name()
                ))),
            },
        }
    }

    fn quantity(&self, quantity: &Quantity, state: &EvaluationState) -> Result<f64, InterpreterError> {
        let value = match quantity {
            Quantity::Literal(Literal::Number(n)) => return Ok(*n),
            Quantity::Literal(other) => {
                return Err(InterpreterError::new(format!(
                    "Trade quantity must be a plain number, found '{}'.",
                    other
                )));
            }
            Quantity::Identifier(name) => self.lookup(name, state)?.clone(),
            Quantity::Expression(expr) => self.evaluate(expr, state)?,
        };
        match value {
            Value::Float(n) => Ok(n),
            other => Err(InterpreterError::new(format!(
                "Trade quantity must be a plain number, found {}.",
                other.type_name()
            ))),
        }
    }

    // ---- actions ----------------------------------------------------------

    fn action_trades(&self, action: &Action, state: &EvaluationState) -> Result<Vec<PrimitiveTrade>, InterpreterError> {
        let day = state.current_day;
        match action {
            Action::Buy(quantity, target) => {
                let n = self.quantity(quantity, state)?;
                self.target_trades(target, n, true, state)
            }
            Action::Sell(quantity, target) => {
                let n = self.quantity(quantity, state)?;
                self.target_trades(target, n, false, state)
            }
            Action::BuyMax(target) => {
                let unit = self.target_trades(target, 1.0, true, state)?;
                if unit.is_empty() {
                    return Ok(unit);
                }
                let n = calculate_max_quantity(&unit, &state.portfolio, self.market, day)?;
                if n < 1.0 {
                    return Ok(Vec::new());
                }
                self.target_trades(target, n, true, state)
            }
            Action::SellAll(target) => {
                let lots: Vec<PositionInstance> = match self.target_lots(target, state)? {
                    TargetLots::Asset(instrument) => state.portfolio.lots_of(&instrument).cloned().collect(),
                    TargetLots::Definition(name) => state
                        .portfolio
                        .positions
                        .iter()
                        .filter(|lot| lot.definition_name == name)
                        .cloned()
                        .collect(),
                    TargetLots::Instance(lot) => instance_members(&lot, state),
                };
                Ok(lots
                    .iter()
                    .filter(|lot| lot.quantity.abs() > QUANTITY_EPSILON)
                    .map(|lot| closing_trade(lot, lot.quantity.abs()))
                    .collect())
            }
            Action::RebalanceTo(percent, target) => {
                let Target::Asset(asset) = target else {
                    return Err(InterpreterError::new("rebalance_to only applies to simple assets."));
                };
                let instrument = ResolvedInstrument::Asset(asset.clone());
                let plan = analyze_and_plan_rebalance(&instrument, *percent, &state.portfolio, self.market, day)?;
                if !plan.is_achievable {
                    debug!(day, target = %asset, reason = plan.reason.as_deref().unwrap_or(""), "rebalance skipped");
                    return Ok(Vec::new());
                }
                let mut trades = plan.preparatory_trades;
                trades.push(PrimitiveTrade::Rebalance {
                    instrument,
                    target_percent: *percent,
                });
                Ok(trades)
            }
        }
    }

    /// Trades for `n` units of `target`, bought or sold.
    fn target_trades(
        &self,
        target: &Target,
        n: f64,
        buying: bool,
        state: &EvaluationState,
    ) -> Result<Vec<PrimitiveTrade>, InterpreterError> {
        match target {
            Target::Asset(asset) => Ok(vec![leg_trade(
                ResolvedInstrument::Asset(asset.clone()),
                n,
                buying,
                None,
                None,
            )]),
            Target::Identifier(name) => match self.lookup(name, state)? {
                Value::Position { name, expression } => {
                    self.expand(expression, n, buying, name, None, state)
                }
                Value::Instance(lot) if buying => Ok(vec![leg_trade(lot.instrument.clone(), n, true, None, None)]),
                Value::Instance(lot) => {
                    // sell `n` units of the instance, its legs in proportion
                    let members = instance_members(lot, state);
                    let Some(unit) = members.first().map(|root| root.quantity.abs()) else {
                        return Ok(Vec::new());
                    };
                    if unit <= QUANTITY_EPSILON {
                        return Ok(Vec::new());
                    }
                    let fraction = (n / unit).min(1.0);
                    Ok(members
                        .iter()
                        .map(|member| closing_trade(member, member.quantity.abs() * fraction))
                        .collect())
                }
                other => Err(InterpreterError::new(format!(
                    "Cannot trade '{}': a {} is not an asset, position or instance.",
                    name,
                    other.type_name()
                ))),
            },
        }
    }

    fn definition(&self, name: &str, state: &EvaluationState) -> Result<PositionExpression, InterpreterError> {
        match self.lookup(name, state)? {
            Value::Position { expression, .. } => Ok(expression.clone()),
            other => Err(InterpreterError::new(format!(
                "'{}' is a {}, not a position definition.",
                name,
                other.type_name()
            ))),
        }
    }

    /// Expand a position expression into one trade per leg. A sell component
    /// inverts the outer direction; nested references keep the name of the
    /// outermost referenced position as the component name.
    fn expand(
        &self,
        expression: &PositionExpression,
        multiplier: f64,
        buying: bool,
        definition: &str,
        component: Option<&str>,
        state: &EvaluationState,
    ) -> Result<Vec<PrimitiveTrade>, InterpreterError> {
        match expression {
            PositionExpression::Compound(left, right) => {
                let mut trades = self.expand(left, multiplier, buying, definition, component, state)?;
                trades.extend(self.expand(right, multiplier, buying, definition, component, state)?);
                Ok(trades)
            }
            PositionExpression::Reference(name) => {
                let inner = self.definition(name, state)?;
                self.expand(&inner, multiplier, buying, definition, component.or(Some(name)), state)
            }
            PositionExpression::Component(leg) => {
                let quantity = self.quantity(leg.quantity(), state)? * multiplier;
                let leg_buys = matches!(leg, PositionComponent::Buy(..)) == buying;
                let instrument = match leg.instrument() {
                    Instrument::Asset(asset) => ResolvedInstrument::Asset(asset.clone()),
                    Instrument::Option(spec) => {
                        ResolvedInstrument::Option(self.market.resolve_option(spec, state.current_day)?)
                    }
                    Instrument::Position(name) => {
                        let inner = self.definition(name, state)?;
                        return self.expand(&inner, quantity, leg_buys, definition, component.or(Some(name)), state);
                    }
                };
                Ok(vec![leg_trade(
                    instrument,
                    quantity,
                    leg_buys,
                    Some(definition),
                    component,
                )])
            }
        }
    }

    fn commit(
        &self,
        action: &Action,
        trades: Vec<PrimitiveTrade>,
        state: EvaluationState,
    ) -> Result<EvaluationState, InterpreterError> {
        if trades.is_empty() {
            return Ok(state);
        }
        let day = state.current_day;
        match validate_trades(&trades, &state.portfolio, self.market, day) {
            Ok(()) => {
                let mut state = state;
                let (portfolio, transactions) =
                    execute_trades(&trades, state.portfolio, self.market, self.costs, day)?;
                state.portfolio = portfolio;
                state.transactions.extend(transactions);
                Ok(state)
            }
            Err(RiskValidationError::InsufficientBuyingPower { buying_power }) => {
                debug!(day, buying_power, action = %action, "trade set rejected");
                Ok(state)
            }
            Err(RiskValidationError::Market(e)) => Err(e),
        }
    }
}

enum TargetLots {
    Asset(ResolvedInstrument),
    Definition(String),
    Instance(PositionInstance),
}

fn leg_trade(
    instrument: ResolvedInstrument,
    quantity: f64,
    buying: bool,
    definition: Option<&str>,
    component: Option<&str>,
) -> PrimitiveTrade {
    let (buying, quantity) = if quantity < 0.0 {
        (!buying, -quantity)
    } else {
        (buying, quantity)
    };
    let order = TradeOrder::new(instrument, quantity)
        .named(definition.map(str::to_string), component.map(str::to_string));
    if buying {
        PrimitiveTrade::Buy(order)
    } else {
        PrimitiveTrade::Sell(order)
    }
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
    use approx::assert_relative_eq;

    fn compile(source: &str) -> Program {
        let tokens = lex(&["spy", "qqq"], source).unwrap();
        elaborate(parse(tokens).unwrap()).unwrap()
    }

    fn flat(price: f64) -> Vec<MarketDataPoint> {
        vec![
            MarketDataPoint {
                price,
                volatility: 0.2
            };
            60
        ]
    }

    fn step_on(program: &Program, state: EvaluationState, day: usize) -> Result<EvaluationState, InterpreterError> {
        let history = PriceHistory::new()
            .with_series("spy", flat(100.0))
            .with_series("qqq", flat(50.0));
        let market = MarketContext::new(&history, &BlackScholesPricer, &TechnicalIndicators, 0.0);
        let mut state = state;
        state.current_day = day;
        interpret_step(program, state, &market, &ExecutionCosts::zero())
    }

    fn run(source: &str, cash: f64) -> EvaluationState {
        step_on(&compile(source), EvaluationState::new(cash, 0.0), 0).unwrap()
    }

    fn holding(state: &EvaluationState, ticker: &str) -> f64 {
        state
            .portfolio
            .holding(&ResolvedInstrument::Asset(AssetReference::Simple(ticker.into())))
    }

    #[test]
    fn false_condition_skips_trade() {
        let state = run("when cash_available > $1000: buy 1 spy end", 500.0);
        assert!(state.portfolio.positions.is_empty());
        assert!(state.transactions.is_empty());
    }

    #[test]
    fn buy_then_buy_max_spends_cash() {
        let state = run("define x as: buy 1 spy\nbuy 1 x\nbuy_max x", 100_000.0);
        assert_relative_eq!(holding(&state, "spy"), 1000.0);
        assert!(state.portfolio.cash.abs() < 100.0);
        assert_eq!(state.transactions.len(), 2);
        assert_relative_eq!(state.transactions[1].quantity, 999.0);
    }

    #[test]
    fn selling_a_position_inverts_every_leg() {
        let state = run("define pair as: buy 1 spy and sell 2 qqq\nsell 1 pair", 10_000.0);
        assert_relative_eq!(holding(&state, "spy"), -1.0);
        assert_relative_eq!(holding(&state, "qqq"), 2.0);
    }

    #[test]
    fn position_legs_share_a_group() {
        let state = run("define cc as: buy 100 spy and sell 1 spy_30dte_30delta\nbuy 1 cc", 100_000.0);
        let lots = &state.portfolio.positions;
        assert_eq!(lots.len(), 2);
        assert_eq!(lots[0].group_id, lots[1].group_id);
        assert_eq!(lots[1].parent_id, Some(lots[0].id));
        assert!(lots[1].instrument.as_option().is_some_and(|o| o.is_call && o.strike > 100.0));
        assert_relative_eq!(lots[1].quantity, -1.0);
        assert!(state.portfolio.cash > 90_000.0);
    }

    #[test]
    fn rejected_trade_set_is_discarded_and_day_continues() {
        let state = run("buy 5 spy\nbuy 100 spy\nbuy 1 qqq", 1_000.0);
        assert_relative_eq!(holding(&state, "spy"), 5.0);
        assert_relative_eq!(holding(&state, "qqq"), 1.0);
        assert_relative_eq!(state.portfolio.cash, 450.0);
    }

    #[test]
    fn rejected_composite_leaves_no_partial_legs() {
        let state = run("define big as: buy 1 qqq and buy 50 spy\nbuy 1 big", 1_000.0);
        assert!(state.portfolio.positions.is_empty());
        assert_relative_eq!(state.portfolio.cash, 1_000.0);
    }

    #[test]
    fn globals_persist_across_days() {
        let program = compile("define counter as 0\nset counter to counter + 1");
        let state = step_on(&program, EvaluationState::new(0.0, 0.0), 0).unwrap();
        let state = step_on(&program, state, 1).unwrap();
        assert_eq!(state.globals.get("counter"), Some(&Value::Float(2.0)));
    }

    #[test]
    fn block_locals_are_discarded() {
        let state = run("when true: define tmp as 1 end", 0.0);
        assert!(state.scopes.is_empty());
        assert!(!state.globals.contains_key("tmp"));
    }

    #[test]
    fn division_by_zero_is_fatal() {
        let program = compile("define x as 1 / 0");
        let err = step_on(&program, EvaluationState::new(0.0, 0.0), 0).unwrap_err();
        assert_eq!(err.message, "Division by zero.");
    }

    #[test]
    fn for_any_position_visits_snapshot() {
        let source = "define p as: buy 10 spy
buy 1 p
buy 1 p
for_any_position p as lot:
  when lot.quantity > 5:
    sell 10 lot
    buy 1 p
  end
end";
        let state = run(source, 10_000.0);
        // both original lots closed; the two lots bought in the loop survive
        assert_eq!(state.portfolio.definition_roots("p").len(), 2);
        assert_relative_eq!(holding(&state, "spy"), 20.0);
    }

    #[test]
    fn named_leg_property_and_sell_all_instance() {
        let source = "define hedge as: sell 1 qqq
define combo as: buy 10 spy and hedge
define hedge_quantity as 0
buy 1 combo
for_any_position combo as c:
  set hedge_quantity to c.hedge.quantity
  sell_all c
end";
        let state = run(source, 10_000.0);
        assert_eq!(state.globals.get("hedge_quantity"), Some(&Value::Float(-1.0)));
        assert!(state.portfolio.positions.is_empty());
        assert!(state.portfolio.composite_registry.is_empty());
    }

    #[test]
    fn sell_all_without_holding_is_noop() {
        let state = run("sell_all spy", 1_000.0);
        assert!(state.transactions.is_empty());
    }

    #[test]
    fn queries_report_holdings() {
        let source = "define p as: buy 3 spy
buy 1 p
define q as position_quantity(p)
define v as position_value(spy)
define total as portfolio_value";
        let state = run(source, 1_000.0);
        assert_eq!(state.globals.get("q"), Some(&Value::Float(3.0)));
        assert_eq!(state.globals.get("v"), Some(&Value::Dollar(300.0)));
        assert_eq!(state.globals.get("total"), Some(&Value::Dollar(1_000.0)));
    }

    #[test]
    fn rebalance_moves_to_target_weight() {
        let state = run("rebalance_to 50% spy", 10_000.0);
        assert_relative_eq!(holding(&state, "spy"), 50.0, epsilon = 1e-9);
        assert_eq!(state.transactions[0].tag, "REBALANCE");
    }

    #[test]
    fn percent_condition_against_indicator() {
        let state = run("when spy_return > 5%: buy 1 spy end", 1_000.0);
        assert!(state.portfolio.positions.is_empty());
    }
}
