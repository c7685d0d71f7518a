//! Static checks over a parsed program.
//!
//! Three passes, in order:
//! 1. cycle detection over the top-level named positions
//! 2. type checking, mirroring the interpreter's scoping rules
//! 3. look-back computation (longest indicator history the program reads)
//!
//! `elaborate` also normalises `define y as x` where `x` names a position
//! into a position reference, so an elaborated program elaborates to itself.

use std::collections::{HashMap, HashSet};

use crate::domain::ast::*;
use crate::domain::error::ElaborationError;
use crate::domain::types::{Type, arithmetic_result, comparable};

/// Built-in properties of a position instance and their types.
pub fn builtin_property_type(name: &str) -> Option<Type> {
    let ty = match name {
        "quantity" | "buy_date" | "dte" | "delta" | "gamma" | "theta" | "vega" | "rho" => {
            Type::Float
        }
        "buy_price" | "price" | "value" => Type::Dollar,
        _ => return None,
    };
    Some(ty)
}

// ── Pass 1: cycles ──────────────────────────────────────────────────

fn definition_edges(program: &Program) -> Vec<(String, Vec<String>)> {
    program
        .statements
        .iter()
        .filter_map(|stmt| match stmt {
            Statement::Define {
                name,
                value: DefinitionValue::Position(p),
            } => Some((
                name.clone(),
                p.references().into_iter().map(String::from).collect(),
            )),
            Statement::Define {
                name,
                value: DefinitionValue::Expression(Expression::Identifier(alias)),
            } => Some((name.clone(), vec![alias.clone()])),
            _ => None,
        })
        .collect()
}

/// Depth-first search with an explicit recursion path; reports the first
/// cycle found as `a -> b -> a`.
pub fn check_cycles(program: &Program) -> Result<(), ElaborationError> {
    let edges = definition_edges(program);
    let graph: HashMap<&str, &[String]> = edges
        .iter()
        .map(|(name, refs)| (name.as_str(), refs.as_slice()))
        .collect();

    fn visit<'a>(
        node: &'a str,
        graph: &HashMap<&'a str, &'a [String]>,
        path: &mut Vec<&'a str>,
        on_path: &mut HashSet<&'a str>,
        done: &mut HashSet<&'a str>,
    ) -> Result<(), ElaborationError> {
        if done.contains(node) {
            return Ok(());
        }
        if on_path.contains(node) {
            let start = path.iter().position(|n| *n == node).unwrap_or(0);
            let mut chain: Vec<&str> = path[start..].to_vec();
            chain.push(node);
            return Err(ElaborationError::new(format!(
                "Cyclic position definition detected: {}",
                chain.join(" -> ")
            )));
        }
        let Some(&refs) = graph.get(node) else {
            return Ok(());
        };
        path.push(node);
        on_path.insert(node);
        for next in refs {
            visit(next.as_str(), graph, path, on_path, done)?;
        }
        path.pop();
        on_path.remove(node);
        done.insert(node);
        Ok(())
    }

    let mut done = HashSet::new();
    for (name, _) in &edges {
        let mut path = Vec::new();
        let mut on_path = HashSet::new();
        visit(name.as_str(), &graph, &mut path, &mut on_path, &mut done)?;
    }
    Ok(())
}

// ── Pass 2: types ───────────────────────────────────────────────────

#[derive(Default)]
struct TypeChecker {
    globals: HashMap<String, Type>,
    scopes: Vec<HashMap<String, Type>>,
    positions: HashMap<String, PositionExpression>,
}

impl TypeChecker {
    fn at_top_level(&self) -> bool {
        self.scopes.is_empty()
    }

    fn lookup(&self, name: &str) -> Option<&Type> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
            .or_else(|| self.globals.get(name))
    }

    fn bind(&mut self, name: &str, ty: Type) {
        match self.scopes.last_mut() {
            Some(scope) => {
                scope.insert(name.to_string(), ty);
            }
            None => {
                self.globals.entry(name.to_string()).or_insert(ty);
            }
        }
    }

    fn with_scope<T>(
        &mut self,
        bindings: Vec<(String, Type)>,
        f: impl FnOnce(&mut Self) -> Result<T, ElaborationError>,
    ) -> Result<T, ElaborationError> {
        self.scopes.push(bindings.into_iter().collect());
        let result = f(self);
        self.scopes.pop();
        result
    }

    fn check_block(&mut self, block: Vec<Statement>) -> Result<Vec<Statement>, ElaborationError> {
        block
            .into_iter()
            .map(|stmt| self.check_statement(stmt).map(|(stmt, _)| stmt))
            .collect()
    }

    fn check_statement(&mut self, stmt: Statement) -> Result<(Statement, Type), ElaborationError> {
        let stmt = match stmt {
            Statement::Define { name, value } => self.check_define(name, value)?,
            Statement::Set { name, value } => {
                let expected = self
                    .lookup(&name)
                    .cloned()
                    .ok_or_else(|| {
                        ElaborationError::new(format!(
                            "Cannot 'set' an unbound variable '{}'.",
                            name
                        ))
                    })?
                    .coerced();
                let found = self.check_expression(&value)?.coerced();
                if expected != found {
                    return Err(ElaborationError::new(format!(
                        "Type mismatch in 'set {}': expected {}, found {}.",
                        name, expected, found
                    )));
                }
                Statement::Set { name, value }
            }
            Statement::Action(action) => {
                self.check_action(&action)?;
                Statement::Action(action)
            }
            Statement::When { condition, block } => {
                self.check_condition(&condition)?;
                let block = self.with_scope(Vec::new(), |tc| tc.check_block(block))?;
                Statement::When { condition, block }
            }
            Statement::ForAnyPosition {
                position_type,
                variable,
                block,
            } => {
                let instance = match &position_type {
                    Target::Asset(asset) => Type::Instance(asset.to_string()),
                    Target::Identifier(name) => match self.lookup(name) {
                        Some(Type::Position(def)) => Type::Instance(def.clone()),
                        Some(other) => {
                            return Err(ElaborationError::new(format!(
                                "for_any_position expects a position or asset, but '{}' is {}.",
                                name, other
                            )));
                        }
                        None => return Err(unbound(name)),
                    },
                };
                let block = self.with_scope(vec![(variable.clone(), instance)], |tc| {
                    tc.check_block(block)
                })?;
                Statement::ForAnyPosition {
                    position_type,
                    variable,
                    block,
                }
            }
        };
        Ok((stmt, Type::Unit))
    }

    fn check_define(
        &mut self,
        name: String,
        value: DefinitionValue,
    ) -> Result<Statement, ElaborationError> {
        // `define y as x` aliases a position when `x` names one
        let value = match value {
            DefinitionValue::Expression(Expression::Identifier(alias))
                if matches!(self.lookup(&alias), Some(Type::Position(_))) =>
            {
                DefinitionValue::Position(PositionExpression::Reference(alias))
            }
            other => other,
        };

        match &value {
            DefinitionValue::Position(position) => {
                if !self.at_top_level() {
                    return Err(ElaborationError::new(
                        "Position definitions are only allowed at the top level.",
                    ));
                }
                self.check_position(position)?;
                if !self.globals.contains_key(&name) {
                    self.positions.insert(name.clone(), position.clone());
                }
                self.bind(&name, Type::Position(name.clone()));
            }
            DefinitionValue::Expression(expr) => {
                let ty = self.check_expression(expr)?.coerced();
                self.bind(&name, ty);
            }
        }
        Ok(Statement::Define { name, value })
    }

    fn check_position(&self, position: &PositionExpression) -> Result<(), ElaborationError> {
        match position {
            PositionExpression::Compound(left, right) => {
                self.check_position(left)?;
                self.check_position(right)
            }
            PositionExpression::Reference(name) => self.expect_position(name),
            PositionExpression::Component(component) => {
                self.check_quantity(component.quantity())?;
                match component.instrument() {
                    Instrument::Asset(_) => Ok(()),
                    Instrument::Option(spec) => check_option_spec(spec),
                    Instrument::Position(name) => self.expect_position(name),
                }
            }
        }
    }

    fn expect_position(&self, name: &str) -> Result<(), ElaborationError> {
        match self.lookup(name) {
            Some(Type::Position(_)) => Ok(()),
            Some(other) => Err(ElaborationError::new(format!(
                "'{}' is used as a position but has type {}.",
                name, other
            ))),
            None => Err(unbound(name)),
        }
    }

    fn check_quantity(&self, quantity: &Quantity) -> Result<(), ElaborationError> {
        let ty = match quantity {
            Quantity::Literal(Literal::Number(_)) => Type::Float,
            Quantity::Literal(other) => {
                return Err(ElaborationError::new(format!(
                    "Trade quantity must be a plain number, found '{}'.",
                    other
                )));
            }
            Quantity::Identifier(name) => self.lookup(name).cloned().ok_or_else(|| unbound(name))?,
            Quantity::Expression(expr) => self.check_expression(expr)?,
        };
        if ty != Type::Float {
            return Err(ElaborationError::new(format!(
                "Trade quantity must be Float, found {}.",
                ty
            )));
        }
        Ok(())
    }

    fn target_type(&self, target: &Target) -> Result<Type, ElaborationError> {
        match target {
            Target::Asset(_) => Ok(Type::Asset),
            Target::Identifier(name) => match self.lookup(name) {
                Some(ty @ (Type::Position(_) | Type::Instance(_) | Type::Asset)) => Ok(ty.clone()),
                Some(other) => Err(ElaborationError::new(format!(
                    "Trade target '{}' must be an asset, position or instance, found {}.",
                    name, other
                ))),
                None => Err(unbound(name)),
            },
        }
    }

    fn check_action(&self, action: &Action) -> Result<(), ElaborationError> {
        match action {
            Action::Buy(quantity, target) | Action::Sell(quantity, target) => {
                self.check_quantity(quantity)?;
                self.target_type(target)?;
            }
            Action::BuyMax(target) => {
                if let Type::Instance(_) = self.target_type(target)? {
                    return Err(ElaborationError::new(
                        "buy_max requires an asset or position definition, not an instance.",
                    ));
                }
            }
            Action::SellAll(target) => {
                self.target_type(target)?;
            }
            Action::RebalanceTo(pct, target) => {
                if !(0.0..=100.0).contains(pct) {
                    return Err(ElaborationError::new(format!(
                        "rebalance_to target must be between 0% and 100%, found {}%.",
                        fmt_number(*pct)
                    )));
                }
                if !matches!(target, Target::Asset(_)) {
                    return Err(ElaborationError::new(
                        "rebalance_to only applies to simple assets.",
                    ));
                }
            }
        }
        Ok(())
    }

    fn check_condition(&self, condition: &Condition) -> Result<(), ElaborationError> {
        match condition {
            Condition::Comparison(left, op, right) => {
                let lt = self.check_expression(left)?.coerced();
                let rt = self.check_expression(right)?.coerced();
                if !comparable(*op, &lt, &rt) {
                    return Err(ElaborationError::new(format!(
                        "Cannot compare {} with {} using '{}'.",
                        lt, rt, op
                    )));
                }
                Ok(())
            }
            Condition::Logical(_, left, right) => {
                self.check_condition(left)?;
                self.check_condition(right)
            }
            Condition::Not(inner) | Condition::Paren(inner) => self.check_condition(inner),
            Condition::BooleanExpr(expr) => match self.check_expression(expr)? {
                Type::Bool => Ok(()),
                other => Err(ElaborationError::new(format!(
                    "Condition must be Bool, found {}.",
                    other
                ))),
            },
        }
    }

    fn check_expression(&self, expr: &Expression) -> Result<Type, ElaborationError> {
        match expr {
            Expression::Literal(Literal::Number(_)) => Ok(Type::Float),
            Expression::Literal(Literal::Percent(_)) => Ok(Type::Percent),
            Expression::Literal(Literal::Dollar(_)) => Ok(Type::Dollar),
            Expression::Literal(Literal::Bool(_)) => Ok(Type::Bool),
            Expression::Identifier(name) => self.lookup(name).cloned().ok_or_else(|| unbound(name)),
            Expression::Asset(_) => Ok(Type::Asset),
            Expression::Option(spec) => Err(ElaborationError::new(format!(
                "Option leg '{}' can only appear inside a position definition.",
                spec
            ))),
            Expression::PropertyAccess(inner, property) => {
                let def = match self.check_expression(inner)? {
                    Type::Instance(def) => def,
                    other => {
                        return Err(ElaborationError::new(format!(
                            "Property '{}' requires a position instance, found {}.",
                            property, other
                        )));
                    }
                };
                if let Some(ty) = builtin_property_type(property) {
                    return Ok(ty);
                }
                let is_leg = self
                    .positions
                    .get(&def)
                    .map(|p| p.references().contains(&property.as_str()))
                    .unwrap_or(false);
                if is_leg {
                    Ok(Type::Instance(property.clone()))
                } else {
                    Err(ElaborationError::new(format!(
                        "Invalid property '{}' on position '{}'.",
                        property, def
                    )))
                }
            }
            Expression::Indicator(spec) => {
                if spec.period == Some(0) {
                    return Err(ElaborationError::new(format!(
                        "Indicator '{}' needs a positive period.",
                        spec
                    )));
                }
                Ok(Type::Float)
            }
            Expression::Query(query) => match query {
                PortfolioQuery::CashAvailable | PortfolioQuery::PortfolioValue => Ok(Type::Dollar),
                PortfolioQuery::PositionQuantity(target) => {
                    self.target_type(target)?;
                    Ok(Type::Float)
                }
                PortfolioQuery::PositionValue(target) => {
                    self.target_type(target)?;
                    Ok(Type::Dollar)
                }
            },
            Expression::Arithmetic(op, left, right) => {
                let lt = self.check_expression(left)?.coerced();
                let rt = self.check_expression(right)?.coerced();
                arithmetic_result(*op, &lt, &rt).ok_or_else(|| {
                    ElaborationError::new(format!(
                        "Type mismatch in arithmetic: cannot apply '{}' to {} and {}.",
                        op, lt, rt
                    ))
                })
            }
            Expression::UnaryMinus(inner) => {
                let ty = self.check_expression(inner)?.coerced();
                if ty.is_numeric() {
                    Ok(ty)
                } else {
                    Err(ElaborationError::new(format!("Cannot negate {}.", ty)))
                }
            }
            Expression::Paren(inner) => self.check_expression(inner),
        }
    }
}

fn unbound(name: &str) -> ElaborationError {
    ElaborationError::new(format!("Unbound identifier '{}'.", name))
}

fn check_option_spec(spec: &OptionSpec) -> Result<(), ElaborationError> {
    if spec.dte == 0 {
        return Err(ElaborationError::new(format!(
            "Option leg '{}' must have DTE greater than 0.",
            spec
        )));
    }
    if spec.value == 0.0 || spec.value.abs() >= 1.0 {
        return Err(ElaborationError::new(format!(
            "Option leg '{}' target {} must be non-zero and strictly between -1 and 1.",
            spec,
            spec.greek.name()
        )));
    }
    Ok(())
}

// ── Pass 3: look-back ───────────────────────────────────────────────

fn expression_lookback(expr: &Expression) -> usize {
    match expr {
        Expression::Indicator(spec) => spec.effective_period(),
        Expression::PropertyAccess(inner, _)
        | Expression::UnaryMinus(inner)
        | Expression::Paren(inner) => expression_lookback(inner),
        Expression::Arithmetic(_, left, right) => {
            expression_lookback(left).max(expression_lookback(right))
        }
        _ => 0,
    }
}

fn quantity_lookback(quantity: &Quantity) -> usize {
    match quantity {
        Quantity::Expression(expr) => expression_lookback(expr),
        _ => 0,
    }
}

fn condition_lookback(condition: &Condition) -> usize {
    match condition {
        Condition::Comparison(left, _, right) => {
            expression_lookback(left).max(expression_lookback(right))
        }
        Condition::Logical(_, left, right) => {
            condition_lookback(left).max(condition_lookback(right))
        }
        Condition::Not(inner) | Condition::Paren(inner) => condition_lookback(inner),
        Condition::BooleanExpr(expr) => expression_lookback(expr),
    }
}

fn position_lookback(position: &PositionExpression) -> usize {
    match position {
        PositionExpression::Component(c) => quantity_lookback(c.quantity()),
        PositionExpression::Compound(left, right) => {
            position_lookback(left).max(position_lookback(right))
        }
        PositionExpression::Reference(_) => 0,
    }
}

/// Number of past days one statement (including nested blocks) reads.
pub fn statement_lookback(stmt: &Statement) -> usize {
    match stmt {
        Statement::Define {
            value: DefinitionValue::Expression(expr),
            ..
        }
        | Statement::Set { value: expr, .. } => expression_lookback(expr),
        Statement::Define {
            value: DefinitionValue::Position(p),
            ..
        } => position_lookback(p),
        Statement::Action(Action::Buy(q, _) | Action::Sell(q, _)) => quantity_lookback(q),
        Statement::Action(_) => 0,
        Statement::When { condition, block } => block
            .iter()
            .map(statement_lookback)
            .fold(condition_lookback(condition), usize::max),
        Statement::ForAnyPosition { block, .. } => {
            block.iter().map(statement_lookback).max().unwrap_or(0)
        }
    }
}

/// Program-wide look-back: the longest history any statement needs.
pub fn max_lookback(program: &Program) -> usize {
    program
        .statements
        .iter()
        .map(statement_lookback)
        .max()
        .unwrap_or(0)
}

/// Run the cycle check and the type check, returning the normalised program.
pub fn elaborate(program: Program) -> Result<Program, ElaborationError> {
    check_cycles(&program)?;
    let mut checker = TypeChecker::default();
    let statements = checker.check_block(program.statements)?;
    Ok(Program { statements })
}
