//! Runtime values and the per-iteration evaluation state.

use std::collections::HashMap;
use std::fmt;

use super::ast::{ArithmeticOp, ComparisonOp, PositionExpression, fmt_number};
use super::error::InterpreterError;
use super::portfolio::{Portfolio, Transaction};
use super::position::PositionInstance;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Float(f64),
    /// Face value: `50%` holds `50.0`.
    Percent(f64),
    Dollar(f64),
    Bool(bool),
    Position {
        name: String,
        expression: PositionExpression,
    },
    Instance(Box<PositionInstance>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Float(_) => "Float",
            Value::Percent(_) => "Percent",
            Value::Dollar(_) => "Dollar",
            Value::Bool(_) => "Bool",
            Value::Position { .. } => "Position",
            Value::Instance(_) => "Instance",
        }
    }

    pub fn negate(self) -> Result<Value, InterpreterError> {
        match self {
            Value::Float(v) => Ok(Value::Float(-v)),
            Value::Percent(v) => Ok(Value::Percent(-v)),
            Value::Dollar(v) => Ok(Value::Dollar(-v)),
            other => Err(InterpreterError::new(format!(
                "Cannot negate a value of type {}.",
                other.type_name()
            ))),
        }
    }

    /// Apply `op` under the promotion table. A percent meeting a dollar
    /// acts as a fraction.
    pub fn arithmetic(op: ArithmeticOp, left: Value, right: Value) -> Result<Value, InterpreterError> {
        use ArithmeticOp::*;
        use Value::*;

        if matches!(op, Div | Mod) {
            let divisor = match right {
                Float(v) | Percent(v) | Dollar(v) => v,
                _ => f64::NAN,
            };
            if divisor == 0.0 {
                let message = if op == Div {
                    "Division by zero."
                } else {
                    "Modulo by zero."
                };
                return Err(InterpreterError::new(message));
            }
        }

        let result = match (op, &left, &right) {
            (Add, Float(a), Float(b)) => Float(a + b),
            (Sub, Float(a), Float(b)) => Float(a - b),
            (Add, Dollar(a), Dollar(b)) | (Add, Float(a), Dollar(b)) | (Add, Dollar(a), Float(b)) => {
                Dollar(a + b)
            }
            (Sub, Dollar(a), Dollar(b)) | (Sub, Float(a), Dollar(b)) | (Sub, Dollar(a), Float(b)) => {
                Dollar(a - b)
            }
            (Add, Percent(a), Percent(b)) => Percent(a + b),
            (Sub, Percent(a), Percent(b)) => Percent(a - b),

            (Mul, Float(a), Float(b)) => Float(a * b),
            (Mul, Float(a), Percent(b)) | (Mul, Percent(a), Float(b)) => Percent(a * b),
            (Mul, Float(a), Dollar(b)) | (Mul, Dollar(a), Float(b)) => Dollar(a * b),
            (Mul, Percent(p), Dollar(d)) | (Mul, Dollar(d), Percent(p)) => Dollar(p / 100.0 * d),

            (Div, Float(a), Float(b)) => Float(a / b),
            (Div, Dollar(a), Float(b)) => Dollar(a / b),
            (Div, Dollar(a), Dollar(b)) => Float(a / b),
            (Div, Percent(a), Float(b)) => Percent(a / b),

            (Mod, Float(a), Float(b)) => Float(a % b),
            _ => {
                return Err(InterpreterError::new(format!(
                    "Type mismatch in arithmetic: cannot apply '{}' to {} and {}.",
                    op,
                    left.type_name(),
                    right.type_name()
                )));
            }
        };
        Ok(result)
    }

    /// Compare two values. A percent compared with a float is a fraction.
    pub fn compare(op: ComparisonOp, left: &Value, right: &Value) -> Result<bool, InterpreterError> {
        use Value::*;
        let (l, r) = match (left, right) {
            (Bool(a), Bool(b)) => {
                return match op {
                    ComparisonOp::Equal => Ok(a == b),
                    ComparisonOp::NotEqual => Ok(a != b),
                    _ => Err(InterpreterError::new(format!(
                        "Cannot order Bool values with '{}'.",
                        op
                    ))),
                };
            }
            (Float(a), Float(b)) | (Dollar(a), Dollar(b)) | (Percent(a), Percent(b)) => (*a, *b),
            (Float(a), Dollar(b)) | (Dollar(a), Float(b)) => (*a, *b),
            (Percent(p), Float(f)) => (p / 100.0, *f),
            (Float(f), Percent(p)) => (*f, p / 100.0),
            _ => {
                return Err(InterpreterError::new(format!(
                    "Cannot compare {} with {}.",
                    left.type_name(),
                    right.type_name()
                )));
            }
        };
        Ok(op.apply(l, r))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Float(v) => write!(f, "{}", fmt_number(*v)),
            Value::Percent(v) => write!(f, "{}%", fmt_number(*v)),
            Value::Dollar(v) => write!(f, "${:.2}", v),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Position { name, .. } => write!(f, "<position {}>", name),
            Value::Instance(lot) => write!(f, "<{} lot {}>", lot.definition_name, lot.id),
        }
    }
}

/// State threaded through one iteration. Each step consumes the state and
/// returns its successor.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationState {
    pub current_day: usize,
    pub portfolio: Portfolio,
    pub scopes: Vec<HashMap<String, Value>>,
    pub globals: HashMap<String, Value>,
    pub risk_free_rate: f64,
    pub transactions: Vec<Transaction>,
}

impl EvaluationState {
    pub fn new(initial_cash: f64, risk_free_rate: f64) -> Self {
        Self {
            current_day: 0,
            portfolio: Portfolio::new(initial_cash),
            scopes: Vec::new(),
            globals: HashMap::new(),
            risk_free_rate,
            transactions: Vec::new(),
        }
    }

    pub fn at_top_level(&self) -> bool {
        self.scopes.is_empty()
    }

    /// Innermost local binding first, then the global scope.
    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
            .or_else(|| self.globals.get(name))
    }

    /// Top-level definitions are insert-if-absent; nested ones bind in the
    /// innermost scope.
    pub fn define(mut self, name: &str, value: Value) -> Self {
        match self.scopes.last_mut() {
            Some(scope) => {
                scope.insert(name.to_string(), value);
            }
            None => {
                self.globals.entry(name.to_string()).or_insert(value);
            }
        }
        self
    }

    /// Overwrite the nearest existing binding of `name`.
    pub fn assign(mut self, name: &str, value: Value) -> Result<Self, InterpreterError> {
        if let Some(slot) = self
            .scopes
            .iter_mut()
            .rev()
            .find_map(|scope| scope.get_mut(name))
        {
            *slot = value;
            return Ok(self);
        }
        match self.globals.get_mut(name) {
            Some(slot) => {
                *slot = value;
                Ok(self)
            }
            None => Err(InterpreterError::new(format!(
                "Cannot 'set' an unbound variable '{}'.",
                name
            ))),
        }
    }

    pub fn push_scope(mut self, bindings: HashMap<String, Value>) -> Self {
        self.scopes.push(bindings);
        self
    }

    pub fn pop_scope(mut self) -> Self {
        self.scopes.pop();
        self
    }
}
