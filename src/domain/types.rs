//! Static types used by the elaborator.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    Float,
    Percent,
    Dollar,
    Bool,
    Asset,
    /// A named position definition.
    Position(String),
    /// A held lot of the named definition (loop variables, legs).
    Instance(String),
    /// The type of a statement.
    Unit,
}

impl Type {
    /// Assets evaluate to their current price.
    pub fn coerced(self) -> Type {
        match self {
            Type::Asset => Type::Dollar,
            other => other,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Type::Float | Type::Percent | Type::Dollar)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Float => f.write_str("Float"),
            Type::Percent => f.write_str("Percent"),
            Type::Dollar => f.write_str("Dollar"),
            Type::Bool => f.write_str("Bool"),
            Type::Asset => f.write_str("Asset"),
            Type::Position(name) => write!(f, "Position({})", name),
            Type::Instance(name) => write!(f, "Instance({})", name),
            Type::Unit => f.write_str("Unit"),
        }
    }
}

/// Result type of `left op right` under the promotion table, or `None`
/// when the combination is not allowed.
pub fn arithmetic_result(
    op: crate::domain::ast::ArithmeticOp,
    left: &Type,
    right: &Type,
) -> Option<Type> {
    use crate::domain::ast::ArithmeticOp::*;
    use Type::*;
    let result = match (op, left, right) {
        (Add | Sub, Float, Float) => Float,
        (Add | Sub, Dollar, Dollar) => Dollar,
        (Add | Sub, Percent, Percent) => Percent,
        (Add | Sub, Float, Dollar) | (Add | Sub, Dollar, Float) => Dollar,

        (Mul, Float, Float) => Float,
        (Mul, Float, Percent) | (Mul, Percent, Float) => Percent,
        (Mul, Float, Dollar) | (Mul, Dollar, Float) => Dollar,
        (Mul, Percent, Dollar) | (Mul, Dollar, Percent) => Dollar,

        (Div, Float, Float) => Float,
        (Div, Dollar, Float) => Dollar,
        (Div, Dollar, Dollar) => Float,
        (Div, Percent, Float) => Percent,

        (Mod, Float, Float) => Float,
        _ => return None,
    };
    Some(result)
}

/// Whether two (already coerced) types may be compared with `op`.
pub fn comparable(op: crate::domain::ast::ComparisonOp, left: &Type, right: &Type) -> bool {
    use crate::domain::ast::ComparisonOp::{Equal, NotEqual};
    use Type::*;
    match (left, right) {
        (Bool, Bool) => matches!(op, Equal | NotEqual),
        (Float, Float) | (Percent, Percent) | (Dollar, Dollar) => true,
        (Float, Percent) | (Percent, Float) | (Float, Dollar) | (Dollar, Float) => true,
        _ => false,
    }
}
