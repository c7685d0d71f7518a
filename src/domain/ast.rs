//! Strategy language AST.
//!
//! The tree is produced once by the parser and never mutated afterwards; the
//! elaborator returns a normalised copy. `Display` renders source text that
//! parses back to the same tree.

use std::fmt;

/// Render a number without float noise (e.g. `0.7 * 100`).
pub(crate) fn fmt_number(value: f64) -> String {
    let rounded = (value * 1e9).round() / 1e9;
    if rounded == 0.0 {
        "0".to_string()
    } else {
        format!("{}", rounded)
    }
}

/// A tradable asset, optionally leveraged (`spy_3x`, `qqq_minus2x`).
#[derive(Debug, Clone, PartialEq)]
pub enum AssetReference {
    Simple(String),
    Leveraged { ticker: String, leverage: f64 },
}

impl AssetReference {
    /// Underlying ticker; leverage shares the base ticker's risk group.
    pub fn ticker(&self) -> &str {
        match self {
            AssetReference::Simple(t) => t,
            AssetReference::Leveraged { ticker, .. } => ticker,
        }
    }

    pub fn leverage(&self) -> f64 {
        match self {
            AssetReference::Simple(_) => 1.0,
            AssetReference::Leveraged { leverage, .. } => *leverage,
        }
    }

    /// Key of this asset's own price path.
    pub fn price_key(&self) -> String {
        match self {
            AssetReference::Simple(t) => t.clone(),
            AssetReference::Leveraged { ticker, leverage } => {
                format!("{}x_{}", fmt_number(*leverage), ticker)
            }
        }
    }
}

impl fmt::Display for AssetReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetReference::Simple(t) => write!(f, "{}", t),
            AssetReference::Leveraged { ticker, leverage } if *leverage < 0.0 => {
                write!(f, "{}_minus{}x", ticker, fmt_number(-leverage))
            }
            AssetReference::Leveraged { ticker, leverage } => {
                write!(f, "{}_{}x", ticker, fmt_number(*leverage))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GreekType {
    Delta,
    Gamma,
    Theta,
    Vega,
    Rho,
}

impl GreekType {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "delta" => Some(GreekType::Delta),
            "gamma" => Some(GreekType::Gamma),
            "theta" => Some(GreekType::Theta),
            "vega" => Some(GreekType::Vega),
            "rho" => Some(GreekType::Rho),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            GreekType::Delta => "delta",
            GreekType::Gamma => "gamma",
            GreekType::Theta => "theta",
            GreekType::Vega => "vega",
            GreekType::Rho => "rho",
        }
    }
}

/// An option leg written as `<ticker>_<N>dte_<±value><greek>`.
///
/// `value` is the decoded target (`minus20delta` is `-0.20`). A positive
/// target resolves to a call, a negative one to a put.
#[derive(Debug, Clone, PartialEq)]
pub struct OptionSpec {
    pub underlying: AssetReference,
    pub dte: u32,
    pub greek: GreekType,
    pub value: f64,
}

impl fmt::Display for OptionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let raw = self.value * 100.0;
        let sign = if raw < 0.0 { "minus" } else { "" };
        write!(
            f,
            "{}_{}dte_{}{}{}",
            self.underlying,
            self.dte,
            sign,
            fmt_number(raw.abs()),
            self.greek.name()
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndicatorType {
    Sma,
    Ema,
    Rsi,
    Vol,
    Return,
    PastPrice,
}

impl IndicatorType {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "sma" => Some(IndicatorType::Sma),
            "ema" => Some(IndicatorType::Ema),
            "rsi" => Some(IndicatorType::Rsi),
            "vol" => Some(IndicatorType::Vol),
            "return" => Some(IndicatorType::Return),
            "pastprice" => Some(IndicatorType::PastPrice),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            IndicatorType::Sma => "sma",
            IndicatorType::Ema => "ema",
            IndicatorType::Rsi => "rsi",
            IndicatorType::Vol => "vol",
            IndicatorType::Return => "return",
            IndicatorType::PastPrice => "pastprice",
        }
    }

    pub fn default_period(&self) -> usize {
        match self {
            IndicatorType::Rsi => 14,
            IndicatorType::Return | IndicatorType::PastPrice => 1,
            IndicatorType::Sma | IndicatorType::Ema | IndicatorType::Vol => 20,
        }
    }
}

/// `<ticker>_<kind>[_<period>]`, e.g. `spy_sma_50`.
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorSpec {
    pub asset: String,
    pub kind: IndicatorType,
    pub period: Option<usize>,
}

impl IndicatorSpec {
    pub fn effective_period(&self) -> usize {
        self.period.unwrap_or_else(|| self.kind.default_period())
    }
}

impl fmt::Display for IndicatorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.period {
            Some(p) => write!(f, "{}_{}_{}", self.asset, self.kind.name(), p),
            None => write!(f, "{}_{}", self.asset, self.kind.name()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instrument {
    Asset(AssetReference),
    Option(OptionSpec),
    /// Another named position, scaled by the component quantity.
    Position(String),
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instrument::Asset(a) => write!(f, "{}", a),
            Instrument::Option(o) => write!(f, "{}", o),
            Instrument::Position(name) => write!(f, "{}", name),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Number(f64),
    /// Face value: `50%` holds `50.0`.
    Percent(f64),
    Dollar(f64),
    Bool(bool),
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Number(n) => write!(f, "{}", fmt_number(*n)),
            Literal::Percent(p) => write!(f, "{}%", fmt_number(*p)),
            Literal::Dollar(d) => write!(f, "${}", fmt_number(*d)),
            Literal::Bool(b) => write!(f, "{}", b),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl fmt::Display for ArithmeticOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ArithmeticOp::Add => "+",
            ArithmeticOp::Sub => "-",
            ArithmeticOp::Mul => "*",
            ArithmeticOp::Div => "/",
            ArithmeticOp::Mod => "%",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Greater,
    Less,
    GreaterEq,
    LessEq,
    Equal,
    NotEqual,
}

impl ComparisonOp {
    pub fn apply(&self, left: f64, right: f64) -> bool {
        match self {
            ComparisonOp::Greater => left > right,
            ComparisonOp::Less => left < right,
            ComparisonOp::GreaterEq => left >= right,
            ComparisonOp::LessEq => left <= right,
            ComparisonOp::Equal => left == right,
            ComparisonOp::NotEqual => left != right,
        }
    }
}

impl fmt::Display for ComparisonOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ComparisonOp::Greater => ">",
            ComparisonOp::Less => "<",
            ComparisonOp::GreaterEq => ">=",
            ComparisonOp::LessEq => "<=",
            ComparisonOp::Equal => "==",
            ComparisonOp::NotEqual => "!=",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

/// The thing an action, query or loop refers to.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Asset(AssetReference),
    Identifier(String),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Asset(a) => write!(f, "{}", a),
            Target::Identifier(id) => write!(f, "{}", id),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PortfolioQuery {
    CashAvailable,
    PortfolioValue,
    PositionQuantity(Target),
    PositionValue(Target),
}

impl fmt::Display for PortfolioQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortfolioQuery::CashAvailable => f.write_str("cash_available"),
            PortfolioQuery::PortfolioValue => f.write_str("portfolio_value"),
            PortfolioQuery::PositionQuantity(t) => write!(f, "position_quantity({})", t),
            PortfolioQuery::PositionValue(t) => write!(f, "position_value({})", t),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(Literal),
    Identifier(String),
    Asset(AssetReference),
    Option(OptionSpec),
    PropertyAccess(Box<Expression>, String),
    Indicator(IndicatorSpec),
    Query(PortfolioQuery),
    Arithmetic(ArithmeticOp, Box<Expression>, Box<Expression>),
    UnaryMinus(Box<Expression>),
    Paren(Box<Expression>),
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Literal(l) => write!(f, "{}", l),
            Expression::Identifier(id) => write!(f, "{}", id),
            Expression::Asset(a) => write!(f, "{}", a),
            Expression::Option(o) => write!(f, "{}", o),
            Expression::PropertyAccess(e, prop) => write!(f, "{}.{}", e, prop),
            Expression::Indicator(i) => write!(f, "{}", i),
            Expression::Query(q) => write!(f, "{}", q),
            Expression::Arithmetic(op, l, r) => write!(f, "{} {} {}", l, op, r),
            // the space keeps `- 5` a unary minus rather than a negative literal
            Expression::UnaryMinus(e) => write!(f, "- {}", e),
            Expression::Paren(e) => write!(f, "({})", e),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Comparison(Expression, ComparisonOp, Expression),
    Logical(LogicalOp, Box<Condition>, Box<Condition>),
    Not(Box<Condition>),
    Paren(Box<Condition>),
    BooleanExpr(Expression),
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Comparison(l, op, r) => write!(f, "{} {} {}", l, op, r),
            Condition::Logical(LogicalOp::And, l, r) => write!(f, "{} and {}", l, r),
            Condition::Logical(LogicalOp::Or, l, r) => write!(f, "{} or {}", l, r),
            Condition::Not(c) => write!(f, "not {}", c),
            Condition::Paren(c) => write!(f, "({})", c),
            Condition::BooleanExpr(e) => write!(f, "{}", e),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Quantity {
    Literal(Literal),
    Identifier(String),
    Expression(Expression),
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quantity::Literal(l) => write!(f, "{}", l),
            Quantity::Identifier(id) => write!(f, "{}", id),
            Quantity::Expression(e) => write!(f, "({})", e),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PositionComponent {
    Buy(Quantity, Instrument),
    Sell(Quantity, Instrument),
}

impl PositionComponent {
    pub fn quantity(&self) -> &Quantity {
        match self {
            PositionComponent::Buy(q, _) | PositionComponent::Sell(q, _) => q,
        }
    }

    pub fn instrument(&self) -> &Instrument {
        match self {
            PositionComponent::Buy(_, i) | PositionComponent::Sell(_, i) => i,
        }
    }
}

/// A (possibly multi-leg) position: components joined by `and`, or a
/// reference to another named position.
#[derive(Debug, Clone, PartialEq)]
pub enum PositionExpression {
    Component(PositionComponent),
    Compound(Box<PositionExpression>, Box<PositionExpression>),
    Reference(String),
}

impl PositionExpression {
    /// Names of the positions this expression references directly.
    pub fn references(&self) -> Vec<&str> {
        match self {
            PositionExpression::Component(c) => match c.instrument() {
                Instrument::Position(name) => vec![name.as_str()],
                _ => Vec::new(),
            },
            PositionExpression::Compound(l, r) => {
                let mut refs = l.references();
                refs.extend(r.references());
                refs
            }
            PositionExpression::Reference(name) => vec![name.as_str()],
        }
    }
}

impl fmt::Display for PositionExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionExpression::Component(PositionComponent::Buy(q, i)) => {
                write!(f, "buy {} {}", q, i)
            }
            PositionExpression::Component(PositionComponent::Sell(q, i)) => {
                write!(f, "sell {} {}", q, i)
            }
            PositionExpression::Compound(l, r) => write!(f, "{} and {}", l, r),
            PositionExpression::Reference(name) => write!(f, "{}", name),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DefinitionValue {
    Expression(Expression),
    Position(PositionExpression),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Buy(Quantity, Target),
    Sell(Quantity, Target),
    BuyMax(Target),
    SellAll(Target),
    /// Target percentage at face value (`rebalance_to 50% spy` holds `50.0`).
    RebalanceTo(f64, Target),
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Buy(q, t) => write!(f, "buy {} {}", q, t),
            Action::Sell(q, t) => write!(f, "sell {} {}", q, t),
            Action::BuyMax(t) => write!(f, "buy_max {}", t),
            Action::SellAll(t) => write!(f, "sell_all {}", t),
            Action::RebalanceTo(p, t) => write!(f, "rebalance_to {}% {}", fmt_number(*p), t),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Define {
        name: String,
        value: DefinitionValue,
    },
    Set {
        name: String,
        value: Expression,
    },
    Action(Action),
    When {
        condition: Condition,
        block: Vec<Statement>,
    },
    ForAnyPosition {
        position_type: Target,
        variable: String,
        block: Vec<Statement>,
    },
}

impl Statement {
    fn write_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let pad = "  ".repeat(depth);
        match self {
            Statement::Define {
                name,
                value: DefinitionValue::Expression(e),
            } => write!(f, "{pad}define {} as {}", name, e),
            Statement::Define {
                name,
                value: DefinitionValue::Position(p),
            } => write!(f, "{pad}define {} as: {}", name, p),
            Statement::Set { name, value } => write!(f, "{pad}set {} to {}", name, value),
            Statement::Action(a) => write!(f, "{pad}{}", a),
            Statement::When { condition, block } => {
                writeln!(f, "{pad}when {}:", condition)?;
                write_block(f, block, depth + 1)?;
                write!(f, "{pad}end")
            }
            Statement::ForAnyPosition {
                position_type,
                variable,
                block,
            } => {
                writeln!(f, "{pad}for_any_position {} as {}:", position_type, variable)?;
                write_block(f, block, depth + 1)?;
                write!(f, "{pad}end")
            }
        }
    }
}

fn write_block(f: &mut fmt::Formatter<'_>, block: &[Statement], depth: usize) -> fmt::Result {
    for stmt in block {
        stmt.write_indented(f, depth)?;
        writeln!(f)?;
    }
    Ok(())
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_indented(f, 0)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub statements: Vec<Statement>,
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_block(f, &self.statements, 0)
    }
}
