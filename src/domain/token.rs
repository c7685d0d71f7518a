//! Lexical tokens.

use std::fmt;

use super::ast::{AssetReference, IndicatorSpec, OptionSpec};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    When,
    End,
    ForAnyPosition,
    As,
    Buy,
    Sell,
    BuyMax,
    SellAll,
    RebalanceTo,
    Define,
    Set,
    To,
    True,
    False,
    TBills,
    And,
    Or,
    Not,
    CashAvailable,
    PortfolioValue,
    PositionQuantity,
    PositionValue,

    Asset(AssetReference),
    OptionLeg(OptionSpec),
    Indicator(IndicatorSpec),
    Identifier(String),
    Number(f64),
    Percentage(f64),
    Dollar(f64),

    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Greater,
    Less,
    GreaterEq,
    LessEq,
    Equal,
    NotEqual,
    Colon,
    Dot,
    LParen,
    RParen,
    Eof,
}

impl Token {
    /// Keyword table lookup; matching is case-insensitive.
    pub fn keyword(word: &str) -> Option<Token> {
        let token = match word.to_ascii_lowercase().as_str() {
            "when" => Token::When,
            "end" => Token::End,
            "for_any_position" => Token::ForAnyPosition,
            "as" => Token::As,
            "buy" => Token::Buy,
            "sell" => Token::Sell,
            "buy_max" => Token::BuyMax,
            "sell_all" => Token::SellAll,
            "rebalance_to" => Token::RebalanceTo,
            "define" => Token::Define,
            "set" => Token::Set,
            "to" => Token::To,
            "true" => Token::True,
            "false" => Token::False,
            "t_bills" => Token::TBills,
            "and" => Token::And,
            "or" => Token::Or,
            "not" => Token::Not,
            "cash_available" => Token::CashAvailable,
            "portfolio_value" => Token::PortfolioValue,
            "position_quantity" => Token::PositionQuantity,
            "position_value" => Token::PositionValue,
            _ => return None,
        };
        Some(token)
    }

    /// True for tokens after which an operator (not an operand) is expected.
    pub fn ends_operand(&self) -> bool {
        matches!(
            self,
            Token::Asset(_)
                | Token::OptionLeg(_)
                | Token::Indicator(_)
                | Token::Identifier(_)
                | Token::Number(_)
                | Token::Percentage(_)
                | Token::Dollar(_)
                | Token::True
                | Token::False
                | Token::CashAvailable
                | Token::PortfolioValue
                | Token::RParen
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::When => f.write_str("when"),
            Token::End => f.write_str("end"),
            Token::ForAnyPosition => f.write_str("for_any_position"),
            Token::As => f.write_str("as"),
            Token::Buy => f.write_str("buy"),
            Token::Sell => f.write_str("sell"),
            Token::BuyMax => f.write_str("buy_max"),
            Token::SellAll => f.write_str("sell_all"),
            Token::RebalanceTo => f.write_str("rebalance_to"),
            Token::Define => f.write_str("define"),
            Token::Set => f.write_str("set"),
            Token::To => f.write_str("to"),
            Token::True => f.write_str("true"),
            Token::False => f.write_str("false"),
            Token::TBills => f.write_str("t_bills"),
            Token::And => f.write_str("and"),
            Token::Or => f.write_str("or"),
            Token::Not => f.write_str("not"),
            Token::CashAvailable => f.write_str("cash_available"),
            Token::PortfolioValue => f.write_str("portfolio_value"),
            Token::PositionQuantity => f.write_str("position_quantity"),
            Token::PositionValue => f.write_str("position_value"),
            Token::Asset(a) => write!(f, "{}", a),
            Token::OptionLeg(o) => write!(f, "{}", o),
            Token::Indicator(i) => write!(f, "{}", i),
            Token::Identifier(id) => write!(f, "{}", id),
            Token::Number(n) => write!(f, "{}", n),
            Token::Percentage(p) => write!(f, "{}%", p),
            Token::Dollar(d) => write!(f, "${}", d),
            Token::Plus => f.write_str("+"),
            Token::Minus => f.write_str("-"),
            Token::Star => f.write_str("*"),
            Token::Slash => f.write_str("/"),
            Token::Percent => f.write_str("%"),
            Token::Greater => f.write_str(">"),
            Token::Less => f.write_str("<"),
            Token::GreaterEq => f.write_str(">="),
            Token::LessEq => f.write_str("<="),
            Token::Equal => f.write_str("=="),
            Token::NotEqual => f.write_str("!="),
            Token::Colon => f.write_str(":"),
            Token::Dot => f.write_str("."),
            Token::LParen => f.write_str("("),
            Token::RParen => f.write_str(")"),
            Token::Eof => f.write_str("end of input"),
        }
    }
}

/// A token and the byte offset where it starts.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub position: usize,
}
