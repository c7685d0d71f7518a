//! Recursive-descent parser for the strategy language.
//!
//! Grammar (precedence lowest to highest):
//!   program    := statement* EOF
//!   statement  := define | set | when | for_any_position | action
//!   condition  := and_cond ("or" and_cond)*
//!   and_cond   := not_cond ("and" not_cond)*
//!   not_cond   := "not" not_cond | "(" condition ")" | comparison
//!   comparison := expr (cmp_op expr)?
//!   expr       := term (("+" | "-") term)*
//!   term       := unary (("*" | "/" | "%") unary)*
//!   unary      := "-" unary | postfix
//!   postfix    := primary ("." IDENT)*
//!
//! A parenthesised condition is tried first and abandoned if an operator
//! follows the closing paren, so `(a + b) > c` still parses as a comparison.

use crate::domain::ast::*;
use crate::domain::error::ParseError;
use crate::domain::token::{Spanned, Token};

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    fn new(mut tokens: Vec<Spanned>) -> Self {
        let end = tokens.last().map(|t| t.position).unwrap_or(0);
        if tokens.last().map(|t| t.token != Token::Eof).unwrap_or(true) {
            tokens.push(Spanned {
                token: Token::Eof,
                position: end,
            });
        }
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].token
    }

    fn peek_at(&self, offset: usize) -> &Token {
        &self.tokens[(self.pos + offset).min(self.tokens.len() - 1)].token
    }

    fn position(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].position
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn check(&self, expected: &Token) -> bool {
        self.peek() == expected
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            position: self.position(),
        }
    }

    fn expect(&mut self, expected: Token) -> Result<(), ParseError> {
        if self.check(&expected) {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!("Expected '{}' but found '{}'", expected, self.peek())))
        }
    }

    fn expect_identifier(&mut self, context: &str) -> Result<String, ParseError> {
        match self.peek() {
            Token::Identifier(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            other => Err(self.error(format!(
                "Expected identifier {} but found '{}'",
                context, other
            ))),
        }
    }

    // ── Statements ───────────────────────────────────────────────────

    fn parse_program(&mut self) -> Result<Program, ParseError> {
        let mut statements = Vec::new();
        while let Some(stmt) = self.parse_statement()? {
            statements.push(stmt);
        }
        if !self.check(&Token::Eof) {
            return Err(self.error(format!(
                "Unexpected token '{}' after end of program.",
                self.peek()
            )));
        }
        Ok(Program { statements })
    }

    /// `Ok(None)` when the current token cannot start a statement.
    fn parse_statement(&mut self) -> Result<Option<Statement>, ParseError> {
        let stmt = match self.peek() {
            Token::Define => self.parse_define()?,
            Token::Set => self.parse_set()?,
            Token::When => self.parse_when()?,
            Token::ForAnyPosition => self.parse_for_any_position()?,
            Token::Buy | Token::Sell | Token::BuyMax | Token::SellAll | Token::RebalanceTo => {
                Statement::Action(self.parse_action()?)
            }
            _ => return Ok(None),
        };
        Ok(Some(stmt))
    }

    fn parse_block(&mut self) -> Result<Vec<Statement>, ParseError> {
        let mut block = Vec::new();
        loop {
            match self.peek() {
                Token::End => {
                    self.advance();
                    return Ok(block);
                }
                Token::Eof => return Err(self.error("Block not closed with 'end'")),
                _ => match self.parse_statement()? {
                    Some(stmt) => block.push(stmt),
                    None => {
                        return Err(self.error(format!(
                            "Expected statement or 'end' but found '{}'",
                            self.peek()
                        )));
                    }
                },
            }
        }
    }

    fn parse_define(&mut self) -> Result<Statement, ParseError> {
        self.expect(Token::Define)?;
        let name = self.expect_identifier("after 'define'")?;
        self.expect(Token::As)?;
        if self.check(&Token::Colon) {
            self.advance();
        }

        let starts_position = match self.peek() {
            Token::Buy | Token::Sell => true,
            Token::Identifier(_) => *self.peek_at(1) == Token::And,
            _ => false,
        };
        let value = if starts_position {
            DefinitionValue::Position(self.parse_position_expression()?)
        } else {
            DefinitionValue::Expression(self.parse_expression()?)
        };
        Ok(Statement::Define { name, value })
    }

    fn parse_set(&mut self) -> Result<Statement, ParseError> {
        self.expect(Token::Set)?;
        let name = self.expect_identifier("after 'set'")?;
        self.expect(Token::To)?;
        let value = self.parse_expression()?;
        Ok(Statement::Set { name, value })
    }

    fn parse_when(&mut self) -> Result<Statement, ParseError> {
        self.expect(Token::When)?;
        let condition = self.parse_condition()?;
        self.expect(Token::Colon)?;
        let block = self.parse_block()?;
        Ok(Statement::When { condition, block })
    }

    fn parse_for_any_position(&mut self) -> Result<Statement, ParseError> {
        self.expect(Token::ForAnyPosition)?;
        let position_type = self.parse_target()?;
        self.expect(Token::As)?;
        let variable = self.expect_identifier("after 'as'")?;
        self.expect(Token::Colon)?;
        let block = self.parse_block()?;
        Ok(Statement::ForAnyPosition {
            position_type,
            variable,
            block,
        })
    }

    fn parse_action(&mut self) -> Result<Action, ParseError> {
        match self.advance() {
            Token::Buy => {
                let quantity = self.parse_quantity()?;
                Ok(Action::Buy(quantity, self.parse_target()?))
            }
            Token::Sell => {
                let quantity = self.parse_quantity()?;
                Ok(Action::Sell(quantity, self.parse_target()?))
            }
            Token::BuyMax => Ok(Action::BuyMax(self.parse_target()?)),
            Token::SellAll => Ok(Action::SellAll(self.parse_target()?)),
            Token::RebalanceTo => match self.peek().clone() {
                Token::Percentage(pct) => {
                    self.advance();
                    Ok(Action::RebalanceTo(pct, self.parse_target()?))
                }
                other => Err(self.error(format!(
                    "Expected percentage after 'rebalance_to' but found '{}'",
                    other
                ))),
            },
            other => Err(self.error(format!("Expected action but found '{}'", other))),
        }
    }

    fn parse_target(&mut self) -> Result<Target, ParseError> {
        match self.peek().clone() {
            Token::Asset(asset) => {
                self.advance();
                Ok(Target::Asset(asset))
            }
            Token::Identifier(name) => {
                self.advance();
                Ok(Target::Identifier(name))
            }
            other => Err(self.error(format!(
                "Expected asset or position name but found '{}'",
                other
            ))),
        }
    }

    fn parse_quantity(&mut self) -> Result<Quantity, ParseError> {
        let quantity = match self.peek().clone() {
            Token::Number(n) => Quantity::Literal(Literal::Number(n)),
            Token::Percentage(p) => Quantity::Literal(Literal::Percent(p)),
            Token::Dollar(d) => Quantity::Literal(Literal::Dollar(d)),
            Token::Identifier(name) => Quantity::Identifier(name),
            Token::LParen => {
                self.advance();
                let expr = self.parse_expression()?;
                self.expect(Token::RParen)?;
                return Ok(Quantity::Expression(expr));
            }
            other => {
                return Err(self.error(format!("Expected quantity but found '{}'", other)));
            }
        };
        self.advance();
        Ok(quantity)
    }

    // ── Position expressions ─────────────────────────────────────────

    fn parse_position_expression(&mut self) -> Result<PositionExpression, ParseError> {
        let mut left = self.parse_position_element()?;
        while self.check(&Token::And) {
            self.advance();
            let right = self.parse_position_element()?;
            left = PositionExpression::Compound(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_position_element(&mut self) -> Result<PositionExpression, ParseError> {
        match self.peek().clone() {
            Token::Buy => {
                self.advance();
                let quantity = self.parse_quantity()?;
                let instrument = self.parse_instrument()?;
                Ok(PositionExpression::Component(PositionComponent::Buy(
                    quantity, instrument,
                )))
            }
            Token::Sell => {
                self.advance();
                let quantity = self.parse_quantity()?;
                let instrument = self.parse_instrument()?;
                Ok(PositionExpression::Component(PositionComponent::Sell(
                    quantity, instrument,
                )))
            }
            Token::Identifier(name) => {
                self.advance();
                Ok(PositionExpression::Reference(name))
            }
            other => Err(self.error(format!(
                "Expected 'buy', 'sell' or a position name but found '{}'",
                other
            ))),
        }
    }

    fn parse_instrument(&mut self) -> Result<Instrument, ParseError> {
        match self.peek().clone() {
            Token::Asset(asset) => {
                self.advance();
                Ok(Instrument::Asset(asset))
            }
            Token::OptionLeg(spec) => {
                self.advance();
                Ok(Instrument::Option(spec))
            }
            Token::Identifier(name) => {
                self.advance();
                Ok(Instrument::Position(name))
            }
            other => Err(self.error(format!(
                "Expected asset, option leg or position name after quantity but found '{}'",
                other
            ))),
        }
    }

    // ── Conditions ───────────────────────────────────────────────────

    fn parse_condition(&mut self) -> Result<Condition, ParseError> {
        let mut left = self.parse_and_condition()?;
        while self.check(&Token::Or) {
            self.advance();
            let right = self.parse_and_condition()?;
            left = Condition::Logical(LogicalOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and_condition(&mut self) -> Result<Condition, ParseError> {
        let mut left = self.parse_not_condition()?;
        while self.check(&Token::And) {
            self.advance();
            let right = self.parse_not_condition()?;
            left = Condition::Logical(LogicalOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not_condition(&mut self) -> Result<Condition, ParseError> {
        if self.check(&Token::Not) {
            self.advance();
            let inner = self.parse_not_condition()?;
            return Ok(Condition::Not(Box::new(inner)));
        }
        if self.check(&Token::LParen) {
            let saved = self.pos;
            if let Some(cond) = self.try_paren_condition() {
                return Ok(cond);
            }
            self.pos = saved;
        }
        self.parse_comparison()
    }

    fn try_paren_condition(&mut self) -> Option<Condition> {
        self.advance();
        let inner = self.parse_condition().ok()?;
        if !self.check(&Token::RParen) {
            return None;
        }
        self.advance();
        if is_comparison_op(self.peek()) || is_arithmetic_op(self.peek()) || self.check(&Token::Dot)
        {
            return None;
        }
        match inner {
            // `(x)` alone is just a parenthesised expression
            Condition::BooleanExpr(_) => None,
            other => Some(Condition::Paren(Box::new(other))),
        }
    }

    fn parse_comparison(&mut self) -> Result<Condition, ParseError> {
        let left = self.parse_expression()?;
        let op = match self.peek() {
            Token::Greater => ComparisonOp::Greater,
            Token::Less => ComparisonOp::Less,
            Token::GreaterEq => ComparisonOp::GreaterEq,
            Token::LessEq => ComparisonOp::LessEq,
            Token::Equal => ComparisonOp::Equal,
            Token::NotEqual => ComparisonOp::NotEqual,
            _ => return Ok(Condition::BooleanExpr(left)),
        };
        self.advance();
        let right = self.parse_expression()?;
        Ok(Condition::Comparison(left, op, right))
    }

    // ── Expressions ──────────────────────────────────────────────────

    fn parse_expression(&mut self) -> Result<Expression, ParseError> {
        let mut left = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Token::Plus => ArithmeticOp::Add,
                Token::Minus => ArithmeticOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_term()?;
            left = Expression::Arithmetic(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_term(&mut self) -> Result<Expression, ParseError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => ArithmeticOp::Mul,
                Token::Slash => ArithmeticOp::Div,
                Token::Percent => ArithmeticOp::Mod,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_unary()?;
            left = Expression::Arithmetic(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_unary(&mut self) -> Result<Expression, ParseError> {
        if self.check(&Token::Minus) {
            self.advance();
            let inner = self.parse_unary()?;
            return Ok(Expression::UnaryMinus(Box::new(inner)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expression, ParseError> {
        let mut expr = self.parse_primary()?;
        while self.check(&Token::Dot) {
            self.advance();
            let property = self.expect_identifier("after '.'")?;
            expr = Expression::PropertyAccess(Box::new(expr), property);
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expression, ParseError> {
        let expr = match self.peek().clone() {
            Token::Number(n) => Expression::Literal(Literal::Number(n)),
            Token::Percentage(p) => Expression::Literal(Literal::Percent(p)),
            Token::Dollar(d) => Expression::Literal(Literal::Dollar(d)),
            Token::True => Expression::Literal(Literal::Bool(true)),
            Token::False => Expression::Literal(Literal::Bool(false)),
            Token::Identifier(name) => Expression::Identifier(name),
            Token::Asset(asset) => Expression::Asset(asset),
            Token::OptionLeg(spec) => Expression::Option(spec),
            Token::Indicator(spec) => Expression::Indicator(spec),
            Token::CashAvailable => Expression::Query(PortfolioQuery::CashAvailable),
            Token::PortfolioValue => Expression::Query(PortfolioQuery::PortfolioValue),
            Token::PositionQuantity | Token::PositionValue => {
                let is_quantity = self.check(&Token::PositionQuantity);
                self.advance();
                self.expect(Token::LParen)?;
                let target = self.parse_target()?;
                self.expect(Token::RParen)?;
                let query = if is_quantity {
                    PortfolioQuery::PositionQuantity(target)
                } else {
                    PortfolioQuery::PositionValue(target)
                };
                return Ok(Expression::Query(query));
            }
            Token::LParen => {
                self.advance();
                let inner = self.parse_expression()?;
                self.expect(Token::RParen)?;
                return Ok(Expression::Paren(Box::new(inner)));
            }
            Token::Eof => return Err(self.error("Unexpected end of input in expression")),
            other => {
                return Err(self.error(format!("Unexpected token '{}' in expression", other)));
            }
        };
        self.advance();
        Ok(expr)
    }
}

fn is_comparison_op(token: &Token) -> bool {
    matches!(
        token,
        Token::Greater
            | Token::Less
            | Token::GreaterEq
            | Token::LessEq
            | Token::Equal
            | Token::NotEqual
    )
}

fn is_arithmetic_op(token: &Token) -> bool {
    matches!(
        token,
        Token::Plus | Token::Minus | Token::Star | Token::Slash | Token::Percent
    )
}

/// Parse a token stream into a program.
pub fn parse(tokens: Vec<Spanned>) -> Result<Program, ParseError> {
    Parser::new(tokens).parse_program()
}
