//! Strategy source lexer.
//!
//! Converts source text into a token stream, resolving ticker-shaped words
//! against the supplied universe. Word disambiguation order:
//!
//! 1. `<ticker>_<N>dte_<±value><greek>` becomes an option-leg token
//! 2. `<ticker>_<sma|ema|rsi|vol|return|pastprice>[_<period>]` becomes an indicator token
//! 3. a known ticker, optionally with a `_<N>x` / `_minus<N>x` leverage suffix, becomes an asset token
//! 4. otherwise a keyword, otherwise a plain identifier
//!
//! Lexing fails as a whole; there is no partial token stream.

use std::collections::HashSet;

use crate::domain::ast::{AssetReference, GreekType, IndicatorSpec, IndicatorType, OptionSpec};
use crate::domain::error::LexerError;
use crate::domain::token::{Spanned, Token};

const GREEKS: [&str; 5] = ["delta", "gamma", "theta", "vega", "rho"];

struct Lexer<'a> {
    input: &'a str,
    pos: usize,
    tickers: HashSet<String>,
    tokens: Vec<Spanned>,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str, tickers: HashSet<String>) -> Self {
        Self {
            input,
            pos: 0,
            tickers,
            tokens: Vec::new(),
        }
    }

    fn remaining(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        self.remaining().chars().nth(1)
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn push(&mut self, token: Token, position: usize) {
        self.tokens.push(Spanned { token, position });
    }

    fn operand_expected(&self) -> bool {
        self.tokens
            .last()
            .map(|t| !t.token.ends_operand())
            .unwrap_or(true)
    }

    fn error(&self, message: String, position: usize) -> LexerError {
        LexerError { message, position }
    }

    fn run(mut self) -> Result<Vec<Spanned>, LexerError> {
        loop {
            self.skip_whitespace();
            let start = self.pos;
            let Some(ch) = self.peek() else {
                self.push(Token::Eof, start);
                return Ok(self.tokens);
            };

            match ch {
                '(' | ')' | ':' | '.' | '+' | '*' | '/' | '%' => {
                    self.advance();
                    let token = match ch {
                        '(' => Token::LParen,
                        ')' => Token::RParen,
                        ':' => Token::Colon,
                        '.' => Token::Dot,
                        '+' => Token::Plus,
                        '*' => Token::Star,
                        '/' => Token::Slash,
                        _ => Token::Percent,
                    };
                    self.push(token, start);
                }
                '>' | '<' | '=' | '!' => self.lex_comparison(ch, start)?,
                '$' => {
                    self.advance();
                    let digits = self.read_number_text();
                    if digits.is_empty() {
                        return Err(self.error("Expected digits after '$'".into(), start));
                    }
                    let value = self.parse_float(&digits, start)?;
                    self.push(Token::Dollar(value), start);
                }
                '-' => {
                    let negative_literal = self
                        .peek_second()
                        .map(|c| c.is_ascii_digit())
                        .unwrap_or(false)
                        && self.operand_expected();
                    self.advance();
                    if negative_literal {
                        self.lex_number(start, true)?;
                    } else {
                        self.push(Token::Minus, start);
                    }
                }
                c if c.is_ascii_digit() => self.lex_number(start, false)?,
                c if c.is_ascii_alphabetic() => {
                    let word = self.read_word();
                    let token = self.classify(&word);
                    self.push(token, start);
                }
                other => {
                    return Err(self.error(format!("Unrecognized character: '{}'", other), start));
                }
            }
        }
    }

    fn lex_comparison(&mut self, first: char, start: usize) -> Result<(), LexerError> {
        self.advance();
        let followed_by_eq = self.peek() == Some('=');
        let token = match (first, followed_by_eq) {
            ('>', true) => Token::GreaterEq,
            ('>', false) => Token::Greater,
            ('<', true) => Token::LessEq,
            ('<', false) => Token::Less,
            ('=', true) => Token::Equal,
            ('!', true) => Token::NotEqual,
            (other, _) => {
                return Err(self.error(format!("Unrecognized character: '{}'", other), start));
            }
        };
        if followed_by_eq {
            self.advance();
        }
        self.push(token, start);
        Ok(())
    }

    fn read_number_text(&mut self) -> String {
        let mut text = String::new();
        let mut seen_dot = false;
        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() {
                text.push(ch);
                self.advance();
            } else if ch == '.'
                && !seen_dot
                && self.peek_second().map(|c| c.is_ascii_digit()).unwrap_or(false)
            {
                seen_dot = true;
                text.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        text
    }

    fn parse_float(&self, text: &str, start: usize) -> Result<f64, LexerError> {
        text.parse::<f64>()
            .map_err(|_| self.error(format!("invalid number '{}'", text), start))
    }

    fn lex_number(&mut self, start: usize, negative: bool) -> Result<(), LexerError> {
        let text = self.read_number_text();
        let magnitude = self.parse_float(&text, start)?;
        let value = if negative { -magnitude } else { magnitude };
        if self.peek() == Some('%') {
            self.advance();
            self.push(Token::Percentage(value), start);
        } else {
            self.push(Token::Number(value), start);
        }
        Ok(())
    }

    /// Letters, digits and `_`; a `-` may follow `_` and a `.` may sit
    /// between digits so that `spy_30dte_-20.5delta` stays one word.
    fn read_word(&mut self) -> String {
        let mut word = String::new();
        while let Some(ch) = self.peek() {
            let next_is_digit = self
                .peek_second()
                .map(|c| c.is_ascii_digit())
                .unwrap_or(false);
            let accept = ch.is_ascii_alphanumeric()
                || ch == '_'
                || (ch == '-' && word.ends_with('_') && next_is_digit)
                || (ch == '.'
                    && word.chars().last().map(|c| c.is_ascii_digit()).unwrap_or(false)
                    && next_is_digit);
            if !accept {
                break;
            }
            word.push(ch);
            self.advance();
        }
        word
    }

    fn classify(&self, word: &str) -> Token {
        if let Some(spec) = parse_option_leg(word, &self.tickers) {
            return Token::OptionLeg(spec);
        }
        if let Some(spec) = parse_indicator(word, &self.tickers) {
            return Token::Indicator(spec);
        }
        if let Some(asset) = parse_asset_reference(word)
            && self.tickers.contains(asset.ticker())
        {
            return Token::Asset(asset);
        }
        Token::keyword(word).unwrap_or_else(|| Token::Identifier(word.to_string()))
    }
}

/// Split an optional leverage suffix off a ticker-shaped word.
///
/// `spy_3x` is `spy` at 3x, `qqq_minus2x` is `qqq` at -2x, and a 1x suffix
/// collapses to the plain asset. Returns `None` for words that cannot name
/// an asset at all.
pub fn parse_asset_reference(word: &str) -> Option<AssetReference> {
    let lower = word.to_ascii_lowercase();
    if lower.is_empty() || lower.contains('-') || lower.contains('.') {
        return None;
    }
    if let Some((base, suffix)) = lower.rsplit_once('_')
        && let Some(factor) = suffix.strip_suffix('x')
        && !base.is_empty()
    {
        let leverage = match factor.strip_prefix("minus") {
            Some(rest) => rest.parse::<f64>().ok().map(|v| -v),
            None => factor.parse::<f64>().ok(),
        };
        if let Some(leverage) = leverage {
            if factor.chars().all(|c| c.is_ascii_alphanumeric()) {
                if leverage == 1.0 {
                    return Some(AssetReference::Simple(base.to_string()));
                }
                return Some(AssetReference::Leveraged {
                    ticker: base.to_string(),
                    leverage,
                });
            }
        }
    }
    Some(AssetReference::Simple(lower))
}

fn parse_option_leg(word: &str, tickers: &HashSet<String>) -> Option<OptionSpec> {
    let lower = word.to_ascii_lowercase();
    let greek_name = GREEKS.iter().find(|g| lower.ends_with(*g))?;
    let greek = GreekType::from_name(greek_name)?;
    let body = &lower[..lower.len() - greek_name.len()];

    let idx = body.rfind("dte_")?;
    let (head, tail) = (&body[..idx], &body[idx + 4..]);

    let (sign, magnitude) = match tail.strip_prefix("minus") {
        Some(rest) => (-1.0, rest),
        None => match tail.strip_prefix('-') {
            Some(rest) => (-1.0, rest),
            None => (1.0, tail),
        },
    };
    if magnitude.is_empty() || !magnitude.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return None;
    }
    let raw: f64 = magnitude.parse().ok()?;

    let (underlying, dte) = head.rsplit_once('_')?;
    if dte.is_empty() || !dte.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let dte: u32 = dte.parse().ok()?;
    let underlying = parse_asset_reference(underlying)?;
    if !tickers.contains(underlying.ticker()) {
        return None;
    }

    Some(OptionSpec {
        underlying,
        dte,
        greek,
        value: sign * raw / 100.0,
    })
}

fn parse_indicator(word: &str, tickers: &HashSet<String>) -> Option<IndicatorSpec> {
    let lower = word.to_ascii_lowercase();
    let parts: Vec<&str> = lower.split('_').collect();
    let (asset, kind, period) = match parts.as_slice() {
        [asset, kind] => (*asset, *kind, None),
        [asset, kind, period] => (*asset, *kind, Some(*period)),
        _ => return None,
    };
    if asset.is_empty() || !asset.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    if !tickers.contains(asset) {
        return None;
    }
    let kind = IndicatorType::from_name(kind)?;
    let period = match period {
        Some(p) if !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()) => {
            Some(p.parse::<usize>().ok()?)
        }
        Some(_) => return None,
        None => None,
    };
    Some(IndicatorSpec {
        asset: asset.to_string(),
        kind,
        period,
    })
}

/// Lex `source` against the given ticker universe (case-insensitive).
pub fn lex<T: AsRef<str>>(valid_tickers: &[T], source: &str) -> Result<Vec<Spanned>, LexerError> {
    let tickers = valid_tickers
        .iter()
        .map(|t| t.as_ref().trim().to_ascii_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    Lexer::new(source, tickers).run()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(tickers: &[&str], source: &str) -> Vec<Token> {
        lex(tickers, source)
            .unwrap()
            .into_iter()
            .map(|s| s.token)
            .collect()
    }

    #[test]
    fn option_leg_token() {
        let toks = tokens(&["aapl"], "aapl_30dte_70delta");
        assert_eq!(toks.len(), 2);
        match &toks[0] {
            Token::OptionLeg(spec) => {
                assert_eq!(spec.underlying, AssetReference::Simple("aapl".into()));
                assert_eq!(spec.dte, 30);
                assert_eq!(spec.greek, GreekType::Delta);
                assert!((spec.value - 0.70).abs() < 1e-12);
            }
            other => panic!("expected option leg, got {:?}", other),
        }
        assert_eq!(toks[1], Token::Eof);
    }

    #[test]
    fn option_leg_negative_values() {
        for source in ["spy_45dte_minus20delta", "SPY_45DTE_-20DELTA"] {
            match &tokens(&["spy"], source)[0] {
                Token::OptionLeg(spec) => {
                    assert_eq!(spec.dte, 45);
                    assert!((spec.value + 0.20).abs() < 1e-12);
                }
                other => panic!("expected option leg, got {:?}", other),
            }
        }
    }

    #[test]
    fn option_leg_on_leveraged_underlying() {
        match &tokens(&["spy"], "spy_3x_10dte_5.5gamma")[0] {
            Token::OptionLeg(spec) => {
                assert_eq!(spec.greek, GreekType::Gamma);
                assert_eq!(spec.underlying.leverage(), 3.0);
                assert!((spec.value - 0.055).abs() < 1e-12);
            }
            other => panic!("expected option leg, got {:?}", other),
        }
    }

    #[test]
    fn option_leg_unknown_underlying_is_identifier() {
        let toks = tokens(&["spy"], "tsla_30dte_50delta");
        assert_eq!(toks[0], Token::Identifier("tsla_30dte_50delta".into()));
    }

    #[test]
    fn indicator_tokens() {
        let toks = tokens(&["spy"], "spy_sma_50 spy_rsi");
        assert_eq!(
            toks[0],
            Token::Indicator(IndicatorSpec {
                asset: "spy".into(),
                kind: IndicatorType::Sma,
                period: Some(50),
            })
        );
        assert_eq!(
            toks[1],
            Token::Indicator(IndicatorSpec {
                asset: "spy".into(),
                kind: IndicatorType::Rsi,
                period: None,
            })
        );
    }

    #[test]
    fn asset_and_leverage_tokens() {
        let toks = tokens(&["spy", "qqq"], "spy SPY_3x qqq_minus2x spy_1x");
        assert_eq!(toks[0], Token::Asset(AssetReference::Simple("spy".into())));
        assert_eq!(
            toks[1],
            Token::Asset(AssetReference::Leveraged {
                ticker: "spy".into(),
                leverage: 3.0
            })
        );
        assert_eq!(
            toks[2],
            Token::Asset(AssetReference::Leveraged {
                ticker: "qqq".into(),
                leverage: -2.0
            })
        );
        assert_eq!(toks[3], Token::Asset(AssetReference::Simple("spy".into())));
    }

    #[test]
    fn keywords_are_case_insensitive() {
        let toks = tokens(&[], "WHEN Buy_Max END");
        assert_eq!(toks, vec![Token::When, Token::BuyMax, Token::End, Token::Eof]);
    }

    #[test]
    fn unknown_words_are_identifiers() {
        let toks = tokens(&["spy"], "my_straddle spyder");
        assert_eq!(toks[0], Token::Identifier("my_straddle".into()));
        assert_eq!(toks[1], Token::Identifier("spyder".into()));
    }

    #[test]
    fn literal_kinds() {
        let toks = tokens(&[], "50% $1000 2.5");
        assert_eq!(toks[0], Token::Percentage(50.0));
        assert_eq!(toks[1], Token::Dollar(1000.0));
        assert_eq!(toks[2], Token::Number(2.5));
    }

    #[test]
    fn minus_is_operator_after_operand() {
        let toks = tokens(&[], "x-1 * -2");
        assert_eq!(
            toks,
            vec![
                Token::Identifier("x".into()),
                Token::Minus,
                Token::Number(1.0),
                Token::Star,
                Token::Number(-2.0),
                Token::Eof
            ]
        );
    }

    #[test]
    fn property_access_after_digit_identifier() {
        let toks = tokens(&[], "p1.quantity");
        assert_eq!(
            toks,
            vec![
                Token::Identifier("p1".into()),
                Token::Dot,
                Token::Identifier("quantity".into()),
                Token::Eof
            ]
        );
    }

    #[test]
    fn comparison_operators() {
        let toks = tokens(&[], ">= <= == != > <");
        assert_eq!(
            &toks[..6],
            &[
                Token::GreaterEq,
                Token::LessEq,
                Token::Equal,
                Token::NotEqual,
                Token::Greater,
                Token::Less
            ]
        );
    }

    #[test]
    fn dollar_without_digits_is_error() {
        let err = lex(&["spy"], "buy $ spy").unwrap_err();
        assert_eq!(err.message, "Expected digits after '$'");
        assert_eq!(err.position, 4);
    }

    #[test]
    fn unrecognized_character_is_error() {
        let err = lex::<&str>(&[], "buy 1 spy # comment").unwrap_err();
        assert_eq!(err.message, "Unrecognized character: '#'");
        let err = lex::<&str>(&[], "a = b").unwrap_err();
        assert!(err.message.contains("'='"));
    }

    #[test]
    fn positions_are_byte_offsets() {
        let spanned = lex(&["spy"], "buy  10 spy").unwrap();
        let positions: Vec<usize> = spanned.iter().map(|s| s.position).collect();
        assert_eq!(positions, vec![0, 5, 8, 11]);
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn lexing_never_panics(source in "[ -~\\n]{0,64}") {
                let _ = lex(&["spy", "aapl"], &source);
            }

            #[test]
            fn successful_lex_ends_with_eof(source in "[a-z_0-9 ()+*/<>:.]{0,48}") {
                if let Ok(tokens) = lex(&["spy"], &source) {
                    prop_assert_eq!(&tokens.last().unwrap().token, &Token::Eof);
                }
            }
        }
    }
}
