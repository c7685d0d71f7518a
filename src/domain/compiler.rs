//! Source to executable program: lex, parse, elaborate, measure look-back.

use tracing::info;

use super::ast::{AssetReference, Program};
use super::elaborator::{elaborate, max_lookback};
use super::error::CompileError;
use super::lexer::lex;
use super::parser::parse;
use super::token::Token;

/// Extra history kept beyond the longest look-back.
pub const WARMUP_PADDING_DAYS: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledProgram {
    pub program: Program,
    /// Longest indicator look-back, in days.
    pub lookback: usize,
    /// Leveraged assets the program trades or prices, each listed once.
    pub leveraged_assets: Vec<AssetReference>,
}

impl CompiledProgram {
    /// Days simulated before reported day 0.
    pub fn warmup_days(&self) -> usize {
        if self.lookback > 0 {
            self.lookback + WARMUP_PADDING_DAYS
        } else {
            0
        }
    }
}

pub fn compile<T: AsRef<str>>(source: &str, valid_tickers: &[T]) -> Result<CompiledProgram, CompileError> {
    let tokens = lex(valid_tickers, source)?;

    let mut leveraged_assets: Vec<AssetReference> = Vec::new();
    for spanned in &tokens {
        let asset = match &spanned.token {
            Token::Asset(asset) => asset,
            Token::OptionLeg(spec) => &spec.underlying,
            _ => continue,
        };
        if matches!(asset, AssetReference::Leveraged { .. }) && !leveraged_assets.contains(asset) {
            leveraged_assets.push(asset.clone());
        }
    }

    let program = elaborate(parse(tokens)?)?;
    let lookback = max_lookback(&program);
    info!(
        statements = program.statements.len(),
        lookback,
        leveraged = leveraged_assets.len(),
        "strategy compiled"
    );
    Ok(CompiledProgram {
        program,
        lookback,
        leveraged_assets,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_and_measures_lookback() {
        let compiled = compile("when spy_sma_50 > spy: buy 1 spy end", &["spy"]).unwrap();
        assert_eq!(compiled.program.statements.len(), 1);
        assert_eq!(compiled.lookback, 50);
        assert_eq!(compiled.warmup_days(), 60);
    }

    #[test]
    fn no_indicators_means_no_warmup() {
        let compiled = compile("buy 1 spy", &["spy"]).unwrap();
        assert_eq!(compiled.warmup_days(), 0);
    }

    #[test]
    fn collects_leveraged_assets_once() {
        let compiled = compile(
            "buy 1 spy_3x\nsell 1 spy_3x\ndefine h as: buy 1 qqq_minus2x_30dte_50delta",
            &["spy", "qqq"],
        )
        .unwrap();
        assert_eq!(
            compiled.leveraged_assets,
            vec![
                AssetReference::Leveraged {
                    ticker: "spy".into(),
                    leverage: 3.0
                },
                AssetReference::Leveraged {
                    ticker: "qqq".into(),
                    leverage: -2.0
                },
            ]
        );
    }

    #[test]
    fn errors_are_tagged_by_stage() {
        assert!(matches!(compile("buy 1 $", &["spy"]), Err(CompileError::Lexer(_))));
        assert!(matches!(compile("when true: buy 1 spy", &["spy"]), Err(CompileError::Parser(_))));
        assert!(matches!(compile("buy 1 nope", &["spy"]), Err(CompileError::Elaboration(_))));
    }
}
