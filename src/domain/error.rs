//! Domain error types.
//!
//! Compilation errors are fatal and carry a byte offset into the source.
//! Interpreter errors are fatal to one iteration only; risk rejections and
//! ruin are not errors at all and never appear here.

fn caret_context(input: &str, position: usize) -> (String, String) {
    let position = position.min(input.len());
    let line_start = input[..position].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let line_end = input[position..]
        .find('\n')
        .map(|i| position + i)
        .unwrap_or(input.len());
    let column = input[line_start..position].chars().count();
    (
        input[line_start..line_end].to_string(),
        " ".repeat(column) + "^",
    )
}

/// A lexing failure; lexing never yields a partial token stream.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("lexer error at position {position}: {message}")]
pub struct LexerError {
    pub message: String,
    pub position: usize,
}

impl LexerError {
    /// Format the error with a caret pointing at the offending character.
    pub fn display_with_context(&self, input: &str) -> String {
        let (line, caret) = caret_context(input, self.position);
        format!("{line}\n{caret}\n{self}")
    }
}

/// A parse error with position information.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("parse error at position {position}: {message}")]
pub struct ParseError {
    pub message: String,
    pub position: usize,
}

impl ParseError {
    /// Format the error with a caret pointing at the error position in the input.
    pub fn display_with_context(&self, input: &str) -> String {
        let (line, caret) = caret_context(input, self.position);
        format!("{line}\n{caret}\n{self}")
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("elaboration error: {message}")]
pub struct ElaborationError {
    pub message: String,
}

impl ElaborationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Any failure of `compile`, tagged by the stage that produced it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    #[error(transparent)]
    Lexer(#[from] LexerError),

    #[error(transparent)]
    Parser(#[from] ParseError),

    #[error(transparent)]
    Elaboration(#[from] ElaborationError),
}

impl CompileError {
    pub fn message(&self) -> &str {
        match self {
            CompileError::Lexer(e) => &e.message,
            CompileError::Parser(e) => &e.message,
            CompileError::Elaboration(e) => &e.message,
        }
    }

    /// Render with source context where a position is known.
    pub fn display_with_context(&self, source: &str) -> String {
        match self {
            CompileError::Lexer(e) => e.display_with_context(source),
            CompileError::Parser(e) => e.display_with_context(source),
            CompileError::Elaboration(e) => e.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("runtime error: {message}")]
pub struct InterpreterError {
    pub message: String,
}

impl InterpreterError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Why a trade set was not committed. Only `Market` is fatal.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RiskValidationError {
    #[error("insufficient buying power: {buying_power:.2} after trades")]
    InsufficientBuyingPower { buying_power: f64 },

    #[error(transparent)]
    Market(#[from] InterpreterError),
}

/// Failure of a single simulated iteration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SimulationError {
    #[error(transparent)]
    Interpreter(#[from] InterpreterError),

    #[error("price path error: {reason}")]
    PricePath { reason: String },
}

/// A failed iteration, reported alongside the successful ones.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("iteration {run_id} failed: {source}")]
pub struct IterationError {
    pub run_id: usize,
    pub source: SimulationError,
}

/// Top-level error type for stratsim.
#[derive(Debug, thiserror::Error)]
pub enum StratsimError {
    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("data error: {reason}")]
    Data { reason: String },

    #[error("report error: {reason}")]
    Report { reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<&StratsimError> for std::process::ExitCode {
    fn from(err: &StratsimError) -> Self {
        let code: u8 = match err {
            StratsimError::Io(_) | StratsimError::Report { .. } => 1,
            StratsimError::ConfigParse { .. }
            | StratsimError::ConfigMissing { .. }
            | StratsimError::ConfigInvalid { .. } => 2,
            StratsimError::Data { .. } => 3,
            StratsimError::Compile(_) => 4,
        };
        std::process::ExitCode::from(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_caret_points_at_position() {
        let err = ParseError {
            message: "unexpected token".into(),
            position: 4,
        };
        let rendered = err.display_with_context("buy x y");
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "buy x y");
        assert_eq!(lines[1], "    ^");
        assert!(lines[2].contains("unexpected token"));
    }

    #[test]
    fn caret_context_uses_offending_line_only() {
        let source = "define a as 1\nset a to $\n";
        let err = LexerError {
            message: "Expected digits after '$'".into(),
            position: source.find('$').unwrap(),
        };
        let rendered = err.display_with_context(source);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "set a to $");
        assert_eq!(lines[1], "         ^");
    }

    #[test]
    fn compile_error_reports_origin() {
        let err: CompileError = ElaborationError::new("Unbound identifier 'x'.").into();
        assert_eq!(err.message(), "Unbound identifier 'x'.");
        assert!(err.to_string().starts_with("elaboration error"));
    }

    #[test]
    fn exit_codes_by_category() {
        use std::process::ExitCode;
        let compile = StratsimError::Compile(CompileError::Parser(ParseError {
            message: "x".into(),
            position: 0,
        }));
        assert_eq!(ExitCode::from(&compile), ExitCode::from(4));
        let missing = StratsimError::ConfigMissing {
            section: "simulation".into(),
            key: "tickers".into(),
        };
        assert_eq!(ExitCode::from(&missing), ExitCode::from(2));
    }
}
