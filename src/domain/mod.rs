//! Core domain: the strategy language, the portfolio model and the engine.

pub mod token;
pub mod ast;
pub mod lexer;
pub mod parser;
pub mod types;
pub mod elaborator;
pub mod compiler;
pub mod error;
pub mod position;
pub mod portfolio;
pub mod market;
pub mod execution;
pub mod risk;
pub mod reconciler;
pub mod value;
pub mod interpreter;
pub mod evaluator;
pub mod simulation;
pub mod metrics;
pub mod config_validation;
