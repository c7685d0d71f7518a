//! stratsim: Monte-Carlo simulation of strategies written in a small
//! trading language.
//!
//! Hexagonal architecture: the language and engine live in [`domain`], the
//! collaborator traits in [`ports`], concrete implementations in [`adapters`].

pub mod domain;
pub mod ports;
pub mod adapters;
pub mod cli;
