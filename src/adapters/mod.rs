//! Concrete adapter implementations for ports.

pub mod black_scholes;
pub mod csv_adapter;
pub mod csv_report_adapter;
pub mod file_config_adapter;
pub mod path_generator;
pub mod technical_indicators;
