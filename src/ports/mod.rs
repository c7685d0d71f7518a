//! Port traits for the collaborators the engine consumes.

pub mod config_port;
pub mod data_port;
pub mod indicator_port;
pub mod path_port;
pub mod pricer_port;
pub mod report_port;
