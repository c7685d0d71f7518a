//! Report output port.

use chrono::NaiveDate;

use crate::domain::error::StratsimError;
use crate::domain::simulation::SimulationRunResult;

/// Port for writing simulation results.
pub trait ReportPort {
    /// Write every run's equity curve; reported day 0 falls on `start_date`.
    fn write(
        &self,
        results: &[SimulationRunResult],
        start_date: NaiveDate,
        output_path: &str,
    ) -> Result<(), StratsimError>;
}
