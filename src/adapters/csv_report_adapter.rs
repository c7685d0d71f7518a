//! CSV equity-curve report.
//!
//! Columns: run_id, day, date, equity. Reported day 0 is the start date and
//! every later day is labelled with the next weekday.

use std::fs::File;

use chrono::{Datelike, Duration, NaiveDate, Weekday};

use crate::domain::error::StratsimError;
use crate::domain::simulation::SimulationRunResult;
use crate::ports::report_port::ReportPort;

fn next_weekday(date: NaiveDate) -> NaiveDate {
    let mut next = date + Duration::days(1);
    while matches!(next.weekday(), Weekday::Sat | Weekday::Sun) {
        next += Duration::days(1);
    }
    next
}

/// Calendar labels for `days` reported days starting at `start`.
pub fn trading_dates(start: NaiveDate, days: usize) -> Vec<NaiveDate> {
    std::iter::successors(Some(start), |&d| Some(next_weekday(d)))
        .take(days)
        .collect()
}

fn report_error(e: impl std::fmt::Display) -> StratsimError {
    StratsimError::Report {
        reason: e.to_string(),
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CsvReportAdapter;

impl ReportPort for CsvReportAdapter {
    fn write(
        &self,
        results: &[SimulationRunResult],
        start_date: NaiveDate,
        output_path: &str,
    ) -> Result<(), StratsimError> {
        let file = File::create(output_path)?;
        let mut wtr = csv::Writer::from_writer(file);
        wtr.write_record(["run_id", "day", "date", "equity"])
            .map_err(report_error)?;

        let longest = results.iter().map(|r| r.equity_curve.len()).max().unwrap_or(0);
        let dates = trading_dates(start_date, longest);
        for run in results {
            for (day, (equity, date)) in run.equity_curve.iter().zip(&dates).enumerate() {
                wtr.write_record([
                    &run.run_id.to_string(),
                    &day.to_string(),
                    &date.format("%Y-%m-%d").to_string(),
                    &format!("{:.2}", equity),
                ])
                .map_err(report_error)?;
            }
        }
        wtr.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value::EvaluationState;
    use tempfile::TempDir;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn dates_skip_weekends() {
        // 2024-01-05 is a Friday
        let dates = trading_dates(date(2024, 1, 5), 3);
        assert_eq!(dates, vec![date(2024, 1, 5), date(2024, 1, 8), date(2024, 1, 9)]);
        assert!(trading_dates(date(2024, 1, 5), 0).is_empty());
    }

    #[test]
    fn writes_one_row_per_run_day() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("curves.csv");
        let results: Vec<SimulationRunResult> = (0..2)
            .map(|run_id| SimulationRunResult {
                run_id,
                equity_curve: vec![1000.0, 1010.5 + run_id as f64],
                final_state: EvaluationState::new(1000.0, 0.0),
            })
            .collect();

        CsvReportAdapter
            .write(&results, date(2024, 1, 5), path.to_str().unwrap())
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "run_id,day,date,equity");
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[2], "0,1,2024-01-08,1010.50");
        assert_eq!(lines[4], "1,1,2024-01-08,1011.50");
    }

    #[test]
    fn unwritable_path_is_an_error() {
        let result = CsvReportAdapter.write(&[], date(2024, 1, 1), "/nonexistent/dir/out.csv");
        assert!(result.is_err());
    }
}
