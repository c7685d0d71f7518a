//! CSV historical price adapter.
//!
//! One file per ticker, `<dir>/<ticker>.csv`, with a header row and
//! `date,price[,vol]` columns. When the volatility column is absent every
//! point carries the annualised volatility of the file's log returns.

use crate::domain::error::StratsimError;
use crate::domain::market::MarketDataPoint;
use crate::ports::data_port::{DatedPoint, HistoricalDataPort};
use chrono::NaiveDate;
use std::fs;
use std::path::PathBuf;

const ANNUALISATION_DAYS: f64 = 252.0;

fn data_error(reason: impl Into<String>) -> StratsimError {
    StratsimError::Data {
        reason: reason.into(),
    }
}

pub struct CsvAdapter {
    base_path: PathBuf,
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn csv_path(&self, ticker: &str) -> PathBuf {
        self.base_path
            .join(format!("{}.csv", ticker.to_ascii_lowercase()))
    }

    fn parse_column(record: &csv::StringRecord, idx: usize, name: &str) -> Result<f64, StratsimError> {
        record
            .get(idx)
            .ok_or_else(|| data_error(format!("missing {} column", name)))?
            .trim()
            .parse()
            .map_err(|e| data_error(format!("invalid {} value: {}", name, e)))
    }
}

fn realised_volatility(prices: &[f64]) -> f64 {
    let returns: Vec<f64> = prices
        .windows(2)
        .filter(|w| w[0] > 0.0 && w[1] > 0.0)
        .map(|w| (w[1] / w[0]).ln())
        .collect();
    if returns.len() < 2 {
        return 0.0;
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    variance.sqrt() * ANNUALISATION_DAYS.sqrt()
}

impl HistoricalDataPort for CsvAdapter {
    fn load_prices(&self, ticker: &str) -> Result<Vec<DatedPoint>, StratsimError> {
        let path = self.csv_path(ticker);
        let content = fs::read_to_string(&path)
            .map_err(|e| data_error(format!("failed to read {}: {}", path.display(), e)))?;

        let mut rdr = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(content.as_bytes());
        let mut rows: Vec<(NaiveDate, f64, Option<f64>)> = Vec::new();

        for result in rdr.records() {
            let record = result.map_err(|e| data_error(format!("CSV parse error: {}", e)))?;

            let date_str = record
                .get(0)
                .ok_or_else(|| data_error("missing date column"))?;
            let date = NaiveDate::parse_from_str(date_str.trim(), "%Y-%m-%d")
                .map_err(|e| data_error(format!("invalid date format: {}", e)))?;

            let price = Self::parse_column(&record, 1, "price")?;
            if price <= 0.0 {
                return Err(data_error(format!("non-positive price on {} in {}", date, path.display())));
            }
            let volatility = match record.get(2) {
                Some(raw) if !raw.trim().is_empty() => Some(Self::parse_column(&record, 2, "vol")?),
                _ => None,
            };
            rows.push((date, price, volatility));
        }

        rows.sort_by_key(|(date, _, _)| *date);
        let prices: Vec<f64> = rows.iter().map(|(_, price, _)| *price).collect();
        let fallback = realised_volatility(&prices);

        Ok(rows
            .into_iter()
            .map(|(date, price, volatility)| DatedPoint {
                date,
                point: MarketDataPoint {
                    price,
                    volatility: volatility.unwrap_or(fallback),
                },
            })
            .collect())
    }

    fn list_tickers(&self) -> Result<Vec<String>, StratsimError> {
        let entries = fs::read_dir(&self.base_path).map_err(|e| {
            data_error(format!(
                "failed to read directory {}: {}",
                self.base_path.display(),
                e
            ))
        })?;

        let mut tickers = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| data_error(format!("directory entry error: {}", e)))?;
            let name = entry.file_name();
            let name_str = name.to_string_lossy();
            if let Some(ticker) = name_str.strip_suffix(".csv") {
                tickers.push(ticker.to_ascii_lowercase());
            }
        }

        tickers.sort();
        Ok(tickers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tempfile::TempDir;

    fn setup_test_data() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().to_path_buf();

        fs::write(
            path.join("spy.csv"),
            "date,price,vol\n\
             2024-01-16,470.0,0.15\n\
             2024-01-15,465.0,0.14\n\
             2024-01-17,472.5,0.16\n",
        )
        .unwrap();
        fs::write(path.join("qqq.csv"), "date,price\n2024-01-15,100.0\n2024-01-16,110.0\n2024-01-17,100.0\n")
            .unwrap();
        fs::write(path.join("notes.txt"), "not prices").unwrap();

        (dir, path)
    }

    #[test]
    fn load_prices_sorts_by_date() {
        let (_dir, path) = setup_test_data();
        let points = CsvAdapter::new(path).load_prices("SPY").unwrap();

        assert_eq!(points.len(), 3);
        assert_eq!(points[0].date, NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
        assert_eq!(points[0].point.price, 465.0);
        assert_eq!(points[0].point.volatility, 0.14);
        assert_eq!(points[2].point.price, 472.5);
    }

    #[test]
    fn missing_volatility_uses_realised() {
        let (_dir, path) = setup_test_data();
        let points = CsvAdapter::new(path).load_prices("qqq").unwrap();
        let up = 1.1_f64.ln();
        let expected = (2.0 * up * up).sqrt() * 252.0_f64.sqrt();
        assert!(points.iter().all(|p| (p.point.volatility - expected).abs() < 1e-12));
        assert_relative_eq!(points[1].point.price, 110.0);
    }

    #[test]
    fn missing_file_is_a_data_error() {
        let (_dir, path) = setup_test_data();
        let result = CsvAdapter::new(path).load_prices("iwm");
        assert!(matches!(result, Err(StratsimError::Data { .. })));
    }

    #[test]
    fn rejects_bad_rows() {
        let (_dir, path) = setup_test_data();
        fs::write(path.join("bad.csv"), "date,price\n2024/01/15,100.0\n").unwrap();
        fs::write(path.join("neg.csv"), "date,price\n2024-01-15,-1.0\n").unwrap();
        let adapter = CsvAdapter::new(path);
        assert!(adapter.load_prices("bad").is_err());
        assert!(adapter.load_prices("neg").is_err());
    }

    #[test]
    fn list_tickers_returns_csv_files() {
        let (_dir, path) = setup_test_data();
        let tickers = CsvAdapter::new(path).list_tickers().unwrap();
        assert_eq!(tickers, vec!["qqq", "spy"]);
    }
}
