//! CSV sink — one flat file per instrument, the legacy layout.

use std::fs;
use std::path::PathBuf;

use crate::domain::Candle;
use crate::instruments::Instrument;

use super::{CandleSink, StoreError};

/// Writes `{output_dir}/{SYMBOL}/{SYMBOL}_historical.csv` with the header
/// `timestamp,date,open,high,low,close,volume`. Writes are atomic: a temp
/// file is renamed into place.
pub struct CsvStore {
    output_dir: PathBuf,
}

impl CsvStore {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    fn file_path(&self, symbol: &str) -> PathBuf {
        self.output_dir
            .join(symbol)
            .join(format!("{symbol}_historical.csv"))
    }
}

impl CandleSink for CsvStore {
    fn name(&self) -> &str {
        "csv"
    }

    fn store(&self, instrument: &Instrument, candles: &[Candle]) -> Result<(), StoreError> {
        let path = self.file_path(&instrument.tradingsymbol);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let tmp_path = path.with_extension("csv.tmp");
        let mut writer = ::csv::Writer::from_path(&tmp_path)
            .map_err(|e| StoreError::Csv(e.to_string()))?;

        writer
            .write_record(["timestamp", "date", "open", "high", "low", "close", "volume"])
            .map_err(|e| StoreError::Csv(e.to_string()))?;

        for candle in candles {
            writer
                .write_record([
                    candle.timestamp.and_utc().timestamp().to_string(),
                    candle.timestamp.format("%Y-%m-%d").to_string(),
                    format!("{:.2}", candle.open),
                    format!("{:.2}", candle.high),
                    format!("{:.2}", candle.low),
                    format!("{:.2}", candle.close),
                    candle.volume.to_string(),
                ])
                .map_err(|e| StoreError::Csv(e.to_string()))?;
        }
        writer.flush()?;
        drop(writer);

        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            StoreError::Io(e)
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample_candles() -> Vec<Candle> {
        vec![
            Candle {
                timestamp: NaiveDate::from_ymd_opt(2023, 1, 2)
                    .unwrap()
                    .and_hms_opt(9, 15, 0)
                    .unwrap(),
                open: 100.456,
                high: 101.0,
                low: 99.5,
                close: 100.9,
                volume: 125000,
            },
            Candle {
                timestamp: NaiveDate::from_ymd_opt(2023, 1, 2)
                    .unwrap()
                    .and_hms_opt(9, 16, 0)
                    .unwrap(),
                open: 100.9,
                high: 101.2,
                low: 100.7,
                close: 101.1,
                volume: 98000,
            },
        ]
    }

    fn infy() -> Instrument {
        Instrument {
            instrument_token: 408065,
            tradingsymbol: "INFY".to_string(),
            exchange: "NSE".to_string(),
            ..Instrument::default()
        }
    }

    #[test]
    fn writes_header_and_formatted_rows() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvStore::new(dir.path());

        store.store(&infy(), &sample_candles()).unwrap();

        let content =
            fs::read_to_string(dir.path().join("INFY").join("INFY_historical.csv")).unwrap();
        let mut lines = content.lines();
        assert_eq!(
            lines.next().unwrap(),
            "timestamp,date,open,high,low,close,volume"
        );
        let first = lines.next().unwrap();
        assert!(first.ends_with(",2023-01-02,100.46,101.00,99.50,100.90,125000"));
        assert_eq!(lines.count(), 1);
    }

    #[test]
    fn overwrites_previous_output_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvStore::new(dir.path());

        store.store(&infy(), &sample_candles()).unwrap();
        store.store(&infy(), &sample_candles()[..1]).unwrap();

        let content =
            fs::read_to_string(dir.path().join("INFY").join("INFY_historical.csv")).unwrap();
        assert_eq!(content.lines().count(), 2); // header + one row
        assert!(!dir
            .path()
            .join("INFY")
            .join("INFY_historical.csv.tmp")
            .exists());
    }
}
