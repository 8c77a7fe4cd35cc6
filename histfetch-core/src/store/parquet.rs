//! Parquet sink — month-partitioned files per instrument with a metadata
//! sidecar, written atomically.
//!
//! Layout: `{output_dir}/{SYMBOL}/{SYMBOL}_{YYYY-MM}.parquet` plus
//! `{output_dir}/{SYMBOL}/meta.json`.

use chrono::{Datelike, NaiveDateTime};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::Candle;
use crate::instruments::Instrument;

use super::{CandleSink, StoreError};

/// Sidecar describing what is stored for a symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreMeta {
    pub symbol: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub candle_count: usize,
    pub data_hash: String,
    pub written_at: NaiveDateTime,
}

/// The Parquet sink.
pub struct ParquetStore {
    output_dir: PathBuf,
}

impl ParquetStore {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    fn symbol_dir(&self, symbol: &str) -> PathBuf {
        self.output_dir.join(symbol)
    }

    fn month_path(&self, symbol: &str, year: i32, month: u32) -> PathBuf {
        self.symbol_dir(symbol)
            .join(format!("{symbol}_{year:04}-{month:02}.parquet"))
    }

    /// Load every parquet partition for a symbol, ascending by timestamp.
    pub fn load(&self, symbol: &str) -> Result<Vec<Candle>, StoreError> {
        let dir = self.symbol_dir(symbol);
        let mut candles = Vec::new();

        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("parquet") {
                continue;
            }
            candles.extend(read_parquet(&path)?);
        }

        candles.sort_by_key(|c| c.timestamp);
        Ok(candles)
    }

    /// Read the metadata sidecar for a symbol, if present and parseable.
    pub fn meta(&self, symbol: &str) -> Option<StoreMeta> {
        let content = fs::read_to_string(self.symbol_dir(symbol).join("meta.json")).ok()?;
        serde_json::from_str(&content).ok()
    }
}

impl CandleSink for ParquetStore {
    fn name(&self) -> &str {
        "parquet"
    }

    fn store(&self, instrument: &Instrument, candles: &[Candle]) -> Result<(), StoreError> {
        if candles.is_empty() {
            return Ok(());
        }
        let symbol = &instrument.tradingsymbol;
        let dir = self.symbol_dir(symbol);
        fs::create_dir_all(&dir)?;

        // One file per calendar month: keeps files small and queries cheap.
        let mut by_month: BTreeMap<(i32, u32), Vec<&Candle>> = BTreeMap::new();
        for candle in candles {
            by_month
                .entry((candle.timestamp.year(), candle.timestamp.month()))
                .or_default()
                .push(candle);
        }

        for ((year, month), month_candles) in &by_month {
            let df = candles_to_dataframe(symbol, month_candles)?;
            let path = self.month_path(symbol, *year, *month);
            let tmp_path = path.with_extension("parquet.tmp");

            write_parquet(&df, &tmp_path)?;
            fs::rename(&tmp_path, &path).map_err(|e| {
                let _ = fs::remove_file(&tmp_path);
                StoreError::Io(e)
            })?;
        }

        let meta = StoreMeta {
            symbol: symbol.clone(),
            start: candles.first().unwrap().timestamp,
            end: candles.last().unwrap().timestamp,
            candle_count: candles.len(),
            data_hash: blake3::hash(
                &serde_json::to_vec(candles)
                    .map_err(|e| StoreError::Metadata(format!("hash serialization: {e}")))?,
            )
            .to_hex()
            .to_string(),
            written_at: chrono::Local::now().naive_local(),
        };
        let meta_json = serde_json::to_string_pretty(&meta)
            .map_err(|e| StoreError::Metadata(format!("meta serialization: {e}")))?;
        fs::write(dir.join("meta.json"), meta_json)?;

        Ok(())
    }
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

fn candles_to_dataframe(symbol: &str, candles: &[&Candle]) -> Result<DataFrame, StoreError> {
    let symbols: Vec<String> = vec![symbol.to_string(); candles.len()];
    let timestamps: Vec<i64> = candles
        .iter()
        .map(|c| c.timestamp.and_utc().timestamp())
        .collect();
    let dates: Vec<String> = candles
        .iter()
        .map(|c| c.timestamp.format("%Y-%m-%d").to_string())
        .collect();
    let opens: Vec<f64> = candles.iter().map(|c| c.open).collect();
    let highs: Vec<f64> = candles.iter().map(|c| c.high).collect();
    let lows: Vec<f64> = candles.iter().map(|c| c.low).collect();
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let volumes: Vec<i64> = candles.iter().map(|c| c.volume).collect();

    DataFrame::new(vec![
        Column::new("symbol".into(), symbols),
        Column::new("timestamp".into(), timestamps),
        Column::new("date".into(), dates),
        Column::new("open".into(), opens),
        Column::new("high".into(), highs),
        Column::new("low".into(), lows),
        Column::new("close".into(), closes),
        Column::new("volume".into(), volumes),
    ])
    .map_err(|e| StoreError::Parquet(format!("dataframe creation: {e}")))
}

fn write_parquet(df: &DataFrame, path: &Path) -> Result<(), StoreError> {
    let file = fs::File::create(path)?;
    ParquetWriter::new(file)
        .finish(&mut df.clone())
        .map_err(|e| StoreError::Parquet(format!("write parquet: {e}")))?;
    Ok(())
}

fn read_parquet(path: &Path) -> Result<Vec<Candle>, StoreError> {
    let file = fs::File::open(path)?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|e| StoreError::Parquet(format!("read parquet: {e}")))?;

    let map_err = |e: PolarsError| StoreError::Parquet(format!("column read: {e}"));
    let timestamps = df.column("timestamp").map_err(map_err)?;
    let opens = df.column("open").map_err(map_err)?;
    let highs = df.column("high").map_err(map_err)?;
    let lows = df.column("low").map_err(map_err)?;
    let closes = df.column("close").map_err(map_err)?;
    let volumes = df.column("volume").map_err(map_err)?;

    let ts_ca = timestamps
        .i64()
        .map_err(|e| StoreError::Parquet(format!("timestamp column type: {e}")))?;
    let open_ca = opens
        .f64()
        .map_err(|e| StoreError::Parquet(format!("open column type: {e}")))?;
    let high_ca = highs
        .f64()
        .map_err(|e| StoreError::Parquet(format!("high column type: {e}")))?;
    let low_ca = lows
        .f64()
        .map_err(|e| StoreError::Parquet(format!("low column type: {e}")))?;
    let close_ca = closes
        .f64()
        .map_err(|e| StoreError::Parquet(format!("close column type: {e}")))?;
    let vol_ca = volumes
        .i64()
        .map_err(|e| StoreError::Parquet(format!("volume column type: {e}")))?;

    let mut candles = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let ts = ts_ca
            .get(i)
            .ok_or_else(|| StoreError::Parquet(format!("null timestamp at row {i}")))?;
        let timestamp = chrono::DateTime::from_timestamp(ts, 0)
            .map(|dt| dt.naive_utc())
            .ok_or_else(|| StoreError::Parquet(format!("invalid timestamp {ts} at row {i}")))?;

        candles.push(Candle {
            timestamp,
            open: open_ca.get(i).unwrap_or(f64::NAN),
            high: high_ca.get(i).unwrap_or(f64::NAN),
            low: low_ca.get(i).unwrap_or(f64::NAN),
            close: close_ca.get(i).unwrap_or(f64::NAN),
            volume: vol_ca.get(i).unwrap_or(0),
        });
    }

    Ok(candles)
}
