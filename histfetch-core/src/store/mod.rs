//! Persistence sinks for downloaded candle series.

pub mod csv;
pub mod parquet;

pub use csv::CsvStore;
pub use parquet::{ParquetStore, StoreMeta};

use thiserror::Error;

use crate::domain::Candle;
use crate::instruments::Instrument;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV write error: {0}")]
    Csv(String),

    #[error("parquet error: {0}")]
    Parquet(String),

    #[error("metadata error: {0}")]
    Metadata(String),
}

/// Where a successfully downloaded series goes.
///
/// Invoked once per completed instrument; a failure here is reported but
/// never undoes the fetch.
pub trait CandleSink: Send + Sync {
    fn name(&self) -> &str;

    fn store(&self, instrument: &Instrument, candles: &[Candle]) -> Result<(), StoreError>;
}
