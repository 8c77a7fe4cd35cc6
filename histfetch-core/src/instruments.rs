//! Instrument master — download the broker's CSV dump and resolve trading
//! symbols to instrument tokens.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use thiserror::Error;

use crate::domain::InstrumentToken;

/// One row of the broker instrument dump.
#[derive(Debug, Clone, Default)]
pub struct Instrument {
    pub instrument_token: i64,
    pub exchange_token: i64,
    pub tradingsymbol: String,
    pub name: String,
    pub last_price: f64,
    pub expiry: String,
    pub strike: f64,
    pub tick_size: f64,
    pub lot_size: i64,
    pub instrument_type: String,
    pub segment: String,
    pub exchange: String,
}

impl Instrument {
    pub fn token(&self) -> InstrumentToken {
        InstrumentToken(self.instrument_token)
    }
}

#[derive(Debug, Error)]
pub enum InstrumentError {
    #[error("failed to download instrument dump: {0}")]
    Download(String),

    #[error("instrument dump I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("instrument dump malformed: {0}")]
    Malformed(String),

    #[error("instrument not found: {symbol}")]
    UnknownSymbol { symbol: String },
}

/// In-memory index of the instrument dump, keyed by trading symbol.
pub struct InstrumentCatalog {
    by_symbol: HashMap<String, Instrument>,
}

impl InstrumentCatalog {
    /// Download the CSV dump from `url` and save it at `path`.
    pub fn download(url: &str, path: &Path) -> Result<(), InstrumentError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("failed to build HTTP client");

        let response = client
            .get(url)
            .send()
            .map_err(|e| InstrumentError::Download(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(InstrumentError::Download(format!("HTTP {status}")));
        }
        let body = response
            .text()
            .map_err(|e| InstrumentError::Download(e.to_string()))?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, body)?;
        Ok(())
    }

    /// Parse the dump at `path`, keeping rows for `exchange` only.
    ///
    /// Numeric fields that fail to parse (the dump leaves some blank) default
    /// to zero rather than poisoning the row.
    pub fn load(path: &Path, exchange: &str) -> Result<Self, InstrumentError> {
        let mut reader =
            csv::Reader::from_path(path).map_err(|e| InstrumentError::Malformed(e.to_string()))?;
        let headers = reader
            .headers()
            .map_err(|e| InstrumentError::Malformed(e.to_string()))?
            .clone();

        let col = |name: &str| {
            headers
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| InstrumentError::Malformed(format!("missing column '{name}'")))
        };
        let token_col = col("instrument_token")?;
        let exchange_token_col = col("exchange_token")?;
        let symbol_col = col("tradingsymbol")?;
        let name_col = col("name")?;
        let last_price_col = col("last_price")?;
        let expiry_col = col("expiry")?;
        let strike_col = col("strike")?;
        let tick_size_col = col("tick_size")?;
        let lot_size_col = col("lot_size")?;
        let type_col = col("instrument_type")?;
        let segment_col = col("segment")?;
        let exchange_col = col("exchange")?;

        let mut by_symbol = HashMap::new();
        for record in reader.records() {
            let record = record.map_err(|e| InstrumentError::Malformed(e.to_string()))?;
            if record.get(exchange_col) != Some(exchange) {
                continue;
            }

            let instrument = Instrument {
                instrument_token: int_or_zero(record.get(token_col)),
                exchange_token: int_or_zero(record.get(exchange_token_col)),
                tradingsymbol: str_or_empty(record.get(symbol_col)),
                name: str_or_empty(record.get(name_col)),
                last_price: float_or_zero(record.get(last_price_col)),
                expiry: str_or_empty(record.get(expiry_col)),
                strike: float_or_zero(record.get(strike_col)),
                tick_size: float_or_zero(record.get(tick_size_col)),
                lot_size: int_or_zero(record.get(lot_size_col)),
                instrument_type: str_or_empty(record.get(type_col)),
                segment: str_or_empty(record.get(segment_col)),
                exchange: str_or_empty(record.get(exchange_col)),
            };
            by_symbol.insert(instrument.tradingsymbol.clone(), instrument);
        }

        Ok(Self { by_symbol })
    }

    pub fn len(&self) -> usize {
        self.by_symbol.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_symbol.is_empty()
    }

    pub fn get(&self, symbol: &str) -> Option<&Instrument> {
        self.by_symbol.get(symbol)
    }

    /// Look up a single symbol, failing when it is not in the catalog.
    pub fn get_by_symbol(&self, symbol: &str) -> Result<&Instrument, InstrumentError> {
        self.by_symbol
            .get(symbol)
            .ok_or_else(|| InstrumentError::UnknownSymbol {
                symbol: symbol.to_string(),
            })
    }

    /// Resolve `symbols` in input order. Unknown symbols are collected
    /// separately so the caller can report and skip them.
    pub fn for_symbols(&self, symbols: &[String]) -> (Vec<Instrument>, Vec<String>) {
        let mut resolved = Vec::new();
        let mut unknown = Vec::new();
        for symbol in symbols {
            match self.get_by_symbol(symbol) {
                Ok(instrument) => resolved.push(instrument.clone()),
                Err(_) => unknown.push(symbol.clone()),
            }
        }
        (resolved, unknown)
    }
}

fn int_or_zero(field: Option<&str>) -> i64 {
    field.and_then(|s| s.trim().parse().ok()).unwrap_or(0)
}

fn float_or_zero(field: Option<&str>) -> f64 {
    field.and_then(|s| s.trim().parse().ok()).unwrap_or(0.0)
}

fn str_or_empty(field: Option<&str>) -> String {
    field.unwrap_or_default().to_string()
}
