//! Observability extension points for the download loop.
//!
//! The fetch core stays free of I/O concerns: every notable transition —
//! attempt start, classification, bisection, terminal failure, instrument
//! lifecycle — is routed through this trait. Implementations decide what to
//! do with the events.

use crate::broker::BrokerError;
use crate::store::StoreError;

use super::chunk::{FetchError, FetchTask};
use super::window::TimeWindow;

/// Receiver for download lifecycle events. All methods default to no-ops so
/// implementations only handle what they care about.
pub trait DownloadEvents {
    fn instrument_started(&self, _symbol: &str, _index: usize, _total: usize) {}

    fn instrument_completed(&self, _symbol: &str, _candle_count: usize, _index: usize, _total: usize) {
    }

    fn instrument_failed(&self, _symbol: &str, _error: &FetchError) {}

    fn attempt_started(&self, _task: &FetchTask, _attempt: u32, _max_attempts: u32) {}

    fn transient_failure(&self, _task: &FetchTask, _attempt: u32, _error: &BrokerError) {}

    fn window_split(&self, _task: &FetchTask, _first: &TimeWindow, _second: &TimeWindow) {}

    fn store_failed(&self, _symbol: &str, _sink: &str, _error: &StoreError) {}

    fn batch_cancelled(&self, _completed: usize, _total: usize) {}

    fn batch_completed(&self, _succeeded: usize, _failed: usize, _total: usize) {}
}

/// Ignores every event. Useful in tests and as a default.
pub struct NullEvents;

impl DownloadEvents for NullEvents {}

/// Prints progress to stdout, one line per event an operator cares about.
pub struct StdoutEvents;

impl DownloadEvents for StdoutEvents {
    fn instrument_started(&self, symbol: &str, index: usize, total: usize) {
        println!("[{}/{}] Downloading {symbol}...", index + 1, total);
    }

    fn instrument_completed(&self, symbol: &str, candle_count: usize, _index: usize, _total: usize) {
        println!("  OK: {symbol} ({candle_count} candles)");
    }

    fn instrument_failed(&self, symbol: &str, error: &FetchError) {
        println!("  FAIL: {symbol}: {error}");
    }

    fn transient_failure(&self, task: &FetchTask, attempt: u32, error: &BrokerError) {
        println!("  retry {attempt} for {}: {error}", task.window);
    }

    fn window_split(&self, task: &FetchTask, first: &TimeWindow, second: &TimeWindow) {
        println!("  splitting {}: {first} then {second}", task.window);
    }

    fn store_failed(&self, symbol: &str, sink: &str, error: &StoreError) {
        println!("  WARNING: {sink} store failed for {symbol}: {error}");
    }

    fn batch_cancelled(&self, completed: usize, total: usize) {
        println!("\nCancelled after {completed}/{total} instruments");
    }

    fn batch_completed(&self, succeeded: usize, failed: usize, total: usize) {
        println!("\nDownload complete: {succeeded}/{total} succeeded, {failed} failed");
    }
}
