//! The chunked, adaptively-retried fetch core.
//!
//! Turns an arbitrarily long requested date range into a sequence of
//! API-legal sub-range calls, recovers from oversized-range rejections by
//! recursive bisection, retries transient failures with backoff, and
//! isolates per-instrument failure so one bad instrument never aborts the
//! batch.

pub mod chunk;
pub mod events;
pub mod orchestrator;
pub mod window;

pub use chunk::{ChunkFetcher, FetchError, FetchPolicy, FetchTask};
pub use events::{DownloadEvents, NullEvents, StdoutEvents};
pub use orchestrator::{DownloadOutcome, Downloader};
pub use window::{plan_windows, TimeWindow, WindowPlan};
