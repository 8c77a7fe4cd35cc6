//! Bounded-retry chunk fetching with recursive bisection.
//!
//! One `fetch` call resolves one window: try the broker up to the attempt
//! budget, split and recurse when the broker rejects the span, back off and
//! retry on anything transient. Each recursive half gets a fresh attempt
//! budget, so worst-case call volume grows multiplicatively with bisection
//! depth; the floor on splittable span bounds the recursion.

use std::time::Duration;

use thiserror::Error;

use crate::broker::{BrokerClient, BrokerError, RawCandle};
use crate::domain::{Candle, InstrumentToken, Interval};

use super::events::DownloadEvents;
use super::window::TimeWindow;

/// Unit of work: one instrument, one granularity, one window.
#[derive(Debug, Clone, Copy)]
pub struct FetchTask {
    pub instrument: InstrumentToken,
    pub interval: Interval,
    pub window: TimeWindow,
}

impl FetchTask {
    pub fn new(instrument: InstrumentToken, interval: Interval, window: TimeWindow) -> Self {
        Self {
            instrument,
            interval,
            window,
        }
    }

    fn with_window(&self, window: TimeWindow) -> Self {
        Self { window, ..*self }
    }
}

/// Retry and pacing knobs. All externally supplied; the defaults are the
/// historically observed values.
#[derive(Debug, Clone)]
pub struct FetchPolicy {
    /// Attempts per window before giving up on transient errors.
    pub max_attempts: u32,
    /// Wait after a transient failure before retrying the same window.
    /// Strictly longer than `pacing_delay`, so a backoff is distinguishable
    /// from normal pacing.
    pub backoff_delay: Duration,
    /// Wait between successive broker calls: chunks, bisection halves,
    /// instruments.
    pub pacing_delay: Duration,
    /// Per-call ceiling the broker enforces on intraday spans.
    pub max_span_days: i64,
    /// Windows at or below this span are never split further; a rejection at
    /// this size is terminal.
    pub min_splittable_days: i64,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_delay: Duration::from_millis(1000),
            pacing_delay: Duration::from_millis(500),
            max_span_days: 60,
            min_splittable_days: 5,
        }
    }
}

impl FetchPolicy {
    pub fn validate(&self) -> Result<(), FetchError> {
        if self.max_attempts == 0 {
            return Err(FetchError::InvalidArgument(
                "max_attempts must be at least 1".into(),
            ));
        }
        if self.max_span_days <= 0 {
            return Err(FetchError::InvalidArgument(format!(
                "max_span_days must be positive, got {}",
                self.max_span_days
            )));
        }
        if self.min_splittable_days <= 0 {
            return Err(FetchError::InvalidArgument(format!(
                "min_splittable_days must be positive, got {}",
                self.min_splittable_days
            )));
        }
        Ok(())
    }

    pub fn max_span(&self) -> chrono::Duration {
        chrono::Duration::days(self.max_span_days)
    }

    pub fn min_splittable(&self) -> chrono::Duration {
        chrono::Duration::days(self.min_splittable_days)
    }
}

/// Terminal failure for one instrument's fetch.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The broker rejected a window that is already at the minimum splittable
    /// span — bisection cannot recover (e.g. the interval itself is wrong).
    #[error("broker rejected minimal window {window}: {source}")]
    WindowTooSmall {
        window: TimeWindow,
        source: BrokerError,
    },

    #[error("retry budget exhausted after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: BrokerError },

    #[error("cancelled before completion")]
    Cancelled,
}

/// Fetches one window's candles through a [`BrokerClient`], retrying
/// transient failures and bisecting oversized windows.
pub struct ChunkFetcher<'a> {
    broker: &'a dyn BrokerClient,
    policy: FetchPolicy,
    events: &'a dyn DownloadEvents,
}

impl<'a> ChunkFetcher<'a> {
    pub fn new(
        broker: &'a dyn BrokerClient,
        policy: FetchPolicy,
        events: &'a dyn DownloadEvents,
    ) -> Self {
        Self {
            broker,
            policy,
            events,
        }
    }

    /// Resolve `task` to an ascending candle series or a terminal error.
    ///
    /// An oversized-range rejection is handled before the attempt counter and
    /// is never retried through it: the window is bisected and each half is
    /// fetched recursively with a fresh attempt budget. Every other failure
    /// is transient and consumes one attempt.
    pub fn fetch(&self, task: &FetchTask) -> Result<Vec<Candle>, FetchError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.events
                .attempt_started(task, attempt, self.policy.max_attempts);

            match self
                .broker
                .fetch_candles(task.instrument, task.interval, &task.window)
            {
                Ok(raw) => return Ok(into_candles(raw)),
                Err(err) if err.is_range_too_large() => return self.bisect_and_merge(task, err),
                Err(err) => {
                    self.events.transient_failure(task, attempt, &err);
                    if attempt >= self.policy.max_attempts {
                        return Err(FetchError::Exhausted {
                            attempts: attempt,
                            last: err,
                        });
                    }
                    std::thread::sleep(self.policy.backoff_delay);
                }
            }
        }
    }

    fn bisect_and_merge(
        &self,
        task: &FetchTask,
        cause: BrokerError,
    ) -> Result<Vec<Candle>, FetchError> {
        if task.window.span() <= self.policy.min_splittable() {
            return Err(FetchError::WindowTooSmall {
                window: task.window,
                source: cause,
            });
        }

        let (first, second) = task.window.bisect();
        self.events.window_split(task, &first, &second);

        let mut candles = self.fetch(&task.with_window(first))?;
        std::thread::sleep(self.policy.pacing_delay);
        let mut rest = self.fetch(&task.with_window(second))?;
        candles.append(&mut rest);
        Ok(candles)
    }
}

/// Convert raw broker rows into domain candles, ascending by timestamp.
fn into_candles(raw: Vec<RawCandle>) -> Vec<Candle> {
    let mut candles: Vec<Candle> = raw.into_iter().map(Candle::from).collect();
    candles.sort_by_key(|c| c.timestamp);
    candles
}
