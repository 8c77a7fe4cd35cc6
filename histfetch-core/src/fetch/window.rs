//! Half-open time windows and the span planner.

use chrono::{Duration, NaiveDateTime};
use std::fmt;

use super::chunk::FetchError;

/// An immutable half-open interval `[start, end)` over broker time.
///
/// Invariant: `start < end`. New windows are produced, never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    start: NaiveDateTime,
    end: NaiveDateTime,
}

impl TimeWindow {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Result<Self, FetchError> {
        if start >= end {
            return Err(FetchError::InvalidArgument(format!(
                "window start {start} is not before end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> NaiveDateTime {
        self.start
    }

    pub fn end(&self) -> NaiveDateTime {
        self.end
    }

    pub fn span(&self) -> Duration {
        self.end - self.start
    }

    pub fn days(&self) -> i64 {
        self.span().num_days()
    }

    /// Split at the midpoint: `[start, mid)` and `[mid + 1s, end)`.
    ///
    /// The one-second offset keeps the halves disjoint once mapped to the
    /// broker's inclusive wire bounds. Callers only split windows above the
    /// minimum splittable span, so both halves are non-empty.
    pub fn bisect(&self) -> (TimeWindow, TimeWindow) {
        let mid = self.start + self.span() / 2;
        (
            TimeWindow {
                start: self.start,
                end: mid,
            },
            TimeWindow {
                start: mid + Duration::seconds(1),
                end: self.end,
            },
        )
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Plan a sequence of contiguous sub-windows covering `total`, each spanning
/// at most `max_span`.
///
/// The sequence is lazy and iterates in chronological order: the first window
/// starts at `total.start()`, each subsequent window starts at the previous
/// end, and the last window ends exactly at `total.end()` (possibly shorter
/// than `max_span`).
pub fn plan_windows(total: TimeWindow, max_span: Duration) -> Result<WindowPlan, FetchError> {
    if max_span <= Duration::zero() {
        return Err(FetchError::InvalidArgument(format!(
            "max span must be positive, got {max_span}"
        )));
    }
    Ok(WindowPlan {
        cursor: total.start,
        end: total.end,
        max_span,
    })
}

/// Iterator over planned sub-windows. See [`plan_windows`].
#[derive(Debug, Clone)]
pub struct WindowPlan {
    cursor: NaiveDateTime,
    end: NaiveDateTime,
    max_span: Duration,
}

impl Iterator for WindowPlan {
    type Item = TimeWindow;

    fn next(&mut self) -> Option<TimeWindow> {
        if self.cursor >= self.end {
            return None;
        }
        let chunk_end = (self.cursor + self.max_span).min(self.end);
        let window = TimeWindow {
            start: self.cursor,
            end: chunk_end,
        };
        self.cursor = chunk_end;
        Some(window)
    }
}
