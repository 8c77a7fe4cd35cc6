//! Property tests for the window planner.
//!
//! Uses proptest to verify, for arbitrary totals and span ceilings:
//! 1. Coverage — concatenating the planned windows reconstructs the total
//! 2. Adjacency — no gap and no overlap between consecutive windows
//! 3. Span bound — every window spans at most the ceiling
//! 4. Determinism — planning twice yields the same sequence

use chrono::{Duration, NaiveDate, NaiveDateTime};
use histfetch_core::fetch::{plan_windows, TimeWindow};
use proptest::prelude::*;

fn epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2015, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

fn arb_total() -> impl Strategy<Value = TimeWindow> {
    // Start anywhere in a ~8-year range, span from one minute to ~3 years.
    (0i64..3000, 1i64..1_600_000).prop_map(|(start_days, span_minutes)| {
        let start = epoch() + Duration::days(start_days);
        TimeWindow::new(start, start + Duration::minutes(span_minutes)).unwrap()
    })
}

fn arb_max_span() -> impl Strategy<Value = Duration> {
    (1i64..120_000).prop_map(Duration::minutes)
}

proptest! {
    /// The planned windows tile the total exactly: the first starts at the
    /// total's start, the last ends at the total's end, and each window
    /// starts where the previous one ended.
    #[test]
    fn windows_cover_the_total_without_gaps_or_overlap(
        total in arb_total(),
        max_span in arb_max_span(),
    ) {
        let windows: Vec<TimeWindow> = plan_windows(total, max_span).unwrap().collect();

        prop_assert!(!windows.is_empty());
        prop_assert_eq!(windows.first().unwrap().start(), total.start());
        prop_assert_eq!(windows.last().unwrap().end(), total.end());
        for pair in windows.windows(2) {
            prop_assert_eq!(pair[0].end(), pair[1].start());
        }
    }

    /// No window exceeds the ceiling, and only the last may fall short of it.
    #[test]
    fn every_window_respects_the_span_ceiling(
        total in arb_total(),
        max_span in arb_max_span(),
    ) {
        let windows: Vec<TimeWindow> = plan_windows(total, max_span).unwrap().collect();

        for window in &windows {
            prop_assert!(window.span() <= max_span);
        }
        for window in &windows[..windows.len() - 1] {
            prop_assert_eq!(window.span(), max_span.min(total.span()));
        }
    }

    /// A total at or under the ceiling plans as a single window equal to it.
    #[test]
    fn short_totals_yield_a_single_window(
        total in arb_total(),
    ) {
        let windows: Vec<TimeWindow> =
            plan_windows(total, total.span()).unwrap().collect();
        prop_assert_eq!(windows, vec![total]);
    }

    /// Planning is deterministic for a given (total, max_span) pair.
    #[test]
    fn planning_is_deterministic(
        total in arb_total(),
        max_span in arb_max_span(),
    ) {
        let first: Vec<TimeWindow> = plan_windows(total, max_span).unwrap().collect();
        let second: Vec<TimeWindow> = plan_windows(total, max_span).unwrap().collect();
        prop_assert_eq!(first, second);
    }
}
