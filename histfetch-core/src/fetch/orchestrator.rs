//! Batch download loop — one instrument at a time, chunked when the interval
//! and span require it, with per-instrument failure isolation.
//!
//! Instruments and chunks are processed strictly sequentially: the broker
//! enforces a shared rate limit that concurrent fetches would violate.

use crate::broker::BrokerClient;
use crate::cancel::CancelToken;
use crate::domain::{Candle, InstrumentToken, Interval};
use crate::instruments::Instrument;
use crate::store::CandleSink;

use super::chunk::{ChunkFetcher, FetchError, FetchPolicy, FetchTask};
use super::events::DownloadEvents;
use super::window::{plan_windows, TimeWindow};

/// Per-instrument result handed back to the caller.
///
/// A failed instrument carries its error and an empty candle series — partial
/// chunk progress is discarded, never persisted.
#[derive(Debug)]
pub struct DownloadOutcome {
    pub symbol: String,
    pub token: InstrumentToken,
    pub candles: Vec<Candle>,
    pub error: Option<FetchError>,
}

impl DownloadOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Drives the whole batch: plans windows, fetches chunks, persists completed
/// series, and isolates per-instrument failure.
pub struct Downloader<'a> {
    broker: &'a dyn BrokerClient,
    sinks: &'a [Box<dyn CandleSink>],
    policy: FetchPolicy,
    events: &'a dyn DownloadEvents,
}

impl<'a> Downloader<'a> {
    pub fn new(
        broker: &'a dyn BrokerClient,
        sinks: &'a [Box<dyn CandleSink>],
        policy: FetchPolicy,
        events: &'a dyn DownloadEvents,
    ) -> Self {
        Self {
            broker,
            sinks,
            policy,
            events,
        }
    }

    /// Download `window` of `interval` candles for every instrument, in input
    /// order.
    ///
    /// Returns one outcome per instrument processed before cancellation took
    /// effect; a cancelled batch is a partial success, not an error. The only
    /// error is a rejected policy or window (programmer error).
    pub fn run(
        &self,
        instruments: &[Instrument],
        window: TimeWindow,
        interval: Interval,
        cancel: &CancelToken,
    ) -> Result<Vec<DownloadOutcome>, FetchError> {
        self.policy.validate()?;

        let total = instruments.len();
        let mut outcomes = Vec::with_capacity(total);

        for (index, instrument) in instruments.iter().enumerate() {
            if cancel.is_cancelled() {
                self.events.batch_cancelled(outcomes.len(), total);
                break;
            }
            self.events
                .instrument_started(&instrument.tradingsymbol, index, total);

            match self.fetch_instrument(instrument, window, interval, cancel)? {
                InstrumentFetch::Complete(candles) => {
                    self.persist(instrument, &candles);
                    self.events.instrument_completed(
                        &instrument.tradingsymbol,
                        candles.len(),
                        index,
                        total,
                    );
                    outcomes.push(DownloadOutcome {
                        symbol: instrument.tradingsymbol.clone(),
                        token: instrument.token(),
                        candles,
                        error: None,
                    });
                }
                InstrumentFetch::Failed(error) => {
                    self.events
                        .instrument_failed(&instrument.tradingsymbol, &error);
                    outcomes.push(DownloadOutcome {
                        symbol: instrument.tradingsymbol.clone(),
                        token: instrument.token(),
                        candles: Vec::new(),
                        error: Some(error),
                    });
                }
                InstrumentFetch::Interrupted => {
                    self.events.batch_cancelled(outcomes.len(), total);
                    break;
                }
            }

            // Pace before the next instrument; a cancelled wait is caught by
            // the loop-top check.
            if index + 1 < total {
                cancel.wait(self.policy.pacing_delay);
            }
        }

        let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
        let failed = outcomes.len() - succeeded;
        self.events.batch_completed(succeeded, failed, total);
        Ok(outcomes)
    }

    /// Fetch every chunk of one instrument's window sequentially.
    ///
    /// A terminal chunk failure discards all candles collected so far for the
    /// instrument. Only `InvalidArgument` escapes as a hard error.
    fn fetch_instrument(
        &self,
        instrument: &Instrument,
        window: TimeWindow,
        interval: Interval,
        cancel: &CancelToken,
    ) -> Result<InstrumentFetch, FetchError> {
        // The per-call ceiling applies to intraday granularities only.
        let needs_chunking = interval.is_intraday() && window.span() > self.policy.max_span();
        let windows: Vec<TimeWindow> = if needs_chunking {
            plan_windows(window, self.policy.max_span())?.collect()
        } else {
            vec![window]
        };

        let fetcher = ChunkFetcher::new(self.broker, self.policy.clone(), self.events);
        let mut candles = Vec::new();

        for (i, chunk) in windows.iter().enumerate() {
            if i > 0 && !cancel.wait(self.policy.pacing_delay) {
                return Ok(InstrumentFetch::Interrupted);
            }
            let task = FetchTask::new(instrument.token(), interval, *chunk);
            match fetcher.fetch(&task) {
                Ok(mut chunk_candles) => candles.append(&mut chunk_candles),
                Err(err @ FetchError::InvalidArgument(_)) => return Err(err),
                Err(err) => return Ok(InstrumentFetch::Failed(err)),
            }
        }

        Ok(InstrumentFetch::Complete(candles))
    }

    /// Hand a completed series to every sink. Sink failures are reported but
    /// never invalidate the fetch.
    fn persist(&self, instrument: &Instrument, candles: &[Candle]) {
        for sink in self.sinks {
            if let Err(err) = sink.store(instrument, candles) {
                self.events
                    .store_failed(&instrument.tradingsymbol, sink.name(), &err);
            }
        }
    }
}

enum InstrumentFetch {
    Complete(Vec<Candle>),
    Failed(FetchError),
    Interrupted,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{BrokerError, RawCandle};
    use crate::fetch::events::NullEvents;
    use crate::store::StoreError;
    use chrono::{NaiveDate, NaiveDateTime};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn at(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn window(start: NaiveDateTime, end: NaiveDateTime) -> TimeWindow {
        TimeWindow::new(start, end).unwrap()
    }

    fn instrument(token: i64, symbol: &str) -> Instrument {
        Instrument {
            instrument_token: token,
            tradingsymbol: symbol.to_string(),
            exchange: "NSE".to_string(),
            ..Instrument::default()
        }
    }

    fn test_policy() -> FetchPolicy {
        FetchPolicy {
            max_attempts: 2,
            backoff_delay: Duration::ZERO,
            pacing_delay: Duration::ZERO,
            max_span_days: 60,
            min_splittable_days: 5,
        }
    }

    /// Succeeds with one candle per day, except for the configured poison
    /// token which always fails transiently. Records every call.
    struct TokenBroker {
        poison: i64,
        calls: Mutex<Vec<(InstrumentToken, TimeWindow)>>,
    }

    impl TokenBroker {
        fn new(poison: i64) -> Self {
            Self {
                poison,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl BrokerClient for TokenBroker {
        fn name(&self) -> &str {
            "token_broker"
        }

        fn fetch_candles(
            &self,
            instrument: InstrumentToken,
            _interval: Interval,
            window: &TimeWindow,
        ) -> Result<Vec<RawCandle>, BrokerError> {
            self.calls.lock().unwrap().push((instrument, *window));
            if instrument.0 == self.poison {
                return Err(BrokerError::NetworkUnreachable("connection reset".into()));
            }
            let mut rows = Vec::new();
            let mut ts = window.start();
            while ts < window.end() {
                rows.push(RawCandle {
                    timestamp: ts,
                    open: 100.0,
                    high: 101.0,
                    low: 99.0,
                    close: 100.5,
                    volume: 1000,
                });
                ts += chrono::Duration::days(1);
            }
            Ok(rows)
        }
    }

    /// Records which symbols were stored, observable from the test body.
    #[derive(Clone)]
    struct MemorySink {
        stored: Arc<Mutex<Vec<(String, usize)>>>,
    }

    impl MemorySink {
        fn new() -> Self {
            Self {
                stored: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl CandleSink for MemorySink {
        fn name(&self) -> &str {
            "memory"
        }

        fn store(&self, instrument: &Instrument, candles: &[Candle]) -> Result<(), StoreError> {
            self.stored
                .lock()
                .unwrap()
                .push((instrument.tradingsymbol.clone(), candles.len()));
            Ok(())
        }
    }

    struct FailingSink;

    impl CandleSink for FailingSink {
        fn name(&self) -> &str {
            "failing"
        }

        fn store(&self, _instrument: &Instrument, _candles: &[Candle]) -> Result<(), StoreError> {
            Err(StoreError::Csv("disk full".into()))
        }
    }

    /// Cancels the shared token as soon as the named symbol completes.
    struct CancelAfter {
        symbol: String,
        token: CancelToken,
    }

    impl DownloadEvents for CancelAfter {
        fn instrument_completed(
            &self,
            symbol: &str,
            _candle_count: usize,
            _index: usize,
            _total: usize,
        ) {
            if symbol == self.symbol {
                self.token.cancel();
            }
        }
    }

    #[test]
    fn one_failing_instrument_does_not_abort_the_batch() {
        let broker = TokenBroker::new(2);
        let sinks: Vec<Box<dyn CandleSink>> = vec![Box::new(MemorySink::new())];
        let downloader = Downloader::new(&broker, &sinks, test_policy(), &NullEvents);

        let instruments = vec![
            instrument(1, "AAA"),
            instrument(2, "BBB"),
            instrument(3, "CCC"),
        ];
        let outcomes = downloader
            .run(
                &instruments,
                window(at(2023, 1, 1), at(2023, 1, 11)),
                Interval::Day,
                &CancelToken::new(),
            )
            .unwrap();

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[0].is_success());
        assert!(!outcomes[1].is_success());
        assert!(outcomes[2].is_success());
        assert!(outcomes[1].candles.is_empty());
        assert!(matches!(
            outcomes[1].error,
            Some(FetchError::Exhausted { attempts: 2, .. })
        ));
        assert_eq!(outcomes[0].candles.len(), 10);
    }

    #[test]
    fn only_successful_instruments_reach_the_sinks() {
        let broker = TokenBroker::new(2);
        let sink = MemorySink::new();
        let records = sink.stored.clone();
        let sinks: Vec<Box<dyn CandleSink>> = vec![Box::new(sink)];
        let downloader = Downloader::new(&broker, &sinks, test_policy(), &NullEvents);

        let instruments = vec![instrument(1, "AAA"), instrument(2, "BBB")];
        downloader
            .run(
                &instruments,
                window(at(2023, 1, 1), at(2023, 1, 6)),
                Interval::Day,
                &CancelToken::new(),
            )
            .unwrap();

        let stored = records.lock().unwrap();
        assert_eq!(stored.as_slice(), &[("AAA".to_string(), 5)]);
    }

    #[test]
    fn sink_failure_does_not_invalidate_the_outcome() {
        let broker = TokenBroker::new(-1);
        let sinks: Vec<Box<dyn CandleSink>> = vec![Box::new(FailingSink)];
        let downloader = Downloader::new(&broker, &sinks, test_policy(), &NullEvents);

        let outcomes = downloader
            .run(
                &[instrument(1, "AAA")],
                window(at(2023, 1, 1), at(2023, 1, 6)),
                Interval::Day,
                &CancelToken::new(),
            )
            .unwrap();

        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].is_success());
    }

    #[test]
    fn pre_signalled_cancellation_yields_an_empty_batch() {
        let broker = TokenBroker::new(-1);
        let sinks: Vec<Box<dyn CandleSink>> = vec![];
        let downloader = Downloader::new(&broker, &sinks, test_policy(), &NullEvents);

        let cancel = CancelToken::new();
        cancel.cancel();
        let outcomes = downloader
            .run(
                &[instrument(1, "AAA")],
                window(at(2023, 1, 1), at(2023, 1, 6)),
                Interval::Day,
                &cancel,
            )
            .unwrap();

        assert!(outcomes.is_empty());
        assert!(broker.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn cancellation_between_instruments_returns_the_partial_batch() {
        let broker = TokenBroker::new(-1);
        let sinks: Vec<Box<dyn CandleSink>> = vec![];
        let cancel = CancelToken::new();
        let events = CancelAfter {
            symbol: "AAA".to_string(),
            token: cancel.clone(),
        };
        let downloader = Downloader::new(&broker, &sinks, test_policy(), &events);

        let instruments = vec![instrument(1, "AAA"), instrument(2, "BBB")];
        let outcomes = downloader
            .run(
                &instruments,
                window(at(2023, 1, 1), at(2023, 1, 6)),
                Interval::Day,
                &cancel,
            )
            .unwrap();

        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].symbol, "AAA");
    }

    #[test]
    fn intraday_interval_over_the_ceiling_is_chunked() {
        let broker = TokenBroker::new(-1);
        let sinks: Vec<Box<dyn CandleSink>> = vec![];
        let downloader = Downloader::new(&broker, &sinks, test_policy(), &NullEvents);

        // 104 days of minute data: two chunks.
        downloader
            .run(
                &[instrument(1, "AAA")],
                window(at(2023, 1, 1), at(2023, 4, 15)),
                Interval::Minute,
                &CancelToken::new(),
            )
            .unwrap();
        assert_eq!(broker.calls.lock().unwrap().len(), 2);

        // The same span of daily data: a single call.
        let daily_broker = TokenBroker::new(-1);
        let downloader = Downloader::new(&daily_broker, &sinks, test_policy(), &NullEvents);
        downloader
            .run(
                &[instrument(1, "AAA")],
                window(at(2023, 1, 1), at(2023, 4, 15)),
                Interval::Day,
                &CancelToken::new(),
            )
            .unwrap();
        assert_eq!(daily_broker.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn merged_chunks_preserve_ascending_order() {
        let broker = TokenBroker::new(-1);
        let sinks: Vec<Box<dyn CandleSink>> = vec![];
        let downloader = Downloader::new(&broker, &sinks, test_policy(), &NullEvents);

        let outcomes = downloader
            .run(
                &[instrument(1, "AAA")],
                window(at(2022, 1, 1), at(2023, 1, 1)),
                Interval::Minute,
                &CancelToken::new(),
            )
            .unwrap();

        let candles = &outcomes[0].candles;
        assert!(!candles.is_empty());
        assert!(candles.windows(2).all(|p| p[0].timestamp <= p[1].timestamp));
    }
}
