//! Cooperative cancellation for the download loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Poll-able stop flag shared between the driver and the download loop.
///
/// Observed at instrument boundaries and during pacing waits. An in-flight
/// broker call or bisection recursion is never interrupted, so cancellation
/// can take up to one full call plus its retry chain to land.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal the operation to stop at its next safe point.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleep for `duration`, waking early when cancelled.
    ///
    /// Returns `false` when the wait was interrupted by cancellation.
    pub fn wait(&self, duration: Duration) -> bool {
        const SLICE: Duration = Duration::from_millis(50);

        let mut remaining = duration;
        while !remaining.is_zero() {
            if self.is_cancelled() {
                return false;
            }
            let step = remaining.min(SLICE);
            std::thread::sleep(step);
            remaining -= step;
        }
        !self.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn starts_unsignalled() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn clones_share_the_flag() {
        let token = CancelToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn wait_completes_when_not_cancelled() {
        let token = CancelToken::new();
        assert!(token.wait(Duration::from_millis(10)));
    }

    #[test]
    fn wait_returns_early_when_cancelled() {
        let token = CancelToken::new();
        token.cancel();
        let start = Instant::now();
        assert!(!token.wait(Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
