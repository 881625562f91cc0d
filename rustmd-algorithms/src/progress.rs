//! Progress reporting and cooperative cancellation.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use log::debug;

/// Receives `(done, total)` spectrum counts after every block.
pub trait ProgressReporter: Sync {
    /// Called by the coordinator thread.
    fn report(&self, done: usize, total: usize);
}

/// Discards progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _done: usize, _total: usize) {}
}

/// Logs progress at debug level, at most once per `step` percent.
#[derive(Debug)]
pub struct LogProgress {
    step: usize,
    last: AtomicUsize,
}

impl LogProgress {
    /// Reporter logging every `step` percent.
    #[must_use]
    pub fn new(step: usize) -> Self {
        Self {
            step: step.clamp(1, 100),
            last: AtomicUsize::new(0),
        }
    }
}

impl Default for LogProgress {
    fn default() -> Self {
        Self::new(10)
    }
}

impl ProgressReporter for LogProgress {
    fn report(&self, done: usize, total: usize) {
        if total == 0 {
            return;
        }
        let percent = done.saturating_mul(100) / total;
        let bucket = percent / self.step;
        if self.last.fetch_max(bucket, Ordering::Relaxed) < bucket || done == total {
            debug!("converted {done}/{total} spectra ({percent}%)");
        }
    }
}

impl<F> ProgressReporter for F
where
    F: Fn(usize, usize) + Sync,
{
    fn report(&self, done: usize, total: usize) {
        self(done, total);
    }
}

/// Shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// New, uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation; visible to every clone.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Returns true once cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_token_shared_between_clones() {
        let token = CancellationToken::new();
        let other = token.clone();
        assert!(!other.is_cancelled());
        token.cancel();
        assert!(other.is_cancelled());
    }

    #[test]
    fn test_closure_reporter() {
        let seen = Mutex::new(Vec::new());
        let reporter = |done: usize, total: usize| seen.lock().unwrap().push((done, total));
        reporter.report(1, 4);
        reporter.report(4, 4);
        assert_eq!(*seen.lock().unwrap(), vec![(1, 4), (4, 4)]);
    }

    #[test]
    fn test_log_progress_accepts_zero_total() {
        let p = LogProgress::new(0);
        p.report(0, 0);
        p.report(5, 10);
        NoProgress.report(1, 1);
    }
}
