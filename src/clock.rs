//! Injectable Unix-second time source.

use chrono::Utc;

/// Source of the current time in Unix seconds.
///
/// Every component that stamps or compares times takes an `Arc<dyn Clock>`
/// so tests can pin the time.
pub trait Clock: Send + Sync {
    fn now_unix(&self) -> i64;
}

/// Wall clock backed by `chrono::Utc`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_unix(&self) -> i64 {
        Utc::now().timestamp()
    }
}
