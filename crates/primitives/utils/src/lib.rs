#![allow(clippy::new_without_default)]

pub mod parsers;
pub mod serde;
pub mod service;

use std::time::Duration;
use tokio::time::Instant;

/// Measures how long a unit of work took.
///
/// Backed by [tokio::time::Instant] so that measurements follow the runtime clock, which
/// matters when the clock is paused or advanced manually in tests.
pub struct PerfStopwatch(pub Instant);

impl PerfStopwatch {
    pub fn new() -> PerfStopwatch {
        PerfStopwatch(Instant::now())
    }

    pub fn elapsed(&self) -> Duration {
        self.0.elapsed()
    }
}

#[macro_export]
macro_rules! stopwatch_end {
    ($stopwatch:expr, $($arg:tt)+) => {
        tracing::debug!($($arg)+, $stopwatch.elapsed())
    }
}
