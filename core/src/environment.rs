//! Injected environment dependencies.

use chrono::{DateTime, Utc};

/// Clock trait - abstracts time for testability
///
/// Envelopes are stamped with `now()` at publish time; tests pin it with a
/// fixed clock.
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
