//! Wall-clock source for expiry decisions.

use chrono::{DateTime, Utc};

/// Source of "now". Injected so expiry transitions can be tested without
/// waiting out real session lifetimes.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
