//! Remaining-time computation and the per-subscriber countdown task.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::clock::Clock;

/// Interval between countdown pushes.
pub const TICK: Duration = Duration::from_secs(1);

/// Render remaining time as `H:MM:SS` when at least an hour is left,
/// otherwise `MM:SS`. Negative durations render as zero.
pub fn format_time_left(remaining: TimeDelta) -> String {
    let total = remaining.num_seconds().max(0);
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}

/// Parse a subscriber-supplied expiry.
///
/// Accepts RFC 3339 (`2026-10-19T12:00:00Z`, `...+02:00`) and naive
/// ISO-8601 timestamps, which are taken as UTC.
pub fn parse_expiry(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| raw.parse::<NaiveDateTime>().ok().map(|naive| naive.and_utc()))
}

/// One push on the notification channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerEvent {
    Remaining(String),
    Expired,
}

impl TimerEvent {
    /// The event for `expiry` as seen at `now`.
    pub fn at(expiry: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        if now >= expiry {
            Self::Expired
        } else {
            Self::Remaining(format_time_left(expiry - now))
        }
    }

    pub fn is_expired(&self) -> bool {
        matches!(self, Self::Expired)
    }

    /// Wire form: `{"event":"time_left","time_left":"MM:SS","expired":false}`
    /// or `{"event":"time_left","expired":true}`.
    pub fn to_json(&self) -> String {
        let value = match self {
            Self::Remaining(left) => serde_json::json!({
                "event": "time_left",
                "time_left": left,
                "expired": false,
            }),
            Self::Expired => serde_json::json!({
                "event": "time_left",
                "expired": true,
            }),
        };
        value.to_string()
    }
}

/// Messages a subscriber may send.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientMessage {
    JoinTimer {
        #[serde(default)]
        expiry: Option<String>,
    },
}

impl ClientMessage {
    /// The expiry carried by a join, if it parses.
    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::JoinTimer { expiry } => expiry.as_deref().and_then(parse_expiry),
        }
    }
}

/// Push remaining time to `tx` once per [`TICK`] until expiry.
///
/// Returns when the terminal `Expired` event has been sent or the receiver
/// is gone. A missing expiry produces a single `Expired`.
pub async fn run_countdown(
    expiry: Option<DateTime<Utc>>,
    clock: Arc<dyn Clock>,
    tx: mpsc::Sender<TimerEvent>,
) {
    let Some(expiry) = expiry else {
        let _ = tx.send(TimerEvent::Expired).await;
        return;
    };

    let mut interval = tokio::time::interval(TICK);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let event = TimerEvent::at(expiry, clock.now());
        let done = event.is_expired();
        if tx.send(event).await.is_err() {
            tracing::debug!("Countdown subscriber went away");
            return;
        }
        if done {
            return;
        }
    }
}

/// Counts live countdown subscriptions.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionTracker {
    live: Arc<AtomicUsize>,
}

impl SubscriptionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscription; it is released when the guard drops.
    pub fn track(&self) -> SubscriptionGuard {
        self.live.fetch_add(1, Ordering::SeqCst);
        SubscriptionGuard {
            live: Arc::clone(&self.live),
        }
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

/// Held for the lifetime of one subscription.
#[derive(Debug)]
pub struct SubscriptionGuard {
    live: Arc<AtomicUsize>,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}
