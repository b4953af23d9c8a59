//! Real-time countdown notifications.
//!
//! Each subscriber gets its own countdown task scoped to its socket. The
//! channel only observes the expiry it was given; it never changes session
//! state.

pub mod countdown;
pub mod socket;

pub use countdown::{
    ClientMessage, SubscriptionGuard, SubscriptionTracker, TICK, TimerEvent, format_time_left,
    parse_expiry, run_countdown,
};
pub use socket::serve_timer;
