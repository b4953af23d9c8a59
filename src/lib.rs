//! labrange: provisions short-lived, per-user lab environments.
//!
//! A registration claims an identity and starts a background provisioning
//! pipeline (launch, port, public address, firewall). The caller polls
//! until the environment is ready, after which the session lives for a
//! fixed time that can be extended. Expired environments are torn down on
//! the next access or by the background reaper, and a WebSocket pushes the
//! remaining time once a second.

pub mod clock;
pub mod config;
pub mod error;
pub mod gateway;
pub mod identity;
pub mod lifecycle;
pub mod notify;
pub mod orchestrator;
pub mod provisioning;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
