//! External collaborators used by the provisioning pipeline.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │              Orchestrator                      │
//! │                                                │
//! │  OrchestrationClient (ComposeCli)              │
//! │    launch()        docker compose up -d        │
//! │    resolve_port()  docker compose port         │
//! │    destroy()       docker compose down         │
//! │                                                │
//! │  Firewall (UfwFirewall / NoopFirewall)         │
//! │    allow()         ufw allow <port>            │
//! │                                                │
//! │  AddressResolver (HttpAddressResolver)         │
//! │    resolve()       GET <resolver>?format=text  │
//! └──────────────────────────────────────────────┘
//! ```

pub mod client;
pub mod compose;
pub mod firewall;
pub mod public_ip;

pub use client::{AddressResolver, Firewall, OrchestrationClient};
pub use compose::ComposeCli;
pub use firewall::{NoopFirewall, UfwFirewall};
pub use public_ip::HttpAddressResolver;
