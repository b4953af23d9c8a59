//! Capabilities the lifecycle core consumes from the outside world.
//!
//! The core never shells out or opens sockets itself; it talks to these
//! traits so the concrete mechanism (CLI, SDK, HTTP API) can be swapped.

use std::net::IpAddr;

use async_trait::async_trait;

use crate::error::{LookupError, OrchestratorError};
use crate::identity::Identity;

/// Launch, inspect and destroy per-identity environments.
#[async_trait]
pub trait OrchestrationClient: Send + Sync {
    /// Bring up the environment for `identity`.
    async fn launch(&self, identity: &Identity) -> Result<(), OrchestratorError>;

    /// Host port bound to `container_port` of the environment's service.
    async fn resolve_port(
        &self,
        identity: &Identity,
        container_port: u16,
    ) -> Result<u16, OrchestratorError>;

    /// Tear the environment down. Destroying an absent environment succeeds.
    async fn destroy(&self, identity: &Identity) -> Result<(), OrchestratorError>;
}

/// Host firewall control.
#[async_trait]
pub trait Firewall: Send + Sync {
    async fn allow(&self, port: u16) -> Result<(), LookupError>;
}

/// Lookup of the address users should connect to.
#[async_trait]
pub trait AddressResolver: Send + Sync {
    async fn resolve(&self) -> Result<IpAddr, LookupError>;
}
