//! The provisioning saga run once per registration.
//!
//! ```text
//! launch ──▶ resolve port ──▶ resolve address ──▶ open firewall ──▶ Ready
//!   │ fatal        │ fatal           │ degrade          │ degrade
//!   ▼              ▼ (+ rollback)    ▼ (no address)     ▼ (logged)
//! Error          Error
//! ```
//!
//! Only the final record is published; intermediate progress stays private
//! to the task.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::error::OrchestratorError;
use crate::identity::Identity;
use crate::orchestrator::{AddressResolver, Firewall, OrchestrationClient};
use crate::provisioning::progress::{ConnectionInfo, Credentials, ProgressStore, ProvisioningRecord};

/// Knobs for one pipeline instance.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Container-side port whose host binding users connect to.
    pub service_port: u16,
    /// Credentials published with every ready environment.
    pub credentials: Credentials,
    /// Upper bound on the public address lookup.
    pub address_timeout: Duration,
    /// Destroy the launched environment when port resolution fails.
    pub rollback_on_failure: bool,
}

/// Runs the launch / port / address / firewall saga and publishes the
/// outcome into the [`ProgressStore`].
pub struct ProvisioningPipeline {
    orchestrator: Arc<dyn OrchestrationClient>,
    firewall: Arc<dyn Firewall>,
    resolver: Arc<dyn AddressResolver>,
    progress: Arc<ProgressStore>,
    settings: PipelineSettings,
}

impl ProvisioningPipeline {
    pub fn new(
        orchestrator: Arc<dyn OrchestrationClient>,
        firewall: Arc<dyn Firewall>,
        resolver: Arc<dyn AddressResolver>,
        progress: Arc<ProgressStore>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            orchestrator,
            firewall,
            resolver,
            progress,
            settings,
        }
    }

    pub fn progress(&self) -> &Arc<ProgressStore> {
        &self.progress
    }

    /// Mark `identity` as pending. Called before the run is spawned so
    /// pollers never see a gap between registration and the first write.
    pub async fn begin(&self, identity: &Identity) {
        self.progress
            .put(identity.clone(), ProvisioningRecord::Pending)
            .await;
    }

    /// Execute all steps and publish the single visible outcome.
    pub async fn run(&self, identity: &Identity) -> ProvisioningRecord {
        let started = std::time::Instant::now();
        let record = match self.provision(identity).await {
            Ok(info) => {
                tracing::info!(
                    identity = %identity,
                    host_port = info.host_port,
                    host_ip = ?info.host_ip,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Environment ready"
                );
                ProvisioningRecord::Ready(info)
            }
            Err(e) => {
                tracing::error!(identity = %identity, error = %e, "Provisioning failed");
                ProvisioningRecord::Error {
                    message: e.user_message(),
                }
            }
        };

        self.progress.put(identity.clone(), record.clone()).await;
        record
    }

    async fn provision(&self, identity: &Identity) -> Result<ConnectionInfo, OrchestratorError> {
        self.orchestrator.launch(identity).await?;

        let host_port = match self
            .orchestrator
            .resolve_port(identity, self.settings.service_port)
            .await
        {
            Ok(port) => port,
            Err(e) => {
                self.rollback(identity).await;
                return Err(e);
            }
        };

        let host_ip = self.resolve_address(identity).await;
        self.open_firewall(identity, host_port).await;

        Ok(ConnectionInfo {
            host_ip,
            host_port,
            credentials: self.settings.credentials.clone(),
        })
    }

    /// Compensate for a launched environment nobody will be able to reach.
    async fn rollback(&self, identity: &Identity) {
        if !self.settings.rollback_on_failure {
            tracing::warn!(
                identity = %identity,
                "Port resolution failed, leaving launched environment in place"
            );
            return;
        }
        if let Err(e) = self.orchestrator.destroy(identity).await {
            tracing::warn!(
                identity = %identity,
                error = %e,
                "Rollback after failed port resolution did not complete (may require manual cleanup)"
            );
        }
    }

    async fn resolve_address(&self, identity: &Identity) -> Option<IpAddr> {
        match tokio::time::timeout(self.settings.address_timeout, self.resolver.resolve()).await {
            Ok(Ok(ip)) => Some(ip),
            Ok(Err(e)) => {
                tracing::warn!(identity = %identity, error = %e, "Continuing without public address");
                None
            }
            Err(_) => {
                tracing::warn!(
                    identity = %identity,
                    timeout_secs = self.settings.address_timeout.as_secs(),
                    "Public address lookup timed out, continuing without it"
                );
                None
            }
        }
    }

    async fn open_firewall(&self, identity: &Identity, port: u16) {
        if let Err(e) = self.firewall.allow(port).await {
            tracing::warn!(identity = %identity, port, error = %e, "Failed to open firewall port");
        }
    }
}
