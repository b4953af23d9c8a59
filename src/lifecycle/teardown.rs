//! Best-effort environment destruction.

use std::sync::Arc;

use crate::identity::Identity;
use crate::orchestrator::OrchestrationClient;

/// What happened when an environment was torn down.
///
/// Purely informational: the session is already gone either way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeardownOutcome {
    Destroyed,
    Failed { reason: String },
    /// Still provisioning, or another teardown already holds the identity.
    /// The pipeline or the teardown in progress destroys the environment.
    Deferred,
}

/// Destroys environments without ever failing the caller.
#[derive(Clone)]
pub struct TeardownExecutor {
    orchestrator: Arc<dyn OrchestrationClient>,
}

impl TeardownExecutor {
    pub fn new(orchestrator: Arc<dyn OrchestrationClient>) -> Self {
        Self { orchestrator }
    }

    pub async fn destroy(&self, identity: &Identity) -> TeardownOutcome {
        match self.orchestrator.destroy(identity).await {
            Ok(()) => {
                tracing::info!(identity = %identity, "Environment destroyed");
                TeardownOutcome::Destroyed
            }
            Err(e) => {
                tracing::warn!(
                    identity = %identity,
                    error = %e,
                    "Failed to destroy environment (may require manual cleanup)"
                );
                TeardownOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }
}
