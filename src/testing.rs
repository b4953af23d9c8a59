//! Test doubles for the external collaborators.
//!
//! Used by unit tests inside the crate and by the integration tests under
//! `tests/`, so none of them need Docker, ufw, or network access.

use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use secrecy::SecretString;
use tokio::sync::Semaphore;

use crate::clock::Clock;
use crate::error::{LookupError, OrchestratorError};
use crate::identity::Identity;
use crate::lifecycle::{LabLifecycle, LifecycleSettings, TeardownExecutor};
use crate::orchestrator::{AddressResolver, Firewall, OrchestrationClient};
use crate::provisioning::{Credentials, PipelineSettings, ProgressStore, ProvisioningPipeline};

/// Flag accepted by lifecycles built with [`stub_lifecycle`].
pub const TEST_FLAG: &str = "flag{test}";

/// A lifecycle over `orchestrator` and `clock` with the stock settings:
/// one hour sessions, 30 minute extensions, `root`/`root` credentials,
/// public address 1.2.3.4 and [`TEST_FLAG`].
pub fn stub_lifecycle(
    orchestrator: Arc<StubOrchestrator>,
    clock: Arc<ManualClock>,
) -> Arc<LabLifecycle> {
    let pipeline = ProvisioningPipeline::new(
        orchestrator.clone(),
        Arc::new(StubFirewall::default()),
        Arc::new(StubResolver::address("1.2.3.4")),
        Arc::new(ProgressStore::new()),
        PipelineSettings {
            service_port: 22,
            credentials: Credentials {
                username: "root".to_string(),
                password: SecretString::from("root".to_string()),
            },
            address_timeout: Duration::from_secs(5),
            rollback_on_failure: true,
        },
    );
    Arc::new(LabLifecycle::new(
        Arc::new(pipeline),
        TeardownExecutor::new(orchestrator),
        clock,
        LifecycleSettings {
            session_ttl: TimeDelta::hours(1),
            extend_by: TimeDelta::minutes(30),
            flag: SecretString::from(TEST_FLAG.to_string()),
        },
    ))
}

#[derive(Debug, Clone)]
enum LaunchBehavior {
    Succeed,
    Fail(String),
}

#[derive(Debug, Clone, Copy)]
enum PortBehavior {
    Bound(u16),
    Unbound,
}

/// Scripted [`OrchestrationClient`] that records every call.
#[derive(Debug)]
pub struct StubOrchestrator {
    launch: LaunchBehavior,
    port: PortBehavior,
    fail_destroy: bool,
    gate: Option<Semaphore>,
    destroy_gate: Option<Semaphore>,
    launched: Mutex<Vec<Identity>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    port_lookups: AtomicUsize,
    destroyed: Mutex<Vec<Identity>>,
}

impl StubOrchestrator {
    fn new(launch: LaunchBehavior, port: PortBehavior) -> Self {
        Self {
            launch,
            port,
            fail_destroy: false,
            gate: None,
            destroy_gate: None,
            launched: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            port_lookups: AtomicUsize::new(0),
            destroyed: Mutex::new(Vec::new()),
        }
    }

    /// Launch succeeds and the service is published on `port`.
    pub fn with_port(port: u16) -> Self {
        Self::new(LaunchBehavior::Succeed, PortBehavior::Bound(port))
    }

    /// Launch fails with `reason`.
    pub fn failing_launch(reason: &str) -> Self {
        Self::new(
            LaunchBehavior::Fail(reason.to_string()),
            PortBehavior::Bound(0),
        )
    }

    /// Launch succeeds but the service port is never published.
    pub fn unbound_port() -> Self {
        Self::new(LaunchBehavior::Succeed, PortBehavior::Unbound)
    }

    /// Every destroy call fails.
    pub fn failing_destroy(mut self) -> Self {
        self.fail_destroy = true;
        self
    }

    /// Launches block until [`StubOrchestrator::release`] is called.
    pub fn held(mut self) -> Self {
        self.gate = Some(Semaphore::new(0));
        self
    }

    /// Let `n` held launches proceed.
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    /// Destroys are recorded, then block until
    /// [`StubOrchestrator::release_destroys`] is called.
    pub fn held_destroy(mut self) -> Self {
        self.destroy_gate = Some(Semaphore::new(0));
        self
    }

    pub fn release_destroys(&self, n: usize) {
        if let Some(gate) = &self.destroy_gate {
            gate.add_permits(n);
        }
    }

    pub fn launches(&self) -> usize {
        self.launched.lock().map(|l| l.len()).unwrap_or(0)
    }

    pub fn launches_for(&self, identity: &Identity) -> usize {
        self.launched
            .lock()
            .map(|l| l.iter().filter(|i| *i == identity).count())
            .unwrap_or(0)
    }

    /// Highest number of launches observed running at the same time.
    pub fn max_concurrent_launches(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn port_lookups(&self) -> usize {
        self.port_lookups.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> usize {
        self.destroyed.lock().map(|d| d.len()).unwrap_or(0)
    }

    pub fn destroyed_identities(&self) -> Vec<Identity> {
        self.destroyed.lock().map(|d| d.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl OrchestrationClient for StubOrchestrator {
    async fn launch(&self, identity: &Identity) -> Result<(), OrchestratorError> {
        if let Ok(mut launched) = self.launched.lock() {
            launched.push(identity.clone());
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(gate) = &self.gate
            && let Ok(permit) = gate.acquire().await
        {
            permit.forget();
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match &self.launch {
            LaunchBehavior::Succeed => Ok(()),
            LaunchBehavior::Fail(reason) => Err(OrchestratorError::LaunchFailed {
                identity: identity.clone(),
                reason: reason.clone(),
            }),
        }
    }

    async fn resolve_port(
        &self,
        identity: &Identity,
        container_port: u16,
    ) -> Result<u16, OrchestratorError> {
        self.port_lookups.fetch_add(1, Ordering::SeqCst);
        match self.port {
            PortBehavior::Bound(port) => Ok(port),
            PortBehavior::Unbound => Err(OrchestratorError::PortNotBound {
                identity: identity.clone(),
                container_port,
            }),
        }
    }

    async fn destroy(&self, identity: &Identity) -> Result<(), OrchestratorError> {
        if let Ok(mut destroyed) = self.destroyed.lock() {
            destroyed.push(identity.clone());
        }
        if let Some(gate) = &self.destroy_gate
            && let Ok(permit) = gate.acquire().await
        {
            permit.forget();
        }
        if self.fail_destroy {
            return Err(OrchestratorError::DestroyFailed {
                identity: identity.clone(),
                reason: "daemon unavailable".to_string(),
            });
        }
        Ok(())
    }
}

/// Records opened ports, optionally failing every call.
#[derive(Debug, Default)]
pub struct StubFirewall {
    fail: bool,
    opened: Mutex<Vec<u16>>,
}

impl StubFirewall {
    pub fn failing() -> Self {
        Self {
            fail: true,
            opened: Mutex::new(Vec::new()),
        }
    }

    pub fn opened(&self) -> Vec<u16> {
        self.opened.lock().map(|o| o.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Firewall for StubFirewall {
    async fn allow(&self, port: u16) -> Result<(), LookupError> {
        if self.fail {
            return Err(LookupError::Firewall {
                port,
                reason: "ufw: command not found".to_string(),
            });
        }
        if let Ok(mut opened) = self.opened.lock() {
            opened.push(port);
        }
        Ok(())
    }
}

/// Fixed-answer [`AddressResolver`].
#[derive(Debug)]
pub enum StubResolver {
    Address(IpAddr),
    Failing,
    Hanging,
}

impl StubResolver {
    /// Panics on an invalid literal; test-only.
    pub fn address(ip: &str) -> Self {
        Self::Address(ip.parse().expect("valid IP literal"))
    }

    pub fn failing() -> Self {
        Self::Failing
    }

    /// Never answers; exercises the caller's timeout.
    pub fn hanging() -> Self {
        Self::Hanging
    }
}

#[async_trait]
impl AddressResolver for StubResolver {
    async fn resolve(&self) -> Result<IpAddr, LookupError> {
        match self {
            Self::Address(ip) => Ok(*ip),
            Self::Failing => Err(LookupError::Address("connection refused".to_string())),
            Self::Hanging => std::future::pending().await,
        }
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: chrono::TimeDelta) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }

    pub fn set(&self, to: DateTime<Utc>) {
        if let Ok(mut now) = self.now.lock() {
            *now = to;
        }
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.lock().map(|n| *n).unwrap_or_else(|e| *e.into_inner())
    }
}
