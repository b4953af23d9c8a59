//! Per-session lifecycle.
//!
//! ```text
//!              register                 poll (ready)
//! anonymous ─────────────▶ provisioning ─────────────▶ active ◀─┐ extend
//!     ▲                        │                         │ │    │
//!     │        poll (error)    │                         │ └────┘
//!     ├────────────────────────┘                         │
//!     │                              access after expiry │
//!     └────────────── teardown ◀──────── expired ◀───────┘
//! ```
//!
//! All sessions and identity claims sit behind one mutex so that checking
//! and claiming an identity is a single step. Environment destruction
//! always happens after that lock is released.

pub mod session;
pub mod teardown;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::Instrument;

pub use session::{ActiveSession, Environment, Session, SessionPhase, SessionState, SessionToken};
pub use teardown::{TeardownExecutor, TeardownOutcome};

use crate::clock::Clock;
use crate::config::LabConfig;
use crate::error::{ConfigError, LifecycleError};
use crate::identity::Identity;
use crate::notify::format_time_left;
use crate::provisioning::{ProvisioningPipeline, ProvisioningRecord};
use session::{Claim, SessionTable};

/// Shown to a user whose session ran out.
pub const EXPIRED_NOTICE: &str = "Your time has expired. The environment has been removed.";

#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    /// Lifetime granted when a session becomes active.
    pub session_ttl: TimeDelta,
    /// Added to the current expiry by each extension.
    pub extend_by: TimeDelta,
    pub flag: SecretString,
}

impl LifecycleSettings {
    pub fn from_config(lab: &LabConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            session_ttl: to_delta("LAB_SESSION_TTL_SECS", lab.session_ttl)?,
            extend_by: to_delta("LAB_EXTEND_SECS", lab.extend_by)?,
            flag: lab.flag.clone(),
        })
    }
}

fn to_delta(key: &str, duration: Duration) -> Result<TimeDelta, ConfigError> {
    TimeDelta::from_std(duration).map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}

/// Acknowledgment returned by [`LabLifecycle::register`].
#[derive(Debug, Clone, Serialize)]
pub struct Registration {
    pub session: SessionToken,
    pub identity: Identity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PollStatus {
    Pending,
    Ready,
    Error {
        #[serde(rename = "error")]
        message: String,
    },
}

/// Everything the user needs to reach their environment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardView {
    pub identity: Identity,
    pub username: String,
    pub password: String,
    pub host_ip: Option<String>,
    pub host_port: u16,
    pub address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expiry: DateTime<Utc>,
    pub time_left: String,
}

impl DashboardView {
    fn new(active: &ActiveSession, now: DateTime<Utc>) -> Self {
        let env = &active.environment;
        let connection = &env.connection;
        Self {
            identity: env.identity.clone(),
            username: connection.credentials.username.clone(),
            password: connection.credentials.password.expose_secret().to_string(),
            host_ip: connection.host_ip.map(|ip| ip.to_string()),
            host_port: connection.host_port,
            address: connection.address(),
            created_at: env.created_at,
            expiry: active.expiry,
            time_left: format_time_left(active.expiry - now),
        }
    }
}

/// Outcome of an operation on an active session.
///
/// Expiry is not an error: the caller gets [`Access::Expired`] and the
/// environment has already been torn down.
#[derive(Debug, Clone, PartialEq)]
pub enum Access<T> {
    Granted(T),
    Expired,
}

enum TeardownPlan {
    Destroy,
    Logout(SessionToken),
    Deferred,
}

/// Drives sessions through their lifecycle and owns the identity claims.
pub struct LabLifecycle {
    pipeline: Arc<ProvisioningPipeline>,
    teardown: TeardownExecutor,
    clock: Arc<dyn Clock>,
    settings: LifecycleSettings,
    table: Mutex<SessionTable>,
}

impl LabLifecycle {
    pub fn new(
        pipeline: Arc<ProvisioningPipeline>,
        teardown: TeardownExecutor,
        clock: Arc<dyn Clock>,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            pipeline,
            teardown,
            clock,
            settings,
            table: Mutex::new(SessionTable::default()),
        }
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Claim `raw` as an identity and start provisioning in the background.
    ///
    /// Returns as soon as the claim is recorded; the pipeline outcome is
    /// observed through [`LabLifecycle::poll_status`].
    pub async fn register(self: &Arc<Self>, raw: &str) -> Result<Registration, LifecycleError> {
        let identity = Identity::parse(raw)?;

        let token = {
            let mut table = self.table.lock().await;
            let token = table.claim(&identity, self.clock.now())?;
            self.pipeline.begin(&identity).await;
            token
        };

        tracing::info!(identity = %identity, session = %token, "Registered, provisioning started");

        let lifecycle = Arc::clone(self);
        let task_identity = identity.clone();
        let span = tracing::info_span!("provision", identity = %identity);
        tokio::spawn(
            async move {
                lifecycle.pipeline.run(&task_identity).await;
                lifecycle.settle_abandoned(&task_identity).await;
            }
            .instrument(span),
        );

        Ok(Registration {
            session: token,
            identity,
        })
    }

    /// Report provisioning progress, activating the session once the
    /// pipeline has finished successfully.
    pub async fn poll_status(&self, token: &SessionToken) -> Result<PollStatus, LifecycleError> {
        let now = self.clock.now();
        let mut table = self.table.lock().await;
        let session = table.get_mut(token).ok_or(LifecycleError::NoSession)?;
        if matches!(session.state, SessionState::Active(_)) {
            return Ok(PollStatus::Ready);
        }

        let identity = session.identity.clone();
        match self.pipeline.progress().take_finished(&identity).await {
            Some(ProvisioningRecord::Ready(connection)) => {
                let expiry = now
                    .checked_add_signed(self.settings.session_ttl)
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);
                session.state = SessionState::Active(ActiveSession {
                    environment: Environment {
                        identity: identity.clone(),
                        connection,
                        created_at: now,
                    },
                    expiry,
                });
                tracing::info!(identity = %identity, expiry = %expiry, "Session active");
                Ok(PollStatus::Ready)
            }
            Some(ProvisioningRecord::Error { message }) => {
                table.discard(token);
                tracing::info!(identity = %identity, "Provisioning failed, identity released");
                Ok(PollStatus::Error { message })
            }
            Some(ProvisioningRecord::Pending) | None => Ok(PollStatus::Pending),
        }
    }

    pub async fn dashboard(
        &self,
        token: &SessionToken,
    ) -> Result<Access<DashboardView>, LifecycleError> {
        self.with_active(token, |active, now| DashboardView::new(active, now))
            .await
    }

    /// Push the expiry out by the configured increment. The increment is
    /// added to the current expiry, never to "now".
    pub async fn extend(
        &self,
        token: &SessionToken,
    ) -> Result<Access<DateTime<Utc>>, LifecycleError> {
        let extend_by = self.settings.extend_by;
        self.with_active(token, move |active, _| {
            if let Some(next) = active.expiry.checked_add_signed(extend_by) {
                active.expiry = next;
            }
            tracing::info!(
                identity = %active.environment.identity,
                expiry = %active.expiry,
                "Session extended"
            );
            active.expiry
        })
        .await
    }

    /// Check a flag on behalf of an active session. Never changes the
    /// session unless it has already expired.
    pub async fn submit_flag(
        &self,
        token: &SessionToken,
        submitted: &str,
    ) -> Result<Access<bool>, LifecycleError> {
        let correct = self.check_flag(submitted);
        self.with_active(token, move |active, _| {
            tracing::info!(identity = %active.environment.identity, correct, "Flag submitted");
            correct
        })
        .await
    }

    /// Compare against the configured flag. Needs no session.
    pub fn check_flag(&self, submitted: &str) -> bool {
        submitted == self.settings.flag.expose_secret()
    }

    /// Drop the session behind `token` without tearing anything down.
    ///
    /// A session still provisioning keeps its identity claimed until the
    /// pipeline finishes; whoever consumes that outcome destroys the
    /// environment nobody can reach any more. Returns `false` when there
    /// was no session.
    pub async fn logout(&self, token: &SessionToken) -> bool {
        let orphaned = {
            let mut table = self.table.lock().await;
            let Some(session) = table.logout(token) else {
                return false;
            };
            tracing::info!(identity = %session.identity, phase = %session.phase(), "Logged out");

            match session.state {
                SessionState::Active(_) => None,
                SessionState::Provisioning { .. } => self
                    .pipeline
                    .progress()
                    .take_finished(&session.identity)
                    .await
                    .map(|record| (session.identity, record)),
            }
        };

        if let Some((identity, record)) = orphaned {
            self.dispose_abandoned(&identity, record).await;
        }
        true
    }

    /// Destroy `identity`'s environment and reset it to anonymous.
    ///
    /// Safe to repeat: a second call finds nothing to reset and the
    /// destroy itself is a no-op on a missing environment. The identity
    /// stays claimed until the destroy returns. An identity that is still
    /// provisioning is logged out instead and cleaned up when its pipeline
    /// finishes; one already being torn down is left to that teardown.
    pub async fn teardown(&self, identity: &Identity) -> TeardownOutcome {
        let plan = {
            let mut table = self.table.lock().await;
            match table.claim_of(identity) {
                Some(Claim::Session(token)) => match table.get(&token).map(Session::phase) {
                    Some(SessionPhase::Active) => {
                        table.begin_teardown(&token);
                        TeardownPlan::Destroy
                    }
                    _ => TeardownPlan::Logout(token),
                },
                Some(Claim::Abandoned | Claim::TearingDown) => TeardownPlan::Deferred,
                None => {
                    table.hold_for_teardown(identity);
                    TeardownPlan::Destroy
                }
            }
        };

        match plan {
            TeardownPlan::Destroy => self.finish_teardown(identity).await,
            TeardownPlan::Logout(token) => {
                self.logout(&token).await;
                TeardownOutcome::Deferred
            }
            TeardownPlan::Deferred => TeardownOutcome::Deferred,
        }
    }

    /// Tear down every active session whose expiry has passed, and settle
    /// registrations that finished provisioning but were never polled
    /// within one session lifetime of starting.
    ///
    /// Returns the number of sessions removed.
    pub async fn reap_expired(&self) -> usize {
        let now = self.clock.now();
        let (expired, failed) = {
            let mut table = self.table.lock().await;
            let tokens = table.expired_tokens(now);
            let mut expired: Vec<Identity> = tokens
                .iter()
                .filter_map(|token| table.begin_teardown(token))
                .collect();

            let mut failed = 0;
            for token in table.stale_provisioning(now, self.settings.session_ttl) {
                let Some(identity) = table.get(&token).map(|s| s.identity.clone()) else {
                    continue;
                };
                match self.pipeline.progress().take_finished(&identity).await {
                    Some(ProvisioningRecord::Ready(_)) => {
                        tracing::info!(identity = %identity, "Reaping environment nobody polled for");
                        table.begin_teardown(&token);
                        expired.push(identity);
                    }
                    Some(ProvisioningRecord::Error { .. }) => {
                        tracing::info!(identity = %identity, "Releasing unpolled failed registration");
                        table.discard(&token);
                        failed += 1;
                    }
                    Some(ProvisioningRecord::Pending) | None => {}
                }
            }
            (expired, failed)
        };

        for identity in &expired {
            tracing::info!(identity = %identity, "Reaping expired session");
            self.finish_teardown(identity).await;
        }
        expired.len() + failed
    }

    /// Sweep for expired sessions every `every` until `shutdown` fires.
    pub fn spawn_reaper(
        self: &Arc<Self>,
        every: Duration,
        shutdown: oneshot::Receiver<()>,
    ) -> JoinHandle<()> {
        let lifecycle = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut shutdown = std::pin::pin!(shutdown);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let reaped = lifecycle.reap_expired().await;
                        if reaped > 0 {
                            tracing::info!(reaped, "Expiry sweep removed sessions");
                        }
                    }
                    _ = &mut shutdown => {
                        tracing::debug!("Expiry reaper stopping");
                        break;
                    }
                }
            }
        })
    }

    /// Coarse state of the session behind `token`.
    pub async fn phase(&self, token: &SessionToken) -> SessionPhase {
        self.table
            .lock()
            .await
            .get(token)
            .map(Session::phase)
            .unwrap_or(SessionPhase::Anonymous)
    }

    /// Whether `identity` is unavailable for registration right now.
    pub async fn is_claimed(&self, identity: &Identity) -> bool {
        self.table.lock().await.claim_of(identity).is_some()
    }

    pub async fn session_count(&self) -> usize {
        self.table.lock().await.len()
    }

    /// Run `op` against an unexpired active session, or expire it.
    async fn with_active<T>(
        &self,
        token: &SessionToken,
        op: impl FnOnce(&mut ActiveSession, DateTime<Utc>) -> T,
    ) -> Result<Access<T>, LifecycleError> {
        let now = self.clock.now();
        let expired = {
            let mut table = self.table.lock().await;
            let Some(SessionState::Active(active)) = table.get_mut(token).map(|s| &mut s.state)
            else {
                return Err(LifecycleError::NoSession);
            };
            if now < active.expiry {
                return Ok(Access::Granted(op(active, now)));
            }
            tracing::info!(
                identity = %active.environment.identity,
                expiry = %active.expiry,
                "Session expired"
            );
            table.begin_teardown(token)
        };

        if let Some(identity) = expired {
            self.finish_teardown(&identity).await;
        }
        Ok(Access::Expired)
    }

    async fn finish_teardown(&self, identity: &Identity) -> TeardownOutcome {
        let outcome = self.teardown.destroy(identity).await;
        self.table
            .lock()
            .await
            .release(identity, Claim::TearingDown);
        outcome
    }

    /// Runs on the pipeline task once its outcome is published. Only acts
    /// when the session was logged out mid-provisioning.
    async fn settle_abandoned(&self, identity: &Identity) {
        let record = {
            let table = self.table.lock().await;
            if table.claim_of(identity) != Some(Claim::Abandoned) {
                return;
            }
            self.pipeline.progress().take_finished(identity).await
        };

        if let Some(record) = record {
            self.dispose_abandoned(identity, record).await;
        }
    }

    async fn dispose_abandoned(&self, identity: &Identity, record: ProvisioningRecord) {
        if let ProvisioningRecord::Ready(_) = record {
            tracing::info!(identity = %identity, "Tearing down environment abandoned during provisioning");
            self.teardown.destroy(identity).await;
        }
        self.table
            .lock()
            .await
            .release(identity, Claim::Abandoned);
    }
}
