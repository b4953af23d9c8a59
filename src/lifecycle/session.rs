//! Server-side sessions and identity claims.
//!
//! Clients only ever hold an opaque [`SessionToken`]; identity, expiry and
//! credentials stay here, so none of them can be tampered with.

use std::collections::HashMap;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::LifecycleError;
use crate::identity::Identity;
use crate::provisioning::ConnectionInfo;

/// Opaque bearer token naming one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionToken(Uuid);

impl SessionToken {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Uuid::parse_str(raw.trim()).ok().map(Self)
    }
}

impl std::fmt::Display for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A provisioned environment owned by an active session.
#[derive(Debug, Clone)]
pub struct Environment {
    pub identity: Identity,
    pub connection: ConnectionInfo,
    pub created_at: DateTime<Utc>,
}

/// An active session's environment and deadline.
#[derive(Debug, Clone)]
pub struct ActiveSession {
    pub environment: Environment,
    pub expiry: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum SessionState {
    Provisioning { started_at: DateTime<Utc> },
    Active(ActiveSession),
}

/// Coarse state as reported to callers. `Anonymous` means no session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Anonymous,
    Provisioning,
    Active,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Anonymous => write!(f, "anonymous"),
            Self::Provisioning => write!(f, "provisioning"),
            Self::Active => write!(f, "active"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub token: SessionToken,
    pub identity: Identity,
    pub state: SessionState,
}

impl Session {
    pub fn phase(&self) -> SessionPhase {
        match self.state {
            SessionState::Provisioning { .. } => SessionPhase::Provisioning,
            SessionState::Active(_) => SessionPhase::Active,
        }
    }
}

/// Why an identity is unavailable for registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Claim {
    /// Held by a live session.
    Session(SessionToken),
    /// Session logged out mid-provisioning; the pipeline task settles it.
    Abandoned,
    /// Environment is being destroyed.
    TearingDown,
}

/// Sessions by token plus the identity claims that enforce uniqueness.
///
/// Always accessed under one lock so that check-and-claim is atomic.
#[derive(Debug, Default)]
pub(crate) struct SessionTable {
    sessions: HashMap<SessionToken, Session>,
    claims: HashMap<Identity, Claim>,
}

impl SessionTable {
    /// Claim `identity` with a new provisioning session.
    pub(crate) fn claim(
        &mut self,
        identity: &Identity,
        now: DateTime<Utc>,
    ) -> Result<SessionToken, LifecycleError> {
        if self.claims.contains_key(identity) {
            return Err(LifecycleError::DuplicateIdentity(identity.clone()));
        }
        let token = SessionToken::generate();
        self.claims.insert(identity.clone(), Claim::Session(token));
        self.sessions.insert(
            token,
            Session {
                token,
                identity: identity.clone(),
                state: SessionState::Provisioning { started_at: now },
            },
        );
        Ok(token)
    }

    pub(crate) fn get(&self, token: &SessionToken) -> Option<&Session> {
        self.sessions.get(token)
    }

    pub(crate) fn get_mut(&mut self, token: &SessionToken) -> Option<&mut Session> {
        self.sessions.get_mut(token)
    }

    pub(crate) fn claim_of(&self, identity: &Identity) -> Option<Claim> {
        self.claims.get(identity).copied()
    }

    /// Drop a session and free its identity (failed provisioning).
    pub(crate) fn discard(&mut self, token: &SessionToken) -> Option<Session> {
        let session = self.sessions.remove(token)?;
        if self.claims.get(&session.identity) == Some(&Claim::Session(*token)) {
            self.claims.remove(&session.identity);
        }
        Some(session)
    }

    /// Drop a session whose environment is about to be destroyed. The
    /// identity stays claimed until [`SessionTable::release`].
    pub(crate) fn begin_teardown(&mut self, token: &SessionToken) -> Option<Identity> {
        let session = self.sessions.remove(token)?;
        self.claims
            .insert(session.identity.clone(), Claim::TearingDown);
        Some(session.identity)
    }

    /// Drop a session without touching its environment.
    ///
    /// A provisioning session leaves an [`Claim::Abandoned`] marker behind
    /// so the identity cannot be re-registered while its pipeline runs.
    pub(crate) fn logout(&mut self, token: &SessionToken) -> Option<Session> {
        let session = self.sessions.remove(token)?;
        match session.state {
            SessionState::Provisioning { .. } => {
                self.claims
                    .insert(session.identity.clone(), Claim::Abandoned);
            }
            SessionState::Active(_) => {
                self.claims.remove(&session.identity);
            }
        }
        Some(session)
    }

    /// Free `identity` if it is still held by `claim`.
    ///
    /// Live session claims are never released here; they go away with
    /// their session.
    pub(crate) fn release(&mut self, identity: &Identity, claim: Claim) {
        if matches!(claim, Claim::Session(_)) {
            return;
        }
        if self.claims.get(identity) == Some(&claim) {
            self.claims.remove(identity);
        }
    }

    /// Claim an unclaimed identity for a teardown that has no session.
    /// Returns `false` if the identity is already claimed.
    pub(crate) fn hold_for_teardown(&mut self, identity: &Identity) -> bool {
        if self.claims.contains_key(identity) {
            return false;
        }
        self.claims.insert(identity.clone(), Claim::TearingDown);
        true
    }

    /// Tokens of sessions still provisioning that started at least `grace`
    /// before `now`.
    pub(crate) fn stale_provisioning(
        &self,
        now: DateTime<Utc>,
        grace: TimeDelta,
    ) -> Vec<SessionToken> {
        self.sessions
            .values()
            .filter_map(|s| match s.state {
                SessionState::Provisioning { started_at }
                    if started_at
                        .checked_add_signed(grace)
                        .is_some_and(|deadline| now >= deadline) =>
                {
                    Some(s.token)
                }
                _ => None,
            })
            .collect()
    }

    /// Tokens of active sessions whose expiry has passed at `now`.
    pub(crate) fn expired_tokens(&self, now: DateTime<Utc>) -> Vec<SessionToken> {
        self.sessions
            .values()
            .filter_map(|s| match &s.state {
                SessionState::Active(active) if now >= active.expiry => Some(s.token),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> Identity {
        Identity::parse(name).unwrap()
    }

    #[test]
    fn token_round_trips_through_text() {
        let token = SessionToken::generate();
        assert_eq!(SessionToken::parse(&token.to_string()), Some(token));
        assert_eq!(SessionToken::parse("not-a-token"), None);
    }

    #[test]
    fn claim_is_exclusive() {
        let mut table = SessionTable::default();
        let now = Utc::now();
        let token = table.claim(&id("alice"), now).unwrap();

        assert_eq!(
            table.claim(&id("alice"), now),
            Err(LifecycleError::DuplicateIdentity(id("alice")))
        );
        assert_eq!(table.get(&token).unwrap().phase(), SessionPhase::Provisioning);
        assert_eq!(table.len(), 1);
        assert!(table.claim(&id("bob"), now).is_ok());
    }

    #[test]
    fn discard_frees_identity() {
        let mut table = SessionTable::default();
        let token = table.claim(&id("alice"), Utc::now()).unwrap();

        assert!(table.discard(&token).is_some());
        assert!(table.get(&token).is_none());
        assert_eq!(table.claim_of(&id("alice")), None);
    }

    #[test]
    fn logout_while_provisioning_keeps_identity_claimed() {
        let mut table = SessionTable::default();
        let token = table.claim(&id("alice"), Utc::now()).unwrap();

        table.logout(&token);
        assert_eq!(table.claim_of(&id("alice")), Some(Claim::Abandoned));
        assert!(table.claim(&id("alice"), Utc::now()).is_err());

        table.release(&id("alice"), Claim::TearingDown);
        assert_eq!(table.claim_of(&id("alice")), Some(Claim::Abandoned));
        table.release(&id("alice"), Claim::Abandoned);
        assert!(table.claim(&id("alice"), Utc::now()).is_ok());
    }

    #[test]
    fn teardown_holds_claim_until_release() {
        let mut table = SessionTable::default();
        let token = table.claim(&id("alice"), Utc::now()).unwrap();

        assert_eq!(table.begin_teardown(&token), Some(id("alice")));
        assert_eq!(table.begin_teardown(&token), None);
        assert_eq!(table.claim_of(&id("alice")), Some(Claim::TearingDown));

        table.release(&id("alice"), Claim::TearingDown);
        assert_eq!(table.claim_of(&id("alice")), None);
    }

    #[test]
    fn release_ignores_live_sessions() {
        let mut table = SessionTable::default();
        let token = table.claim(&id("alice"), Utc::now()).unwrap();

        table.release(&id("alice"), Claim::Session(token));
        assert_eq!(table.claim_of(&id("alice")), Some(Claim::Session(token)));
    }

    #[test]
    fn teardown_hold_only_takes_free_identities() {
        let mut table = SessionTable::default();
        table.claim(&id("alice"), Utc::now()).unwrap();

        assert!(!table.hold_for_teardown(&id("alice")));
        assert!(table.hold_for_teardown(&id("bob")));
        assert_eq!(table.claim_of(&id("bob")), Some(Claim::TearingDown));
        assert!(table.claim(&id("bob"), Utc::now()).is_err());
    }

    #[test]
    fn stale_provisioning_respects_grace() {
        let mut table = SessionTable::default();
        let start = Utc::now();
        let token = table.claim(&id("alice"), start).unwrap();

        let grace = TimeDelta::hours(1);
        assert!(table.stale_provisioning(start + TimeDelta::minutes(59), grace).is_empty());
        assert_eq!(table.stale_provisioning(start + grace, grace), vec![token]);
    }
}
