//! Shared store of provisioning outcomes, keyed by identity.
//!
//! The owning pipeline task is the only writer for its identity; pollers
//! read concurrently. Records are whole values swapped under a lock, so a
//! reader sees either the previous record or the new one, never a mix.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

use secrecy::SecretString;
use tokio::sync::RwLock;

use crate::identity::Identity;

/// Login issued for an environment.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

/// Where and how to reach a ready environment.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Public address, absent when the lookup failed.
    pub host_ip: Option<IpAddr>,
    pub host_port: u16,
    pub credentials: Credentials,
}

impl ConnectionInfo {
    /// `ip:port` (bracketed for IPv6), when the address is known.
    pub fn address(&self) -> Option<String> {
        self.host_ip
            .map(|ip| SocketAddr::new(ip, self.host_port).to_string())
    }
}

/// Outcome of one provisioning run.
#[derive(Debug, Clone)]
pub enum ProvisioningRecord {
    Pending,
    Ready(ConnectionInfo),
    Error { message: String },
}

impl ProvisioningRecord {
    pub fn status(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready(_) => "ready",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_finished(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Concurrency-safe identity -> record map.
#[derive(Debug, Default)]
pub struct ProgressStore {
    records: RwLock<HashMap<Identity, ProvisioningRecord>>,
}

impl ProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a record, replacing any previous one for `identity`.
    pub async fn put(&self, identity: Identity, record: ProvisioningRecord) {
        tracing::debug!(identity = %identity, status = record.status(), "Publishing provisioning record");
        self.records.write().await.insert(identity, record);
    }

    pub async fn get(&self, identity: &Identity) -> Option<ProvisioningRecord> {
        self.records.read().await.get(identity).cloned()
    }

    pub async fn remove(&self, identity: &Identity) -> Option<ProvisioningRecord> {
        self.records.write().await.remove(identity)
    }

    /// Remove and return the record only if it is `Ready` or `Error`.
    ///
    /// Check and removal happen under one write lock, so a finished record
    /// is handed to exactly one consumer.
    pub async fn take_finished(&self, identity: &Identity) -> Option<ProvisioningRecord> {
        let mut records = self.records.write().await;
        if records.get(identity).is_some_and(ProvisioningRecord::is_finished) {
            records.remove(identity)
        } else {
            None
        }
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn id(name: &str) -> Identity {
        Identity::parse(name).unwrap()
    }

    fn ready(port: u16) -> ProvisioningRecord {
        ProvisioningRecord::Ready(ConnectionInfo {
            host_ip: Some("1.2.3.4".parse().unwrap()),
            host_port: port,
            credentials: Credentials {
                username: "root".to_string(),
                password: SecretString::from("root".to_string()),
            },
        })
    }

    #[tokio::test]
    async fn put_get_remove() {
        let store = ProgressStore::new();
        store.put(id("alice"), ProvisioningRecord::Pending).await;
        assert_eq!(store.get(&id("alice")).await.unwrap().status(), "pending");

        store.put(id("alice"), ready(32000)).await;
        assert_eq!(store.get(&id("alice")).await.unwrap().status(), "ready");

        assert!(store.remove(&id("alice")).await.is_some());
        assert!(store.get(&id("alice")).await.is_none());
        assert!(store.remove(&id("alice")).await.is_none());
    }

    #[tokio::test]
    async fn take_finished_leaves_pending_in_place() {
        let store = ProgressStore::new();
        store.put(id("alice"), ProvisioningRecord::Pending).await;

        assert!(store.take_finished(&id("alice")).await.is_none());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn take_finished_consumes_exactly_once() {
        let store = Arc::new(ProgressStore::new());
        store
            .put(
                id("bob"),
                ProvisioningRecord::Error {
                    message: "timeout".to_string(),
                },
            )
            .await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.take_finished(&id("bob")).await.is_some()
            }));
        }

        let mut taken = 0;
        for handle in handles {
            if handle.await.unwrap() {
                taken += 1;
            }
        }
        assert_eq!(taken, 1);
        assert!(store.is_empty().await);
    }

    #[test]
    fn address_formats_by_family() {
        let mut info = match ready(32000) {
            ProvisioningRecord::Ready(info) => info,
            _ => unreachable!(),
        };
        assert_eq!(info.address().as_deref(), Some("1.2.3.4:32000"));

        info.host_ip = Some("2001:db8::1".parse().unwrap());
        assert_eq!(info.address().as_deref(), Some("[2001:db8::1]:32000"));

        info.host_ip = None;
        assert_eq!(info.address(), None);
    }
}
