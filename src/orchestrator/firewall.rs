//! Host firewall control.

use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::LookupError;
use crate::orchestrator::client::Firewall;

/// Opens ports with `ufw allow <port>`.
pub struct UfwFirewall {
    bin: String,
    timeout: Duration,
}

impl UfwFirewall {
    pub fn new(timeout: Duration) -> Self {
        Self {
            bin: "ufw".to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl Firewall for UfwFirewall {
    async fn allow(&self, port: u16) -> Result<(), LookupError> {
        let output = tokio::time::timeout(
            self.timeout,
            Command::new(&self.bin)
                .arg("allow")
                .arg(port.to_string())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| LookupError::Firewall {
            port,
            reason: format!("timed out after {}s", self.timeout.as_secs()),
        })?
        .map_err(|e| LookupError::Firewall {
            port,
            reason: e.to_string(),
        })?;

        if !output.status.success() {
            return Err(LookupError::Firewall {
                port,
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

/// Used when firewall management is disabled.
pub struct NoopFirewall;

#[async_trait]
impl Firewall for NoopFirewall {
    async fn allow(&self, port: u16) -> Result<(), LookupError> {
        tracing::debug!(port, "Firewall management disabled, not opening port");
        Ok(())
    }
}
