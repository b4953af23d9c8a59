//! Docker Compose backed orchestration.
//!
//! Each identity gets its own Compose project (`-p <identity>`) built from
//! a shared compose file, so environments are isolated by project name and
//! `docker compose down` removes exactly one user's containers.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::config::ComposeConfig;
use crate::error::OrchestratorError;
use crate::identity::Identity;
use crate::orchestrator::client::OrchestrationClient;

/// Orchestration client that shells out to `docker compose`.
pub struct ComposeCli {
    config: ComposeConfig,
}

impl ComposeCli {
    pub fn new(config: ComposeConfig) -> Self {
        Self { config }
    }

    /// Arguments for `docker compose -p <identity> -f <file> <args..>`.
    fn compose_args(&self, identity: &Identity, args: &[&str]) -> Vec<String> {
        let mut argv = vec![
            "compose".to_string(),
            "-p".to_string(),
            identity.to_string(),
            "-f".to_string(),
            self.config.compose_file.display().to_string(),
        ];
        argv.extend(args.iter().map(|a| a.to_string()));
        argv
    }

    /// Run a compose subcommand, returning stdout on success and the trimmed
    /// stderr as the error reason otherwise.
    async fn run(&self, identity: &Identity, args: &[&str]) -> Result<String, OrchestratorError> {
        let argv = self.compose_args(identity, args);
        let operation = format!("docker compose {}", args.join(" "));

        tracing::debug!(identity = %identity, command = %operation, "Running compose command");

        let child = Command::new(&self.config.docker_bin)
            .args(&argv)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| OrchestratorError::Spawn {
                program: self.config.docker_bin.clone(),
                source: e,
            })?;

        let output = tokio::time::timeout(self.config.command_timeout, child.wait_with_output())
            .await
            .map_err(|_| OrchestratorError::Timeout {
                operation: operation.clone(),
                secs: self.config.command_timeout.as_secs(),
            })?
            .map_err(|e| OrchestratorError::Spawn {
                program: self.config.docker_bin.clone(),
                source: e,
            })?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            Err(OrchestratorError::CommandFailed {
                operation,
                reason: if stderr.is_empty() {
                    format!("exited with {}", output.status)
                } else {
                    stderr
                },
            })
        }
    }
}

#[async_trait]
impl OrchestrationClient for ComposeCli {
    async fn launch(&self, identity: &Identity) -> Result<(), OrchestratorError> {
        self.run(identity, &["up", "-d"])
            .await
            .map_err(|e| OrchestratorError::LaunchFailed {
                identity: identity.clone(),
                reason: e.to_string(),
            })?;

        tracing::info!(identity = %identity, "Compose project started");
        Ok(())
    }

    async fn resolve_port(
        &self,
        identity: &Identity,
        container_port: u16,
    ) -> Result<u16, OrchestratorError> {
        let port_arg = container_port.to_string();
        let stdout = self
            .run(identity, &["port", &self.config.service, &port_arg])
            .await
            .map_err(|e| OrchestratorError::PortResolutionFailed {
                identity: identity.clone(),
                reason: e.to_string(),
            })?;

        parse_port_output(&stdout).ok_or_else(|| OrchestratorError::PortNotBound {
            identity: identity.clone(),
            container_port,
        })
    }

    async fn destroy(&self, identity: &Identity) -> Result<(), OrchestratorError> {
        // `down` on a project that no longer exists exits 0, which keeps
        // repeated teardowns harmless.
        self.run(identity, &["down"])
            .await
            .map_err(|e| OrchestratorError::DestroyFailed {
                identity: identity.clone(),
                reason: e.to_string(),
            })?;

        tracing::info!(identity = %identity, "Compose project removed");
        Ok(())
    }
}

/// Extract the host port from `docker compose port` output.
///
/// Output looks like `0.0.0.0:32768`, possibly followed by an IPv6 line
/// (`[::]:32768`). Empty output means the port is not published.
fn parse_port_output(stdout: &str) -> Option<u16> {
    stdout
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .and_then(|line| line.rsplit(':').next())
        .and_then(|port| port.parse().ok())
        .filter(|port| *port != 0)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use super::*;

    fn cli() -> ComposeCli {
        ComposeCli::new(ComposeConfig {
            compose_file: PathBuf::from("/srv/ctf/docker-compose.yml"),
            ..Default::default()
        })
    }

    #[test]
    fn builds_project_scoped_arguments() {
        let id = Identity::parse("alice").unwrap();
        let argv = cli().compose_args(&id, &["port", "kali", "22"]);
        assert_eq!(
            argv,
            vec![
                "compose",
                "-p",
                "alice",
                "-f",
                "/srv/ctf/docker-compose.yml",
                "port",
                "kali",
                "22"
            ]
        );
    }

    #[test]
    fn parses_ipv4_binding() {
        assert_eq!(parse_port_output("0.0.0.0:32000\n"), Some(32000));
    }

    #[test]
    fn parses_first_of_dual_stack_bindings() {
        assert_eq!(parse_port_output("0.0.0.0:32768\n[::]:32768\n"), Some(32768));
    }

    #[test]
    fn empty_or_garbage_output_is_unbound() {
        assert_eq!(parse_port_output(""), None);
        assert_eq!(parse_port_output("\n  \n"), None);
        assert_eq!(parse_port_output("0.0.0.0:abc"), None);
        assert_eq!(parse_port_output(":0"), None);
    }

    #[tokio::test]
    async fn missing_binary_is_a_spawn_error() {
        let cli = ComposeCli::new(ComposeConfig {
            docker_bin: "/definitely/not/a/docker/binary".to_string(),
            command_timeout: Duration::from_secs(5),
            ..Default::default()
        });
        let id = Identity::parse("alice").unwrap();

        let err = cli.launch(&id).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::LaunchFailed { .. }));
        assert!(err.to_string().contains("alice"));
    }
}
