//! Turns configuration into a bound, advertised listener.
//!
//! Adapter preparation (discoverability, device class, pairing policy) is
//! delegated to operator-supplied commands so that no adapter tooling is
//! hard-wired here. Only failing to bind is fatal.

use std::io;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;
use tracing::warn;

use crate::config::BridgeConfig;
use crate::config::ProvisioningConfig;
use crate::config::TransportConfig;
use crate::config::TransportKind;
use crate::exec::CommandExecutor;
use crate::exec::CommandStatus;
use crate::transport::Listener;
use crate::transport::TcpTransport;

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("failed to bind {transport}: {source}")]
    Bind {
        transport: String,
        #[source]
        source: io::Error,
    },

    #[error("{kind} transport is not supported on this platform")]
    Unsupported { kind: TransportKind },
}

/// Produces the listener the supervisor owns for the process lifetime.
#[async_trait]
pub trait TransportProvisioner: Send + Sync {
    async fn provision(&self) -> Result<Box<dyn Listener>, ProvisionError>;
}

#[derive(Debug, Clone)]
pub struct ConfiguredProvisioner {
    transport: TransportConfig,
    provisioning: ProvisioningConfig,
    executor: CommandExecutor,
}

impl ConfiguredProvisioner {
    pub fn new(config: &BridgeConfig) -> Self {
        Self {
            transport: config.transport.clone(),
            provisioning: config.provisioning.clone(),
            executor: CommandExecutor::from_config(&config.command),
        }
    }

    /// Runs a provisioning command. Returns whether it succeeded; failures
    /// are only logged.
    async fn run_step(&self, command: &str) -> bool {
        let outcome = self
            .executor
            .execute(command, self.provisioning.setup_timeout())
            .await;
        let output = String::from_utf8_lossy(&outcome.output);
        let output = output.trim_end();
        match (outcome.status, outcome.exit_code) {
            (CommandStatus::Success, Some(0)) => {
                info!(%command, "provisioning command succeeded");
                true
            }
            (status, exit_code) => {
                warn!(
                    %command,
                    status = status.label(),
                    ?exit_code,
                    %output,
                    "provisioning command failed"
                );
                false
            }
        }
    }

    async fn bind(&self) -> Result<Box<dyn Listener>, ProvisionError> {
        let transport = &self.transport;
        match transport.kind {
            TransportKind::Tcp => {
                let listener = TcpTransport::bind(transport.address.as_str())
                    .await
                    .map_err(|source| ProvisionError::Bind {
                        transport: format!("tcp {}", transport.address),
                        source,
                    })?;
                Ok(Box::new(listener))
            }
            #[cfg(unix)]
            TransportKind::Unix => {
                let listener = crate::transport::UnixTransport::bind(&transport.path)
                    .map_err(|source| ProvisionError::Bind {
                        transport: format!("unix {}", transport.path.display()),
                        source,
                    })?;
                Ok(Box::new(listener))
            }
            #[cfg(target_os = "linux")]
            TransportKind::Rfcomm => {
                let listener = crate::transport::RfcommListener::bind(transport.channel)
                    .map_err(|source| ProvisionError::Bind {
                        transport: format!("rfcomm channel {}", transport.channel),
                        source,
                    })?;
                Ok(Box::new(listener))
            }
            #[allow(unreachable_patterns)]
            kind => Err(ProvisionError::Unsupported { kind }),
        }
    }
}

#[async_trait]
impl TransportProvisioner for ConfiguredProvisioner {
    async fn provision(&self) -> Result<Box<dyn Listener>, ProvisionError> {
        for command in &self.provisioning.setup_commands {
            self.run_step(command).await;
        }
        let settle = self.provisioning.settle();
        if !settle.is_zero() {
            tokio::time::sleep(settle).await;
        }

        let listener = self.bind().await?;

        if let Some(command) = &self.provisioning.advertise_command
            && !self.run_step(command).await
        {
            warn!(listener = %listener.description(), "service advertisement failed");
        }
        Ok(listener)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn tcp_config() -> BridgeConfig {
        let mut config = BridgeConfig::default();
        config.transport.kind = TransportKind::Tcp;
        config.transport.address = "127.0.0.1:0".to_string();
        config
    }

    #[tokio::test]
    async fn setup_runs_in_order_and_failures_do_not_stop_binding() {
        let dir = TempDir::new().expect("tempdir");
        let log = dir.path().join("steps");
        let mut config = tcp_config();
        config.provisioning.setup_commands = vec![
            format!("echo first >> {}", log.display()),
            "exit 7".to_string(),
            format!("echo second >> {}", log.display()),
        ];
        config.provisioning.advertise_command =
            Some(format!("echo advertised >> {}", log.display()));

        let listener = ConfiguredProvisioner::new(&config)
            .provision()
            .await
            .expect("provision");
        assert!(listener.description().starts_with("tcp 127.0.0.1:"));

        let steps = std::fs::read_to_string(&log).expect("read log");
        assert_eq!(steps, "first\nsecond\nadvertised\n");
    }

    #[tokio::test]
    async fn failed_advertisement_is_not_fatal() {
        let mut config = tcp_config();
        config.provisioning.advertise_command = Some("false".to_string());
        ConfiguredProvisioner::new(&config)
            .provision()
            .await
            .expect("provision despite advertisement failure");
    }

    #[tokio::test]
    async fn bind_failure_is_fatal() {
        let occupied = TcpTransport::bind("127.0.0.1:0").await.expect("bind");
        let mut config = tcp_config();
        config.transport.address = occupied.local_addr().to_string();

        let err = ConfiguredProvisioner::new(&config)
            .provision()
            .await
            .err()
            .expect("address in use");
        assert!(matches!(err, ProvisionError::Bind { .. }), "{err:?}");
        assert!(err.to_string().starts_with("failed to bind tcp 127.0.0.1:"));
    }

    #[tokio::test]
    async fn binds_unix_sockets() {
        let dir = TempDir::new().expect("tempdir");
        let mut config = BridgeConfig::default();
        config.transport.kind = TransportKind::Unix;
        config.transport.path = dir.path().join("rfsh.sock");

        let listener = ConfiguredProvisioner::new(&config)
            .provision()
            .await
            .expect("provision");
        assert_eq!(
            listener.description(),
            format!("unix {}", dir.path().join("rfsh.sock").display())
        );
    }
}
