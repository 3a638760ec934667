//! The process-lifetime accept loop.
//!
//! The supervisor owns the listener, hands each accepted connection to the
//! session manager and waits for it to finish before accepting the next one.
//! Accept failures are retried with bounded exponential backoff; nothing a
//! session does can stop the loop. Only the shutdown token ends it.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;

use crate::config::BridgeConfig;
use crate::config::SupervisorConfig;
use crate::error::AcceptErrorKind;
use crate::error::BridgeErr;
use crate::events::BridgeEvent;
use crate::events::EventSink;
use crate::provision::ConfiguredProvisioner;
use crate::provision::TransportProvisioner;
use crate::session::SessionManager;
use crate::transport::Listener;

const BACKOFF_FACTOR: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::from_config(&SupervisorConfig::default())
    }
}

impl RestartPolicy {
    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(config.initial_backoff_ms),
            max_delay: Duration::from_millis(config.max_backoff_ms),
        }
    }

    pub fn backoff(&self) -> Backoff {
        Backoff {
            policy: *self,
            next: self.initial_delay,
            retried_immediately: false,
        }
    }
}

/// Delay schedule for consecutive accept failures.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: RestartPolicy,
    next: Duration,
    retried_immediately: bool,
}

impl Backoff {
    /// How long to wait before the next accept. The first transient failure
    /// since the last reset is retried at once.
    pub fn next_delay(&mut self, kind: AcceptErrorKind) -> Duration {
        if kind == AcceptErrorKind::Transient && !self.retried_immediately {
            self.retried_immediately = true;
            return Duration::ZERO;
        }
        let delay = self.next.min(self.policy.max_delay);
        self.next = delay
            .saturating_mul(BACKOFF_FACTOR)
            .min(self.policy.max_delay);
        delay
    }

    pub fn reset(&mut self) {
        self.next = self.policy.initial_delay;
        self.retried_immediately = false;
    }
}

pub struct ListenerSupervisor {
    listener: Box<dyn Listener>,
    sessions: SessionManager,
    policy: RestartPolicy,
    events: Arc<dyn EventSink>,
    shutdown: CancellationToken,
}

impl ListenerSupervisor {
    pub fn new(
        listener: Box<dyn Listener>,
        sessions: SessionManager,
        policy: RestartPolicy,
        events: Arc<dyn EventSink>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            listener,
            sessions,
            policy,
            events,
            shutdown,
        }
    }

    /// Accepts and serves connections, one at a time, until the shutdown
    /// token is cancelled.
    pub async fn run(mut self) {
        self.events.emit(BridgeEvent::Listening {
            description: self.listener.description(),
        });
        let mut backoff = self.policy.backoff();

        loop {
            let accepted = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok(accepted) => {
                    backoff.reset();
                    let session = self.sessions.run(accepted, self.shutdown.clone()).await;
                    debug!(
                        session_id = %session.id(),
                        started_at = %session.started_at(),
                        state = ?session.state(),
                        "session returned to supervisor"
                    );
                }
                Err(source) => {
                    let err = BridgeErr::accept(source);
                    let kind = err.accept_kind().unwrap_or(AcceptErrorKind::Listener);
                    let delay = backoff.next_delay(kind);
                    self.events.emit(BridgeEvent::AcceptFailed {
                        kind,
                        error: err.to_string(),
                        retry_in: delay,
                    });
                    if delay.is_zero() {
                        continue;
                    }
                    tokio::select! {
                        biased;
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        self.events.emit(BridgeEvent::ShutdownRequested);
        info!(listener = %self.listener.description(), "supervisor stopped");
    }
}

/// Provisions a listener from `config` and serves it until `shutdown` is
/// cancelled. Returns an error only when start-up fails.
pub async fn serve(
    config: BridgeConfig,
    events: Arc<dyn EventSink>,
    shutdown: CancellationToken,
) -> Result<(), BridgeErr> {
    let provisioner = ConfiguredProvisioner::new(&config);
    serve_with(&provisioner, config, events, shutdown).await
}

pub async fn serve_with<P>(
    provisioner: &P,
    config: BridgeConfig,
    events: Arc<dyn EventSink>,
    shutdown: CancellationToken,
) -> Result<(), BridgeErr>
where
    P: TransportProvisioner + ?Sized,
{
    config.validate()?;
    let listener = tokio::select! {
        biased;
        _ = shutdown.cancelled() => {
            events.emit(BridgeEvent::ShutdownRequested);
            return Ok(());
        }
        listener = provisioner.provision() => listener?,
    };
    let policy = RestartPolicy::from_config(&config.supervisor);
    let sessions = SessionManager::new(config, Arc::clone(&events));
    ListenerSupervisor::new(listener, sessions, policy, events, shutdown)
        .run()
        .await;
    Ok(())
}
