use std::io;
use std::io::ErrorKind;

use thiserror::Error;

use crate::config::ConfigError;
use crate::provision::ProvisionError;

/// How an `accept` failure should be treated by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptErrorKind {
    /// The failure concerned a single pending connection (it was aborted or
    /// reset before we picked it up). The listener itself is fine.
    Transient,
    /// The listening socket itself is unhealthy, e.g. descriptor exhaustion
    /// or the adapter went away.
    Listener,
}

impl AcceptErrorKind {
    pub fn classify(err: &io::Error) -> Self {
        match err.kind() {
            ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionReset
            | ErrorKind::Interrupted
            | ErrorKind::WouldBlock
            | ErrorKind::TimedOut => Self::Transient,
            _ => Self::Listener,
        }
    }
}

#[derive(Debug, Error)]
pub enum BridgeErr {
    #[error("failed to accept connection ({kind:?}): {source}")]
    Accept {
        kind: AcceptErrorKind,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl BridgeErr {
    pub(crate) fn accept(source: io::Error) -> Self {
        Self::Accept {
            kind: AcceptErrorKind::classify(&source),
            source,
        }
    }

    pub fn accept_kind(&self) -> Option<AcceptErrorKind> {
        match self {
            Self::Accept { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}
