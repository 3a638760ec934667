use thiserror::Error;

#[derive(Debug, Error)]
pub enum PtyError {
    #[error("failed to open pseudo-terminal: {pty_error}")]
    Open {
        #[source]
        pty_error: anyhow::Error,
    },
    #[error("failed to spawn shell {shell}: {pty_error}")]
    SpawnShell {
        shell: String,
        #[source]
        pty_error: anyhow::Error,
    },
}

impl PtyError {
    pub(crate) fn open(error: anyhow::Error) -> Self {
        Self::Open { pty_error: error }
    }

    pub(crate) fn spawn_shell(shell: &str, error: anyhow::Error) -> Self {
        Self::SpawnShell {
            shell: shell.to_string(),
            pty_error: error,
        }
    }
}
