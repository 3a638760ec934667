use std::fmt;
use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

pub const CONFIG_TOML_FILE: &str = "config.toml";
pub const RFSH_HOME_ENV: &str = "RFSH_HOME";

pub const DEFAULT_PROMPT: &str = "> ";
pub const DEFAULT_BANNER: &str = "\n=== rfsh serial console ===\n";
pub const DEFAULT_FAREWELL: &str = "Goodbye!\n";
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_RFCOMM_CHANNEL: u8 = 1;

/// RFCOMM channels are numbered 1 through 30.
const MAX_RFCOMM_CHANNEL: u8 = 30;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("could not locate rfsh home: {0}")]
    Home(#[source] io::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Which local endpoint a session is bridged to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BridgeMode {
    /// Every received line is executed and its output returned.
    #[default]
    CommandResponse,
    /// Raw bytes are forwarded to an interactive shell on a pseudo-terminal.
    PassThrough,
}

impl fmt::Display for BridgeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CommandResponse => write!(f, "command-response"),
            Self::PassThrough => write!(f, "pass-through"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    #[default]
    Rfcomm,
    Tcp,
    Unix,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rfcomm => write!(f, "rfcomm"),
            Self::Tcp => write!(f, "tcp"),
            Self::Unix => write!(f, "unix"),
        }
    }
}

/// What to do with a blank line in command-response mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmptyLinePolicy {
    /// Treat it like a disconnect and end the session.
    #[default]
    Close,
    /// Send the prompt again and keep reading.
    Prompt,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    pub mode: BridgeMode,
    pub transport: TransportConfig,
    pub provisioning: ProvisioningConfig,
    pub command: CommandConfig,
    pub pty: PtyConfig,
    pub session: SessionConfig,
    pub supervisor: SupervisorConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransportConfig {
    pub kind: TransportKind,
    /// RFCOMM channel to listen on.
    pub channel: u8,
    /// Socket address used by the `tcp` transport.
    pub address: String,
    /// Socket path used by the `unix` transport.
    pub path: PathBuf,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::default(),
            channel: DEFAULT_RFCOMM_CHANNEL,
            address: "127.0.0.1:2323".to_string(),
            path: std::env::temp_dir().join("rfsh.sock"),
        }
    }
}

/// Adapter preparation performed once before the listener is bound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProvisioningConfig {
    /// Commands such as `hciconfig hci0 piscan` run in order at start-up.
    pub setup_commands: Vec<String>,
    pub setup_timeout_ms: u64,
    /// Pause after the setup commands so the adapter can settle.
    pub settle_ms: u64,
    /// Registers the service record once the listener is bound,
    /// e.g. `sdptool add --channel=1 SP`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advertise_command: Option<String>,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            setup_commands: Vec::new(),
            setup_timeout_ms: 5_000,
            settle_ms: 0,
            advertise_command: None,
        }
    }
}

impl ProvisioningConfig {
    pub fn setup_timeout(&self) -> Duration {
        Duration::from_millis(self.setup_timeout_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CommandConfig {
    /// Program and leading arguments; the command line is appended as the
    /// final argument.
    pub interpreter: Vec<String>,
    pub timeout_ms: u64,
}

impl Default for CommandConfig {
    fn default() -> Self {
        let interpreter = if cfg!(windows) {
            vec!["cmd".to_string(), "/C".to_string()]
        } else {
            vec!["/bin/sh".to_string(), "-c".to_string()]
        };
        Self {
            interpreter,
            timeout_ms: DEFAULT_COMMAND_TIMEOUT_MS,
        }
    }
}

impl CommandConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PtyConfig {
    /// Shell to spawn. Falls back to `$SHELL`, then `/bin/sh`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
    pub args: Vec<String>,
    pub term: String,
    pub rows: u16,
    pub cols: u16,
}

impl Default for PtyConfig {
    fn default() -> Self {
        Self {
            shell: None,
            args: Vec::new(),
            term: "xterm-256color".to_string(),
            rows: 24,
            cols: 80,
        }
    }
}

impl PtyConfig {
    pub fn resolved_shell(&self) -> String {
        self.shell
            .clone()
            .or_else(|| std::env::var("SHELL").ok().filter(|s| !s.is_empty()))
            .unwrap_or_else(|| "/bin/sh".to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    pub banner: String,
    pub prompt: String,
    pub farewell: String,
    /// Lines that end a command-response session, compared case-insensitively.
    pub exit_words: Vec<String>,
    pub empty_line: EmptyLinePolicy,
    /// Ends a command-response session when no line arrives in time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_timeout_ms: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            banner: DEFAULT_BANNER.to_string(),
            prompt: DEFAULT_PROMPT.to_string(),
            farewell: DEFAULT_FAREWELL.to_string(),
            exit_words: ["exit", "quit", "bye"].map(String::from).to_vec(),
            empty_line: EmptyLinePolicy::default(),
            idle_timeout_ms: None,
        }
    }
}

impl SessionConfig {
    pub fn is_exit_word(&self, line: &str) -> bool {
        self.exit_words
            .iter()
            .any(|word| word.eq_ignore_ascii_case(line))
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_ms.map(Duration::from_millis)
    }

    /// First bytes sent after accept. Command-response sessions end with the
    /// prompt so the remote terminal is immediately usable.
    pub fn greeting(&self, mode: BridgeMode) -> String {
        match mode {
            BridgeMode::CommandResponse => format!("{}{}", self.banner, self.prompt),
            BridgeMode::PassThrough => self.banner.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SupervisorConfig {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 1_000,
            max_backoff_ms: 5_000,
        }
    }
}

impl BridgeConfig {
    /// Loads `path`, or `$RFSH_HOME/config.toml` when no path is given. A
    /// missing default file yields the built-in defaults; an explicitly named
    /// file must exist.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (
                find_rfsh_home()
                    .map_err(ConfigError::Home)?
                    .join(CONFIG_TOML_FILE),
                false,
            ),
        };

        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound && !required => {
                tracing::debug!(path = %path.display(), "no config file; using defaults");
                return Ok(Self::default());
            }
            Err(source) => return Err(ConfigError::Read { path, source }),
        };

        let config: Self =
            toml::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.command.interpreter.is_empty() {
            return Err(ConfigError::Invalid(
                "command.interpreter must name a program".to_string(),
            ));
        }
        if self.command.timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "command.timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.transport.kind == TransportKind::Rfcomm
            && !(1..=MAX_RFCOMM_CHANNEL).contains(&self.transport.channel)
        {
            return Err(ConfigError::Invalid(format!(
                "transport.channel must be between 1 and {MAX_RFCOMM_CHANNEL}, got {}",
                self.transport.channel
            )));
        }
        if self.supervisor.initial_backoff_ms > self.supervisor.max_backoff_ms {
            return Err(ConfigError::Invalid(
                "supervisor.initial_backoff_ms must not exceed supervisor.max_backoff_ms"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

/// Returns the directory holding `config.toml` and the `log/` directory.
///
/// Honors `RFSH_HOME` when set, otherwise `~/.rfsh`.
pub fn find_rfsh_home() -> io::Result<PathBuf> {
    if let Ok(val) = std::env::var(RFSH_HOME_ENV)
        && !val.is_empty()
    {
        return Ok(PathBuf::from(val));
    }

    let mut home = dirs::home_dir().ok_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, "could not find home directory")
    })?;
    home.push(".rfsh");
    Ok(home)
}

pub fn default_log_dir() -> io::Result<PathBuf> {
    Ok(find_rfsh_home()?.join("log"))
}
