pub mod config_cmd;
pub mod exec_cmd;
pub mod logging;
pub mod serve_cmd;

use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use clap::Args;
use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use rfsh_core::BridgeConfig;
use rfsh_core::BridgeMode;
use rfsh_core::config::TransportKind;

const PRIVILEGE_WARNING: &str = "\
Anyone who can connect to the listener can run arbitrary commands with the
privileges of this process. rfsh performs no authentication; restrict access
at the transport (pairing policy, socket permissions, firewall).";

/// Single-client remote shell over an RFCOMM serial channel.
#[derive(Debug, Parser)]
#[command(name = "rfsh", version, after_help = PRIVILEGE_WARNING)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Provision the transport and serve clients until interrupted (default).
    Serve,

    /// Print the effective configuration as TOML.
    PrintConfig,

    /// Run one command the way a connected client would and print the reply.
    Exec {
        /// Command line, passed to the configured interpreter.
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
}

#[derive(Debug, Args)]
pub struct GlobalArgs {
    /// Config file to load instead of `$RFSH_HOME/config.toml`.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Directory for the rolling log file (defaults to `$RFSH_HOME/log`).
    #[arg(long = "log-dir", global = true, value_name = "DIR")]
    pub log_dir: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    CommandResponse,
    PassThrough,
}

impl From<ModeArg> for BridgeMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::CommandResponse => BridgeMode::CommandResponse,
            ModeArg::PassThrough => BridgeMode::PassThrough,
        }
    }
}

/// Flags that take precedence over the config file.
#[derive(Debug, Default, Args)]
pub struct ConfigOverrides {
    /// Bridge mode.
    #[arg(long, global = true, value_enum)]
    pub mode: Option<ModeArg>,

    /// Listen on a TCP address instead of RFCOMM.
    #[arg(long, global = true, value_name = "ADDR", conflicts_with_all = ["unix", "channel"])]
    pub tcp: Option<String>,

    /// Listen on a Unix-domain socket instead of RFCOMM.
    #[arg(long, global = true, value_name = "PATH", conflicts_with = "channel")]
    pub unix: Option<PathBuf>,

    /// Listen on this RFCOMM channel.
    #[arg(long, global = true, value_name = "N")]
    pub channel: Option<u8>,

    /// Per-command timeout in command-response mode.
    #[arg(long = "command-timeout-ms", global = true, value_name = "MS")]
    pub command_timeout_ms: Option<u64>,
}

impl ConfigOverrides {
    pub fn apply(&self, config: &mut BridgeConfig) {
        if let Some(mode) = self.mode {
            config.mode = mode.into();
        }
        if let Some(address) = &self.tcp {
            config.transport.kind = TransportKind::Tcp;
            config.transport.address = address.clone();
        }
        if let Some(path) = &self.unix {
            config.transport.kind = TransportKind::Unix;
            config.transport.path = path.clone();
        }
        if let Some(channel) = self.channel {
            config.transport.kind = TransportKind::Rfcomm;
            config.transport.channel = channel;
        }
        if let Some(timeout_ms) = self.command_timeout_ms {
            config.command.timeout_ms = timeout_ms;
        }
    }
}

impl GlobalArgs {
    /// Loads the config file and applies the command-line overrides.
    pub fn load_config(&self) -> Result<BridgeConfig> {
        let mut config =
            BridgeConfig::load(self.config.as_deref()).context("failed to load configuration")?;
        self.overrides.apply(&mut config);
        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}
