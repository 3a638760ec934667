use std::process::ExitCode;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use rfsh_cli::Cli;
use rfsh_cli::Command;
use rfsh_cli::config_cmd;
use rfsh_cli::exec_cmd;
use rfsh_cli::logging;
use rfsh_cli::serve_cmd;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = cli.global.load_config()?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let log_dir = match cli.global.log_dir {
                Some(dir) => dir,
                None => rfsh_core::config::default_log_dir()
                    .context("failed to resolve log directory")?,
            };
            let _guard = logging::init_service_logging(&log_dir)?;
            serve_cmd::run(config).await?;
        }
        Command::PrintConfig => config_cmd::print_config(&config)?,
        Command::Exec { command } => {
            logging::init_stderr_logging();
            return exec_cmd::run(&config, &command).await;
        }
    }
    Ok(ExitCode::SUCCESS)
}
