use std::io::Write;
use std::process::ExitCode;

use anyhow::Context;
use anyhow::Result;
use rfsh_core::BridgeConfig;
use rfsh_core::CommandExecutor;
use rfsh_core::CommandStatus;

/// Runs `command` through the command-response executor and writes exactly
/// the bytes a remote client would receive, minus the prompt.
pub async fn run(config: &BridgeConfig, command: &[String]) -> Result<ExitCode> {
    let command_line = command.join(" ");
    let outcome = CommandExecutor::from_config(&config.command)
        .execute(&command_line, config.command.timeout())
        .await;

    let mut stdout = std::io::stdout().lock();
    stdout
        .write_all(&outcome.output)
        .and_then(|()| stdout.flush())
        .context("failed to write command output")?;

    Ok(match outcome.status {
        CommandStatus::Success => match outcome.exit_code {
            Some(0) => ExitCode::SUCCESS,
            Some(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
            None => ExitCode::FAILURE,
        },
        CommandStatus::Timeout | CommandStatus::ExecutionError => ExitCode::FAILURE,
    })
}
