//! Run the server under the MCP Inspector.

use anyhow::Error;
use rmv_model::rmv;
use std::path::Path;
use std::process::Command;

/// The command which launches the MCP Inspector by default.
pub const DEFAULT_INSPECTOR: &str = "npx @modelcontextprotocol/inspector";

/// Build the command which runs `inspector` against the stdio server in `exe`.
///
/// The inspector spawns the server itself, so RMV options given on our command line are passed
/// on through the environment.
pub fn command(inspector: &str, exe: &Path, rmv: &rmv::Options) -> Result<Command, Error> {
    let mut words = inspector.split_whitespace();
    let program = words
        .next()
        .ok_or_else(|| Error::msg("inspector command is empty"))?;

    let mut cmd = Command::new(program);
    cmd.args(words)
        .arg(exe)
        .args(["serve", "--transport", "stdio", "--profile", "demo"]);
    if let Some(key) = &rmv.api_key {
        cmd.env("RMV_API_KEY", key);
    }
    cmd.env("RMV_API_BASE", rmv.api_base.as_str())
        .env("RMV_TIMEOUT", rmv.timeout.to_string());
    if let Some(dir) = &rmv.data_dir {
        cmd.env("RMV_DATA_DIR", dir);
    }
    Ok(cmd)
}

/// Launch the inspector and wait for it to exit.
pub fn run(inspector: &str, rmv: &rmv::Options) -> Result<(), Error> {
    let exe = std::env::current_exe()?;
    let mut cmd = command(inspector, &exe, rmv)?;
    tracing::info!("launching {cmd:?}");

    let status = cmd.status()?;
    if status.success() {
        Ok(())
    } else {
        Err(Error::msg(format!("inspector exited with {status}")))
    }
}
