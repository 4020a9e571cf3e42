use anyhow::{Context, Result};
use std::ffi::OsStr;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Captured result of one finished external process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `-1` when the process was terminated without one.
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Run `program` to completion, capturing both output streams.
///
/// A non-zero exit is not an error here; only failing to spawn or wait is.
pub async fn run<I, S>(program: &str, args: I) -> Result<CommandOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!(command = ?command.as_std(), "Running");
    let output = command
        .output()
        .await
        .with_context(|| format!("Failed to run {program}"))?;

    let result = CommandOutput {
        code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };
    debug!(program, exit_code = result.code, "Finished");
    Ok(result)
}

/// Run `program` to completion and return only its exit code.
pub async fn status<I, S>(program: impl AsRef<OsStr>, args: I) -> Result<i32>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let program = program.as_ref();
    let mut command = Command::new(program);
    command.args(args).stdin(Stdio::null()).kill_on_drop(true);

    debug!(command = ?command.as_std(), "Running");
    let status = command
        .status()
        .await
        .with_context(|| format!("Failed to run {}", program.to_string_lossy()))?;
    Ok(status.code().unwrap_or(-1))
}
