//! External command execution
//!
//! The provisioner shells out for `exportfs -r`, `hostname -i` and
//! `dbus-send`. Commands are configured as argv vectors so deployments (and
//! tests) can substitute their own.

use crate::error::{Error, Result};
use tokio::process::Command;
use tracing::debug;

/// Run `argv`, returning stdout on success. Failures carry the combined
/// output of the command.
pub(crate) async fn run(argv: &[String]) -> Result<String> {
    let command = argv.join(" ");
    let (program, args) = argv.split_first().ok_or_else(|| Error::Command {
        command: command.clone(),
        reason: "empty command".to_string(),
    })?;

    debug!("Running command: {}", command);

    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| Error::Command {
            command: command.clone(),
            reason: format!("failed to start: {}", e),
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Command {
            command,
            reason: format!("exited with {}, output: {}{}", output.status, stdout, stderr),
        });
    }

    Ok(stdout)
}

/// Build an argv vector from string literals
pub(crate) fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}
