//! Shell steps.

use manifold_templates::helpers::shell;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{EngineError, EngineResult};

/// Run `command` through the platform shell and return its trimmed stdout.
pub async fn run(command: &str) -> EngineResult<String> {
    info!("Running `{}`", command);
    let output = Command::from(shell(command)).output().await?;

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!("stderr of `{}`: {}", command, stderr.trim());
        return Err(EngineError::ExecFailed {
            command: command.to_string(),
            status: output.status.to_string(),
        });
    }

    debug!("stdout of `{}`: {}", command, stdout);
    Ok(stdout)
}
