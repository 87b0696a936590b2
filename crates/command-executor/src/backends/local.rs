//! Local process execution backend

use async_process::Stdio;
use async_trait::async_trait;
use tracing::trace;

use crate::command::Command;
use crate::error::{Error, Result};
use crate::launcher::Launcher;
use crate::process::ExitResult;

/// Launcher for executing processes locally
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalLauncher;

#[async_trait]
impl Launcher for LocalLauncher {
    async fn execute(&self, command: Command) -> Result<ExitResult> {
        trace!(command = %command, "executing");

        let mut async_cmd = command.prepare();
        async_cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = async_cmd.output().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::CommandNotFound {
                    command: command.get_program().to_string_lossy().into_owned(),
                }
            } else {
                Error::spawn_failed(format!("Failed to spawn `{}`: {}", command, e))
            }
        })?;

        Ok(ExitResult {
            status: output.status.into(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
