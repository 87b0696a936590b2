//! Launcher trait for executing commands in different contexts

use crate::command::Command;
use crate::error::{Error, Result};
use crate::process::ExitResult;
use async_trait::async_trait;
use std::time::Duration;

/// A launcher that can execute commands in a specific context
#[async_trait]
pub trait Launcher: Send + Sync + 'static {
    /// Execute a command and wait for it to complete, capturing output
    async fn execute(&self, command: Command) -> Result<ExitResult>;

    /// Execute a command, giving up once `timeout` has elapsed
    ///
    /// The child is killed when the deadline wins.
    async fn execute_with_timeout(
        &self,
        command: Command,
        timeout: Duration,
    ) -> Result<ExitResult> {
        let label = command.to_string();
        let run = self.execute(command);
        let deadline = async {
            async_io::Timer::after(timeout).await;
            Err(Error::TimedOut {
                command: label,
                after: timeout,
            })
        };
        futures_lite::future::or(run, deadline).await
    }

    /// Execute a command and fail unless it exits with code 0
    async fn execute_checked(&self, command: Command) -> Result<ExitResult> {
        let label = command.to_string();
        self.execute(command).await?.checked(label)
    }
}
