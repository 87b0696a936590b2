//! Sudo launcher for privilege escalation
//!
//! # Limitations
//!
//! This launcher does NOT handle password prompts. Commands are run with
//! `sudo -n`, so they fail immediately instead of hanging when sudo would ask
//! for a password. Configure sudoers with NOPASSWD for the networking tools
//! (`ip`, `arp`, the realization helper) or run the whole tool as root.
//!
//! # Example
//!
//! ```no_run
//! use command_executor::{Command, Launcher, LocalLauncher, SudoLauncher};
//!
//! # async fn example() -> command_executor::Result<()> {
//! let launcher = SudoLauncher::new(LocalLauncher);
//!
//! // This will run: sudo -n ip link add veth-api type veth peer name vp-api
//! let cmd = Command::builder("ip")
//!     .args(["link", "add", "veth-api", "type", "veth", "peer", "name", "vp-api"])
//!     .build();
//!
//! let result = launcher.execute(cmd).await?;
//! # Ok(())
//! # }
//! ```

use crate::{error::Result, launcher::Launcher, process::ExitResult, Command};
use async_trait::async_trait;

/// Launcher that wraps another launcher to execute commands with sudo
#[derive(Debug, Clone)]
pub struct SudoLauncher<L> {
    inner: L,
}

impl<L> SudoLauncher<L> {
    /// Create a new sudo launcher wrapping the given launcher
    pub fn new(inner: L) -> Self {
        Self { inner }
    }

    /// Rewrite `command` so that it runs through non-interactive sudo
    pub fn wrap(&self, command: &Command) -> Command {
        let mut builder = Command::builder("sudo")
            .arg("-n")
            .arg(command.get_program())
            .args(command.get_args());

        for (key, val) in command.get_envs() {
            builder = builder.env(key, val);
        }

        if let Some(dir) = command.get_current_dir() {
            builder = builder.current_dir(dir);
        }

        builder.build()
    }
}

#[async_trait]
impl<L: Launcher> Launcher for SudoLauncher<L> {
    async fn execute(&self, command: Command) -> Result<ExitResult> {
        let sudo_command = self.wrap(&command);
        self.inner
            .execute(sudo_command)
            .await
            .map_err(|e| e.with_layer_context("Sudo"))
    }
}
