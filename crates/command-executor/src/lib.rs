//! Runtime-agnostic command execution library
//!
//! This crate runs the host tools the allocation engine depends on (`ip`,
//! `ping`, `arping`, `arp`, the realization helper) and captures their output.
//! Launchers compose: a [`SudoLauncher`](backends::sudo::SudoLauncher) wraps any
//! other launcher to run the same command with elevated privileges.

#![warn(missing_docs)]

pub mod backends;
pub mod command;
pub mod error;
pub mod launcher;
pub mod process;

pub use backends::{LocalLauncher, SudoLauncher};
pub use command::Command;
pub use error::{Error, Result};
pub use launcher::Launcher;
pub use process::{ExitResult, ExitStatus};
