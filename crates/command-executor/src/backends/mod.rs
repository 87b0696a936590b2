//! Backend implementations for different execution contexts
//!
//! [`LocalLauncher`] runs a process on this host. [`SudoLauncher`] wraps another
//! launcher and rewrites each command to run through `sudo`.

pub mod local;
pub mod sudo;

pub use local::LocalLauncher;
pub use sudo::SudoLauncher;
