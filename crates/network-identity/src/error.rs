//! Error types for network identity allocation

use crate::conflict::ConflictSet;
use ipnet::Ipv4Net;
use std::net::IpAddr;
use thiserror::Error;

/// Network identity error type
#[derive(Error, Debug)]
pub enum Error {
    /// Port range outside 1-65535 or not ascending
    #[error("invalid port range {start}-{end}: ports must be within 1-65535 and start below end")]
    InvalidPortRange {
        /// First port of the range
        start: u16,
        /// Last port of the range (inclusive)
        end: u16,
    },

    /// Every port of the range is claimed
    #[error("no free ports available in range {start}-{end}")]
    NoPortsAvailable {
        /// First port of the range
        start: u16,
        /// Last port of the range (inclusive)
        end: u16,
    },

    /// Neither the default route nor the fallback names yielded an interface
    #[error("no suitable network interface found (tried: {})", .tried.join(", "))]
    NoInterfaceFound {
        /// Interface names that were looked up
        tried: Vec<String>,
    },

    /// The interface exists but lacks what LAN allocation needs
    #[error("interface {interface} cannot be used: {reason}")]
    InterfaceUnusable {
        /// Interface name
        interface: String,
        /// What is missing
        reason: String,
    },

    /// The LAN scan found fewer free addresses than services
    #[error("not enough free addresses in {network}: need {requested}, found {found}")]
    InsufficientFreeAddresses {
        /// Number of addresses asked for
        requested: usize,
        /// Number of addresses found
        found: usize,
        /// Network that was scanned
        network: String,
    },

    /// The isolated subnet is too small for the batch
    #[error("subnet {network} has no room for {requested} services")]
    SubnetExhausted {
        /// Configured subnet
        network: Ipv4Net,
        /// Number of services in the batch
        requested: usize,
    },

    /// Another host already owns a candidate address or port
    #[error("conflicts detected on the LAN, nothing was bound:\n{conflicts}")]
    ConflictDetected {
        /// Every non-empty report of the batch
        conflicts: ConflictSet,
    },

    /// The operation needs root
    #[error("root privileges required to {operation}")]
    PrivilegeRequired {
        /// What was being attempted
        operation: String,
    },

    /// Adding a secondary address failed mid-batch
    #[error("failed to bind {address} for service '{service}' on {interface}: {reason}")]
    BindFailed {
        /// Service the address was meant for
        service: String,
        /// Address that could not be bound
        address: IpAddr,
        /// Interface it was bound on
        interface: String,
        /// Underlying failure
        reason: String,
    },

    /// The privileged realization helper exited unsuccessfully
    #[error("realization helper `{verb}` failed with exit code {code:?}: {stderr}")]
    HelperFailed {
        /// Verb passed to the helper (`up` or `down`)
        verb: String,
        /// Exit code, if any
        code: Option<i32>,
        /// Captured standard error
        stderr: String,
    },

    /// A strategy produced no addresses and fallback is disabled
    #[error("strategy {strategy} is unavailable: {reason}")]
    StrategyUnavailable {
        /// Strategy that was requested
        strategy: crate::models::Strategy,
        /// Why it could not be used
        reason: String,
    },

    /// Two services of one batch ended up with the same endpoint
    #[error("services '{first}' and '{second}' would share {endpoint}")]
    DuplicateEndpoint {
        /// First service holding the endpoint
        first: String,
        /// Second service holding the endpoint
        second: String,
        /// The shared endpoint
        endpoint: String,
    },

    /// A frame could not be constructed
    #[error("packet construction failed: {0}")]
    Packet(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Command execution error
    #[error("command execution error: {0}")]
    CommandExecution(#[from] command_executor::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization error
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Coarse classification used to pick a recovery path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// No ports or addresses left; another strategy or a smaller request may work
    ResourceExhaustion,
    /// Missing privilege, interface or tool; retrying cannot help
    Environment,
    /// Another host owns an address or port; the operator must choose differently
    Conflict,
    /// Everything else
    Internal,
}

impl Error {
    /// Classify this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::NoPortsAvailable { .. }
            | Error::InsufficientFreeAddresses { .. }
            | Error::SubnetExhausted { .. } => ErrorCategory::ResourceExhaustion,
            Error::NoInterfaceFound { .. }
            | Error::InterfaceUnusable { .. }
            | Error::PrivilegeRequired { .. }
            | Error::HelperFailed { .. }
            | Error::StrategyUnavailable { .. }
            | Error::CommandExecution(_) => ErrorCategory::Environment,
            Error::ConflictDetected { .. } => ErrorCategory::Conflict,
            _ => ErrorCategory::Internal,
        }
    }

    /// A host tool the operation needs is not installed
    pub fn is_missing_tool(&self) -> bool {
        matches!(
            self,
            Error::CommandExecution(command_executor::Error::CommandNotFound { .. })
        )
    }

    /// Whether a caller may fall back to another address strategy
    pub fn allows_fallback(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::ResourceExhaustion | ErrorCategory::Environment
        )
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_classification() {
        assert!(Error::NoPortsAvailable { start: 8000, end: 8002 }.allows_fallback());
        assert!(
            Error::PrivilegeRequired {
                operation: "bind".into()
            }
            .allows_fallback()
        );
        assert!(
            !Error::ConflictDetected {
                conflicts: ConflictSet::default()
            }
            .allows_fallback()
        );
        assert_eq!(
            Error::Config("bad".into()).category(),
            ErrorCategory::Internal
        );
    }

    #[test]
    fn test_missing_tool_is_environment() {
        let err = Error::from(command_executor::Error::CommandNotFound {
            command: "arping".into(),
        });
        assert!(err.is_missing_tool());
        assert_eq!(err.category(), ErrorCategory::Environment);
        assert!(err.to_string().contains("arping"));
        assert!(!Error::Config("bad".into()).is_missing_tool());
    }

    #[test]
    fn test_messages_carry_context() {
        let err = Error::BindFailed {
            service: "api".into(),
            address: "192.168.1.101".parse().unwrap(),
            interface: "eth0".into(),
            reason: "RTNETLINK answers: File exists".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("192.168.1.101"));
        assert!(msg.contains("api"));
        assert!(msg.contains("eth0"));

        let err = Error::NoInterfaceFound {
            tried: vec!["eth0".into(), "wlan0".into()],
        };
        assert_eq!(
            err.to_string(),
            "no suitable network interface found (tried: eth0, wlan0)"
        );
    }
}
