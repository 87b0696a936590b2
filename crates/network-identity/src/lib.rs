//! Network identity allocation for multi-service deployments
//!
//! This crate gives every service of a deployment its own port and, optionally,
//! its own address, without stepping on anything else on the host or the LAN.
//!
//! # Architecture
//!
//! - [`PortAllocator`] hands out free TCP ports from a range after scanning the
//!   host's listening sockets.
//! - [`IsolatedSubnetAllocator`] assigns addresses from a private host-local
//!   subnet and delegates the veth plumbing to a privileged helper process.
//! - [`LanAllocator`] finds unclaimed addresses on the real LAN, binds them as
//!   secondary addresses and announces them with gratuitous ARP.
//! - [`ConflictDetector`] vetoes a LAN batch when a candidate address or port
//!   already belongs to another host.
//! - [`StateStore`] persists what was claimed so teardown never has to
//!   re-derive it.
//!
//! Every host mutation goes through the [`HostNetwork`] trait. [`SystemNetwork`]
//! is the real implementation; tests substitute an in-memory one.
//!
//! # Example
//!
//! ```no_run
//! use network_identity::{AllocationEngine, AllocatorConfig, ServiceRequirement, Strategy};
//!
//! # async fn example() -> network_identity::Result<()> {
//! let mut engine = AllocationEngine::new(".", AllocatorConfig::default())?;
//!
//! let services = vec![
//!     ServiceRequirement::new("api").with_port().with_address(),
//!     ServiceRequirement::new("db").with_address(),
//! ];
//!
//! let outcome = engine.up(&services, Strategy::LanVisible).await?;
//! for (name, endpoint) in outcome.record.endpoints() {
//!     println!("{name} -> {endpoint}");
//! }
//!
//! // Later, possibly from another process
//! engine.down().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod arp;
pub mod config;
pub mod conflict;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod host;
pub mod lan;
pub mod models;
pub mod port;
pub mod publish;
pub mod state;
pub mod subnet;
pub mod system;
pub mod veth;

pub use config::AllocatorConfig;
pub use conflict::{ConflictDetector, ConflictReport, ConflictSet};
pub use discovery::NetworkDescriptor;
pub use engine::{AllocationEngine, AllocationOutcome, TeardownSummary};
pub use error::{Error, ErrorCategory, Result};
pub use host::{HostNetwork, InterfaceInfo};
pub use lan::{LanAllocator, LanBatch};
pub use models::{AllocationRecord, Endpoint, ServiceIdentity, ServiceRequirement, Strategy};
pub use port::PortAllocator;
pub use publish::{HostsFileSink, MappingFileSink, NameSink};
pub use state::{LanTracking, StateStore, VirtualIp};
pub use subnet::IsolatedSubnetAllocator;
pub use system::SystemNetwork;
pub use veth::VethPlan;

/// Hardware address type used throughout the crate
pub use pnet::util::MacAddr;

/// Re-export key types for convenience
pub mod prelude {
    pub use crate::{
        AllocationEngine,
        AllocationRecord,
        AllocatorConfig,
        Endpoint,
        Error,
        HostNetwork,
        Result,
        ServiceIdentity,
        ServiceRequirement,
        Strategy,
    };
}
