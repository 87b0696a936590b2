//! Data model for allocated service identities

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

/// How a service's address is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Loopback only, no address management
    #[default]
    None,
    /// Private host-local subnet realized through veth pairs
    IsolatedSubnet,
    /// Secondary addresses on the real LAN interface
    LanVisible,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::None => write!(f, "none"),
            Strategy::IsolatedSubnet => write!(f, "isolated-subnet"),
            Strategy::LanVisible => write!(f, "lan-visible"),
        }
    }
}

impl FromStr for Strategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "localhost" => Ok(Strategy::None),
            "subnet" | "isolated-subnet" => Ok(Strategy::IsolatedSubnet),
            "lan" | "lan-visible" => Ok(Strategy::LanVisible),
            other => Err(Error::Config(format!(
                "unknown strategy '{other}' (expected none, subnet or lan)"
            ))),
        }
    }
}

/// What a service asks for before allocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRequirement {
    /// Service name, unique within a batch
    pub name: String,
    /// Whether the service publishes a port on the host
    pub publishes_port: bool,
    /// Whether the service wants an address of its own
    pub needs_address: bool,
}

impl ServiceRequirement {
    /// Requirement with neither a port nor an address
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            publishes_port: false,
            needs_address: false,
        }
    }

    /// Request a host port
    pub fn with_port(mut self) -> Self {
        self.publishes_port = true;
        self
    }

    /// Request a dedicated address
    pub fn with_address(mut self) -> Self {
        self.needs_address = true;
        self
    }
}

/// The identity a service ends up with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceIdentity {
    /// Service name
    pub name: String,
    /// Allocated host port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Allocated address, absent for loopback-only services
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<IpAddr>,
    /// Strategy that produced the address
    #[serde(default)]
    pub strategy: Strategy,
}

impl ServiceIdentity {
    /// Endpoint other parties should use to reach this service
    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            address: self.address.unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            port: self.port,
        }
    }
}

/// An address plus optional port, as published to name sinks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// Address, loopback when none was allocated
    pub address: IpAddr,
    /// Host port, if the service publishes one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl Endpoint {
    /// `http://address:port` form, when a port exists
    pub fn url(&self) -> Option<String> {
        self.port.map(|port| format!("http://{}:{}", self.address, port))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}:{}", self.address, port),
            None => write!(f, "{}", self.address),
        }
    }
}

/// Everything one `up` claimed, persisted until `down`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationRecord {
    /// When the batch was allocated
    pub created_at: DateTime<Utc>,
    /// Strategy that was requested
    pub requested: Strategy,
    /// Strategy that actually produced addresses
    pub strategy: Strategy,
    /// LAN interface the addresses live on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
    /// Identities in manifest order
    #[serde(default)]
    pub services: IndexMap<String, ServiceIdentity>,
}

impl AllocationRecord {
    /// Empty record stamped with the current time
    pub fn new(requested: Strategy, strategy: Strategy) -> Self {
        Self {
            created_at: Utc::now(),
            requested,
            strategy,
            interface: None,
            services: IndexMap::new(),
        }
    }

    /// Add or replace a service identity
    pub fn insert(&mut self, identity: ServiceIdentity) {
        self.services.insert(identity.name.clone(), identity);
    }

    /// Look up a service
    pub fn get(&self, name: &str) -> Option<&ServiceIdentity> {
        self.services.get(name)
    }

    /// Whether the record holds any service
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Final mapping: address (or loopback) and port per service
    pub fn endpoints(&self) -> IndexMap<String, Endpoint> {
        self.services
            .iter()
            .map(|(name, identity)| (name.clone(), identity.endpoint()))
            .collect()
    }

    /// Addresses that were actually allocated
    pub fn addresses(&self) -> IndexMap<String, IpAddr> {
        self.services
            .iter()
            .filter_map(|(name, identity)| identity.address.map(|addr| (name.clone(), addr)))
            .collect()
    }

    /// Ports that were actually allocated
    pub fn ports(&self) -> HashMap<String, u16> {
        self.services
            .iter()
            .filter_map(|(name, identity)| identity.port.map(|port| (name.clone(), port)))
            .collect()
    }

    /// Reject batches where two services share a port, an address or an endpoint
    pub fn check_unique(&self) -> Result<()> {
        let mut ports: HashMap<u16, &str> = HashMap::new();
        let mut addresses: HashMap<IpAddr, &str> = HashMap::new();

        for (name, identity) in &self.services {
            if let Some(port) = identity.port {
                if let Some(first) = ports.insert(port, name) {
                    return Err(Error::DuplicateEndpoint {
                        first: first.to_string(),
                        second: name.clone(),
                        endpoint: format!("port {port}"),
                    });
                }
            }
            if let Some(address) = identity.address {
                if let Some(first) = addresses.insert(address, name) {
                    return Err(Error::DuplicateEndpoint {
                        first: first.to_string(),
                        second: name.clone(),
                        endpoint: address.to_string(),
                    });
                }
            }
        }

        Ok(())
    }
}
