//! LAN interface discovery

use crate::error::{Error, Result};
use crate::host::HostNetwork;
use ipnet::Ipv4Net;
use pnet::util::MacAddr;
use std::net::Ipv4Addr;
use tracing::{debug, info, warn};

/// Everything LAN allocation needs to know about the chosen interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkDescriptor {
    /// Interface name
    pub interface_name: String,
    /// The host's own address on the interface
    pub local_address: Ipv4Addr,
    /// Network the interface belongs to
    pub network: Ipv4Net,
    /// Hardware address of the interface
    pub mac: MacAddr,
}

impl NetworkDescriptor {
    /// Network address
    pub fn network_base(&self) -> Ipv4Addr {
        self.network.network()
    }

    /// Prefix length
    pub fn prefix_length(&self) -> u8 {
        self.network.prefix_len()
    }

    /// Broadcast address
    pub fn broadcast_address(&self) -> Ipv4Addr {
        self.network.broadcast()
    }

    /// Assignable host addresses at or after host index `offset`, ascending.
    ///
    /// The network and broadcast addresses are never produced, nor is the
    /// host's own address.
    pub fn candidates(&self, offset: u32) -> impl Iterator<Item = Ipv4Addr> + '_ {
        let base = u32::from(self.network_base());
        self.network
            .hosts()
            .filter(move |addr| u32::from(*addr) - base >= offset)
            .filter(move |addr| *addr != self.local_address)
    }
}

/// Pick the LAN interface: the default route's, else the first fallback that exists
pub async fn detect_interface(net: &dyn HostNetwork, fallbacks: &[String]) -> Result<String> {
    let mut tried = Vec::new();

    match net.default_route_interface().await {
        Ok(Some(name)) => {
            if net.interface(&name).is_some() {
                info!("Using default route interface {}", name);
                return Ok(name);
            }
            warn!("Default route interface {} is not present", name);
            tried.push(name);
        }
        Ok(None) => debug!("No default route"),
        Err(e) => warn!("Could not read the routing table: {}", e),
    }

    for name in fallbacks {
        if net.interface(name).is_some() {
            info!("Using fallback interface {}", name);
            return Ok(name.clone());
        }
        tried.push(name.clone());
    }

    Err(Error::NoInterfaceFound { tried })
}

/// Describe a named interface
pub fn describe_interface(net: &dyn HostNetwork, name: &str) -> Result<NetworkDescriptor> {
    let info = net.interface(name).ok_or_else(|| Error::NoInterfaceFound {
        tried: vec![name.to_string()],
    })?;

    let primary = info.primary_ipv4().ok_or_else(|| Error::InterfaceUnusable {
        interface: name.to_string(),
        reason: "no IPv4 address".into(),
    })?;

    let mac = info.mac.ok_or_else(|| Error::InterfaceUnusable {
        interface: name.to_string(),
        reason: "no hardware address".into(),
    })?;

    Ok(NetworkDescriptor {
        interface_name: info.name,
        local_address: primary.addr(),
        network: primary.trunc(),
        mac,
    })
}
