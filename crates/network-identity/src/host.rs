//! The seam between allocation logic and the host's network stack

use crate::error::Result;
use async_trait::async_trait;
use ipnet::Ipv4Net;
use pnet::util::MacAddr;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// What the allocators need to know about an interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    /// Kernel interface name
    pub name: String,
    /// Hardware address, absent for interfaces without one
    pub mac: Option<MacAddr>,
    /// IPv4 networks configured on the interface, primary first
    pub ipv4: Vec<Ipv4Net>,
}

impl InterfaceInfo {
    /// First IPv4 network, which the interface's LAN membership is derived from
    pub fn primary_ipv4(&self) -> Option<Ipv4Net> {
        self.ipv4.first().copied()
    }
}

/// Host network operations
///
/// Queries return `Ok(false)` or `Ok(None)` when the answer is simply negative
/// and reserve `Err` for the case where the question could not be asked at all.
#[async_trait]
pub trait HostNetwork: Send + Sync {
    /// Whether this process may reconfigure interfaces
    fn is_privileged(&self) -> bool;

    /// Interface carrying the default route
    async fn default_route_interface(&self) -> Result<Option<String>>;

    /// Look up an interface by name
    fn interface(&self, name: &str) -> Option<InterfaceInfo>;

    /// Whether the address answers an ICMP echo
    async fn ping(&self, address: Ipv4Addr, timeout: Duration) -> Result<bool>;

    /// Whether the address answers an ARP request sent from `interface`
    async fn arp_probe(&self, interface: &str, address: Ipv4Addr, timeout: Duration) -> Result<bool>;

    /// Whether a TCP connection to `address` completes within `timeout`
    async fn tcp_connect(&self, address: SocketAddr, timeout: Duration) -> bool;

    /// Hardware address the neighbor table holds for `address`
    async fn neighbor_mac(&self, address: IpAddr) -> Result<Option<MacAddr>>;

    /// Add a labelled secondary address
    async fn add_address(&self, interface: &str, address: Ipv4Addr, prefix: u8, label: &str) -> Result<()>;

    /// Remove a secondary address
    async fn remove_address(&self, interface: &str, address: Ipv4Addr, prefix: u8) -> Result<()>;

    /// Enable forwarding and proxy ARP for `interface`
    async fn enable_visibility(&self, interface: &str) -> Result<()>;

    /// Broadcast `count` gratuitous ARP frames claiming `address`
    async fn announce(&self, interface: &InterfaceInfo, address: Ipv4Addr, count: u32) -> Result<()>;

    /// Insert a permanent neighbor entry
    async fn pin_neighbor(&self, interface: &str, address: Ipv4Addr, mac: MacAddr) -> Result<()>;

    /// Drop any neighbor entry for `address`
    async fn unpin_neighbor(&self, interface: &str, address: Ipv4Addr) -> Result<()>;
}
