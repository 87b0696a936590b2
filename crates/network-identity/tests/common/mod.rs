//! Common test utilities for network identity integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use ipnet::Ipv4Net;
use network_identity::config::LanConfig;
use network_identity::{HostNetwork, InterfaceInfo, MacAddr, Result};
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Hardware address of the fake host's LAN interface
pub const LOCAL_MAC: MacAddr = MacAddr(0x02, 0x00, 0x00, 0x00, 0x00, 0x01);

/// Hardware address of some other machine on the LAN
pub const FOREIGN_MAC: MacAddr = MacAddr(0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff);

/// Shorthand for 192.168.1.x
pub fn lan(last: u8) -> Ipv4Addr {
    Ipv4Addr::new(192, 168, 1, last)
}

/// Names as owned strings
pub fn names(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

/// LAN settings that keep tests fast
pub fn fast_lan_config() -> LanConfig {
    LanConfig {
        announce_delay_ms: 0,
        probe_timeout_ms: 10,
        connect_timeout_ms: 10,
        ..LanConfig::default()
    }
}

/// Observable state of the fake host
#[derive(Debug, Default)]
pub struct FakeState {
    pub default_route: Option<String>,
    pub interfaces: HashMap<String, InterfaceInfo>,
    pub ping_responders: HashSet<Ipv4Addr>,
    pub arp_responders: HashSet<Ipv4Addr>,
    pub neighbors: HashMap<IpAddr, MacAddr>,
    pub open_ports: HashSet<SocketAddr>,
    pub failing_binds: HashSet<Ipv4Addr>,
    /// Currently bound secondary addresses as (interface, address, prefix, label)
    pub bound: Vec<(String, Ipv4Addr, u8, String)>,
    pub pinned: HashMap<Ipv4Addr, MacAddr>,
    pub announced: Vec<Ipv4Addr>,
    pub probed: Vec<Ipv4Addr>,
    pub visibility_enabled: HashSet<String>,
    /// Probe tools reported as not installed
    pub missing_tools: HashSet<&'static str>,
    pub failing_announces: HashSet<Ipv4Addr>,
}

/// In-memory host network recording every mutation
#[derive(Debug)]
pub struct FakeNetwork {
    privileged: bool,
    state: Mutex<FakeState>,
}

impl FakeNetwork {
    /// A privileged host with eth0 at 192.168.1.10/24 as the default route
    pub fn lan() -> Self {
        let mut state = FakeState {
            default_route: Some("eth0".into()),
            ..Default::default()
        };
        state.interfaces.insert(
            "eth0".into(),
            InterfaceInfo {
                name: "eth0".into(),
                mac: Some(LOCAL_MAC),
                ipv4: vec![Ipv4Net::new(lan(10), 24).unwrap()],
            },
        );
        Self {
            privileged: true,
            state: Mutex::new(state),
        }
    }

    pub fn unprivileged(mut self) -> Self {
        self.privileged = false;
        self
    }

    pub fn with_default_route(self, name: Option<&str>) -> Self {
        self.state().default_route = name.map(str::to_string);
        self
    }

    pub fn with_interface(self, info: InterfaceInfo) -> Self {
        self.state().interfaces.insert(info.name.clone(), info);
        self
    }

    pub fn without_interface(self, name: &str) -> Self {
        self.state().interfaces.remove(name);
        self
    }

    pub fn with_ping_responder(self, address: Ipv4Addr) -> Self {
        self.state().ping_responders.insert(address);
        self
    }

    pub fn with_arp_responder(self, address: Ipv4Addr) -> Self {
        self.state().arp_responders.insert(address);
        self
    }

    pub fn with_neighbor(self, address: Ipv4Addr, mac: MacAddr) -> Self {
        self.state().neighbors.insert(IpAddr::V4(address), mac);
        self
    }

    pub fn with_open_port(self, address: Ipv4Addr, port: u16) -> Self {
        self.state()
            .open_ports
            .insert(SocketAddr::new(IpAddr::V4(address), port));
        self
    }

    pub fn with_failing_bind(self, address: Ipv4Addr) -> Self {
        self.state().failing_binds.insert(address);
        self
    }

    pub fn without_tool(self, tool: &'static str) -> Self {
        self.state().missing_tools.insert(tool);
        self
    }

    pub fn with_failing_announce(self, address: Ipv4Addr) -> Self {
        self.state().failing_announces.insert(address);
        self
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn bound_addresses(&self) -> Vec<Ipv4Addr> {
        self.state().bound.iter().map(|(_, addr, _, _)| *addr).collect()
    }
}

fn missing_tool(state: &FakeState, tool: &'static str) -> Result<()> {
    if state.missing_tools.contains(tool) {
        return Err(command_executor::Error::CommandNotFound {
            command: tool.to_string(),
        }
        .into());
    }
    Ok(())
}

#[async_trait]
impl HostNetwork for FakeNetwork {
    fn is_privileged(&self) -> bool {
        self.privileged
    }

    async fn default_route_interface(&self) -> Result<Option<String>> {
        Ok(self.state().default_route.clone())
    }

    fn interface(&self, name: &str) -> Option<InterfaceInfo> {
        self.state().interfaces.get(name).cloned()
    }

    async fn ping(&self, address: Ipv4Addr, _timeout: Duration) -> Result<bool> {
        let mut state = self.state();
        state.probed.push(address);
        missing_tool(&state, "ping")?;
        Ok(state.ping_responders.contains(&address))
    }

    async fn arp_probe(&self, _interface: &str, address: Ipv4Addr, _timeout: Duration) -> Result<bool> {
        let state = self.state();
        missing_tool(&state, "arping")?;
        Ok(state.arp_responders.contains(&address))
    }

    async fn tcp_connect(&self, address: SocketAddr, _timeout: Duration) -> bool {
        self.state().open_ports.contains(&address)
    }

    async fn neighbor_mac(&self, address: IpAddr) -> Result<Option<MacAddr>> {
        let state = self.state();
        if let Some(mac) = state.neighbors.get(&address) {
            return Ok(Some(*mac));
        }
        Ok(match address {
            IpAddr::V4(v4) => state.pinned.get(&v4).copied(),
            IpAddr::V6(_) => None,
        })
    }

    async fn add_address(&self, interface: &str, address: Ipv4Addr, prefix: u8, label: &str) -> Result<()> {
        let mut state = self.state();
        if state.failing_binds.contains(&address) || state.bound.iter().any(|b| b.1 == address) {
            return Err(std::io::Error::other("RTNETLINK answers: File exists").into());
        }
        state
            .bound
            .push((interface.to_string(), address, prefix, label.to_string()));
        Ok(())
    }

    async fn remove_address(&self, interface: &str, address: Ipv4Addr, prefix: u8) -> Result<()> {
        let mut state = self.state();
        let before = state.bound.len();
        state
            .bound
            .retain(|b| !(b.0 == interface && b.1 == address && b.2 == prefix));
        if state.bound.len() == before {
            return Err(std::io::Error::other("RTNETLINK answers: Cannot assign requested address").into());
        }
        Ok(())
    }

    async fn enable_visibility(&self, interface: &str) -> Result<()> {
        self.state().visibility_enabled.insert(interface.to_string());
        Ok(())
    }

    async fn announce(&self, _interface: &InterfaceInfo, address: Ipv4Addr, _count: u32) -> Result<()> {
        let mut state = self.state();
        if state.failing_announces.contains(&address) {
            return Err(std::io::Error::other("Network is down").into());
        }
        state.announced.push(address);
        Ok(())
    }

    async fn pin_neighbor(&self, _interface: &str, address: Ipv4Addr, mac: MacAddr) -> Result<()> {
        self.state().pinned.insert(address, mac);
        Ok(())
    }

    async fn unpin_neighbor(&self, _interface: &str, address: Ipv4Addr) -> Result<()> {
        self.state().pinned.remove(&address);
        Ok(())
    }
}
