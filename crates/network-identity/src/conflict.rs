//! LAN conflict detection
//!
//! Before any address of a LAN batch is bound, every candidate is checked for
//! two things: whether another machine already answers for the address, and
//! whether something already accepts connections on the service's port there.

use crate::host::HostNetwork;
use pnet::util::MacAddr;
use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tracing::{debug, warn};

/// What was found for one candidate address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictReport {
    /// Service the address was meant for
    pub service: String,
    /// Candidate address
    pub address: IpAddr,
    /// Port that was probed
    pub port: u16,
    /// Hardware address of the foreign owner, if the neighbor table knows one
    pub foreign_mac: Option<MacAddr>,
    /// The port answers and the address belongs to another machine
    pub port_owned_by_other_host: bool,
    /// The port answers but the address is not known to be foreign
    ///
    /// This can be a stale binding left behind by an earlier unclean run.
    pub port_open_locally: bool,
}

impl ConflictReport {
    /// Whether another machine owns the address
    pub fn address_owned_by_other_host(&self) -> bool {
        self.foreign_mac.is_some()
    }

    /// Whether anything at all was found
    pub fn is_empty(&self) -> bool {
        !self.address_owned_by_other_host() && !self.port_owned_by_other_host && !self.port_open_locally
    }
}

impl fmt::Display for ConflictReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}:{})", self.service, self.address, self.port)?;
        let mut findings = Vec::new();
        if let Some(mac) = self.foreign_mac {
            findings.push(format!("address in use by {mac}"));
        }
        if self.port_owned_by_other_host {
            findings.push("port in use by another host".to_string());
        }
        if self.port_open_locally {
            findings.push("port already open".to_string());
        }
        write!(f, ": {}", findings.join(", "))
    }
}

/// Non-empty reports of one batch, in batch order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConflictSet {
    reports: Vec<ConflictReport>,
}

impl ConflictSet {
    /// Add a report, dropping empty ones
    pub fn push(&mut self, report: ConflictReport) {
        if !report.is_empty() {
            self.reports.push(report);
        }
    }

    /// Whether no conflict was found
    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    /// Number of conflicting services
    pub fn len(&self) -> usize {
        self.reports.len()
    }

    /// Reports in batch order
    pub fn iter(&self) -> impl Iterator<Item = &ConflictReport> {
        self.reports.iter()
    }

    /// Report for a service
    pub fn get(&self, service: &str) -> Option<&ConflictReport> {
        self.reports.iter().find(|r| r.service == service)
    }
}

impl fmt::Display for ConflictSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, report) in self.reports.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "  {report}")?;
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a ConflictSet {
    type Item = &'a ConflictReport;
    type IntoIter = std::slice::Iter<'a, ConflictReport>;

    fn into_iter(self) -> Self::IntoIter {
        self.reports.iter()
    }
}

/// Checks candidate addresses against the LAN
pub struct ConflictDetector<'a> {
    net: &'a dyn HostNetwork,
    local_mac: MacAddr,
    connect_timeout: Duration,
    default_port: u16,
}

impl<'a> ConflictDetector<'a> {
    /// Detector that treats `local_mac` as ours
    pub fn new(net: &'a dyn HostNetwork, local_mac: MacAddr) -> Self {
        Self {
            net,
            local_mac,
            connect_timeout: Duration::from_secs(1),
            default_port: 80,
        }
    }

    /// TCP connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Port probed for services without one
    pub fn with_default_port(mut self, port: u16) -> Self {
        self.default_port = port;
        self
    }

    /// Check one candidate
    pub async fn check(&self, service: &str, address: IpAddr, port: Option<u16>) -> ConflictReport {
        let port = port.unwrap_or(self.default_port);

        let foreign_mac = match self.net.neighbor_mac(address).await {
            Ok(Some(mac)) if mac != self.local_mac => Some(mac),
            Ok(_) => None,
            Err(e) => {
                debug!("Neighbor lookup for {} failed: {}", address, e);
                None
            }
        };

        let port_open = self
            .net
            .tcp_connect(SocketAddr::new(address, port), self.connect_timeout)
            .await;

        ConflictReport {
            service: service.to_string(),
            address,
            port,
            foreign_mac,
            port_owned_by_other_host: port_open && foreign_mac.is_some(),
            port_open_locally: port_open && foreign_mac.is_none(),
        }
    }

    /// Check every candidate of a batch
    pub async fn detect<'s>(
        &self,
        candidates: impl IntoIterator<Item = (&'s str, IpAddr)>,
        ports: &HashMap<String, u16>,
    ) -> ConflictSet {
        let mut conflicts = ConflictSet::default();

        for (service, address) in candidates {
            let report = self.check(service, address, ports.get(service).copied()).await;
            if !report.is_empty() {
                warn!("Conflict for {}", report);
            }
            conflicts.push(report);
        }

        conflicts
    }
}
