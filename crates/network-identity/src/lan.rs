//! LAN-visible address allocation
//!
//! Each service gets a secondary address on the host's LAN interface, chosen
//! from addresses nobody answers for. The batch is bound only after the
//! conflict detector has cleared every candidate, and every bound address is
//! recorded on disk before the next one is attempted so teardown can always
//! find it again.

use crate::config::LanConfig;
use crate::conflict::{ConflictDetector, ConflictSet};
use crate::discovery::{self, NetworkDescriptor};
use crate::error::{Error, Result};
use crate::host::{HostNetwork, InterfaceInfo};
use crate::state::{LanTracking, StateStore, VirtualIp};
use async_io::Timer;
use chrono::Utc;
use futures::StreamExt;
use futures::stream;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Longest interface label the kernel accepts
const MAX_LABEL_LEN: usize = 15;

/// Timeout for post-allocation connectivity checks
pub const VERIFY_TIMEOUT: Duration = Duration::from_secs(2);

/// Addresses bound by one successful batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanBatch {
    /// Interface the addresses were bound on
    pub interface: String,
    /// Service to address, in request order
    pub addresses: IndexMap<String, Ipv4Addr>,
}

/// Allocates LAN-visible secondary addresses
pub struct LanAllocator {
    net: Arc<dyn HostNetwork>,
    config: LanConfig,
    store: StateStore,
}

impl LanAllocator {
    /// Create an allocator persisting into `store`
    pub fn new(net: Arc<dyn HostNetwork>, config: LanConfig, store: StateStore) -> Self {
        Self { net, config, store }
    }

    /// Fail unless the process may reconfigure interfaces
    pub fn check_root_privileges(&self, operation: &str) -> Result<()> {
        if self.net.is_privileged() {
            Ok(())
        } else {
            Err(Error::PrivilegeRequired {
                operation: operation.to_string(),
            })
        }
    }

    /// Interface to use: the configured one, else auto-detected
    pub async fn interface_name(&self) -> Result<String> {
        match &self.config.interface {
            Some(name) => Ok(name.clone()),
            None => discovery::detect_interface(self.net.as_ref(), &self.config.fallback_interfaces).await,
        }
    }

    /// Describe the LAN the host sits on
    pub async fn network_details(&self) -> Result<NetworkDescriptor> {
        let name = self.interface_name().await?;
        let desc = discovery::describe_interface(self.net.as_ref(), &name)?;
        info!(
            "LAN interface {}: {} in {} ({})",
            desc.interface_name, desc.local_address, desc.network, desc.mac
        );
        Ok(desc)
    }

    /// Find up to `count` addresses nobody answers for, ascending.
    ///
    /// At most `scan_limit` candidates are probed. Probes run concurrently but
    /// results are consumed in address order, so the outcome is the same as a
    /// sequential scan. Returns fewer than `count` when the scan runs out.
    /// A probe tool missing from the host aborts the scan.
    pub async fn find_free_ips(&self, desc: &NetworkDescriptor, count: usize) -> Result<Vec<Ipv4Addr>> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let candidates: Vec<Ipv4Addr> = desc
            .candidates(self.config.scan_offset)
            .take(self.config.scan_limit)
            .collect();

        debug!(
            "Scanning {} candidates from {} for {} free addresses",
            candidates.len(),
            candidates.first().map(|a| a.to_string()).unwrap_or_default(),
            count
        );

        let mut probes = stream::iter(candidates)
            .map(|address| async move { (address, self.is_free(&desc.interface_name, address).await) })
            .buffered(self.config.scan_concurrency.max(1));

        let mut free = Vec::with_capacity(count);
        while let Some((address, available)) = probes.next().await {
            if available? {
                debug!("{} is free", address);
                free.push(address);
                if free.len() == count {
                    break;
                }
            }
        }

        if free.len() < count {
            warn!(
                "Only found {} of {} free addresses in {}",
                free.len(),
                count,
                desc.network
            );
        }

        Ok(free)
    }

    /// A candidate is free if it answers neither echo nor ARP
    async fn is_free(&self, interface: &str, address: Ipv4Addr) -> Result<bool> {
        let timeout = self.config.probe_timeout();

        match self.net.ping(address, timeout).await {
            Ok(true) => return Ok(false),
            Ok(false) => {}
            Err(e) if e.is_missing_tool() => return Err(e),
            Err(e) => {
                debug!("Echo probe of {} failed, skipping: {}", address, e);
                return Ok(false);
            }
        }

        match self.net.arp_probe(interface, address, timeout).await {
            Ok(answered) => Ok(!answered),
            Err(e) if e.is_missing_tool() => Err(e),
            Err(e) => {
                debug!("ARP probe of {} failed, skipping: {}", address, e);
                Ok(false)
            }
        }
    }

    /// Run the conflict detector over a candidate batch
    pub async fn detect_conflicts(
        &self,
        desc: &NetworkDescriptor,
        candidates: &IndexMap<String, Ipv4Addr>,
        ports: &HashMap<String, u16>,
    ) -> ConflictSet {
        ConflictDetector::new(self.net.as_ref(), desc.mac)
            .with_connect_timeout(self.config.connect_timeout())
            .with_default_port(self.config.default_port)
            .detect(
                candidates
                    .iter()
                    .map(|(service, address)| (service.as_str(), IpAddr::V4(*address))),
                ports,
            )
            .await
    }

    /// Allocate, vet, bind and announce one address per service
    pub async fn setup_services(&self, services: &[String], ports: &HashMap<String, u16>) -> Result<LanBatch> {
        self.check_root_privileges("bind LAN-visible addresses")?;

        if self.store.lan_tracking().load().is_some_and(|t| !t.is_empty()) {
            warn!("Releasing LAN addresses left over from a previous run");
            self.cleanup_all().await?;
        }

        let desc = self.network_details().await?;
        if services.is_empty() {
            return Ok(LanBatch {
                interface: desc.interface_name,
                addresses: IndexMap::new(),
            });
        }

        let free = self.find_free_ips(&desc, services.len()).await?;
        if free.len() < services.len() {
            return Err(Error::InsufficientFreeAddresses {
                requested: services.len(),
                found: free.len(),
                network: desc.network.to_string(),
            });
        }

        let candidates: IndexMap<String, Ipv4Addr> = services.iter().cloned().zip(free).collect();

        let conflicts = self.detect_conflicts(&desc, &candidates, ports).await;
        if !conflicts.is_empty() {
            error!("{} of {} candidates conflict, binding nothing", conflicts.len(), candidates.len());
            return Err(Error::ConflictDetected { conflicts });
        }

        let interface = self.interface_info(&desc)?;
        let mut tracking = LanTracking::new(&desc.interface_name, desc.prefix_length());

        for (service, address) in &candidates {
            if let Err(e) = self.add_virtual_ip(&desc, &interface, &mut tracking, service, *address).await {
                error!("Binding {} for {} failed, rolling back the batch", address, service);
                self.rollback(&tracking).await;
                return Err(e);
            }
        }

        // Announce again once the kernel has settled, for neighbors that
        // dropped the first round
        Timer::after(self.config.announce_delay()).await;
        for address in candidates.values() {
            if let Err(e) = self.net.announce(&interface, *address, self.config.announce_count).await {
                warn!("Re-announcing {} failed: {}", address, e);
            }
        }

        info!("Bound {} LAN addresses on {}", candidates.len(), desc.interface_name);
        Ok(LanBatch {
            interface: desc.interface_name,
            addresses: candidates,
        })
    }

    fn interface_info(&self, desc: &NetworkDescriptor) -> Result<InterfaceInfo> {
        self.net
            .interface(&desc.interface_name)
            .ok_or_else(|| Error::NoInterfaceFound {
                tried: vec![desc.interface_name.clone()],
            })
    }

    /// Bind one address, make it visible and record it
    pub async fn add_virtual_ip(
        &self,
        desc: &NetworkDescriptor,
        interface: &InterfaceInfo,
        tracking: &mut LanTracking,
        service: &str,
        address: Ipv4Addr,
    ) -> Result<()> {
        let label = address_label(&desc.interface_name, service);

        self.net
            .add_address(&desc.interface_name, address, desc.prefix_length(), &label)
            .await
            .map_err(|e| Error::BindFailed {
                service: service.to_string(),
                address: IpAddr::V4(address),
                interface: desc.interface_name.clone(),
                reason: e.to_string(),
            })?;

        tracking.virtual_ips.push(VirtualIp {
            ip: address,
            label: label.clone(),
            service: service.to_string(),
            timestamp: Utc::now(),
        });
        self.store.lan_tracking().save(tracking)?;

        if let Err(e) = self.net.enable_visibility(&desc.interface_name).await {
            warn!("Could not enable proxy ARP on {}: {}", desc.interface_name, e);
        }
        if let Err(e) = self.net.announce(interface, address, self.config.announce_count).await {
            warn!("Announcing {} failed: {}", address, e);
        }
        if let Err(e) = self.net.pin_neighbor(&desc.interface_name, address, desc.mac).await {
            warn!("Pinning neighbor entry for {} failed: {}", address, e);
        }

        info!("Bound {} as {} for service {}", address, label, service);
        Ok(())
    }

    /// Release one address; failures are logged and reported as `false`
    pub async fn remove_virtual_ip(&self, interface: &str, address: Ipv4Addr, prefix: u8) -> bool {
        let removed = match self.net.remove_address(interface, address, prefix).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Removing {} from {} failed: {}", address, interface, e);
                false
            }
        };

        if let Err(e) = self.net.unpin_neighbor(interface, address).await {
            debug!("Dropping neighbor entry for {} failed: {}", address, e);
        }

        if removed {
            info!("Released {} from {}", address, interface);
        }
        removed
    }

    async fn rollback(&self, tracking: &LanTracking) {
        for vip in tracking.virtual_ips.iter().rev() {
            self.remove_virtual_ip(&tracking.interface, vip.ip, tracking.prefix_length)
                .await;
        }
        if let Err(e) = self.store.lan_tracking().remove() {
            warn!("Could not clear LAN tracking after rollback: {}", e);
        }
    }

    /// Release every tracked address, then forget them.
    ///
    /// Returns the number of addresses that were removed cleanly. Without
    /// tracking this is a no-op.
    pub async fn cleanup_all(&self) -> Result<usize> {
        let Some(tracking) = self.store.lan_tracking().load() else {
            debug!("No LAN addresses tracked");
            return Ok(0);
        };

        if !tracking.is_empty() {
            self.check_root_privileges("release LAN-visible addresses")?;
        }

        let mut released = 0;
        for vip in &tracking.virtual_ips {
            if self
                .remove_virtual_ip(&tracking.interface, vip.ip, tracking.prefix_length)
                .await
            {
                released += 1;
            }
        }

        self.store.lan_tracking().remove()?;
        info!(
            "Released {} of {} LAN addresses on {}",
            released,
            tracking.virtual_ips.len(),
            tracking.interface
        );
        Ok(released)
    }

    /// Re-pin and re-announce every tracked address, returning how many were announced
    pub async fn refresh_announcements(&self) -> Result<usize> {
        let Some(tracking) = self.store.lan_tracking().load() else {
            return Ok(0);
        };
        self.check_root_privileges("announce LAN-visible addresses")?;

        let desc = discovery::describe_interface(self.net.as_ref(), &tracking.interface)?;
        let interface = self.interface_info(&desc)?;

        let mut announced = 0;
        for vip in &tracking.virtual_ips {
            if let Err(e) = self.net.pin_neighbor(&tracking.interface, vip.ip, desc.mac).await {
                warn!("Pinning neighbor entry for {} failed: {}", vip.ip, e);
            }
            match self
                .net
                .announce(&interface, vip.ip, self.config.announce_count)
                .await
            {
                Ok(()) => announced += 1,
                Err(e) => warn!("Announcing {} failed: {}", vip.ip, e),
            }
        }

        Ok(announced)
    }

    /// Check that each service accepts TCP connections on its address
    pub async fn verify_connectivity(
        &self,
        addresses: &IndexMap<String, IpAddr>,
        ports: &HashMap<String, u16>,
    ) -> IndexMap<String, bool> {
        let mut results = IndexMap::new();
        for (service, address) in addresses {
            let port = ports.get(service).copied().unwrap_or(self.config.default_port);
            let reachable = self
                .net
                .tcp_connect(SocketAddr::new(*address, port), VERIFY_TIMEOUT)
                .await;
            if !reachable {
                debug!("{} is not reachable at {}:{}", service, address, port);
            }
            results.insert(service.clone(), reachable);
        }
        results
    }
}

/// `http://address:port` for every service with an address
pub fn service_urls(
    addresses: &IndexMap<String, IpAddr>,
    ports: &HashMap<String, u16>,
    default_port: u16,
) -> IndexMap<String, String> {
    addresses
        .iter()
        .map(|(service, address)| {
            let port = ports.get(service).copied().unwrap_or(default_port);
            (service.clone(), format!("http://{address}:{port}"))
        })
        .collect()
}

/// Interface label for a service's address: `iface:service`, cut to what
/// the kernel accepts
pub fn address_label(interface: &str, service: &str) -> String {
    let room = MAX_LABEL_LEN.saturating_sub(interface.len() + 1);
    if room == 0 {
        return interface.chars().take(MAX_LABEL_LEN).collect();
    }

    let suffix: String = service
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(room)
        .collect();
    format!("{interface}:{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_label() {
        assert_eq!(address_label("eth0", "api"), "eth0:api");
        assert_eq!(address_label("eth0", "my.service"), "eth0:my_service");
        assert_eq!(address_label("enp5s0", "postgres-primary"), "enp5s0:postgres");
        assert_eq!(address_label("enp5s0", "postgres-primary").len(), MAX_LABEL_LEN);
        assert_eq!(address_label("wlp0s20f3abcdef", "api"), "wlp0s20f3abcdef");
    }

    #[test]
    fn test_service_urls() {
        let mut addresses = IndexMap::new();
        addresses.insert("api".to_string(), "192.168.1.101".parse().unwrap());
        addresses.insert("web".to_string(), "192.168.1.103".parse().unwrap());
        let ports = HashMap::from([("api".to_string(), 8000)]);

        let urls = service_urls(&addresses, &ports, 80);
        assert_eq!(urls["api"], "http://192.168.1.101:8000");
        assert_eq!(urls["web"], "http://192.168.1.103:80");
    }
}
