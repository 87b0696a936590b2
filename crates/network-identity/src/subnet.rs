//! Isolated-subnet address allocation
//!
//! Services get sequential addresses from a private host-local network. The
//! map is written to the state directory and handed to a privileged helper
//! which creates one veth pair per service. The helper is invoked as
//! `<program> up <map>` and `<program> down <map>`.

use crate::config::{HelperConfig, SubnetConfig};
use crate::error::{Error, Result};
use crate::state::StateStore;
use command_executor::{Command, Launcher};
use indexmap::IndexMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Prefix length the helper assumes when none is passed
pub const HELPER_DEFAULT_PREFIX: u8 = 24;

/// Assigns isolated-subnet addresses and drives the realization helper
pub struct IsolatedSubnetAllocator {
    subnet: SubnetConfig,
    helper: HelperConfig,
    store: StateStore,
    launcher: Arc<dyn Launcher>,
}

impl IsolatedSubnetAllocator {
    /// Create an allocator running the helper through `launcher`
    pub fn new(subnet: SubnetConfig, helper: HelperConfig, store: StateStore, launcher: Arc<dyn Launcher>) -> Self {
        Self {
            subnet,
            helper,
            store,
            launcher,
        }
    }

    /// Assign one address per service, in order, and persist the map
    pub fn allocate_ips(&self, services: &[String]) -> Result<IndexMap<String, Ipv4Addr>> {
        let network = self.subnet.network;
        let base = u32::from(network.network());
        let last_host = u32::from(network.broadcast()).saturating_sub(1);

        let mut map = IndexMap::with_capacity(services.len());
        for (i, service) in services.iter().enumerate() {
            let host = base
                .checked_add(self.subnet.first_host)
                .and_then(|addr| addr.checked_add(i as u32))
                .filter(|addr| *addr <= last_host)
                .ok_or(Error::SubnetExhausted {
                    network,
                    requested: services.len(),
                })?;
            map.insert(service.clone(), Ipv4Addr::from(host));
        }

        self.store.subnet_map().save(&map)?;
        debug!("Assigned {} isolated-subnet addresses in {}", map.len(), network);
        Ok(map)
    }

    /// Assign addresses and have the helper realize them.
    ///
    /// An empty map means the strategy is unavailable on this host; the
    /// persisted map is kept so a later teardown still removes whatever the
    /// helper managed to create.
    pub async fn setup(&self, services: &[String]) -> Result<IndexMap<String, Ipv4Addr>> {
        let map = self.allocate_ips(services)?;
        if map.is_empty() {
            return Ok(map);
        }

        match self.run_helper("up").await {
            Ok(()) => {
                info!("Realized {} isolated-subnet addresses", map.len());
                Ok(map)
            }
            Err(e) => {
                warn!("Isolated subnet unavailable: {}", e);
                Ok(IndexMap::new())
            }
        }
    }

    /// Have the helper remove the interfaces, then forget the map
    pub async fn teardown(&self) -> Result<bool> {
        if self.store.subnet_map().load().is_none() {
            debug!("No isolated subnet to tear down");
            // A malformed map is useless to the helper as well
            self.store.subnet_map().remove()?;
            return Ok(false);
        }

        if let Err(e) = self.run_helper("down").await {
            warn!("Isolated subnet teardown failed: {}", e);
        }

        self.store.subnet_map().remove()?;
        info!("Isolated subnet torn down");
        Ok(true)
    }

    async fn run_helper(&self, verb: &str) -> Result<()> {
        let prefix = self.subnet.network.prefix_len();
        let mut builder = Command::builder(&self.helper.program)
            .arg(verb)
            .arg(self.store.subnet_map().path());
        if prefix != HELPER_DEFAULT_PREFIX {
            builder = builder.arg("--prefix").arg(prefix.to_string());
        }
        let command = builder.build();
        debug!("Running {}", command);

        let result = self.launcher.execute(command).await?;
        if result.success() {
            Ok(())
        } else {
            Err(Error::HelperFailed {
                verb: verb.to_string(),
                code: result.status.code,
                stderr: result.stderr.trim().to_string(),
            })
        }
    }
}
