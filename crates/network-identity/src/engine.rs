//! Allocation lifecycle
//!
//! [`AllocationEngine`] ties the allocators together: `up` claims ports and
//! addresses for a batch of services, persists the result and publishes it;
//! `down` releases whatever the state directory says was claimed.

use crate::config::AllocatorConfig;
use crate::error::{Error, Result};
use crate::host::HostNetwork;
use crate::lan::LanAllocator;
use crate::models::{AllocationRecord, ServiceIdentity, ServiceRequirement, Strategy};
use crate::port::PortAllocator;
use crate::publish::{MappingFileSink, NameSink};
use crate::state::StateStore;
use crate::subnet::IsolatedSubnetAllocator;
use crate::system::SystemNetwork;
use command_executor::{Launcher, LocalLauncher, SudoLauncher};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Result of a successful `up`
#[derive(Debug, Clone)]
pub struct AllocationOutcome {
    /// What was claimed, as persisted
    pub record: AllocationRecord,
    /// Why the requested strategy was abandoned, if it was
    pub fallback_reason: Option<String>,
}

impl AllocationOutcome {
    /// Whether addresses came from a different strategy than requested
    pub fn fell_back(&self) -> bool {
        self.fallback_reason.is_some()
    }
}

/// What `down` released
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownSummary {
    /// Whether an allocation record existed
    pub had_record: bool,
    /// LAN addresses removed cleanly
    pub lan_addresses_released: usize,
    /// Whether an isolated subnet was torn down
    pub subnet_torn_down: bool,
}

/// Drives allocation and teardown for one project
pub struct AllocationEngine {
    config: AllocatorConfig,
    store: StateStore,
    net: Arc<dyn HostNetwork>,
    helper_launcher: Arc<dyn Launcher>,
    ports: Option<PortAllocator>,
    sinks: Vec<Box<dyn NameSink>>,
}

impl AllocationEngine {
    /// Engine for a project directory, acting on the real host
    pub fn new(project_dir: impl AsRef<Path>, config: AllocatorConfig) -> Result<Self> {
        config.validate()?;

        let store = StateStore::new(config.state_path(project_dir));
        let net: Arc<dyn HostNetwork> = Arc::new(SystemNetwork::new());

        let helper_launcher: Arc<dyn Launcher> = if config.helper.use_sudo && !net.is_privileged() {
            Arc::new(SudoLauncher::new(LocalLauncher))
        } else {
            Arc::new(LocalLauncher)
        };

        let mut sinks: Vec<Box<dyn NameSink>> = Vec::new();
        if config.publish.mapping_file {
            sinks.push(Box::new(MappingFileSink::new(store.mapping_path())));
        }

        Ok(Self {
            config,
            store,
            net,
            helper_launcher,
            ports: None,
            sinks,
        })
    }

    /// Use a different host network implementation
    pub fn with_host_network(mut self, net: Arc<dyn HostNetwork>) -> Self {
        self.net = net;
        self
    }

    /// Use a different launcher for the realization helper
    pub fn with_helper_launcher(mut self, launcher: Arc<dyn Launcher>) -> Self {
        self.helper_launcher = launcher;
        self
    }

    /// Use a preconfigured port allocator for the next `up`
    pub fn with_port_allocator(mut self, ports: PortAllocator) -> Self {
        self.ports = Some(ports);
        self
    }

    /// Publish results to an additional sink
    pub fn with_sink(mut self, sink: Box<dyn NameSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Configuration in effect
    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    /// Persistence root
    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// LAN allocator sharing this engine's host and state
    pub fn lan(&self) -> LanAllocator {
        LanAllocator::new(self.net.clone(), self.config.lan.clone(), self.store.clone())
    }

    /// Isolated-subnet allocator sharing this engine's state
    pub fn subnet(&self) -> IsolatedSubnetAllocator {
        IsolatedSubnetAllocator::new(
            self.config.subnet.clone(),
            self.config.helper.clone(),
            self.store.clone(),
            self.helper_launcher.clone(),
        )
    }

    /// Last persisted allocation
    pub fn status(&self) -> Option<AllocationRecord> {
        self.store.allocation().load()
    }

    /// Claim ports and addresses for a batch of services
    pub async fn up(&mut self, requirements: &[ServiceRequirement], strategy: Strategy) -> Result<AllocationOutcome> {
        if self.store.has_claims() {
            info!("Releasing the previous allocation first");
            self.down().await?;
        }

        let ports = self.allocate_ports(requirements)?;

        let addressed: Vec<String> = requirements
            .iter()
            .filter(|r| r.needs_address)
            .map(|r| r.name.clone())
            .collect();

        let (effective, addresses, interface, fallback_reason) =
            self.allocate_addresses(strategy, &addressed, &ports).await?;

        let mut record = AllocationRecord::new(strategy, effective);
        record.interface = interface;
        for requirement in requirements {
            record.insert(ServiceIdentity {
                name: requirement.name.clone(),
                port: ports.get(&requirement.name).copied(),
                address: addresses.get(&requirement.name).copied(),
                strategy: effective,
            });
        }
        record.check_unique()?;

        self.store.allocation().save(&record)?;

        let mapping = record.endpoints();
        for sink in &self.sinks {
            sink.publish(&mapping)?;
        }

        info!(
            "Allocated {} services with strategy {}",
            record.services.len(),
            record.strategy
        );
        Ok(AllocationOutcome {
            record,
            fallback_reason,
        })
    }

    fn allocate_ports(&mut self, requirements: &[ServiceRequirement]) -> Result<HashMap<String, u16>> {
        let mut allocator = match self.ports.take() {
            Some(allocator) => allocator,
            None => PortAllocator::new(self.config.ports.start, self.config.ports.end)?,
        };

        let mut ports = HashMap::new();
        for requirement in requirements.iter().filter(|r| r.publishes_port) {
            ports.insert(requirement.name.clone(), allocator.get_free_port()?);
        }
        Ok(ports)
    }

    async fn allocate_addresses(
        &self,
        strategy: Strategy,
        services: &[String],
        ports: &HashMap<String, u16>,
    ) -> Result<(Strategy, IndexMap<String, IpAddr>, Option<String>, Option<String>)> {
        if services.is_empty() || strategy == Strategy::None {
            return Ok((Strategy::None, IndexMap::new(), None, None));
        }

        let attempt: Result<(IndexMap<String, IpAddr>, Option<String>)> = match strategy {
            Strategy::IsolatedSubnet => self.subnet().setup(services).await.and_then(|map| {
                if map.is_empty() {
                    Err(Error::StrategyUnavailable {
                        strategy,
                        reason: "the realization helper did not succeed".into(),
                    })
                } else {
                    Ok((map.into_iter().map(|(s, a)| (s, IpAddr::V4(a))).collect(), None))
                }
            }),
            Strategy::LanVisible => self.lan().setup_services(services, ports).await.map(|batch| {
                let addresses = batch
                    .addresses
                    .into_iter()
                    .map(|(s, a)| (s, IpAddr::V4(a)))
                    .collect();
                (addresses, Some(batch.interface))
            }),
            Strategy::None => Ok((IndexMap::new(), None)),
        };

        match attempt {
            Ok((addresses, interface)) => Ok((strategy, addresses, interface, None)),
            Err(e) if e.allows_fallback() && self.config.fallback_to_localhost => {
                warn!("Strategy {} unavailable, falling back to localhost: {}", strategy, e);
                Ok((Strategy::None, IndexMap::new(), None, Some(e.to_string())))
            }
            Err(e) => Err(e),
        }
    }

    /// Release everything persisted for this project; safe to repeat
    pub async fn down(&self) -> Result<TeardownSummary> {
        let record = self.store.allocation().load();
        let mut summary = TeardownSummary {
            had_record: record.is_some(),
            ..Default::default()
        };

        summary.lan_addresses_released = self.lan().cleanup_all().await?;

        match self.subnet().teardown().await {
            Ok(torn_down) => summary.subnet_torn_down = torn_down,
            Err(e) => warn!("Isolated subnet cleanup failed: {}", e),
        }

        for sink in &self.sinks {
            if let Err(e) = sink.retract() {
                warn!("Retracting names from {} failed: {}", sink.name(), e);
            }
        }

        self.store.allocation().remove()?;

        if summary.had_record {
            info!("Released the allocation");
        }
        Ok(summary)
    }
}
