//! Veth pair plan for isolated subnets
//!
//! Pure description of the interfaces an isolated-subnet map needs, plus the
//! `ip` invocations that create or remove them. The realization helper runs
//! the plan as root.

use crate::error::Result;
use command_executor::{Command, Launcher};
use indexmap::IndexMap;
use std::net::Ipv4Addr;
use tracing::{debug, info, warn};

/// Longest interface name the kernel accepts
const MAX_IFNAME_LEN: usize = 15;

/// One veth pair carrying one service address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VethPair {
    /// Service the pair belongs to
    pub service: String,
    /// Host end, which carries the address
    pub host_side: String,
    /// Peer end
    pub peer_side: String,
    /// Service address
    pub address: Ipv4Addr,
    /// Prefix length of the isolated subnet
    pub prefix: u8,
}

/// Veth pairs for a whole map, in map order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VethPlan {
    pairs: Vec<VethPair>,
}

impl VethPlan {
    /// Plan one pair per service of `map`
    pub fn from_map(map: &IndexMap<String, Ipv4Addr>, prefix: u8) -> Self {
        let pairs = map
            .iter()
            .map(|(service, address)| {
                let (host_side, peer_side) = interface_names(service);
                VethPair {
                    service: service.clone(),
                    host_side,
                    peer_side,
                    address: *address,
                    prefix,
                }
            })
            .collect();
        Self { pairs }
    }

    /// Planned pairs
    pub fn pairs(&self) -> &[VethPair] {
        &self.pairs
    }

    /// Whether there is nothing to do
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Commands creating and configuring one pair
    pub fn up_commands(pair: &VethPair) -> Vec<Command> {
        vec![
            Command::builder("ip")
                .args(["link", "add", pair.host_side.as_str(), "type", "veth", "peer", "name", pair.peer_side.as_str()])
                .build(),
            Command::builder("ip")
                .args(["addr", "add"])
                .arg(format!("{}/{}", pair.address, pair.prefix))
                .args(["dev", pair.host_side.as_str()])
                .build(),
            Command::builder("ip")
                .args(["link", "set", pair.host_side.as_str(), "up"])
                .build(),
            Command::builder("ip")
                .args(["link", "set", pair.peer_side.as_str(), "up"])
                .build(),
        ]
    }

    /// Command removing one pair; deleting either end removes both
    pub fn down_command(pair: &VethPair) -> Command {
        Command::builder("ip")
            .args(["link", "del", pair.host_side.as_str()])
            .build()
    }

    /// Create every pair, replacing leftovers of an earlier run
    pub async fn apply_up(&self, launcher: &dyn Launcher) -> Result<()> {
        for pair in &self.pairs {
            // A pair surviving an unclean shutdown would make `link add` fail
            if launcher.execute(Self::down_command(pair)).await.is_ok_and(|r| r.success()) {
                debug!("Removed stale {}", pair.host_side);
            }

            for command in Self::up_commands(pair) {
                launcher.execute_checked(command).await?;
            }
            info!(
                "Created {} <-> {} with {}/{} for {}",
                pair.host_side, pair.peer_side, pair.address, pair.prefix, pair.service
            );
        }
        Ok(())
    }

    /// Remove every pair; returns how many were removed
    pub async fn apply_down(&self, launcher: &dyn Launcher) -> usize {
        let mut removed = 0;
        for pair in &self.pairs {
            match launcher.execute_checked(Self::down_command(pair)).await {
                Ok(_) => {
                    info!("Removed {}", pair.host_side);
                    removed += 1;
                }
                Err(e) => warn!("Removing {} failed: {}", pair.host_side, e),
            }
        }
        removed
    }
}

/// Host and peer interface names for a service.
///
/// Names keep a readable prefix of the service name and a hash of the full
/// name, so long names sharing a prefix still map to distinct interfaces.
pub fn interface_names(service: &str) -> (String, String) {
    let hash = fnv1a(service.as_bytes()) & 0xffff;
    let stem: String = service
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .take(MAX_IFNAME_LEN - 7)
        .collect();
    (format!("vh{stem}-{hash:04x}"), format!("vp{stem}-{hash:04x}"))
}

fn fnv1a(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0x811c_9dc5u32, |hash, b| {
        (hash ^ u32::from(*b)).wrapping_mul(0x0100_0193)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, &str)]) -> IndexMap<String, Ipv4Addr> {
        entries
            .iter()
            .map(|(s, a)| (s.to_string(), a.parse().unwrap()))
            .collect()
    }

    #[test]
    fn test_interface_names_fit_kernel_limit() {
        for service in ["a", "api", "a-very-long-service-name-indeed", "Ünïcode.svc"] {
            let (host, peer) = interface_names(service);
            assert!(host.len() <= MAX_IFNAME_LEN, "{host}");
            assert!(peer.len() <= MAX_IFNAME_LEN, "{peer}");
            assert_ne!(host, peer);
        }
    }

    #[test]
    fn test_interface_names_are_distinct_for_shared_prefix() {
        let (a, _) = interface_names("postgres-primary");
        let (b, _) = interface_names("postgres-replica");
        assert!(a.starts_with("vhpostgre"));
        assert_ne!(a, b);
        assert_eq!(interface_names("postgres-primary").0, a);
    }

    #[test]
    fn test_plan_follows_map_order() {
        let plan = VethPlan::from_map(&map(&[("web", "172.20.0.10"), ("api", "172.20.0.11")]), 24);
        let services: Vec<_> = plan.pairs().iter().map(|p| p.service.as_str()).collect();
        assert_eq!(services, vec!["web", "api"]);
    }

    #[test]
    fn test_up_commands() {
        let plan = VethPlan::from_map(&map(&[("api", "172.20.0.10")]), 24);
        let pair = &plan.pairs()[0];
        let commands: Vec<String> = VethPlan::up_commands(pair).iter().map(|c| c.to_string()).collect();

        assert_eq!(
            commands[0],
            format!("ip link add {} type veth peer name {}", pair.host_side, pair.peer_side)
        );
        assert_eq!(commands[1], format!("ip addr add 172.20.0.10/24 dev {}", pair.host_side));
        assert_eq!(commands[2], format!("ip link set {} up", pair.host_side));
        assert_eq!(commands[3], format!("ip link set {} up", pair.peer_side));
        assert_eq!(
            VethPlan::down_command(pair).to_string(),
            format!("ip link del {}", pair.host_side)
        );
    }
}
