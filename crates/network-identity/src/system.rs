//! [`HostNetwork`] backed by the real host
//!
//! Address and neighbor changes go through iproute2 (`ip`), reachability
//! probes through `ping` and `arping`, interface enumeration and gratuitous
//! ARP through raw datalink sockets.

use crate::arp;
use crate::error::{Error, Result};
use crate::host::{HostNetwork, InterfaceInfo};
use async_io::Timer;
use async_trait::async_trait;
use command_executor::{Command, Launcher, LocalLauncher};
use ipnet::Ipv4Net;
use pnet::datalink::{self, NetworkInterface};
use pnet::ipnetwork::IpNetwork;
use pnet::util::MacAddr;
use regex::Regex;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::{debug, warn};

/// Extra time granted to a probe command beyond its own timeout
const COMMAND_GRACE: Duration = Duration::from_secs(2);

/// Spacing between repeated gratuitous ARP frames
const ANNOUNCE_INTERVAL: Duration = Duration::from_millis(200);

static DEFAULT_ROUTE_DEV: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^default\b.*\bdev\s+(\S+)").expect("valid regex"));

static NEIGH_LLADDR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"lladdr\s+([0-9a-fA-F:]{17})").expect("valid regex"));

static ARP_AT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bat\s+([0-9a-fA-F:]{17})\b").expect("valid regex"));

/// The host's own network stack
#[derive(Clone)]
pub struct SystemNetwork {
    launcher: Arc<dyn Launcher>,
}

impl std::fmt::Debug for SystemNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemNetwork").finish_non_exhaustive()
    }
}

impl Default for SystemNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemNetwork {
    /// Run tools directly as the current user
    pub fn new() -> Self {
        Self::with_launcher(Arc::new(LocalLauncher))
    }

    /// Run tools through a custom launcher
    pub fn with_launcher(launcher: Arc<dyn Launcher>) -> Self {
        Self { launcher }
    }

    async fn run_checked(&self, command: Command) -> Result<String> {
        let result = self.launcher.execute_checked(command).await?;
        Ok(result.stdout)
    }

    /// Run a probe command; success of the command means the target answered
    async fn probe(&self, command: Command, timeout: Duration) -> Result<bool> {
        match self
            .launcher
            .execute_with_timeout(command, timeout + COMMAND_GRACE)
            .await
        {
            Ok(result) => Ok(result.success()),
            Err(command_executor::Error::TimedOut { command, .. }) => {
                debug!("{} timed out, treating as no answer", command);
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn timeout_secs(timeout: Duration) -> String {
    timeout.as_secs().max(1).to_string()
}

impl From<NetworkInterface> for InterfaceInfo {
    fn from(intf: NetworkInterface) -> Self {
        let ipv4 = intf
            .ips
            .iter()
            .filter_map(|net| match net {
                IpNetwork::V4(v4) => Ipv4Net::new(v4.ip(), v4.prefix()).ok(),
                IpNetwork::V6(_) => None,
            })
            .collect();

        Self {
            name: intf.name,
            mac: intf.mac.filter(|mac| *mac != MacAddr::zero()),
            ipv4,
        }
    }
}

#[async_trait]
impl HostNetwork for SystemNetwork {
    fn is_privileged(&self) -> bool {
        nix::unistd::Uid::effective().is_root()
    }

    async fn default_route_interface(&self) -> Result<Option<String>> {
        let output = self
            .run_checked(Command::builder("ip").args(["route", "show", "default"]).build())
            .await?;
        Ok(parse_default_route(&output))
    }

    fn interface(&self, name: &str) -> Option<InterfaceInfo> {
        datalink::interfaces()
            .into_iter()
            .find(|intf| intf.name == name)
            .map(InterfaceInfo::from)
    }

    async fn ping(&self, address: Ipv4Addr, timeout: Duration) -> Result<bool> {
        let command = Command::builder("ping")
            .args(["-c", "1", "-W"])
            .arg(timeout_secs(timeout))
            .arg(address.to_string())
            .build();
        self.probe(command, timeout).await
    }

    async fn arp_probe(&self, interface: &str, address: Ipv4Addr, timeout: Duration) -> Result<bool> {
        let command = Command::builder("arping")
            .args(["-c", "1", "-w"])
            .arg(timeout_secs(timeout))
            .args(["-I", interface])
            .arg(address.to_string())
            .build();
        self.probe(command, timeout).await
    }

    async fn tcp_connect(&self, address: SocketAddr, timeout: Duration) -> bool {
        let connect = async { async_net::TcpStream::connect(address).await.is_ok() };
        let deadline = async {
            Timer::after(timeout).await;
            false
        };
        futures::future::select(Box::pin(connect), Box::pin(deadline))
            .await
            .factor_first()
            .0
    }

    async fn neighbor_mac(&self, address: IpAddr) -> Result<Option<MacAddr>> {
        let target = address.to_string();

        match self
            .run_checked(Command::builder("ip").args(["neigh", "show", target.as_str()]).build())
            .await
        {
            Ok(output) => {
                if let Some(mac) = parse_neigh_lladdr(&output) {
                    return Ok(Some(mac));
                }
            }
            Err(e) => debug!("ip neigh lookup for {} failed: {}", target, e),
        }

        // Older hosts may only carry net-tools
        let output = self
            .run_checked(Command::builder("arp").args(["-n", target.as_str()]).build())
            .await?;
        Ok(parse_arp_at(&output))
    }

    async fn add_address(&self, interface: &str, address: Ipv4Addr, prefix: u8, label: &str) -> Result<()> {
        self.run_checked(
            Command::builder("ip")
                .args(["addr", "add"])
                .arg(format!("{address}/{prefix}"))
                .args(["dev", interface, "label", label])
                .build(),
        )
        .await?;
        Ok(())
    }

    async fn remove_address(&self, interface: &str, address: Ipv4Addr, prefix: u8) -> Result<()> {
        self.run_checked(
            Command::builder("ip")
                .args(["addr", "del"])
                .arg(format!("{address}/{prefix}"))
                .args(["dev", interface])
                .build(),
        )
        .await?;
        Ok(())
    }

    async fn enable_visibility(&self, interface: &str) -> Result<()> {
        async_fs::write("/proc/sys/net/ipv4/ip_forward", b"1").await?;
        async_fs::write(format!("/proc/sys/net/ipv4/conf/{interface}/proxy_arp"), b"1").await?;
        Ok(())
    }

    async fn announce(&self, interface: &InterfaceInfo, address: Ipv4Addr, count: u32) -> Result<()> {
        let mac = interface.mac.ok_or_else(|| Error::InterfaceUnusable {
            interface: interface.name.clone(),
            reason: "no hardware address".into(),
        })?;
        let frame = arp::gratuitous_frame(mac, address)?;
        let (_, mut tx) = arp::open_sender(&interface.name)?;

        for i in 0..count {
            if i > 0 {
                Timer::after(ANNOUNCE_INTERVAL).await;
            }
            arp::send_frame(tx.as_mut(), &frame)?;
        }

        debug!("Sent {} gratuitous ARP frames for {} on {}", count, address, interface.name);
        Ok(())
    }

    async fn pin_neighbor(&self, interface: &str, address: Ipv4Addr, mac: MacAddr) -> Result<()> {
        self.run_checked(
            Command::builder("ip")
                .args(["neigh", "replace"])
                .arg(address.to_string())
                .arg("lladdr")
                .arg(mac.to_string())
                .args(["dev", interface, "nud", "permanent"])
                .build(),
        )
        .await?;
        Ok(())
    }

    async fn unpin_neighbor(&self, interface: &str, address: Ipv4Addr) -> Result<()> {
        let target = address.to_string();

        // The net-tools cache entry may or may not exist
        if let Err(e) = self
            .run_checked(Command::builder("arp").args(["-d", target.as_str()]).build())
            .await
        {
            debug!("arp -d {} failed: {}", target, e);
        }

        match self
            .run_checked(
                Command::builder("ip")
                    .args(["neigh", "del", target.as_str(), "dev", interface])
                    .build(),
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(Error::CommandExecution(command_executor::Error::NonZeroExit { stderr, .. }))
                if is_missing_entry(&stderr) =>
            {
                debug!("No neighbor entry for {} on {}", target, interface);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to drop neighbor entry for {}: {}", target, e);
                Err(e)
            }
        }
    }
}

fn is_missing_entry(stderr: &str) -> bool {
    let stderr = stderr.to_ascii_lowercase();
    stderr.contains("no such file") || stderr.contains("not found") || stderr.contains("no such")
}

/// Interface named by the first `default ... dev X` line of `ip route`
fn parse_default_route(output: &str) -> Option<String> {
    output
        .lines()
        .find_map(|line| DEFAULT_ROUTE_DEV.captures(line.trim()))
        .map(|caps| caps[1].to_string())
}

fn parse_neigh_lladdr(output: &str) -> Option<MacAddr> {
    NEIGH_LLADDR
        .captures(output)
        .and_then(|caps| caps[1].parse().ok())
}

fn parse_arp_at(output: &str) -> Option<MacAddr> {
    ARP_AT.captures(output).and_then(|caps| caps[1].parse().ok())
}
