//! Allocator configuration
//!
//! Loaded from a YAML file (usually `netclaim.yaml` in the project directory).
//! Every field has a default so an empty file, or no file at all, is valid.
//!
//! ```yaml
//! ports:
//!   start: 8000
//!   end: 9999
//! subnet:
//!   network: 172.20.0.0/24
//! lan:
//!   interface: eth0
//!   scan_offset: 100
//! ```

use crate::error::{Error, Result};
use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the configuration file looked up in a project directory
pub const CONFIG_FILE_NAME: &str = "netclaim.yaml";

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocatorConfig {
    /// Port allocation settings
    #[serde(default)]
    pub ports: PortRangeConfig,

    /// Isolated subnet settings
    #[serde(default)]
    pub subnet: SubnetConfig,

    /// LAN-visible allocation settings
    #[serde(default)]
    pub lan: LanConfig,

    /// Realization helper settings
    #[serde(default)]
    pub helper: HelperConfig,

    /// Name publication settings
    #[serde(default)]
    pub publish: PublishConfig,

    /// Directory, relative to the project, holding persisted state
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Degrade to loopback when the requested address strategy is unavailable
    #[serde(default = "default_true")]
    pub fallback_to_localhost: bool,
}

/// Inclusive port range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortRangeConfig {
    /// First port handed out
    #[serde(default = "default_port_start")]
    pub start: u16,
    /// Last port handed out
    #[serde(default = "default_port_end")]
    pub end: u16,
}

/// Isolated subnet layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubnetConfig {
    /// Private host-local network
    #[serde(default = "default_subnet")]
    pub network: Ipv4Net,
    /// Host index of the first assigned address
    #[serde(default = "default_first_host")]
    pub first_host: u32,
}

/// LAN scanning, binding and announcement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanConfig {
    /// Interface to use; detected from the default route when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
    /// Names tried when the default route gives nothing usable
    #[serde(default = "default_fallback_interfaces")]
    pub fallback_interfaces: Vec<String>,
    /// Host index where the free-address scan starts
    #[serde(default = "default_scan_offset")]
    pub scan_offset: u32,
    /// Maximum number of candidates probed per scan
    #[serde(default = "default_scan_limit")]
    pub scan_limit: usize,
    /// Candidates probed concurrently
    #[serde(default = "default_scan_concurrency")]
    pub scan_concurrency: usize,
    /// Per-candidate echo and ARP timeout in milliseconds
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Conflict-check TCP connect timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Gratuitous ARP frames sent per announcement
    #[serde(default = "default_announce_count")]
    pub announce_count: u32,
    /// Pause before the batch is re-announced, in milliseconds
    #[serde(default = "default_announce_delay_ms")]
    pub announce_delay_ms: u64,
    /// Port probed for services without an allocated port
    #[serde(default = "default_probe_port")]
    pub default_port: u16,
}

/// Privileged helper used for isolated subnets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelperConfig {
    /// Helper executable
    #[serde(default = "default_helper_program")]
    pub program: String,
    /// Elevate through `sudo -n` when not already root
    #[serde(default = "default_true")]
    pub use_sudo: bool,
}

/// Where allocated names are published
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishConfig {
    /// Domain suffix for hosts-file entries
    #[serde(default = "default_domain")]
    pub domain: String,
    /// Hosts file to maintain a managed block in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hosts_file: Option<PathBuf>,
    /// Write a JSON mapping file into the state directory
    #[serde(default = "default_true")]
    pub mapping_file: bool,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".netclaim")
}

fn default_true() -> bool {
    true
}

fn default_port_start() -> u16 {
    8000
}

fn default_port_end() -> u16 {
    9999
}

fn default_subnet() -> Ipv4Net {
    let base = Ipv4Addr::new(172, 20, 0, 0);
    Ipv4Net::new(base, 24).unwrap_or_else(|_| Ipv4Net::from(base))
}

fn default_first_host() -> u32 {
    10
}

fn default_fallback_interfaces() -> Vec<String> {
    ["eth0", "enp0s3", "ens33", "wlan0"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_scan_offset() -> u32 {
    100
}

fn default_scan_limit() -> usize {
    50
}

fn default_scan_concurrency() -> usize {
    8
}

fn default_probe_timeout_ms() -> u64 {
    1000
}

fn default_connect_timeout_ms() -> u64 {
    1000
}

fn default_announce_count() -> u32 {
    3
}

fn default_announce_delay_ms() -> u64 {
    1000
}

fn default_probe_port() -> u16 {
    80
}

fn default_helper_program() -> String {
    "netclaim-veth".to_string()
}

fn default_domain() -> String {
    "local.dev".to_string()
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            ports: PortRangeConfig::default(),
            subnet: SubnetConfig::default(),
            lan: LanConfig::default(),
            helper: HelperConfig::default(),
            publish: PublishConfig::default(),
            state_dir: default_state_dir(),
            fallback_to_localhost: default_true(),
        }
    }
}

impl Default for PortRangeConfig {
    fn default() -> Self {
        Self {
            start: default_port_start(),
            end: default_port_end(),
        }
    }
}

impl Default for SubnetConfig {
    fn default() -> Self {
        Self {
            network: default_subnet(),
            first_host: default_first_host(),
        }
    }
}

impl Default for LanConfig {
    fn default() -> Self {
        Self {
            interface: None,
            fallback_interfaces: default_fallback_interfaces(),
            scan_offset: default_scan_offset(),
            scan_limit: default_scan_limit(),
            scan_concurrency: default_scan_concurrency(),
            probe_timeout_ms: default_probe_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            announce_count: default_announce_count(),
            announce_delay_ms: default_announce_delay_ms(),
            default_port: default_probe_port(),
        }
    }
}

impl Default for HelperConfig {
    fn default() -> Self {
        Self {
            program: default_helper_program(),
            use_sudo: true,
        }
    }
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            domain: default_domain(),
            hosts_file: None,
            mapping_file: true,
        }
    }
}

impl LanConfig {
    /// Echo and ARP probe timeout
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// TCP connect timeout for conflict checks
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Pause before re-announcing a batch
    pub fn announce_delay(&self) -> Duration {
        Duration::from_millis(self.announce_delay_ms)
    }
}

impl AllocatorConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML text
    pub fn from_yaml(content: &str) -> Result<Self> {
        // An empty document deserializes to unit, not to a mapping
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `netclaim.yaml` from a project directory, or use defaults
    pub fn load_or_default(project_dir: impl AsRef<Path>) -> Result<Self> {
        let path = project_dir.as_ref().join(CONFIG_FILE_NAME);
        if path.exists() {
            tracing::debug!("Loading configuration from {}", path.display());
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.ports.start == 0 || self.ports.start >= self.ports.end {
            return Err(Error::InvalidPortRange {
                start: self.ports.start,
                end: self.ports.end,
            });
        }

        let capacity = 1u64 << (32 - u32::from(self.subnet.network.prefix_len()));
        if u64::from(self.subnet.first_host) + 1 >= capacity {
            return Err(Error::Config(format!(
                "subnet.first_host {} lies outside {}",
                self.subnet.first_host, self.subnet.network
            )));
        }

        if self.lan.scan_concurrency == 0 {
            return Err(Error::Config("lan.scan_concurrency must be at least 1".into()));
        }

        if self.lan.fallback_interfaces.is_empty() && self.lan.interface.is_none() {
            return Err(Error::Config(
                "either lan.interface or lan.fallback_interfaces must be set".into(),
            ));
        }

        Ok(())
    }

    /// Absolute state directory for a project
    pub fn state_path(&self, project_dir: impl AsRef<Path>) -> PathBuf {
        project_dir.as_ref().join(&self.state_dir)
    }
}
