//! Persisted allocation state
//!
//! All state lives as JSON documents under one directory per project:
//!
//! - `allocation.json` the last successful batch ([`AllocationRecord`])
//! - `subnet_map.json` service to isolated-subnet address, read by the helper
//! - `lan_ips.json` every LAN address bound so far ([`LanTracking`])
//!
//! Reads are tolerant: a missing or malformed document reads as absent.
//! Writes go to a temporary file in the same directory which is then renamed
//! over the target, so a crash never leaves a half-written document behind.

use crate::error::Result;
use crate::models::AllocationRecord;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::io::Write;
use std::marker::PhantomData;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const ALLOCATION_FILE: &str = "allocation.json";
const SUBNET_MAP_FILE: &str = "subnet_map.json";
const LAN_TRACKING_FILE: &str = "lan_ips.json";
const MAPPING_FILE: &str = "mapping.json";

/// A typed JSON document on disk
#[derive(Debug, Clone)]
pub struct JsonFile<T> {
    path: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned> JsonFile<T> {
    /// Document at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _marker: PhantomData,
        }
    }

    /// Location on disk
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the document exists
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read the document; missing or unreadable documents yield `None`
    pub fn load(&self) -> Option<T> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Cannot read {}: {}", self.path.display(), e);
                return None;
            }
        };

        match serde_json::from_str(&content) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Ignoring malformed {}: {}", self.path.display(), e);
                None
            }
        }
    }

    /// Atomically replace the document
    pub fn save(&self, value: &T) -> Result<()> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, value)?;
        tmp.write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;

        debug!("Saved {}", self.path.display());
        Ok(())
    }

    /// Delete the document; returns whether it existed
    pub fn remove(&self) -> Result<bool> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!("Removed {}", self.path.display());
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// One LAN address bound by this tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualIp {
    /// Bound address
    pub ip: Ipv4Addr,
    /// Interface label the address was added with
    pub label: String,
    /// Service the address belongs to
    pub service: String,
    /// When the address was bound
    pub timestamp: DateTime<Utc>,
}

/// Every LAN address bound on an interface, in binding order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanTracking {
    /// Interface the addresses live on
    pub interface: String,
    /// Prefix length the addresses were added with
    #[serde(default = "default_prefix_length")]
    pub prefix_length: u8,
    /// Bound addresses
    #[serde(default)]
    pub virtual_ips: Vec<VirtualIp>,
}

fn default_prefix_length() -> u8 {
    24
}

impl LanTracking {
    /// Empty tracking for an interface
    pub fn new(interface: impl Into<String>, prefix_length: u8) -> Self {
        Self {
            interface: interface.into(),
            prefix_length,
            virtual_ips: Vec::new(),
        }
    }

    /// Whether nothing is tracked
    pub fn is_empty(&self) -> bool {
        self.virtual_ips.is_empty()
    }

    /// Address tracked for a service
    pub fn address_of(&self, service: &str) -> Option<Ipv4Addr> {
        self.virtual_ips
            .iter()
            .find(|vip| vip.service == service)
            .map(|vip| vip.ip)
    }
}

/// Persistence root for one project
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    /// Store rooted at `dir`; the directory is created on first write
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// State directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Last successful batch
    pub fn allocation(&self) -> JsonFile<AllocationRecord> {
        JsonFile::new(self.dir.join(ALLOCATION_FILE))
    }

    /// Isolated-subnet map handed to the realization helper
    pub fn subnet_map(&self) -> JsonFile<IndexMap<String, Ipv4Addr>> {
        JsonFile::new(self.dir.join(SUBNET_MAP_FILE))
    }

    /// LAN addresses bound so far
    pub fn lan_tracking(&self) -> JsonFile<LanTracking> {
        JsonFile::new(self.dir.join(LAN_TRACKING_FILE))
    }

    /// Default location of the published service mapping
    pub fn mapping_path(&self) -> PathBuf {
        self.dir.join(MAPPING_FILE)
    }

    /// Whether any claim from a previous run is still on disk
    pub fn has_claims(&self) -> bool {
        self.allocation().exists() || self.subnet_map().exists() || self.lan_tracking().exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Strategy;

    #[test]
    fn test_missing_document_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("state"));
        assert!(store.allocation().load().is_none());
        assert!(!store.has_claims());
    }

    #[test]
    fn test_malformed_document_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        std::fs::write(store.lan_tracking().path(), "{ not json").unwrap();
        assert!(store.lan_tracking().load().is_none());
    }

    #[test]
    fn test_save_creates_directory_and_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path().join("nested").join(".netclaim"));

        let mut map = IndexMap::new();
        map.insert("api".to_string(), Ipv4Addr::new(172, 20, 0, 10));
        store.subnet_map().save(&map).unwrap();

        map.insert("db".to_string(), Ipv4Addr::new(172, 20, 0, 11));
        store.subnet_map().save(&map).unwrap();

        let loaded = store.subnet_map().load().unwrap();
        assert_eq!(loaded, map);
        assert!(store.has_claims());

        // Only the document itself remains, no stray temporary files
        let entries = std::fs::read_dir(store.dir()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_subnet_map_is_a_flat_object() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());

        let mut map = IndexMap::new();
        map.insert("web".to_string(), Ipv4Addr::new(172, 20, 0, 10));
        store.subnet_map().save(&map).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(store.subnet_map().path()).unwrap())
                .unwrap();
        assert_eq!(raw, serde_json::json!({ "web": "172.20.0.10" }));
    }

    #[test]
    fn test_lan_tracking_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());

        let mut tracking = LanTracking::new("eth0", 24);
        tracking.virtual_ips.push(VirtualIp {
            ip: Ipv4Addr::new(192, 168, 1, 101),
            label: "eth0:api".into(),
            service: "api".into(),
            timestamp: Utc::now(),
        });
        store.lan_tracking().save(&tracking).unwrap();

        let loaded = store.lan_tracking().load().unwrap();
        assert_eq!(loaded, tracking);
        assert_eq!(loaded.address_of("api"), Some(Ipv4Addr::new(192, 168, 1, 101)));
        assert_eq!(loaded.address_of("db"), None);
    }

    #[test]
    fn test_tracking_without_prefix_defaults() {
        let json = r#"{"interface":"eth0","virtual_ips":[]}"#;
        let tracking: LanTracking = serde_json::from_str(json).unwrap();
        assert_eq!(tracking.prefix_length, 24);
        assert!(tracking.is_empty());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let record = AllocationRecord::new(Strategy::None, Strategy::None);

        store.allocation().save(&record).unwrap();
        assert!(store.allocation().remove().unwrap());
        assert!(!store.allocation().remove().unwrap());
    }
}
