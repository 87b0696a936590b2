//! Publishing the final service mapping
//!
//! A [`NameSink`] receives the endpoint of every service after a successful
//! batch and forgets them again on teardown.

use crate::error::Result;
use crate::models::Endpoint;
use indexmap::IndexMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// First line of the managed hosts-file block
pub const HOSTS_BEGIN_MARKER: &str = "# BEGIN NETCLAIM HOSTS";
/// Last line of the managed hosts-file block
pub const HOSTS_END_MARKER: &str = "# END NETCLAIM HOSTS";

/// Consumer of the final service mapping
pub trait NameSink: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Publish the mapping, replacing whatever was published before
    fn publish(&self, mapping: &IndexMap<String, Endpoint>) -> Result<()>;

    /// Withdraw everything this sink published
    fn retract(&self) -> Result<()>;
}

/// Maintains a marker-delimited block of `address<TAB>service.domain` lines
#[derive(Debug, Clone)]
pub struct HostsFileSink {
    path: PathBuf,
    domain: String,
}

impl HostsFileSink {
    /// Sink writing into `path` with names under `domain`
    pub fn new(path: impl Into<PathBuf>, domain: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            domain: domain.into(),
        }
    }

    /// Managed block for a mapping, sorted by service name
    pub fn render_block(&self, mapping: &IndexMap<String, Endpoint>) -> String {
        let mut entries: Vec<_> = mapping.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));

        let mut block = String::new();
        block.push_str(HOSTS_BEGIN_MARKER);
        block.push('\n');
        for (service, endpoint) in entries {
            block.push_str(&format!("{}\t{}.{}\n", endpoint.address, service, self.domain));
        }
        block.push_str(HOSTS_END_MARKER);
        block.push('\n');
        block
    }

    fn read(&self) -> Result<String> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Remove the managed block, leaving every other line untouched
pub fn strip_block(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut inside = false;
    for line in content.lines() {
        match line.trim() {
            HOSTS_BEGIN_MARKER => inside = true,
            HOSTS_END_MARKER if inside => inside = false,
            _ if inside => {}
            _ => {
                out.push_str(line);
                out.push('\n');
            }
        }
    }
    out
}

impl NameSink for HostsFileSink {
    fn name(&self) -> &str {
        "hosts-file"
    }

    fn publish(&self, mapping: &IndexMap<String, Endpoint>) -> Result<()> {
        let mut content = strip_block(&self.read()?);
        if !mapping.is_empty() {
            if !content.is_empty() && !content.ends_with("\n\n") {
                content.push('\n');
            }
            content.push_str(&self.render_block(mapping));
        }
        write_atomic(&self.path, content.as_bytes())?;
        info!("Published {} names to {}", mapping.len(), self.path.display());
        Ok(())
    }

    fn retract(&self) -> Result<()> {
        let content = self.read()?;
        if !content.lines().any(|line| line.trim() == HOSTS_BEGIN_MARKER) {
            debug!("No managed block in {}", self.path.display());
            return Ok(());
        }

        let stripped = strip_block(&content);
        let stripped = stripped.trim_end_matches('\n');
        let stripped = if stripped.is_empty() {
            String::new()
        } else {
            format!("{stripped}\n")
        };
        write_atomic(&self.path, stripped.as_bytes())?;
        info!("Removed managed block from {}", self.path.display());
        Ok(())
    }
}

/// Writes `{"service": {"address": ..., "port": ...}}` to a JSON file
#[derive(Debug, Clone)]
pub struct MappingFileSink {
    path: PathBuf,
}

impl MappingFileSink {
    /// Sink writing to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl NameSink for MappingFileSink {
    fn name(&self) -> &str {
        "mapping-file"
    }

    fn publish(&self, mapping: &IndexMap<String, Endpoint>) -> Result<()> {
        let content = serde_json::to_vec_pretty(mapping)?;
        write_atomic(&self.path, &content)?;
        debug!("Wrote service mapping to {}", self.path.display());
        Ok(())
    }

    fn retract(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;

    // Keep the permissions of the file being replaced, /etc/hosts must stay world-readable
    if let Ok(meta) = std::fs::metadata(path) {
        std::fs::set_permissions(tmp.path(), meta.permissions())?;
    }

    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping() -> IndexMap<String, Endpoint> {
        let mut mapping = IndexMap::new();
        mapping.insert(
            "web".to_string(),
            Endpoint {
                address: "192.168.1.103".parse().unwrap(),
                port: Some(8001),
            },
        );
        mapping.insert(
            "api".to_string(),
            Endpoint {
                address: "192.168.1.101".parse().unwrap(),
                port: Some(8000),
            },
        );
        mapping
    }

    #[test]
    fn test_render_block_sorted() {
        let sink = HostsFileSink::new("/tmp/unused", "local.dev");
        assert_eq!(
            sink.render_block(&mapping()),
            "# BEGIN NETCLAIM HOSTS\n\
             192.168.1.101\tapi.local.dev\n\
             192.168.1.103\tweb.local.dev\n\
             # END NETCLAIM HOSTS\n"
        );
    }

    #[test]
    fn test_publish_preserves_foreign_lines() {
        let dir = tempfile::tempdir().unwrap();
        let hosts = dir.path().join("hosts");
        std::fs::write(&hosts, "127.0.0.1\tlocalhost\n::1\tlocalhost\n").unwrap();

        let sink = HostsFileSink::new(&hosts, "local.dev");
        sink.publish(&mapping()).unwrap();
        sink.publish(&mapping()).unwrap();

        let content = std::fs::read_to_string(&hosts).unwrap();
        assert!(content.starts_with("127.0.0.1\tlocalhost\n::1\tlocalhost\n"));
        assert_eq!(content.matches(HOSTS_BEGIN_MARKER).count(), 1);
        assert!(content.contains("192.168.1.101\tapi.local.dev"));

        sink.retract().unwrap();
        assert_eq!(
            std::fs::read_to_string(&hosts).unwrap(),
            "127.0.0.1\tlocalhost\n::1\tlocalhost\n"
        );

        // Nothing left to retract
        sink.retract().unwrap();
    }

    #[test]
    fn test_strip_block_only_touches_managed_lines() {
        let content = "a\n# BEGIN NETCLAIM HOSTS\nx\ty\n# END NETCLAIM HOSTS\nb\n";
        assert_eq!(strip_block(content), "a\nb\n");
    }

    #[test]
    fn test_mapping_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("mapping.json");
        let sink = MappingFileSink::new(&path);

        sink.publish(&mapping()).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["api"]["address"], "192.168.1.101");
        assert_eq!(value["api"]["port"], 8000);

        sink.retract().unwrap();
        assert!(!path.exists());
        sink.retract().unwrap();
    }
}
