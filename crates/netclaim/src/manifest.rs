//! Compose manifest reading
//!
//! Only the `services:` map matters here: its keys name the services, in file
//! order, and a service publishes a host port iff it declares `ports`.

use anyhow::{Context, Result};
use indexmap::IndexMap;
use network_identity::{ServiceRequirement, Strategy};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const COMPOSE_FILE_NAMES: &[&str] = &[
    "docker-compose.yml",
    "docker-compose.yaml",
    "compose.yml",
    "compose.yaml",
];

#[derive(Debug, Default, Deserialize)]
pub struct ComposeFile {
    #[serde(default)]
    pub services: IndexMap<String, ComposeService>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ComposeService {
    #[serde(default)]
    pub ports: Vec<serde_yaml::Value>,
}

impl ComposeFile {
    pub fn parse(content: &str) -> Result<Self> {
        let parsed: Option<Self> = serde_yaml::from_str(content).context("Invalid compose file")?;
        Ok(parsed.unwrap_or_default())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// What each service needs under `strategy`
    pub fn requirements(&self, strategy: Strategy) -> Vec<ServiceRequirement> {
        self.services
            .iter()
            .map(|(name, service)| {
                let mut requirement = ServiceRequirement::new(name);
                if !service.ports.is_empty() {
                    requirement = requirement.with_port();
                }
                if strategy != Strategy::None {
                    requirement = requirement.with_address();
                }
                requirement
            })
            .collect()
    }
}

/// The compose file of a project: explicit, or the first conventional name present
pub fn locate(project_dir: &Path, explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }

    COMPOSE_FILE_NAMES
        .iter()
        .map(|name| project_dir.join(name))
        .find(|path| path.exists())
        .with_context(|| {
            format!(
                "No compose file in {} (looked for {})",
                project_dir.display(),
                COMPOSE_FILE_NAMES.join(", ")
            )
        })
}
