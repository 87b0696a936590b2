use anyhow::{Context as _, Result};
use comfy_table::{Cell, Color, Table};
use network_identity::{AllocationEngine, AllocationRecord, AllocatorConfig, HostsFileSink, Strategy};
use std::path::{Path, PathBuf};

pub mod announce;
pub mod check;
pub mod down;
pub mod scan;
pub mod status;
pub mod up;
pub mod verify;

/// Everything a command needs to know about the project
pub struct Context {
    pub project_dir: PathBuf,
    pub config: AllocatorConfig,
    pub compose_file: Option<PathBuf>,
}

impl Context {
    pub fn load(project_dir: PathBuf, config_path: Option<&Path>, compose_file: Option<PathBuf>) -> Result<Self> {
        let config = match config_path {
            Some(path) => AllocatorConfig::from_file(path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
            None => AllocatorConfig::load_or_default(&project_dir).context("Failed to load configuration")?,
        };

        Ok(Self {
            project_dir,
            config,
            compose_file,
        })
    }

    /// Engine publishing to the configured sinks, plus a hosts file if given
    pub fn engine(&self, hosts_file: Option<PathBuf>) -> Result<AllocationEngine> {
        let mut engine = AllocationEngine::new(&self.project_dir, self.config.clone())?;

        if let Some(path) = hosts_file.or_else(|| self.config.publish.hosts_file.clone()) {
            engine = engine.with_sink(Box::new(HostsFileSink::new(path, &self.config.publish.domain)));
        }

        Ok(engine)
    }
}

fn strategy_color(strategy: Strategy) -> Color {
    match strategy {
        Strategy::None => Color::DarkGrey,
        Strategy::IsolatedSubnet => Color::Cyan,
        Strategy::LanVisible => Color::Green,
    }
}

/// Print an allocation record as a table
pub fn print_record(record: &AllocationRecord) {
    let mut table = Table::new();
    table.set_header(vec!["SERVICE", "STRATEGY", "ADDRESS", "PORT", "URL"]);

    for (name, identity) in &record.services {
        let endpoint = identity.endpoint();
        table.add_row(vec![
            Cell::new(name),
            Cell::new(identity.strategy).fg(strategy_color(identity.strategy)),
            Cell::new(endpoint.address),
            Cell::new(identity.port.map(|p| p.to_string()).unwrap_or_else(|| "-".into())),
            Cell::new(endpoint.url().unwrap_or_else(|| "-".into())),
        ]);
    }

    println!("{table}");
    if let Some(interface) = &record.interface {
        println!("Interface: {interface}");
    }
    println!("Allocated: {}", record.created_at.to_rfc3339());
}
