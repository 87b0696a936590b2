use super::Context;
use crate::manifest::{self, ComposeFile};
use anyhow::{Context as _, Result};
use network_identity::Strategy;
use std::path::PathBuf;

/// Command-line overrides of the loaded configuration
pub struct Overrides {
    pub interface: Option<String>,
    pub start_port: Option<u16>,
    pub end_port: Option<u16>,
    pub domain: Option<String>,
    pub hosts_file: Option<PathBuf>,
}

pub async fn run(mut ctx: Context, strategy: Strategy, overrides: Overrides, json: bool) -> Result<()> {
    if let Some(interface) = overrides.interface {
        ctx.config.lan.interface = Some(interface);
    }
    if let Some(start) = overrides.start_port {
        ctx.config.ports.start = start;
    }
    if let Some(end) = overrides.end_port {
        ctx.config.ports.end = end;
    }
    if let Some(domain) = overrides.domain {
        ctx.config.publish.domain = domain;
    }
    ctx.config.validate().context("Invalid options")?;

    let compose_path = manifest::locate(&ctx.project_dir, ctx.compose_file.as_deref())?;
    let compose = ComposeFile::load(&compose_path)?;
    let requirements = compose.requirements(strategy);
    if requirements.is_empty() {
        println!("No services in {}", compose_path.display());
        return Ok(());
    }

    let mut engine = ctx.engine(overrides.hosts_file)?;
    let outcome = engine
        .up(&requirements, strategy)
        .await
        .context("Allocation failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome.record)?);
        return Ok(());
    }

    if let Some(reason) = &outcome.fallback_reason {
        println!("⚠ {strategy} unavailable, using localhost: {reason}");
    }
    super::print_record(&outcome.record);
    println!("✓ Allocated {} services", outcome.record.services.len());
    Ok(())
}
