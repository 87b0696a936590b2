//! Privileged helper realizing an isolated-subnet map as veth pairs
//!
//! Invoked by `netclaim up --strategy subnet` as
//! `netclaim-veth up|down <map.json> [--prefix N]`, usually through sudo.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use command_executor::LocalLauncher;
use indexmap::IndexMap;
use network_identity::VethPlan;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info};

#[path = "../logging.rs"]
mod logging;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Verb {
    /// Create one veth pair per service
    Up,
    /// Remove the pairs again
    Down,
}

#[derive(Parser)]
#[command(name = "netclaim-veth")]
#[command(about = "Create or remove veth pairs for an isolated-subnet map")]
#[command(version)]
struct Cli {
    /// What to do
    #[arg(value_enum)]
    verb: Verb,

    /// JSON object mapping service names to addresses
    map: PathBuf,

    /// Prefix length of the isolated subnet
    #[arg(long, default_value_t = 24)]
    prefix: u8,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn load_map(path: &Path) -> Result<IndexMap<String, Ipv4Addr>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid address map {}", path.display()))
}

async fn run(cli: Cli) -> Result<()> {
    if !nix::unistd::Uid::effective().is_root() {
        anyhow::bail!("netclaim-veth must run as root");
    }
    if cli.prefix > 32 {
        anyhow::bail!("invalid prefix length {}", cli.prefix);
    }

    let plan = VethPlan::from_map(&load_map(&cli.map)?, cli.prefix);
    if plan.is_empty() {
        info!("Address map is empty, nothing to do");
        return Ok(());
    }

    match cli.verb {
        Verb::Up => {
            plan.apply_up(&LocalLauncher).await?;
            info!("Created {} veth pairs", plan.pairs().len());
        }
        Verb::Down => {
            let removed = plan.apply_down(&LocalLauncher).await;
            info!("Removed {} of {} veth pairs", removed, plan.pairs().len());
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match smol::block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_arguments() {
        let cli = Cli::try_parse_from(["netclaim-veth", "down", "map.json", "--prefix", "16", "-v"]).unwrap();
        assert!(matches!(cli.verb, Verb::Down));
        assert_eq!(cli.map, PathBuf::from("map.json"));
        assert_eq!(cli.prefix, 16);
        assert!(cli.verbose);

        let cli = Cli::try_parse_from(["netclaim-veth", "up", "map.json"]).unwrap();
        assert_eq!(cli.prefix, 24);
        assert!(!cli.verbose);
    }
}
