use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use network_identity::Strategy;
use std::path::PathBuf;

mod commands;
mod logging;
mod manifest;

#[derive(Parser)]
#[command(name = "netclaim")]
#[command(about = "Give every service of a deployment its own port and address")]
#[command(version)]
struct Cli {
    /// Project directory holding the compose file and the state directory
    #[arg(short = 'C', long, global = true, default_value = ".")]
    project_dir: PathBuf,

    /// Configuration file (defaults to netclaim.yaml in the project directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Compose file (defaults to docker-compose.yml or compose.yaml)
    #[arg(short, long, global = true)]
    file: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Address strategy as spelled on the command line
#[derive(Debug, Clone, Copy, ValueEnum)]
enum StrategyArg {
    /// Loopback only
    None,
    /// Private host-local subnet
    Subnet,
    /// Secondary addresses on the LAN
    Lan,
}

impl From<StrategyArg> for Strategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::None => Strategy::None,
            StrategyArg::Subnet => Strategy::IsolatedSubnet,
            StrategyArg::Lan => Strategy::LanVisible,
        }
    }
}

/// Output format for commands printing allocations
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Allocate ports and addresses for every service
    Up {
        /// Address strategy
        #[arg(short, long, value_enum, default_value = "none")]
        strategy: StrategyArg,

        /// LAN interface to bind on
        #[arg(short, long)]
        interface: Option<String>,

        /// First port of the allocation range
        #[arg(long)]
        start_port: Option<u16>,

        /// Last port of the allocation range
        #[arg(long)]
        end_port: Option<u16>,

        /// Domain suffix for hosts-file names
        #[arg(long)]
        domain: Option<String>,

        /// Hosts file to publish names into
        #[arg(long)]
        hosts_file: Option<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Release everything the last `up` claimed
    Down {
        /// Hosts file to remove published names from
        #[arg(long)]
        hosts_file: Option<PathBuf>,
    },

    /// Show the current allocation
    Status {
        /// Output format
        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Look for free LAN addresses without binding them
    Scan {
        /// Number of addresses to look for
        #[arg(short = 'n', long, default_value_t = 5)]
        count: usize,

        /// LAN interface to scan
        #[arg(short, long)]
        interface: Option<String>,
    },

    /// Re-run conflict detection against the allocated addresses
    Check,

    /// Check that allocated services accept connections
    Verify,

    /// Re-announce allocated LAN addresses to the network
    Announce,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    smol::block_on(async {
        let ctx = commands::Context::load(cli.project_dir, cli.config.as_deref(), cli.file)?;

        match cli.command {
            Commands::Up {
                strategy,
                interface,
                start_port,
                end_port,
                domain,
                hosts_file,
                format,
            } => {
                let overrides = commands::up::Overrides {
                    interface,
                    start_port,
                    end_port,
                    domain,
                    hosts_file,
                };
                commands::up::run(ctx, strategy.into(), overrides, format == OutputFormat::Json).await
            }
            Commands::Down { hosts_file } => commands::down::run(ctx, hosts_file).await,
            Commands::Status { format } => commands::status::run(&ctx, format == OutputFormat::Json),
            Commands::Scan { count, interface } => commands::scan::run(ctx, count, interface).await,
            Commands::Check => commands::check::run(&ctx).await,
            Commands::Verify => commands::verify::run(&ctx).await,
            Commands::Announce => commands::announce::run(&ctx).await,
        }
    })
}
