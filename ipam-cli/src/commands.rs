use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use ipam_config::IpamConfig;
use ipam_engine::Ipam;
use tracing::debug;

#[derive(Parser)]
#[command(name = "ipam", version, about = "Hierarchical IP address management")]
pub struct Cli {
    /// Configuration file (YAML or JSON); defaults to `config/ipam.yaml` plus `IPAM_*` overrides
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Print the Prometheus exposition to stderr after the command
    #[arg(long, global = true)]
    pub metrics: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage address pools
    #[command(subcommand)]
    Pool(PoolCommand),
    /// Manage allocations carved from pools
    #[command(subcommand)]
    Alloc(AllocationCommand),
    /// Show the resolved configuration
    Config,
}

#[derive(Subcommand)]
pub enum PoolCommand {
    /// Create a pool from one or more CIDR ranges, searched in the given order
    Create(PoolArgs),
    Get { name: String },
    List,
    /// Replace the ranges of an existing pool
    Update(PoolArgs),
    Delete { name: String },
    /// Adopt a pool given as `name:cidr1,cidr2`
    Import { import_id: String },
}

#[derive(Args, Debug, Clone)]
pub struct PoolArgs {
    pub name: String,
    #[arg(required = true, num_args = 1..)]
    pub cidrs: Vec<String>,
}

#[derive(Subcommand)]
pub enum AllocationCommand {
    /// Reserve the lowest free block of the requested size
    Create(AllocateArgs),
    Get { id: String },
    List {
        #[arg(short, long)]
        pool: Option<String>,
    },
    Delete { id: String },
    /// Adopt an existing allocation by id
    Import { id: String },
}

#[derive(Args, Debug, Clone)]
pub struct AllocateArgs {
    pub id: String,
    #[arg(short, long)]
    pub pool: String,
    #[arg(short = 'l', long, allow_negative_numbers = true)]
    pub prefix_length: i64,
}

pub fn load_config(path: Option<&PathBuf>) -> Result<IpamConfig> {
    match path {
        Some(path) => IpamConfig::load_from_path(path)
            .with_context(|| format!("failed to load configuration from {}", path.display())),
        None => IpamConfig::load().context("failed to load configuration"),
    }
}

pub fn run_command(cli: Cli, config: &IpamConfig) -> Result<()> {
    let ipam = match cli.command {
        Commands::Config => {
            println!("{config:#?}");
            return Ok(());
        }
        _ => Ipam::from_config(config).context("failed to open IPAM store")?,
    };
    debug!(backend = %ipam.store().describe(), "Store opened");

    let result = match cli.command {
        Commands::Pool(cmd) => run_pool(cmd, &ipam),
        Commands::Alloc(cmd) => run_allocation(cmd, &ipam),
        Commands::Config => Ok(()),
    };

    if cli.metrics {
        eprintln!("{}", ipam.metrics().gather_metrics()?);
    }
    ipam.close()?;
    result
}

fn run_pool(command: PoolCommand, ipam: &Ipam) -> Result<()> {
    match command {
        PoolCommand::Create(args) => print_json(&ipam.create_pool(&args.name, args.cidrs.as_slice())?),
        PoolCommand::Get { name } => match ipam.read_pool(&name)? {
            Some(pool) => print_json(&pool),
            None => anyhow::bail!("pool '{name}' not found"),
        },
        PoolCommand::List => print_json(&ipam.list_pools()?),
        PoolCommand::Update(args) => print_json(&ipam.update_pool(&args.name, args.cidrs.as_slice())?),
        PoolCommand::Delete { name } => {
            ipam.delete_pool(&name)?;
            debug!(pool = %name, "Pool removed");
            Ok(())
        }
        PoolCommand::Import { import_id } => print_json(&ipam.import_pool(&import_id)?),
    }
}

fn run_allocation(command: AllocationCommand, ipam: &Ipam) -> Result<()> {
    match command {
        AllocationCommand::Create(args) => print_json(&ipam.create_allocation(
            &args.id,
            &args.pool,
            args.prefix_length,
        )?),
        AllocationCommand::Get { id } => match ipam.read_allocation(&id)? {
            Some(allocation) => print_json(&allocation),
            None => anyhow::bail!("allocation '{id}' not found"),
        },
        AllocationCommand::List { pool } => print_json(&ipam.list_allocations(pool.as_deref())?),
        AllocationCommand::Delete { id } => {
            ipam.delete_allocation(&id)?;
            debug!(id = %id, "Allocation removed");
            Ok(())
        }
        AllocationCommand::Import { id } => print_json(&ipam.import_allocation(&id)?),
    }
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_allocation_create() {
        let cli = Cli::try_parse_from([
            "ipam", "alloc", "create", "vm-1", "--pool", "lab", "--prefix-length", "27",
        ])
        .unwrap();
        match cli.command {
            Commands::Alloc(AllocationCommand::Create(args)) => {
                assert_eq!(args.id, "vm-1");
                assert_eq!(args.pool, "lab");
                assert_eq!(args.prefix_length, 27);
            }
            _ => panic!("unexpected command"),
        }
    }

    #[test]
    fn pool_create_needs_a_range() {
        assert!(Cli::try_parse_from(["ipam", "pool", "create", "lab"]).is_err());
        let cli = Cli::try_parse_from([
            "ipam", "--config", "ipam.yaml", "pool", "create", "lab", "10.0.0.0/16", "10.1.0.0/16",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("ipam.yaml")));
        match cli.command {
            Commands::Pool(PoolCommand::Create(args)) => {
                assert_eq!(args.cidrs, vec!["10.0.0.0/16", "10.1.0.0/16"])
            }
            _ => panic!("unexpected command"),
        }
    }
}
