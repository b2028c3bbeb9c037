//! Pool Migrator - batch jobs moving nomination pools and stakers to the new
//! staking representation
//!
//! # WARNING
//! - Non-dry runs sign and submit real transactions from derived accounts.
//! - The node must allow unsafe RPC methods.
//! - Two jobs running at once must use disjoint `--first_seed` windows.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info};

// Use the library crate
use pool_migrator::cli::commands::{self, JobOptions};
use pool_migrator::config::Config;
use pool_migrator::error::exit_code_for;

/// Pool Migrator - nomination pool and staking migration jobs
#[derive(Parser)]
#[command(name = "migrator")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, default_value = "migrator.toml")]
    config: String,

    /// Node WebSocket endpoint (overrides the config file)
    #[arg(short, long, global = true)]
    endpoint: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug, Clone, Copy)]
struct JobArgs {
    /// Only classify and count, submit nothing
    #[arg(short, long, default_value_t = true, action = clap::ArgAction::Set)]
    dry: bool,

    /// Skip this many keys of each scanned collection
    #[arg(short, long = "start_from", default_value_t = 0)]
    start_from: usize,

    /// First derivation seed of the signer window
    #[arg(short, long = "first_seed", default_value_t = 0)]
    first_seed: u32,
}

impl From<JobArgs> for JobOptions {
    fn from(args: JobArgs) -> Self {
        Self {
            dry_run: args.dry,
            start_from: args.start_from,
            first_seed: args.first_seed,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Migrate nomination pools and pool members to delegated stake
    Pools(JobArgs),

    /// Migrate stakers from the legacy currency lock
    Currency(JobArgs),

    /// Top up the signer pool from the admin account
    Fund {
        /// First derivation seed of the signer window
        #[arg(short, long = "first_seed", default_value_t = 0)]
        first_seed: u32,
    },

    /// Sweep every signer's balance back to the admin account
    Collect {
        /// First derivation seed of the signer window
        #[arg(short, long = "first_seed", default_value_t = 0)]
        first_seed: u32,

        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,

        /// List what would be swept, don't execute
        #[arg(short, long, default_value_t = false, action = clap::ArgAction::Set)]
        dry: bool,
    },

    /// Provider/consumer reference census of stakers and pool members
    Refs {
        /// Print the census as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show current configuration (secrets masked)
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pool_migrator=info".parse()?),
        )
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::load(&cli.config).and_then(|c| c.with_endpoint(cli.endpoint)) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            std::process::exit(2);
        }
    };

    info!("Using endpoint {}", config.chain.endpoint);

    // Execute command
    let result = match cli.command {
        Commands::Pools(args) => commands::migrate_pools(&config, args.into()).await,
        Commands::Currency(args) => commands::migrate_currency(&config, args.into()).await,
        Commands::Fund { first_seed } => commands::fund_signers(&config, first_seed).await,
        Commands::Collect {
            first_seed,
            force,
            dry,
        } => commands::collect_signers(&config, first_seed, force, dry).await,
        Commands::Refs { json } => commands::ref_census(&config, json).await,
        Commands::Config => commands::show_config(&config),
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        std::process::exit(exit_code_for(&e));
    }

    Ok(())
}
