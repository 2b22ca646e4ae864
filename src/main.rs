//! swapflow - automated DEX trading engine
//!
//! # WARNING
//! - Live mode signs and submits real swaps. Only use funds you can afford to lose.
//! - Dry-run results use live quotes but simulated fills; they are not a promise of live fills.
//! - Copy-trading mirrors other wallets with a delay and a worse price than theirs.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use swapflow::cli::commands::{self, RunOptions};
use swapflow::config::Config;

/// swapflow - strategy and copy-trading engine for EVM DEX aggregators
#[derive(Parser)]
#[command(name = "swapflow")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "SWAPFLOW_JSON_LOGS")]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the engine until Ctrl-C
    Run {
        /// Execute real swaps (also needs execution.dry_run = false)
        #[arg(long)]
        live: bool,

        /// Skip the live confirmation prompt
        #[arg(long)]
        yes: bool,

        /// Disable copy-trading
        #[arg(long)]
        no_copy: bool,

        /// Disable configured strategies
        #[arg(long)]
        no_strategies: bool,
    },

    /// Show stored positions and P&L
    Status,

    /// Show current configuration (secrets masked)
    Config,

    /// Explain the Kelly position size for a prediction
    Kelly {
        /// Win probability in [0, 1]
        #[arg(long)]
        confidence: f64,

        /// Expected return as a fraction (0.08 = +8%)
        #[arg(long, allow_hyphen_values = true)]
        expected_return: f64,

        /// Expected loss as a fraction
        #[arg(long, default_value = "0.05")]
        risk: f64,
    },

    /// Print the level table of a grid
    Grid {
        #[arg(long)]
        lower: f64,

        #[arg(long)]
        upper: f64,

        #[arg(long, default_value = "10")]
        levels: u32,

        /// arithmetic or geometric
        #[arg(long, default_value = "arithmetic")]
        spacing: String,

        /// Current price the grid is built around
        #[arg(long)]
        price: f64,

        /// Budget split across the buy levels
        #[arg(long, default_value = "1000")]
        budget: f64,
    },

    /// Show persisted execution results
    History {
        /// Number of records to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run {
            live,
            yes,
            no_copy,
            no_strategies,
        } => {
            startup_checks(&config, live);
            commands::run(
                &config,
                RunOptions {
                    live,
                    yes,
                    no_copy,
                    no_strategies,
                },
            )
            .await
        }
        Commands::Status => commands::status(&config).await,
        Commands::Config => commands::show_config(&config),
        Commands::Kelly {
            confidence,
            expected_return,
            risk,
        } => commands::kelly(&config, confidence, expected_return, risk),
        Commands::Grid {
            lower,
            upper,
            levels,
            spacing,
            price,
            budget,
        } => commands::grid(lower, upper, levels, &spacing, price, budget),
        Commands::History { limit } => commands::history(&config, limit).await,
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("swapflow=info".parse().unwrap());
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .init();
    }
}

/// Log the limits the engine is about to run under
fn startup_checks(config: &Config, live: bool) {
    info!(
        "{} strategies configured, {} wallets tracked",
        config.strategies.len(),
        config.wallets.len()
    );
    if live && config.chain.wallet_address.is_none() {
        warn!("--live given but chain.wallet_address is not set");
    }
    if config.copy_trading.enabled {
        warn!(
            "Copy limits: max_trade={}USD, budget={}USD, max_concurrent={}",
            config.copy_trading.max_trade_size_usd,
            config.copy_trading.budget_usd,
            config.copy_trading.max_concurrent_copies
        );
    }
}
