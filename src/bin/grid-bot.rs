// Ladder Grid Bot - CLI
// Single entry point for running sessions and inspecting the trade ledger

use clap::{Args, Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::{error, info, warn};

use ladder_grid_bot::logging::init_logging;
use ladder_grid_bot::{AppConfig, ConfigError, SessionConfig};

// Load command modules from cli directory
#[path = "../cli/ledger_commands.rs"]
mod ledger_commands;
#[path = "../cli/session_commands.rs"]
mod session_commands;

#[derive(Parser)]
#[command(name = "grid-bot")]
#[command(version)]
#[command(about = "Ladder grid trading bot for BitoPro", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter config file
    Init {
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },

    /// Run a grid session until Ctrl-C
    Run(RunArgs),

    /// Realized FIFO profit for a pair
    Profit {
        /// Trading pair, e.g. btc_twd
        pair: String,
    },

    /// Open position and unconsumed buy lots for a pair
    Position {
        /// Trading pair, e.g. btc_twd
        pair: String,
    },

    /// List recent session runs
    Runs {
        /// Number of runs to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Database and credential health checks
    Status,
}

#[derive(Args)]
pub struct RunArgs {
    /// Trading pair, e.g. btc_twd
    #[arg(short, long)]
    pub pair: String,

    /// Base quantity per order
    #[arg(short, long)]
    pub order_size: Decimal,

    /// Sell spacing as a fraction (0.01 = 1%)
    #[arg(long, default_value = "0.01")]
    pub step_up: Decimal,

    /// Buy spacing as a fraction (0.01 = 1%)
    #[arg(long, default_value = "0.01")]
    pub step_down: Decimal,

    /// Orders per side
    #[arg(short = 'n', long, default_value = "3")]
    pub trade_count: u32,

    /// Re-centre the ladder when the price moves this much between checks
    #[arg(long, default_value = "0.03")]
    pub reset_threshold: Decimal,

    /// Stop the session when the price moves this much between checks
    #[arg(long, default_value = "0.1")]
    pub cancel_threshold: Decimal,

    /// Paper trade against live BitoPro prices
    #[arg(short, long)]
    pub dry_run: bool,

    /// Seconds between status lines
    #[arg(long, default_value = "60")]
    pub status_every: u64,
}

impl RunArgs {
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            pair: self.pair.clone(),
            order_size: self.order_size,
            step_up: self.step_up,
            step_down: self.step_down,
            trade_count: self.trade_count,
            reset_threshold: self.reset_threshold,
            cancel_threshold: self.cancel_threshold,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logging first, with the configured level when the config is readable
    let configured_level = AppConfig::from_file(&cli.config)
        .map(|c| c.logging.level)
        .unwrap_or_else(|_| "info".to_string());
    init_logging(&configured_level, cli.verbose);

    info!("🚀 Ladder Grid Bot v{}", env!("CARGO_PKG_VERSION"));
    info!("📁 Config: {}", cli.config);

    let result = match cli.command {
        // Init doesn't require config (it creates it)
        Commands::Init { force } => init_workspace(&cli.config, force),
        Commands::Run(args) => {
            let config = load_config_or_exit(&cli.config);
            session_commands::run_session(args, config).await
        }
        Commands::Profit { pair } => {
            let config = load_config_or_exit(&cli.config);
            ledger_commands::show_profit(&config, &pair)
        }
        Commands::Position { pair } => {
            let config = load_config_or_exit(&cli.config);
            ledger_commands::show_position(&config, &pair)
        }
        Commands::Runs { limit } => {
            let config = load_config_or_exit(&cli.config);
            ledger_commands::show_runs(&config, limit)
        }
        Commands::Status => {
            let config = load_config_or_exit(&cli.config);
            ledger_commands::show_status(&config)
        }
    };

    if let Err(e) = result {
        error!("❌ {}", e.user_message());
        std::process::exit(1);
    }
    Ok(())
}

/// Load config or exit with helpful error message
fn load_config_or_exit(path: &str) -> AppConfig {
    match AppConfig::from_file(path) {
        Ok(config) => config,
        Err(e) => {
            error!("❌ Configuration Error");
            error!("{}", e);

            if matches!(e, ConfigError::FileNotFound(_)) {
                error!("");
                error!("💡 Quick fix:");
                error!("   1. Run: grid-bot init");
                error!("   2. Edit config.toml with your BitoPro API key, secret and email");
                error!("   3. Try again");
            }

            std::process::exit(1);
        }
    }
}

fn init_workspace(config_path: &str, force: bool) -> ladder_grid_bot::TradingResult<()> {
    use std::fs;

    info!("🔧 Initializing workspace...");
    fs::create_dir_all("data")?;

    if std::path::Path::new(config_path).exists() && !force {
        warn!("⚠️  {} already exists, skipping (use --force to overwrite)", config_path);
    } else {
        let default_config = include_str!("../../config.toml.example");
        fs::write(config_path, default_config)?;
        info!("📝 Created {}", config_path);
    }

    info!("✅ Workspace initialized successfully!");
    info!("💡 Next steps:");
    info!("   1. Edit config.toml (or export BITOPRO_API_KEY, BITOPRO_API_SECRET, BITOPRO_IDENTITY)");
    info!("   2. Run: grid-bot run --pair btc_twd --order-size 0.0001 --dry-run");

    Ok(())
}
