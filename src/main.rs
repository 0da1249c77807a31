use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::Path;
use tracing::{info, warn};

use habit_tracker::config::Config;
use habit_tracker::{api, utils};

#[derive(Parser)]
#[command(name = "habit-tracker", version, about = "Habit tracking API server")]
struct AppCli {
    /// Config file path
    #[arg(short, long, default_value = "config.json", global = true)]
    config: String,

    /// Subcommands
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Serve {
        #[arg(long, default_value_t = 8000)]
        port: u16,
    },
    /// Print the effective configuration (signing key redacted)
    ShowConfig,
}

fn load_config(path: &str) -> Result<Config> {
    if Path::new(path).is_file() {
        return Config::from_file(path);
    }
    warn!("Config file {} not found, using defaults", path);
    let mut config = Config::default();
    config.apply_env();
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    utils::logging::init();

    let args = AppCli::parse();
    let config = load_config(&args.config)?;

    match args.command.unwrap_or(Commands::Serve { port: 8000 }) {
        Commands::Serve { port } => {
            info!(version = habit_tracker::VERSION, "Starting API server on port {port}");
            api::serve(config, port).await?;
        }
        Commands::ShowConfig => {
            let mut shown = config;
            if !shown.auth.signing_key.is_empty() {
                shown.auth.signing_key = "<redacted>".to_string();
            }
            println!("{}", serde_json::to_string_pretty(&shown)?);
        }
    }

    Ok(())
}
