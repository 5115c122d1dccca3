//! Sketchboard Server
//!
//! Run with: cargo run -- [--config path] [--host H] [--port P] [--profile full|minimal]
//!
//! Configuration is read from `--config`, or else from the first default
//! location that exists (see [`Config::default_paths`]), then overridden by
//! `SKETCHBOARD_*` environment variables and finally by CLI flags.
//! `RUST_LOG` takes precedence over the configured log level.

use clap::{Parser, Subcommand};
use sketchboard::{generate_default_config, serve, AppState, Config, LoggingConfig, Profile};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "sketchboard", version, about = "Real-time whiteboard relay server")]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind to
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Relay profile: full or minimal
    #[arg(long)]
    profile: Option<Profile>,

    /// Directory to serve static files from
    #[arg(long)]
    static_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a default config file to stdout
    PrintConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Some(Commands::PrintConfig) = cli.command {
        print!("{}", generate_default_config());
        return Ok(());
    }

    let mut config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };

    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(profile) = cli.profile {
        config.session.profile = profile;
    }
    if let Some(dir) = cli.static_dir {
        config.server.static_dir = dir;
    }

    init_logging(&config.logging);

    tracing::info!("Starting Sketchboard v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Relay profile: {}", config.session.profile);
    tracing::info!("Static directory: {:?}", config.server.static_dir);
    match config.session.history_limit {
        Some(limit) => tracing::info!("History capped at {} messages", limit),
        None => tracing::info!("History unbounded"),
    }

    let state = AppState::from_config(config.server.clone(), &config.session);
    serve(state, &config.server).await?;

    tracing::info!("Sketchboard stopped");
    Ok(())
}

/// Initialize tracing from the logging section, letting `RUST_LOG` win
fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("sketchboard={},tower_http=info", logging.level))
    });

    let json = logging.is_json();
    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .init();
}
