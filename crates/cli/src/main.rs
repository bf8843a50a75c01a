//! droidloop CLI, the main entry point.
//!
//! Commands:
//! - `play`       Run an automation session against a device
//! - `devices`    List attached devices
//! - `screenshot` Capture one frame and have the model describe it
//! - `tap`        Send a single tap, for calibrating coordinates
//! - `config`     Show the effective config or write a default one

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod logging;

#[derive(Parser)]
#[command(
    name = "droidloop",
    about = "droidloop: let a language model play Android games over adb",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: ./droidloop.toml, then ~/.droidloop/config.toml)
    #[arg(short, long, global = true, env = "DROIDLOOP_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a game-playing session
    Play(commands::play::PlayArgs),

    /// List attached devices
    Devices,

    /// Capture a single screenshot and describe it
    Screenshot(commands::screenshot::ScreenshotArgs),

    /// Tap the screen at pixel coordinates
    Tap {
        /// Horizontal pixel coordinate
        x: u32,
        /// Vertical pixel coordinate
        y: u32,
        /// adb serial of the device to use
        #[arg(short, long)]
        device: Option<String>,
    },

    /// Show the effective configuration
    Config {
        /// Write a default config file to ./droidloop.toml
        #[arg(long)]
        init: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config_path = cli.config.as_deref();

    // Initialize tracing; `play` also keeps a debug log next to its screenshots
    let session_dir = match &cli.command {
        Commands::Play(args) => commands::play::session_log_dir(config_path, args),
        _ => None,
    };
    let _log_guard = logging::init(cli.verbose, session_dir.as_deref())?;

    match cli.command {
        Commands::Play(args) => commands::play::run(config_path, args).await?,
        Commands::Devices => commands::devices::run(config_path).await?,
        Commands::Screenshot(args) => commands::screenshot::run(config_path, args).await?,
        Commands::Tap { x, y, device } => commands::tap::run(config_path, x, y, device).await?,
        Commands::Config { init } => {
            if init {
                commands::config_cmd::init(std::path::Path::new(droidloop_config::AppConfig::LOCAL_FILE))?
            } else {
                commands::config_cmd::show(config_path)?
            }
        }
    }

    Ok(())
}
