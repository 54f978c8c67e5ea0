use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "tapvault",
    about = "Headless host for the Tapvault cloud save engine",
    author,
    version,
    propagate_version = true
)]
pub struct Cli {
    /// Game API base URL (e.g., http://127.0.0.1:8080).
    #[arg(long, env = "TAPVAULT_API_URL", global = true)]
    pub api_url: Option<String>,

    /// Directory holding the persisted session. Defaults to the platform data dir.
    #[arg(long, env = "TAPVAULT_DATA_DIR", global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show the current session and configuration.
    Status,
    /// Sign in. Without --code, the code is read from TAPVAULT_LOGIN_CODE.
    Login {
        /// One-time platform exchange code.
        #[arg(long)]
        code: Option<String>,
    },
    /// Forget the persisted session.
    Logout,
    /// Load the saved game and report offline earnings.
    Pull {
        /// Write the loaded snapshot here instead of printing it.
        #[arg(long)]
        out: Option<PathBuf>,
        /// Passive income per second used for offline earnings.
        #[arg(long, default_value_t = 0.0)]
        rate: f64,
    },
    /// Save a snapshot file once, after settling offline earnings.
    Push {
        #[arg(long)]
        file: PathBuf,
        /// Passive income per second used for offline earnings.
        #[arg(long, default_value_t = 0.0)]
        rate: f64,
        /// Add offline earnings to the pushed snapshot instead of discarding them.
        #[arg(long)]
        accept_offline: bool,
    },
    /// Load into a snapshot file, then keep saving it until Ctrl-C.
    Watch {
        #[arg(long)]
        file: PathBuf,
        /// Passive income per second used for offline earnings.
        #[arg(long, default_value_t = 0.0)]
        rate: f64,
        /// Credit offline earnings instead of discarding them.
        #[arg(long)]
        accept_offline: bool,
    },
}
