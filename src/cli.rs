use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "proxyme",
    version,
    about = "Supervisor for the local ProxyMe LLM proxy"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Use a specific config file
    #[arg(short = 'f', long = "file", global = true, env = "PROXYME_CONFIG")]
    pub config_file: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Launch the proxy and supervise it in the foreground
    Start,
    /// Stop a running proxy
    Stop,
    /// Restart a running proxy (stop, cleanup, regenerate config, start)
    Restart,
    /// Show proxy status
    Status,
    /// Install the proxy's dependencies
    Install {
        /// Remove installed dependencies and install again
        #[arg(long)]
        force: bool,
    },
    /// Check the interpreter, dependencies and port
    Doctor,
    /// Regenerate models.json and create .env if missing
    Generate,
    /// Validate the configuration file
    Validate,
    /// Show the proxy log
    Logs {
        /// Number of lines to show
        #[arg(short = 'n', long, default_value_t = 50)]
        lines: usize,
    },
    /// Generate a starter proxyme.toml
    Init,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}
