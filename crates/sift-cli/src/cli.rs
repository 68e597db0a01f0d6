//! CLI argument parsing and command definitions.

use clap::{Parser, Subcommand};

// ============================================================================
// CLI argument types
// ============================================================================

/// Federated per-space search.
#[derive(Parser, Debug)]
#[command(name = "sift", author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path to configuration file.
    #[arg(short, long, env = "SIFT_CONFIG")]
    pub config: Option<String>,

    /// Enable verbose output.
    #[arg(short, long)]
    pub verbose: bool,

    /// Suppress non-essential output.
    #[arg(short, long)]
    pub quiet: bool,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Top-level commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the HTTP API.
    Serve {
        /// Port to listen on (overrides `server.port`).
        #[arg(short, long)]
        port: Option<u16>,

        /// Address to bind (overrides `server.host`).
        #[arg(long)]
        host: Option<String>,
    },

    /// Rebuild one space from storage.
    Index {
        /// Space to rebuild.
        space: String,

        /// User on whose behalf storage is listed.
        #[arg(short, long, default_value = "sift")]
        user: String,
    },

    /// Search every space a user can read.
    Search {
        /// Query string, e.g. `invoice "quarterly report" mime:application/pdf`.
        query: String,

        /// Searching user.
        #[arg(short, long)]
        user: String,

        /// Matches per page (defaults to `search.default_page_size`).
        #[arg(short = 'n', long)]
        page_size: Option<i32>,

        /// Token of the page to fetch.
        #[arg(long)]
        page_token: Option<String>,

        /// Print the raw JSON response.
        #[arg(long)]
        json: bool,
    },

    /// Show the state of local space indices.
    Status {
        /// Only this space.
        space: Option<String>,
    },

    /// Print version information.
    Version,

    /// Check system health.
    Health,

    /// Configuration operations.
    Config(ConfigCommand),
}

/// Config-specific subcommands.
#[derive(Parser, Debug)]
pub struct ConfigCommand {
    /// Config subcommand to execute.
    #[command(subcommand)]
    pub command: ConfigAction,
}

/// Available config subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show the resolved config file path.
    Path,

    /// Get a configuration value by dotted key.
    Get {
        /// Dotted key (e.g., "server.port").
        key: String,
    },

    /// Set a configuration value by dotted key.
    Set {
        /// Dotted key (e.g., "server.port").
        key: String,

        /// Value to set.
        value: String,
    },

    /// Create a default configuration file.
    Init {
        /// Output file path (defaults to XDG config path).
        #[arg(short, long)]
        file: Option<String>,

        /// Overwrite existing file.
        #[arg(long)]
        force: bool,
    },

    /// Export configuration as environment variables.
    Export {
        /// Format as Docker --env flags.
        #[arg(long)]
        docker_env: bool,
    },
}

// ============================================================================
// Tests
// ============================================================================
