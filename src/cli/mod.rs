//! CLI command parsing and execution.

mod auth;
mod render;
mod run;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::core::agent::LandingMode;

pub use auth::{auth_login, auth_logout};
pub use render::render_step;
pub use run::{list_runs, print_tools, run_task};

/// repo-pilot - autonomous coding agent for GitHub repositories.
#[derive(Parser)]
#[command(name = "repo-pilot")]
#[command(about = "Autonomous coding agent for GitHub repositories")]
#[command(version)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase logging verbosity.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a coding task against a repository.
    #[command(visible_alias = "r")]
    Run(RunArgs),

    /// Start the HTTP API server.
    Serve {
        /// Host to bind to (defaults to the configured host).
        #[arg(short = 'H', long)]
        host: Option<String>,

        /// Port to bind to (defaults to the configured port).
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Print the tool catalog offered to the model.
    Tools {
        /// Landing mode (pr or push).
        #[arg(short, long, default_value = "pr")]
        mode: LandingMode,

        /// Print the JSON definitions instead of a summary.
        #[arg(long)]
        json: bool,
    },

    /// Inspect recorded runs.
    Runs {
        #[command(subcommand)]
        command: RunsCommands,
    },

    /// Manage configuration.
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Manage credentials.
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Repository key from config, or `owner/repo`.
    pub repository: String,

    /// What the agent should do.
    pub prompt: String,

    /// Task title (defaults to the first line of the prompt).
    #[arg(short, long)]
    pub title: Option<String>,

    /// Extra background for the task.
    #[arg(short, long)]
    pub description: Option<String>,

    /// Landing mode (pr or push); defaults to the configured mode.
    #[arg(short, long)]
    pub mode: Option<LandingMode>,

    /// Local file to include as context (repeatable).
    #[arg(short = 'f', long = "context-file")]
    pub context_files: Vec<PathBuf>,

    /// Bound on tool-using iterations.
    #[arg(long)]
    pub max_iterations: Option<usize>,

    /// Leave unlanded staged writes alone.
    #[arg(long)]
    pub no_fallback: bool,

    /// Save the conversation log as JSON.
    #[arg(long)]
    pub transcript: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum RunsCommands {
    /// List recorded runs, newest first.
    List {
        /// Output format (table or json).
        #[arg(short, long, default_value = "table")]
        format: String,

        /// Limit number of runs shown.
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the current configuration.
    Show,

    /// Show the configuration file path.
    Path,

    /// Generate a new API token for remote access.
    GenerateToken,
}

#[derive(Subcommand)]
pub enum AuthCommands {
    /// Store a GitHub token or provider API key in the system keychain.
    Login(LoginArgs),

    /// Remove a stored credential.
    Logout(LogoutArgs),
}

#[derive(Args, Debug, Clone)]
pub struct LoginArgs {
    /// Store a GitHub token for a repository key (`default` for all).
    #[arg(long, conflicts_with = "provider")]
    pub github: Option<String>,

    /// Also register the key as this `owner/repo` in config.
    #[arg(long, requires = "github")]
    pub repository: Option<String>,

    /// Store an API key for a model provider.
    #[arg(long)]
    pub provider: Option<String>,

    /// The secret itself (prompted for when omitted).
    #[arg(long)]
    pub secret: Option<String>,
}

#[derive(Args, Debug, Clone)]
#[group(required = true, multiple = false)]
pub struct LogoutArgs {
    /// Remove the GitHub token for a repository key.
    #[arg(long)]
    pub github: Option<String>,

    /// Remove the API key for a model provider.
    #[arg(long)]
    pub provider: Option<String>,
}
