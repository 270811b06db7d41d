use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use repo_pilot::{
    Config,
    cli::{self, AuthCommands, Cli, Commands, ConfigCommands, RunsCommands},
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => cli::run_task(args).await?,

        Commands::Serve { host, port } => {
            let config = Config::load()?;
            let host = host.unwrap_or_else(|| config.api.host.clone());
            let port = port.unwrap_or(config.api.port);
            repo_pilot::api::serve(&config, &host, port).await?;
        }

        Commands::Tools { mode, json } => cli::print_tools(mode, json)?,

        Commands::Runs { command } => match command {
            RunsCommands::List { format, limit } => cli::list_runs(&format, limit)?,
        },

        Commands::Config { command } => match command {
            ConfigCommands::Show => {
                let config = Config::load()?;
                println!("{}", toml::to_string_pretty(&config)?);
            }
            ConfigCommands::Path => {
                let path = Config::config_path()?;
                println!("{}", path.display());
            }
            ConfigCommands::GenerateToken => {
                let token = repo_pilot::config::ApiConfig::generate_token();
                println!("Generated API token:\n");
                println!("  {token}\n");
                println!("Add to your config.toml:");
                println!("  [api]");
                println!("  token = \"{token}\"\n");
                println!("Or set environment variable:");
                println!("  export REPO_PILOT_API_TOKEN=\"{token}\"");
            }
        },

        Commands::Auth { command } => match command {
            AuthCommands::Login(args) => cli::auth_login(args)?,
            AuthCommands::Logout(args) => cli::auth_logout(args)?,
        },
    }

    Ok(())
}
