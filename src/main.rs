use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "prwright")]
#[command(version, about = "Turn natural-language change requests into pull requests")]
pub struct Cli {
    /// Path to a TOML configuration file (default: ./prwright.toml if present)
    #[arg(long, global = true, env = "PRWRIGHT_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP service
    Serve {
        /// Port to listen on (overrides PORT and the config file)
        #[arg(short, long)]
        port: Option<u16>,
        /// Managed checkout (overrides REPO_PATH and the config file)
        #[arg(long)]
        repo_path: Option<PathBuf>,
    },
    /// Run one change request from the terminal and print the pull request URL
    Run {
        /// The change request text
        request: String,
        /// Files to hand to the agent as reference attachments
        #[arg(short, long = "attach")]
        attachments: Vec<PathBuf>,
        /// Managed checkout (overrides REPO_PATH and the config file)
        #[arg(long)]
        repo_path: Option<PathBuf>,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand, Clone, Copy)]
pub enum ConfigCommands {
    /// Print the effective configuration with secrets redacted
    Show,
    /// Validate configuration and show any warnings
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is not an error.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Serve { port, repo_path } => {
            cmd::cmd_serve(config_path, port, repo_path).await?;
        }
        Commands::Run {
            request,
            attachments,
            repo_path,
        } => {
            cmd::cmd_run(config_path, &request, &attachments, repo_path).await?;
        }
        Commands::Config { command } => cmd::cmd_config(config_path, command)?,
    }

    Ok(())
}
