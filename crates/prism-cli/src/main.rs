use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod config;

use crate::commands::CommandContext;
use crate::config::PrismConfig;
use anyhow::Result;

/// Module loading and page navigation for composite applications
#[derive(Parser, Debug)]
#[command(name = "prism", about = "Prism module catalog and navigation tools")]
pub struct Cli {
    /// Path to configuration file (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace); overrides $PRISM_LOG
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// Subcommands operating on a module catalog
#[derive(Subcommand, Debug)]
#[command(about = "Validate, order and run module catalogs")]
pub enum ModuleCommands {
    /// Load and validate a catalog
    Validate {
        /// Manifest file (TOML or JSON); defaults to the configured catalog
        manifest: Option<PathBuf>,
    },
    /// Print modules in dependency order
    Order {
        /// Manifest file (TOML or JSON); defaults to the configured catalog
        manifest: Option<PathBuf>,
        /// Only order these modules and their dependencies
        #[arg(long = "module")]
        modules: Vec<String>,
    },
    /// Load and initialize the catalog's modules
    Run {
        /// Manifest file (TOML or JSON); defaults to the configured catalog
        manifest: Option<PathBuf>,
        /// On-demand modules to load once startup is done
        #[arg(long = "load")]
        load: Vec<String>,
    },
}

/// Top-level commands for prism
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Work with module catalogs
    Modules {
        #[command(subcommand)]
        command: ModuleCommands,
    },

    /// Apply navigations against pages defined in a TOML file
    Navigate {
        /// Page definitions (`[[pages]]`); defaults to the configured file
        #[arg(long)]
        pages: Option<PathBuf>,
        /// Uris to navigate to in order; `:back` goes back, `:root` goes back to the root
        #[arg(required = true)]
        uris: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = PrismConfig::resolve_config(cli.config)?;
    config::init_tracing(&config.log_filter(cli.verbose))?;

    let ctx = CommandContext::new(config);

    match cli.command {
        Commands::Modules { command } => {
            commands::modules::handle_module_command(&ctx, command).await?;
        }
        Commands::Navigate { pages, uris } => {
            commands::navigate::run_navigation(&ctx, pages.as_deref(), &uris).await?;
        }
    }

    Ok(())
}
