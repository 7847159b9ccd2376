use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ctk::cmd::{self, OrchestrateArgs};
use ctk::policy::RunMode;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ctk")]
#[command(version, about = "Policy-enforcing pipeline orchestrator")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Path to the run config. Defaults to ctk.toml, then .ctk/config.toml
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the configured pipeline
    Orchestrate {
        /// Project (tenant) name; overrides detection
        #[arg(long)]
        project: Option<String>,

        /// Execution topology
        #[arg(long, value_parser = ["sequential", "hybrid"])]
        mode: Option<String>,

        /// Resolve and print the plan without executing anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Validate the run config
    Validate,
    /// Print the role resolution table for the configured plan
    Registry,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    let exit_code = match &cli.command {
        Commands::Orchestrate {
            project,
            mode,
            dry_run,
        } => {
            // The flag is pre-validated by clap; only listed values reach here.
            let mode = mode.as_deref().and_then(|m| m.parse::<RunMode>().ok());
            cmd::orchestrate(OrchestrateArgs {
                project_dir,
                config: cli.config.clone(),
                project: project.clone(),
                mode,
                dry_run: *dry_run,
            })
            .await?
        }
        Commands::Validate => cmd::validate(&project_dir, cli.config.as_deref())?,
        Commands::Registry => cmd::registry(&project_dir, cli.config.as_deref())?,
    };

    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;
    let filter = if verbose {
        EnvFilter::new("ctk=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ctk=warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
