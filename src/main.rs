use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use gsd::config::ModelProfile;

mod cmd;

#[derive(Parser)]
#[command(name = "gsd")]
#[command(version, about = "Autonomous phase orchestrator")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print orchestrator events and logs as JSON lines
    #[arg(long, global = true)]
    pub json: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Research, plan, execute and verify one phase
    Run {
        /// Phase number (e.g. "03")
        #[arg(short, long)]
        phase: String,

        /// Phase name, used for the phase directory slug
        #[arg(short, long)]
        name: String,

        /// What the phase must achieve
        #[arg(short, long)]
        goal: String,

        /// Model profile for every stage
        #[arg(long, value_enum)]
        profile: Option<ModelProfile>,

        /// Run plans one at a time
        #[arg(long)]
        sequential: bool,

        /// Maximum concurrent plans within a wave
        #[arg(long)]
        max_parallel: Option<usize>,

        /// Tool-use iteration budget per stage
        #[arg(long)]
        max_iterations: Option<u32>,

        /// Skip the research stage
        #[arg(long)]
        skip_research: bool,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default gsd.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    dotenvy::from_path(project_dir.join(".env")).ok();

    let log_dir = matches!(cli.command, Commands::Run { .. })
        .then(|| gsd::config::Config::with_defaults(project_dir.clone()).log_dir());
    let _log_guard = gsd::logging::init(&gsd::logging::LogOptions {
        verbose: cli.verbose,
        json: cli.json,
        log_dir,
    })?;

    match &cli.command {
        Commands::Run {
            phase,
            name,
            goal,
            profile,
            sequential,
            max_parallel,
            max_iterations,
            skip_research,
        } => {
            let overrides = gsd::config::CliOverrides {
                model_profile: *profile,
                max_iterations: *max_iterations,
                max_parallel: *max_parallel,
                sequential: *sequential,
                skip_research: *skip_research,
            };
            let phase = gsd::phase::PhaseInfo::new(phase, name, goal);
            cmd::cmd_run(&cli, project_dir, phase, &overrides).await?;
        }
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
    }

    Ok(())
}
