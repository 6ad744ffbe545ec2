//! Configuration view and validation commands - `gsd config`.

use anyhow::{Context, Result};
use std::path::Path;

use gsd::config::{CONFIG_FILE, CliOverrides, Config, GsdToml, PLANNING_DIR};

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &Path, command: Option<ConfigCommands>) -> Result<()> {
    let planning_dir = project_dir.join(PLANNING_DIR);
    let config_path = planning_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("GSD Configuration");
            println!("=================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No gsd.toml found at {}", config_path.display());
                println!("Run 'gsd config init' to create one.");
            }
            println!();

            // Effective values include environment overrides.
            let config = Config::load(project_dir.to_path_buf(), &CliOverrides::default())?;
            let rendered =
                toml::to_string_pretty(&config.toml).context("Failed to render configuration")?;
            println!("{}", rendered.trim_end());
            println!();

            println!("Stage models:");
            let models = config.stage_models();
            println!("  researcher   = \"{}\"", models.researcher);
            println!("  planner      = \"{}\"", models.planner);
            println!("  plan_checker = \"{}\"", models.plan_checker);
            println!("  executor     = \"{}\"", models.executor);
            println!("  verifier     = \"{}\"", models.verifier);
            println!();

            print_warnings(&config.validate());
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No gsd.toml found. Using defaults (valid).");
                return Ok(());
            }

            let toml = GsdToml::load(&config_path)?;
            let warnings = toml.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                print_warnings(&warnings);
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("gsd.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            std::fs::create_dir_all(&planning_dir).with_context(|| {
                format!("Failed to create directory {}", planning_dir.display())
            })?;
            GsdToml::default().save(&config_path)?;

            println!("Created gsd.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [workflow] model_profile, parallelization, stage toggles and budgets");
            println!("  - [agent] max_iterations, max_tokens, api_base");
            println!("  - [models] per-stage model overrides");
            println!();
        }
    }

    Ok(())
}

fn print_warnings(warnings: &[String]) {
    if warnings.is_empty() {
        return;
    }
    println!("Configuration warnings:");
    for warning in warnings {
        println!("  - {}", warning);
    }
}
