//! Configuration view and validation commands: `prwright config`.

use std::path::Path;

use anyhow::Result;

use prwright::config::{DEFAULT_CONFIG_FILE, ServiceConfig};

use super::super::ConfigCommands;

pub fn cmd_config(config_path: Option<&Path>, command: ConfigCommands) -> Result<()> {
    let config = ServiceConfig::resolve(config_path)?;
    let source = match config_path {
        Some(path) => path.display().to_string(),
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => DEFAULT_CONFIG_FILE.to_string(),
        None => "defaults + environment".to_string(),
    };

    match command {
        ConfigCommands::Show => {
            println!("# prwright configuration ({})", source);
            println!();
            print!("{}", config.redacted().to_toml()?);
        }
        ConfigCommands::Validate => {
            println!("Validating configuration ({})...", source);
            println!();

            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
        }
    }
    Ok(())
}
