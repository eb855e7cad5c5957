//! Config command handlers

use std::path::PathBuf;

use anyhow::Result;

use wit_core::Config;

use crate::output::{Output, OutputFormat};

/// Show the effective configuration
pub fn show(config: &Config, config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "data_dir": config.data_dir,
                    "database": config.database_path(),
                    "log_level": config.log_level,
                    "closed_states": config.closed_states,
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.database_path().display());
        }
        OutputFormat::Human => {
            let effective_path = config_path
                .cloned()
                .unwrap_or_else(Config::config_file_path);
            println!("Configuration:");
            println!("  data_dir:      {}", config.data_dir.display());
            println!("  database:      {}", config.database_path().display());
            println!("  log_level:     {}", config.log_level);
            println!("  closed_states: {}", config.closed_states.join(", "));
            println!();
            println!("Config file: {}", effective_path.display());
        }
    }

    Ok(())
}
