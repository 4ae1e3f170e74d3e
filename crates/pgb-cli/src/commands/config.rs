//! Config command implementations

use std::path::Path;

use anyhow::{Context, Result};

use pgb_core::config;

use crate::output::{print_error, print_info};

/// Print the config file that would be used
pub fn config_path(explicit: Option<&Path>) -> Result<()> {
    match config::find_config_file(explicit) {
        Ok(path) => {
            println!("{}", path.display());
            Ok(())
        }
        Err(e) => {
            print_error(&e.to_string());
            Err(e.into())
        }
    }
}

/// Show the config file that would be used
pub fn config_show(explicit: Option<&Path>) -> Result<()> {
    let path = config::find_config_file(explicit)?;

    if !path.exists() {
        print_error(&format!("Config file not found: {:?}", path));
        anyhow::bail!("Config file not found: {}", path.display());
    }

    print_info(&format!("Configuration file: {:?}", path));
    println!();

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    println!("{}", content);

    Ok(())
}
