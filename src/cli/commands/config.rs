//! Config Command
//!
//! Manage chaplin configuration.
//!
//! Usage:
//!   chaplin config show [-g] [-f json]
//!   chaplin config path
//!   chaplin config init [-g] [--force]

use crate::config::ConfigLoader;
use crate::types::Result;

/// Show configuration
pub fn show(global: bool, format: &str) -> Result<()> {
    let as_json = format == "json";

    if global {
        if let Some(global_path) = ConfigLoader::global_config_path() {
            if global_path.exists() {
                let content = std::fs::read_to_string(&global_path)?;
                println!("# Global Config: {}\n", global_path.display());
                println!("{}", content);
            } else {
                println!("No global config found.");
                println!("Run 'chaplin config init --global' to create one.");
            }
        } else {
            println!("Cannot determine global config directory.");
        }
    } else {
        // Merged effective config
        ConfigLoader::show_config(as_json)?;
    }
    Ok(())
}

/// Show configuration paths
pub fn path() -> Result<()> {
    ConfigLoader::show_path();
    Ok(())
}

/// Initialize global configuration
pub fn init_global(force: bool) -> Result<()> {
    let dir = ConfigLoader::init_global(force)?;
    println!("✓ Initialized global configuration");
    println!("  Directory: {}", dir.display());
    if let Some(config_path) = ConfigLoader::global_config_path() {
        println!("  Config:    {}", config_path.display());
    }
    Ok(())
}

/// Initialize project configuration
pub fn init_project() -> Result<()> {
    let dir = ConfigLoader::init_project()?;
    println!("✓ Initialized project configuration");
    println!("  Directory: {}", dir.display());
    println!(
        "  Config:    {}",
        ConfigLoader::project_config_path().display()
    );
    Ok(())
}
