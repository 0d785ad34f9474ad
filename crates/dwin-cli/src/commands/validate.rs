//! Validate command implementation.

use anyhow::Result;
use dwin_core::Config;
use std::path::Path;

/// Load a configuration file, validate it and print the effective window.
pub fn run(path: &Path) -> Result<()> {
    let config = Config::from_file(path)?;
    let window = &config.window;

    println!("Configuration is valid: {}", path.display());
    println!("  size:          {}", window.size);
    println!("  duration:      {:?}", window.duration());
    println!("  pool size:     {}", window.pool_size);
    println!("  dispatch mode: {:?}", window.dispatch_mode);
    Ok(())
}
