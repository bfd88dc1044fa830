//! `redline onboard`: First-time setup.

use std::path::Path;

use redline_config::AppConfig;

pub async fn run(config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("redline: First-Time Setup");
    println!("==========================\n");

    if let Some(config_dir) = config_path.parent()
        && !config_dir.as_os_str().is_empty()
        && !config_dir.exists()
    {
        std::fs::create_dir_all(config_dir)?;
        println!("  Created config directory: {}", config_dir.display());
    }

    if config_path.exists() {
        println!("  Config already exists at: {}", config_path.display());
        println!("  Edit it manually or delete it and re-run onboard.\n");
    } else {
        std::fs::write(config_path, AppConfig::default_toml())?;
        println!("  Created config.toml at: {}", config_path.display());
    }

    let config = AppConfig::load_path(config_path)?;
    let results_dir = config.results.resolved_directory();
    if !results_dir.exists() {
        std::fs::create_dir_all(&results_dir)?;
        println!("  Created results directory: {}", results_dir.display());
    }

    println!("\nNext steps:");
    println!("   1. Add [[abilities]] and [[adversaries]] to {}", config_path.display());
    println!("   2. Run: redline serve");
    println!("   3. Point agents at POST http://<host>:{}/beacon\n", config.gateway.port);

    Ok(())
}
