//! `redline doctor`: Diagnose configuration problems.

use std::path::Path;

use redline_config::AppConfig;

use super::config_cmd;

pub async fn run(config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("redline doctor");
    println!("==============\n");

    let mut issues = 0;

    if !config_path.exists() {
        println!("  - No config file at {} (defaults apply); run `redline onboard`", config_path.display());
        issues += 1;
    }

    let config = match AppConfig::load_path(config_path) {
        Ok(config) => {
            println!("  ok  Config valid");
            config
        }
        Err(e) => {
            println!("  !!  Config invalid: {e}");
            println!("\n1 blocking issue found.");
            return Ok(());
        }
    };

    let results_dir = config.results.resolved_directory();
    match std::fs::metadata(&results_dir) {
        Ok(meta) if meta.is_dir() && !meta.permissions().readonly() => {
            println!("  ok  Results directory writable: {}", results_dir.display());
        }
        Ok(_) => {
            println!("  !!  Results path is not a writable directory: {}", results_dir.display());
            issues += 1;
        }
        Err(_) => {
            println!("  -   Results directory missing (created on first result): {}", results_dir.display());
        }
    }

    for warning in config_cmd::warnings(&config) {
        println!("  -   {warning}");
        issues += 1;
    }

    println!();
    if issues == 0 {
        println!("No issues found.");
    } else {
        println!("{issues} issue(s) found.");
    }

    Ok(())
}
