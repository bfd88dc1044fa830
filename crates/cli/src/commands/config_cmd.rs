//! `redline config`: Configuration management commands.

use std::path::Path;

use redline_config::AppConfig;

/// Non-fatal problems worth pointing out; `validate` already rejected the
/// fatal ones.
pub fn warnings(config: &AppConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    if config.abilities.is_empty() {
        warnings.push("No abilities configured; operations will have nothing to run".to_string());
    }
    if config.adversaries.is_empty() {
        warnings.push("No adversaries configured; operations cannot be created".to_string());
    }
    for adversary in &config.adversaries {
        let missing = adversary
            .atomic_ordering
            .iter()
            .filter(|id| !config.abilities.iter().any(|a| &a.ability_id == *id))
            .count();
        if missing > 0 {
            warnings.push(format!(
                "Adversary '{}' references {missing} unknown abilit{}",
                adversary.adversary_id,
                if missing == 1 { "y" } else { "ies" }
            ));
        }
    }
    for id in config
        .agents
        .bootstrap_abilities
        .iter()
        .chain(&config.agents.deadman_abilities)
    {
        if !config.abilities.iter().any(|a| &a.ability_id == id) {
            warnings.push(format!("Agent seed ability '{id}' is not configured"));
        }
    }
    if !config.watchdog.enabled {
        warnings.push("Watchdog disabled; unreported links never time out".to_string());
    }

    warnings
}

pub async fn validate(config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Validating {}...", config_path.display());

    match AppConfig::load_path(config_path) {
        Ok(config) => {
            println!("   Config parsed successfully");

            let warnings = warnings(&config);
            if warnings.is_empty() {
                println!("   All checks passed");
            } else {
                println!();
                for w in &warnings {
                    println!("   warning: {w}");
                }
            }

            println!();
            println!("   Gateway:     {}:{}", config.gateway.host, config.gateway.port);
            println!("   Sleep:       {}-{}s", config.agents.sleep_min, config.agents.sleep_max);
            println!("   Abilities:   {}", config.abilities.len());
            println!("   Adversaries: {}", config.adversaries.len());
            println!("   Sources:     {}", config.sources.len());
        }
        Err(e) => {
            println!("   Config error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

pub async fn show(config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config =
        AppConfig::load_path(config_path).map_err(|e| format!("Failed to load config: {e}"))?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

pub async fn path(config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", config_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use redline_core::{Ability, Adversary};

    #[test]
    fn default_config_warns_about_missing_content() {
        let warnings = warnings(&AppConfig::default());
        assert!(warnings.iter().any(|w| w.contains("No abilities")));
        assert!(warnings.iter().any(|w| w.contains("No adversaries")));
    }

    #[test]
    fn dangling_references_are_reported() {
        let mut config = AppConfig::default();
        config.abilities.push(Ability {
            ability_id: "whoami".into(),
            name: "whoami".into(),
            tactic: String::new(),
            technique: String::new(),
            executors: vec![],
            delete_payload: false,
            visibility: 50,
        });
        config.adversaries.push(Adversary {
            adversary_id: "recon".into(),
            name: "Recon".into(),
            description: String::new(),
            atomic_ordering: vec!["whoami".into(), "netstat".into()],
        });
        config.agents.bootstrap_abilities.push("beacon-info".into());

        let warnings = warnings(&config);
        assert!(warnings.iter().any(|w| w.contains("'recon' references 1 unknown ability")));
        assert!(warnings.iter().any(|w| w.contains("'beacon-info'")));
    }
}
