//! `redline serve`: Start the C2 server.

use std::path::Path;

use redline_config::AppConfig;

pub async fn run(
    config_path: &Path,
    host: Option<String>,
    port: Option<u16>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config =
        AppConfig::load_path(config_path).map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(host) = host {
        config.gateway.host = host;
    }
    if let Some(port) = port {
        config.gateway.port = port;
    }

    println!("redline server");
    println!("   Listening:   {}:{}", config.gateway.host, config.gateway.port);
    println!("   Beacon:      POST /beacon ({})", config.contacts.http);
    println!("   Results:     {}", config.results.resolved_directory().display());
    println!("   Abilities:   {}", config.abilities.len());
    println!("   Adversaries: {}", config.adversaries.len());

    if config.adversaries.is_empty() {
        tracing::warn!("No adversaries configured, operations cannot be created");
    }
    tracing::debug!(config = %config_path.display(), "Configuration loaded");

    redline_gateway::start(config).await?;

    Ok(())
}
