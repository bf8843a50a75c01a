//! `droidloop config`: show or initialize configuration.

use std::path::Path;

use droidloop_config::AppConfig;

const REDACTED: &str = "***";

/// The effective config as TOML, with the API key masked.
pub fn render(config: &AppConfig) -> Result<String, toml::ser::Error> {
    let mut shown = config.clone();
    if shown.provider.api_key.is_some() {
        shown.provider.api_key = Some(REDACTED.into());
    }
    toml::to_string_pretty(&shown)
}

pub fn show(config_path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = super::load_config(config_path)?;
    println!("{}", render(&config)?);
    if !config.has_api_key() {
        println!("# ⚠️  No API key set (export ANTHROPIC_API_KEY or DROIDLOOP_API_KEY)");
    }
    Ok(())
}

/// Write the default config to `path`, never overwriting.
pub fn init(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() {
        println!("⚠️  {} already exists, leaving it untouched", path.display());
        return Ok(());
    }
    std::fs::write(path, AppConfig::default_toml())
        .map_err(|e| format!("Failed to write {}: {e}", path.display()))?;
    println!("✅ Wrote default config to {}", path.display());
    Ok(())
}
