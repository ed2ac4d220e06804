use anyhow::{Context, Result};
use dirs::home_dir;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::auth::AccessToken;

/// Configuration data stored in ~/.netatmo.yml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub token: AccessToken,
}

/// Get the path to the configuration file (~/.netatmo.yml)
pub fn get_config_path() -> Result<PathBuf> {
    let home = home_dir().context("Failed to determine home directory")?;
    Ok(home.join(".netatmo.yml"))
}

/// Load configuration from ~/.netatmo.yml
pub fn load_config() -> Result<Config> {
    let config_path = get_config_path()?;

    if !config_path.exists() {
        anyhow::bail!("Not logged in. Run 'netatmo login' first.");
    }

    let content = fs::read_to_string(&config_path)
        .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

    let config: Config = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

    debug!("Loaded configuration for user: {}", config.username);
    Ok(config)
}

/// Save configuration to ~/.netatmo.yml
pub fn save_config(config: &Config) -> Result<()> {
    let config_path = get_config_path()?;

    let content = serde_yaml::to_string(config).context("Failed to serialize configuration")?;

    fs::write(&config_path, content)
        .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

    debug!("Saved configuration for user: {}", config.username);
    Ok(())
}

/// Clear the configuration file (logout)
pub fn clear_config() -> Result<()> {
    let config_path = get_config_path()?;

    if config_path.exists() {
        fs::remove_file(&config_path)
            .with_context(|| format!("Failed to remove config file: {}", config_path.display()))?;
        debug!("Configuration file cleared");
    } else {
        warn!("Configuration file does not exist, nothing to clear");
    }

    Ok(())
}
