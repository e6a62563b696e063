//! Layered config loading

use crate::{validate, ExchangeConfig};
use config::{Config, Environment, File, FileFormat};
use tracing::{debug, info};

/// Configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration: {0}")]
    Read(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Load configuration from the default file location (`exchange.toml`,
/// optional) and the environment.
pub fn load() -> Result<ExchangeConfig, ConfigError> {
    load_from("exchange.toml")
}

/// Load configuration from an explicit file path (optional) and the
/// environment. Environment variables win over the file, which wins over
/// the embedded defaults.
pub fn load_from(path: &str) -> Result<ExchangeConfig, ConfigError> {
    debug!("Loading configuration from {} and environment", path);

    let defaults = toml::to_string(&ExchangeConfig::default())
        .map_err(|e| ConfigError::Invalid(format!("default serialization failed: {}", e)))?;

    let settings = Config::builder()
        .add_source(File::from_str(&defaults, FileFormat::Toml))
        .add_source(File::with_name(path).format(FileFormat::Toml).required(false))
        .add_source(Environment::with_prefix("EXCHANGE").separator("__"))
        .build()?;

    let config: ExchangeConfig = settings.try_deserialize()?;
    validate(&config).map_err(ConfigError::Invalid)?;

    info!(
        "Configuration loaded: listening on {}:{}, {} workers",
        config.server.host, config.server.port, config.server.workers
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_without_file_uses_defaults() {
        let config = load_from("does-not-exist.toml").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.queue.default_max_concurrent, 8);
    }
}
