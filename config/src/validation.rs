//! Configuration validation
//!
//! Rejects values that would make the runtime misbehave silently. Runs
//! once at load time; components may assume a validated config.

use crate::ExchangeConfig;

/// Validate a loaded configuration. Returns the first problem found.
pub fn validate(config: &ExchangeConfig) -> Result<(), String> {
    if config.server.host.trim().is_empty() {
        return Err("server.host must not be empty".to_string());
    }
    if config.server.workers == 0 {
        return Err("server.workers must be at least 1".to_string());
    }
    if config.server.sync_timeout_ms == 0 {
        return Err("server.sync_timeout_ms must be positive".to_string());
    }

    if config.database.path.trim().is_empty() {
        return Err("database.path must not be empty".to_string());
    }
    if config.database.max_connections == 0 {
        return Err("database.max_connections must be at least 1".to_string());
    }

    if config.queue.default_max_concurrent == 0 {
        return Err("queue.default_max_concurrent must be at least 1".to_string());
    }
    if config.queue.window_seconds == 0 {
        return Err("queue.window_seconds must be positive".to_string());
    }

    if config.external.backoff_multiplier < 1.0 {
        return Err("external.backoff_multiplier must be >= 1.0".to_string());
    }
    if config.external.initial_delay_ms == 0 {
        return Err("external.initial_delay_ms must be positive".to_string());
    }
    if config.external.max_delay_ms < config.external.initial_delay_ms {
        return Err("external.max_delay_ms must be >= external.initial_delay_ms".to_string());
    }

    if config.streaming.subscriber_buffer == 0 {
        return Err("streaming.subscriber_buffer must be at least 1".to_string());
    }
    if config.streaming.bridge_chunk_chars == 0 {
        return Err("streaming.bridge_chunk_chars must be at least 1".to_string());
    }

    if config.versioning.sunset_period_days <= 0 {
        return Err("versioning.sunset_period_days must be positive".to_string());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_workers() {
        let mut config = ExchangeConfig::default();
        config.server.workers = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rejects_sub_one_backoff_multiplier() {
        let mut config = ExchangeConfig::default();
        config.external.backoff_multiplier = 0.5;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rejects_inverted_delay_bounds() {
        let mut config = ExchangeConfig::default();
        config.external.initial_delay_ms = 60_000;
        config.external.max_delay_ms = 1_000;
        assert!(validate(&config).is_err());
    }
}
