//! SQLite storage layer for the agent exchange
//!
//! Owns the connection pool and schema. Domain crates receive a
//! [`DatabaseClient`] and run their own queries against `client.pool()`;
//! this crate does not know about domain types.

pub mod client;
pub mod migrations;

pub use client::{DatabaseClient, DatabaseStats};
pub use migrations::run_migrations;

use serde::{Deserialize, Serialize};

/// Connection settings for the embedded store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file path, or `:memory:`.
    pub path: String,
    pub max_connections: u32,
    pub connection_timeout_seconds: u64,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: "exchange.db".to_string(),
            max_connections: 10,
            connection_timeout_seconds: 30,
        }
    }
}

impl DatabaseSettings {
    /// In-memory settings for tests.
    pub fn in_memory() -> Self {
        Self {
            path: ":memory:".to_string(),
            ..Default::default()
        }
    }

    /// Connection URL understood by sqlx.
    pub fn url(&self) -> String {
        if self.path == ":memory:" {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite://{}?mode=rwc", self.path)
        }
    }
}
