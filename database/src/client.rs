//! Database client with connection pooling

use crate::{migrations, DatabaseSettings};
use anyhow::{Context, Result};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{error, info};

/// Main database client wrapping a sqlx pool.
#[derive(Debug, Clone)]
pub struct DatabaseClient {
    pool: SqlitePool,
    settings: DatabaseSettings,
}

impl DatabaseClient {
    /// Connect, apply migrations, and return a ready client.
    pub async fn new(settings: DatabaseSettings) -> Result<Self> {
        info!("Opening database at {}", settings.path);

        let pool = SqlitePoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(Duration::from_secs(settings.connection_timeout_seconds))
            .connect(&settings.url())
            .await
            .context("Failed to open database")?;

        sqlx::query("SELECT 1")
            .execute(&pool)
            .await
            .context("Failed to test database connection")?;

        migrations::run_migrations(&pool)
            .await
            .context("Failed to apply migrations")?;

        info!("Database ready");
        Ok(Self { pool, settings })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn settings(&self) -> &DatabaseSettings {
        &self.settings
    }

    /// Check database health. Returns false instead of erroring so callers
    /// can fold this into aggregate health reports.
    pub async fn health_check(&self) -> bool {
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => true,
            Err(e) => {
                error!("Database health check failed: {}", e);
                false
            }
        }
    }

    /// Row counts per table plus pool gauges.
    pub async fn stats(&self) -> Result<DatabaseStats> {
        let tables = [
            "jobs",
            "provenance_records",
            "policies",
            "role_assignments",
            "version_records",
            "policy_audit",
            "marketplace_listings",
        ];

        let mut table_counts = HashMap::new();
        for table in tables {
            let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
                .fetch_one(&self.pool)
                .await
                .unwrap_or(0);
            table_counts.insert(table.to_string(), count);
        }

        Ok(DatabaseStats {
            pool_size: self.pool.size(),
            idle_connections: self.pool.num_idle(),
            table_counts,
        })
    }
}

/// Snapshot of pool and table state.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DatabaseStats {
    pub pool_size: u32,
    pub idle_connections: usize,
    pub table_counts: HashMap<String, i64>,
}
