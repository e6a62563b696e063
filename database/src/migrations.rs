//! Embedded schema migrations
//!
//! Each migration is an idempotent SQL batch tracked in `schema_migrations`.
//! Additive changes only; altering persisted record shapes beyond new
//! columns is out of scope.

use anyhow::{Context, Result};
use sqlx::sqlite::SqlitePool;
use tracing::{debug, info};

/// Ordered migration set. The name is the identity; never reuse one.
const MIGRATIONS: &[(&str, &str)] = &[
    (
        "0001_jobs",
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY,
            agent_id TEXT NOT NULL,
            tenant_id TEXT NOT NULL,
            user_id TEXT,
            status TEXT NOT NULL,
            progress INTEGER NOT NULL DEFAULT 0,
            input TEXT NOT NULL,
            output TEXT,
            error_message TEXT,
            error_code TEXT,
            cost REAL,
            webhook_url TEXT,
            provider TEXT,
            estimated_duration_ms INTEGER,
            started_at TEXT,
            completed_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_jobs_tenant ON jobs (tenant_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs (status);
        "#,
    ),
    (
        "0002_provenance",
        r#"
        CREATE TABLE IF NOT EXISTS provenance_records (
            id TEXT PRIMARY KEY,
            trace_id TEXT NOT NULL,
            run_id TEXT NOT NULL,
            step_id TEXT,
            tenant_id TEXT NOT NULL,
            event_type TEXT NOT NULL,
            llm_meta TEXT,
            tool_meta TEXT,
            error_message TEXT,
            error_code TEXT,
            recorded_at TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_provenance_trace ON provenance_records (trace_id, recorded_at);
        CREATE INDEX IF NOT EXISTS idx_provenance_run ON provenance_records (run_id, recorded_at);
        "#,
    ),
    (
        "0003_policies",
        r#"
        CREATE TABLE IF NOT EXISTS policies (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            tenant_id TEXT,
            priority INTEGER NOT NULL,
            effect TEXT NOT NULL,
            enabled INTEGER NOT NULL DEFAULT 1,
            document TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_policies_tenant ON policies (tenant_id, priority);

        CREATE TABLE IF NOT EXISTS role_assignments (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            role TEXT NOT NULL,
            expires_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_roles_subject ON role_assignments (tenant_id, subject_id);

        CREATE TABLE IF NOT EXISTS policy_audit (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            subject_id TEXT,
            resource TEXT NOT NULL,
            action TEXT NOT NULL,
            decision TEXT NOT NULL,
            matched_policies TEXT NOT NULL,
            elapsed_us INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_policy_audit_tenant ON policy_audit (tenant_id, created_at);
        "#,
    ),
    (
        "0004_versions",
        r#"
        CREATE TABLE IF NOT EXISTS version_records (
            id TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            version TEXT NOT NULL,
            status TEXT NOT NULL,
            deprecated_at TEXT,
            reason TEXT,
            replacement_id TEXT,
            sunset_date TEXT,
            min_compatible_version TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        "#,
    ),
    (
        "0005_marketplace",
        r#"
        CREATE TABLE IF NOT EXISTS marketplace_listings (
            agent_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT NOT NULL,
            category TEXT NOT NULL,
            tier TEXT NOT NULL,
            tags TEXT NOT NULL,
            pricing TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        "#,
    ),
];

/// Apply all pending migrations.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            name TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await
    .context("Failed to create schema_migrations table")?;

    for (name, sql) in MIGRATIONS {
        let applied: Option<String> =
            sqlx::query_scalar("SELECT name FROM schema_migrations WHERE name = ?1")
                .bind(name)
                .fetch_optional(pool)
                .await?;
        if applied.is_some() {
            debug!("Migration {} already applied", name);
            continue;
        }

        // SQLite executes one statement per call; split the batch.
        for statement in sql.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            sqlx::query(statement)
                .execute(pool)
                .await
                .with_context(|| format!("Migration {} failed", name))?;
        }

        sqlx::query("INSERT INTO schema_migrations (name, applied_at) VALUES (?1, ?2)")
            .bind(name)
            .bind(chrono::Utc::now().to_rfc3339())
            .execute(pool)
            .await?;
        info!("Applied migration {}", name);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let pool = SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap();

        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_migrations")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count as usize, MIGRATIONS.len());
    }
}
