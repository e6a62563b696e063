//! Agent Exchange server binary

use agent_exchange_api_server::{router, AppState};
use agent_exchange_config::ExchangeConfig;
use agent_exchange_database::{DatabaseClient, DatabaseSettings};
use agent_exchange_external::{ExternalAgentProxy, ExternalAgentRegistry};
use agent_exchange_jobs::JobStore;
use agent_exchange_jobs::SqliteJobRepository;
use agent_exchange_orchestrator::agents::{AgentRegistry, EchoAgent, UppercaseAgent};
use agent_exchange_orchestrator::{Catalog, Orchestrator, WebhookDispatcher, WorkerPool};
use agent_exchange_orchestrator::service::Shared;
use agent_exchange_contracts::AgentMetadata;
use agent_exchange_policy::{PolicyCache, PolicyEngine, SqliteAuditSink, SqlitePolicyStore};
use agent_exchange_provenance::{ProvenanceLog, SqliteProvenanceStore};
use agent_exchange_queue::{FairQueue, TenantQuotas};
use agent_exchange_streaming::StreamHub;
use agent_exchange_versioning::{SqliteVersionStore, VersionRegistry};
use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "agent-exchange", about = "Multi-tenant agent execution marketplace")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "exchange.toml")]
    config: String,

    /// Override the configured listen port.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = agent_exchange_config::load_from(&args.config)
        .context("Failed to load configuration")?;
    if let Some(port) = args.port {
        config.server.port = port;
    }

    let state = build_state(&config).await?;
    let address = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {}", address))?;
    info!("Agent exchange listening on {}", address);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await
        .context("Server error")?;
    Ok(())
}

async fn build_state(config: &ExchangeConfig) -> Result<AppState> {
    let database = DatabaseClient::new(DatabaseSettings {
        path: config.database.path.clone(),
        max_connections: config.database.max_connections,
        connection_timeout_seconds: config.database.connection_timeout_seconds,
    })
    .await?;

    let agents = Arc::new(AgentRegistry::new());
    let external = ExternalAgentRegistry::new(config.external.circuit_reset_ms);
    let proxy = Arc::new(ExternalAgentProxy::new(
        external.clone(),
        config.streaming.bridge_chunk_chars,
    ));

    let policy_store = Arc::new(SqlitePolicyStore::new(database.clone()));
    let policy_cache = Arc::new(PolicyCache::new(
        policy_store,
        Duration::from_secs(config.policy.cache_refresh_seconds),
    ));
    let policy = Arc::new(PolicyEngine::new(
        policy_cache.clone(),
        Arc::new(SqliteAuditSink::new(database.clone())),
    ));

    let versions = Arc::new(VersionRegistry::new(
        Arc::new(SqliteVersionStore::new(database.clone())),
        config.versioning.sunset_period_days,
    ));
    versions.load().await?;

    let queue = Arc::new(FairQueue::new(TenantQuotas {
        max_concurrent: config.queue.default_max_concurrent,
        max_pending: config.queue.default_max_pending,
        max_per_window: config.queue.default_max_per_window,
        window_seconds: config.queue.window_seconds,
    }));

    let jobs = Arc::new(JobStore::new(Some(Arc::new(SqliteJobRepository::new(
        database.clone(),
    )))));
    jobs.load().await?;

    let hub = Arc::new(StreamHub::new(config.streaming.subscriber_buffer));
    let provenance = ProvenanceLog::new(Arc::new(SqliteProvenanceStore::new(database.clone())));

    let shared = Arc::new(Shared {
        agents: agents.clone(),
        external,
        proxy,
        policy,
        versions,
        queue,
        jobs,
        hub,
        provenance,
        webhooks: Arc::new(WebhookDispatcher::default()),
    });

    let catalog = Catalog::new(agents, Some(database));
    let orchestrator = Arc::new(Orchestrator::new(
        shared.clone(),
        catalog,
        Duration::from_millis(config.server.sync_timeout_ms),
    ));

    // Built-in interface fixtures so a fresh install can execute
    // something.
    orchestrator
        .register_local_agent(AgentMetadata::new("echo", "Echo"), Arc::new(EchoAgent))
        .await
        .ok();
    let mut upper = AgentMetadata::new("uppercase", "Uppercase");
    upper.input_schema = serde_json::json!({
        "type": "object",
        "properties": { "text": { "type": "string" } },
        "required": ["text"]
    });
    orchestrator
        .register_local_agent(upper, Arc::new(UppercaseAgent))
        .await
        .ok();

    WorkerPool::spawn(shared, config.server.workers);
    orchestrator.spawn_maintenance(Duration::from_secs(
        config.streaming.idle_disconnect_seconds * 10,
    ));

    Ok(AppState::new(orchestrator, policy_cache))
}
