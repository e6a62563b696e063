//! External agent registry
//!
//! Owns agent state and is its only mutator. Proxy callers observe state
//! through snapshots and the availability predicate; health tickers run
//! per agent while registered.

use crate::circuit;
use crate::types::*;
use agent_exchange_contracts::ExchangeError;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Health latency above which a 2xx response still counts as degraded.
const HEALTH_LATENCY_DEGRADED_MS: u64 = 5_000;

/// EWMA smoothing factor for response times.
const EWMA_ALPHA: f64 = 0.1;

struct AgentEntry {
    config: ExternalAgentConfig,
    state: AgentState,
    ticker: Option<JoinHandle<()>>,
}

pub struct ExternalAgentRegistry {
    agents: RwLock<HashMap<String, AgentEntry>>,
    http: reqwest::Client,
    circuit_reset_ms: u64,
}

impl ExternalAgentRegistry {
    pub fn new(circuit_reset_ms: u64) -> Arc<Self> {
        // Per-request total timeouts come from each agent's config; the
        // connect phase gets a uniform bound here.
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Arc::new(Self {
            agents: RwLock::new(HashMap::new()),
            http,
            circuit_reset_ms,
        })
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Register a remote agent. Fetches the `/info` capability card
    /// best-effort and starts the health ticker when an interval is
    /// configured.
    pub async fn register(
        self: &Arc<Self>,
        config: ExternalAgentConfig,
    ) -> Result<Option<InfoCard>, ExchangeError> {
        if config.base_url.trim().is_empty() {
            return Err(ExchangeError::invalid_input("base_url", "must not be empty"));
        }

        let id = config.id.clone();
        let info = self.fetch_info(&config).await;

        let ticker = if config.health_check_interval_seconds > 0 {
            Some(self.spawn_ticker(&id, config.health_check_interval_seconds))
        } else {
            None
        };

        let mut agents = self.agents.write().await;
        if let Some(previous) = agents.insert(
            id.clone(),
            AgentEntry {
                config,
                state: AgentState::default(),
                ticker,
            },
        ) {
            if let Some(old_ticker) = previous.ticker {
                old_ticker.abort();
            }
        }
        info!("Registered external agent {}", id);
        Ok(info)
    }

    async fn fetch_info(&self, config: &ExternalAgentConfig) -> Option<InfoCard> {
        let response = self
            .http
            .get(config.info_url())
            .timeout(Duration::from_millis(config.connect_timeout_ms))
            .send()
            .await;
        match response {
            Ok(response) if response.status().is_success() => {
                response.json::<InfoCard>().await.ok()
            }
            Ok(response) => {
                debug!(
                    "Info fetch for {} returned {}; continuing without card",
                    config.id,
                    response.status()
                );
                None
            }
            Err(e) => {
                debug!("Info fetch for {} failed: {}; continuing", config.id, e);
                None
            }
        }
    }

    fn spawn_ticker(self: &Arc<Self>, agent_id: &str, interval_seconds: u64) -> JoinHandle<()> {
        let registry: Weak<Self> = Arc::downgrade(self);
        let agent_id = agent_id.to_string();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_seconds));
            // The first tick fires immediately; skip it so registration
            // returns before the first probe.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(registry) = registry.upgrade() else {
                    return;
                };
                if !registry.is_registered(&agent_id).await {
                    return;
                }
                registry.health_check(&agent_id).await;
            }
        })
    }

    async fn is_registered(&self, agent_id: &str) -> bool {
        self.agents.read().await.contains_key(agent_id)
    }

    pub async fn deregister(&self, agent_id: &str) -> bool {
        let mut agents = self.agents.write().await;
        match agents.remove(agent_id) {
            Some(entry) => {
                if let Some(ticker) = entry.ticker {
                    ticker.abort();
                }
                info!("Deregistered external agent {}", agent_id);
                true
            }
            None => false,
        }
    }

    /// Run one health check and classify the result. Touches only the
    /// health status and last-check timestamp (and the circuit, which a
    /// healthy result force-closes).
    pub async fn health_check(&self, agent_id: &str) -> Option<HealthState> {
        let (health_url, connect_timeout) = {
            let agents = self.agents.read().await;
            let entry = agents.get(agent_id)?;
            (
                entry.config.health_url(),
                Duration::from_millis(entry.config.connect_timeout_ms),
            )
        };

        let started = std::time::Instant::now();
        let result = self
            .http
            .get(&health_url)
            .timeout(connect_timeout)
            .send()
            .await;
        let latency_ms = started.elapsed().as_millis() as u64;

        let health = match result {
            Ok(response) if response.status().is_success() => {
                if latency_ms <= HEALTH_LATENCY_DEGRADED_MS {
                    HealthState::Healthy
                } else {
                    HealthState::Degraded
                }
            }
            Ok(response) => {
                debug!(
                    "Health check for {} returned {} in {}ms",
                    agent_id,
                    response.status(),
                    latency_ms
                );
                HealthState::Unhealthy
            }
            Err(e) => {
                debug!("Health check for {} failed: {}", agent_id, e);
                HealthState::Unhealthy
            }
        };

        let mut agents = self.agents.write().await;
        let entry = agents.get_mut(agent_id)?;
        entry.state.health = health;
        entry.state.last_check = Some(Utc::now());
        match health {
            HealthState::Healthy => circuit::force_close(&mut entry.state),
            HealthState::Unhealthy => circuit::evaluate(
                agent_id,
                &mut entry.state,
                self.circuit_reset_ms,
                Utc::now(),
            ),
            _ => {}
        }
        Some(health)
    }

    /// The availability predicate: enabled, circuit closed (lazily
    /// resetting a past-due breaker), health not unhealthy, and a free
    /// concurrency slot.
    pub async fn available(&self, agent_id: &str) -> bool {
        let mut agents = self.agents.write().await;
        let Some(entry) = agents.get_mut(agent_id) else {
            return false;
        };
        if !entry.config.enabled {
            return false;
        }
        if !circuit::maybe_reset(agent_id, &mut entry.state, Utc::now()) {
            return false;
        }
        if entry.state.health == HealthState::Unhealthy {
            return false;
        }
        entry.state.active_requests < entry.config.max_concurrency
    }

    /// Claim a concurrency slot for an outbound call. Fails with
    /// `AgentUnavailable` when the availability predicate does not hold.
    pub async fn begin_request(&self, agent_id: &str) -> Result<ExternalAgentConfig, ExchangeError> {
        let mut agents = self.agents.write().await;
        let Some(entry) = agents.get_mut(agent_id) else {
            return Err(ExchangeError::AgentNotFound {
                agent_id: agent_id.to_string(),
            });
        };

        let reason = if !entry.config.enabled {
            Some("agent is disabled")
        } else if !circuit::maybe_reset(agent_id, &mut entry.state, Utc::now()) {
            Some("circuit breaker is open")
        } else if entry.state.health == HealthState::Unhealthy {
            Some("agent is unhealthy")
        } else if entry.state.active_requests >= entry.config.max_concurrency {
            Some("concurrency limit reached")
        } else {
            None
        };

        if let Some(reason) = reason {
            return Err(ExchangeError::AgentUnavailable {
                agent_id: agent_id.to_string(),
                reason: reason.to_string(),
            });
        }

        entry.state.active_requests += 1;
        Ok(entry.config.clone())
    }

    /// Release the concurrency slot claimed by
    /// [`ExternalAgentRegistry::begin_request`]. Called exactly once per
    /// call, after the last attempt.
    pub async fn end_request(&self, agent_id: &str) {
        let mut agents = self.agents.write().await;
        if let Some(entry) = agents.get_mut(agent_id) {
            entry.state.active_requests = entry.state.active_requests.saturating_sub(1);
        }
    }

    /// Record one successful attempt: rolling totals and EWMA update.
    pub async fn record_success(&self, agent_id: &str, duration_ms: u64) {
        let mut agents = self.agents.write().await;
        if let Some(entry) = agents.get_mut(agent_id) {
            entry.state.total_requests += 1;
            entry.state.avg_response_ms = if entry.state.total_requests == 1 {
                duration_ms as f64
            } else {
                EWMA_ALPHA * duration_ms as f64 + (1.0 - EWMA_ALPHA) * entry.state.avg_response_ms
            };
        }
    }

    /// Record one failed attempt: error totals and circuit evaluation.
    /// Every upstream error feeds the breaker, including attempts within
    /// a retry loop.
    pub async fn record_failure(&self, agent_id: &str) {
        let mut agents = self.agents.write().await;
        if let Some(entry) = agents.get_mut(agent_id) {
            entry.state.total_requests += 1;
            entry.state.total_errors += 1;
            circuit::evaluate(
                agent_id,
                &mut entry.state,
                self.circuit_reset_ms,
                Utc::now(),
            );
        }
    }

    pub async fn config_of(&self, agent_id: &str) -> Option<ExternalAgentConfig> {
        self.agents
            .read()
            .await
            .get(agent_id)
            .map(|e| e.config.clone())
    }

    pub async fn snapshot(&self, agent_id: &str) -> Option<AgentSnapshot> {
        let available = self.available(agent_id).await;
        let agents = self.agents.read().await;
        agents.get(agent_id).map(|entry| AgentSnapshot {
            config: entry.config.clone(),
            state: entry.state.clone(),
            available,
        })
    }

    pub async fn list(&self) -> Vec<AgentSnapshot> {
        let ids: Vec<String> = self.agents.read().await.keys().cloned().collect();
        let mut snapshots = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(snapshot) = self.snapshot(&id).await {
                snapshots.push(snapshot);
            }
        }
        snapshots
    }
}

impl Drop for ExternalAgentRegistry {
    fn drop(&mut self) {
        if let Ok(agents) = self.agents.try_read() {
            for entry in agents.values() {
                if let Some(ticker) = &entry.ticker {
                    ticker.abort();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(id: &str) -> ExternalAgentConfig {
        let mut config = ExternalAgentConfig::new(id, "http://127.0.0.1:9");
        // No ticker in unit tests.
        config.health_check_interval_seconds = 0;
        config
    }

    #[tokio::test]
    async fn begin_request_claims_and_releases_slots() {
        let registry = ExternalAgentRegistry::new(30_000);
        let mut cfg = config("a1");
        cfg.max_concurrency = 2;
        registry.register(cfg).await.unwrap();

        registry.begin_request("a1").await.unwrap();
        registry.begin_request("a1").await.unwrap();
        let err = registry.begin_request("a1").await.unwrap_err();
        match err {
            ExchangeError::AgentUnavailable { reason, .. } => {
                assert!(reason.contains("concurrency"))
            }
            other => panic!("unexpected {:?}", other),
        }

        registry.record_success("a1", 100).await;
        registry.end_request("a1").await;
        registry.begin_request("a1").await.unwrap();
    }

    #[tokio::test]
    async fn circuit_trips_after_five_errors_and_resets_lazily() {
        let registry = ExternalAgentRegistry::new(60_000);
        registry.register(config("a2")).await.unwrap();
        for _ in 0..5 {
            registry.begin_request("a2").await.unwrap();
            registry.record_failure("a2").await;
            registry.end_request("a2").await;
        }
        assert!(registry.snapshot("a2").await.unwrap().state.circuit_open);
        assert!(!registry.available("a2").await);
        let err = registry.begin_request("a2").await.unwrap_err();
        assert!(err.retryable());

        // A zero-length reset window closes lazily on the next check.
        let registry = ExternalAgentRegistry::new(0);
        registry.register(config("a1")).await.unwrap();
        for _ in 0..5 {
            registry.begin_request("a1").await.unwrap();
            registry.record_failure("a1").await;
            registry.end_request("a1").await;
        }
        assert!(registry.available("a1").await);
        let snapshot = registry.snapshot("a1").await.unwrap();
        assert_eq!(snapshot.state.total_requests, 0, "reset clears the window");
    }

    #[tokio::test]
    async fn disabled_agent_is_unavailable() {
        let registry = ExternalAgentRegistry::new(30_000);
        let mut cfg = config("a1");
        cfg.enabled = false;
        registry.register(cfg).await.unwrap();
        assert!(!registry.available("a1").await);
    }

    #[tokio::test]
    async fn ewma_smooths_response_times() {
        let registry = ExternalAgentRegistry::new(30_000);
        registry.register(config("a1")).await.unwrap();

        registry.begin_request("a1").await.unwrap();
        registry.record_success("a1", 100).await;
        registry.end_request("a1").await;
        let first = registry.snapshot("a1").await.unwrap().state.avg_response_ms;
        assert_eq!(first, 100.0);

        registry.begin_request("a1").await.unwrap();
        registry.record_success("a1", 200).await;
        registry.end_request("a1").await;
        let second = registry.snapshot("a1").await.unwrap().state.avg_response_ms;
        // 0.1 * 200 + 0.9 * 100
        assert!((second - 110.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn unknown_agent_not_found() {
        let registry = ExternalAgentRegistry::new(30_000);
        let err = registry.begin_request("ghost").await.unwrap_err();
        matches!(err, ExchangeError::AgentNotFound { .. });
        assert!(!registry.available("ghost").await);
    }
}
