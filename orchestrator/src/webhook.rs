//! Webhook delivery
//!
//! Fires on terminal job transitions with at-least-once semantics and no
//! retries: a failed delivery is logged and recorded in provenance by
//! the caller, but never affects job state.

use agent_exchange_jobs::Job;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Payload POSTed to the caller-supplied URL.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookPayload {
    pub event: String,
    pub job_id: String,
    pub agent_id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct WebhookDispatcher {
    http: reqwest::Client,
    timeout: Duration,
}

impl WebhookDispatcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            timeout,
        }
    }

    /// Deliver the terminal notification for a job, if it asked for one.
    /// Returns whether delivery succeeded (2xx).
    pub async fn deliver(&self, job: &Job) -> bool {
        let Some(url) = &job.webhook_url else {
            return true;
        };

        let payload = WebhookPayload {
            event: format!("job.{}", job.status.as_str()),
            job_id: job.id.to_string(),
            agent_id: job.agent_id.clone(),
            status: job.status.as_str().to_string(),
            output: job.output.clone(),
            error: job.error.as_ref().map(|e| e.message.clone()),
        };

        match self
            .http
            .post(url)
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                debug!("Webhook delivered for job {}", job.id);
                true
            }
            Ok(response) => {
                warn!(
                    "Webhook for job {} returned {}; not retrying",
                    job.id,
                    response.status()
                );
                false
            }
            Err(e) => {
                warn!("Webhook for job {} failed: {}; not retrying", job.id, e);
                false
            }
        }
    }
}

impl Default for WebhookDispatcher {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}
