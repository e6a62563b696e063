//! Agent catalog and discovery search
//!
//! Backs `GET /agents`: category/tier/availability filters plus a
//! weighted free-text search over name, description, category, and tags.
//! The weights are tunable constants, not configuration.

use crate::agents::AgentRegistry;
use agent_exchange_contracts::{AgentCard, AgentCategory, AgentMetadata, AgentTier};
use agent_exchange_database::DatabaseClient;
use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use tracing::warn;

/// Relative weight of a match in the agent's name.
const SCORE_NAME: f64 = 0.6;
/// Relative weight of a match in the description.
const SCORE_DESCRIPTION: f64 = 0.4;
/// Relative weight of a category-name match.
const SCORE_CATEGORY: f64 = 0.3;
/// Relative weight of a tag match.
const SCORE_TAGS: f64 = 0.2;

/// Filters for a catalog query.
#[derive(Debug, Clone, Default)]
pub struct CatalogQuery {
    pub category: Option<AgentCategory>,
    pub tier: Option<AgentTier>,
    pub available_only: bool,
    pub search: Option<String>,
}

pub struct Catalog {
    registry: Arc<AgentRegistry>,
    database: Option<DatabaseClient>,
}

impl Catalog {
    pub fn new(registry: Arc<AgentRegistry>, database: Option<DatabaseClient>) -> Self {
        Self { registry, database }
    }

    /// List agents matching the query, scored and ordered when a search
    /// term is present.
    pub async fn search(&self, query: &CatalogQuery) -> Vec<AgentCard> {
        let agents = self.registry.list().await;
        let mut scored: Vec<(f64, AgentCard)> = agents
            .iter()
            .filter(|m| query.category.map(|c| m.category == c).unwrap_or(true))
            .filter(|m| query.tier.map(|t| m.tier == t).unwrap_or(true))
            .filter(|m| !query.available_only || m.enabled)
            .filter_map(|m| {
                let card = AgentCard::from(m);
                match &query.search {
                    None => Some((0.0, card)),
                    Some(term) => {
                        let score = relevance(m, term);
                        (score > 0.0).then_some((score, card))
                    }
                }
            })
            .collect();

        if query.search.is_some() {
            scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        } else {
            scored.sort_by(|a, b| a.1.name.cmp(&b.1.name));
        }
        scored.into_iter().map(|(_, card)| card).collect()
    }

    /// Persist the marketplace listing for an agent. Best-effort; the
    /// registry stays authoritative.
    pub async fn persist_listing(&self, metadata: &AgentMetadata) {
        let Some(database) = &self.database else {
            return;
        };
        if let Err(e) = self.write_listing(database, metadata).await {
            warn!("Failed to persist listing for {}: {}", metadata.id, e);
        }
    }

    async fn write_listing(
        &self,
        database: &DatabaseClient,
        metadata: &AgentMetadata,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO marketplace_listings
             (agent_id, name, description, category, tier, tags, pricing, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(agent_id) DO UPDATE SET
               name = excluded.name,
               description = excluded.description,
               category = excluded.category,
               tier = excluded.tier,
               tags = excluded.tags,
               pricing = excluded.pricing,
               updated_at = excluded.updated_at",
        )
        .bind(&metadata.id)
        .bind(&metadata.name)
        .bind(&metadata.description)
        .bind(serde_json::to_string(&metadata.category)?)
        .bind(serde_json::to_string(&metadata.tier)?)
        .bind(serde_json::to_string(&metadata.tags)?)
        .bind(metadata.pricing.as_ref().map(serde_json::to_string).transpose()?)
        .bind(&now)
        .bind(&now)
        .execute(database.pool())
        .await?;
        Ok(())
    }
}

fn relevance(metadata: &AgentMetadata, term: &str) -> f64 {
    let term = term.to_lowercase();
    let mut score = 0.0;
    if metadata.name.to_lowercase().contains(&term) {
        score += SCORE_NAME;
    }
    if metadata.description.to_lowercase().contains(&term) {
        score += SCORE_DESCRIPTION;
    }
    if format!("{:?}", metadata.category).to_lowercase().contains(&term) {
        score += SCORE_CATEGORY;
    }
    if metadata
        .tags
        .iter()
        .any(|tag| tag.to_lowercase().contains(&term))
    {
        score += SCORE_TAGS;
    }
    score
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{AgentRuntime, EchoAgent};

    async fn registry_with_agents() -> Arc<AgentRegistry> {
        let registry = Arc::new(AgentRegistry::new());

        let mut summarizer = AgentMetadata::new("summarizer-v1", "Summarizer");
        summarizer.description = "Summarizes long documents".to_string();
        summarizer.category = AgentCategory::Summarization;
        summarizer.tier = AgentTier::Premium;
        summarizer.tags = vec!["documents".to_string(), "nlp".to_string()];

        let mut translator = AgentMetadata::new("translator-v1", "Translator");
        translator.description = "Translates text between languages".to_string();
        translator.category = AgentCategory::Translation;
        translator.tags = vec!["nlp".to_string()];
        translator.enabled = false;

        for metadata in [summarizer, translator] {
            registry
                .register(metadata, AgentRuntime::Local(Arc::new(EchoAgent)))
                .await
                .unwrap();
        }
        registry
    }

    #[tokio::test]
    async fn filters_by_category_tier_and_availability() {
        let catalog = Catalog::new(registry_with_agents().await, None);

        let premium = catalog
            .search(&CatalogQuery {
                tier: Some(AgentTier::Premium),
                ..Default::default()
            })
            .await;
        assert_eq!(premium.len(), 1);
        assert_eq!(premium[0].id, "summarizer-v1");

        let available = catalog
            .search(&CatalogQuery {
                available_only: true,
                ..Default::default()
            })
            .await;
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].id, "summarizer-v1");
    }

    #[tokio::test]
    async fn search_scores_name_above_tags() {
        let catalog = Catalog::new(registry_with_agents().await, None);

        // Both agents carry the "nlp" tag; only one matches by name.
        let results = catalog
            .search(&CatalogQuery {
                search: Some("summarizer".to_string()),
                ..Default::default()
            })
            .await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "summarizer-v1");

        let by_tag = catalog
            .search(&CatalogQuery {
                search: Some("nlp".to_string()),
                ..Default::default()
            })
            .await;
        assert_eq!(by_tag.len(), 2);
    }

    #[tokio::test]
    async fn unmatched_search_returns_empty() {
        let catalog = Catalog::new(registry_with_agents().await, None);
        let results = catalog
            .search(&CatalogQuery {
                search: Some("nonexistent".to_string()),
                ..Default::default()
            })
            .await;
        assert!(results.is_empty());
    }
}
