//! External metadata providers
//!
//! A `MetadataProvider` searches one external catalog and fetches details for
//! a hit. `ProviderManager` routes a media type to its providers, queries them
//! concurrently and picks the most relevant candidate.

pub mod tmdb;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::core::error::{CatalogError, Result};
use crate::db::models::ExternalMetadata;

pub use tmdb::TmdbProvider;

/// One search hit from a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchCandidate {
    pub external_id: String,
    pub title: String,
    pub year: Option<i32>,
    pub rating: Option<f64>,
    pub description: Option<String>,
    pub cover_url: Option<String>,
    /// Provider's own confidence in the hit
    pub relevance: f64,
}

/// Winning candidate of a cross-provider search
#[derive(Debug, Clone, PartialEq)]
pub struct BestMatch {
    pub provider: String,
    pub candidate: SearchCandidate,
    pub score: f64,
}

#[async_trait]
pub trait MetadataProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Providers without credentials stay registered but are skipped
    fn is_enabled(&self) -> bool;

    async fn search(&self, query: &str, media_type: &str, year: Option<i32>)
        -> Result<Vec<SearchCandidate>>;

    /// Full record for a hit. `media_item_id` is left at 0 for the caller to set.
    async fn details(&self, external_id: &str, media_type: &str) -> Result<ExternalMetadata>;
}

/// What the analysis pipeline needs from the provider layer
#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn best_match(&self, query: &str, media_type: &str, year: Option<i32>)
        -> Result<Option<BestMatch>>;

    async fn details(&self, provider: &str, external_id: &str, media_type: &str)
        -> Result<ExternalMetadata>;
}

/// Search ranking: provider relevance, +0.3 for an exact (case-insensitive)
/// title or +0.2 when the title contains the query, +0.2 for a matching year,
/// +0.1 when the hit is rated.
pub fn relevance_score(candidate: &SearchCandidate, query: &str, year: Option<i32>) -> f64 {
    let mut score = candidate.relevance;

    let title = candidate.title.to_lowercase();
    let query = query.to_lowercase();
    if title == query {
        score += 0.3;
    } else if title.contains(&query) {
        score += 0.2;
    }

    if year.is_some() && candidate.year == year {
        score += 0.2;
    }

    if candidate.rating.map_or(false, |r| r > 0.0) {
        score += 0.1;
    }

    score
}

/// Registry of providers keyed by name, with per media type routing
#[derive(Default)]
pub struct ProviderManager {
    providers: HashMap<String, Arc<dyn MetadataProvider>>,
    routes: HashMap<String, Vec<String>>,
}

impl ProviderManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider and route the given media types to it.
    /// Routes keep registration order, which also breaks score ties.
    pub fn with_provider(
        mut self,
        provider: Arc<dyn MetadataProvider>,
        media_types: &[&str],
    ) -> Self {
        let name = provider.name().to_string();
        for media_type in media_types {
            let route = self.routes.entry(media_type.to_string()).or_default();
            if !route.contains(&name) {
                route.push(name.clone());
            }
        }
        info!(provider = %name, enabled = provider.is_enabled(), "Metadata provider registered");
        self.providers.insert(name, provider);
        self
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    /// Enabled providers routed for a media type
    fn providers_for(&self, media_type: &str) -> Vec<Arc<dyn MetadataProvider>> {
        self.routes
            .get(media_type)
            .into_iter()
            .flatten()
            .filter_map(|name| self.providers.get(name))
            .filter(|p| p.is_enabled())
            .cloned()
            .collect()
    }

    /// Search every relevant provider concurrently. A failing provider is
    /// logged and skipped; the call fails only if every provider failed.
    pub async fn search_all(
        &self,
        query: &str,
        media_type: &str,
        year: Option<i32>,
    ) -> Result<Vec<(String, Vec<SearchCandidate>)>> {
        let providers = self.providers_for(media_type);
        if providers.is_empty() {
            debug!(media_type, "No enabled metadata provider for media type");
            return Ok(Vec::new());
        }

        let searches = providers.iter().map(|provider| async move {
            (provider.name().to_string(), provider.search(query, media_type, year).await)
        });

        let mut results = Vec::new();
        let mut failures = Vec::new();
        for (name, outcome) in join_all(searches).await {
            match outcome {
                Ok(candidates) => results.push((name, candidates)),
                Err(e) => {
                    warn!(provider = %name, query, error = %e, "Provider search failed");
                    failures.push(format!("{}: {}", name, e));
                }
            }
        }

        if results.is_empty() && !failures.is_empty() {
            return Err(CatalogError::ProviderError(format!(
                "all providers failed: {}",
                failures.join("; ")
            )));
        }
        Ok(results)
    }
}

#[async_trait]
impl MetadataSource for ProviderManager {
    async fn best_match(
        &self,
        query: &str,
        media_type: &str,
        year: Option<i32>,
    ) -> Result<Option<BestMatch>> {
        let mut best: Option<BestMatch> = None;

        for (provider, candidates) in self.search_all(query, media_type, year).await? {
            for candidate in candidates {
                let score = relevance_score(&candidate, query, year);
                if best.as_ref().map_or(true, |b| score > b.score) {
                    best = Some(BestMatch {
                        provider: provider.clone(),
                        candidate,
                        score,
                    });
                }
            }
        }

        if let Some(found) = &best {
            debug!(
                provider = %found.provider,
                external_id = %found.candidate.external_id,
                score = found.score,
                "Best metadata match"
            );
        }
        Ok(best)
    }

    async fn details(
        &self,
        provider: &str,
        external_id: &str,
        media_type: &str,
    ) -> Result<ExternalMetadata> {
        let handle = self
            .providers
            .get(provider)
            .ok_or_else(|| CatalogError::NotFound(format!("provider {}", provider)))?;
        if !handle.is_enabled() {
            return Err(CatalogError::ProviderError(format!("provider disabled: {}", provider)));
        }
        handle.details(external_id, media_type).await
    }
}
