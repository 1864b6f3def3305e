//! Web search collaborator
//!
//! Research roles can be grounded in live search results. The provider is an
//! opaque capability: given a query it returns a handful of hits.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod tavily;

pub use tavily::TavilyClient;

/// Errors from a search provider
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Search API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Search network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Search configuration error: {0}")]
    Config(String),
}

/// One search result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub content: String,
}

/// A web search capability
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, SearchError>;
}

/// Format hits as a numbered brief for inclusion in a prompt
pub fn format_brief(hits: &[SearchHit]) -> String {
    hits.iter()
        .enumerate()
        .map(|(i, hit)| format!("{}. {} ({})\n   {}", i + 1, hit.title, hit.url, hit.content.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}
