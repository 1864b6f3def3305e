//! Tavily search API client

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{SearchError, SearchHit, SearchProvider};
use crate::config::SearchConfig;

const SEARCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Tavily search client
pub struct TavilyClient {
    api_key: String,
    base_url: String,
    http: Client,
}

impl TavilyClient {
    /// Create a client from configuration, reading the API key from the environment
    pub fn from_config(config: &SearchConfig) -> Result<Self, SearchError> {
        debug!(base_url = %config.base_url, "TavilyClient::from_config: called");
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| SearchError::Config(format!("{} is not set", config.api_key_env)))?;
        let http = Client::builder()
            .timeout(SEARCH_TIMEOUT)
            .build()
            .map_err(SearchError::Network)?;
        Ok(Self {
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    fn build_request_body(query: &str, max_results: usize) -> serde_json::Value {
        serde_json::json!({
            "query": query,
            "max_results": max_results,
            "search_depth": "basic",
        })
    }
}

#[async_trait]
impl SearchProvider for TavilyClient {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, SearchError> {
        debug!(%query, max_results, "TavilyClient::search: called");
        let response = self
            .http
            .post(format!("{}/search", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&Self::build_request_body(query, max_results))
            .send()
            .await?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let message = response.text().await.unwrap_or_default();
            debug!(status, "TavilyClient::search: API error");
            return Err(SearchError::Api { status, message });
        }

        let body: TavilyResponse = response.json().await?;
        debug!(hits = body.results.len(), "TavilyClient::search: done");
        Ok(body.results.into_iter().take(max_results).collect())
    }
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}
