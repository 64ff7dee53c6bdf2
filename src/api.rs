use std::time::{Duration, Instant};

use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use crate::config::SearchSettings;
use crate::error::FetchError;

/// Client for the archive's page-search endpoint.
pub struct SearchClient {
    http: Client,
    base_url: String,
    term: String,
    state: String,
}

impl SearchClient {
    pub fn new(settings: &SearchSettings) -> Result<SearchClient, FetchError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(SearchClient {
            http,
            base_url: settings.base_url.clone(),
            term: settings.term.clone(),
            state: settings.state.clone(),
        })
    }

    /// GET the search endpoint. `page` is sent verbatim when given.
    /// Non-2xx responses become [`FetchError::Status`].
    pub async fn search(&self, page: Option<u32>) -> Result<Value, FetchError> {
        let mut query: Vec<(&str, String)> = vec![
            ("proxtext", self.term.clone()),
            ("state", self.state.clone()),
            ("format", "json".to_string()),
        ];
        if let Some(p) = page {
            query.push(("page", p.to_string()));
        }

        let start = Instant::now();
        let response = self.http.get(&self.base_url).query(&query).send().await?;
        let status = response.status();
        let url = response.url().to_string();
        debug!(?page, status = status.as_u16(), latency_ms = start.elapsed().as_millis() as u64, "search response");

        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url,
            });
        }

        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}
