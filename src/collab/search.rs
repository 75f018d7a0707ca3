use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use super::{SearchHit, SearchProvider};
use crate::error::CollaboratorError;

const SPIDER_SEARCH_URL: &str = "https://api.spider.cloud/search";

/// Web search through spider.cloud's search endpoint.
pub struct SpiderSearch {
    http: reqwest::Client,
    api_key: String,
}

impl SpiderSearch {
    pub fn new(api_key: &str) -> Self {
        SpiderSearch {
            http: reqwest::Client::new(),
            api_key: api_key.to_string(),
        }
    }
}

#[async_trait]
impl SearchProvider for SpiderSearch {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, CollaboratorError> {
        let body = json!({
            "search": query,
            "search_limit": limit,
            "fetch_page_content": false,
        });
        let value: Value = self
            .http
            .post(SPIDER_SEARCH_URL)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let hits = parse_hits(&value, limit);
        debug!("search {:?} returned {} hits", query, hits.len());
        Ok(hits)
    }
}

/// Accepts either a bare array of hits or one wrapped in `content`/`data`.
fn parse_hits(value: &Value, limit: usize) -> Vec<SearchHit> {
    let items = value
        .as_array()
        .or_else(|| value.get("content").and_then(Value::as_array))
        .or_else(|| value.get("data").and_then(Value::as_array));

    items
        .into_iter()
        .flatten()
        .filter_map(|item| {
            let url = item.get("url").and_then(Value::as_str)?.trim();
            if url.is_empty() {
                return None;
            }
            Some(SearchHit {
                url: url.to_string(),
                title: item.get("title").and_then(Value::as_str).map(str::to_string),
            })
        })
        .take(limit)
        .collect()
}
