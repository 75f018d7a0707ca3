//! Seams to the external services the pipeline leans on: page fetching,
//! structured extraction, web search, the fact-checking LLM and referral
//! page anchor scans. Live implementations sit in the submodules; tests
//! substitute their own.

pub mod anchors;
pub mod gemini;
pub mod search;
pub mod spider;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::CollaboratorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Html,
    Markdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageAction {
    WaitMs(u64),
    ScrollDown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOptions {
    pub formats: Vec<Format>,
    pub wait_for_ms: Option<u64>,
    pub block_ads: bool,
    pub actions: Vec<PageAction>,
}

impl FetchOptions {
    /// Full render of a roundup page: both formats, lazy cards scrolled in.
    pub fn roundup() -> Self {
        FetchOptions {
            formats: vec![Format::Html, Format::Markdown],
            wait_for_ms: Some(2000),
            block_ads: true,
            actions: vec![
                PageAction::WaitMs(1500),
                PageAction::ScrollDown,
                PageAction::WaitMs(800),
            ],
        }
    }

    pub fn markdown_only() -> Self {
        FetchOptions {
            formats: vec![Format::Markdown],
            wait_for_ms: Some(2000),
            block_ads: true,
            actions: Vec::new(),
        }
    }

    pub fn html_only() -> Self {
        FetchOptions {
            formats: vec![Format::Html],
            wait_for_ms: Some(1000),
            block_ads: true,
            actions: Vec::new(),
        }
    }

    pub fn wants(&self, format: Format) -> bool {
        self.formats.contains(&format)
    }
}

#[derive(Debug, Clone, Default)]
pub struct FetchedDocument {
    pub html: Option<String>,
    pub markdown: Option<String>,
    /// Structured data, for fetchers that can extract it while rendering.
    pub structured_json: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SearchHit {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anchor {
    pub href: String,
    pub text: String,
}

/// Anchors found on a referral page. `final_url` is where the request
/// landed after redirects, when the scanner can tell.
#[derive(Debug, Clone, Default)]
pub struct PageAnchors {
    pub final_url: Option<String>,
    pub anchors: Vec<Anchor>,
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str, options: &FetchOptions)
        -> Result<FetchedDocument, CollaboratorError>;
}

#[async_trait]
pub trait StructuredExtractor: Send + Sync {
    /// Extract data shaped by `schema` from `urls`. `Ok(None)` means the
    /// service answered but had nothing.
    async fn extract(
        &self,
        urls: &[String],
        schema: &serde_json::Value,
        prompt: &str,
    ) -> Result<Option<serde_json::Value>, CollaboratorError>;
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, CollaboratorError>;
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, CollaboratorError>;
}

#[async_trait]
pub trait AnchorScanner: Send + Sync {
    async fn scan(&self, url: &str) -> Result<PageAnchors, CollaboratorError>;
}

/// Per-call time limits for collaborator calls.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub fetch: Duration,
    pub llm: Duration,
    pub search: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            fetch: Duration::from_secs(60),
            llm: Duration::from_secs(30),
            search: Duration::from_secs(20),
        }
    }
}

/// Run a collaborator call under a deadline. On expiry the call's future is
/// dropped, which cancels it.
pub async fn bounded<T, F>(limit: Duration, call: F) -> Result<T, CollaboratorError>
where
    F: Future<Output = Result<T, CollaboratorError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(CollaboratorError::Timeout(limit)),
    }
}
