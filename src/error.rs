use std::time::Duration;

use thiserror::Error;

use crate::extract::Tier;

/// Failure of an external service (fetcher, extractor, search, LLM).
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0} is not configured")]
    MissingCredential(&'static str),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("{0}")]
    Service(String),
}

/// Extraction outcomes that stop a tier or the whole run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("fetch failed: {0}")]
    FetchFailed(#[from] CollaboratorError),

    #[error("{tier} tier produced no valid accounts")]
    ExtractionEmpty { tier: Tier },

    #[error("no accounts found after trying every extraction tier")]
    NoAccountsFound,
}
