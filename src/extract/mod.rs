//! Account extraction from the roundup page.
//!
//! Three tiers are tried in order: schema-guided extraction through the
//! structured-extraction service, a heuristic HTML card parse, then a
//! heuristic markdown parse. The HTML and markdown tiers share one fetch.

pub mod html;
pub mod markdown;
pub mod schema;

use std::fmt;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{debug, info, warn};

use crate::collab::{bounded, FetchOptions, FetchedDocument, Fetcher, StructuredExtractor, Timeouts};
use crate::error::{CollaboratorError, PipelineError};
use crate::normalize::NormalizationRules;
use crate::record::AccountRecord;

/// A percentage with up to two integer and three fractional digits,
/// optionally followed by "APY".
pub static APY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b\d{1,2}(?:\.\d{1,3})?%(?:\s*APY\b)?").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Schema,
    Html,
    Markdown,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Tier::Schema => "schema",
            Tier::Html => "html",
            Tier::Markdown => "markdown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    TrySchema,
    TryHtml,
    TryMarkdown,
    Failed,
}

impl Stage {
    /// The tier this stage runs and the stage to fall back to.
    fn plan(self) -> Option<(Tier, Stage)> {
        match self {
            Stage::TrySchema => Some((Tier::Schema, Stage::TryHtml)),
            Stage::TryHtml => Some((Tier::Html, Stage::TryMarkdown)),
            Stage::TryMarkdown => Some((Tier::Markdown, Stage::Failed)),
            Stage::Failed => None,
        }
    }
}

/// Records from the first tier that produced any.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub tier: Tier,
    pub records: Vec<AccountRecord>,
}

/// Rendered page cached between the HTML and markdown tiers. A failed
/// fetch is remembered as its message so it is not repeated.
type PageCache = Option<Result<FetchedDocument, String>>;

pub struct ExtractionPipeline {
    fetcher: Arc<dyn Fetcher>,
    extractor: Option<Arc<dyn StructuredExtractor>>,
    rules: Arc<NormalizationRules>,
    source_host: String,
    timeouts: Timeouts,
}

impl ExtractionPipeline {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        rules: Arc<NormalizationRules>,
        source_host: impl Into<String>,
        timeouts: Timeouts,
    ) -> Self {
        ExtractionPipeline {
            fetcher,
            extractor: None,
            rules,
            source_host: source_host.into(),
            timeouts,
        }
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn StructuredExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Walk the tiers until one yields records. Fails with
    /// `NoAccountsFound` only once every tier came back empty or failed.
    pub async fn run(&self, url: &str) -> Result<Extraction, PipelineError> {
        let mut page: PageCache = None;
        let mut stage = Stage::TrySchema;

        while let Some((tier, fallback)) = stage.plan() {
            info!("Extracting with {} tier", tier);
            let attempt = match tier {
                Tier::Schema => self.schema_tier(url, &mut page).await,
                Tier::Html => self.html_tier(url, &mut page).await,
                Tier::Markdown => self.markdown_tier(url, &mut page).await,
            };
            match attempt {
                Ok(records) => {
                    info!("{} tier produced {} accounts", tier, records.len());
                    return Ok(Extraction { tier, records });
                }
                Err(e) => {
                    warn!("{}", e);
                    stage = fallback;
                }
            }
        }

        warn!("Every extraction tier came back empty for {}", url);
        Err(PipelineError::NoAccountsFound)
    }

    /// Structured extraction, falling back to a structured payload on the
    /// rendered page when the extractor is missing, fails or finds nothing.
    async fn schema_tier(&self, url: &str, cache: &mut PageCache) -> Result<Vec<AccountRecord>, PipelineError> {
        let first = match self.extract_structured(url).await {
            Ok(records) if !records.is_empty() => return Ok(records),
            Ok(_) => PipelineError::ExtractionEmpty { tier: Tier::Schema },
            Err(e) => e,
        };
        let Ok(page) = self.page(url, cache).await else {
            return Err(first);
        };
        match page.structured_json.as_ref() {
            Some(data) => {
                debug!("Using the structured payload of the rendered page");
                non_empty(schema::records_from_data(data, &self.rules), Tier::Schema)
            }
            None => Err(first),
        }
    }

    async fn extract_structured(&self, url: &str) -> Result<Vec<AccountRecord>, PipelineError> {
        let extractor = self
            .extractor
            .as_ref()
            .ok_or(CollaboratorError::MissingCredential("GEMINI_API_KEY"))?;
        let urls = [url.to_string()];
        // The extractor fetches and then asks the model.
        let limit = self.timeouts.fetch + self.timeouts.llm;
        let data = bounded(
            limit,
            extractor.extract(&urls, &schema::ACCOUNTS_SCHEMA, schema::EXTRACTION_PROMPT),
        )
        .await?;

        Ok(data
            .map(|d| schema::records_from_data(&d, &self.rules))
            .unwrap_or_default())
    }

    async fn html_tier(&self, url: &str, cache: &mut PageCache) -> Result<Vec<AccountRecord>, PipelineError> {
        let page = self.page(url, cache).await?;
        let records = match page.html.as_deref() {
            Some(html) => html::parse_accounts(html, &self.source_host, &self.rules),
            None => {
                debug!("Rendered page carried no HTML");
                Vec::new()
            }
        };
        non_empty(records, Tier::Html)
    }

    async fn markdown_tier(&self, url: &str, cache: &mut PageCache) -> Result<Vec<AccountRecord>, PipelineError> {
        let page = self.page(url, cache).await?;
        let records = match page.markdown.as_deref() {
            Some(md) => markdown::parse_accounts(md, &self.rules),
            None => {
                debug!("Rendered page carried no markdown");
                Vec::new()
            }
        };
        non_empty(records, Tier::Markdown)
    }

    async fn page<'a>(&self, url: &str, cache: &'a mut PageCache) -> Result<&'a FetchedDocument, PipelineError> {
        let fetched = match cache.take() {
            Some(previous) => previous,
            None => {
                debug!("Fetching rendered page {}", url);
                bounded(self.timeouts.fetch, self.fetcher.fetch(url, &FetchOptions::roundup()))
                    .await
                    .map_err(|e| e.to_string())
            }
        };
        cache
            .insert(fetched)
            .as_ref()
            .map_err(|msg| PipelineError::FetchFailed(CollaboratorError::Service(msg.clone())))
    }
}

fn non_empty(records: Vec<AccountRecord>, tier: Tier) -> Result<Vec<AccountRecord>, PipelineError> {
    if records.is_empty() {
        Err(PipelineError::ExtractionEmpty { tier })
    } else {
        Ok(records)
    }
}

// ── Tests ──
