use std::collections::HashMap;
use std::future::Future;
use std::sync::LazyLock;
use std::time::Instant;

use async_trait::async_trait;
use regex::Regex;
use spider_client::shapes::request::{
    Delay, RequestType, ReturnFormat, ReturnFormatHandling, Timeout, WaitFor, WebAutomation,
};
use spider_client::{RequestParams, Spider};
use tracing::{debug, warn};

use super::{FetchOptions, FetchedDocument, Fetcher, Format, PageAction};
use crate::error::CollaboratorError;

static IMAGE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"!\[[^\]]*\]\([^)]*\)").unwrap());
static BLANKS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

/// One viewport of spider's default 1080p browser window.
const SCROLL_PX: i32 = 1080;

/// Page fetcher backed by spider.cloud. Each requested format is a separate
/// scrape; spider renders JavaScript pages server-side.
pub struct SpiderFetcher {
    spider: Spider,
}

impl SpiderFetcher {
    pub fn new(api_key: &str) -> Result<Self, CollaboratorError> {
        let spider = Spider::new(Some(api_key.to_string())).map_err(|e| {
            CollaboratorError::Service(format!("failed to create Spider client: {}", e))
        })?;
        Ok(SpiderFetcher { spider })
    }

    async fn scrape_one(
        &self,
        url: &str,
        format: Format,
        options: &FetchOptions,
    ) -> Result<String, CollaboratorError> {
        let params = request_params(options, format);

        let start = Instant::now();
        let response = self
            .spider
            .scrape_url(url, Some(params), "application/json")
            .await
            .map_err(|e| CollaboratorError::Service(format!("spider scrape failed: {}", e)))?;
        debug!("spider scrape of {} took {}ms", url, start.elapsed().as_millis());

        let parsed: serde_json::Value = match response.as_str() {
            Some(s) => serde_json::from_str(s).unwrap_or(response.clone()),
            None => response,
        };

        let first = parsed.as_array().and_then(|arr| arr.first());
        if let Some(status) = first.and_then(|obj| obj.get("status")).and_then(|s| s.as_i64()) {
            if status >= 400 {
                warn!("spider returned status {} for {}", status, url);
                return Err(CollaboratorError::Service(format!("upstream status {}", status)));
            }
        }

        first
            .and_then(|obj| obj.get("content"))
            .and_then(|c| c.as_str())
            .filter(|c| !c.trim().is_empty())
            .map(str::to_string)
            .ok_or_else(|| CollaboratorError::Malformed("no content in spider response".into()))
    }
}

#[async_trait]
impl Fetcher for SpiderFetcher {
    async fn fetch(
        &self,
        url: &str,
        options: &FetchOptions,
    ) -> Result<FetchedDocument, CollaboratorError> {
        fetch_formats(&options.formats, |format| self.scrape_one(url, format, options)).await
    }
}

/// Spider request for one return format. Waits and page actions need the
/// browser; a plain fetch is left to spider's smart mode.
pub fn request_params(options: &FetchOptions, format: Format) -> RequestParams {
    let return_format = match format {
        Format::Html => ReturnFormat::Raw,
        Format::Markdown => ReturnFormat::Markdown,
    };
    let rendered = options.wait_for_ms.is_some() || !options.actions.is_empty();

    let steps: Vec<WebAutomation> = options
        .actions
        .iter()
        .map(|action| match *action {
            PageAction::WaitMs(ms) => WebAutomation::Wait(ms),
            PageAction::ScrollDown => WebAutomation::ScrollY(SCROLL_PX),
        })
        .collect();

    RequestParams {
        return_format: Some(ReturnFormatHandling::Single(return_format)),
        request: rendered.then_some(RequestType::Browser),
        wait_for: options.wait_for_ms.map(|ms| WaitFor {
            delay: Some(Delay {
                timeout: timeout_from_ms(ms),
            }),
            ..Default::default()
        }),
        automation_scripts: (!steps.is_empty()).then(|| HashMap::from([("/".to_string(), steps)])),
        // Interception is what drops ad and tracker requests.
        disable_intercept: Some(!options.block_ads),
        ..Default::default()
    }
}

fn timeout_from_ms(ms: u64) -> Timeout {
    Timeout {
        secs: ms / 1000,
        nanos: ((ms % 1000) * 1_000_000) as u32,
    }
}

/// Scrape each format in turn and keep whatever came back. Fails only when
/// every requested format failed, with the last error seen.
async fn fetch_formats<F, Fut>(formats: &[Format], scrape: F) -> Result<FetchedDocument, CollaboratorError>
where
    F: Fn(Format) -> Fut,
    Fut: Future<Output = Result<String, CollaboratorError>>,
{
    let mut doc = FetchedDocument::default();
    let mut last_err = None;
    for &format in formats {
        match scrape(format).await {
            Ok(content) => match format {
                Format::Html => doc.html = Some(content),
                Format::Markdown => doc.markdown = Some(strip_images(&content)),
            },
            Err(e) => {
                warn!("spider {:?} scrape failed: {}", format, e);
                last_err = Some(e);
            }
        }
    }
    match last_err {
        Some(e) if doc.html.is_none() && doc.markdown.is_none() => Err(e),
        _ => Ok(doc),
    }
}

/// Remove markdown image syntax: ![alt](url) and [![alt](url)](link)
fn strip_images(md: &str) -> String {
    let cleaned = IMAGE_RE.replace_all(md, "");
    BLANKS_RE.replace_all(&cleaned, "\n\n").to_string()
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::collab::Timeouts;
    use crate::extract::{ExtractionPipeline, Tier};
    use crate::normalize::NormalizationRules;

    const CARD_HTML: &str = r#"<html><body>
        <div class="card"><h3>Ally Bank</h3><p>3.80% APY</p>
        <a href="https://www.ally.com/bank/online-savings-account/">Open savings</a></div>
    </body></html>"#;

    /// Serves HTML but every markdown scrape comes back as an upstream error.
    #[derive(Default)]
    struct MarkdownDown {
        scrapes: AtomicUsize,
    }

    #[async_trait]
    impl Fetcher for MarkdownDown {
        async fn fetch(&self, _url: &str, options: &FetchOptions) -> Result<FetchedDocument, CollaboratorError> {
            fetch_formats(&options.formats, |format| {
                self.scrapes.fetch_add(1, Ordering::SeqCst);
                async move {
                    match format {
                        Format::Html => Ok(CARD_HTML.to_string()),
                        Format::Markdown => Err(CollaboratorError::Service("upstream status 502".into())),
                    }
                }
            })
            .await
        }
    }

    #[test]
    fn strips_images_and_blank_runs() {
        let md = "## Ally Bank\n![logo](https://img/ally.png)\n\n\n\n4.20% APY";
        assert_eq!(strip_images(md), "## Ally Bank\n\n4.20% APY");
    }

    #[test]
    fn roundup_params_render_scroll_and_block_ads() {
        let params = request_params(&FetchOptions::roundup(), Format::Html);
        assert_eq!(params.request, Some(RequestType::Browser));
        assert_eq!(params.disable_intercept, Some(false));
        assert!(matches!(
            params.return_format,
            Some(ReturnFormatHandling::Single(ReturnFormat::Raw))
        ));

        let delay = params.wait_for.and_then(|w| w.delay).unwrap();
        assert_eq!((delay.timeout.secs, delay.timeout.nanos), (2, 0));

        let scripts = params.automation_scripts.unwrap();
        assert_eq!(
            scripts["/"],
            [
                WebAutomation::Wait(1500),
                WebAutomation::ScrollY(SCROLL_PX),
                WebAutomation::Wait(800),
            ]
        );
    }

    #[test]
    fn plain_options_stay_in_smart_mode() {
        let options = FetchOptions {
            formats: vec![Format::Markdown],
            wait_for_ms: None,
            block_ads: false,
            actions: Vec::new(),
        };
        let params = request_params(&options, Format::Markdown);
        assert!(params.request.is_none());
        assert!(params.wait_for.is_none());
        assert!(params.automation_scripts.is_none());
        assert_eq!(params.disable_intercept, Some(true));
        assert!(matches!(
            params.return_format,
            Some(ReturnFormatHandling::Single(ReturnFormat::Markdown))
        ));
    }

    #[test]
    fn sub_second_waits_keep_their_millis() {
        let t = timeout_from_ms(1250);
        assert_eq!((t.secs, t.nanos), (1, 250_000_000));
    }

    #[tokio::test]
    async fn markdown_failure_keeps_html() {
        let doc = MarkdownDown::default()
            .fetch("https://www.nerdwallet.com/best", &FetchOptions::roundup())
            .await
            .unwrap();
        assert_eq!(doc.html.as_deref(), Some(CARD_HTML));
        assert!(doc.markdown.is_none());
    }

    #[tokio::test]
    async fn every_format_failing_is_an_error() {
        let err = fetch_formats(&[Format::Html, Format::Markdown], |format| async move {
            Err::<String, _>(CollaboratorError::Service(format!("{:?} down", format)))
        })
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "Markdown down");
    }

    #[tokio::test]
    async fn html_tier_survives_markdown_outage() {
        let fetcher = Arc::new(MarkdownDown::default());
        let timeouts = Timeouts {
            fetch: Duration::from_millis(500),
            llm: Duration::from_millis(50),
            search: Duration::from_millis(50),
        };
        let pipeline = ExtractionPipeline::new(
            fetcher.clone(),
            Arc::new(NormalizationRules::default()),
            "nerdwallet.com",
            timeouts,
        );

        let extraction = pipeline.run("https://www.nerdwallet.com/best").await.unwrap();
        assert_eq!(extraction.tier, Tier::Html);
        assert_eq!(extraction.records.len(), 1);
        assert_eq!(extraction.records[0].institution, "Ally Bank");
        assert_eq!(fetcher.scrapes.load(Ordering::SeqCst), 2);
    }
}
