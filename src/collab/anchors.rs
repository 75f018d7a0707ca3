use std::sync::LazyLock;

use async_trait::async_trait;
use scraper::{Html, Selector};
use url::Url;

use super::{Anchor, AnchorScanner, PageAnchors};
use crate::error::CollaboratorError;

static ANCHOR_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());

const MAX_REDIRECTS: usize = 10;

/// Collect `a[href]` anchors, resolving relative hrefs against `base`.
/// Relative hrefs are dropped when there is no base.
pub fn anchors_from_html(html: &str, base: Option<&Url>) -> Vec<Anchor> {
    let doc = Html::parse_document(html);
    doc.select(&ANCHOR_SEL)
        .filter_map(|a| {
            let raw = a.value().attr("href")?.trim();
            if raw.is_empty() || raw.starts_with('#') || raw.starts_with("javascript:") {
                return None;
            }
            let href = match Url::parse(raw) {
                Ok(u) => u.to_string(),
                Err(_) => base?.join(raw).ok()?.to_string(),
            };
            let text = a.text().collect::<Vec<_>>().join(" ");
            Some(Anchor {
                href,
                text: text.split_whitespace().collect::<Vec<_>>().join(" "),
            })
        })
        .collect()
}

/// Plain HTTP GET that follows redirects. Affiliate hops usually end on the
/// bank itself, so the landing URL is reported alongside the body's anchors.
pub struct HttpAnchorScanner {
    http: reqwest::Client,
}

impl HttpAnchorScanner {
    pub fn new() -> Result<Self, CollaboratorError> {
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .user_agent(concat!("hysa_scraper/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(HttpAnchorScanner { http })
    }
}

#[async_trait]
impl AnchorScanner for HttpAnchorScanner {
    async fn scan(&self, url: &str) -> Result<PageAnchors, CollaboratorError> {
        let response = self.http.get(url).send().await?;
        let final_url = response.url().clone();
        let body = response.text().await?;
        Ok(PageAnchors {
            anchors: anchors_from_html(&body, Some(&final_url)),
            final_url: Some(final_url.to_string()),
        })
    }
}

/// Scans the JS-rendered page through the rendering fetcher. Slower and
/// billed per call, but sees anchors injected client-side.
#[cfg(feature = "render")]
pub struct RenderedAnchorScanner {
    fetcher: std::sync::Arc<dyn super::Fetcher>,
}

#[cfg(feature = "render")]
impl RenderedAnchorScanner {
    pub fn new(fetcher: std::sync::Arc<dyn super::Fetcher>) -> Self {
        RenderedAnchorScanner { fetcher }
    }
}

#[cfg(feature = "render")]
#[async_trait]
impl AnchorScanner for RenderedAnchorScanner {
    async fn scan(&self, url: &str) -> Result<PageAnchors, CollaboratorError> {
        let doc = self
            .fetcher
            .fetch(url, &super::FetchOptions::html_only())
            .await?;
        let html = doc
            .html
            .ok_or_else(|| CollaboratorError::Malformed("rendered page has no HTML".into()))?;
        let base = Url::parse(url).ok();
        Ok(PageAnchors {
            final_url: None,
            anchors: anchors_from_html(&html, base.as_ref()),
        })
    }
}
