//! Outbound link resolution: find the bank's own page behind a roundup's
//! affiliate link, falling back to web search.

pub mod policy;
pub mod redirect;
pub mod score;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::collab::{bounded, AnchorScanner, SearchProvider};
use crate::record::AccountRecord;
use policy::LinkPolicy;
use redirect::decode_redirect_target;
use score::{best_candidate, score, LinkScore};

const SEARCH_LIMIT: usize = 5;
const UNRESOLVED_NOTE: &str = "Could not resolve bank URL";

/// Which strategy produced a record's resolved link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The referring link already pointed at the bank.
    Direct,
    RedirectParam,
    PageScan,
    Search,
    BrandRoot,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Resolution::Direct => "direct",
            Resolution::RedirectParam => "redirect-param",
            Resolution::PageScan => "page-scan",
            Resolution::Search => "search",
            Resolution::BrandRoot => "brand-root",
        };
        f.write_str(s)
    }
}

pub struct LinkResolver {
    policy: Arc<LinkPolicy>,
    scanner: Option<Arc<dyn AnchorScanner>>,
    search: Option<Arc<dyn SearchProvider>>,
    call_timeout: Duration,
}

impl LinkResolver {
    pub fn new(policy: Arc<LinkPolicy>, call_timeout: Duration) -> Self {
        LinkResolver {
            policy,
            scanner: None,
            search: None,
            call_timeout,
        }
    }

    pub fn with_scanner(mut self, scanner: Arc<dyn AnchorScanner>) -> Self {
        self.scanner = Some(scanner);
        self
    }

    pub fn with_search(mut self, search: Arc<dyn SearchProvider>) -> Self {
        self.search = Some(search);
        self
    }

    /// Resolve one record's bank URL. Failures are noted on the record and
    /// never abort the run.
    pub async fn resolve(&self, record: &mut AccountRecord) -> Option<Resolution> {
        let outcome = match self.from_referral(record).await {
            Some(r) => Some(r),
            None => self.from_search(record).await,
        };
        match outcome {
            Some(how) => info!(
                "Resolved {} via {}: {}",
                record.institution,
                how,
                record.resolved_link().unwrap_or("-")
            ),
            None => {
                warn!("Could not resolve bank URL for {}", record.institution);
                record.append_note(UNRESOLVED_NOTE);
            }
        }
        outcome
    }

    async fn from_referral(&self, record: &mut AccountRecord) -> Option<Resolution> {
        let link = record.referring_link.clone()?;
        let institution = record.institution.clone();

        if !self.policy.is_source_url(&link) {
            // Already off-site: keep it only if it is visibly the bank's.
            let s = score(&link, &institution, &self.policy);
            if s.host_match && self.policy.is_external(&link) {
                record.offer_resolved_link(link, s);
                return Some(Resolution::Direct);
            }
            return None;
        }

        if let Some(target) = decode_redirect_target(&link, &self.policy) {
            let s = score(&target, &institution, &self.policy);
            record.offer_resolved_link(target, s);
            return Some(Resolution::RedirectParam);
        }

        let (url, s) = self.scan_referral(&link, record).await?;
        record.offer_resolved_link(url, s);
        Some(Resolution::PageScan)
    }

    /// Follow the referral page and rank what it links to. Anchors carrying
    /// outbound markers (and the landing URL) are preferred; anything else
    /// must visibly belong to the institution.
    async fn scan_referral(&self, link: &str, record: &mut AccountRecord) -> Option<(String, LinkScore)> {
        let scanner = self.scanner.as_ref()?;
        let page = match bounded(self.call_timeout, scanner.scan(link)).await {
            Ok(page) => page,
            Err(e) => {
                warn!("Referral scan failed for {}: {}", record.institution, e);
                record.append_note(&format!("Referral scan failed: {}", e));
                return None;
            }
        };

        let mut preferred: Vec<String> = Vec::new();
        let mut others: Vec<String> = Vec::new();
        if let Some(landed) = page.final_url {
            preferred.push(landed);
        }
        for anchor in page.anchors {
            if self.policy.has_outbound_marker(&anchor.href) {
                if let Some(target) = decode_redirect_target(&anchor.href, &self.policy) {
                    preferred.push(target);
                }
                preferred.push(anchor.href);
            } else {
                others.push(anchor.href);
            }
        }
        debug!(
            "{}: {} preferred / {} other anchors on referral page",
            record.institution,
            preferred.len(),
            others.len()
        );

        best_candidate(&preferred, &record.institution, &self.policy).or_else(|| {
            best_candidate(&others, &record.institution, &self.policy).filter(|(_, s)| s.host_match)
        })
    }

    async fn from_search(&self, record: &mut AccountRecord) -> Option<Resolution> {
        let institution = record.institution.clone();
        let hint = self.policy.brand_hint(&institution).map(str::to_string);

        if let Some(search) = &self.search {
            let mut queries = Vec::new();
            if let Some(domain) = &hint {
                queries.push(format!("site:{} {} high-yield savings APY", domain, institution));
            }
            queries.push(format!("{} high-yield savings APY", institution));

            let mut urls: Vec<String> = Vec::new();
            for query in queries {
                match bounded(self.call_timeout, search.search(&query, SEARCH_LIMIT)).await {
                    Ok(hits) => urls.extend(hits.into_iter().map(|h| h.url)),
                    Err(e) => {
                        warn!("Search failed for {:?}: {}", query, e);
                        record.append_note(&format!("Search failed: {}", e));
                    }
                }
                let found = best_candidate(&urls, &institution, &self.policy);
                if found.as_ref().is_some_and(|(_, s)| s.host_match) {
                    break;
                }
            }

            if let Some((url, s)) = best_candidate(&urls, &institution, &self.policy) {
                if !s.is_zero() {
                    record.offer_resolved_link(url, s);
                    return Some(Resolution::Search);
                }
            }
        }

        let domain = hint?;
        let root = format!("https://{}/", domain);
        let s = score(&root, &institution, &self.policy);
        record.offer_resolved_link(root, s);
        Some(Resolution::BrandRoot)
    }
}

// ── Tests ──
