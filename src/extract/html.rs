use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};
use url::Url;

use super::APY_RE;
use crate::normalize::{clean, NormalizationRules};
use crate::record::AccountRecord;
use crate::resolve::policy::same_site;

static NAME_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h1, h2, h3, h4, strong").unwrap());
static ANCHOR_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());
static APY_WORD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bAPY\b").unwrap());

const CARD_TAGS: &[&str] = &["article", "section", "div", "li"];
const SKIP_TAGS: &[&str] = &["script", "style", "noscript", "template"];
const MAX_CLIMB: usize = 6;
const MAX_NAME_CANDIDATES: usize = 5;
const CONTEXT_CHARS: usize = 400;
const LINK_TEXT_KEYWORDS: &[&str] = &["savings", "high", "apy", "rate"];
const LINK_HREF_KEYWORDS: &[&str] = &["savings", "high-yield", "rate"];

/// Heuristic card parse of a rendered roundup page.
///
/// Every text node carrying an APY figure is traced up to the nearest
/// card-like ancestor (within `MAX_CLIMB` levels) that mentions "APY" and
/// has a heading naming an institution.
pub fn parse_accounts(html: &str, source_host: &str, rules: &NormalizationRules) -> Vec<AccountRecord> {
    let doc = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut records = Vec::new();

    for node in doc.tree.nodes() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let parent = node.parent().and_then(ElementRef::wrap);
        if parent.is_some_and(|el| SKIP_TAGS.contains(&el.value().name())) {
            continue;
        }
        let Some(m) = APY_RE.find(text) else {
            continue;
        };
        let apy = m.as_str().trim().to_string();

        let ancestors = node.ancestors().take(MAX_CLIMB).filter_map(ElementRef::wrap);
        let Some((card, institution)) = find_card(ancestors, rules) else {
            continue;
        };
        let key = (institution.clone(), apy.clone());
        if seen.contains(&key) {
            continue;
        }
        let link = find_link(card, source_host);
        if let Some(record) = AccountRecord::new(institution, apy, link) {
            seen.insert(key);
            records.push(record);
        }
    }
    records
}

fn find_card<'a>(
    ancestors: impl Iterator<Item = ElementRef<'a>>,
    rules: &NormalizationRules,
) -> Option<(ElementRef<'a>, String)> {
    for el in ancestors {
        if !CARD_TAGS.contains(&el.value().name()) {
            continue;
        }
        let context: String = clean(&element_text(el)).chars().take(CONTEXT_CHARS).collect();
        if !APY_WORD_RE.is_match(&context) {
            continue;
        }
        if let Some(name) = find_institution(el, rules) {
            return Some((el, name));
        }
    }
    None
}

fn find_institution(card: ElementRef<'_>, rules: &NormalizationRules) -> Option<String> {
    card.select(&NAME_SEL)
        .take(MAX_NAME_CANDIDATES)
        .map(|el| rules.canonicalize_institution(&element_text(el)))
        .find(|name| !name.is_empty())
}

/// First off-site anchor that looks like a rate page, else the first
/// off-site anchor at all.
fn find_link(card: ElementRef<'_>, source_host: &str) -> Option<String> {
    let mut fallback = None;
    for a in card.select(&ANCHOR_SEL) {
        let href = a.value().attr("href").unwrap_or("").trim();
        if !href.starts_with("http") {
            continue;
        }
        let Ok(url) = Url::parse(href) else {
            continue;
        };
        if url.host_str().map_or(true, |h| same_site(h, source_host)) {
            continue;
        }
        let text = element_text(a).to_lowercase();
        let href_lower = href.to_lowercase();
        if LINK_TEXT_KEYWORDS.iter().any(|k| text.contains(k))
            || LINK_HREF_KEYWORDS.iter().any(|k| href_lower.contains(k))
        {
            return Some(href.to_string());
        }
        fallback.get_or_insert_with(|| href.to_string());
    }
    fallback
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<Vec<_>>().join(" ")
}
