use url::Url;

use super::policy::{LinkPolicy, SIMILARITY_THRESHOLD};

/// Host labels that say nothing about who owns a site.
const HOST_NOISE: &[&str] = &[
    "www", "com", "net", "org", "us", "co", "io", "bank", "biz", "info", "online",
];

/// How well a candidate URL fits an institution. Orders lexicographically:
/// a host match beats any number of rate keywords.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LinkScore {
    pub host_match: bool,
    pub keywords: usize,
}

impl LinkScore {
    pub fn new(host_match: bool, keywords: usize) -> Self {
        LinkScore { host_match, keywords }
    }

    pub fn is_zero(&self) -> bool {
        *self == LinkScore::default()
    }
}

/// Lowercase alphanumerics only.
pub fn canonical(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

fn canonical_host(url: &Url) -> String {
    url.host_str()
        .unwrap_or("")
        .to_lowercase()
        .split('.')
        .filter(|label| !HOST_NOISE.contains(label))
        .map(canonical)
        .collect()
}

/// Whether `url`'s host plausibly belongs to `institution`: either
/// canonical form contains the other, or their normalized Levenshtein
/// similarity reaches `threshold`.
pub fn host_matches_with(url: &str, institution: &str, threshold: f64) -> bool {
    let Ok(parsed) = Url::parse(url.trim()) else {
        return false;
    };
    let host = canonical_host(&parsed);
    let name = canonical(institution);
    if host.is_empty() || name.is_empty() {
        return false;
    }
    host.contains(&name)
        || name.contains(&host)
        || strsim::normalized_levenshtein(&host, &name) >= threshold
}

pub fn host_matches_institution(url: &str, institution: &str) -> bool {
    host_matches_with(url, institution, SIMILARITY_THRESHOLD)
}

/// Count of the policy's rate keywords present in the URL path.
pub fn keyword_count(url: &str, keywords: &[String]) -> usize {
    let Ok(parsed) = Url::parse(url.trim()) else {
        return 0;
    };
    let path = parsed.path().to_lowercase();
    keywords.iter().filter(|k| path.contains(k.as_str())).count()
}

pub fn score(url: &str, institution: &str, policy: &LinkPolicy) -> LinkScore {
    LinkScore {
        host_match: host_matches_with(url, institution, policy.similarity_threshold()),
        keywords: keyword_count(url, policy.rate_keywords()),
    }
}

/// Highest-scoring external candidate; on ties the earliest wins.
pub fn best_candidate<I, S>(candidates: I, institution: &str, policy: &LinkPolicy) -> Option<(String, LinkScore)>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut best: Option<(String, LinkScore)> = None;
    for candidate in candidates {
        let Some(url) = policy.external_url(candidate.as_ref()) else {
            continue;
        };
        let url = url.to_string();
        let s = score(&url, institution, policy);
        if best.as_ref().map_or(true, |(_, b)| s > *b) {
            best = Some((url, s));
        }
    }
    best
}
