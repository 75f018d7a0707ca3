use std::collections::HashSet;

use url::Url;

const REDIRECT_PARAMS: &[&str] = &[
    "url", "u", "dest", "destination", "redirect", "redirect_url", "redirect_uri", "r", "to",
    "target", "out", "link", "goto", "href",
];

const OUTBOUND_MARKERS: &[&str] = &[
    "redirect", "outbound", "out/", "click", "affiliate", "partner", "offer", "go/", "track",
];

/// Hosts that are never a bank's own page.
const DENIED_DOMAINS: &[&str] = &[
    "facebook.com", "instagram.com", "twitter.com", "x.com", "linkedin.com", "youtube.com",
    "tiktok.com", "pinterest.com", "reddit.com", "podcasts.apple.com", "apps.apple.com",
    "play.google.com", "google.com", "googleadservices.com", "doubleclick.net",
    "googletagmanager.com", "google-analytics.com", "googlesyndication.com", "bing.com",
    "t.co", "bit.ly", "trustpilot.com", "bankrate.com", "investopedia.com", "wikipedia.org",
];

const RATE_KEYWORDS: &[&str] = &["savings", "high", "yield", "apy", "rate"];

/// Known brand fragments and the domain their savings pages live on.
const BRAND_DOMAINS: &[(&str, &str)] = &[
    ("sofi", "sofi.com"),
    ("ally", "ally.com"),
    ("marcus", "marcus.com"),
    ("capital one", "capitalone.com"),
    ("american express", "americanexpress.com"),
    ("amex", "americanexpress.com"),
    ("discover", "discover.com"),
    ("synchrony", "synchrony.com"),
    ("barclays", "banking.barclaysus.com"),
    ("cit", "cit.com"),
    ("forbright", "forbrightbank.com"),
    ("bread", "breadfinancial.com"),
    ("varo", "varomoney.com"),
    ("wealthfront", "wealthfront.com"),
    ("betterment", "betterment.com"),
    ("upgrade", "upgrade.com"),
    ("lendingclub", "lendingclub.com"),
    ("axos", "axosbank.com"),
    ("bask", "baskbank.com"),
    ("ufb", "ufbdirect.com"),
    ("popular direct", "populardirect.com"),
    ("e*trade", "us.etrade.com"),
    ("openbank", "openbank.us"),
    ("everbank", "everbank.com"),
    ("citizens", "citizensbank.com"),
    ("quontic", "quontic.com"),
    ("laurel road", "laurelroad.com"),
];

/// Similarity cut-off for host/institution matching. Tuned against
/// `strsim::normalized_levenshtein`, which usually scores a partial match
/// lower than a Ratcliff/Obershelp (difflib) ratio does. A difflib-tuned
/// value does not carry over.
pub const SIMILARITY_THRESHOLD: f64 = 0.45;

/// Tables the link resolver decides with. Built once and shared.
#[derive(Debug, Clone)]
pub struct LinkPolicy {
    source_host: String,
    redirect_params: HashSet<String>,
    outbound_markers: Vec<String>,
    denied_domains: Vec<String>,
    rate_keywords: Vec<String>,
    brand_domains: Vec<(String, String)>,
    similarity_threshold: f64,
}

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl LinkPolicy {
    /// Default tables for a roundup hosted on `source` (a URL or bare host).
    pub fn for_source(source: &str) -> Self {
        LinkPolicy {
            source_host: source_host(source),
            redirect_params: REDIRECT_PARAMS.iter().map(|s| s.to_string()).collect(),
            outbound_markers: owned(OUTBOUND_MARKERS),
            denied_domains: owned(DENIED_DOMAINS),
            rate_keywords: owned(RATE_KEYWORDS),
            brand_domains: BRAND_DOMAINS
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            similarity_threshold: SIMILARITY_THRESHOLD,
        }
    }

    pub fn with_brand_domains(mut self, table: &[(&str, &str)]) -> Self {
        self.brand_domains = table
            .iter()
            .map(|(k, v)| (k.to_lowercase(), v.to_string()))
            .collect();
        self
    }

    pub fn with_denied_domains(mut self, domains: &[&str]) -> Self {
        self.denied_domains = owned(domains);
        self
    }

    pub fn similarity_threshold(&self) -> f64 {
        self.similarity_threshold
    }

    pub fn rate_keywords(&self) -> &[String] {
        &self.rate_keywords
    }

    pub fn is_redirect_param(&self, name: &str) -> bool {
        self.redirect_params.contains(&name.to_lowercase())
    }

    pub fn has_outbound_marker(&self, href: &str) -> bool {
        let lower = href.to_lowercase();
        self.outbound_markers.iter().any(|m| lower.contains(m.as_str()))
    }

    pub fn is_source_url(&self, url: &str) -> bool {
        Url::parse(url.trim())
            .ok()
            .and_then(|u| u.host_str().map(|h| same_site(h, &self.source_host)))
            .unwrap_or(false)
    }

    /// Absolute http(s) URL, off the source site, not on the denylist.
    pub fn external_url(&self, url: &str) -> Option<Url> {
        let parsed = Url::parse(url.trim()).ok()?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return None;
        }
        let host = parsed.host_str()?.to_lowercase();
        if !host.contains('.') || same_site(&host, &self.source_host) {
            return None;
        }
        if self.denied_domains.iter().any(|d| same_site(&host, d)) {
            return None;
        }
        Some(parsed)
    }

    pub fn is_external(&self, url: &str) -> bool {
        self.external_url(url).is_some()
    }

    /// Official domain for a known brand named in `institution`. Fragments
    /// match whole words only, so "cit" does not fire on "Citizens".
    pub fn brand_hint(&self, institution: &str) -> Option<&str> {
        let padded = format!(
            " {} ",
            institution
                .to_lowercase()
                .chars()
                .map(|c| if c.is_alphanumeric() || c == '*' { c } else { ' ' })
                .collect::<String>()
        );
        self.brand_domains
            .iter()
            .find(|(fragment, _)| padded.contains(&format!(" {} ", fragment)))
            .map(|(_, domain)| domain.as_str())
    }
}

/// Host of a URL (or a bare host) with any `www.` prefix removed.
pub fn source_host(source: &str) -> String {
    let host = Url::parse(source.trim())
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| source.trim().to_string());
    host.to_lowercase().trim_start_matches("www.").to_string()
}

/// `host` is `site` or one of its subdomains.
pub fn same_site(host: &str, site: &str) -> bool {
    let host = host.to_lowercase();
    let site = site.to_lowercase();
    host == site || host.ends_with(&format!(".{}", site))
}
