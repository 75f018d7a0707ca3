use std::collections::HashSet;
use std::sync::LazyLock;

use regex::{Captures, Regex};

static MARKDOWN_IMAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\[[^\]]*\]\([^)]*\)").unwrap());
static MARKDOWN_LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\([^)]*\)").unwrap());
static DATA_URI_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)data:image[^)]+\)").unwrap());
static BULLET_PREFIX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[-*\x{2022}\x{00b7}]+\s*").unwrap());
static WHITESPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static ENTITY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z]{2,8});").unwrap());
static MIN_ALPHA_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[A-Za-z]{3}").unwrap());

const EXACT_NOISE: &[&str] = &[
    "usa",
    "united states",
    "united states flag",
    "united kingdom",
    "united kingdom flag",
    "instagram",
    "apple podcasts",
    "facebook",
    "twitter",
    "youtube",
    "linkedin",
    "tiktok",
];

const NOISE_PATTERN: &str = r"(?i)\bflag\b|instagram|youtube|facebook|twitter|tiktok|linkedin|pinterest|x\.com|apple\s+podcasts|united\s+states|united\s+kingdom|usa only|rss feed|privacy|cookie|terms of (?:use|service)";

const MAX_INSTITUTION_LEN: usize = 120;

/// Noise tables used to reject non-institution text.
#[derive(Debug, Clone)]
pub struct NormalizationRules {
    exact_noise: HashSet<String>,
    noise_pattern: Regex,
    max_len: usize,
}

impl Default for NormalizationRules {
    fn default() -> Self {
        NormalizationRules {
            exact_noise: EXACT_NOISE.iter().map(|s| s.to_string()).collect(),
            noise_pattern: Regex::new(NOISE_PATTERN).unwrap(),
            max_len: MAX_INSTITUTION_LEN,
        }
    }
}

impl NormalizationRules {
    pub fn new<'a>(
        exact_noise: impl IntoIterator<Item = &'a str>,
        noise_pattern: &str,
        max_len: usize,
    ) -> Result<Self, regex::Error> {
        Ok(NormalizationRules {
            exact_noise: exact_noise.into_iter().map(|s| s.to_lowercase()).collect(),
            noise_pattern: Regex::new(noise_pattern)?,
            max_len,
        })
    }

    /// Clean `raw` and return it as an institution name, or an empty string
    /// when it looks like page chrome rather than a bank.
    pub fn canonicalize_institution(&self, raw: &str) -> String {
        let text = clean(raw);
        if text.is_empty() || self.is_noise(&text) {
            return String::new();
        }
        text
    }

    fn is_noise(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.exact_noise.contains(&lower)
            || self.noise_pattern.is_match(&lower)
            || !MIN_ALPHA_RE.is_match(text)
            || text.chars().count() > self.max_len
    }
}

/// Strip markdown, entities, data URIs and bullets from a raw fragment,
/// repeating until nothing changes. A pass never lengthens the text, so
/// nested entities unwrap one layer per pass and the loop settles.
pub fn clean(raw: &str) -> String {
    let mut text = raw.to_string();
    loop {
        let next = clean_once(&text);
        if next == text {
            return text;
        }
        text = next;
    }
}

fn clean_once(raw: &str) -> String {
    let text = decode_entities(raw);
    let text = MARKDOWN_IMAGE_RE.replace_all(&text, "");
    let text = DATA_URI_RE.replace_all(&text, "");
    let text = MARKDOWN_LINK_RE.replace_all(&text, "$1");
    let text = BULLET_PREFIX_RE.replace(&text, "");
    let text = text.replace(['\u{2022}', '\u{00b7}'], " ");
    let text = WHITESPACE_RE.replace_all(&text, " ");
    text.trim_matches(|c| c == ' ' || c == '-').to_string()
}

/// Decode named and numeric HTML entities. Unknown names are left alone.
pub fn decode_entities(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    ENTITY_RE
        .replace_all(s, |caps: &Captures| {
            let body = &caps[1];
            let decoded = if let Some(hex) = body.strip_prefix("#x").or(body.strip_prefix("#X")) {
                u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
            } else if let Some(dec) = body.strip_prefix('#') {
                dec.parse::<u32>().ok().and_then(char::from_u32)
            } else {
                named_entity(body)
            };
            decoded
                .map(|c| c.to_string())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn named_entity(name: &str) -> Option<char> {
    let c = match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => ' ',
        "ndash" => '\u{2013}',
        "mdash" => '\u{2014}',
        "lsquo" => '\u{2018}',
        "rsquo" => '\u{2019}',
        "ldquo" => '\u{201c}',
        "rdquo" => '\u{201d}',
        "hellip" => '\u{2026}',
        "bull" => '\u{2022}',
        "middot" => '\u{00b7}',
        "reg" => '\u{00ae}',
        "trade" => '\u{2122}',
        "copy" => '\u{00a9}',
        _ => return None,
    };
    Some(c)
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn canon(raw: &str) -> String {
        NormalizationRules::default().canonicalize_institution(raw)
    }

    #[test]
    fn clean_strips_markdown_and_bullets() {
        assert_eq!(clean("* [Ally Bank](https://ally.com)"), "Ally Bank");
        assert_eq!(clean("![logo](https://x/y.png) SoFi"), "SoFi");
        assert_eq!(clean("• Forbright   Bank -"), "Forbright Bank");
        assert_eq!(clean("Bask\u{00b7}Bank"), "Bask Bank");
    }

    #[test]
    fn clean_decodes_entities() {
        assert_eq!(clean("Ally &amp; Co"), "Ally & Co");
        assert_eq!(clean("Capital One&#39;s 360"), "Capital One's 360");
        assert_eq!(clean("4.50%&nbsp;APY"), "4.50% APY");
        assert_eq!(clean("&unknown; Bank"), "&unknown; Bank");
    }

    #[test]
    fn clean_removes_data_uris() {
        assert_eq!(clean("Varo Bank data:image/svg+xml;base64,PHN2Zz4=)"), "Varo Bank");
        assert_eq!(clean(""), "");
    }

    #[test]
    fn nested_links_settle() {
        assert_eq!(clean("[[Ally Bank](https://a)](https://b)"), "Ally Bank");
        assert_eq!(clean("Bank &amp;amp; Trust"), "Bank & Trust");
    }

    #[test]
    fn rejects_noise() {
        assert_eq!(canon("United States Flag"), "");
        assert_eq!(canon("Instagram"), "");
        assert_eq!(canon(""), "");
        assert_eq!(canon("USA"), "");
        assert_eq!(canon("Follow us on Facebook"), "");
        assert_eq!(canon("Privacy Policy"), "");
        assert_eq!(canon("4.50%"), "");
        assert_eq!(canon(&"Bank ".repeat(30)), "");
    }

    #[test]
    fn keeps_real_institutions() {
        assert_eq!(canon("Forbright Bank"), "Forbright Bank");
        assert_eq!(canon("Causa Bank"), "Causa Bank");
        assert_eq!(canon("Flagstar Bank"), "Flagstar Bank");
        assert_eq!(canon("Marcus by Goldman Sachs"), "Marcus by Goldman Sachs");
    }

    #[test]
    fn canonicalize_is_idempotent() {
        let inputs = [
            "Forbright Bank",
            "  - [SoFi](https://sofi.com)  ",
            "[[Ally](a)](b)",
            "Bank &amp;amp;amp; Trust",
            "&amp;lt;b&amp;gt;UFB Direct",
            "•• Varo\u{00b7}Bank --",
            "United States Flag",
            "",
            "ab",
        ];
        for raw in inputs {
            let once = canon(raw);
            assert_eq!(canon(&once), once, "not idempotent for {:?}", raw);
        }

        let deep = format!("Bank &{} Trust", "amp;".repeat(10));
        let once = canon(&deep);
        assert_eq!(once, "Bank & Trust");
        assert_eq!(canon(&once), once);
        assert_eq!(clean(&deep), "Bank & Trust");
    }

    #[test]
    fn alternate_rules() {
        let rules = NormalizationRules::new(["acme"], r"(?i)sponsored", 20).unwrap();
        assert_eq!(rules.canonicalize_institution("ACME"), "");
        assert_eq!(rules.canonicalize_institution("Sponsored offer"), "");
        assert_eq!(rules.canonicalize_institution("Instagram"), "Instagram");
        assert_eq!(rules.canonicalize_institution("A very long bank name indeed"), "");
    }
}
