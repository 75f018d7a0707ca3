use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine;
use url::Url;

use super::policy::LinkPolicy;

/// Pull the destination out of an affiliate/redirect URL's query string.
///
/// Each known redirect parameter is tried in order; a value is taken as-is
/// when it is already an external URL, otherwise it is read as base64.
pub fn decode_redirect_target(url: &str, policy: &LinkPolicy) -> Option<String> {
    let parsed = Url::parse(url.trim()).ok()?;
    parsed
        .query_pairs()
        .filter(|(name, _)| policy.is_redirect_param(name))
        .find_map(|(_, value)| decode_candidate(&value, policy))
}

fn decode_candidate(value: &str, policy: &LinkPolicy) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    // query_pairs decodes once; double-encoded targets need another pass
    let decoded = if value.contains('%') {
        urlencoding::decode(value)
            .map(|v| v.into_owned())
            .unwrap_or_else(|_| value.to_string())
    } else {
        value.to_string()
    };
    if let Some(u) = policy.external_url(&decoded) {
        return Some(u.to_string());
    }
    let target = decode_base64_url(&decoded)?;
    policy.external_url(&target).map(|u| u.to_string())
}

/// Decode a base64 (standard or URL-safe, padded or not) value that should
/// hold a URL. Anything that is not UTF-8 starting with `http` is rejected.
pub fn decode_base64_url(value: &str) -> Option<String> {
    let stripped = value.trim().trim_end_matches('=');
    if stripped.is_empty() {
        return None;
    }
    for pad in 0..=3 {
        let candidate = format!("{}{}", stripped, "=".repeat(pad));
        for engine in [&STANDARD, &URL_SAFE] {
            let Ok(bytes) = engine.decode(&candidate) else {
                continue;
            };
            let Ok(text) = String::from_utf8(bytes) else {
                continue;
            };
            let text = text.trim();
            if text.starts_with("http") {
                return Some(text.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> LinkPolicy {
        LinkPolicy::for_source("https://www.nerdwallet.com/")
    }

    #[test]
    fn plain_url_param() {
        let target = decode_redirect_target(
            "https://go.example.com/r?url=https%3A%2F%2Fbank.com%2Fsavings",
            &policy(),
        );
        assert_eq!(target.as_deref(), Some("https://bank.com/savings"));
    }

    #[test]
    fn double_encoded_param() {
        let target = decode_redirect_target(
            "https://www.nerdwallet.com/out?dest=https%253A%252F%252Fwww.ally.com%252Fbank%252F",
            &policy(),
        );
        assert_eq!(target.as_deref(), Some("https://www.ally.com/bank/"));
    }

    #[test]
    fn base64_param_accepted() {
        let encoded = STANDARD.encode("https://www.sofi.com/banking/");
        let url = format!(
            "https://www.nerdwallet.com/redirect?target={}",
            urlencoding::encode(encoded.trim_end_matches('='))
        );
        assert_eq!(
            decode_redirect_target(&url, &policy()).as_deref(),
            Some("https://www.sofi.com/banking/")
        );
    }

    #[test]
    fn base64_non_url_rejected() {
        let encoded = STANDARD.encode([0xff_u8, 0xfe, 0x00, 0x10, 0x80]);
        let url = format!("https://www.nerdwallet.com/redirect?r={}", urlencoding::encode(&encoded));
        assert!(decode_redirect_target(&url, &policy()).is_none());

        let text = STANDARD.encode("just some words");
        assert!(decode_base64_url(&text).is_none());
    }

    #[test]
    fn base64_url_safe_alphabet() {
        let encoded = URL_SAFE.encode("https://www.ally.com/bank/online-savings-account/?a=1&b=2>");
        assert!(decode_base64_url(&encoded).is_some());
    }

    #[test]
    fn ignores_unknown_and_internal_targets() {
        let p = policy();
        assert!(decode_redirect_target("https://www.nerdwallet.com/x?utm=https%3A%2F%2Fbank.com", &p).is_none());
        assert!(decode_redirect_target("https://www.nerdwallet.com/x?url=https%3A%2F%2Fwww.nerdwallet.com%2Fy", &p).is_none());
        assert!(decode_redirect_target("https://www.nerdwallet.com/x?url=https%3A%2F%2Ffacebook.com", &p).is_none());
        assert!(decode_redirect_target("not a url", &p).is_none());
    }
}
