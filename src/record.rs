use serde::Serialize;

use crate::resolve::score::LinkScore;

/// Outcome of fact-checking one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verification {
    Verified,
    Rejected,
    Unknown,
    /// The LLM call errored or timed out; says nothing about the claim.
    Failed,
}

impl Verification {
    /// Map a reply label; anything that is not an explicit verdict is Unknown.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_uppercase().as_str() {
            "VERIFIED" => Verification::Verified,
            "REJECTED" => Verification::Rejected,
            _ => Verification::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Verification::Verified => "VERIFIED",
            Verification::Rejected => "REJECTED",
            Verification::Unknown => "UNKNOWN",
            Verification::Failed => "FAILED",
        }
    }
}

/// One institution's advertised savings rate, as found on the roundup page.
///
/// Field order is the serialized key order.
#[derive(Debug, Clone, Serialize)]
pub struct AccountRecord {
    pub institution: String,
    pub apy: String,
    pub referring_link: Option<String>,
    resolved_link: Option<String>,
    pub verification: Option<Verification>,
    notes: String,
    #[serde(skip)]
    resolved_score: Option<LinkScore>,
}

impl AccountRecord {
    /// Build a record from already-normalized fields. Returns None if either
    /// the institution or the APY is empty.
    pub fn new(institution: String, apy: String, referring_link: Option<String>) -> Option<Self> {
        if institution.is_empty() || apy.is_empty() {
            return None;
        }
        let referring_link = referring_link
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty());
        Some(AccountRecord {
            institution,
            apy,
            referring_link,
            resolved_link: None,
            verification: None,
            notes: String::new(),
            resolved_score: None,
        })
    }

    /// `(institution, apy)` identity used for dedup within a run.
    pub fn key(&self) -> (String, String) {
        (self.institution.clone(), self.apy.clone())
    }

    pub fn resolved_link(&self) -> Option<&str> {
        self.resolved_link.as_deref()
    }

    /// Best link to show a fact-checker: resolved first, then the referral.
    pub fn best_link(&self) -> Option<&str> {
        self.resolved_link().or(self.referring_link.as_deref())
    }

    /// Offer a resolved link. It replaces the current one only if it scores
    /// strictly higher. Returns true if it was taken.
    pub fn offer_resolved_link(&mut self, url: String, score: LinkScore) -> bool {
        match self.resolved_score {
            Some(current) if score <= current => false,
            _ => {
                self.resolved_link = Some(url);
                self.resolved_score = Some(score);
                true
            }
        }
    }

    pub fn notes(&self) -> &str {
        &self.notes
    }

    /// Append to the audit log; existing text is never rewritten.
    pub fn append_note(&mut self, note: &str) {
        let note = note.trim();
        if note.is_empty() {
            return;
        }
        if !self.notes.is_empty() {
            self.notes.push_str(" | ");
        }
        self.notes.push_str(note);
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> AccountRecord {
        AccountRecord::new("SoFi".into(), "4.30% APY".into(), None).unwrap()
    }

    #[test]
    fn requires_institution_and_apy() {
        assert!(AccountRecord::new(String::new(), "4.00%".into(), None).is_none());
        assert!(AccountRecord::new("Ally".into(), String::new(), None).is_none());
        let r = AccountRecord::new("Ally".into(), "3.80%".into(), Some("  ".into())).unwrap();
        assert!(r.referring_link.is_none());
    }

    #[test]
    fn notes_only_grow() {
        let mut r = record();
        r.append_note("Could not resolve bank URL");
        let len = r.notes().len();
        r.append_note("");
        assert_eq!(r.notes().len(), len);
        r.append_note("Gemini error: timed out after 30s");
        assert_eq!(
            r.notes(),
            "Could not resolve bank URL | Gemini error: timed out after 30s"
        );
    }

    #[test]
    fn resolved_link_keeps_best() {
        let mut r = record();
        assert!(r.offer_resolved_link("https://sofi.com/banking".into(), LinkScore::new(true, 0)));
        assert!(!r.offer_resolved_link("https://sofi.com/".into(), LinkScore::new(false, 3)));
        assert!(!r.offer_resolved_link("https://sofi.com/x".into(), LinkScore::new(true, 0)));
        assert_eq!(r.resolved_link(), Some("https://sofi.com/banking"));
        assert!(r.offer_resolved_link(
            "https://sofi.com/banking/high-yield-savings".into(),
            LinkScore::new(true, 3)
        ));
        assert_eq!(r.resolved_link(), Some("https://sofi.com/banking/high-yield-savings"));
    }

    #[test]
    fn best_link_prefers_resolved() {
        let mut r = AccountRecord::new(
            "SoFi".into(),
            "4.30%".into(),
            Some("https://www.nerdwallet.com/redirect/abc".into()),
        )
        .unwrap();
        assert_eq!(r.best_link(), Some("https://www.nerdwallet.com/redirect/abc"));
        r.offer_resolved_link("https://sofi.com/".into(), LinkScore::new(true, 0));
        assert_eq!(r.best_link(), Some("https://sofi.com/"));
    }

    #[test]
    fn serializes_in_key_order() {
        let mut r = record();
        r.verification = Some(Verification::Failed);
        r.append_note("Gemini error: boom");
        let json = serde_json::to_string(&r).unwrap();
        assert_eq!(
            json,
            r#"{"institution":"SoFi","apy":"4.30% APY","referring_link":null,"resolved_link":null,"verification":"FAILED","notes":"Gemini error: boom"}"#
        );
    }

    #[test]
    fn label_mapping() {
        assert_eq!(Verification::from_label(" verified "), Verification::Verified);
        assert_eq!(Verification::from_label("REJECTED"), Verification::Rejected);
        assert_eq!(Verification::from_label("maybe"), Verification::Unknown);
    }
}
