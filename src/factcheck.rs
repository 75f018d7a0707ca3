use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::collab::{bounded, LanguageModel};
use crate::record::{AccountRecord, Verification};

const SKIPPED_NOTE: &str = "Skipped: GEMINI_API_KEY not provided; unable to verify automatically.";
const NO_LINK: &str = "(no link provided)";

/// Asks the language model whether each record's APY is what the bank
/// actually advertises.
pub struct FactChecker {
    model: Option<Arc<dyn LanguageModel>>,
    timeout: Duration,
}

impl FactChecker {
    pub fn new(model: Option<Arc<dyn LanguageModel>>, timeout: Duration) -> Self {
        FactChecker { model, timeout }
    }

    /// Set `verification` and append the model's justification to `notes`.
    /// A model failure marks the record `Failed`, never `Rejected`.
    pub async fn check(&self, record: &mut AccountRecord) -> Verification {
        let Some(model) = &self.model else {
            record.verification = Some(Verification::Unknown);
            record.append_note(SKIPPED_NOTE);
            return Verification::Unknown;
        };

        let prompt = build_prompt(record);
        debug!("Fact-checking {} ({})", record.institution, record.apy);
        let verdict = match bounded(self.timeout, model.generate(&prompt)).await {
            Ok(reply) => {
                let (verdict, note) = parse_reply(&reply);
                record.append_note(note);
                verdict
            }
            Err(e) => {
                warn!("Fact-check failed for {}: {}", record.institution, e);
                record.append_note(&format!("Gemini error: {}", e));
                Verification::Failed
            }
        };
        info!("{} {}: {}", record.institution, record.apy, verdict.as_str());
        record.verification = Some(verdict);
        verdict
    }
}

pub fn build_prompt(record: &AccountRecord) -> String {
    format!(
        "You are validating APY data for a high-yield savings account.\n\
         Bank: {}\n\
         Claimed APY: {}\n\
         Source URL: {}\n\n\
         The URL should be the financial institution's official page (or a landing page) \
         where the advertised APY is clearly stated.\n\
         Visit the source URL (follow redirects if needed) and confirm whether the page \
         supports the claimed APY today. Respond with one of the following exactly:\n\
         - VERIFIED (if the APY matches or is clearly supported)\n\
         - REJECTED (if the APY differs or cannot be confirmed)\n\
         - UNKNOWN (if the page is inaccessible or inconclusive)\n\
         Provide a short justification after the label separated by a colon.",
        record.institution,
        record.apy,
        record.best_link().unwrap_or(NO_LINK),
    )
}

/// Split `LABEL: justification` on the first colon. The note is the text
/// after the colon, or the whole reply when that is empty.
pub fn parse_reply(reply: &str) -> (Verification, &str) {
    let reply = reply.trim();
    match reply.split_once(':') {
        Some((label, rest)) => {
            let rest = rest.trim();
            let note = if rest.is_empty() { reply } else { rest };
            (Verification::from_label(label), note)
        }
        None => (Verification::from_label(reply), reply),
    }
}

// ── Tests ──
