use std::collections::HashSet;
use std::sync::LazyLock;

use serde_json::{json, Value};

use crate::normalize::{clean, NormalizationRules};
use crate::record::AccountRecord;

pub static ACCOUNTS_SCHEMA: LazyLock<Value> = LazyLock::new(|| {
    json!({
        "type": "object",
        "properties": {
            "accounts": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "institution": {"type": "string"},
                        "apy": {"type": "string"},
                        "link": {"type": "string"}
                    },
                    "required": ["institution", "apy"],
                    "additionalProperties": false
                }
            }
        },
        "required": ["accounts"],
        "additionalProperties": false
    })
});

pub const EXTRACTION_PROMPT: &str = "Extract every bank or credit union highlighted in the roundup along with the \
advertised high-yield savings account APY. Include the exact APY string as published (keep percent symbols or \
qualifiers). Capture the best authoritative link for the institution's savings account page that lists that APY.";

/// Turn `{accounts: [...]}` into records. Items without a usable
/// institution or APY are dropped, as are repeats.
pub fn records_from_data(data: &Value, rules: &NormalizationRules) -> Vec<AccountRecord> {
    let Some(items) = data.get("accounts").and_then(Value::as_array) else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut records = Vec::new();
    for item in items {
        let field = |name: &str| item.get(name).and_then(Value::as_str).unwrap_or("");
        let institution = rules.canonicalize_institution(field("institution"));
        let apy = clean(field("apy"));
        let link = Some(field("link").trim().to_string()).filter(|l| !l.is_empty());

        let Some(record) = AccountRecord::new(institution, apy, link) else {
            continue;
        };
        if seen.insert(record.key()) {
            records.push(record);
        }
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_items_missing_fields() {
        let data = json!({"accounts": [
            {"institution": "Forbright Bank", "apy": "4.75% APY", "link": "https://www.nerdwallet.com/ur/?x=1"},
            {"institution": "SoFi"},
            {"institution": "Instagram", "apy": "5.00%"},
            {"institution": "  ", "apy": "4.00%"}
        ]});
        let records = records_from_data(&data, &NormalizationRules::default());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].institution, "Forbright Bank");
        assert_eq!(records[0].apy, "4.75% APY");
        assert_eq!(records[0].referring_link.as_deref(), Some("https://www.nerdwallet.com/ur/?x=1"));
    }

    #[test]
    fn keeps_apy_qualifiers_and_dedupes() {
        let data = json!({"accounts": [
            {"institution": "[Varo Bank](https://varo)", "apy": "5.00% APY on balances up to $5,000", "link": ""},
            {"institution": "Varo Bank", "apy": "5.00% APY on balances up to $5,000"}
        ]});
        let records = records_from_data(&data, &NormalizationRules::default());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].apy, "5.00% APY on balances up to $5,000");
        assert!(records[0].referring_link.is_none());
    }

    #[test]
    fn tolerates_wrong_shapes() {
        let rules = NormalizationRules::default();
        assert!(records_from_data(&json!({}), &rules).is_empty());
        assert!(records_from_data(&json!({"accounts": "none"}), &rules).is_empty());
        assert!(records_from_data(&json!({"accounts": [{"institution": 5, "apy": 4.5}]}), &rules).is_empty());
    }
}
