use std::collections::HashSet;

use super::APY_RE;
use crate::normalize::NormalizationRules;
use crate::record::AccountRecord;

const LOOKBACK: usize = 5;

/// Line-based fallback over the page's markdown. Each APY figure takes its
/// institution from the nearest of the previous few lines that reads as a
/// name once heading and bold markers are stripped. No links are kept.
pub fn parse_accounts(markdown: &str, rules: &NormalizationRules) -> Vec<AccountRecord> {
    let lines: Vec<&str> = markdown.lines().map(str::trim).collect();
    let mut seen = HashSet::new();
    let mut records = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        let Some(m) = APY_RE.find(line) else {
            continue;
        };
        let apy = m.as_str().to_string();

        let window = &lines[i.saturating_sub(LOOKBACK)..i];
        let institution = window
            .iter()
            .rev()
            .filter(|prev| !APY_RE.is_match(prev))
            .map(|prev| rules.canonicalize_institution(strip_markers(prev)))
            .find(|name| !name.is_empty());
        let Some(institution) = institution else {
            continue;
        };

        if seen.insert((institution.clone(), apy.clone())) {
            records.extend(AccountRecord::new(institution, apy, None));
        }
    }
    records
}

fn strip_markers(line: &str) -> &str {
    line.trim_start_matches(|c| c == '#' || c == ' ')
        .trim_matches(|c| c == '*' || c == ' ')
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(md: &str) -> Vec<AccountRecord> {
        parse_accounts(md, &NormalizationRules::default())
    }

    #[test]
    fn fixture_headings() {
        let md = std::fs::read_to_string("tests/fixtures/roundup.md").unwrap();
        let records = parse(&md);
        let pairs: Vec<(&str, &str)> = records
            .iter()
            .map(|r| (r.institution.as_str(), r.apy.as_str()))
            .collect();
        assert_eq!(
            pairs,
            [
                ("Forbright Bank", "4.75% APY"),
                ("SoFi", "4.30% APY"),
                ("Varo Bank", "5.00% APY"),
            ]
        );
        assert!(records.iter().all(|r| r.referring_link.is_none()));
    }

    #[test]
    fn bold_names_and_dedupe() {
        let md = "**Bask Bank**\n\n5.10% APY\n\n**Bask Bank**\n5.10% APY\n";
        let records = parse(md);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].institution, "Bask Bank");
    }

    #[test]
    fn name_too_far_above_is_not_used() {
        let md = "## Ally Bank\n\n\n\n\n\n3.80% APY";
        assert!(parse(md).is_empty());
    }

    #[test]
    fn noise_lines_are_skipped() {
        let md = "### Marcus by Goldman Sachs\n![United States Flag](flag.svg)\n4.40% APY";
        let records = parse(md);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].institution, "Marcus by Goldman Sachs");
    }
}
