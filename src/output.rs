use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::record::AccountRecord;

/// Write the records as a pretty-printed JSON array, creating parent
/// directories as needed. The file is replaced wholesale.
pub fn write_records(path: &Path, records: &[AccountRecord]) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }
    let mut json = serde_json::to_string_pretty(records).context("serializing records")?;
    json.push('\n');
    fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Verification;

    #[test]
    fn writes_nested_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("hysa_accounts.json");

        let mut record = AccountRecord::new("SoFi".into(), "4.30% APY".into(), None).unwrap();
        record.verification = Some(Verification::Unknown);
        write_records(&path, &[record]).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("[\n  {\n    \"institution\": \"SoFi\""));
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed[0]["verification"], "UNKNOWN");
        assert_eq!(parsed[0]["resolved_link"], serde_json::Value::Null);
    }

    #[test]
    fn empty_list_is_valid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        write_records(&path, &[]).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "[]\n");
    }
}
