use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::collab::Timeouts;

pub const CONFIG_FILE: &str = "hysa.toml";
pub const DEFAULT_TARGET_URL: &str =
    "https://www.nerdwallet.com/best/banking/high-yield-online-savings-accounts";
pub const DEFAULT_OUTPUT_PATH: &str = "data/hysa_accounts.json";
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";

/// Runtime settings: built-in defaults, then `hysa.toml` if present, then
/// environment variables (`SPIDER_API_KEY`, `CONCURRENCY`, ...).
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub spider_api_key: Option<String>,
    #[serde(default)]
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub output_path: PathBuf,
    pub target_url: String,
    pub fetch_timeout_secs: u64,
    pub llm_timeout_secs: u64,
    pub search_timeout_secs: u64,
    pub concurrency: usize,
}

impl Settings {
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(CONFIG_FILE), Environment::default())
    }

    fn load_from(file: &Path, env: Environment) -> Result<Self> {
        let raw = Config::builder()
            .set_default("gemini_model", DEFAULT_MODEL)?
            .set_default("output_path", DEFAULT_OUTPUT_PATH)?
            .set_default("target_url", DEFAULT_TARGET_URL)?
            .set_default("fetch_timeout_secs", 60_i64)?
            .set_default("llm_timeout_secs", 30_i64)?
            .set_default("search_timeout_secs", 20_i64)?
            .set_default("concurrency", 4_i64)?
            .add_source(File::from(file).required(false))
            .add_source(env.try_parsing(true).ignore_empty(true))
            .build()
            .with_context(|| format!("loading settings ({})", file.display()))?;

        let mut settings: Settings = raw.try_deserialize().context("invalid settings")?;
        settings.spider_api_key = non_blank(settings.spider_api_key.take());
        settings.gemini_api_key = non_blank(settings.gemini_api_key.take());
        settings.concurrency = settings.concurrency.max(1);
        Ok(settings)
    }

    /// The spider.cloud key; live runs cannot proceed without it.
    pub fn spider_key(&self) -> Result<&str> {
        self.spider_api_key
            .as_deref()
            .ok_or_else(|| anyhow!("SPIDER_API_KEY is not set (environment or {})", CONFIG_FILE))
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            fetch: Duration::from_secs(self.fetch_timeout_secs),
            llm: Duration::from_secs(self.llm_timeout_secs),
            search: Duration::from_secs(self.search_timeout_secs),
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(vars: &[(&str, &str)]) -> Environment {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Environment::default().source(Some(map))
    }

    #[test]
    fn defaults_without_file_or_env() {
        let dir = tempfile::tempdir().unwrap();
        let s = Settings::load_from(&dir.path().join(CONFIG_FILE), env(&[])).unwrap();
        assert_eq!(s.target_url, DEFAULT_TARGET_URL);
        assert_eq!(s.output_path, PathBuf::from(DEFAULT_OUTPUT_PATH));
        assert_eq!(s.gemini_model, DEFAULT_MODEL);
        assert_eq!(s.concurrency, 4);
        assert_eq!(s.timeouts().llm, Duration::from_secs(30));
        assert!(s.gemini_api_key.is_none());
        assert!(s.spider_key().is_err());
    }

    #[test]
    fn environment_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join(CONFIG_FILE);
        std::fs::write(&file, "concurrency = 2\ngemini_model = \"gemini-2.0-flash\"\nllm_timeout_secs = 45\n").unwrap();

        let s = Settings::load_from(
            &file,
            env(&[("CONCURRENCY", "8"), ("SPIDER_API_KEY", "sk-test"), ("GEMINI_API_KEY", "  ")]),
        )
        .unwrap();
        assert_eq!(s.concurrency, 8);
        assert_eq!(s.gemini_model, "gemini-2.0-flash");
        assert_eq!(s.timeouts().llm, Duration::from_secs(45));
        assert_eq!(s.spider_key().unwrap(), "sk-test");
        assert!(s.gemini_api_key.is_none());
    }

    #[test]
    fn zero_concurrency_is_raised() {
        let dir = tempfile::tempdir().unwrap();
        let s = Settings::load_from(&dir.path().join(CONFIG_FILE), env(&[("CONCURRENCY", "0")])).unwrap();
        assert_eq!(s.concurrency, 1);
    }
}
