use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use super::{FetchOptions, Fetcher, LanguageModel, StructuredExtractor};
use crate::error::CollaboratorError;

const GEMINI_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
/// Page text handed to the model is capped; roundups run long.
const MAX_PAGE_CHARS: usize = 120_000;

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<RequestContent<'a>>,
    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Serialize)]
struct RequestContent<'a> {
    parts: Vec<RequestPart<'a>>,
}

#[derive(Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
    response_schema: Value,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

impl GenerateResponse {
    fn text(self) -> String {
        self.candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| {
                c.parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default()
    }
}

/// Gemini `generateContent` client.
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl GeminiClient {
    pub fn new(api_key: &str, model: &str) -> Self {
        GeminiClient {
            http: reqwest::Client::new(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }

    async fn call(
        &self,
        prompt: &str,
        generation_config: Option<GenerationConfig>,
    ) -> Result<String, CollaboratorError> {
        let url = format!("{}/models/{}:generateContent", GEMINI_BASE, self.model);
        let body = GenerateRequest {
            contents: vec![RequestContent {
                parts: vec![RequestPart { text: prompt }],
            }],
            generation_config,
        };
        // Key goes in a header so it never shows up in error messages.
        let response: GenerateResponse = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.text().trim().to_string())
    }

    /// Ask for JSON constrained by `schema`.
    pub async fn generate_json(&self, prompt: &str, schema: &Value) -> Result<String, CollaboratorError> {
        let config = GenerationConfig {
            response_mime_type: "application/json",
            response_schema: gemini_schema(schema),
        };
        self.call(prompt, Some(config)).await
    }
}

#[async_trait]
impl LanguageModel for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String, CollaboratorError> {
        self.call(prompt, None).await
    }
}

/// Structured extraction: fetch each page as markdown, then have Gemini
/// fill the schema from the page text.
pub struct GeminiExtractor {
    fetcher: Arc<dyn Fetcher>,
    client: Arc<GeminiClient>,
}

impl GeminiExtractor {
    pub fn new(fetcher: Arc<dyn Fetcher>, client: Arc<GeminiClient>) -> Self {
        GeminiExtractor { fetcher, client }
    }
}

#[async_trait]
impl StructuredExtractor for GeminiExtractor {
    async fn extract(
        &self,
        urls: &[String],
        schema: &Value,
        prompt: &str,
    ) -> Result<Option<Value>, CollaboratorError> {
        let mut pages = String::new();
        for url in urls {
            let doc = self.fetcher.fetch(url, &FetchOptions::markdown_only()).await?;
            let Some(md) = doc.markdown.filter(|m| !m.trim().is_empty()) else {
                debug!("no markdown for {}", url);
                continue;
            };
            let text: String = md.chars().take(MAX_PAGE_CHARS).collect();
            pages.push_str(&format!("\n\n--- PAGE {} ---\n{}", url, text));
        }
        if pages.is_empty() {
            return Ok(None);
        }

        let full_prompt = format!("{}\nRespond with JSON only.{}", prompt, pages);
        info!("Requesting structured extraction for {} page(s)", urls.len());
        let reply = self.client.generate_json(&full_prompt, schema).await?;
        parse_json_reply(&reply)
    }
}

/// Gemini's schema dialect rejects `additionalProperties`.
fn gemini_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(k, _)| k.as_str() != "additionalProperties")
                .map(|(k, v)| (k.clone(), gemini_schema(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(gemini_schema).collect()),
        other => other.clone(),
    }
}

fn parse_json_reply(reply: &str) -> Result<Option<Value>, CollaboratorError> {
    let body = reply
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    if body.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(body)
        .map(Some)
        .map_err(|e| CollaboratorError::Malformed(format!("extraction reply is not JSON: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn schema_drops_additional_properties() {
        let schema = json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "accounts": {
                    "type": "array",
                    "items": {"type": "object", "additionalProperties": false}
                }
            }
        });
        let out = gemini_schema(&schema);
        assert!(out.get("additionalProperties").is_none());
        assert!(out["properties"]["accounts"]["items"].get("additionalProperties").is_none());
        assert_eq!(out["properties"]["accounts"]["type"], "array");
    }

    #[test]
    fn response_text_joins_parts() {
        let raw = json!({
            "candidates": [{"content": {"parts": [{"text": "VERIFIED"}, {"text": ": matches"}]}}]
        });
        let resp: GenerateResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(resp.text(), "VERIFIED: matches");

        let empty: GenerateResponse = serde_json::from_value(json!({})).unwrap();
        assert_eq!(empty.text(), "");
    }

    #[test]
    fn json_reply_tolerates_fences() {
        let v = parse_json_reply("```json\n{\"accounts\": []}\n```").unwrap().unwrap();
        assert_eq!(v, json!({"accounts": []}));
        assert!(parse_json_reply("  ").unwrap().is_none());
        assert!(parse_json_reply("not json").is_err());
    }
}
