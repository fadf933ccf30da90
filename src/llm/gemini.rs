//! Google Gemini integration.
//!
//! Implements `ImageExtractor` using the `generateContent` endpoint with
//! inline image data and a structured-output response schema.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use super::{parse_extraction, ImageData, ImageExtractor, EXTRACTION_PROMPT};
use crate::types::ExtractionResult;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_MODEL: &str = "gemini-3-flash-preview";
const DEFAULT_MAX_TOKENS: u32 = 1024;
const DEFAULT_TIMEOUT_SECS: u64 = 120;

// ---------------------------------------------------------------------------
// API types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum Part {
    #[serde(rename_all = "camelCase")]
    Inline { inline_data: InlineData },
    Text { text: String },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: String,
    response_schema: Value,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

/// Gemini's OpenAPI-subset schema (upper-case type names, no
/// `additionalProperties`).
pub fn gemini_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "units": {
                "type": "ARRAY",
                "items": {
                    "type": "OBJECT",
                    "properties": {
                        "name": { "type": "STRING" },
                        "loadPercent": { "type": "NUMBER" }
                    },
                    "required": ["name", "loadPercent"]
                }
            },
            "globalRPF": { "type": "NUMBER" },
            "globalRSF": { "type": "NUMBER" },
            "programmedMW": { "type": "NUMBER" }
        },
        "required": ["units", "globalRPF", "globalRSF", "programmedMW"]
    })
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct GeminiClient {
    http: Client,
    api_key: SecretString,
    model: String,
    max_tokens: u32,
    base_url: String,
    total_calls: AtomicU64,
}

impl GeminiClient {
    pub fn new(
        api_key: SecretString,
        model: Option<String>,
        max_tokens: Option<u32>,
        timeout_secs: Option<u64>,
        base_url: Option<String>,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(
                timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS),
            ))
            .build()
            .context("Failed to build Gemini HTTP client")?;

        Ok(Self {
            http,
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            max_tokens: max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            base_url: base_url
                .unwrap_or_else(|| GEMINI_API_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
            total_calls: AtomicU64::new(0),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model)
    }

    fn build_request(&self, image: &ImageData) -> GenerateRequest {
        GenerateRequest {
            contents: vec![Content {
                parts: vec![
                    Part::Inline {
                        inline_data: InlineData {
                            mime_type: image.mime_type.clone(),
                            data: image.base64.clone(),
                        },
                    },
                    Part::Text {
                        text: EXTRACTION_PROMPT.to_string(),
                    },
                ],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json".to_string(),
                response_schema: gemini_schema(),
                max_output_tokens: self.max_tokens,
            },
        }
    }

    /// One request, no retries. Returns the concatenated response text.
    async fn call_api(&self, image: &ImageData) -> Result<String> {
        let request = self.build_request(image);

        let response = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", self.api_key.expose_secret())
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .context("Gemini request failed")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Gemini API error {status}: {error_text}");
        }

        let body: GenerateResponse = response
            .json()
            .await
            .context("Failed to parse Gemini response")?;

        self.total_calls.fetch_add(1, Ordering::Relaxed);

        if let Some(usage) = &body.usage_metadata {
            debug!(
                model = %self.model,
                prompt_tokens = usage.prompt_token_count,
                output_tokens = usage.candidates_token_count,
                "Gemini usage"
            );
        }

        let text = body
            .candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| {
                c.parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        Ok(text)
    }

    pub fn total_calls(&self) -> u64 {
        self.total_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ImageExtractor for GeminiClient {
    async fn extract(&self, image: &ImageData) -> Result<ExtractionResult> {
        debug!(model = %self.model, mime = %image.mime_type, "Requesting Gemini extraction");
        let text = self.call_api(image).await?;
        parse_extraction(&text)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
