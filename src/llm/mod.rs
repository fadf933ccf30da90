//! Image extraction through multimodal LLMs.
//!
//! Defines the `ImageExtractor` trait, the fixed instruction and response
//! schema shared by every provider, and implementations for Gemini and
//! OpenAI. `bridge` wraps an extractor with the busy gate used by the
//! dashboard.

pub mod bridge;
pub mod gemini;
pub mod openai;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Value};

use crate::types::ExtractionResult;

/// MIME type assumed when the upload does not say.
pub const DEFAULT_IMAGE_MIME: &str = "image/jpeg";

/// Instruction sent alongside the image. The paper logs are in Spanish.
pub const EXTRACTION_PROMPT: &str = "Analiza esta tabla de regulación de frecuencia. \
Extrae el porcentaje de carga para las unidades G1, G2, G3, G4 y G5. \
También identifica el porcentaje de Regulación Primaria (RPF), el porcentaje \
de Regulación Secundaria (RSF) y la Disponibilidad Programada al OC (MW).";

/// Abstraction over multimodal models that read the regulation sheet.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageExtractor: Send + Sync {
    /// Read unit loads and global settings from an image.
    async fn extract(&self, image: &ImageData) -> Result<ExtractionResult>;

    /// Model identifier string.
    fn model_name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Image payload
// ---------------------------------------------------------------------------

/// A base64-encoded image ready to embed in a request.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageData {
    pub mime_type: String,
    pub base64: String,
}

impl ImageData {
    /// Accept either a data URL (`data:image/png;base64,....`) or bare base64.
    ///
    /// Fails if the payload is empty or not valid base64.
    pub fn from_data_url(input: &str) -> Result<Self> {
        let input = input.trim();
        let (mime_type, payload) = match input.split_once(',') {
            Some((header, payload)) if header.starts_with("data:") => {
                let mime = header
                    .trim_start_matches("data:")
                    .split(';')
                    .next()
                    .filter(|m| !m.is_empty())
                    .unwrap_or(DEFAULT_IMAGE_MIME);
                (mime.to_string(), payload)
            }
            _ => (DEFAULT_IMAGE_MIME.to_string(), input),
        };

        anyhow::ensure!(!payload.is_empty(), "Image payload is empty");
        BASE64
            .decode(payload)
            .context("Image payload is not valid base64")?;

        Ok(Self {
            mime_type,
            base64: payload.to_string(),
        })
    }

    /// Encode raw image bytes.
    pub fn from_bytes(bytes: &[u8], mime_type: Option<&str>) -> Result<Self> {
        anyhow::ensure!(!bytes.is_empty(), "Image payload is empty");
        Ok(Self {
            mime_type: mime_type.unwrap_or(DEFAULT_IMAGE_MIME).to_string(),
            base64: BASE64.encode(bytes),
        })
    }

    /// Render back to a data URL (the form OpenAI expects).
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64)
    }
}

// ---------------------------------------------------------------------------
// Response schema + parsing
// ---------------------------------------------------------------------------

/// Response schema in standard JSON Schema form.
pub fn response_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "units": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "name": { "type": "string" },
                        "loadPercent": { "type": "number" }
                    },
                    "required": ["name", "loadPercent"],
                    "additionalProperties": false
                }
            },
            "globalRPF": { "type": "number" },
            "globalRSF": { "type": "number" },
            "programmedMW": { "type": "number" }
        },
        "required": ["units", "globalRPF", "globalRSF", "programmedMW"],
        "additionalProperties": false
    })
}

/// Parse the model's JSON answer.
///
/// Tolerates a surrounding Markdown code fence; empty text is an error.
pub fn parse_extraction(text: &str) -> Result<ExtractionResult> {
    let trimmed = text.trim();
    anyhow::ensure!(!trimmed.is_empty(), "Empty extraction response");

    let body = strip_code_fence(trimmed);
    serde_json::from_str(body).context("Extraction response does not match the schema")
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the info string ("json") on the opening line.
    let rest = match rest.find('\n') {
        Some(nl) => &rest[nl + 1..],
        None => rest,
    };
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
