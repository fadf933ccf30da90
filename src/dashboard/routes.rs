//! Dashboard API route handlers.
//!
//! All endpoints return JSON. State is shared via `Arc<DashboardState>`.
//! Every mutating endpoint answers with the recomputed report so the page
//! can re-render from a single response.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use super::error::ApiError;
use crate::calc::coerce_number;
use crate::llm::bridge::ExtractionBridge;
use crate::llm::ImageData;
use crate::session::{GlobalsUpdate, Session};
use crate::types::MarginReport;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct DashboardState {
    pub session: RwLock<Session>,
    /// `None` when no API key is configured.
    pub bridge: Option<ExtractionBridge>,
}

impl DashboardState {
    pub fn new(session: Session, bridge: Option<ExtractionBridge>) -> Self {
        Self {
            session: RwLock::new(session),
            bridge,
        }
    }

    pub fn processing(&self) -> bool {
        self.bridge.as_ref().map(|b| b.is_busy()).unwrap_or(false)
    }

    pub async fn report_response(&self) -> ReportResponse {
        let report = self.session.read().await.report();
        ReportResponse {
            report,
            processing: self.processing(),
            extraction_enabled: self.bridge.is_some(),
        }
    }
}

pub type AppState = Arc<DashboardState>;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// A form value that may arrive as a JSON number or as raw input text.
/// Any other JSON value (null, bool, array, object) counts as 0.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum NumberInput {
    Number(f64),
    Text(String),
    Other(serde_json::Value),
}

impl NumberInput {
    pub fn value(&self) -> f64 {
        match self {
            NumberInput::Number(n) if n.is_finite() => *n,
            NumberInput::Number(_) => 0.0,
            NumberInput::Text(s) => coerce_number(s),
            NumberInput::Other(_) => 0.0,
        }
    }
}

/// A field that is present always yields `Some`, even when it is `null`.
/// Only an absent field stays `None` (via `#[serde(default)]`).
fn present<'de, D>(deserializer: D) -> Result<Option<NumberInput>, D::Error>
where
    D: Deserializer<'de>,
{
    NumberInput::deserialize(deserializer).map(Some)
}

fn coerce(input: &Option<NumberInput>) -> f64 {
    input.as_ref().map(NumberInput::value).unwrap_or(0.0)
}

#[derive(Debug, Deserialize)]
pub struct LoadBody {
    #[serde(default, deserialize_with = "present")]
    pub value: Option<NumberInput>,
}

#[derive(Debug, Deserialize)]
pub struct RegulationBody {
    #[serde(default)]
    pub primary: Option<bool>,
    #[serde(default)]
    pub secondary: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct SettingsBody {
    #[serde(default, deserialize_with = "present")]
    pub rpf: Option<NumberInput>,
    #[serde(default, deserialize_with = "present")]
    pub rsf: Option<NumberInput>,
    #[serde(default, deserialize_with = "present")]
    pub programmed_mw: Option<NumberInput>,
}

#[derive(Debug, Deserialize)]
pub struct ExtractBody {
    /// Data URL or bare base64.
    pub image: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportResponse {
    #[serde(flatten)]
    pub report: MarginReport,
    pub processing: bool,
    pub extraction_enabled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractResponse {
    pub applied: bool,
    pub matched: Vec<String>,
    pub unmatched: Vec<String>,
    pub report: ReportResponse,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /api/report
pub async fn get_report(State(state): State<AppState>) -> Json<ReportResponse> {
    Json(state.report_response().await)
}

/// PUT /api/units/:id/load
pub async fn put_load(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<LoadBody>,
) -> Result<Json<ReportResponse>, ApiError> {
    state.session.write().await.set_load(&id, coerce(&body.value))?;
    Ok(Json(state.report_response().await))
}

/// PUT /api/units/:id/regulation
pub async fn put_regulation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<RegulationBody>,
) -> Result<Json<ReportResponse>, ApiError> {
    state
        .session
        .write()
        .await
        .set_regulation(&id, body.primary, body.secondary)?;
    Ok(Json(state.report_response().await))
}

/// PUT /api/settings
pub async fn put_settings(
    State(state): State<AppState>,
    Json(body): Json<SettingsBody>,
) -> Json<ReportResponse> {
    state.session.write().await.set_globals(GlobalsUpdate {
        rpf_percent: body.rpf.as_ref().map(NumberInput::value),
        rsf_percent: body.rsf.as_ref().map(NumberInput::value),
        programmed_mw: body.programmed_mw.as_ref().map(NumberInput::value),
    });
    Json(state.report_response().await)
}

/// POST /api/extract
pub async fn post_extract(
    State(state): State<AppState>,
    Json(body): Json<ExtractBody>,
) -> Result<Json<ExtractResponse>, ApiError> {
    let image =
        ImageData::from_data_url(&body.image).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    run_extraction(&state, image).await.map(Json)
}

/// POST /api/extract/raw
pub async fn post_extract_raw(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ExtractResponse>, ApiError> {
    let mime = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
        .filter(|m| m.starts_with("image/"))
        .ok_or_else(|| ApiError::BadRequest("Content-Type must be image/*".into()))?;

    let image =
        ImageData::from_bytes(&body, Some(&mime)).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    run_extraction(&state, image).await.map(Json)
}

/// Claim the busy flag, run the extraction and apply whatever came back.
/// The session lock is not held across the model call.
async fn run_extraction(state: &DashboardState, image: ImageData) -> Result<ExtractResponse, ApiError> {
    let bridge = state.bridge.as_ref().ok_or(ApiError::ExtractionDisabled)?;
    let guard = bridge.begin().ok_or(ApiError::Busy)?;

    let outcome = bridge.extract(&image).await;
    let summary = match outcome {
        Some(result) => Some(state.session.write().await.apply_extraction(&result)),
        None => None,
    };
    drop(guard);

    let applied = summary.is_some();
    let summary = summary.unwrap_or_default();
    if !applied {
        info!("Extraction produced no result; inputs unchanged");
    }

    Ok(ExtractResponse {
        applied,
        matched: summary.matched,
        unmatched: summary.unmatched,
        report: state.report_response().await,
    })
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
