//! Mock extractor for integration testing.
//!
//! Provides a deterministic `ImageExtractor` that returns a canned result
//! (or a forced error), counts calls, and can be held open to observe the
//! busy gate — all in-memory with no external dependencies.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use regmargin::llm::{ImageData, ImageExtractor};
use regmargin::types::{ExtractedUnit, ExtractionResult};

pub struct MockExtractor {
    result: Arc<Mutex<Option<ExtractionResult>>>,
    /// If set, every extraction returns this error.
    force_error: Arc<Mutex<Option<String>>>,
    calls: Arc<Mutex<Vec<ImageData>>>,
    /// When set, extraction waits for a notification before answering.
    hold: Option<Arc<Notify>>,
}

impl MockExtractor {
    pub fn returning(result: ExtractionResult) -> Self {
        Self {
            result: Arc::new(Mutex::new(Some(result))),
            force_error: Arc::new(Mutex::new(None)),
            calls: Arc::new(Mutex::new(Vec::new())),
            hold: None,
        }
    }

    pub fn failing(msg: &str) -> Self {
        let mock = Self::returning(sheet());
        *mock.force_error.lock().unwrap() = Some(msg.to_string());
        mock
    }

    /// Block each extraction until `release` is notified.
    pub fn held(mut self, release: Arc<Notify>) -> Self {
        self.hold = Some(release);
        self
    }

    pub fn calls(&self) -> Arc<Mutex<Vec<ImageData>>> {
        self.calls.clone()
    }
}

#[async_trait]
impl ImageExtractor for MockExtractor {
    async fn extract(&self, image: &ImageData) -> Result<ExtractionResult> {
        self.calls.lock().unwrap().push(image.clone());

        if let Some(release) = &self.hold {
            release.notified().await;
        }

        if let Some(msg) = self.force_error.lock().unwrap().clone() {
            return Err(anyhow!(msg));
        }
        self.result
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| anyhow!("Empty extraction response"))
    }

    fn model_name(&self) -> &str {
        "mock-vision"
    }
}

/// A sheet with all five units, one of them written unusually, plus a
/// stray row that matches nothing.
pub fn sheet() -> ExtractionResult {
    ExtractionResult {
        units: vec![
            ExtractedUnit { name: "G1".into(), load_percent: 100.0 },
            ExtractedUnit { name: "G2".into(), load_percent: 100.0 },
            ExtractedUnit { name: "g3".into(), load_percent: 100.0 },
            ExtractedUnit { name: "G4".into(), load_percent: 100.0 },
            ExtractedUnit { name: "G5".into(), load_percent: 100.0 },
            ExtractedUnit { name: "TOTAL".into(), load_percent: 500.0 },
        ],
        global_rpf: 3.0,
        global_rsf: 0.0,
        programmed_mw: 80.0,
    }
}
