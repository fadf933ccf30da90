//! Busy-gated wrapper around an `ImageExtractor`.
//!
//! At most one extraction is outstanding at a time. Failures of any kind
//! are logged and swallowed: the caller gets `None` and leaves its state
//! untouched.

use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{ImageData, ImageExtractor};
use crate::types::ExtractionResult;

pub struct ExtractionBridge {
    extractor: Box<dyn ImageExtractor>,
    busy: AtomicBool,
}

/// Marks an extraction as in progress. Dropping it clears the busy flag,
/// whether or not the extraction succeeded.
#[must_use]
pub struct BusyGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

impl ExtractionBridge {
    pub fn new(extractor: Box<dyn ImageExtractor>) -> Self {
        Self {
            extractor,
            busy: AtomicBool::new(false),
        }
    }

    /// Whether an extraction is currently running.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Claim the busy flag. `None` if another extraction holds it.
    pub fn begin(&self) -> Option<BusyGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| BusyGuard { flag: &self.busy })
    }

    /// Run one extraction. Never retries; every failure becomes `None`.
    pub async fn extract(&self, image: &ImageData) -> Option<ExtractionResult> {
        let request_id = Uuid::new_v4();
        info!(%request_id, mime = %image.mime_type, bytes = image.base64.len(), "Extraction started");

        match self.extractor.extract(image).await {
            Ok(result) => {
                if result.units.is_empty() {
                    warn!(%request_id, "Extraction returned no unit rows");
                }
                info!(
                    %request_id,
                    units = result.units.len(),
                    rpf = result.global_rpf,
                    rsf = result.global_rsf,
                    programmed_mw = result.programmed_mw,
                    "Extraction succeeded"
                );
                Some(result)
            }
            Err(e) => {
                error!(%request_id, error = %format!("{e:#}"), "Extraction failed");
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockImageExtractor;

    fn image() -> ImageData {
        ImageData::from_bytes(b"jpeg", None).unwrap()
    }

    #[test]
    fn test_busy_gate() {
        let bridge = ExtractionBridge::new(Box::new(MockImageExtractor::new()));
        assert!(!bridge.is_busy());

        let guard = bridge.begin().expect("first claim succeeds");
        assert!(bridge.is_busy());
        assert!(bridge.begin().is_none());

        drop(guard);
        assert!(!bridge.is_busy());
        assert!(bridge.begin().is_some());
    }

    #[tokio::test]
    async fn test_success_passes_result_through() {
        let mut mock = MockImageExtractor::new();
        mock.expect_extract()
            .times(1)
            .returning(|_| Ok(ExtractionResult::sample()));

        let bridge = ExtractionBridge::new(Box::new(mock));
        let result = bridge.extract(&image()).await;
        assert_eq!(result, Some(ExtractionResult::sample()));
    }

    #[tokio::test]
    async fn test_failure_is_swallowed_without_retry() {
        let mut mock = MockImageExtractor::new();
        mock.expect_extract()
            .times(1)
            .returning(|_| Err(anyhow::anyhow!("connection reset")));

        let bridge = ExtractionBridge::new(Box::new(mock));
        assert!(bridge.extract(&image()).await.is_none());
    }

    #[tokio::test]
    async fn test_guard_released_after_failure() {
        let mut mock = MockImageExtractor::new();
        mock.expect_extract()
            .returning(|_| Err(anyhow::anyhow!("Empty extraction response")));

        let bridge = ExtractionBridge::new(Box::new(mock));
        {
            let _guard = bridge.begin().unwrap();
            assert!(bridge.extract(&image()).await.is_none());
        }
        assert!(!bridge.is_busy());
    }
}
