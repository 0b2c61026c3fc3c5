//! Outcome resolution from direct input or a chart image

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{info, warn};

use super::collaborators::VisionExtractor;
use super::errors::ReviewResult;
use super::types::{Outcome, Prediction};

/// Result of trying to read an outcome from an image
#[derive(Debug, Clone, PartialEq)]
pub enum VisionResolution {
    Resolved { outcome: Outcome, rationale: String },
    /// Soft failure: the conversation carries on without an outcome
    Unavailable { reason: String },
}

impl VisionResolution {
    pub fn outcome(&self) -> Option<Outcome> {
        match self {
            VisionResolution::Resolved { outcome, .. } => Some(*outcome),
            VisionResolution::Unavailable { .. } => None,
        }
    }
}

/// Normalizes outcome input into a validated `Outcome`
pub struct OutcomeResolver {
    vision: Arc<dyn VisionExtractor>,
    timeout: Duration,
}

impl OutcomeResolver {
    pub fn new(vision: Arc<dyn VisionExtractor>, timeout: Duration) -> Self {
        Self { vision, timeout }
    }

    /// Direct path: user-typed numbers. Fails with a validation error.
    pub fn resolve_direct(
        actual_high: f64,
        actual_low: f64,
        actual_close: f64,
    ) -> ReviewResult<Outcome> {
        Outcome::new(actual_high, actual_low, actual_close)
    }

    /// Vision path. Never fails: transport errors, timeouts and values that
    /// do not validate all come back as `Unavailable`.
    pub async fn resolve_from_image(
        &self,
        image: &[u8],
        reference: &Prediction,
    ) -> VisionResolution {
        info!(
            "Extracting outcome from chart image ({} bytes, reference {})",
            image.len(),
            reference.source_message_id
        );

        let extraction = match timeout(self.timeout, self.vision.extract_outcome(image, reference)).await {
            Ok(Ok(extraction)) => extraction,
            Ok(Err(e)) => {
                warn!("Vision extraction failed: {:#}", e);
                return VisionResolution::Unavailable {
                    reason: format!("image recognition failed: {}", e),
                };
            }
            Err(_) => {
                warn!("Vision extraction timed out after {:?}", self.timeout);
                return VisionResolution::Unavailable {
                    reason: format!("image recognition timed out after {}s", self.timeout.as_secs()),
                };
            }
        };

        match Outcome::new(
            extraction.actual_high,
            extraction.actual_low,
            extraction.actual_close,
        ) {
            Ok(outcome) => {
                info!(
                    "Vision extracted outcome high={} low={} close={}",
                    outcome.actual_high, outcome.actual_low, outcome.actual_close
                );
                VisionResolution::Resolved {
                    outcome,
                    rationale: extraction.rationale_text,
                }
            }
            Err(e) => {
                warn!("Vision extraction returned invalid prices: {}", e);
                VisionResolution::Unavailable {
                    reason: e.to_string(),
                }
            }
        }
    }
}
