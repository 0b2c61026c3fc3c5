//! Contracts for the external services the review engine calls out to

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::types::{Prediction, SessionMessage};

/// Price data read off a chart image by the vision model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisionExtraction {
    pub actual_high: f64,
    pub actual_low: f64,
    pub actual_close: f64,
    /// Free-text notes from the model; shown to the user, never stored on the outcome
    #[serde(alias = "analysis", default)]
    pub rationale_text: String,
}

/// Reads actual high/low/close from a chart screenshot.
///
/// Errors are for hard transport or parse failures only; an ambiguous
/// read is returned as data and judged by the caller.
#[async_trait]
pub trait VisionExtractor: Send + Sync {
    async fn extract_outcome(
        &self,
        image: &[u8],
        reference: &Prediction,
    ) -> Result<VisionExtraction>;
}

/// One stateless turn of assistant chat
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system_prompt: String,
    pub history: Vec<SessionMessage>,
    pub user_text: String,
    pub image: Option<Vec<u8>>,
}

#[async_trait]
pub trait ChatAssistant: Send + Sync {
    async fn converse(&self, request: ChatRequest) -> Result<String>;
}

/// Persists uploaded image bytes and hands back a reference to them
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn save(&self, bytes: &[u8], file_name: &str) -> Result<String>;
}
