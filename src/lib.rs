// TradeReview - review and accuracy scoring for AI trading calls
// Extracts predictions from assistant conversations, collects the actual
// market outcome (typed in or read off a chart image), and grades each call.

#![deny(clippy::unwrap_used)]

pub mod config;
pub mod db;
pub mod llm;
pub mod review;
pub mod storage;

// Re-export commonly used items
pub use config::Config;
pub use review::{ReviewEngine, ReviewError, ReviewResult, ReviewSession, ReviewSource};
