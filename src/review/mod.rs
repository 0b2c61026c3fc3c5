//! Review & accuracy scoring engine
//! Turns assistant trading calls into graded reviews:
//! - Extractor: structured predictions from free-form assistant text
//! - Outcome resolver: actual high/low/close typed in or read off a chart image
//! - Scorer: per-prediction accuracy and session quality
//! - Session: the ongoing → completed review state machine

pub mod collaborators;
pub mod errors;
pub mod extractor;
pub mod history;
pub mod outcome;
pub mod prompts;
pub mod repository;
pub mod sanitize;
pub mod scorer;
pub mod session;
pub mod types;

// Re-export commonly used types
pub use collaborators::{ChatAssistant, ChatRequest, ImageStore, VisionExtraction, VisionExtractor};
pub use errors::{ReviewError, ReviewResult};
pub use extractor::{LabelSet, LabeledTextExtractor, PredictionExtractor, StructuredBlockExtractor};
pub use outcome::{OutcomeResolver, VisionResolution};
pub use prompts::ReviewPrompts;
pub use repository::{
    InMemoryReviewRepository, InMemorySourceStore, PgReviewRepository, PgSourceStore,
    ReviewRepository, SourceStore,
};
pub use scorer::{AccuracyScorer, ScoringPreset};
pub use session::{ImageUpload, ReviewCollaborators, ReviewConfig, ReviewEngine};
pub use types::{
    Direction, Outcome, Prediction, PredictionReview, ReviewSession, ReviewSource, Role,
    SessionMessage, SessionStatus, SourceAnalysis, SourceConversation,
};
