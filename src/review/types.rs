//! Core review data model: predictions, outcomes, and review sessions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::{ReviewError, ReviewResult};

/// Directional call made by the assistant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
    Hold,
}

impl Direction {
    /// Long and short calls commit to a move; hold does not
    pub fn is_directional(&self) -> bool {
        !matches!(self, Direction::Hold)
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Long => write!(f, "long"),
            Direction::Short => write!(f, "short"),
            Direction::Hold => write!(f, "hold"),
        }
    }
}

/// Structured trading call extracted from assistant text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub support_level: f64,
    pub resistance_level: f64,
    pub direction: Direction,
    /// 0.0 when the assistant did not state one
    pub stop_loss: f64,
    /// 0.0 when the assistant did not state one
    pub target: f64,
    pub rationale_text: String,
    pub source_message_id: String,
    pub source_image_ref: Option<String>,
}

impl Prediction {
    pub fn midpoint(&self) -> f64 {
        (self.support_level + self.resistance_level) / 2.0
    }

    /// Whether `price` lies inside [support, resistance]
    pub fn contains(&self, price: f64) -> bool {
        price >= self.support_level && price <= self.resistance_level
    }
}

/// Realized market high/low/close used to grade a prediction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub actual_high: f64,
    pub actual_low: f64,
    pub actual_close: f64,
}

impl Outcome {
    /// Validate raw numbers into an outcome.
    ///
    /// All values must be finite and positive, and low must not exceed high.
    /// The close is not required to lie inside [low, high].
    pub fn new(actual_high: f64, actual_low: f64, actual_close: f64) -> ReviewResult<Self> {
        for (field, value) in [
            ("actual_high", actual_high),
            ("actual_low", actual_low),
            ("actual_close", actual_close),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ReviewError::validation_error(
                    field.to_string(),
                    format!("must be a positive number, got {}", value),
                ));
            }
        }

        if actual_low > actual_high {
            return Err(ReviewError::validation_error(
                "actual_low".to_string(),
                format!(
                    "low {} is greater than high {}",
                    actual_low, actual_high
                ),
            ));
        }

        Ok(Self {
            actual_high,
            actual_low,
            actual_close,
        })
    }
}

/// A prediction paired with its eventual outcome and accuracy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionReview {
    pub prediction: Prediction,
    pub outcome: Option<Outcome>,
    pub accuracy: Option<u8>,
}

impl PredictionReview {
    pub fn new(prediction: Prediction) -> Self {
        Self {
            prediction,
            outcome: None,
            accuracy: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.outcome.is_some() && self.accuracy.is_some()
    }

    /// Attach an outcome and its score. First attachment wins: returns
    /// false and leaves the review untouched if one is already present.
    pub fn attach(&mut self, outcome: Outcome, accuracy: u8) -> bool {
        if self.outcome.is_some() {
            return false;
        }
        self.outcome = Some(outcome);
        self.accuracy = Some(accuracy.min(100));
        true
    }

    pub fn message_id(&self) -> &str {
        &self.prediction.source_message_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// One message in a chat or review conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMessage {
    pub id: String,
    pub role: Role,
    #[serde(alias = "content")]
    pub text: String,
    #[serde(alias = "imageUrl", default)]
    pub image_ref: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl SessionMessage {
    pub fn user(text: impl Into<String>, image_ref: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::User,
            text: text.into(),
            image_ref,
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::Assistant,
            text: text.into(),
            image_ref: None,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Ongoing,
    Completed,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Ongoing => write!(f, "ongoing"),
            SessionStatus::Completed => write!(f, "completed"),
        }
    }
}

/// What a review session is reviewing
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum ReviewSource {
    /// A chat conversation with zero or more embedded predictions
    Conversation(String),
    /// A single stored chart analysis
    Analysis(String),
}

impl ReviewSource {
    pub fn kind(&self) -> &'static str {
        match self {
            ReviewSource::Conversation(_) => "conversation",
            ReviewSource::Analysis(_) => "analysis",
        }
    }

    pub fn id(&self) -> &str {
        match self {
            ReviewSource::Conversation(id) | ReviewSource::Analysis(id) => id,
        }
    }

    pub fn from_parts(kind: &str, id: &str) -> Option<Self> {
        match kind {
            "conversation" => Some(ReviewSource::Conversation(id.to_string())),
            "analysis" => Some(ReviewSource::Analysis(id.to_string())),
            _ => None,
        }
    }
}

impl std::fmt::Display for ReviewSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind(), self.id())
    }
}

/// Stateful review conversation wrapping one or more prediction reviews
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewSession {
    pub id: Uuid,
    pub source: ReviewSource,
    pub messages: Vec<SessionMessage>,
    /// Keyed by `source_message_id`, kept in extraction order
    pub prediction_reviews: Vec<PredictionReview>,
    pub overall_accuracy: Option<u8>,
    pub quality_score: Option<u8>,
    pub status: SessionStatus,
    /// Optimistic concurrency token, bumped by the repository on every save
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReviewSession {
    pub fn new(source: ReviewSource, predictions: Vec<Prediction>) -> Self {
        let now = Utc::now();
        let mut prediction_reviews: Vec<PredictionReview> = Vec::with_capacity(predictions.len());
        for prediction in predictions {
            if prediction_reviews
                .iter()
                .any(|r| r.message_id() == prediction.source_message_id)
            {
                continue;
            }
            prediction_reviews.push(PredictionReview::new(prediction));
        }

        Self {
            id: Uuid::new_v4(),
            source,
            messages: Vec::new(),
            prediction_reviews,
            overall_accuracy: None,
            quality_score: None,
            status: SessionStatus::Ongoing,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == SessionStatus::Completed
    }

    pub fn push_message(&mut self, message: SessionMessage) {
        self.updated_at = message.timestamp.max(self.updated_at);
        self.messages.push(message);
    }

    /// Number of predictions still waiting for an outcome
    pub fn missing_outcomes(&self) -> usize {
        self.prediction_reviews
            .iter()
            .filter(|r| !r.is_resolved())
            .count()
    }

    pub fn review_for(&self, source_message_id: &str) -> Option<&PredictionReview> {
        self.prediction_reviews
            .iter()
            .find(|r| r.message_id() == source_message_id)
    }

    /// First prediction, used as the magnitude reference for vision extraction
    pub fn reference_prediction(&self) -> Option<&Prediction> {
        self.prediction_reviews.first().map(|r| &r.prediction)
    }
}

/// Chat conversation read from the external record store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConversation {
    pub id: String,
    pub title: String,
    pub messages: Vec<SessionMessage>,
}

/// Single stored chart analysis read from the external record store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceAnalysis {
    pub id: String,
    pub stock_code: Option<String>,
    pub date: String,
    pub image_ref: String,
    pub user_input: String,
    pub support_level: f64,
    pub resistance_level: f64,
    pub direction: Direction,
    pub stop_loss: f64,
    pub target: f64,
    pub reasoning: String,
}

impl SourceAnalysis {
    pub fn to_prediction(&self) -> Prediction {
        Prediction {
            support_level: self.support_level,
            resistance_level: self.resistance_level,
            direction: self.direction,
            stop_loss: self.stop_loss,
            target: self.target,
            rationale_text: self.reasoning.clone(),
            source_message_id: self.id.clone(),
            source_image_ref: Some(self.image_ref.clone()).filter(|r| !r.is_empty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prediction(id: &str) -> Prediction {
        Prediction {
            support_level: 100.0,
            resistance_level: 120.0,
            direction: Direction::Long,
            stop_loss: 90.0,
            target: 130.0,
            rationale_text: String::new(),
            source_message_id: id.to_string(),
            source_image_ref: None,
        }
    }

    #[test]
    fn test_outcome_validation() {
        assert!(Outcome::new(120.0, 100.0, 110.0).is_ok());
        // Close outside the range is accepted
        assert!(Outcome::new(119.0, 99.0, 125.0).is_ok());
        assert!(Outcome::new(100.0, 100.0, 100.0).is_ok());

        let err = Outcome::new(100.0, 120.0, 110.0).unwrap_err();
        assert!(matches!(err, ReviewError::Validation { ref field, .. } if field == "actual_low"));

        assert!(Outcome::new(0.0, 0.0, 1.0).is_err());
        assert!(Outcome::new(120.0, -1.0, 110.0).is_err());
        assert!(Outcome::new(f64::NAN, 100.0, 110.0).is_err());
        assert!(Outcome::new(f64::INFINITY, 100.0, 110.0).is_err());
    }

    #[test]
    fn test_attach_is_first_wins() {
        let mut review = PredictionReview::new(prediction("m1"));
        let first = Outcome::new(119.0, 99.0, 125.0).unwrap();
        let second = Outcome::new(140.0, 80.0, 85.0).unwrap();

        assert!(review.attach(first, 100));
        assert!(!review.attach(second, 0));
        assert_eq!(review.outcome, Some(first));
        assert_eq!(review.accuracy, Some(100));
    }

    #[test]
    fn test_session_deduplicates_predictions_by_message_id() {
        let session = ReviewSession::new(
            ReviewSource::Conversation("c1".to_string()),
            vec![prediction("m1"), prediction("m1"), prediction("m2")],
        );
        assert_eq!(session.prediction_reviews.len(), 2);
        assert_eq!(session.missing_outcomes(), 2);
        assert_eq!(session.status, SessionStatus::Ongoing);
        assert!(session.review_for("m2").is_some());
    }

    #[test]
    fn test_review_source_round_trip_parts() {
        let source = ReviewSource::Analysis("a-1".to_string());
        assert_eq!(source.kind(), "analysis");
        assert_eq!(
            ReviewSource::from_parts(source.kind(), source.id()),
            Some(source)
        );
        assert_eq!(ReviewSource::from_parts("trade", "x"), None);
    }
}
