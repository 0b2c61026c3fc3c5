//! Review session state machine
//!
//! A session moves `ongoing` → `completed` and never back. Every mutating
//! operation follows the same shape: validate input, call collaborators with
//! no session state held, then re-read the session and save it under the
//! repository's version check.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;

use super::collaborators::{ChatAssistant, ChatRequest, ImageStore, VisionExtractor};
use super::errors::{ReviewError, ReviewResult};
use super::extractor::{LabelSet, LabeledTextExtractor, PredictionExtractor};
use super::history::historical_context;
use super::outcome::{OutcomeResolver, VisionResolution};
use super::prompts::ReviewPrompts;
use super::repository::{ReviewRepository, SourceStore};
use super::scorer::{AccuracyScorer, ScoringPreset};
use super::types::{Outcome, ReviewSession, ReviewSource, SessionMessage, SessionStatus};

/// Tunables for the review engine
#[derive(Debug, Clone)]
pub struct ReviewConfig {
    pub labels: LabelSet,
    /// Completed reviews summarized into the chat prompt
    pub history_window: usize,
    pub hold_move_threshold: f64,
    /// Upper bound on any single vision or chat call
    pub collaborator_timeout: Duration,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            labels: LabelSet::default(),
            history_window: 10,
            hold_move_threshold: 10.0,
            collaborator_timeout: Duration::from_secs(60),
        }
    }
}

/// External services the engine depends on
#[derive(Clone)]
pub struct ReviewCollaborators {
    pub repository: Arc<dyn ReviewRepository>,
    pub sources: Arc<dyn SourceStore>,
    pub vision: Arc<dyn VisionExtractor>,
    pub chat: Arc<dyn ChatAssistant>,
    pub images: Arc<dyn ImageStore>,
}

/// Uploaded chart screenshot attached to a user message
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub bytes: Vec<u8>,
    pub file_name: String,
}

pub struct ReviewEngine {
    repository: Arc<dyn ReviewRepository>,
    sources: Arc<dyn SourceStore>,
    chat: Arc<dyn ChatAssistant>,
    images: Arc<dyn ImageStore>,
    resolver: OutcomeResolver,
    extractor: Box<dyn PredictionExtractor>,
    config: ReviewConfig,
}

impl ReviewEngine {
    /// Build an engine using the labeled-text extractor for `config.labels`
    pub fn new(collaborators: ReviewCollaborators, config: ReviewConfig) -> anyhow::Result<Self> {
        let extractor = LabeledTextExtractor::new(config.labels.clone())?;
        Ok(Self::with_extractor(collaborators, config, Box::new(extractor)))
    }

    pub fn with_extractor(
        collaborators: ReviewCollaborators,
        config: ReviewConfig,
        extractor: Box<dyn PredictionExtractor>,
    ) -> Self {
        Self {
            repository: collaborators.repository,
            sources: collaborators.sources,
            chat: collaborators.chat,
            images: collaborators.images,
            resolver: OutcomeResolver::new(collaborators.vision, config.collaborator_timeout),
            extractor,
            config,
        }
    }

    /// Create the review session for a chat conversation.
    ///
    /// Fails with `NotFound` for an unknown conversation and `AlreadyExists`
    /// if it has already been opened for review.
    pub async fn start_conversation_review(
        &self,
        conversation_id: &str,
    ) -> ReviewResult<ReviewSession> {
        let conversation = self
            .sources
            .get_conversation(conversation_id)
            .await?
            .ok_or_else(|| ReviewError::not_found("conversation", conversation_id))?;

        let source = ReviewSource::Conversation(conversation.id.clone());
        if self.repository.get_by_source(&source).await?.is_some() {
            return Err(ReviewError::AlreadyExists {
                source_ref: source.to_string(),
            });
        }

        let predictions = self.extractor.extract(&conversation.messages);
        info!(
            "Extracted {} prediction(s) from conversation {}",
            predictions.len(),
            conversation.id
        );

        let mut session = ReviewSession::new(source, predictions);
        session.push_message(SessionMessage::assistant(ReviewPrompts::conversation_intro(
            session.prediction_reviews.len(),
        )));

        let stored = self.repository.create(&session).await?;
        info!("Started review session {} for {}", stored.id, stored.source);
        Ok(stored)
    }

    /// Existing review for the conversation, or a new one
    pub async fn open_conversation_review(
        &self,
        conversation_id: &str,
    ) -> ReviewResult<ReviewSession> {
        let source = ReviewSource::Conversation(conversation_id.to_string());
        if let Some(existing) = self.repository.get_by_source(&source).await? {
            return Ok(existing);
        }

        match self.start_conversation_review(conversation_id).await {
            // Lost a creation race; the winner's session is the one to use
            Err(ReviewError::AlreadyExists { .. }) => self.get(&source).await,
            other => other,
        }
    }

    /// Existing review for the analysis, or a new one holding its single prediction
    pub async fn open_analysis_review(&self, analysis_id: &str) -> ReviewResult<ReviewSession> {
        let source = ReviewSource::Analysis(analysis_id.to_string());
        if let Some(existing) = self.repository.get_by_source(&source).await? {
            return Ok(existing);
        }

        let analysis = self
            .sources
            .get_analysis(analysis_id)
            .await?
            .ok_or_else(|| ReviewError::not_found("analysis", analysis_id))?;

        let mut session = ReviewSession::new(source.clone(), vec![analysis.to_prediction()]);
        session.push_message(SessionMessage::assistant(ReviewPrompts::analysis_intro(
            &analysis,
            &self.config.labels,
        )));

        match self.repository.create(&session).await {
            Ok(stored) => {
                info!("Started review session {} for {}", stored.id, stored.source);
                Ok(stored)
            }
            Err(ReviewError::AlreadyExists { .. }) => self.get(&source).await,
            Err(e) => Err(e),
        }
    }

    /// Post a user message, optionally with a chart image.
    ///
    /// When the image yields a valid outcome it is attached to every
    /// unresolved prediction and a score summary is appended. Otherwise the
    /// chat assistant answers. Exactly one assistant message is appended per
    /// successful call.
    pub async fn post_message(
        &self,
        source: &ReviewSource,
        user_text: &str,
        image: Option<ImageUpload>,
    ) -> ReviewResult<ReviewSession> {
        if user_text.trim().is_empty() && image.is_none() {
            return Err(ReviewError::validation_error(
                "user_text",
                "message must carry text or an image",
            ));
        }

        let session = self.get(source).await?;
        ensure_ongoing(&session)?;

        let image_ref = match &image {
            Some(upload) => Some(
                self.images
                    .save(&upload.bytes, &upload.file_name)
                    .await
                    .map_err(|e| ReviewError::Storage(format!("{:#}", e)))?,
            ),
            None => None,
        };

        let resolved = match (&image, session.reference_prediction()) {
            (Some(upload), Some(reference)) => {
                match self.resolver.resolve_from_image(&upload.bytes, reference).await {
                    VisionResolution::Resolved { outcome, rationale } => Some((outcome, rationale)),
                    VisionResolution::Unavailable { reason } => {
                        info!("No outcome from image for {}: {}; falling back to chat", source, reason);
                        None
                    }
                }
            }
            _ => None,
        };

        let user_message = SessionMessage::user(user_text, image_ref);

        if let Some((outcome, rationale)) = resolved {
            let labels = &self.config.labels;
            let scorer = self.scorer_for(source);
            return self
                .apply(source, move |session| {
                    attach_outcome(session, outcome, &scorer);
                    let summary = ReviewPrompts::outcome_summary(
                        &outcome,
                        &session.prediction_reviews,
                        Some(rationale.as_str()),
                        labels,
                    );
                    session.push_message(user_message);
                    session.push_message(SessionMessage::assistant(summary));
                })
                .await;
        }

        let history =
            historical_context(self.repository.as_ref(), self.config.history_window, &self.config.labels)
                .await?;
        let request = ChatRequest {
            system_prompt: ReviewPrompts::review_system_prompt(&session, &history, &self.config.labels),
            history: session.messages.clone(),
            user_text: user_text.to_string(),
            image: image.map(|upload| upload.bytes),
        };

        let reply = match timeout(self.config.collaborator_timeout, self.chat.converse(request)).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                warn!("Chat assistant failed for {}: {:#}", source, e);
                return Err(ReviewError::Collaborator(format!("chat assistant failed: {}", e)));
            }
            Err(_) => {
                warn!("Chat assistant timed out for {}", source);
                return Err(ReviewError::Collaborator(format!(
                    "chat assistant timed out after {}s",
                    self.config.collaborator_timeout.as_secs()
                )));
            }
        };

        self.apply(source, move |session| {
            session.push_message(user_message);
            session.push_message(SessionMessage::assistant(reply));
        })
        .await
    }

    /// Attach typed-in actual prices to every unresolved prediction
    pub async fn submit_outcome(
        &self,
        source: &ReviewSource,
        actual_high: f64,
        actual_low: f64,
        actual_close: f64,
    ) -> ReviewResult<ReviewSession> {
        let outcome = OutcomeResolver::resolve_direct(actual_high, actual_low, actual_close)?;
        let scorer = self.scorer_for(source);
        let labels = &self.config.labels;

        self.apply(source, move |session| {
            let attached = attach_outcome(session, outcome, &scorer);
            info!("Attached outcome to {} prediction(s) in session {}", attached, session.id);
            let summary =
                ReviewPrompts::outcome_summary(&outcome, &session.prediction_reviews, None, labels);
            session.push_message(SessionMessage::assistant(summary));
        })
        .await
    }

    /// Finalize the session with overall accuracy and quality score.
    ///
    /// Fails with `IncompleteData` while any prediction lacks an outcome;
    /// nothing is written in that case. Completing an already completed
    /// session returns it unchanged.
    pub async fn complete(&self, source: &ReviewSource) -> ReviewResult<ReviewSession> {
        let mut session = self.get(source).await?;
        if session.is_completed() {
            return Ok(session);
        }

        let missing = session.missing_outcomes();
        if missing > 0 {
            return Err(ReviewError::IncompleteData { missing });
        }

        let overall = AccuracyScorer::overall_accuracy(&session.prediction_reviews);
        let quality = AccuracyScorer::quality_score(&session.prediction_reviews);
        session.overall_accuracy = Some(overall);
        session.quality_score = Some(quality);
        session.status = SessionStatus::Completed;
        session.updated_at = Utc::now();

        let stored = self.repository.save(&session).await?;
        info!(
            "Completed review session {}: overall accuracy {}%, quality {}",
            stored.id, overall, quality
        );
        Ok(stored)
    }

    pub async fn get(&self, source: &ReviewSource) -> ReviewResult<ReviewSession> {
        self.repository
            .get_by_source(source)
            .await?
            .ok_or_else(|| ReviewError::not_found("review session", source))
    }

    pub async fn get_by_id(&self, id: Uuid) -> ReviewResult<ReviewSession> {
        self.repository
            .get_by_id(id)
            .await?
            .ok_or_else(|| ReviewError::not_found("review session", id))
    }

    /// Recently updated review sessions of any status, newest first
    pub async fn list(&self, limit: usize) -> ReviewResult<Vec<ReviewSession>> {
        self.repository.list(limit).await
    }

    fn scorer_for(&self, source: &ReviewSource) -> AccuracyScorer {
        let scorer = match ScoringPreset::for_source(source) {
            ScoringPreset::LevelBands => AccuracyScorer::level_bands(),
            ScoringPreset::DirectionOnly => AccuracyScorer::direction_only(),
        };
        scorer.with_hold_move_threshold(self.config.hold_move_threshold)
    }

    /// Re-read the session, mutate it and save under the version check
    async fn apply<F>(&self, source: &ReviewSource, mutate: F) -> ReviewResult<ReviewSession>
    where
        F: FnOnce(&mut ReviewSession) + Send,
    {
        let mut session = self.get(source).await?;
        ensure_ongoing(&session)?;
        mutate(&mut session);
        self.repository.save(&session).await
    }
}

fn ensure_ongoing(session: &ReviewSession) -> ReviewResult<()> {
    if session.is_completed() {
        return Err(ReviewError::SessionCompleted {
            id: session.id.to_string(),
        });
    }
    Ok(())
}

/// Score and attach `outcome` to every prediction without one. Returns the
/// number newly attached.
fn attach_outcome(session: &mut ReviewSession, outcome: Outcome, scorer: &AccuracyScorer) -> usize {
    session
        .prediction_reviews
        .iter_mut()
        .filter(|review| review.outcome.is_none())
        .map(|review| {
            let accuracy = scorer.score(&review.prediction, &outcome);
            review.attach(outcome, accuracy)
        })
        .filter(|attached| *attached)
        .count()
}
