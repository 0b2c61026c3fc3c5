use anyhow::{Context, Result};
use sqlx::PgPool;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use tradereview::llm::LLMClient;
use tradereview::review::extractor::parse_direction;
use tradereview::review::{
    AccuracyScorer, ImageUpload, LabelSet, LabeledTextExtractor, Outcome, PgReviewRepository,
    PgSourceStore, Prediction, PredictionExtractor, ReviewCollaborators, ReviewEngine,
    ReviewSession, ReviewSource, SessionMessage, StructuredBlockExtractor,
};
use tradereview::storage::FsImageStore;
use tradereview::Config;

use super::PresetArg;

/// Wire the engine to Postgres, the LLM endpoint and the image directory
pub fn build_engine(config: &Config, pool: PgPool) -> Result<ReviewEngine> {
    let llm = Arc::new(LLMClient::from_config(config)?);
    let collaborators = ReviewCollaborators {
        repository: Arc::new(PgReviewRepository::new(pool.clone())),
        sources: Arc::new(PgSourceStore::new(pool)),
        vision: llm.clone(),
        chat: llm,
        images: Arc::new(FsImageStore::new(&config.storage.image_dir)),
    };
    ReviewEngine::new(collaborators, config.review_config())
}

fn print_session(session: &ReviewSession) {
    println!("\n📋 Review {} ({}, {})", session.id, session.source, session.status);
    for (i, review) in session.prediction_reviews.iter().enumerate() {
        let p = &review.prediction;
        let accuracy = review
            .accuracy
            .map(|a| format!("{}%", a))
            .unwrap_or_else(|| "pending".to_string());
        println!(
            "  #{} {} S {} | R {} | SL {} | T {} -> {}",
            i + 1,
            p.direction,
            p.support_level,
            p.resistance_level,
            p.stop_loss,
            p.target,
            accuracy
        );
    }
    if let (Some(overall), Some(quality)) = (session.overall_accuracy, session.quality_score) {
        println!("  Overall accuracy: {}%  Quality score: {}", overall, quality);
    }
}

fn print_last_reply(session: &ReviewSession) {
    if let Some(message) = session.messages.last() {
        println!("\n{}", message.text);
    }
}

/// Start a conversation review
pub async fn start(engine: &ReviewEngine, conversation_id: &str) -> Result<()> {
    let session = engine.start_conversation_review(conversation_id).await?;
    print_session(&session);
    print_last_reply(&session);
    Ok(())
}

/// Open or create an analysis review
pub async fn open_analysis(engine: &ReviewEngine, analysis_id: &str) -> Result<()> {
    let session = engine.open_analysis_review(analysis_id).await?;
    print_session(&session);
    print_last_reply(&session);
    Ok(())
}

/// Post a message, reading the optional image from disk
pub async fn message(
    engine: &ReviewEngine,
    source: &ReviewSource,
    text: &str,
    image: Option<PathBuf>,
) -> Result<()> {
    let upload = match image {
        Some(path) => {
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("Failed to read image {}", path.display()))?;
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "chart.png".to_string());
            Some(ImageUpload { bytes, file_name })
        }
        None => None,
    };

    let session = engine.post_message(source, text, upload).await?;
    print_last_reply(&session);
    Ok(())
}

/// Submit actual prices directly
pub async fn outcome(
    engine: &ReviewEngine,
    source: &ReviewSource,
    high: f64,
    low: f64,
    close: f64,
) -> Result<()> {
    let session = engine.submit_outcome(source, high, low, close).await?;
    print_last_reply(&session);
    Ok(())
}

/// Complete a review and print its final scores
pub async fn complete(engine: &ReviewEngine, source: &ReviewSource) -> Result<()> {
    let session = engine.complete(source).await?;
    println!("\n✅ Review completed");
    print_session(&session);
    Ok(())
}

pub async fn show(engine: &ReviewEngine, source: &ReviewSource) -> Result<()> {
    let session = engine.get(source).await?;
    print_session(&session);
    for message in &session.messages {
        println!("\n[{}] {}", message.role, message.text);
    }
    Ok(())
}

/// One line per session: source, status, overall accuracy, quality
pub async fn list(engine: &ReviewEngine, limit: usize) -> Result<()> {
    let sessions = engine.list(limit).await?;
    if sessions.is_empty() {
        println!("No review sessions found");
        return Ok(());
    }

    let score = |value: Option<u8>| value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string());
    println!("\n📋 Review sessions (newest first):");
    for session in &sessions {
        println!(
            "  {:<32} {:<10} accuracy {:>3}  quality {:>3}",
            session.source.to_string(),
            session.status.to_string(),
            score(session.overall_accuracy),
            score(session.quality_score)
        );
    }
    Ok(())
}

/// Offline extraction over a message file
pub async fn extract(file: PathBuf, labels: Option<String>, structured: bool) -> Result<()> {
    let content = tokio::fs::read_to_string(&file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let label_name = match labels {
        Some(name) => name,
        None => std::env::var("REVIEW_LABELS").unwrap_or_else(|_| "zh".to_string()),
    };
    let labels = LabelSet::by_name(&label_name)
        .ok_or_else(|| anyhow::anyhow!("Unknown label set '{}' (use zh or en)", label_name))?;

    let messages = match serde_json::from_str::<Vec<SessionMessage>>(&content) {
        Ok(messages) => messages,
        Err(_) => vec![SessionMessage::assistant(content)],
    };

    let extractor: Box<dyn PredictionExtractor> = if structured {
        Box::new(StructuredBlockExtractor::new(labels))
    } else {
        Box::new(LabeledTextExtractor::new(labels)?)
    };

    let predictions = extractor.extract(&messages);
    if predictions.is_empty() {
        warn!("No predictions found in {} message(s)", messages.len());
    }
    info!("Extracted {} prediction(s)", predictions.len());
    println!("{}", serde_json::to_string_pretty(&predictions)?);
    Ok(())
}

/// Raw prediction and outcome values for offline scoring
pub struct ScoreInput {
    pub support: f64,
    pub resistance: f64,
    pub direction: String,
    pub stop_loss: f64,
    pub target: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

/// Offline scoring of one prediction
pub fn score(input: ScoreInput, preset: PresetArg) -> Result<()> {
    let direction = parse_direction(&input.direction)
        .ok_or_else(|| anyhow::anyhow!("Unknown direction '{}'", input.direction))?;
    let outcome = Outcome::new(input.high, input.low, input.close)?;

    let prediction = Prediction {
        support_level: input.support,
        resistance_level: input.resistance,
        direction,
        stop_loss: input.stop_loss,
        target: input.target,
        rationale_text: String::new(),
        source_message_id: "cli".to_string(),
        source_image_ref: None,
    };

    match preset {
        PresetArg::LevelBands => {
            let breakdown = AccuracyScorer::level_breakdown(&prediction, &outcome);
            println!(
                "Support: {}  Resistance: {}  Direction: {}",
                breakdown.support, breakdown.resistance, breakdown.direction
            );
            println!("Accuracy: {}%", breakdown.total());
        }
        PresetArg::DirectionOnly => {
            let threshold = std::env::var("HOLD_MOVE_THRESHOLD")
                .ok()
                .map(|v| v.parse::<f64>())
                .transpose()
                .context("Invalid HOLD_MOVE_THRESHOLD value")?
                .unwrap_or(10.0);
            let scorer = AccuracyScorer::direction_only().with_hold_move_threshold(threshold);
            println!("Accuracy: {}%", scorer.score(&prediction, &outcome));
        }
    }
    Ok(())
}
