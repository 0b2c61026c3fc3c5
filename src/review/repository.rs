//! Review persistence: repository contract plus in-memory and PostgreSQL stores

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::{postgres::PgRow, types::Json, PgPool, Row};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use super::errors::{ReviewError, ReviewResult};
use super::extractor::parse_direction;
use super::types::{
    PredictionReview, ReviewSession, ReviewSource, SessionMessage, SessionStatus,
    SourceAnalysis, SourceConversation,
};

/// Storage contract for review sessions.
///
/// Implementations serialize writers per session: `save` only succeeds when
/// the stored version matches the version the caller read.
#[async_trait]
pub trait ReviewRepository: Send + Sync {
    async fn get_by_source(&self, source: &ReviewSource) -> ReviewResult<Option<ReviewSession>>;

    async fn get_by_id(&self, id: Uuid) -> ReviewResult<Option<ReviewSession>>;

    /// Insert a new session. `AlreadyExists` if the source already has one.
    /// Returns the stored session (version 1).
    async fn create(&self, session: &ReviewSession) -> ReviewResult<ReviewSession>;

    /// Replace a session atomically. `Conflict` if another writer got there
    /// first, `NotFound` if it was never created. Returns the stored session
    /// with its new version.
    async fn save(&self, session: &ReviewSession) -> ReviewResult<ReviewSession>;

    /// Most recently updated completed sessions, newest first
    async fn recent_completed(&self, limit: usize) -> ReviewResult<Vec<ReviewSession>>;

    /// Most recently updated sessions of any status, newest first
    async fn list(&self, limit: usize) -> ReviewResult<Vec<ReviewSession>>;
}

/// Read access to the conversations and analyses being reviewed
#[async_trait]
pub trait SourceStore: Send + Sync {
    async fn get_conversation(&self, id: &str) -> ReviewResult<Option<SourceConversation>>;

    async fn get_analysis(&self, id: &str) -> ReviewResult<Option<SourceAnalysis>>;
}

/// Process-local repository, used by tests and offline CLI runs
#[derive(Debug, Default)]
pub struct InMemoryReviewRepository {
    sessions: RwLock<HashMap<Uuid, ReviewSession>>,
}

impl InMemoryReviewRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl ReviewRepository for InMemoryReviewRepository {
    async fn get_by_source(&self, source: &ReviewSource) -> ReviewResult<Option<ReviewSession>> {
        let sessions = self.sessions.read().await;
        Ok(sessions.values().find(|s| &s.source == source).cloned())
    }

    async fn get_by_id(&self, id: Uuid) -> ReviewResult<Option<ReviewSession>> {
        Ok(self.sessions.read().await.get(&id).cloned())
    }

    async fn create(&self, session: &ReviewSession) -> ReviewResult<ReviewSession> {
        // Check and insert under one write lock
        let mut sessions = self.sessions.write().await;
        if sessions
            .values()
            .any(|s| s.source == session.source || s.id == session.id)
        {
            return Err(ReviewError::AlreadyExists {
                source_ref: session.source.to_string(),
            });
        }

        let mut stored = session.clone();
        stored.version = 1;
        sessions.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn save(&self, session: &ReviewSession) -> ReviewResult<ReviewSession> {
        let mut sessions = self.sessions.write().await;
        let current = sessions
            .get(&session.id)
            .ok_or_else(|| ReviewError::not_found("review session", session.id))?;

        if current.version != session.version {
            return Err(ReviewError::Conflict {
                id: session.id.to_string(),
            });
        }

        let mut stored = session.clone();
        stored.version += 1;
        sessions.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn recent_completed(&self, limit: usize) -> ReviewResult<Vec<ReviewSession>> {
        let sessions = self.sessions.read().await;
        let mut completed: Vec<ReviewSession> = sessions
            .values()
            .filter(|s| s.is_completed())
            .cloned()
            .collect();
        completed.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        completed.truncate(limit);
        Ok(completed)
    }

    async fn list(&self, limit: usize) -> ReviewResult<Vec<ReviewSession>> {
        let sessions = self.sessions.read().await;
        let mut all: Vec<ReviewSession> = sessions.values().cloned().collect();
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        all.truncate(limit);
        Ok(all)
    }
}

/// Process-local source store
#[derive(Debug, Default)]
pub struct InMemorySourceStore {
    conversations: RwLock<HashMap<String, SourceConversation>>,
    analyses: RwLock<HashMap<String, SourceAnalysis>>,
}

impl InMemorySourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_conversation(&self, conversation: SourceConversation) {
        self.conversations
            .write()
            .await
            .insert(conversation.id.clone(), conversation);
    }

    pub async fn insert_analysis(&self, analysis: SourceAnalysis) {
        self.analyses
            .write()
            .await
            .insert(analysis.id.clone(), analysis);
    }
}

#[async_trait]
impl SourceStore for InMemorySourceStore {
    async fn get_conversation(&self, id: &str) -> ReviewResult<Option<SourceConversation>> {
        Ok(self.conversations.read().await.get(id).cloned())
    }

    async fn get_analysis(&self, id: &str) -> ReviewResult<Option<SourceAnalysis>> {
        Ok(self.analyses.read().await.get(id).cloned())
    }
}

/// PostgreSQL-backed review repository (`review_sessions` table)
#[derive(Debug, Clone)]
pub struct PgReviewRepository {
    pool: PgPool,
}

impl PgReviewRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn session_from_row(row: &PgRow) -> ReviewResult<ReviewSession> {
        let kind: String = row.try_get("source_kind")?;
        let source_id: String = row.try_get("source_id")?;
        let source = ReviewSource::from_parts(&kind, &source_id).ok_or_else(|| {
            ReviewError::Storage(format!("unknown review source kind '{}'", kind))
        })?;

        let status: String = row.try_get("status")?;
        let status = match status.as_str() {
            "ongoing" => SessionStatus::Ongoing,
            "completed" => SessionStatus::Completed,
            other => {
                return Err(ReviewError::Storage(format!(
                    "unknown review status '{}'",
                    other
                )))
            }
        };

        let Json(messages): Json<Vec<SessionMessage>> = row.try_get("messages")?;
        let Json(prediction_reviews): Json<Vec<PredictionReview>> =
            row.try_get("prediction_reviews")?;
        let overall_accuracy: Option<i16> = row.try_get("overall_accuracy")?;
        let quality_score: Option<i16> = row.try_get("quality_score")?;

        Ok(ReviewSession {
            id: row.try_get("id")?,
            source,
            messages,
            prediction_reviews,
            overall_accuracy: overall_accuracy.map(score_from_db),
            quality_score: quality_score.map(score_from_db),
            status,
            version: row.try_get("version")?,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
        })
    }
}

fn score_from_db(value: i16) -> u8 {
    value.clamp(0, 100) as u8
}

const SESSION_COLUMNS: &str = r#"
    id, source_kind, source_id, messages, prediction_reviews,
    overall_accuracy, quality_score, status, version, created_at, updated_at
"#;

#[async_trait]
impl ReviewRepository for PgReviewRepository {
    async fn get_by_source(&self, source: &ReviewSource) -> ReviewResult<Option<ReviewSession>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM review_sessions WHERE source_kind = $1 AND source_id = $2",
            SESSION_COLUMNS
        ))
        .bind(source.kind())
        .bind(source.id())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::session_from_row).transpose()
    }

    async fn get_by_id(&self, id: Uuid) -> ReviewResult<Option<ReviewSession>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM review_sessions WHERE id = $1",
            SESSION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::session_from_row).transpose()
    }

    async fn create(&self, session: &ReviewSession) -> ReviewResult<ReviewSession> {
        let result = sqlx::query(
            r#"
            INSERT INTO review_sessions
            (id, source_kind, source_id, messages, prediction_reviews,
             overall_accuracy, quality_score, status, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 1, $9, $10)
            "#,
        )
        .bind(session.id)
        .bind(session.source.kind())
        .bind(session.source.id())
        .bind(Json(&session.messages))
        .bind(Json(&session.prediction_reviews))
        .bind(session.overall_accuracy.map(i16::from))
        .bind(session.quality_score.map(i16::from))
        .bind(session.status.to_string())
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                info!("Created review session {} for {}", session.id, session.source);
                let mut stored = session.clone();
                stored.version = 1;
                Ok(stored)
            }
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(ReviewError::AlreadyExists {
                    source_ref: session.source.to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, session: &ReviewSession) -> ReviewResult<ReviewSession> {
        // Single statement: the whole record is replaced or nothing is
        let result = sqlx::query(
            r#"
            UPDATE review_sessions
            SET messages = $3,
                prediction_reviews = $4,
                overall_accuracy = $5,
                quality_score = $6,
                status = $7,
                updated_at = $8,
                version = version + 1
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(session.id)
        .bind(session.version)
        .bind(Json(&session.messages))
        .bind(Json(&session.prediction_reviews))
        .bind(session.overall_accuracy.map(i16::from))
        .bind(session.quality_score.map(i16::from))
        .bind(session.status.to_string())
        .bind(session.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return match self.get_by_id(session.id).await? {
                Some(_) => Err(ReviewError::Conflict {
                    id: session.id.to_string(),
                }),
                None => Err(ReviewError::not_found("review session", session.id)),
            };
        }

        debug!("Saved review session {} (version {})", session.id, session.version + 1);
        let mut stored = session.clone();
        stored.version += 1;
        Ok(stored)
    }

    async fn recent_completed(&self, limit: usize) -> ReviewResult<Vec<ReviewSession>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM review_sessions WHERE status = 'completed' ORDER BY updated_at DESC LIMIT $1",
            SESSION_COLUMNS
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::session_from_row).collect()
    }

    async fn list(&self, limit: usize) -> ReviewResult<Vec<ReviewSession>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM review_sessions ORDER BY updated_at DESC LIMIT $1",
            SESSION_COLUMNS
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::session_from_row).collect()
    }
}

#[derive(Debug, Deserialize)]
struct StoredKeyLevels {
    support: f64,
    resistance: f64,
}

/// `ai_analysis` JSON as written by the analysis endpoint
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredAnalysis {
    key_levels: StoredKeyLevels,
    direction: String,
    #[serde(default)]
    stop_loss: f64,
    #[serde(default)]
    target: f64,
    #[serde(default)]
    reasoning: String,
}

/// PostgreSQL-backed source store (`conversations` and `analyses` tables)
#[derive(Debug, Clone)]
pub struct PgSourceStore {
    pool: PgPool,
}

impl PgSourceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SourceStore for PgSourceStore {
    async fn get_conversation(&self, id: &str) -> ReviewResult<Option<SourceConversation>> {
        let row = sqlx::query("SELECT id, title, messages FROM conversations WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let Json(messages): Json<Vec<SessionMessage>> = row.try_get("messages")?;
        Ok(Some(SourceConversation {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            messages,
        }))
    }

    async fn get_analysis(&self, id: &str) -> ReviewResult<Option<SourceAnalysis>> {
        let row = sqlx::query(
            "SELECT id, stock_code, date, image_url, user_input, ai_analysis FROM analyses WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let Json(stored): Json<StoredAnalysis> = row.try_get("ai_analysis")?;
        let direction = parse_direction(&stored.direction).ok_or_else(|| {
            ReviewError::Storage(format!(
                "analysis {} has unknown direction '{}'",
                id, stored.direction
            ))
        })?;

        Ok(Some(SourceAnalysis {
            id: row.try_get("id")?,
            stock_code: row.try_get("stock_code")?,
            date: row.try_get("date")?,
            image_ref: row.try_get("image_url")?,
            user_input: row.try_get("user_input")?,
            support_level: stored.key_levels.support,
            resistance_level: stored.key_levels.resistance,
            direction,
            stop_loss: stored.stop_loss,
            target: stored.target,
            reasoning: stored.reasoning,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::review::types::{Direction, Prediction};

    fn session(source: &str) -> ReviewSession {
        ReviewSession::new(
            ReviewSource::Conversation(source.to_string()),
            vec![Prediction {
                support_level: 100.0,
                resistance_level: 120.0,
                direction: Direction::Long,
                stop_loss: 90.0,
                target: 130.0,
                rationale_text: String::new(),
                source_message_id: "m1".to_string(),
                source_image_ref: None,
            }],
        )
    }

    #[tokio::test]
    async fn test_create_enforces_one_session_per_source() {
        let repo = InMemoryReviewRepository::new();
        let stored = repo.create(&session("c1")).await.unwrap();
        assert_eq!(stored.version, 1);

        let err = repo.create(&session("c1")).await.unwrap_err();
        assert!(matches!(err, ReviewError::AlreadyExists { .. }));

        // Same id under a different source kind is a different source
        let analysis = ReviewSession::new(ReviewSource::Analysis("c1".to_string()), vec![]);
        assert!(repo.create(&analysis).await.is_ok());
        assert_eq!(repo.len().await, 2);
    }

    #[tokio::test]
    async fn test_save_detects_stale_writer() {
        let repo = InMemoryReviewRepository::new();
        let stored = repo.create(&session("c1")).await.unwrap();

        let mut first = stored.clone();
        first.push_message(SessionMessage::assistant("first"));
        let saved = repo.save(&first).await.unwrap();
        assert_eq!(saved.version, 2);

        let mut stale = stored.clone();
        stale.push_message(SessionMessage::assistant("stale"));
        let err = repo.save(&stale).await.unwrap_err();
        assert!(matches!(err, ReviewError::Conflict { .. }));

        let current = repo.get_by_id(stored.id).await.unwrap().unwrap();
        assert_eq!(current.messages.len(), 1);
        assert_eq!(current.messages[0].text, "first");
    }

    #[tokio::test]
    async fn test_save_unknown_session_is_not_found() {
        let repo = InMemoryReviewRepository::new();
        let err = repo.save(&session("c1")).await.unwrap_err();
        assert!(matches!(err, ReviewError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_recent_completed_orders_newest_first() {
        let repo = InMemoryReviewRepository::new();
        for (i, source) in ["a", "b", "c"].iter().enumerate() {
            let mut s = session(source);
            if i != 1 {
                s.status = SessionStatus::Completed;
            }
            s.updated_at = Utc::now() + chrono::Duration::seconds(i as i64);
            repo.create(&s).await.unwrap();
        }

        let recent = repo.recent_completed(10).await.unwrap();
        let ids: Vec<_> = recent.iter().map(|s| s.source.id().to_string()).collect();
        assert_eq!(ids, vec!["c", "a"]);
        assert_eq!(repo.recent_completed(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_includes_every_status_newest_first() {
        let repo = InMemoryReviewRepository::new();
        assert!(repo.is_empty().await);
        assert!(repo.list(10).await.unwrap().is_empty());

        for (i, source) in ["a", "b", "c"].iter().enumerate() {
            let mut s = session(source);
            if i == 0 {
                s.status = SessionStatus::Completed;
            }
            s.updated_at = Utc::now() + chrono::Duration::seconds(i as i64);
            repo.create(&s).await.unwrap();
        }

        let listed = repo.list(10).await.unwrap();
        let ids: Vec<_> = listed.iter().map(|s| s.source.id().to_string()).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
        assert_eq!(listed[2].status, SessionStatus::Completed);
        assert_eq!(listed[0].status, SessionStatus::Ongoing);

        let first_two = repo.list(2).await.unwrap();
        assert_eq!(first_two.len(), 2);
        assert_eq!(first_two[0].source.id(), "c");
    }
}
