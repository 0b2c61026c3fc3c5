//! End-to-end review flows against the in-memory repository with stub collaborators

use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use tradereview::review::{
    ChatAssistant, ChatRequest, Direction, ImageStore, ImageUpload, InMemoryReviewRepository,
    InMemorySourceStore, Prediction, ReviewCollaborators, ReviewConfig, ReviewEngine, ReviewError,
    ReviewRepository, ReviewSource, SessionMessage, SessionStatus, SourceAnalysis,
    SourceConversation, VisionExtraction, VisionExtractor,
};

/// Vision stub returning a fixed read, or failing when empty
struct StubVision(Option<VisionExtraction>);

#[async_trait]
impl VisionExtractor for StubVision {
    async fn extract_outcome(&self, _image: &[u8], _reference: &Prediction) -> Result<VisionExtraction> {
        self.0
            .clone()
            .ok_or_else(|| anyhow::anyhow!("could not read chart"))
    }
}

/// Chat stub recording every request
#[derive(Default)]
struct RecordingChat {
    fail: bool,
    calls: AtomicUsize,
    last_request: Mutex<Option<ChatRequest>>,
}

#[async_trait]
impl ChatAssistant for RecordingChat {
    async fn converse(&self, request: ChatRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().await = Some(request);
        if self.fail {
            anyhow::bail!("upstream 503");
        }
        Ok("请提供实际的最高价、最低价和收盘价。".to_string())
    }
}

struct MemoryImages;

#[async_trait]
impl ImageStore for MemoryImages {
    async fn save(&self, bytes: &[u8], file_name: &str) -> Result<String> {
        Ok(format!("mem://{}/{}", bytes.len(), file_name))
    }
}

struct Harness {
    engine: ReviewEngine,
    repo: Arc<InMemoryReviewRepository>,
    chat: Arc<RecordingChat>,
}

const CALL_A: &str = "综合来看：支撑：100 阻力：120 方向：做多 止损：90 目标：130";
const CALL_B: &str = "更新判断 支撑：99 阻力：119 方向：做空 止损：95 目标：90";

async fn harness(vision: Option<VisionExtraction>, chat_fails: bool) -> Harness {
    let sources = InMemorySourceStore::new();
    sources
        .insert_conversation(SourceConversation {
            id: "conv-1".to_string(),
            title: "日线分析".to_string(),
            messages: vec![
                SessionMessage::user("帮我看看这张图", Some("/uploads/a.png".to_string())),
                SessionMessage::assistant(CALL_A),
                SessionMessage::user("那明天呢？", None),
                SessionMessage::assistant(CALL_B),
                SessionMessage::assistant("没有具体点位的闲聊"),
            ],
        })
        .await;
    sources
        .insert_conversation(SourceConversation {
            id: "conv-2".to_string(),
            title: "second".to_string(),
            messages: vec![SessionMessage::assistant(CALL_A)],
        })
        .await;
    sources
        .insert_analysis(SourceAnalysis {
            id: "analysis-1".to_string(),
            stock_code: Some("600519".to_string()),
            date: "2024-06-03".to_string(),
            image_ref: "/uploads/600519.png".to_string(),
            user_input: "明天走势？".to_string(),
            support_level: 100.0,
            resistance_level: 120.0,
            direction: Direction::Long,
            stop_loss: 90.0,
            target: 130.0,
            reasoning: "放量突破".to_string(),
        })
        .await;

    let repo = Arc::new(InMemoryReviewRepository::new());
    let chat = Arc::new(RecordingChat {
        fail: chat_fails,
        ..RecordingChat::default()
    });

    let engine = ReviewEngine::new(
        ReviewCollaborators {
            repository: repo.clone(),
            sources: Arc::new(sources),
            vision: Arc::new(StubVision(vision)),
            chat: chat.clone(),
            images: Arc::new(MemoryImages),
        },
        ReviewConfig::default(),
    )
    .unwrap();

    Harness { engine, repo, chat }
}

fn conv(id: &str) -> ReviewSource {
    ReviewSource::Conversation(id.to_string())
}

fn chart() -> Option<ImageUpload> {
    Some(ImageUpload {
        bytes: vec![0x89, b'P', b'N', b'G'],
        file_name: "close.png".to_string(),
    })
}

#[tokio::test]
async fn test_full_conversation_review_scores_quality_fixture() {
    let h = harness(None, false).await;

    let session = h.engine.start_conversation_review("conv-1").await.unwrap();
    assert_eq!(session.prediction_reviews.len(), 2);
    assert!(session.messages[0].text.contains("有 2 个预测"));

    let session = h
        .engine
        .submit_outcome(&conv("conv-1"), 119.0, 99.0, 125.0)
        .await
        .unwrap();
    assert_eq!(session.prediction_reviews[0].accuracy, Some(100));
    assert_eq!(session.prediction_reviews[1].accuracy, Some(60));
    assert_eq!(session.messages.len(), 2);
    assert!(session.messages[1].text.contains("✅ 预测 #1: 100%"));
    assert!(session.messages[1].text.contains("⚠️ 预测 #2: 60%"));

    let completed = h.engine.complete(&conv("conv-1")).await.unwrap();
    assert_eq!(completed.status, SessionStatus::Completed);
    assert_eq!(completed.overall_accuracy, Some(80));
    assert_eq!(completed.quality_score, Some(68));

    // Completion is idempotent and the session is frozen afterwards
    let again = h.engine.complete(&conv("conv-1")).await.unwrap();
    assert_eq!(again.version, completed.version);
    assert!(matches!(
        h.engine.submit_outcome(&conv("conv-1"), 140.0, 80.0, 85.0).await,
        Err(ReviewError::SessionCompleted { .. })
    ));
    assert!(matches!(
        h.engine.post_message(&conv("conv-1"), "再聊聊", None).await,
        Err(ReviewError::SessionCompleted { .. })
    ));
}

#[tokio::test]
async fn test_second_outcome_never_changes_accuracy() {
    let h = harness(None, false).await;
    h.engine.start_conversation_review("conv-1").await.unwrap();

    h.engine
        .submit_outcome(&conv("conv-1"), 119.0, 99.0, 125.0)
        .await
        .unwrap();
    let session = h
        .engine
        .submit_outcome(&conv("conv-1"), 140.0, 80.0, 85.0)
        .await
        .unwrap();

    assert_eq!(session.prediction_reviews[0].accuracy, Some(100));
    assert_eq!(
        session.prediction_reviews[0].outcome.map(|o| o.actual_close),
        Some(125.0)
    );
    assert_eq!(session.messages.len(), 3);
}

#[tokio::test]
async fn test_invalid_outcome_is_rejected_before_mutation() {
    let h = harness(None, false).await;
    let started = h.engine.start_conversation_review("conv-1").await.unwrap();

    let err = h
        .engine
        .submit_outcome(&conv("conv-1"), 90.0, 99.0, 95.0)
        .await
        .unwrap_err();
    assert!(matches!(err, ReviewError::Validation { .. }));

    let current = h.engine.get(&conv("conv-1")).await.unwrap();
    assert_eq!(current.version, started.version);
    assert_eq!(current.missing_outcomes(), 2);
}

#[tokio::test]
async fn test_complete_with_missing_outcomes_leaves_session_untouched() {
    let h = harness(None, false).await;
    let started = h.engine.start_conversation_review("conv-1").await.unwrap();

    let err = h.engine.complete(&conv("conv-1")).await.unwrap_err();
    assert!(matches!(err, ReviewError::IncompleteData { missing: 2 }));

    let current = h.engine.get_by_id(started.id).await.unwrap();
    assert_eq!(current.status, SessionStatus::Ongoing);
    assert_eq!(current.version, started.version);
    assert_eq!(current.overall_accuracy, None);
}

#[tokio::test]
async fn test_scenario_all_checks_miss() {
    let h = harness(None, false).await;
    h.engine.start_conversation_review("conv-2").await.unwrap();

    let session = h
        .engine
        .submit_outcome(&conv("conv-2"), 140.0, 80.0, 85.0)
        .await
        .unwrap();
    assert_eq!(session.prediction_reviews[0].accuracy, Some(0));
    assert!(session.messages[1].text.contains("❌ 预测 #1: 0%"));
}

#[tokio::test]
async fn test_image_outcome_attaches_without_chat() {
    let vision = VisionExtraction {
        actual_high: 119.0,
        actual_low: 99.0,
        actual_close: 125.0,
        rationale_text: "最后一根K线收阳".to_string(),
    };
    let h = harness(Some(vision), false).await;
    h.engine.start_conversation_review("conv-1").await.unwrap();

    let session = h
        .engine
        .post_message(&conv("conv-1"), "这是收盘图", chart())
        .await
        .unwrap();

    assert_eq!(h.chat.calls.load(Ordering::SeqCst), 0);
    assert_eq!(session.missing_outcomes(), 0);
    assert_eq!(session.messages.len(), 3);
    assert_eq!(session.messages[1].image_ref.as_deref(), Some("mem://4/close.png"));
    let summary = &session.messages[2].text;
    assert!(summary.starts_with("✅ 已成功识别实际价格数据！"));
    assert!(summary.contains("最后一根K线收阳"));
}

#[tokio::test]
async fn test_unreadable_image_falls_back_to_chat_with_context() {
    let h = harness(None, false).await;

    // One completed review feeds the historical context
    h.engine.start_conversation_review("conv-2").await.unwrap();
    h.engine
        .submit_outcome(&conv("conv-2"), 119.0, 99.0, 125.0)
        .await
        .unwrap();
    h.engine.complete(&conv("conv-2")).await.unwrap();

    h.engine.start_conversation_review("conv-1").await.unwrap();
    let session = h
        .engine
        .post_message(&conv("conv-1"), "这是收盘图", chart())
        .await
        .unwrap();

    assert_eq!(h.chat.calls.load(Ordering::SeqCst), 1);
    assert_eq!(session.missing_outcomes(), 2);
    assert_eq!(session.messages.len(), 3);
    assert_eq!(session.messages[2].text, "请提供实际的最高价、最低价和收盘价。");

    let request = h.chat.last_request.lock().await.clone().unwrap();
    assert_eq!(request.user_text, "这是收盘图");
    assert_eq!(request.history.len(), 1);
    assert!(request.image.is_some());
    assert!(request.system_prompt.contains("预测 #2"));
    assert!(request.system_prompt.contains("总复盘次数: 1"));
    assert!(request.system_prompt.contains("• 反思: ✅ 已记录实际价格数据！"));
}

#[tokio::test]
async fn test_chat_failure_persists_nothing() {
    let h = harness(None, true).await;
    let started = h.engine.start_conversation_review("conv-1").await.unwrap();

    let err = h
        .engine
        .post_message(&conv("conv-1"), "你好", None)
        .await
        .unwrap_err();
    assert!(matches!(err, ReviewError::Collaborator(_)));

    let current = h.engine.get(&conv("conv-1")).await.unwrap();
    assert_eq!(current.messages.len(), 1);
    assert_eq!(current.version, started.version);
}

#[tokio::test]
async fn test_analysis_review_uses_direction_only_preset() {
    let h = harness(None, false).await;

    let opened = h.engine.open_analysis_review("analysis-1").await.unwrap();
    assert_eq!(opened.prediction_reviews.len(), 1);
    assert!(opened.messages[0].text.contains("- 预测方向: 做多"));
    assert!(opened.messages[0].text.contains("- 目标位: 130"));

    let reopened = h.engine.open_analysis_review("analysis-1").await.unwrap();
    assert_eq!(reopened.id, opened.id);
    assert_eq!(h.repo.len().await, 1);

    let source = ReviewSource::Analysis("analysis-1".to_string());
    let session = h
        .engine
        .submit_outcome(&source, 119.0, 99.0, 125.0)
        .await
        .unwrap();
    // move = 125 - 109 = 16 > 0, so 70 + 119/130 * 30
    assert_eq!(session.prediction_reviews[0].accuracy, Some(97));

    let completed = h.engine.complete(&source).await.unwrap();
    assert_eq!(completed.overall_accuracy, Some(97));
    assert_eq!(completed.quality_score, Some(98));
}

#[tokio::test]
async fn test_open_conversation_review_is_lookup_or_create() {
    let h = harness(None, false).await;

    let first = h.engine.open_conversation_review("conv-1").await.unwrap();
    let second = h.engine.open_conversation_review("conv-1").await.unwrap();
    assert_eq!(first.id, second.id);

    assert!(matches!(
        h.engine.start_conversation_review("conv-1").await,
        Err(ReviewError::AlreadyExists { .. })
    ));
    assert_eq!(h.repo.recent_completed(10).await.unwrap().len(), 0);
}

#[tokio::test]
async fn test_list_shows_ongoing_and_completed_reviews() {
    let h = harness(None, false).await;
    assert!(h.engine.list(10).await.unwrap().is_empty());

    h.engine.start_conversation_review("conv-2").await.unwrap();
    h.engine
        .submit_outcome(&conv("conv-2"), 119.0, 99.0, 125.0)
        .await
        .unwrap();
    h.engine.complete(&conv("conv-2")).await.unwrap();
    h.engine.open_analysis_review("analysis-1").await.unwrap();

    let listed = h.engine.list(10).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert!(listed
        .windows(2)
        .all(|pair| pair[0].updated_at >= pair[1].updated_at));

    let done = listed.iter().find(|s| s.source == conv("conv-2")).unwrap();
    assert_eq!(done.status, SessionStatus::Completed);
    assert!(done.overall_accuracy.is_some());
    assert!(done.quality_score.is_some());

    let open = listed
        .iter()
        .find(|s| s.source == ReviewSource::Analysis("analysis-1".to_string()))
        .unwrap();
    assert_eq!(open.status, SessionStatus::Ongoing);
    assert_eq!(open.overall_accuracy, None);

    assert_eq!(h.engine.list(1).await.unwrap().len(), 1);
}
