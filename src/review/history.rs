//! Historical review context fed back into the review assistant

use tracing::debug;

use super::errors::ReviewResult;
use super::extractor::LabelSet;
use super::prompts::{accuracy_mark, FAIR_ACCURACY};
use super::repository::ReviewRepository;
use super::sanitize::{sanitize_text, MAX_RATIONALE_CHARS};
use super::types::Role;

/// Summary of the most recent `window` completed reviews, read from the
/// repository at call time. Empty string when there are none.
pub async fn historical_context(
    repo: &dyn ReviewRepository,
    window: usize,
    labels: &LabelSet,
) -> ReviewResult<String> {
    if window == 0 {
        return Ok(String::new());
    }

    let sessions = repo.recent_completed(window).await?;
    if sessions.is_empty() {
        return Ok(String::new());
    }
    debug!("Building historical context from {} completed reviews", sessions.len());

    let scores: Vec<f64> = sessions
        .iter()
        .filter_map(|s| s.overall_accuracy)
        .map(f64::from)
        .collect();
    let average = if scores.is_empty() {
        0.0
    } else {
        scores.iter().sum::<f64>() / scores.len() as f64
    };

    let mut context = String::from("\n\n📊 历史复盘数据（用于持续学习和改进预测）：\n");
    context.push_str(&format!(
        "总复盘次数: {}，平均准确率: {:.1}%\n\n",
        sessions.len(),
        average
    ));

    // Oldest first, like a journal
    for session in sessions.iter().rev() {
        context.push_str(&format!(
            "{} ({}):\n",
            session.source,
            session.updated_at.format("%Y-%m-%d")
        ));
        for review in &session.prediction_reviews {
            let (Some(outcome), Some(accuracy)) = (review.outcome, review.accuracy) else {
                continue;
            };
            let p = &review.prediction;
            context.push_str(&format!(
                "• 预测: {}, {}{}, {}{}, {}{}\n",
                labels.direction_label(p.direction),
                labels.support,
                p.support_level,
                labels.resistance,
                p.resistance_level,
                labels.target,
                p.target
            ));
            context.push_str(&format!(
                "• 实际: 最高{}, 最低{}, 收盘{}\n",
                outcome.actual_high, outcome.actual_low, outcome.actual_close
            ));
            context.push_str(&format!(
                "• 准确率: {}% {}\n",
                accuracy,
                accuracy_mark(accuracy)
            ));
        }
        // The assistant's closing remarks stand in for the session's lessons
        let reflection = session
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant && !m.text.trim().is_empty());
        if let Some(message) = reflection {
            context.push_str(&format!(
                "• 反思: {}\n",
                sanitize_text(&message.text, MAX_RATIONALE_CHARS)
            ));
        }
        context.push_str("---\n");
    }

    context.push_str(&format!(
        "\n⚠️ 重要：根据以上历史数据，总结预测失误的原因，在新的分析中避免重复错误。特别关注准确率低于{}%的案例。\n",
        FAIR_ACCURACY
    ));

    Ok(context)
}
