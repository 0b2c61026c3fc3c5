//! Message and prompt templates for review conversations

use super::extractor::LabelSet;
use super::sanitize::{sanitize_text, MAX_RATIONALE_CHARS};
use super::types::{Outcome, Prediction, PredictionReview, ReviewSession, SourceAnalysis};

/// Accuracy at or above this is marked as a hit
pub const GOOD_ACCURACY: u8 = 80;
/// Accuracy at or above this (and below `GOOD_ACCURACY`) is marked as partial
pub const FAIR_ACCURACY: u8 = 60;

/// ✅ / ⚠️ / ❌ by accuracy band
pub fn accuracy_mark(accuracy: u8) -> &'static str {
    if accuracy >= GOOD_ACCURACY {
        "✅"
    } else if accuracy >= FAIR_ACCURACY {
        "⚠️"
    } else {
        "❌"
    }
}

/// Prompt template builder for review sessions
pub struct ReviewPrompts;

impl ReviewPrompts {
    /// Opening assistant message of a conversation review
    pub fn conversation_intro(prediction_count: usize) -> String {
        format!(
            "欢迎进行复盘！我已经识别出这个对话中有 {} 个预测。\n\n请提供实际的价格数据（可以上传K线图，我会自动识别），我将对每个预测进行评估。",
            prediction_count
        )
    }

    /// Opening assistant message of a single-analysis review
    pub fn analysis_intro(analysis: &SourceAnalysis, labels: &LabelSet) -> String {
        format!(
            r#"您好！让我们一起复盘这次分析。

**原始预测回顾：**
- 预测方向: {}
- 支撑位: {}
- 阻力位: {}
- 目标位: {}

请您：
1. 上传收盘后的K线图，我会自动识别实际价格
2. 或者直接告诉我实际的最高价、最低价和收盘价

然后我们可以深入讨论预测的准确性、失误原因以及改进方向。"#,
            labels.direction_label(analysis.direction),
            analysis.support_level,
            analysis.resistance_level,
            analysis.target,
        )
    }

    /// Summary posted after an outcome is attached.
    ///
    /// `rationale` is the vision model's note, present only on the image path.
    pub fn outcome_summary(
        outcome: &Outcome,
        reviews: &[PredictionReview],
        rationale: Option<&str>,
        labels: &LabelSet,
    ) -> String {
        let mut response = if rationale.is_some() {
            String::from("✅ 已成功识别实际价格数据！\n\n")
        } else {
            String::from("✅ 已记录实际价格数据！\n\n")
        };

        response.push_str("📊 实际数据:\n");
        response.push_str(&format!("• 最高价: {}\n", outcome.actual_high));
        response.push_str(&format!("• 最低价: {}\n", outcome.actual_low));
        response.push_str(&format!("• 收盘价: {}\n\n", outcome.actual_close));

        if let Some(note) = rationale.filter(|n| !n.trim().is_empty()) {
            response.push_str(&format!(
                "🔍 图片分析: {}\n\n",
                sanitize_text(note, MAX_RATIONALE_CHARS)
            ));
        }

        response.push_str("📈 各预测准确率:\n\n");
        for (index, review) in reviews.iter().enumerate() {
            let Some(accuracy) = review.accuracy else {
                continue;
            };
            let p = &review.prediction;
            response.push_str(&format!(
                "{} 预测 #{}: {}%\n",
                accuracy_mark(accuracy),
                index + 1,
                accuracy
            ));
            response.push_str(&format!(
                "  {} {} | {} {}\n",
                labels.support, p.support_level, labels.resistance, p.resistance_level
            ));
            response.push_str(&format!(
                "  {}: {} | {}: {}\n\n",
                labels.direction,
                labels.direction_label(p.direction),
                labels.target,
                p.target
            ));
        }

        response.push_str("\n💡 您可以继续提问或点击\"完成复盘\"查看最终评分。");
        response
    }

    /// System prompt for reading actual prices off a chart screenshot
    pub fn vision_system_prompt() -> &'static str {
        r#"你是一位专业的股市K线图数据提取专家。你的任务是：
1. 仔细识别K线图中的价格数据
2. 提取最后一根K线（或指定时间段）的实际价格：最高价、最低价、收盘价
3. 返回JSON格式的数据，确保数字精确

输出格式：
```json
{
  "actualHigh": 具体数字,
  "actualLow": 具体数字,
  "actualClose": 具体数字,
  "analysis": "简要说明：从图中识别到的关键信息，如时间范围、整体走势等"
}
```

注意：
- 必须返回有效的JSON格式
- 价格必须是数字，不要包含货币符号
- 如果图片不清晰或无法识别，在analysis中说明原因
- 仔细观察坐标轴和价格标注"#
    }

    /// User turn for vision extraction; the reference gives the model the
    /// expected order of magnitude
    pub fn vision_user_prompt(reference: &Prediction) -> String {
        let level = |value: f64| {
            if value > 0.0 {
                value.to_string()
            } else {
                "未预测".to_string()
            }
        };
        format!(
            "请分析这张K线图，提取实际的价格数据。\n\n原始预测参考：\n- 预测最高价: {}\n- 预测最低价: {}\n- 预测目标位: {}\n\n请从图中提取实际的最高价、最低价和收盘价。",
            level(reference.resistance_level),
            level(reference.support_level),
            level(reference.target)
        )
    }

    /// System prompt for the chat fallback when no outcome could be read
    pub fn review_system_prompt(
        session: &ReviewSession,
        historical_context: &str,
        labels: &LabelSet,
    ) -> String {
        let predictions_text = session
            .prediction_reviews
            .iter()
            .enumerate()
            .map(|(i, review)| {
                let p = &review.prediction;
                let status = match review.accuracy {
                    Some(accuracy) => format!("已评估 {}%", accuracy),
                    None => "待评估".to_string(),
                };
                format!(
                    "预测 #{} ({}):\n- {}: {}\n- {}: {}\n- {}: {}\n- {}: {}",
                    i + 1,
                    status,
                    labels.support,
                    p.support_level,
                    labels.resistance,
                    p.resistance_level,
                    labels.direction,
                    labels.direction_label(p.direction),
                    labels.target,
                    p.target
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n");

        let predictions_text = if predictions_text.is_empty() {
            "（本次复盘没有识别到结构化预测）".to_string()
        } else {
            predictions_text
        };

        format!(
            r#"你是一位专业的股市分析复盘专家。用户正在进行预测复盘。请分析用户提供的信息，如果包含实际价格数据（最高价、最低价、收盘价），请提取并告知。如果信息不完整，请引导用户提供。

**预测内容：**
{}
{}
**对话要求：**
- 客观、专业地评估预测质量
- 不要为错误的预测找借口，要诚实分析失误原因
- 提供具体、可操作的改进建议
- 如果用户询问是否完成复盘，确认所有数据后建议用户使用"完成复盘"功能"#,
            predictions_text, historical_context
        )
    }
}
