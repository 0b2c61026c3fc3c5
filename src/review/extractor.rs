//! Prediction extraction from free-form assistant text
//!
//! The upstream assistant writes its calls inline, e.g.
//! `支撑：100 阻力：120 方向：做多 止损：95 目标：130`. Extraction is permissive:
//! a message that does not carry every mandatory label is skipped, never an error.

use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use super::types::{Direction, Prediction, Role, SessionMessage};

/// Strategy for turning assistant messages into predictions
pub trait PredictionExtractor: Send + Sync {
    /// Scan messages in order; only assistant messages are considered.
    /// Output never contains two predictions with the same `source_message_id`.
    fn extract(&self, messages: &[SessionMessage]) -> Vec<Prediction>;
}

/// Label vocabulary the assistant uses when stating a prediction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSet {
    pub support: String,
    pub resistance: String,
    pub direction: String,
    pub stop_loss: String,
    pub target: String,
    pub long: String,
    pub short: String,
    pub hold: String,
}

impl LabelSet {
    /// Labels emitted by the chart-analysis assistant
    pub fn chinese() -> Self {
        Self {
            support: "支撑".to_string(),
            resistance: "阻力".to_string(),
            direction: "方向".to_string(),
            stop_loss: "止损".to_string(),
            target: "目标".to_string(),
            long: "做多".to_string(),
            short: "做空".to_string(),
            hold: "观望".to_string(),
        }
    }

    pub fn english() -> Self {
        Self {
            support: "Support".to_string(),
            resistance: "Resistance".to_string(),
            direction: "Direction".to_string(),
            stop_loss: "Stop Loss".to_string(),
            target: "Target".to_string(),
            long: "long".to_string(),
            short: "short".to_string(),
            hold: "hold".to_string(),
        }
    }

    /// Resolve a label set by its config name (`zh` or `en`)
    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "zh" | "chinese" => Some(Self::chinese()),
            "en" | "english" => Some(Self::english()),
            _ => None,
        }
    }

    pub fn direction_of(&self, token: &str) -> Option<Direction> {
        if token == self.long {
            Some(Direction::Long)
        } else if token == self.short {
            Some(Direction::Short)
        } else if token == self.hold {
            Some(Direction::Hold)
        } else {
            None
        }
    }

    /// Token this vocabulary uses for `direction`
    pub fn direction_label(&self, direction: Direction) -> &str {
        match direction {
            Direction::Long => &self.long,
            Direction::Short => &self.short,
            Direction::Hold => &self.hold,
        }
    }
}

impl Default for LabelSet {
    fn default() -> Self {
        Self::chinese()
    }
}

/// Direction from any known vocabulary (Chinese or English tokens)
pub fn parse_direction(token: &str) -> Option<Direction> {
    let token = token.trim();
    LabelSet::chinese()
        .direction_of(token)
        .or_else(|| LabelSet::english().direction_of(token))
}

/// Result of looking up one label in a message
enum Field<T> {
    Absent,
    Malformed,
    Value(T),
}

/// Label-driven extractor: `<label> [:：] <value>`, first occurrence wins
pub struct LabeledTextExtractor {
    labels: LabelSet,
    support: Regex,
    resistance: Regex,
    direction: Regex,
    stop_loss: Regex,
    target: Regex,
}

impl LabeledTextExtractor {
    pub fn new(labels: LabelSet) -> Result<Self, regex::Error> {
        let direction_tokens = [&labels.long, &labels.short, &labels.hold]
            .iter()
            .map(|t| regex::escape(t))
            .collect::<Vec<_>>()
            .join("|");

        Ok(Self {
            support: Self::label_pattern(&labels.support, "[0-9.]+")?,
            resistance: Self::label_pattern(&labels.resistance, "[0-9.]+")?,
            direction: Self::label_pattern(&labels.direction, &direction_tokens)?,
            stop_loss: Self::label_pattern(&labels.stop_loss, "[0-9.]+")?,
            target: Self::label_pattern(&labels.target, "[0-9.]+")?,
            labels,
        })
    }

    /// Label, optional markdown bold, separator, then an optional value capture.
    /// The capture is optional so the first occurrence of a label is the one
    /// used even when no value follows it.
    fn label_pattern(label: &str, value: &str) -> Result<Regex, regex::Error> {
        Regex::new(&format!(
            r"{}(?:\*\*)?\s*[:：]\s*(?:\*\*)?\s*({})?",
            regex::escape(label),
            value
        ))
    }

    pub fn labels(&self) -> &LabelSet {
        &self.labels
    }

    fn number(pattern: &Regex, text: &str) -> Field<f64> {
        let Some(captures) = pattern.captures(text) else {
            return Field::Absent;
        };
        // Label followed by prose carries no value; a numeric token that
        // does not parse is malformed
        let Some(token) = captures.get(1) else {
            return Field::Absent;
        };
        match token.as_str().parse::<f64>() {
            Ok(value) if value.is_finite() => Field::Value(value),
            _ => Field::Malformed,
        }
    }

    fn direction(&self, text: &str) -> Field<Direction> {
        let Some(captures) = self.direction.captures(text) else {
            return Field::Absent;
        };
        match captures
            .get(1)
            .and_then(|m| self.labels.direction_of(m.as_str()))
        {
            Some(direction) => Field::Value(direction),
            None => Field::Malformed,
        }
    }

    /// Parse a single message; `None` if it is not a complete prediction source
    pub fn parse_message(&self, message: &SessionMessage) -> Option<Prediction> {
        let text = message.text.as_str();

        let Field::Value(support_level) = Self::number(&self.support, text) else {
            return None;
        };
        let Field::Value(resistance_level) = Self::number(&self.resistance, text) else {
            return None;
        };
        let Field::Value(direction) = self.direction(text) else {
            return None;
        };

        let stop_loss = match Self::number(&self.stop_loss, text) {
            Field::Absent => 0.0,
            Field::Value(v) => v,
            Field::Malformed => return None,
        };
        let target = match Self::number(&self.target, text) {
            Field::Absent => 0.0,
            Field::Value(v) => v,
            Field::Malformed => return None,
        };

        Some(Prediction {
            support_level,
            resistance_level,
            direction,
            stop_loss,
            target,
            rationale_text: message.text.clone(),
            source_message_id: message.id.clone(),
            source_image_ref: message.image_ref.clone(),
        })
    }
}

impl PredictionExtractor for LabeledTextExtractor {
    fn extract(&self, messages: &[SessionMessage]) -> Vec<Prediction> {
        let predictions = collect_unique(messages, |m| self.parse_message(m));
        debug!(
            "Extracted {} labelled predictions from {} messages",
            predictions.len(),
            messages.len()
        );
        predictions
    }
}

#[derive(Debug, Deserialize)]
struct KeyLevels {
    support: f64,
    resistance: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalysisBlock {
    key_levels: KeyLevels,
    direction: String,
    #[serde(default)]
    stop_loss: Option<f64>,
    #[serde(default)]
    target: Option<f64>,
    #[serde(default)]
    reasoning: Option<String>,
}

/// Stricter extractor that reads a fenced JSON block of the shape the
/// analysis endpoint asks the model for (`keyLevels`, `direction`, ...)
pub struct StructuredBlockExtractor {
    labels: LabelSet,
}

impl StructuredBlockExtractor {
    pub fn new(labels: LabelSet) -> Self {
        Self { labels }
    }

    fn direction_of(&self, token: &str) -> Option<Direction> {
        self.labels
            .direction_of(token.trim())
            .or_else(|| parse_direction(token))
    }

    pub fn parse_message(&self, message: &SessionMessage) -> Option<Prediction> {
        let json = crate::llm::extract_json_from_text(&message.text)?;
        let block: AnalysisBlock = serde_json::from_str(&json).ok()?;
        let direction = self.direction_of(&block.direction)?;

        if !block.key_levels.support.is_finite() || !block.key_levels.resistance.is_finite() {
            return None;
        }

        Some(Prediction {
            support_level: block.key_levels.support,
            resistance_level: block.key_levels.resistance,
            direction,
            stop_loss: block.stop_loss.unwrap_or(0.0),
            target: block.target.unwrap_or(0.0),
            rationale_text: block.reasoning.unwrap_or_else(|| message.text.clone()),
            source_message_id: message.id.clone(),
            source_image_ref: message.image_ref.clone(),
        })
    }
}

impl PredictionExtractor for StructuredBlockExtractor {
    fn extract(&self, messages: &[SessionMessage]) -> Vec<Prediction> {
        collect_unique(messages, |m| self.parse_message(m))
    }
}

fn collect_unique<F>(messages: &[SessionMessage], parse: F) -> Vec<Prediction>
where
    F: Fn(&SessionMessage) -> Option<Prediction>,
{
    let mut predictions: Vec<Prediction> = Vec::new();
    for message in messages.iter().filter(|m| m.role == Role::Assistant) {
        if predictions.iter().any(|p| p.source_message_id == message.id) {
            continue;
        }
        if let Some(prediction) = parse(message) {
            predictions.push(prediction);
        }
    }
    predictions
}
