//! Accuracy scoring for predictions and review sessions
//!
//! Two formulas are in use for what is conceptually the same question:
//! - `LevelBands` grades support/resistance levels and direction (conversation reviews)
//! - `DirectionOnly` grades the directional call alone (single-analysis reviews)
//!
//! They are kept as separate presets rather than merged; the divergence is
//! intentional until product decides otherwise.

use serde::{Deserialize, Serialize};

use super::types::{Direction, Outcome, Prediction, PredictionReview, ReviewSource};

/// Weight of the direction check
pub const DIRECTION_WEIGHT: f64 = 40.0;
/// Credit for a directional call that missed but stayed inside the range
pub const DIRECTION_PARTIAL_CREDIT: f64 = 10.0;

/// Tolerance bands (fraction of the level, credit) from tightest to loosest.
/// Support and resistance checks are each worth 30.
const LEVEL_BANDS: [(f64, f64); 3] = [(0.02, 30.0), (0.05, 20.0), (0.10, 10.0)];

const QUALITY_ACCURACY_WEIGHT: f64 = 60.0;
const QUALITY_CONSISTENCY_WEIGHT: f64 = 20.0;
const QUALITY_RISK_WEIGHT: f64 = 20.0;
/// A stop-loss counts as risk-compliant when below actual low times this factor
const STOP_LOSS_CEILING_FACTOR: f64 = 1.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringPreset {
    LevelBands,
    DirectionOnly,
}

impl ScoringPreset {
    /// Preset applied to sessions of the given source kind
    pub fn for_source(source: &ReviewSource) -> Self {
        match source {
            ReviewSource::Conversation(_) => ScoringPreset::LevelBands,
            ReviewSource::Analysis(_) => ScoringPreset::DirectionOnly,
        }
    }
}

/// Per-check breakdown for the level-band preset
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreBreakdown {
    pub support: f64,
    pub resistance: f64,
    pub direction: f64,
}

impl ScoreBreakdown {
    pub fn total(&self) -> u8 {
        clamp_round(self.support + self.resistance + self.direction)
    }
}

/// Aggregate quality components, kept for reporting
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityBreakdown {
    pub accuracy: f64,
    pub consistency: f64,
    pub risk_control: f64,
}

impl QualityBreakdown {
    pub fn total(&self) -> u8 {
        clamp_round(self.accuracy + self.consistency + self.risk_control)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccuracyScorer {
    pub preset: ScoringPreset,
    /// Absolute price move under which a hold call counts as right (direction-only preset)
    pub hold_move_threshold: f64,
}

impl Default for AccuracyScorer {
    fn default() -> Self {
        Self::level_bands()
    }
}

impl AccuracyScorer {
    pub fn level_bands() -> Self {
        Self {
            preset: ScoringPreset::LevelBands,
            hold_move_threshold: 10.0,
        }
    }

    pub fn direction_only() -> Self {
        Self {
            preset: ScoringPreset::DirectionOnly,
            hold_move_threshold: 10.0,
        }
    }

    pub fn with_hold_move_threshold(mut self, threshold: f64) -> Self {
        self.hold_move_threshold = threshold;
        self
    }

    /// Accuracy 0..=100 for one prediction against one outcome
    pub fn score(&self, prediction: &Prediction, outcome: &Outcome) -> u8 {
        match self.preset {
            ScoringPreset::LevelBands => Self::level_breakdown(prediction, outcome).total(),
            ScoringPreset::DirectionOnly => self.direction_only_score(prediction, outcome),
        }
    }

    pub fn level_breakdown(prediction: &Prediction, outcome: &Outcome) -> ScoreBreakdown {
        ScoreBreakdown {
            support: band_credit(outcome.actual_low, prediction.support_level),
            resistance: band_credit(outcome.actual_high, prediction.resistance_level),
            direction: direction_credit(prediction, outcome.actual_close),
        }
    }

    fn direction_only_score(&self, prediction: &Prediction, outcome: &Outcome) -> u8 {
        let actual_move =
            outcome.actual_close - (outcome.actual_high + outcome.actual_low) / 2.0;

        let accuracy = match prediction.direction {
            Direction::Long if actual_move > 0.0 => {
                let bonus = if prediction.target > 0.0 {
                    (outcome.actual_high / prediction.target * 30.0).min(30.0)
                } else {
                    0.0
                };
                70.0 + bonus
            }
            Direction::Short if actual_move < 0.0 => {
                let bonus = if prediction.target > 0.0 {
                    (prediction.target / outcome.actual_low * 30.0).min(30.0)
                } else {
                    0.0
                };
                70.0 + bonus
            }
            Direction::Hold => {
                if actual_move.abs() < self.hold_move_threshold {
                    80.0
                } else {
                    50.0
                }
            }
            // Wrong direction
            _ => 30.0,
        };

        clamp_round(accuracy)
    }

    /// Aggregate quality over all reviews of a session; 0 for an empty set.
    /// Unresolved reviews count against risk control and are excluded from
    /// the accuracy statistics.
    pub fn quality_breakdown(reviews: &[PredictionReview]) -> Option<QualityBreakdown> {
        if reviews.is_empty() {
            return None;
        }

        let accuracies: Vec<f64> = reviews
            .iter()
            .filter_map(|r| r.accuracy.map(f64::from))
            .collect();

        let accuracy = QUALITY_ACCURACY_WEIGHT * mean(&accuracies) / 100.0;

        let consistency = if reviews.len() > 1 {
            (QUALITY_CONSISTENCY_WEIGHT - variance(&accuracies) / 5.0).max(0.0)
        } else {
            QUALITY_CONSISTENCY_WEIGHT
        };

        let compliant = reviews
            .iter()
            .filter(|r| match r.outcome {
                Some(outcome) => {
                    let stop = r.prediction.stop_loss;
                    stop > 0.0 && stop < outcome.actual_low * STOP_LOSS_CEILING_FACTOR
                }
                None => false,
            })
            .count();
        let risk_control = compliant as f64 / reviews.len() as f64 * QUALITY_RISK_WEIGHT;

        Some(QualityBreakdown {
            accuracy,
            consistency,
            risk_control,
        })
    }

    pub fn quality_score(reviews: &[PredictionReview]) -> u8 {
        Self::quality_breakdown(reviews)
            .map(|b| b.total())
            .unwrap_or(0)
    }

    /// Rounded mean of per-prediction accuracies; 0 when none are scored
    pub fn overall_accuracy(reviews: &[PredictionReview]) -> u8 {
        let accuracies: Vec<f64> = reviews
            .iter()
            .filter_map(|r| r.accuracy.map(f64::from))
            .collect();
        clamp_round(mean(&accuracies))
    }
}

/// Credit for `actual` landing within the tolerance bands around `level`
fn band_credit(actual: f64, level: f64) -> f64 {
    LEVEL_BANDS
        .iter()
        .find(|(tolerance, _)| {
            actual >= level * (1.0 - tolerance) && actual <= level * (1.0 + tolerance)
        })
        .map(|(_, credit)| *credit)
        .unwrap_or(0.0)
}

fn direction_credit(prediction: &Prediction, close: f64) -> f64 {
    let midpoint = prediction.midpoint();
    let hit = match prediction.direction {
        Direction::Long => close > midpoint,
        Direction::Short => close < midpoint,
        Direction::Hold => prediction.contains(close),
    };

    if hit {
        DIRECTION_WEIGHT
    } else if prediction.direction.is_directional() && prediction.contains(close) {
        DIRECTION_PARTIAL_CREDIT
    } else {
        0.0
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population variance
fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64
}

fn clamp_round(value: f64) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.clamp(0.0, 100.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prediction(direction: Direction) -> Prediction {
        Prediction {
            support_level: 100.0,
            resistance_level: 120.0,
            direction,
            stop_loss: 90.0,
            target: 130.0,
            rationale_text: String::new(),
            source_message_id: "m1".to_string(),
            source_image_ref: None,
        }
    }

    fn outcome(high: f64, low: f64, close: f64) -> Outcome {
        Outcome::new(high, low, close).unwrap()
    }

    fn resolved(accuracy: u8, stop_loss: f64, low: f64) -> PredictionReview {
        let mut p = prediction(Direction::Long);
        p.stop_loss = stop_loss;
        let mut review = PredictionReview::new(p);
        review.attach(outcome(low * 1.2, low, low * 1.1), accuracy);
        review
    }

    #[test]
    fn test_level_bands_perfect_call() {
        let scorer = AccuracyScorer::level_bands();
        let p = prediction(Direction::Long);
        let o = outcome(119.0, 99.0, 125.0);

        let breakdown = AccuracyScorer::level_breakdown(&p, &o);
        assert_eq!(breakdown.support, 30.0);
        assert_eq!(breakdown.resistance, 30.0);
        assert_eq!(breakdown.direction, 40.0);
        assert_eq!(scorer.score(&p, &o), 100);
    }

    #[test]
    fn test_level_bands_total_miss() {
        let scorer = AccuracyScorer::level_bands();
        let p = prediction(Direction::Long);
        // Support off by 20%, resistance off by ~17%, close below midpoint and outside range
        assert_eq!(scorer.score(&p, &outcome(140.0, 80.0, 85.0)), 0);
    }

    #[test]
    fn test_exact_levels_take_full_level_credit() {
        for (support, resistance) in [(1.0, 2.0), (100.0, 120.0), (0.35, 0.36), (4100.0, 4500.0)] {
            let mut p = prediction(Direction::Hold);
            p.support_level = support;
            p.resistance_level = resistance;
            let b = AccuracyScorer::level_breakdown(&p, &outcome(resistance, support, support));
            assert_eq!(b.support + b.resistance, 60.0);
        }
    }

    #[test]
    fn test_level_band_edges() {
        assert_eq!(band_credit(101.9, 100.0), 30.0);
        assert_eq!(band_credit(104.0, 100.0), 20.0);
        assert_eq!(band_credit(95.5, 100.0), 20.0);
        assert_eq!(band_credit(91.0, 100.0), 10.0);
        assert_eq!(band_credit(111.0, 100.0), 0.0);
    }

    #[test]
    fn test_direction_credit() {
        let long = prediction(Direction::Long);
        let short = prediction(Direction::Short);
        let hold = prediction(Direction::Hold);

        assert_eq!(direction_credit(&long, 111.0), 40.0);
        // Missed but inside [support, resistance]
        assert_eq!(direction_credit(&long, 105.0), 10.0);
        assert_eq!(direction_credit(&long, 95.0), 0.0);

        assert_eq!(direction_credit(&short, 105.0), 40.0);
        assert_eq!(direction_credit(&short, 115.0), 10.0);
        assert_eq!(direction_credit(&short, 125.0), 0.0);

        assert_eq!(direction_credit(&hold, 100.0), 40.0);
        assert_eq!(direction_credit(&hold, 120.0), 40.0);
        assert_eq!(direction_credit(&hold, 121.0), 0.0);
    }

    #[test]
    fn test_scores_stay_bounded() {
        let scorers = [AccuracyScorer::level_bands(), AccuracyScorer::direction_only()];
        let directions = [Direction::Long, Direction::Short, Direction::Hold];
        let outcomes = [
            outcome(0.01, 0.001, 1000.0),
            outcome(1e9, 1.0, 5e8),
            outcome(130.0, 100.0, 129.0),
            outcome(121.0, 98.0, 99.0),
        ];
        for scorer in scorers {
            for direction in directions {
                let mut p = prediction(direction);
                for target in [0.0, 0.5, 130.0, 1e12] {
                    p.target = target;
                    for o in &outcomes {
                        assert!(scorer.score(&p, o) <= 100);
                    }
                }
            }
        }
    }

    #[test]
    fn test_direction_only_preset() {
        let scorer = AccuracyScorer::direction_only();

        // Long, close above the bar midpoint: 70 + min(30, 126/130*30) = 99.08
        let long = prediction(Direction::Long);
        assert_eq!(scorer.score(&long, &outcome(126.0, 110.0, 125.0)), 99);
        // Moved past target: bonus capped at 30
        assert_eq!(scorer.score(&long, &outcome(140.0, 110.0, 139.0)), 100);
        // Wrong direction
        assert_eq!(scorer.score(&long, &outcome(126.0, 110.0, 111.0)), 30);

        // Short, close below midpoint: 70 + min(30, 90/100*30) = 97
        let mut short = prediction(Direction::Short);
        short.target = 90.0;
        assert_eq!(scorer.score(&short, &outcome(120.0, 100.0, 101.0)), 97);

        // Hold uses an absolute move threshold
        let hold = prediction(Direction::Hold);
        assert_eq!(scorer.score(&hold, &outcome(120.0, 100.0, 115.0)), 80);
        assert_eq!(scorer.score(&hold, &outcome(140.0, 100.0, 139.0)), 50);
        let strict = AccuracyScorer::direction_only().with_hold_move_threshold(1.0);
        assert_eq!(strict.score(&hold, &outcome(120.0, 100.0, 115.0)), 50);
    }

    #[test]
    fn test_direction_only_without_target_has_no_bonus() {
        let scorer = AccuracyScorer::direction_only();
        let mut long = prediction(Direction::Long);
        long.target = 0.0;
        assert_eq!(scorer.score(&long, &outcome(126.0, 110.0, 125.0)), 70);
    }

    #[test]
    fn test_quality_score_two_predictions_fixture() {
        // mean 80 -> 48; variance 400 -> consistency max(0, 20 - 80) = 0; both stops compliant -> 20
        let reviews = vec![resolved(100, 90.0, 99.0), resolved(60, 95.0, 100.0)];
        let breakdown = AccuracyScorer::quality_breakdown(&reviews).unwrap();
        assert_eq!(breakdown.accuracy, 48.0);
        assert_eq!(breakdown.consistency, 0.0);
        assert_eq!(breakdown.risk_control, 20.0);
        assert_eq!(AccuracyScorer::quality_score(&reviews), 68);
        assert_eq!(AccuracyScorer::overall_accuracy(&reviews), 80);
    }

    #[test]
    fn test_quality_score_consistency_and_risk() {
        // 70 and 80: variance 25 -> consistency 15; mean 75 -> 45; one compliant stop -> 10
        let reviews = vec![resolved(70, 90.0, 99.0), resolved(80, 0.0, 100.0)];
        assert_eq!(AccuracyScorer::quality_score(&reviews), 70);

        // Single prediction keeps full consistency; stop above low*1.1 is not compliant
        let single = vec![resolved(50, 120.0, 100.0)];
        assert_eq!(AccuracyScorer::quality_score(&single), 50);
    }

    #[test]
    fn test_empty_session_scores() {
        assert_eq!(AccuracyScorer::quality_score(&[]), 0);
        assert_eq!(AccuracyScorer::overall_accuracy(&[]), 0);
    }

    #[test]
    fn test_preset_for_source() {
        assert_eq!(
            ScoringPreset::for_source(&ReviewSource::Conversation("c".to_string())),
            ScoringPreset::LevelBands
        );
        assert_eq!(
            ScoringPreset::for_source(&ReviewSource::Analysis("a".to_string())),
            ScoringPreset::DirectionOnly
        );
    }
}
