//! Per-question scoring configuration.
//!
//! Stored as JSON next to each question, discriminated by `"type"`:
//!
//! ```json
//! {"type": "radio", "opts": ["Yes", "No"], "p_scores": [2, 8], "i_scores": [3, 9]}
//! {"type": "text", "threshold": 40, "p_short": 7, "p_long": 3, "i_short": 6, "i_long": 4}
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lowest and highest allowed probability/impact value.
pub const MIN_SCORE: i64 = 1;
pub const MAX_SCORE: i64 = 10;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScoringError {
    #[error("scoring config: empty JSON")]
    Empty,

    #[error("scoring config: {0}")]
    Malformed(String),

    #[error("{kind} config: {message}")]
    Invalid { kind: &'static str, message: String },

    #[error("tier thresholds: {0}")]
    Thresholds(String),

    #[error("question {question_id:?}: {source}")]
    Question {
        question_id: String,
        #[source]
        source: Box<ScoringError>,
    },
}

impl ScoringError {
    fn radio(message: impl Into<String>) -> Self {
        Self::Invalid {
            kind: "radio",
            message: message.into(),
        }
    }

    fn text(message: impl Into<String>) -> Self {
        Self::Invalid {
            kind: "text",
            message: message.into(),
        }
    }

    pub(crate) fn for_question(question_id: &str, source: ScoringError) -> Self {
        Self::Question {
            question_id: question_id.to_string(),
            source: Box::new(source),
        }
    }
}

/// A probability/impact pair, each within `[1, 10]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RiskScore {
    pub probability: u8,
    pub impact: u8,
}

impl RiskScore {
    /// Score given to answers that match nothing.
    pub const MINIMUM: RiskScore = RiskScore {
        probability: 1,
        impact: 1,
    };

    /// Build a pair, clamping both values into `[1, 10]`.
    pub fn clamped(probability: i64, impact: i64) -> Self {
        Self {
            probability: probability.clamp(MIN_SCORE, MAX_SCORE) as u8,
            impact: impact.clamp(MIN_SCORE, MAX_SCORE) as u8,
        }
    }

    /// Composite score: probability × impact.
    pub fn composite(&self) -> u16 {
        u16::from(self.probability) * u16::from(self.impact)
    }
}

/// Multiple-choice question: ordered options with parallel score arrays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RadioConfig {
    pub opts: Vec<String>,
    pub p_scores: Vec<i64>,
    pub i_scores: Vec<i64>,
}

/// Free-text question: scored by answer length against a threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextConfig {
    pub threshold: i64,
    pub p_short: i64,
    pub p_long: i64,
    pub i_short: i64,
    pub i_long: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ScoringConfig {
    Radio(RadioConfig),
    Text(TextConfig),
}

impl ScoringConfig {
    /// Parse and validate a raw configuration value.
    pub fn parse(raw: &serde_json::Value) -> Result<Self, ScoringError> {
        let is_empty = match raw {
            serde_json::Value::Null => true,
            serde_json::Value::Object(map) => map.is_empty(),
            _ => false,
        };
        if is_empty {
            return Err(ScoringError::Empty);
        }

        let config: ScoringConfig = serde_json::from_value(raw.clone())
            .map_err(|e| ScoringError::Malformed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ScoringError> {
        match self {
            ScoringConfig::Radio(radio) => radio.validate(),
            ScoringConfig::Text(text) => text.validate(),
        }
    }
}

impl RadioConfig {
    pub fn validate(&self) -> Result<(), ScoringError> {
        if self.opts.is_empty() {
            return Err(ScoringError::radio("opts must not be empty"));
        }
        if self.p_scores.len() != self.opts.len() {
            return Err(ScoringError::radio(format!(
                "p_scores length {} != opts length {}",
                self.p_scores.len(),
                self.opts.len()
            )));
        }
        if self.i_scores.len() != self.opts.len() {
            return Err(ScoringError::radio(format!(
                "i_scores length {} != opts length {}",
                self.i_scores.len(),
                self.opts.len()
            )));
        }
        for (name, scores) in [("p_scores", &self.p_scores), ("i_scores", &self.i_scores)] {
            if let Some((idx, value)) = scores.iter().enumerate().find(|(_, v)| !in_range(**v)) {
                return Err(ScoringError::radio(format!(
                    "{name}[{idx}]={value} out of range [{MIN_SCORE},{MAX_SCORE}]"
                )));
            }
        }
        Ok(())
    }

    /// Exact match on the trimmed answer; anything else scores the minimum.
    pub fn score(&self, answer: &str) -> RiskScore {
        let answer = answer.trim();
        self.opts
            .iter()
            .position(|opt| opt == answer)
            .map(|idx| RiskScore::clamped(self.p_scores[idx], self.i_scores[idx]))
            .unwrap_or(RiskScore::MINIMUM)
    }
}

impl TextConfig {
    pub fn validate(&self) -> Result<(), ScoringError> {
        if self.threshold < 0 {
            return Err(ScoringError::text(format!(
                "threshold {} must be non-negative",
                self.threshold
            )));
        }
        let fields = [
            ("p_short", self.p_short),
            ("p_long", self.p_long),
            ("i_short", self.i_short),
            ("i_long", self.i_long),
        ];
        for (name, value) in fields {
            if !in_range(value) {
                return Err(ScoringError::text(format!(
                    "{name}={value} out of range [{MIN_SCORE},{MAX_SCORE}]"
                )));
            }
        }
        Ok(())
    }

    /// "Long" only when the trimmed length is strictly greater than the threshold.
    pub fn score(&self, answer: &str) -> RiskScore {
        let len = answer.trim().chars().count() as i64;
        if len > self.threshold {
            RiskScore::clamped(self.p_long, self.i_long)
        } else {
            RiskScore::clamped(self.p_short, self.i_short)
        }
    }
}

fn in_range(value: i64) -> bool {
    (MIN_SCORE..=MAX_SCORE).contains(&value)
}
