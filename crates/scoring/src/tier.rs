//! Quadrant classification of probability/impact pairs.

use serde::{Deserialize, Serialize};

use riskmap_core::RiskTier;

use crate::config::{MAX_SCORE, MIN_SCORE, ScoringError};

/// Impact at or above which a risk is "high impact".
pub const HIGH_IMPACT_THRESHOLD: u8 = 7;
/// Probability at or above which a risk is "high probability".
pub const HIGH_PROBABILITY_THRESHOLD: u8 = 6;

/// Cutoffs splitting the 10×10 grid into four tiers.
///
/// Defaults mirror the published scoring reference (impact ≥ 7,
/// probability ≥ 6) and can be overridden from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierThresholds {
    pub high_impact: u8,
    pub high_probability: u8,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            high_impact: HIGH_IMPACT_THRESHOLD,
            high_probability: HIGH_PROBABILITY_THRESHOLD,
        }
    }
}

impl TierThresholds {
    pub fn new(high_impact: u8, high_probability: u8) -> Result<Self, ScoringError> {
        for (name, value) in [
            ("high_impact", high_impact),
            ("high_probability", high_probability),
        ] {
            if !(MIN_SCORE..=MAX_SCORE).contains(&i64::from(value)) {
                return Err(ScoringError::Thresholds(format!(
                    "{name}={value} out of range [{MIN_SCORE},{MAX_SCORE}]"
                )));
            }
        }
        Ok(Self {
            high_impact,
            high_probability,
        })
    }

    pub fn classify(&self, probability: u8, impact: u8) -> RiskTier {
        let high_impact = impact >= self.high_impact;
        let high_probability = probability >= self.high_probability;
        match (high_probability, high_impact) {
            (true, true) => RiskTier::Watch,
            (false, true) => RiskTier::Red,
            (true, false) => RiskTier::Manage,
            (false, false) => RiskTier::Ignore,
        }
    }
}

/// Classify against the default cutoffs.
pub fn get_tier(probability: u8, impact: u8) -> RiskTier {
    TierThresholds::default().classify(probability, impact)
}
