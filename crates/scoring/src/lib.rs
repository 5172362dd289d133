//! `riskmap-scoring`
//!
//! **Responsibility:** turn questionnaire answers into ranked, tiered risks.
//!
//! Everything here is pure and deterministic:
//! - no I/O and no shared state;
//! - malformed scoring configuration is a hard error, never a default score.

pub mod config;
pub mod engine;
pub mod tier;

pub use config::{RadioConfig, RiskScore, ScoringConfig, ScoringError, TextConfig};
pub use engine::{
    ScoredRisk, Scorer, compute_risks, critical_count, filter_by_tier, overall_score, score_answer,
};
pub use tier::{TierThresholds, get_tier};
