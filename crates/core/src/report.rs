//! Reports, their result rows, and the questionnaire rows they are built from.

use chrono::{DateTime, Utc};
use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::id::{ReportId, RiskResultId, SessionId};
use crate::token::AccessToken;

/// Report state machine: `draft -> processing -> ready | error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    /// Created, nothing scored yet.
    Draft,
    /// Claimed by a worker. Re-entrant.
    Processing,
    /// Results and aggregates committed.
    Ready,
    /// Retries exhausted.
    Error,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Draft => "draft",
            ReportStatus::Processing => "processing",
            ReportStatus::Ready => "ready",
            ReportStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ReportStatus::Ready | ReportStatus::Error)
    }
}

impl FromStr for ReportStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(ReportStatus::Draft),
            "processing" => Ok(ReportStatus::Processing),
            "ready" => Ok(ReportStatus::Ready),
            "error" => Ok(ReportStatus::Error),
            other => Err(DomainError::unknown_status("report status", other)),
        }
    }
}

/// Probability/impact quadrant of a risk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    /// High probability, high impact.
    Watch,
    /// High impact only.
    Red,
    /// High probability only.
    Manage,
    Ignore,
}

impl RiskTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTier::Watch => "watch",
            RiskTier::Red => "red",
            RiskTier::Manage => "manage",
            RiskTier::Ignore => "ignore",
        }
    }
}

impl core::fmt::Display for RiskTier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskTier {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "watch" => Ok(RiskTier::Watch),
            "red" => Ok(RiskTier::Red),
            "manage" => Ok(RiskTier::Manage),
            "ignore" => Ok(RiskTier::Ignore),
            other => Err(DomainError::unknown_status("risk tier", other)),
        }
    }
}

/// One report per session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: ReportId,
    pub session_id: SessionId,
    pub status: ReportStatus,
    pub overall_score: Option<i32>,
    pub critical_count: Option<i32>,
    pub executive_summary: Option<String>,
    pub top_priority_html: Option<String>,
    /// Serialized scored risks at finalize time.
    pub risks_snapshot: Option<serde_json::Value>,
    pub access_token: AccessToken,
    pub generated_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Report {
    /// A fresh `draft` report with a newly generated access token.
    pub fn draft(session_id: SessionId) -> Self {
        let now = Utc::now();
        Self {
            id: ReportId::new(),
            session_id,
            status: ReportStatus::Draft,
            overall_score: None,
            critical_count: None,
            executive_summary: None,
            top_priority_html: None,
            risks_snapshot: None,
            access_token: AccessToken::generate(),
            generated_at: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Persisted result row for one scored question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskResult {
    pub id: RiskResultId,
    pub report_id: ReportId,
    pub question_id: String,
    /// Dense, 1-indexed.
    pub rank: i32,
    pub risk_name: String,
    pub risk_desc: String,
    pub probability: i16,
    pub impact: i16,
    pub score: i16,
    pub tier: RiskTier,
    pub hedge: String,
    pub ai_hedge: Option<String>,
    pub section: String,
}

impl RiskResult {
    /// AI narrative when present, otherwise the authored hedge.
    pub fn effective_hedge(&self) -> &str {
        self.ai_hedge
            .as_deref()
            .filter(|h| !h.is_empty())
            .unwrap_or(&self.hedge)
    }
}

/// Authored questionnaire item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionDefinition {
    pub id: String,
    pub section_title: String,
    pub risk_name: String,
    pub risk_desc: String,
    pub hedge: String,
    /// Raw scoring configuration; validated by the scoring engine.
    pub scoring_config: serde_json::Value,
    /// `false` for contextual questions that are never scored.
    pub is_scoring: bool,
    pub sort_order: i32,
}

/// An answer joined with its question metadata. Input to scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerRow {
    pub question_id: String,
    pub answer_text: String,
    pub section_title: String,
    pub risk_name: String,
    pub risk_desc: String,
    pub hedge: String,
    pub scoring_config: serde_json::Value,
    pub is_scoring: bool,
}

impl AnswerRow {
    pub fn from_question(question: &QuestionDefinition, answer_text: impl Into<String>) -> Self {
        Self {
            question_id: question.id.clone(),
            answer_text: answer_text.into(),
            section_title: question.section_title.clone(),
            risk_name: question.risk_name.clone(),
            risk_desc: question.risk_desc.clone(),
            hedge: question.hedge.clone(),
            scoring_config: question.scoring_config.clone(),
            is_scoring: question.is_scoring,
        }
    }
}
