//! Transactional store for sessions, reports and payment events.
//!
//! ## Design
//!
//! - Multi-row writes run as one serializable transaction and either fully
//!   land or fully roll back.
//! - Cross-request races (double checkout, duplicate payment events, duplicate
//!   enqueue) are resolved by the database, not by in-process locks.
//! - Idempotent replays are reported as outcome variants
//!   ([`Attachment::AlreadyAttached`], [`ReportInit::AlreadyExists`],
//!   [`EventRecord::Duplicate`]), never as errors.
//!
//! ## Components
//!
//! - `ReportStore`: the storage contract
//! - `PgReportStore`: Postgres implementation (sqlx)
//! - `InMemoryReportStore`: single-process implementation for tests/dev

pub mod memory;
pub mod postgres;

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use riskmap_core::{AnswerRow, Report, ReportId, RiskResult, Session, SessionId};
use riskmap_scoring::{RiskScore, ScoredRisk};

pub use memory::InMemoryReportStore;
pub use postgres::PgReportStore;

/// How long a `received` event record is held by the process that claimed
/// it. A record still `received` after this is treated as abandoned by a
/// crashed or interrupted handler and may be claimed again.
pub const EVENT_CLAIM_LEASE: Duration = Duration::from_secs(5 * 60);

/// Store error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    /// SQLSTATE 40001; safe to retry the whole operation.
    #[error("serialization failure: {0}")]
    Serialization(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("database error: {0}")]
    Database(String),

    /// A row could not be encoded or decoded.
    #[error("corrupt data: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }
}

/// Input to [`ReportStore::attach_payment_intent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachPaymentIntent {
    pub session_id: SessionId,
    pub customer_ref: Option<String>,
    pub intent_ref: String,
    pub email: Option<String>,
}

/// Outcome of attaching a payment intent to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attachment {
    /// The new intent was written.
    Attached(Session),
    /// Another intent was already attached; the session returned carries it.
    AlreadyAttached(Session),
}

impl Attachment {
    pub fn session(&self) -> &Session {
        match self {
            Attachment::Attached(s) | Attachment::AlreadyAttached(s) => s,
        }
    }
}

/// Outcome of initialising the report for a paid session.
#[derive(Debug, Clone, PartialEq)]
pub enum ReportInit {
    Created(Report),
    /// A report already existed for the session; nothing was written.
    AlreadyExists(Report),
}

impl ReportInit {
    pub fn report(&self) -> &Report {
        match self {
            ReportInit::Created(r) | ReportInit::AlreadyExists(r) => r,
        }
    }
}

/// Outcome of recording an external payment event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventRecord {
    Recorded,
    /// Zero rows affected: the event was already seen.
    Duplicate,
}

/// Input to [`ReportStore::persist_scored_report`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PersistScoredReport {
    pub report_id: ReportId,
    pub risks: Vec<ScoredRisk>,
    /// Narrative overrides keyed by question id.
    pub ai_hedges: HashMap<String, String>,
    pub executive_summary: String,
    pub top_priority_html: String,
}

/// Input to [`ReportStore::upsert_answer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertAnswer {
    pub session_id: SessionId,
    pub question_id: String,
    pub answer_text: String,
    /// Client-computed preview, stored for display only.
    pub preview: Option<RiskScore>,
}

#[async_trait::async_trait]
pub trait ReportStore: Send + Sync {
    async fn create_session(&self, anon_token: &str) -> Result<Session, StoreError>;

    async fn get_session(&self, id: SessionId) -> Result<Option<Session>, StoreError>;

    async fn upsert_answer(&self, answer: UpsertAnswer) -> Result<(), StoreError>;

    /// Answers joined with question metadata, in questionnaire order.
    async fn answers_for_session(&self, session_id: SessionId) -> Result<Vec<AnswerRow>, StoreError>;

    /// Attach a payment intent unless one is already attached.
    async fn attach_payment_intent(
        &self,
        params: AttachPaymentIntent,
    ) -> Result<Attachment, StoreError>;

    async fn mark_session_payment_failed(&self, intent_ref: &str) -> Result<(), StoreError>;

    async fn mark_session_refunded(&self, intent_ref: &str) -> Result<(), StoreError>;

    /// Mark the owning session paid and create its `draft` report, atomically.
    async fn initialise_report(&self, intent_ref: &str) -> Result<ReportInit, StoreError>;

    async fn get_report(&self, id: ReportId) -> Result<Option<Report>, StoreError>;

    async fn get_report_by_access_token(&self, token: &str) -> Result<Option<Report>, StoreError>;

    /// Result rows of a report, by rank.
    async fn list_risk_results(&self, report_id: ReportId) -> Result<Vec<RiskResult>, StoreError>;

    /// Write result rows, overrides and aggregates and flip the report to
    /// `ready`, atomically. A report already `ready` is returned unchanged.
    async fn persist_scored_report(&self, params: PersistScoredReport) -> Result<Report, StoreError>;

    /// Flag a report `error`. Never overwrites a `ready` report.
    async fn mark_report_failed(&self, id: ReportId, reason: &str) -> Result<(), StoreError>;

    /// `draft`/`processing` reports created at or after `since`, oldest first.
    async fn list_pending_reports(&self, since: DateTime<Utc>) -> Result<Vec<ReportId>, StoreError>;

    /// Insert an idempotency record for an external event. A record that
    /// previously ended `failed`, or that is still `received` after
    /// [`EVENT_CLAIM_LEASE`], is re-claimed and reported as `Recorded`.
    async fn record_payment_event(
        &self,
        event_id: &str,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> Result<EventRecord, StoreError>;

    /// Close an event record as processed (`error == None`) or failed.
    async fn complete_payment_event(
        &self,
        event_id: &str,
        error: Option<&str>,
    ) -> Result<(), StoreError>;
}

/// Aggregates written on finalize.
pub(crate) struct Finalized {
    pub overall_score: i32,
    pub critical_count: i32,
    pub snapshot: serde_json::Value,
}

impl Finalized {
    pub(crate) fn from_risks(risks: &[ScoredRisk]) -> Result<Self, StoreError> {
        let snapshot = serde_json::to_value(risks)
            .map_err(|e| StoreError::Corrupt(format!("encode risk snapshot: {e}")))?;
        Ok(Self {
            overall_score: riskmap_scoring::overall_score(risks) as i32,
            critical_count: riskmap_scoring::critical_count(risks) as i32,
            snapshot,
        })
    }
}

/// AI overrides that apply: known question ids with non-blank text.
pub(crate) fn applicable_hedges<'a>(
    ai_hedges: &'a HashMap<String, String>,
    known: impl Fn(&str) -> bool + 'a,
) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
    ai_hedges
        .iter()
        .filter(move |(qid, text)| !text.trim().is_empty() && known(qid))
        .map(|(qid, text)| (qid.as_str(), text.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applicable_hedges_skip_unknown_and_blank() {
        let hedges: HashMap<String, String> = [
            ("q1".to_string(), "do this".to_string()),
            ("q2".to_string(), "   ".to_string()),
            ("ghost".to_string(), "ignored".to_string()),
        ]
        .into_iter()
        .collect();

        let mut picked: Vec<_> = applicable_hedges(&hedges, |q| q == "q1" || q == "q2").collect();
        picked.sort();
        assert_eq!(picked, vec![("q1", "do this")]);
    }
}
