//! In-memory store for tests/dev.
//!
//! One mutex guards all state, so every operation is trivially serializable.
//! Multi-step writes build their changes first and apply them only once every
//! step has succeeded, which gives the same all-or-nothing behaviour as the
//! Postgres transactions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use riskmap_core::{
    AnswerRow, PaymentStatus, QuestionDefinition, Report, ReportId, ReportStatus, RiskResult,
    RiskResultId, Session, SessionId,
};
use riskmap_scoring::RiskScore;

use super::{
    AttachPaymentIntent, Attachment, EVENT_CLAIM_LEASE, EventRecord, Finalized,
    PersistScoredReport, ReportInit, ReportStore, StoreError, UpsertAnswer, applicable_hedges,
};

#[derive(Debug, Clone)]
struct StoredAnswer {
    answer_text: String,
    #[allow(dead_code)]
    preview: Option<RiskScore>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum EventStatus {
    Received,
    Processed,
    Failed,
}

#[derive(Debug, Clone)]
struct EventEntry {
    status: EventStatus,
    error: Option<String>,
    attempts: u32,
    received_at: DateTime<Utc>,
}

impl EventEntry {
    fn claimable(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            EventStatus::Failed => true,
            EventStatus::Received => lease_expired(self.received_at, now),
            EventStatus::Processed => false,
        }
    }
}

fn lease_expired(received_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    TimeDelta::from_std(EVENT_CLAIM_LEASE)
        .ok()
        .and_then(|lease| received_at.checked_add_signed(lease))
        .is_some_and(|expires| expires < now)
}

#[derive(Debug, Default)]
struct State {
    sessions: HashMap<SessionId, Session>,
    questions: HashMap<String, QuestionDefinition>,
    answers: HashMap<(SessionId, String), StoredAnswer>,
    reports: HashMap<ReportId, Report>,
    risk_results: HashMap<ReportId, Vec<RiskResult>>,
    events: HashMap<String, EventEntry>,
}

impl State {
    fn session_by_intent_mut(&mut self, intent_ref: &str) -> Result<&mut Session, StoreError> {
        self.sessions
            .values_mut()
            .find(|s| s.attached_intent() == Some(intent_ref))
            .ok_or_else(|| StoreError::not_found(format!("session for payment intent {intent_ref}")))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryReportStore {
    state: Mutex<State>,
}

impl InMemoryReportStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a questionnaire item (seed data).
    pub fn insert_question(&self, question: QuestionDefinition) -> Result<(), StoreError> {
        self.state()?.questions.insert(question.id.clone(), question);
        Ok(())
    }

    /// Insert or replace a session verbatim (seed data).
    pub fn insert_session(&self, session: Session) -> Result<(), StoreError> {
        self.state()?.sessions.insert(session.id, session);
        Ok(())
    }

    /// Attempts recorded against a payment event, if it exists.
    pub fn payment_event_attempts(&self, event_id: &str) -> Result<Option<u32>, StoreError> {
        Ok(self.state()?.events.get(event_id).map(|e| e.attempts))
    }

    /// Error recorded against a payment event, if any.
    pub fn payment_event_error(&self, event_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self.state()?.events.get(event_id).and_then(|e| e.error.clone()))
    }

    /// Move a payment event's claim time `by` into the past.
    pub fn backdate_payment_event(&self, event_id: &str, by: Duration) -> Result<(), StoreError> {
        let by = TimeDelta::from_std(by).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let mut state = self.state()?;
        let entry = state
            .events
            .get_mut(event_id)
            .ok_or_else(|| StoreError::not_found(format!("payment event {event_id}")))?;
        entry.received_at -= by;
        Ok(())
    }

    fn state(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Database("in-memory store lock poisoned".to_string()))
    }
}

#[async_trait::async_trait]
impl ReportStore for InMemoryReportStore {
    async fn create_session(&self, anon_token: &str) -> Result<Session, StoreError> {
        let mut state = self.state()?;
        if state.sessions.values().any(|s| s.anon_token == anon_token) {
            return Err(StoreError::Conflict("anon token already in use".to_string()));
        }
        let session = Session::new(anon_token);
        state.sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn get_session(&self, id: SessionId) -> Result<Option<Session>, StoreError> {
        Ok(self.state()?.sessions.get(&id).cloned())
    }

    async fn upsert_answer(&self, answer: UpsertAnswer) -> Result<(), StoreError> {
        let mut state = self.state()?;
        if !state.sessions.contains_key(&answer.session_id) {
            return Err(StoreError::not_found(format!("session {}", answer.session_id)));
        }
        if !state.questions.contains_key(&answer.question_id) {
            return Err(StoreError::not_found(format!("question {}", answer.question_id)));
        }
        state.answers.insert(
            (answer.session_id, answer.question_id),
            StoredAnswer {
                answer_text: answer.answer_text,
                preview: answer.preview,
            },
        );
        Ok(())
    }

    async fn answers_for_session(&self, session_id: SessionId) -> Result<Vec<AnswerRow>, StoreError> {
        let state = self.state()?;
        let mut rows: Vec<(i32, AnswerRow)> = state
            .answers
            .iter()
            .filter(|((sid, _), _)| *sid == session_id)
            .filter_map(|((_, qid), answer)| {
                state
                    .questions
                    .get(qid)
                    .map(|q| (q.sort_order, AnswerRow::from_question(q, answer.answer_text.clone())))
            })
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.question_id.cmp(&b.1.question_id)));
        Ok(rows.into_iter().map(|(_, row)| row).collect())
    }

    async fn attach_payment_intent(
        &self,
        params: AttachPaymentIntent,
    ) -> Result<Attachment, StoreError> {
        let mut state = self.state()?;
        let session = state
            .sessions
            .get_mut(&params.session_id)
            .ok_or_else(|| StoreError::not_found(format!("session {}", params.session_id)))?;

        if session.attached_intent().is_some() {
            return Ok(Attachment::AlreadyAttached(session.clone()));
        }

        session.customer_ref = params.customer_ref.filter(|c| !c.is_empty());
        session.payment_intent_ref = Some(params.intent_ref);
        if let Some(email) = params.email.filter(|e| !e.is_empty()) {
            session.email = Some(email);
        }
        session.updated_at = Utc::now();
        Ok(Attachment::Attached(session.clone()))
    }

    async fn mark_session_payment_failed(&self, intent_ref: &str) -> Result<(), StoreError> {
        let mut state = self.state()?;
        let session = state.session_by_intent_mut(intent_ref)?;
        session.payment_status = PaymentStatus::Failed;
        session.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_session_refunded(&self, intent_ref: &str) -> Result<(), StoreError> {
        let mut state = self.state()?;
        let session = state.session_by_intent_mut(intent_ref)?;
        session.payment_status = PaymentStatus::Refunded;
        session.updated_at = Utc::now();
        Ok(())
    }

    async fn initialise_report(&self, intent_ref: &str) -> Result<ReportInit, StoreError> {
        let mut state = self.state()?;
        let session_id = state.session_by_intent_mut(intent_ref)?.id;

        if let Some(existing) = state.reports.values().find(|r| r.session_id == session_id) {
            return Ok(ReportInit::AlreadyExists(existing.clone()));
        }

        let now = Utc::now();
        let session = state.session_by_intent_mut(intent_ref)?;
        session.payment_status = PaymentStatus::Paid;
        session.paid_at.get_or_insert(now);
        session.updated_at = now;

        let report = Report::draft(session_id);
        state.reports.insert(report.id, report.clone());
        Ok(ReportInit::Created(report))
    }

    async fn get_report(&self, id: ReportId) -> Result<Option<Report>, StoreError> {
        Ok(self.state()?.reports.get(&id).cloned())
    }

    async fn get_report_by_access_token(&self, token: &str) -> Result<Option<Report>, StoreError> {
        Ok(self
            .state()?
            .reports
            .values()
            .find(|r| r.access_token.as_str() == token)
            .cloned())
    }

    async fn list_risk_results(&self, report_id: ReportId) -> Result<Vec<RiskResult>, StoreError> {
        let mut rows = self
            .state()?
            .risk_results
            .get(&report_id)
            .cloned()
            .unwrap_or_default();
        rows.sort_by_key(|r| r.rank);
        Ok(rows)
    }

    async fn persist_scored_report(&self, params: PersistScoredReport) -> Result<Report, StoreError> {
        let mut state = self.state()?;
        let report = state
            .reports
            .get(&params.report_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("report {}", params.report_id)))?;

        match report.status {
            ReportStatus::Ready => return Ok(report),
            ReportStatus::Error => {
                return Err(StoreError::Conflict(format!(
                    "report {} is already in error status",
                    report.id
                )));
            }
            ReportStatus::Draft | ReportStatus::Processing => {}
        }

        let mut rows: Vec<RiskResult> = Vec::with_capacity(params.risks.len());
        for risk in &params.risks {
            if rows.iter().any(|r| r.question_id == risk.question_id) {
                return Err(StoreError::Conflict(format!(
                    "duplicate risk result for question {}",
                    risk.question_id
                )));
            }
            rows.push(RiskResult {
                id: RiskResultId::new(),
                report_id: report.id,
                question_id: risk.question_id.clone(),
                rank: risk.rank as i32,
                risk_name: risk.risk_name.clone(),
                risk_desc: risk.risk_desc.clone(),
                probability: i16::from(risk.probability),
                impact: i16::from(risk.impact),
                score: risk.score as i16,
                tier: risk.tier,
                hedge: risk.hedge.clone(),
                ai_hedge: None,
                section: risk.section.clone(),
            });
        }

        let overrides: Vec<(String, String)> = applicable_hedges(&params.ai_hedges, |qid| {
            rows.iter().any(|r| r.question_id == qid)
        })
        .map(|(q, t)| (q.to_string(), t.to_string()))
        .collect();
        for (qid, text) in overrides {
            if let Some(row) = rows.iter_mut().find(|r| r.question_id == qid) {
                row.ai_hedge = Some(text);
            }
        }

        let finalized = Finalized::from_risks(&params.risks)?;
        let now = Utc::now();
        let mut ready = report;
        ready.status = ReportStatus::Ready;
        ready.overall_score = Some(finalized.overall_score);
        ready.critical_count = Some(finalized.critical_count);
        ready.executive_summary = Some(params.executive_summary).filter(|s| !s.is_empty());
        ready.top_priority_html = Some(params.top_priority_html).filter(|s| !s.is_empty());
        ready.risks_snapshot = Some(finalized.snapshot);
        ready.generated_at = Some(now);
        ready.error_message = None;
        ready.updated_at = now;

        state.risk_results.insert(ready.id, rows);
        state.reports.insert(ready.id, ready.clone());
        Ok(ready)
    }

    async fn mark_report_failed(&self, id: ReportId, reason: &str) -> Result<(), StoreError> {
        let mut state = self.state()?;
        if let Some(report) = state.reports.get_mut(&id) {
            if report.status != ReportStatus::Ready {
                report.status = ReportStatus::Error;
                report.error_message = Some(reason.to_string());
                report.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn list_pending_reports(&self, since: DateTime<Utc>) -> Result<Vec<ReportId>, StoreError> {
        let state = self.state()?;
        let mut pending: Vec<&Report> = state
            .reports
            .values()
            .filter(|r| !r.status.is_terminal() && r.created_at >= since)
            .collect();
        pending.sort_by_key(|r| (r.created_at, *r.id.as_uuid()));
        Ok(pending.into_iter().map(|r| r.id).collect())
    }

    async fn record_payment_event(
        &self,
        event_id: &str,
        _event_type: &str,
        _payload: &serde_json::Value,
    ) -> Result<EventRecord, StoreError> {
        let now = Utc::now();
        let mut state = self.state()?;
        match state.events.get_mut(event_id) {
            Some(entry) if entry.claimable(now) => {
                entry.status = EventStatus::Received;
                entry.error = None;
                entry.attempts += 1;
                entry.received_at = now;
                Ok(EventRecord::Recorded)
            }
            Some(_) => Ok(EventRecord::Duplicate),
            None => {
                state.events.insert(
                    event_id.to_string(),
                    EventEntry {
                        status: EventStatus::Received,
                        error: None,
                        attempts: 1,
                        received_at: now,
                    },
                );
                Ok(EventRecord::Recorded)
            }
        }
    }

    async fn complete_payment_event(
        &self,
        event_id: &str,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut state = self.state()?;
        let entry = state
            .events
            .get_mut(event_id)
            .ok_or_else(|| StoreError::not_found(format!("payment event {event_id}")))?;
        match error {
            None => {
                entry.status = EventStatus::Processed;
                entry.error = None;
            }
            Some(message) => {
                entry.status = EventStatus::Failed;
                entry.error = Some(message.to_string());
            }
        }
        Ok(())
    }
}
