//! Postgres-backed report store.
//!
//! Every multi-step operation runs in one transaction at `SERIALIZABLE`
//! isolation. A transaction that loses a race is rolled back by Postgres with
//! SQLSTATE `40001` and the whole operation is replayed from the start, so the
//! loser re-reads the winner's committed state and resolves to the matching
//! idempotent outcome.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (serialization failure) | `40001` | `Serialization` | Concurrent transaction won; operation is retried |
//! | Database (deadlock detected) | `40P01` | `Serialization` | Treated like a serialization failure |
//! | Database (unique violation) | `23505` | `Conflict` | Duplicate key (e.g. result row for the same question) |
//! | Database (foreign key violation) | `23503` | `NotFound` | Referenced session/question does not exist |
//! | Database (other) | Any other | `Database` | Other database errors |
//! | RowNotFound | N/A | `NotFound` | `fetch_one` found nothing |
//! | PoolClosed / Other | N/A | `Database` | Network errors, pool shutdown, etc. |
//!
//! ## Thread Safety
//!
//! `PgReportStore` is `Send + Sync`; all access goes through the SQLx pool.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::{Span, debug, instrument};
use uuid::Uuid;

use riskmap_core::{
    AccessToken, AnswerRow, Report, ReportId, RiskResult, RiskResultId, Session, SessionId,
};

use super::{
    AttachPaymentIntent, Attachment, EVENT_CLAIM_LEASE, EventRecord, Finalized,
    PersistScoredReport, ReportInit, ReportStore, StoreError, UpsertAnswer, applicable_hedges,
};

/// Attempts per operation when Postgres reports a serialization failure.
const SERIALIZATION_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone)]
pub struct PgReportStore {
    pool: Arc<PgPool>,
}

impl PgReportStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    async fn begin_serializable(
        &self,
        operation: &str,
    ) -> Result<Transaction<'static, Postgres>, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        Ok(tx)
    }

    async fn attach_once(&self, params: &AttachPaymentIntent) -> Result<Attachment, StoreError> {
        let mut tx = self.begin_serializable("attach_payment_intent").await?;

        let row = sqlx::query("SELECT * FROM sessions WHERE id = $1")
            .bind(params.session_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("select_session", e))?
            .ok_or_else(|| StoreError::not_found(format!("session {}", params.session_id)))?;
        let session = decode_session(&row)?;

        if session.attached_intent().is_some() {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Ok(Attachment::AlreadyAttached(session));
        }

        let row = sqlx::query(
            r#"
            UPDATE sessions
            SET customer_ref = NULLIF($2, ''),
                payment_intent_ref = $3,
                email = COALESCE(NULLIF($4, ''), email),
                updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(params.session_id.as_uuid())
        .bind(params.customer_ref.as_deref().unwrap_or(""))
        .bind(&params.intent_ref)
        .bind(params.email.as_deref().unwrap_or(""))
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("attach_payment_intent", e))?;
        let session = decode_session(&row)?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(Attachment::Attached(session))
    }

    async fn initialise_once(&self, intent_ref: &str) -> Result<ReportInit, StoreError> {
        let mut tx = self.begin_serializable("initialise_report").await?;

        let session_id: Uuid = sqlx::query(
            r#"
            UPDATE sessions
            SET payment_status = 'paid',
                paid_at = COALESCE(paid_at, now()),
                updated_at = now()
            WHERE payment_intent_ref = $1
            RETURNING id
            "#,
        )
        .bind(intent_ref)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("mark_session_paid", e))?
        .ok_or_else(|| StoreError::not_found(format!("session for payment intent {intent_ref}")))?
        .try_get("id")
        .map_err(|e| StoreError::Corrupt(format!("session id: {e}")))?;

        let existing = sqlx::query("SELECT * FROM reports WHERE session_id = $1")
            .bind(session_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("select_report", e))?;
        if let Some(row) = existing {
            let report = decode_report(&row)?;
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Ok(ReportInit::AlreadyExists(report));
        }

        let draft = Report::draft(SessionId::from_uuid(session_id));
        let row = sqlx::query(
            r#"
            INSERT INTO reports (id, session_id, status, access_token)
            VALUES ($1, $2, 'draft', $3)
            RETURNING *
            "#,
        )
        .bind(draft.id.as_uuid())
        .bind(session_id)
        .bind(draft.access_token.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            // A concurrent insert for the same session: replay and find it.
            if is_unique_violation(&e) {
                StoreError::Serialization(format!("concurrent report creation for session {session_id}"))
            } else {
                map_sqlx_error("insert_report", e)
            }
        })?;
        let report = decode_report(&row)?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(ReportInit::Created(report))
    }

    async fn persist_once(&self, params: &PersistScoredReport) -> Result<Report, StoreError> {
        let mut tx = self.begin_serializable("persist_scored_report").await?;

        let row = sqlx::query("SELECT * FROM reports WHERE id = $1")
            .bind(params.report_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("select_report", e))?
            .ok_or_else(|| StoreError::not_found(format!("report {}", params.report_id)))?;
        let current = decode_report(&row)?;

        if current.status.is_terminal() {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return match current.status {
                riskmap_core::ReportStatus::Ready => Ok(current),
                _ => Err(StoreError::Conflict(format!(
                    "report {} is already in {} status",
                    current.id,
                    current.status.as_str()
                ))),
            };
        }

        sqlx::query("UPDATE reports SET status = 'processing', updated_at = now() WHERE id = $1")
            .bind(params.report_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_report_processing", e))?;

        let mut row_ids: HashMap<&str, Uuid> = HashMap::with_capacity(params.risks.len());
        for risk in &params.risks {
            let id = RiskResultId::new();
            sqlx::query(
                r#"
                INSERT INTO risk_results (
                    id, report_id, question_id, rank, risk_name, risk_desc,
                    probability, impact, score, tier, hedge, section
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                "#,
            )
            .bind(id.as_uuid())
            .bind(params.report_id.as_uuid())
            .bind(&risk.question_id)
            .bind(risk.rank as i32)
            .bind(&risk.risk_name)
            .bind(&risk.risk_desc)
            .bind(i16::from(risk.probability))
            .bind(i16::from(risk.impact))
            .bind(risk.score as i16)
            .bind(risk.tier.as_str())
            .bind(&risk.hedge)
            .bind(&risk.section)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::Conflict(format!(
                        "duplicate risk result for question {}",
                        risk.question_id
                    ))
                } else {
                    map_sqlx_error("insert_risk_result", e)
                }
            })?;
            row_ids.insert(risk.question_id.as_str(), *id.as_uuid());
        }

        let overrides: Vec<(Uuid, &str)> =
            applicable_hedges(&params.ai_hedges, |qid| row_ids.contains_key(qid))
                .filter_map(|(qid, text)| row_ids.get(qid).map(|id| (*id, text)))
                .collect();
        for (id, text) in &overrides {
            sqlx::query("UPDATE risk_results SET ai_hedge = $2 WHERE id = $1")
                .bind(id)
                .bind(*text)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("set_ai_hedge", e))?;
        }

        let finalized = Finalized::from_risks(&params.risks)?;
        let row = sqlx::query(
            r#"
            UPDATE reports
            SET status = 'ready',
                overall_score = $2,
                critical_count = $3,
                executive_summary = NULLIF($4, ''),
                top_priority_html = NULLIF($5, ''),
                risks_snapshot = $6,
                generated_at = now(),
                error_message = NULL,
                updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(params.report_id.as_uuid())
        .bind(finalized.overall_score)
        .bind(finalized.critical_count)
        .bind(&params.executive_summary)
        .bind(&params.top_priority_html)
        .bind(&finalized.snapshot)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("finalize_report", e))?;
        let report = decode_report(&row)?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Span::current().record("overrides", overrides.len());
        Ok(report)
    }

    async fn set_session_status_by_intent(
        &self,
        operation: &str,
        intent_ref: &str,
        status: &str,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE sessions SET payment_status = $2, updated_at = now() WHERE payment_intent_ref = $1",
        )
        .bind(intent_ref)
        .bind(status)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error(operation, e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(format!(
                "session for payment intent {intent_ref}"
            )));
        }
        Ok(())
    }
}

/// Replay `attempt` while it fails with a serialization conflict.
async fn retry_serializable<T, F, Fut>(operation: &str, mut attempt: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut tries = 1;
    loop {
        match attempt().await {
            Err(StoreError::Serialization(msg)) if tries < SERIALIZATION_ATTEMPTS => {
                debug!(operation, attempt = tries, error = %msg, "serialization conflict, replaying");
                tries += 1;
            }
            result => return result,
        }
    }
}

#[async_trait::async_trait]
impl ReportStore for PgReportStore {
    #[instrument(skip(self, anon_token), err)]
    async fn create_session(&self, anon_token: &str) -> Result<Session, StoreError> {
        let row = sqlx::query("INSERT INTO sessions (id, anon_token) VALUES ($1, $2) RETURNING *")
            .bind(SessionId::new().as_uuid())
            .bind(anon_token)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("create_session", e))?;
        decode_session(&row)
    }

    #[instrument(skip(self), fields(session_id = %id), err)]
    async fn get_session(&self, id: SessionId) -> Result<Option<Session>, StoreError> {
        sqlx::query("SELECT * FROM sessions WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_session", e))?
            .map(|row| decode_session(&row))
            .transpose()
    }

    #[instrument(skip(self, answer), fields(session_id = %answer.session_id, question_id = %answer.question_id), err)]
    async fn upsert_answer(&self, answer: UpsertAnswer) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO answers (session_id, question_id, answer_text, preview_probability, preview_impact)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (session_id, question_id) DO UPDATE
            SET answer_text = EXCLUDED.answer_text,
                preview_probability = EXCLUDED.preview_probability,
                preview_impact = EXCLUDED.preview_impact,
                updated_at = now()
            "#,
        )
        .bind(answer.session_id.as_uuid())
        .bind(&answer.question_id)
        .bind(&answer.answer_text)
        .bind(answer.preview.map(|p| i16::from(p.probability)))
        .bind(answer.preview.map(|p| i16::from(p.impact)))
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_answer", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(session_id = %session_id, answer_count), err)]
    async fn answers_for_session(&self, session_id: SessionId) -> Result<Vec<AnswerRow>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                a.question_id,
                a.answer_text,
                q.section_title,
                q.risk_name,
                q.risk_desc,
                q.hedge,
                q.scoring_config,
                q.is_scoring
            FROM answers a
            JOIN question_definitions q ON q.id = a.question_id
            WHERE a.session_id = $1
            ORDER BY q.sort_order ASC, q.id ASC
            "#,
        )
        .bind(session_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("answers_for_session", e))?;

        let answers = rows
            .iter()
            .map(|row| {
                AnswerJoinRow::from_row(row)
                    .map(AnswerRow::from)
                    .map_err(|e| StoreError::Corrupt(format!("failed to deserialize answer row: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Span::current().record("answer_count", answers.len());
        Ok(answers)
    }

    #[instrument(skip(self, params), fields(session_id = %params.session_id), err)]
    async fn attach_payment_intent(
        &self,
        params: AttachPaymentIntent,
    ) -> Result<Attachment, StoreError> {
        retry_serializable("attach_payment_intent", || self.attach_once(&params)).await
    }

    #[instrument(skip(self), err)]
    async fn mark_session_payment_failed(&self, intent_ref: &str) -> Result<(), StoreError> {
        self.set_session_status_by_intent("mark_session_payment_failed", intent_ref, "failed")
            .await
    }

    #[instrument(skip(self), err)]
    async fn mark_session_refunded(&self, intent_ref: &str) -> Result<(), StoreError> {
        self.set_session_status_by_intent("mark_session_refunded", intent_ref, "refunded")
            .await
    }

    #[instrument(skip(self), err)]
    async fn initialise_report(&self, intent_ref: &str) -> Result<ReportInit, StoreError> {
        retry_serializable("initialise_report", || self.initialise_once(intent_ref)).await
    }

    #[instrument(skip(self), fields(report_id = %id), err)]
    async fn get_report(&self, id: ReportId) -> Result<Option<Report>, StoreError> {
        sqlx::query("SELECT * FROM reports WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_report", e))?
            .map(|row| decode_report(&row))
            .transpose()
    }

    #[instrument(skip(self, token), err)]
    async fn get_report_by_access_token(&self, token: &str) -> Result<Option<Report>, StoreError> {
        sqlx::query("SELECT * FROM reports WHERE access_token = $1")
            .bind(token)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_report_by_access_token", e))?
            .map(|row| decode_report(&row))
            .transpose()
    }

    #[instrument(skip(self), fields(report_id = %report_id), err)]
    async fn list_risk_results(&self, report_id: ReportId) -> Result<Vec<RiskResult>, StoreError> {
        let rows = sqlx::query("SELECT * FROM risk_results WHERE report_id = $1 ORDER BY rank ASC")
            .bind(report_id.as_uuid())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_risk_results", e))?;

        rows.iter()
            .map(|row| {
                let raw = RiskResultRow::from_row(row).map_err(|e| {
                    StoreError::Corrupt(format!("failed to deserialize risk result row: {e}"))
                })?;
                RiskResult::try_from(raw)
            })
            .collect()
    }

    #[instrument(
        skip(self, params),
        fields(report_id = %params.report_id, risk_count = params.risks.len(), overrides),
        err
    )]
    async fn persist_scored_report(&self, params: PersistScoredReport) -> Result<Report, StoreError> {
        retry_serializable("persist_scored_report", || self.persist_once(&params)).await
    }

    #[instrument(skip(self), fields(report_id = %id), err)]
    async fn mark_report_failed(&self, id: ReportId, reason: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE reports
            SET status = 'error', error_message = $2, updated_at = now()
            WHERE id = $1 AND status <> 'ready'
            "#,
        )
        .bind(id.as_uuid())
        .bind(reason)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("mark_report_failed", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(pending), err)]
    async fn list_pending_reports(&self, since: DateTime<Utc>) -> Result<Vec<ReportId>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id
            FROM reports
            WHERE status IN ('draft', 'processing') AND created_at >= $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(since)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_pending_reports", e))?;

        let ids = rows
            .iter()
            .map(|row| {
                row.try_get::<Uuid, _>("id")
                    .map(ReportId::from_uuid)
                    .map_err(|e| StoreError::Corrupt(format!("report id: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Span::current().record("pending", ids.len());
        Ok(ids)
    }

    #[instrument(skip(self, payload), err)]
    async fn record_payment_event(
        &self,
        event_id: &str,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> Result<EventRecord, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO payment_events (event_id, event_type, payload)
            VALUES ($1, $2, $3)
            ON CONFLICT (event_id) DO UPDATE
            SET status = 'received',
                error = NULL,
                attempts = payment_events.attempts + 1,
                received_at = now()
            WHERE payment_events.status = 'failed'
               OR (payment_events.status = 'received'
                   AND payment_events.received_at < now() - make_interval(secs => $4))
            "#,
        )
        .bind(event_id)
        .bind(event_type)
        .bind(payload)
        .bind(EVENT_CLAIM_LEASE.as_secs_f64())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("record_payment_event", e))?;

        if result.rows_affected() == 0 {
            return Ok(EventRecord::Duplicate);
        }
        Ok(EventRecord::Recorded)
    }

    #[instrument(skip(self), err)]
    async fn complete_payment_event(
        &self,
        event_id: &str,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let status = if error.is_some() { "failed" } else { "processed" };
        let result = sqlx::query(
            r#"
            UPDATE payment_events
            SET status = $2, error = $3, processed_at = now()
            WHERE event_id = $1
            "#,
        )
        .bind(event_id)
        .bind(status)
        .bind(error)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("complete_payment_event", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(format!("payment event {event_id}")));
        }
        Ok(())
    }
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("40001") | Some("40P01") => StoreError::Serialization(msg),
                Some("23505") => StoreError::Conflict(msg),
                Some("23503") => StoreError::NotFound(msg),
                _ => StoreError::Database(msg),
            }
        }
        sqlx::Error::RowNotFound => {
            StoreError::NotFound(format!("no row returned in {}", operation))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Database(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Database(format!("sqlx error in {}: {}", operation, err)),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        return db_err.code().as_deref() == Some("23505");
    }
    false
}

fn decode_session(row: &PgRow) -> Result<Session, StoreError> {
    let raw = SessionRow::from_row(row)
        .map_err(|e| StoreError::Corrupt(format!("failed to deserialize session row: {e}")))?;
    Session::try_from(raw)
}

fn decode_report(row: &PgRow) -> Result<Report, StoreError> {
    let raw = ReportRow::from_row(row)
        .map_err(|e| StoreError::Corrupt(format!("failed to deserialize report row: {e}")))?;
    Report::try_from(raw)
}

// SQLx row types

#[derive(Debug)]
struct SessionRow {
    id: Uuid,
    anon_token: String,
    payment_status: String,
    customer_ref: Option<String>,
    payment_intent_ref: Option<String>,
    email: Option<String>,
    business_name: Option<String>,
    business_context: Option<String>,
    paid_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for SessionRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(SessionRow {
            id: row.try_get("id")?,
            anon_token: row.try_get("anon_token")?,
            payment_status: row.try_get("payment_status")?,
            customer_ref: row.try_get("customer_ref")?,
            payment_intent_ref: row.try_get("payment_intent_ref")?,
            email: row.try_get("email")?,
            business_name: row.try_get("business_name")?,
            business_context: row.try_get("business_context")?,
            paid_at: row.try_get("paid_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<SessionRow> for Session {
    type Error = StoreError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        Ok(Session {
            id: SessionId::from_uuid(row.id),
            anon_token: row.anon_token,
            payment_status: row
                .payment_status
                .parse()
                .map_err(|e| StoreError::Corrupt(format!("{e}")))?,
            customer_ref: row.customer_ref,
            payment_intent_ref: row.payment_intent_ref,
            email: row.email,
            business_name: row.business_name,
            business_context: row.business_context,
            paid_at: row.paid_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug)]
struct ReportRow {
    id: Uuid,
    session_id: Uuid,
    status: String,
    overall_score: Option<i32>,
    critical_count: Option<i32>,
    executive_summary: Option<String>,
    top_priority_html: Option<String>,
    risks_snapshot: Option<serde_json::Value>,
    access_token: String,
    generated_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for ReportRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(ReportRow {
            id: row.try_get("id")?,
            session_id: row.try_get("session_id")?,
            status: row.try_get("status")?,
            overall_score: row.try_get("overall_score")?,
            critical_count: row.try_get("critical_count")?,
            executive_summary: row.try_get("executive_summary")?,
            top_priority_html: row.try_get("top_priority_html")?,
            risks_snapshot: row.try_get("risks_snapshot")?,
            access_token: row.try_get("access_token")?,
            generated_at: row.try_get("generated_at")?,
            error_message: row.try_get("error_message")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl TryFrom<ReportRow> for Report {
    type Error = StoreError;

    fn try_from(row: ReportRow) -> Result<Self, Self::Error> {
        Ok(Report {
            id: ReportId::from_uuid(row.id),
            session_id: SessionId::from_uuid(row.session_id),
            status: row
                .status
                .parse()
                .map_err(|e| StoreError::Corrupt(format!("{e}")))?,
            overall_score: row.overall_score,
            critical_count: row.critical_count,
            executive_summary: row.executive_summary,
            top_priority_html: row.top_priority_html,
            risks_snapshot: row.risks_snapshot,
            access_token: AccessToken::from_string(row.access_token),
            generated_at: row.generated_at,
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug)]
struct RiskResultRow {
    id: Uuid,
    report_id: Uuid,
    question_id: String,
    rank: i32,
    risk_name: String,
    risk_desc: String,
    probability: i16,
    impact: i16,
    score: i16,
    tier: String,
    hedge: String,
    ai_hedge: Option<String>,
    section: String,
}

impl<'r> FromRow<'r, PgRow> for RiskResultRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(RiskResultRow {
            id: row.try_get("id")?,
            report_id: row.try_get("report_id")?,
            question_id: row.try_get("question_id")?,
            rank: row.try_get("rank")?,
            risk_name: row.try_get("risk_name")?,
            risk_desc: row.try_get("risk_desc")?,
            probability: row.try_get("probability")?,
            impact: row.try_get("impact")?,
            score: row.try_get("score")?,
            tier: row.try_get("tier")?,
            hedge: row.try_get("hedge")?,
            ai_hedge: row.try_get("ai_hedge")?,
            section: row.try_get("section")?,
        })
    }
}

impl TryFrom<RiskResultRow> for RiskResult {
    type Error = StoreError;

    fn try_from(row: RiskResultRow) -> Result<Self, Self::Error> {
        Ok(RiskResult {
            id: RiskResultId::from_uuid(row.id),
            report_id: ReportId::from_uuid(row.report_id),
            question_id: row.question_id,
            rank: row.rank,
            risk_name: row.risk_name,
            risk_desc: row.risk_desc,
            probability: row.probability,
            impact: row.impact,
            score: row.score,
            tier: row
                .tier
                .parse()
                .map_err(|e| StoreError::Corrupt(format!("{e}")))?,
            hedge: row.hedge,
            ai_hedge: row.ai_hedge,
            section: row.section,
        })
    }
}

#[derive(Debug)]
struct AnswerJoinRow {
    question_id: String,
    answer_text: String,
    section_title: String,
    risk_name: String,
    risk_desc: String,
    hedge: String,
    scoring_config: serde_json::Value,
    is_scoring: bool,
}

impl<'r> FromRow<'r, PgRow> for AnswerJoinRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(AnswerJoinRow {
            question_id: row.try_get("question_id")?,
            answer_text: row.try_get("answer_text")?,
            section_title: row.try_get("section_title")?,
            risk_name: row.try_get("risk_name")?,
            risk_desc: row.try_get("risk_desc")?,
            hedge: row.try_get("hedge")?,
            scoring_config: row.try_get("scoring_config")?,
            is_scoring: row.try_get("is_scoring")?,
        })
    }
}

impl From<AnswerJoinRow> for AnswerRow {
    fn from(row: AnswerJoinRow) -> Self {
        AnswerRow {
            question_id: row.question_id,
            answer_text: row.answer_text,
            section_title: row.section_title,
            risk_name: row.risk_name,
            risk_desc: row.risk_desc,
            hedge: row.hedge,
            scoring_config: row.scoring_config,
            is_scoring: row.is_scoring,
        }
    }
}
