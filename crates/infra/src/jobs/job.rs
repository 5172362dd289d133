//! The score-and-generate pipeline for a single report.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use riskmap_ai::{HedgeResult, Hedger};
use riskmap_core::{ReportId, RiskTier, SessionId};
use riskmap_scoring::{ScoringError, Scorer, critical_count, filter_by_tier, overall_score};

use crate::notify::{Mailer, ReportReady};
use crate::store::{PersistScoredReport, ReportStore, StoreError};

/// Tiers whose risks are sent to the hedger.
const HEDGED_TIERS: [RiskTier; 2] = [RiskTier::Watch, RiskTier::Red];

/// Job error. Any of these fails the attempt and lets the runner retry.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("report {0} not found")]
    ReportNotFound(ReportId),

    #[error("no answers found for session {0}")]
    NoAnswers(SessionId),

    #[error("scoring failed: {0}")]
    Scoring(#[from] ScoringError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Loads answers, scores them, asks for narrative hedges, persists the
/// result and sends the delivery email.
///
/// Hedging and email are best-effort: their failures are logged and never
/// fail the job.
#[derive(Clone)]
pub struct ReportJob {
    store: Arc<dyn ReportStore>,
    scorer: Scorer,
    hedger: Arc<dyn Hedger>,
    mailer: Arc<dyn Mailer>,
}

impl std::fmt::Debug for ReportJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportJob")
            .field("scorer", &self.scorer)
            .field("hedger", &self.hedger.name())
            .finish_non_exhaustive()
    }
}

impl ReportJob {
    pub fn new(
        store: Arc<dyn ReportStore>,
        scorer: Scorer,
        hedger: Arc<dyn Hedger>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self {
            store,
            scorer,
            hedger,
            mailer,
        }
    }

    pub fn store(&self) -> &Arc<dyn ReportStore> {
        &self.store
    }

    /// Run the pipeline once. A report that is already `ready` or `error`
    /// is left untouched.
    #[instrument(skip(self), fields(report_id = %report_id))]
    pub async fn run(&self, report_id: ReportId) -> Result<(), JobError> {
        let report = self
            .store
            .get_report(report_id)
            .await?
            .ok_or(JobError::ReportNotFound(report_id))?;

        if report.status.is_terminal() {
            debug!(status = report.status.as_str(), "report already finished, skipping");
            return Ok(());
        }

        let rows = self.store.answers_for_session(report.session_id).await?;
        if rows.is_empty() {
            return Err(JobError::NoAnswers(report.session_id));
        }
        debug!(count = rows.len(), "loaded answers");

        let risks = self.scorer.compute_risks(&rows)?;
        debug!(
            total = risks.len(),
            critical = critical_count(&risks),
            overall_score = overall_score(&risks),
            "scored risks"
        );

        let priority = filter_by_tier(&risks, &HEDGED_TIERS);
        let hedges = if priority.is_empty() {
            HedgeResult::default()
        } else {
            match self.hedger.generate_hedges(&priority).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(error = %e, hedger = self.hedger.name(), "hedge generation failed, using static hedges");
                    HedgeResult::default()
                }
            }
        };

        let finished = self
            .store
            .persist_scored_report(PersistScoredReport {
                report_id,
                risks,
                ai_hedges: hedges.hedges,
                executive_summary: hedges.executive_summary,
                top_priority_html: hedges.top_priority_html,
            })
            .await?;

        info!(
            overall_score = ?finished.overall_score,
            critical_count = ?finished.critical_count,
            "report persisted"
        );

        self.notify(report.session_id, &finished.access_token).await;
        Ok(())
    }

    async fn notify(&self, session_id: SessionId, access_token: &riskmap_core::AccessToken) {
        let session = match self.store.get_session(session_id).await {
            Ok(Some(session)) => session,
            Ok(None) => {
                warn!(session_id = %session_id, "session missing, skipping delivery email");
                return;
            }
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "could not load session for delivery email");
                return;
            }
        };

        let Some(to) = session.email.as_deref().map(str::trim).filter(|e| !e.is_empty()) else {
            warn!(session_id = %session_id, "session has no email address, skipping delivery email");
            return;
        };

        let message = ReportReady {
            to: to.to_string(),
            business_name: session.business_name().map(str::to_string),
            access_token: access_token.clone(),
        };
        if let Err(e) = self.mailer.send_report_ready(&message).await {
            warn!(session_id = %session_id, error = %e, "failed to send report email");
        }
    }
}
