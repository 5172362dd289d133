//! Read access to finished reports by their bearer token.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::instrument;

use riskmap_core::{ReportId, ReportStatus, RiskResult, RiskTier};

use crate::store::{ReportStore, StoreError};

/// Result of looking a report up by access token.
#[derive(Debug, Clone, PartialEq)]
pub enum ReportAccess {
    NotFound,
    /// Not `ready` yet (or failed); callers poll.
    Pending { status: ReportStatus },
    Ready(ReportView),
}

/// A finished report, shaped for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportView {
    pub report_id: ReportId,
    pub status: ReportStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub business_name: Option<String>,
    pub overall_score: i32,
    pub critical_count: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executive_summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_priority_html: Option<String>,
    pub risks: Vec<RiskView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskView {
    pub rank: i32,
    pub question_id: String,
    pub risk_name: String,
    pub risk_desc: String,
    pub probability: i16,
    pub impact: i16,
    pub score: i16,
    pub tier: RiskTier,
    pub section: String,
    /// The AI narrative when present, otherwise the authored hedge.
    pub hedge: String,
}

impl From<RiskResult> for RiskView {
    fn from(row: RiskResult) -> Self {
        let hedge = row.effective_hedge().to_string();
        Self {
            rank: row.rank,
            question_id: row.question_id,
            risk_name: row.risk_name,
            risk_desc: row.risk_desc,
            probability: row.probability,
            impact: row.impact,
            score: row.score,
            tier: row.tier,
            section: row.section,
            hedge,
        }
    }
}

/// Look a report up by its access token. Result rows are read from the
/// result table, so narrative overrides are always reflected.
#[instrument(skip(store, token), err)]
pub async fn fetch_report(store: &dyn ReportStore, token: &str) -> Result<ReportAccess, StoreError> {
    let token = token.trim();
    if token.is_empty() {
        return Ok(ReportAccess::NotFound);
    }

    let Some(report) = store.get_report_by_access_token(token).await? else {
        return Ok(ReportAccess::NotFound);
    };
    if report.status != ReportStatus::Ready {
        return Ok(ReportAccess::Pending {
            status: report.status,
        });
    }

    let risks = store.list_risk_results(report.id).await?;
    let business_name = store
        .get_session(report.session_id)
        .await?
        .and_then(|s| s.business_name().map(str::to_string));

    Ok(ReportAccess::Ready(ReportView {
        report_id: report.id,
        status: report.status,
        business_name,
        overall_score: report.overall_score.unwrap_or_default(),
        critical_count: report.critical_count.unwrap_or_default(),
        executive_summary: report.executive_summary,
        top_priority_html: report.top_priority_html,
        risks: risks.into_iter().map(RiskView::from).collect(),
        generated_at: report.generated_at,
    }))
}
