//! The hedging capability: turn scored risks into a narrative overlay.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use riskmap_scoring::ScoredRisk;

/// Narrative overlay for a report.
///
/// `hedges` is keyed by question id. Keys that do not match a scored risk are
/// ignored downstream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HedgeResult {
    #[serde(default)]
    pub hedges: HashMap<String, String>,
    #[serde(default)]
    pub executive_summary: String,
    #[serde(default)]
    pub top_priority_html: String,
}

impl HedgeResult {
    pub fn is_empty(&self) -> bool {
        self.hedges.is_empty() && self.executive_summary.is_empty() && self.top_priority_html.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum HedgeError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {status}: {body}")]
    Api { status: u16, body: String },

    #[error("parse response: {0}")]
    Parse(String),

    #[error("no text content in response")]
    Empty,

    #[error("no hedging provider configured")]
    NoProvider,

    #[error("primary failed and no secondary configured: {source}")]
    PrimaryFailed {
        #[source]
        source: Box<HedgeError>,
    },
}

/// Capability that writes hedge narratives for a set of risks.
///
/// Implementations must be safe to call concurrently and must return an
/// empty result for empty input without doing any I/O.
#[async_trait::async_trait]
pub trait Hedger: Send + Sync {
    /// Short provider name for logs.
    fn name(&self) -> &str;

    async fn generate_hedges(&self, risks: &[ScoredRisk]) -> Result<HedgeResult, HedgeError>;
}
