//! Primary/secondary composition of hedgers.

use std::sync::Arc;

use tracing::warn;

use riskmap_scoring::ScoredRisk;

use crate::hedger::{HedgeError, HedgeResult, Hedger};

/// Calls `primary`; on failure delegates entirely to `secondary`.
///
/// - primary success never touches the secondary;
/// - primary failure without a secondary surfaces [`HedgeError::PrimaryFailed`]
///   with the primary's error as its source;
/// - no primary at all goes straight to the secondary.
#[derive(Clone)]
pub struct FallbackHedger {
    primary: Option<Arc<dyn Hedger>>,
    secondary: Option<Arc<dyn Hedger>>,
}

impl FallbackHedger {
    pub fn new(primary: Option<Arc<dyn Hedger>>, secondary: Option<Arc<dyn Hedger>>) -> Self {
        Self { primary, secondary }
    }
}

impl std::fmt::Debug for FallbackHedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackHedger")
            .field("primary", &self.primary.as_ref().map(|h| h.name().to_string()))
            .field("secondary", &self.secondary.as_ref().map(|h| h.name().to_string()))
            .finish()
    }
}

#[async_trait::async_trait]
impl Hedger for FallbackHedger {
    fn name(&self) -> &str {
        "fallback"
    }

    async fn generate_hedges(&self, risks: &[ScoredRisk]) -> Result<HedgeResult, HedgeError> {
        if risks.is_empty() {
            return Ok(HedgeResult::default());
        }

        let Some(primary) = &self.primary else {
            return match &self.secondary {
                Some(secondary) => secondary.generate_hedges(risks).await,
                None => Err(HedgeError::NoProvider),
            };
        };

        let err = match primary.generate_hedges(risks).await {
            Ok(result) => return Ok(result),
            Err(err) => err,
        };

        match &self.secondary {
            Some(secondary) => {
                warn!(
                    primary = primary.name(),
                    secondary = secondary.name(),
                    error = %err,
                    "primary hedger failed, falling back"
                );
                secondary.generate_hedges(risks).await
            }
            None => {
                warn!(primary = primary.name(), error = %err, "primary hedger failed");
                Err(HedgeError::PrimaryFailed {
                    source: Box::new(err),
                })
            }
        }
    }
}
