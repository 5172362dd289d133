//! `riskmap-ai`
//!
//! **Responsibility:** narrative hedges for high-priority risks.
//!
//! This crate never decides scores or tiers:
//! - it consumes already-scored risks;
//! - its output is an opaque narrative overlay; callers treat failures as
//!   non-fatal and fall back to the authored hedge text.

pub mod anthropic;
pub mod deepseek;
pub mod fallback;
pub mod hedger;
pub mod prompt;

pub use anthropic::AnthropicHedger;
pub use deepseek::DeepSeekHedger;
pub use fallback::FallbackHedger;
pub use hedger::{HedgeError, HedgeResult, Hedger};
