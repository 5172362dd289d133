//! `riskmap-core`: shared domain vocabulary.
//!
//! **Responsibility:** identifiers, the data model of sessions, answers and
//! reports, and the domain error type. No I/O.

pub mod error;
pub mod id;
pub mod report;
pub mod session;
pub mod token;

pub use error::DomainError;
pub use id::{ReportId, RiskResultId, SessionId};
pub use report::{AnswerRow, QuestionDefinition, Report, ReportStatus, RiskResult, RiskTier};
pub use session::{PaymentStatus, Session};
pub use token::AccessToken;
