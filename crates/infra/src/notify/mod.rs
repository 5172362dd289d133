//! Transactional email delivery.

pub mod resend;

use thiserror::Error;

use riskmap_core::AccessToken;

pub use resend::ResendMailer;

/// Notification error.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("mail provider rejected the message ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("invalid recipient: {0:?}")]
    InvalidRecipient(String),
}

/// "Your report is ready" message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportReady {
    pub to: String,
    pub business_name: Option<String>,
    pub access_token: AccessToken,
}

/// Post-payment receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub to: String,
    pub business_name: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
}

#[async_trait::async_trait]
pub trait Mailer: Send + Sync {
    async fn send_report_ready(&self, message: &ReportReady) -> Result<(), NotifyError>;

    async fn send_receipt(&self, message: &Receipt) -> Result<(), NotifyError>;
}
