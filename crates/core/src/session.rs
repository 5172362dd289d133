//! Visitor sessions and their payment lifecycle.

use chrono::{DateTime, Utc};
use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::id::SessionId;

/// Payment state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "paid" => Ok(PaymentStatus::Paid),
            "failed" => Ok(PaymentStatus::Failed),
            "refunded" => Ok(PaymentStatus::Refunded),
            other => Err(DomainError::unknown_status("payment status", other)),
        }
    }
}

/// One anonymous visitor.
///
/// At most one payment intent is ever attached; the store enforces this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    /// Bearer token the browser holds for this session.
    pub anon_token: String,
    pub payment_status: PaymentStatus,
    pub customer_ref: Option<String>,
    pub payment_intent_ref: Option<String>,
    pub email: Option<String>,
    pub business_name: Option<String>,
    pub business_context: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(anon_token: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            anon_token: anon_token.into(),
            payment_status: PaymentStatus::Pending,
            customer_ref: None,
            payment_intent_ref: None,
            email: None,
            business_name: None,
            business_context: None,
            paid_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The attached payment intent, ignoring empty strings.
    pub fn attached_intent(&self) -> Option<&str> {
        self.payment_intent_ref.as_deref().filter(|s| !s.is_empty())
    }

    /// The business name, ignoring blank values.
    pub fn business_name(&self) -> Option<&str> {
        self.business_name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_intent_is_not_attached() {
        let mut s = Session::new("tok");
        assert_eq!(s.attached_intent(), None);
        s.payment_intent_ref = Some(String::new());
        assert_eq!(s.attached_intent(), None);
        s.payment_intent_ref = Some("pi_1".into());
        assert_eq!(s.attached_intent(), Some("pi_1"));
    }

    #[test]
    fn payment_status_round_trips_through_str() {
        for status in [
            PaymentStatus::Pending,
            PaymentStatus::Paid,
            PaymentStatus::Failed,
            PaymentStatus::Refunded,
        ] {
            assert_eq!(status.as_str().parse::<PaymentStatus>().unwrap(), status);
        }
        assert!("settled".parse::<PaymentStatus>().is_err());
    }
}
