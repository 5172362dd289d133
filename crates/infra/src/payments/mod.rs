//! Payment-provider integration: event processing and checkout.
//!
//! ## Design
//!
//! - Provider events are delivered at least once; each is recorded by id
//!   first and replays are acknowledged without side effects
//! - A confirmed payment creates the report and hands it to the runner
//! - Checkout never attaches two payment intents to one session
//!
//! ## Components
//!
//! - `PaymentEventProcessor`: applies provider events
//! - `Checkout`: creates or reuses the session's payment intent
//! - `PaymentGateway`: the provider API

pub mod checkout;
pub mod events;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use riskmap_core::SessionId;

use crate::store::StoreError;

pub use checkout::{Checkout, CheckoutTicket};
pub use events::{EventDisposition, PaymentEventProcessor};

pub const PAYMENT_SUCCEEDED: &str = "payment_intent.succeeded";
pub const PAYMENT_FAILED: &str = "payment_intent.payment_failed";
pub const CHARGE_REFUNDED: &str = "charge.refunded";

/// Payment error.
#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("event {event_id} has no `{field}`")]
    MissingField {
        event_id: String,
        field: &'static str,
    },

    #[error("session {0} not found")]
    SessionNotFound(SessionId),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("payment gateway error: {0}")]
    Gateway(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// A verified provider event. `payload` is the event's data object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
}

impl PaymentEvent {
    /// Intent id of a payment-intent event (`payload.id`).
    pub fn payment_intent_id(&self) -> Result<&str, PaymentError> {
        self.string_field("id")
    }

    /// Intent id a charge belongs to (`payload.payment_intent`).
    pub fn charge_payment_intent(&self) -> Result<&str, PaymentError> {
        self.string_field("payment_intent")
    }

    fn string_field(&self, field: &'static str) -> Result<&str, PaymentError> {
        self.payload
            .get(field)
            .and_then(serde_json::Value::as_str)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| PaymentError::MissingField {
                event_id: self.id.clone(),
                field,
            })
    }
}

/// Price charged per report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Price {
    pub amount_cents: i64,
    pub currency: String,
}

impl Default for Price {
    fn default() -> Self {
        Self {
            amount_cents: 5900,
            currency: "usd".to_string(),
        }
    }
}

/// Request for a new payment intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPaymentIntent {
    pub amount_cents: i64,
    pub currency: String,
    pub email: String,
    pub session_id: SessionId,
}

/// A provider payment intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentIntent {
    pub id: String,
    pub customer_ref: Option<String>,
    pub client_secret: String,
}

#[async_trait::async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_payment_intent(
        &self,
        request: NewPaymentIntent,
    ) -> Result<PaymentIntent, PaymentError>;

    /// Client secret of an existing intent.
    async fn client_secret(&self, intent_ref: &str) -> Result<String, PaymentError>;
}
