//! Starting a payment for a questionnaire session.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use riskmap_core::SessionId;

use super::{NewPaymentIntent, PaymentError, PaymentGateway, Price};
use crate::store::{AttachPaymentIntent, Attachment, ReportStore};

/// What the browser needs to confirm the payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutTicket {
    pub client_secret: String,
    /// The session already had an intent; its secret is returned.
    pub is_existing: bool,
}

#[derive(Clone)]
pub struct Checkout {
    store: Arc<dyn ReportStore>,
    gateway: Arc<dyn PaymentGateway>,
    price: Price,
}

impl Checkout {
    pub fn new(store: Arc<dyn ReportStore>, gateway: Arc<dyn PaymentGateway>, price: Price) -> Self {
        Self {
            store,
            gateway,
            price,
        }
    }

    /// Create or reuse the session's payment intent.
    ///
    /// Concurrent calls for one session end up sharing a single attached
    /// intent: the loser of the attach race returns the winner's secret.
    #[instrument(skip(self, email), fields(session_id = %session_id), err)]
    pub async fn begin(&self, session_id: SessionId, email: &str) -> Result<CheckoutTicket, PaymentError> {
        let email = email.trim();
        if email.is_empty() {
            return Err(PaymentError::Validation("email is required".into()));
        }

        let session = self
            .store
            .get_session(session_id)
            .await?
            .ok_or(PaymentError::SessionNotFound(session_id))?;

        if let Some(intent) = session.attached_intent() {
            match self.gateway.client_secret(intent).await {
                Ok(client_secret) => {
                    return Ok(CheckoutTicket {
                        client_secret,
                        is_existing: true,
                    });
                }
                Err(e) => {
                    warn!(intent, error = %e, "existing intent unavailable, creating a new one");
                }
            }
        }

        let intent = self
            .gateway
            .create_payment_intent(NewPaymentIntent {
                amount_cents: self.price.amount_cents,
                currency: self.price.currency.clone(),
                email: email.to_string(),
                session_id,
            })
            .await?;

        let attachment = self
            .store
            .attach_payment_intent(AttachPaymentIntent {
                session_id,
                customer_ref: intent.customer_ref.clone(),
                intent_ref: intent.id.clone(),
                email: Some(email.to_string()),
            })
            .await?;

        match attachment {
            Attachment::Attached(_) => Ok(CheckoutTicket {
                client_secret: intent.client_secret,
                is_existing: false,
            }),
            Attachment::AlreadyAttached(winner) => {
                // The intent created above is left to expire unused.
                info!(unused_intent = %intent.id, "lost checkout race, returning existing intent");
                let winning = winner.attached_intent().ok_or_else(|| {
                    PaymentError::Gateway("attached session carries no intent".into())
                })?;
                let client_secret = self.gateway.client_secret(winning).await?;
                Ok(CheckoutTicket {
                    client_secret,
                    is_existing: true,
                })
            }
        }
    }
}
