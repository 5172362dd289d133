//! Applies provider payment events.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use riskmap_core::{ReportId, SessionId};

use super::{CHARGE_REFUNDED, PAYMENT_FAILED, PAYMENT_SUCCEEDED, PaymentError, PaymentEvent, Price};
use crate::jobs::Enqueuer;
use crate::notify::{Mailer, Receipt};
use crate::store::{EventRecord, ReportInit, ReportStore, StoreError};

/// What happened to an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventDisposition {
    /// Seen before; nothing was done.
    Duplicate,
    Processed,
    /// Event type this service does not act on.
    Ignored,
}

/// Records, dispatches and closes provider events.
///
/// An error from a handler is recorded against the event and returned, so
/// the provider redelivers it; a redelivered failed event is processed again.
#[derive(Clone)]
pub struct PaymentEventProcessor {
    store: Arc<dyn ReportStore>,
    enqueuer: Arc<dyn Enqueuer>,
    mailer: Arc<dyn Mailer>,
    price: Price,
}

impl PaymentEventProcessor {
    pub fn new(
        store: Arc<dyn ReportStore>,
        enqueuer: Arc<dyn Enqueuer>,
        mailer: Arc<dyn Mailer>,
        price: Price,
    ) -> Self {
        Self {
            store,
            enqueuer,
            mailer,
            price,
        }
    }

    #[instrument(skip(self, event), fields(event_id = %event.id, event_type = %event.event_type))]
    pub async fn process(&self, event: &PaymentEvent) -> Result<EventDisposition, PaymentError> {
        let record = self
            .store
            .record_payment_event(&event.id, &event.event_type, &event.payload)
            .await?;
        if record == EventRecord::Duplicate {
            debug!("duplicate event, skipping");
            return Ok(EventDisposition::Duplicate);
        }

        let outcome = self.dispatch(event).await;

        let error = outcome.as_ref().err().map(ToString::to_string);
        if let Some(e) = &error {
            warn!(error = %e, "event handler failed");
        }
        if let Err(e) = self.store.complete_payment_event(&event.id, error.as_deref()).await {
            warn!(error = %e, "could not close event record");
        }

        outcome
    }

    async fn dispatch(&self, event: &PaymentEvent) -> Result<EventDisposition, PaymentError> {
        match event.event_type.as_str() {
            PAYMENT_SUCCEEDED => self.on_payment_succeeded(event).await,
            PAYMENT_FAILED => {
                let intent = event.payment_intent_id()?;
                self.store.mark_session_payment_failed(intent).await?;
                info!(intent, "payment failed");
                Ok(EventDisposition::Processed)
            }
            CHARGE_REFUNDED => self.on_charge_refunded(event).await,
            other => {
                debug!(event_type = other, "unhandled event type");
                Ok(EventDisposition::Ignored)
            }
        }
    }

    async fn on_payment_succeeded(&self, event: &PaymentEvent) -> Result<EventDisposition, PaymentError> {
        let intent = event.payment_intent_id()?;

        match self.store.initialise_report(intent).await? {
            ReportInit::AlreadyExists(report) => {
                // Covers a worker that died mid-report.
                if report.status.is_terminal() {
                    debug!(report_id = %report.id, status = report.status.as_str(), "report already finished");
                } else {
                    debug!(report_id = %report.id, "report exists, re-enqueueing");
                    self.enqueue(report.id);
                }
            }
            ReportInit::Created(report) => {
                info!(report_id = %report.id, intent, "payment confirmed, report created");
                self.send_receipt(report.session_id).await;
                self.enqueue(report.id);
            }
        }
        Ok(EventDisposition::Processed)
    }

    async fn on_charge_refunded(&self, event: &PaymentEvent) -> Result<EventDisposition, PaymentError> {
        let intent = match event.charge_payment_intent() {
            Ok(intent) => intent,
            Err(e) => {
                warn!(error = %e, "refund without payment intent");
                return Ok(EventDisposition::Processed);
            }
        };

        match self.store.mark_session_refunded(intent).await {
            Ok(()) => info!(intent, "charge refunded"),
            Err(StoreError::NotFound(_)) => warn!(intent, "refund for unknown payment intent"),
            Err(e) => return Err(e.into()),
        }
        Ok(EventDisposition::Processed)
    }

    fn enqueue(&self, report_id: ReportId) {
        if let Err(e) = self.enqueuer.enqueue(report_id) {
            warn!(report_id = %report_id, error = %e, "enqueue failed, report left for the recovery scan");
        }
    }

    async fn send_receipt(&self, session_id: SessionId) {
        let session = match self.store.get_session(session_id).await {
            Ok(Some(session)) => session,
            Ok(None) => return,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "could not load session for receipt");
                return;
            }
        };
        let Some(to) = session.email.as_deref().map(str::trim).filter(|e| !e.is_empty()) else {
            return;
        };

        let receipt = Receipt {
            to: to.to_string(),
            business_name: session.business_name().map(str::to_string),
            amount_cents: self.price.amount_cents,
            currency: self.price.currency.clone(),
        };
        if let Err(e) = self.mailer.send_receipt(&receipt).await {
            warn!(session_id = %session_id, error = %e, "failed to send receipt");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;

    use riskmap_core::{PaymentStatus, ReportStatus};

    use crate::store::{AttachPaymentIntent, EVENT_CLAIM_LEASE, InMemoryReportStore};
    use crate::testing::{RecordingEnqueuer, RecordingMailer};

    struct Fixture {
        store: Arc<InMemoryReportStore>,
        enqueuer: Arc<RecordingEnqueuer>,
        mailer: Arc<RecordingMailer>,
        processor: PaymentEventProcessor,
    }

    fn fixture() -> Fixture {
        let store = InMemoryReportStore::arc();
        let enqueuer = RecordingEnqueuer::new();
        let mailer = RecordingMailer::new();
        let processor = PaymentEventProcessor::new(
            store.clone(),
            enqueuer.clone(),
            mailer.clone(),
            Price::default(),
        );
        Fixture {
            store,
            enqueuer,
            mailer,
            processor,
        }
    }

    async fn session_with_intent(store: &InMemoryReportStore, intent: &str) -> SessionId {
        let session = store.create_session("anon").await.unwrap();
        store
            .attach_payment_intent(AttachPaymentIntent {
                session_id: session.id,
                customer_ref: Some("cus_1".into()),
                intent_ref: intent.into(),
                email: Some("owner@example.com".into()),
            })
            .await
            .unwrap();
        session.id
    }

    fn succeeded(event_id: &str, intent: &str) -> PaymentEvent {
        PaymentEvent {
            id: event_id.into(),
            event_type: PAYMENT_SUCCEEDED.into(),
            payload: json!({"id": intent, "object": "payment_intent"}),
        }
    }

    #[tokio::test]
    async fn success_creates_report_sends_receipt_and_enqueues() {
        let f = fixture();
        let session_id = session_with_intent(&f.store, "pi_1").await;

        let disposition = f.processor.process(&succeeded("evt_1", "pi_1")).await.unwrap();
        assert_eq!(disposition, EventDisposition::Processed);

        let session = f.store.get_session(session_id).await.unwrap().unwrap();
        assert_eq!(session.payment_status, PaymentStatus::Paid);

        let queued = f.enqueuer.ids();
        assert_eq!(queued.len(), 1);
        let report = f.store.get_report(queued[0]).await.unwrap().unwrap();
        assert_eq!(report.session_id, session_id);

        let receipts = f.mailer.receipts();
        assert_eq!(receipts.len(), 1);
        assert_eq!(receipts[0].amount_cents, 5900);
        assert_eq!(receipts[0].currency, "usd");
    }

    #[tokio::test]
    async fn event_abandoned_mid_handler_is_processed_after_lease() {
        let f = fixture();
        let session_id = session_with_intent(&f.store, "pi_1").await;
        let event = succeeded("evt_1", "pi_1");

        // Claimed by a handler that died before completing it.
        f.store
            .record_payment_event(&event.id, &event.event_type, &event.payload)
            .await
            .unwrap();

        assert_eq!(f.processor.process(&event).await.unwrap(), EventDisposition::Duplicate);
        assert!(f.enqueuer.ids().is_empty());

        f.store
            .backdate_payment_event(&event.id, EVENT_CLAIM_LEASE + Duration::from_secs(1))
            .unwrap();
        assert_eq!(f.processor.process(&event).await.unwrap(), EventDisposition::Processed);

        let session = f.store.get_session(session_id).await.unwrap().unwrap();
        assert_eq!(session.payment_status, PaymentStatus::Paid);
        assert_eq!(f.enqueuer.ids().len(), 1);
        assert_eq!(f.mailer.receipts().len(), 1);
    }

    #[tokio::test]
    async fn replayed_event_is_a_no_op() {
        let f = fixture();
        session_with_intent(&f.store, "pi_1").await;
        let event = succeeded("evt_1", "pi_1");

        f.processor.process(&event).await.unwrap();
        let second = f.processor.process(&event).await.unwrap();

        assert_eq!(second, EventDisposition::Duplicate);
        assert_eq!(f.enqueuer.ids().len(), 1);
        assert_eq!(f.mailer.receipts().len(), 1);
    }

    #[tokio::test]
    async fn new_event_for_existing_report_re_enqueues_without_receipt() {
        let f = fixture();
        session_with_intent(&f.store, "pi_1").await;

        f.processor.process(&succeeded("evt_1", "pi_1")).await.unwrap();
        f.processor.process(&succeeded("evt_2", "pi_1")).await.unwrap();

        let queued = f.enqueuer.ids();
        assert_eq!(queued.len(), 2);
        assert_eq!(queued[0], queued[1]);
        assert_eq!(f.mailer.receipts().len(), 1);
    }

    #[tokio::test]
    async fn finished_report_is_not_re_enqueued() {
        let f = fixture();
        session_with_intent(&f.store, "pi_1").await;
        f.processor.process(&succeeded("evt_1", "pi_1")).await.unwrap();
        let report_id = f.enqueuer.ids()[0];
        f.store.mark_report_failed(report_id, "boom").await.unwrap();

        f.processor.process(&succeeded("evt_2", "pi_1")).await.unwrap();
        assert_eq!(f.enqueuer.ids().len(), 1);
        let report = f.store.get_report(report_id).await.unwrap().unwrap();
        assert_eq!(report.status, ReportStatus::Error);
    }

    #[tokio::test]
    async fn full_queue_is_not_an_error() {
        let f = fixture();
        session_with_intent(&f.store, "pi_1").await;
        f.enqueuer.set_full(true);

        let disposition = f.processor.process(&succeeded("evt_1", "pi_1")).await.unwrap();
        assert_eq!(disposition, EventDisposition::Processed);
        assert_eq!(f.store.payment_event_error("evt_1").unwrap(), None);
    }

    #[tokio::test]
    async fn handler_error_is_recorded_and_redelivery_retries() {
        let f = fixture();
        // No session carries this intent yet.
        let event = succeeded("evt_1", "pi_late");

        let err = f.processor.process(&event).await.unwrap_err();
        assert!(matches!(err, PaymentError::Store(StoreError::NotFound(_))));
        assert!(f.store.payment_event_error("evt_1").unwrap().is_some());

        session_with_intent(&f.store, "pi_late").await;
        let disposition = f.processor.process(&event).await.unwrap();
        assert_eq!(disposition, EventDisposition::Processed);
        assert_eq!(f.store.payment_event_attempts("evt_1").unwrap(), Some(2));
        assert_eq!(f.enqueuer.ids().len(), 1);
    }

    #[tokio::test]
    async fn payment_failure_and_refund_update_the_session() {
        let f = fixture();
        let session_id = session_with_intent(&f.store, "pi_1").await;

        let failed = PaymentEvent {
            id: "evt_f".into(),
            event_type: PAYMENT_FAILED.into(),
            payload: json!({"id": "pi_1"}),
        };
        f.processor.process(&failed).await.unwrap();
        let session = f.store.get_session(session_id).await.unwrap().unwrap();
        assert_eq!(session.payment_status, PaymentStatus::Failed);

        let refunded = PaymentEvent {
            id: "evt_r".into(),
            event_type: CHARGE_REFUNDED.into(),
            payload: json!({"id": "ch_1", "payment_intent": "pi_1"}),
        };
        f.processor.process(&refunded).await.unwrap();
        let session = f.store.get_session(session_id).await.unwrap().unwrap();
        assert_eq!(session.payment_status, PaymentStatus::Refunded);
    }

    #[tokio::test]
    async fn unknown_event_types_are_ignored() {
        let f = fixture();
        let event = PaymentEvent {
            id: "evt_x".into(),
            event_type: "customer.created".into(),
            payload: json!({"id": "cus_1"}),
        };
        assert_eq!(f.processor.process(&event).await.unwrap(), EventDisposition::Ignored);
        assert_eq!(f.store.payment_event_error("evt_x").unwrap(), None);
    }
}
