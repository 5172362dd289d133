//! Stand-ins shared by the unit tests of this crate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;

use riskmap_ai::{HedgeError, HedgeResult, Hedger};
use riskmap_core::{QuestionDefinition, ReportId};
use riskmap_scoring::ScoredRisk;

use crate::jobs::{EnqueueError, Enqueuer};
use crate::notify::{Mailer, NotifyError, Receipt, ReportReady};
use crate::store::{AttachPaymentIntent, InMemoryReportStore, ReportStore, UpsertAnswer};

pub struct StubHedger {
    fail: bool,
    delay: Option<Duration>,
    seen: Mutex<Vec<Vec<String>>>,
}

impl StubHedger {
    fn build(fail: bool, delay: Option<Duration>) -> Arc<Self> {
        Arc::new(Self {
            fail,
            delay,
            seen: Mutex::new(Vec::new()),
        })
    }

    /// Returns a hedge for every risk it receives.
    pub fn ok() -> Arc<Self> {
        Self::build(false, None)
    }

    pub fn failing() -> Arc<Self> {
        Self::build(true, None)
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Self::build(false, Some(delay))
    }

    /// Question ids of every call, in call order.
    pub fn seen(&self) -> Vec<Vec<String>> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Hedger for StubHedger {
    fn name(&self) -> &str {
        "stub"
    }

    async fn generate_hedges(&self, risks: &[ScoredRisk]) -> Result<HedgeResult, HedgeError> {
        self.seen
            .lock()
            .unwrap()
            .push(risks.iter().map(|r| r.question_id.clone()).collect());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(HedgeError::Api {
                status: 529,
                body: "overloaded".into(),
            });
        }
        Ok(HedgeResult {
            hedges: risks
                .iter()
                .map(|r| (r.question_id.clone(), format!("stub hedge for {}", r.question_id)))
                .collect(),
            executive_summary: "stub summary".into(),
            top_priority_html: "<p>stub</p>".into(),
        })
    }
}

#[derive(Default)]
pub struct RecordingMailer {
    fail: bool,
    report_ready: Mutex<Vec<ReportReady>>,
    receipts: Mutex<Vec<Receipt>>,
}

impl RecordingMailer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Records messages, then reports a provider rejection.
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Self::default()
        })
    }

    pub fn report_ready(&self) -> Vec<ReportReady> {
        self.report_ready.lock().unwrap().clone()
    }

    pub fn receipts(&self) -> Vec<Receipt> {
        self.receipts.lock().unwrap().clone()
    }

    fn outcome(&self) -> Result<(), NotifyError> {
        if self.fail {
            return Err(NotifyError::Rejected {
                status: 500,
                message: "mail down".into(),
            });
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Mailer for RecordingMailer {
    async fn send_report_ready(&self, message: &ReportReady) -> Result<(), NotifyError> {
        self.report_ready.lock().unwrap().push(message.clone());
        self.outcome()
    }

    async fn send_receipt(&self, message: &Receipt) -> Result<(), NotifyError> {
        self.receipts.lock().unwrap().push(message.clone());
        self.outcome()
    }
}

#[derive(Default)]
pub struct RecordingEnqueuer {
    full: AtomicBool,
    ids: Mutex<Vec<ReportId>>,
}

impl RecordingEnqueuer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_full(&self, full: bool) {
        self.full.store(full, Ordering::SeqCst);
    }

    pub fn ids(&self) -> Vec<ReportId> {
        self.ids.lock().unwrap().clone()
    }
}

impl Enqueuer for RecordingEnqueuer {
    fn enqueue(&self, report_id: ReportId) -> Result<(), EnqueueError> {
        if self.full.load(Ordering::SeqCst) {
            return Err(EnqueueError::Full(report_id));
        }
        self.ids.lock().unwrap().push(report_id);
        Ok(())
    }
}

/// Radio question: "Yes" scores 2/2 (ignore), "No" scores 9/9 (watch).
pub fn radio_question(id: &str, sort_order: i32) -> QuestionDefinition {
    QuestionDefinition {
        id: id.to_string(),
        section_title: "Operations".to_string(),
        risk_name: format!("risk {id}"),
        risk_desc: format!("what could go wrong with {id}"),
        hedge: format!("static hedge for {id}"),
        scoring_config: json!({
            "type": "radio",
            "opts": ["Yes", "No"],
            "p_scores": [2, 9],
            "i_scores": [2, 9],
        }),
        is_scoring: true,
        sort_order,
    }
}

/// A session with `answers` that has paid for `intent`, and its draft report.
pub async fn paid_report_with_answers(
    store: &InMemoryReportStore,
    intent: &str,
    answers: &[(&str, &str)],
) -> ReportId {
    let session = store.create_session(&format!("anon-{intent}")).await.unwrap();
    for (i, (question_id, text)) in answers.iter().enumerate() {
        store.insert_question(radio_question(question_id, i as i32)).unwrap();
        store
            .upsert_answer(UpsertAnswer {
                session_id: session.id,
                question_id: question_id.to_string(),
                answer_text: text.to_string(),
                preview: None,
            })
            .await
            .unwrap();
    }
    store
        .attach_payment_intent(AttachPaymentIntent {
            session_id: session.id,
            customer_ref: None,
            intent_ref: intent.to_string(),
            email: Some("owner@example.com".to_string()),
        })
        .await
        .unwrap();
    store.initialise_report(intent).await.unwrap().report().id
}
