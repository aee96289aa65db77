//! End-to-end processing of certificate events against the in-memory store.

use async_trait::async_trait;
use database::StoreError;
use domain_certificates::{
    FaultPoint, InMemoryCertificateStore, QmsEvent, USER_CERTIFICATE_CREATE, latest_conflict,
    registry,
};
use uuid::Uuid;
use message_processor::{
    DeadLetter, DeadLetterReason, EnvelopeDecoder, InboundMessage, MessageActions,
    MessageProcessor, PROP_ORIGINAL_EXCEPTION_MESSAGE, ProcessorConfig, TerminalAction,
    TransportError,
};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

const BODY: &str = r#"{
    "UserId": "0b8f6f3e-8f0e-4d4b-9d7a-111111111111",
    "CertificateId": "7c1e2d3f-1a2b-4c5d-8e9f-222222222222",
    "CertificateName": "Forklift Operator",
    "CertificateType": "Safety"
}"#;

#[derive(Debug, Clone, PartialEq)]
enum Settled {
    Complete(String),
    Abandon(String),
    DeadLetter(String, DeadLetter),
}

/// Records every settlement call.
#[derive(Default)]
struct RecordingActions {
    calls: Mutex<Vec<Settled>>,
}

impl RecordingActions {
    fn calls(&self) -> Vec<Settled> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageActions for RecordingActions {
    async fn complete(&self, message: &InboundMessage) -> Result<(), TransportError> {
        self.calls.lock().unwrap().push(Settled::Complete(message.id.clone()));
        Ok(())
    }

    async fn abandon(&self, message: &InboundMessage) -> Result<(), TransportError> {
        self.calls.lock().unwrap().push(Settled::Abandon(message.id.clone()));
        Ok(())
    }

    async fn dead_letter(
        &self,
        message: &InboundMessage,
        dead_letter: &DeadLetter,
    ) -> Result<(), TransportError> {
        self.calls
            .lock()
            .unwrap()
            .push(Settled::DeadLetter(message.id.clone(), dead_letter.clone()));
        Ok(())
    }
}

struct Harness {
    store: Arc<InMemoryCertificateStore>,
    processor: MessageProcessor<QmsEvent>,
    actions: RecordingActions,
    _shutdown: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Harness {
    fn new() -> Self {
        let store = Arc::new(InMemoryCertificateStore::new());
        let registry = Arc::new(registry(store.clone()).unwrap());
        let config = ProcessorConfig::default().with_max_delivery_count(5);
        let (tx, rx) = watch::channel(false);
        Self {
            store,
            processor: MessageProcessor::new(registry, config),
            actions: RecordingActions::default(),
            _shutdown: tx,
            shutdown_rx: rx,
        }
    }

    async fn process(&self, message: &InboundMessage) -> TerminalAction {
        self.processor
            .process(message, &self.actions, self.shutdown_rx.clone())
            .await
            .unwrap()
    }
}

fn certificate_message(id: &str) -> InboundMessage {
    InboundMessage::new(id, BODY.as_bytes().to_vec())
        .with_content_type("application/json")
        .with_property("eventType", USER_CERTIFICATE_CREATE)
}

#[tokio::test]
async fn test_create_completes_with_one_commit() {
    let h = Harness::new();

    let action = h.process(&certificate_message("1-0")).await;

    assert_eq!(action, TerminalAction::Complete);
    assert_eq!(h.actions.calls(), vec![Settled::Complete("1-0".into())]);
    assert_eq!(h.store.commits(), 1);
    assert_eq!(h.store.rollbacks(), 0);
    assert_eq!(h.store.latest_rows().len(), 1);
}

#[tokio::test]
async fn test_commit_deadlock_abandons_then_dead_letters_past_threshold() {
    let h = Harness::new();
    h.store
        .fail_always(FaultPoint::Commit, StoreError::database("1205", "deadlock victim"));

    let first = h.process(&certificate_message("1-0")).await;
    assert_eq!(first, TerminalAction::Abandon);

    let redelivered = certificate_message("1-0").with_delivery_count(6);
    let last = h.process(&redelivered).await;

    match last {
        TerminalAction::DeadLetter(dl) => {
            assert_eq!(dl.reason, DeadLetterReason::MaxDeliveryAttemptsExceeded);
        }
        other => panic!("expected dead-letter, got {other:?}"),
    }
    assert_eq!(h.actions.calls().len(), 2);
    assert!(h.store.rows().is_empty());
}

#[tokio::test]
async fn test_transient_insert_fault_leaves_no_partial_writes() {
    let h = Harness::new();

    // An existing latest copy must survive the failed attempt untouched.
    h.process(&certificate_message("1-0")).await;
    let before = h.store.rows();

    let renamed = BODY.replace("Forklift Operator", "Forklift Instructor");
    h.store
        .fail_once(FaultPoint::Insert, StoreError::database("40P01", "deadlock detected"));
    let message = InboundMessage::new("2-0", renamed.into_bytes())
        .with_property("eventType", USER_CERTIFICATE_CREATE);

    let action = h.process(&message).await;

    assert_eq!(action, TerminalAction::Abandon);
    assert_eq!(h.store.rows(), before);
    assert_eq!(h.store.rollbacks(), 1);
}

#[tokio::test]
async fn test_retry_after_transient_fault_succeeds() {
    let h = Harness::new();
    h.store
        .fail_once(FaultPoint::Commit, StoreError::database("40001", "could not serialize access"));

    assert_eq!(h.process(&certificate_message("1-0")).await, TerminalAction::Abandon);
    let retry = certificate_message("1-0").with_delivery_count(2);
    assert_eq!(h.process(&retry).await, TerminalAction::Complete);

    assert_eq!(h.store.latest_rows().len(), 1);
}

#[tokio::test]
async fn test_redelivered_committed_message_is_not_duplicated() {
    let h = Harness::new();

    h.process(&certificate_message("1-0")).await;
    let again = certificate_message("1-0").with_delivery_count(2);
    let action = h.process(&again).await;

    assert_eq!(action, TerminalAction::Complete);
    assert_eq!(h.store.rows().len(), 1);
}

#[tokio::test]
async fn test_concurrent_latest_copy_is_retried_not_dead_lettered() {
    let h = Harness::new();
    h.store.fail_once(
        FaultPoint::Insert,
        latest_conflict(
            Uuid::parse_str("0b8f6f3e-8f0e-4d4b-9d7a-111111111111").unwrap(),
            Uuid::parse_str("7c1e2d3f-1a2b-4c5d-8e9f-222222222222").unwrap(),
        ),
    );

    assert_eq!(h.process(&certificate_message("1-0")).await, TerminalAction::Abandon);
    let retry = certificate_message("1-0").with_delivery_count(2);
    assert_eq!(h.process(&retry).await, TerminalAction::Complete);

    assert_eq!(
        h.actions.calls(),
        vec![Settled::Abandon("1-0".into()), Settled::Complete("1-0".into())]
    );
    assert_eq!(h.store.latest_rows().len(), 1);
}

#[tokio::test]
async fn test_late_redelivery_does_not_supersede_newer_copy() {
    let h = Harness::new();
    let renamed = BODY.replace("Forklift Operator", "Forklift Instructor");
    let newer = InboundMessage::new("2-0", renamed.into_bytes())
        .with_property("eventType", USER_CERTIFICATE_CREATE);

    h.process(&certificate_message("1-0")).await;
    h.process(&newer).await;
    let late = certificate_message("1-0").with_delivery_count(2);
    let action = h.process(&late).await;

    assert_eq!(action, TerminalAction::Complete);
    assert_eq!(h.store.rows().len(), 2);
    let latest = h.store.latest_rows();
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].certificate_name, "Forklift Instructor");
}

#[tokio::test]
async fn test_permanent_store_fault_dead_letters() {
    let h = Harness::new();
    h.store
        .fail_once(FaultPoint::Insert, StoreError::database("23505", "duplicate key value"));

    let action = h.process(&certificate_message("1-0")).await;

    match action {
        TerminalAction::DeadLetter(dl) => {
            assert_eq!(dl.reason, DeadLetterReason::DatabaseUpdateFailure);
            assert_eq!(
                dl.property(PROP_ORIGINAL_EXCEPTION_MESSAGE),
                Some("duplicate key value")
            );
        }
        other => panic!("expected dead-letter, got {other:?}"),
    }
}

#[tokio::test]
async fn test_invalid_identifier_is_abandoned_without_writes() {
    let h = Harness::new();
    let body = BODY.replace("0b8f6f3e-8f0e-4d4b-9d7a-111111111111", "not-a-guid");
    let message =
        InboundMessage::new("1-0", body.into_bytes()).with_property("eventType", USER_CERTIFICATE_CREATE);

    let action = h.process(&message).await;

    assert_eq!(action, TerminalAction::Abandon);
    assert_eq!(h.store.begins(), 0);
}

#[tokio::test]
async fn test_missing_routing_key_dead_letters() {
    let h = Harness::new();
    let message = InboundMessage::new("1-0", BODY.as_bytes().to_vec());

    match h.process(&message).await {
        TerminalAction::DeadLetter(dl) => assert_eq!(dl.reason, DeadLetterReason::MissingEventType),
        other => panic!("expected dead-letter, got {other:?}"),
    }
    assert_eq!(h.store.begins(), 0);
}

#[tokio::test]
async fn test_unknown_routing_key_dead_letters_with_key() {
    let h = Harness::new();
    let message =
        InboundMessage::new("1-0", BODY.as_bytes().to_vec()).with_property("eventType", "QMS.Nope");

    match h.process(&message).await {
        TerminalAction::DeadLetter(dl) => {
            assert_eq!(dl.reason, DeadLetterReason::UnknownEventType);
            assert!(dl.description.contains("QMS.Nope"));
        }
        other => panic!("expected dead-letter, got {other:?}"),
    }
}

#[tokio::test]
async fn test_decoding_is_idempotent() {
    let store = Arc::new(InMemoryCertificateStore::new());
    let decoder = EnvelopeDecoder::new(Arc::new(registry(store).unwrap()), "eventType");
    let message = certificate_message("1-0");

    let first = decoder.decode(&message).unwrap();
    let second = decoder.decode(&message).unwrap();

    assert_eq!(first.event, second.event);
    assert_eq!(first.event_type, second.event_type);
}
