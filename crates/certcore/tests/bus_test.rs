use async_trait::async_trait;
use certcore::{
    BusError, Message, MessageBus, MessageHandler, MessagePattern, MessagePriority, Value,
    WorkerError,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Appends its label to a shared log when invoked
struct RecordingHandler {
    label: &'static str,
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl MessageHandler for RecordingHandler {
    async fn handle(&self, _message: Message) -> Result<(), WorkerError> {
        self.log.lock().unwrap().push(self.label.to_string());
        Ok(())
    }
}

struct FailingHandler;

#[async_trait]
impl MessageHandler for FailingHandler {
    async fn handle(&self, _message: Message) -> Result<(), WorkerError> {
        Err(WorkerError::ProcessingFailed("boom".to_string()))
    }
}

/// Replies to every request it sees
struct EchoResponder {
    bus: Arc<MessageBus>,
}

#[async_trait]
impl MessageHandler for EchoResponder {
    async fn handle(&self, message: Message) -> Result<(), WorkerError> {
        let reply = message.reply("extract.response", message.payload.clone(), "extractor");
        self.bus.publish(reply).await;
        Ok(())
    }
}

#[tokio::test]
async fn exact_target_is_delivered_before_priority_matches() {
    let bus = MessageBus::new(16);
    let log = Arc::new(Mutex::new(Vec::new()));

    // Matched only by priority, even though that priority is urgent.
    bus.subscribe(
        "broadcast-listener",
        MessagePattern::any().with_priority(MessagePriority::Urgent),
        Arc::new(RecordingHandler {
            label: "by-priority",
            log: Arc::clone(&log),
        }),
    )
    .await;

    // Keyed to the message's target.
    bus.subscribe(
        "W1",
        MessagePattern::any().with_target("W1"),
        Arc::new(RecordingHandler {
            label: "by-target",
            log: Arc::clone(&log),
        }),
    )
    .await;

    let delivered = bus
        .publish(
            Message::new("cert.review", "payload", "orchestrator")
                .with_target("W1")
                .with_priority(MessagePriority::Urgent),
        )
        .await;

    assert_eq!(delivered, 2);
    assert_eq!(
        *log.lock().unwrap(),
        vec!["by-target".to_string(), "by-priority".to_string()]
    );
}

#[tokio::test]
async fn handler_failure_does_not_block_other_subscribers() {
    let bus = MessageBus::new(16);
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut events = bus.subscribe_events();

    bus.subscribe("flaky", MessagePattern::any(), Arc::new(FailingHandler))
        .await;
    bus.subscribe(
        "steady",
        MessagePattern::any(),
        Arc::new(RecordingHandler {
            label: "steady",
            log: Arc::clone(&log),
        }),
    )
    .await;

    let delivered = bus
        .publish(Message::new("cert.review", "payload", "orchestrator"))
        .await;

    assert_eq!(delivered, 1);
    assert_eq!(*log.lock().unwrap(), vec!["steady".to_string()]);

    // Published, one delivery error, one successful delivery - in some order
    // after the publish event.
    let mut saw_delivery_error = false;
    while let Ok(event) = events.try_recv() {
        if matches!(event, certcore::BusEvent::DeliveryError { .. }) {
            saw_delivery_error = true;
        }
    }
    assert!(saw_delivery_error);
}

#[tokio::test]
async fn history_is_bounded_and_evicts_oldest_first() {
    let bus = MessageBus::new(3);
    for i in 0..5 {
        bus.publish(Message::new(
            format!("event.{}", i),
            Value::Null,
            "source",
        ))
        .await;
    }

    let history = bus.history(None).await;
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].message_type, "event.2");
    assert_eq!(history[2].message_type, "event.4");
}

#[tokio::test]
async fn history_filter_applies_pattern() {
    let bus = MessageBus::new(16);
    bus.publish(Message::new("cert.issued", Value::Null, "renderer"))
        .await;
    bus.publish(Message::new("cert.revoked", Value::Null, "auditor"))
        .await;

    let issued = bus
        .history(Some(&MessagePattern::for_type("cert.issued")))
        .await;
    assert_eq!(issued.len(), 1);
    assert_eq!(issued[0].metadata.source, "renderer");
}

#[tokio::test]
async fn unsubscribe_stops_delivery() {
    let bus = MessageBus::new(16);
    let log = Arc::new(Mutex::new(Vec::new()));

    let subscription = bus
        .subscribe(
            "listener",
            MessagePattern::any(),
            Arc::new(RecordingHandler {
                label: "listener",
                log: Arc::clone(&log),
            }),
        )
        .await;

    assert!(bus.unsubscribe(subscription).await);
    assert!(!bus.unsubscribe(subscription).await);

    let delivered = bus
        .publish(Message::new("cert.review", Value::Null, "orchestrator"))
        .await;
    assert_eq!(delivered, 0);
    assert!(log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn request_resolves_on_correlated_response() {
    let bus = Arc::new(MessageBus::new(16));
    bus.subscribe(
        "extractor",
        MessagePattern::for_type("extract.request"),
        Arc::new(EchoResponder {
            bus: Arc::clone(&bus),
        }),
    )
    .await;

    let response = bus
        .request(
            Message::new("extract.request", "document body", "orchestrator"),
            Duration::from_millis(500),
        )
        .await
        .expect("responder should reply");

    assert_eq!(response.message_type, "extract.response");
    assert_eq!(response.payload, Value::from("document body"));
}

#[tokio::test]
async fn request_times_out_without_responder() {
    let bus = MessageBus::new(16);
    let result = bus
        .request(
            Message::new("extract.request", Value::Null, "orchestrator"),
            Duration::from_millis(50),
        )
        .await;
    assert!(matches!(result, Err(BusError::ResponseTimeout { ms: 50 })));
}
