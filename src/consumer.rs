// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Consumption
//!
//! Processes deliveries one at a time, in delivery order:
//! 1. Decodes the payload with the subscription's codec
//! 2. Rejects undecodable payloads without requeue, so a poison message goes
//!    to the dead-letter exchange instead of looping forever
//! 3. Runs the handler, catching panics
//! 4. Caps redeliveries when a limit is configured. The count comes from the
//!    broker headers when the queue reports it, and otherwise from the requeues
//!    this loop has seen for the same message id
//! 5. Settles the delivery with the broker
//!
//! Nothing that happens to a single message stops the loop. Failures are
//! logged and recorded on the message's span.

use crate::{
    ack::{AckAction, AckDecision, Acknowledger},
    codec::{Codec, Envelope},
    errors::AmqpError,
    otel,
    subscriber::Handler,
};
use futures_util::{FutureExt, Stream, StreamExt};
use lapin::{acker::Acker, message::Delivery, protocol::basic::AMQPProperties, types::AMQPValue};
use opentelemetry::trace::{Span, Status};
use std::{
    borrow::Cow,
    collections::{HashMap, VecDeque},
    panic::AssertUnwindSafe,
};
use tokio::sync::watch;
use tracing::{debug, error, warn};

/// Header set by quorum queues with the number of previous deliveries
pub const AMQP_HEADERS_DELIVERY_COUNT: &str = "x-delivery-count";
/// Constant for the x-death header used in RabbitMQ's dead-lettering mechanism
pub const AMQP_HEADERS_X_DEATH: &str = "x-death";
/// Constant for the count field in the x-death header
pub const AMQP_HEADERS_COUNT: &str = "count";

/// Message ids a subscription remembers requeues for.
pub(crate) const REDELIVERY_LOG_CAPACITY: usize = 4096;

/// A delivery detached from the lapin consumer, settled through `acker`.
pub(crate) struct InboundMessage<A> {
    pub(crate) data: Vec<u8>,
    pub(crate) properties: AMQPProperties,
    pub(crate) redelivered: bool,
    pub(crate) acker: A,
}

impl From<Delivery> for InboundMessage<Acker> {
    fn from(delivery: Delivery) -> Self {
        InboundMessage {
            data: delivery.data,
            properties: delivery.properties,
            redelivered: delivery.redelivered,
            acker: delivery.acker,
        }
    }
}

impl<A> InboundMessage<A> {
    /// Moves the payload out, tagged with the message's content type.
    fn take_envelope(&mut self) -> Envelope {
        let content_type = self
            .properties
            .content_type()
            .as_ref()
            .map(|ct| ct.as_str())
            .unwrap_or_default();

        Envelope::new(content_type, std::mem::take(&mut self.data))
    }

    fn message_id(&self) -> Option<String> {
        self.properties
            .message_id()
            .as_ref()
            .map(|id| id.as_str().to_owned())
    }
}

/// Per-subscription settings the loop needs for every message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ConsumeSettings {
    pub(crate) queue: String,
    pub(crate) max_redeliveries: Option<u32>,
}

/// Requeues seen by one subscription, keyed by message id.
///
/// Classic queues put no delivery count on a requeued message, so the loop
/// keeps its own. Past `capacity` ids the oldest entry is evicted.
#[derive(Debug)]
pub(crate) struct RedeliveryLog {
    requeues: HashMap<String, u32>,
    order: VecDeque<String>,
    capacity: usize,
}

impl Default for RedeliveryLog {
    fn default() -> Self {
        Self::with_capacity(REDELIVERY_LOG_CAPACITY)
    }
}

impl RedeliveryLog {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        RedeliveryLog {
            requeues: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Requeues recorded for `id`. A first delivery always starts from zero.
    fn previous(&mut self, id: &str, redelivered: bool) -> u32 {
        if !redelivered {
            self.forget(id);
            return 0;
        }

        self.requeues.get(id).copied().unwrap_or_default()
    }

    fn record_requeue(&mut self, id: &str) {
        if let Some(count) = self.requeues.get_mut(id) {
            *count += 1;
            return;
        }

        if self.order.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.requeues.remove(&oldest);
            }
        }

        self.requeues.insert(id.to_owned(), 1);
        self.order.push_back(id.to_owned());
    }

    fn forget(&mut self, id: &str) {
        if self.requeues.remove(id).is_some() {
            self.order.retain(|known| known != id);
        }
    }
}

/// Handles one message and settles it.
///
/// # Parameters
/// * `settings` - Queue name and redelivery cap of the subscription
/// * `log` - Requeues this subscription has seen, used when the broker sends no count
/// * `codec` - Codec the payload is decoded with
/// * `handler` - Domain handler deciding the outcome
/// * `msg` - The delivery to process
///
/// # Returns
/// The acknowledgment sent to the broker, or the error from sending it
pub(crate) async fn consume<T, C, H, A>(
    settings: &ConsumeSettings,
    log: &mut RedeliveryLog,
    codec: &C,
    handler: &H,
    mut msg: InboundMessage<A>,
) -> Result<AckAction, AmqpError>
where
    T: Send + 'static,
    T: serde::de::DeserializeOwned,
    C: Codec,
    H: Handler<T>,
    A: Acknowledger,
{
    let mut span = otel::consumer_span(&msg.properties, &settings.queue);

    let value: T = match codec.decode(&msg.take_envelope()) {
        Ok(v) => v,
        Err(err) => {
            warn!(
                error = err.to_string(),
                queue = settings.queue.as_str(),
                "removing message from queue - reason: undecodable payload"
            );
            span.record_error(&err);
            span.set_status(Status::Error {
                description: Cow::from("undecodable payload"),
            });

            let action = AckDecision::DiscardPermanently.action();
            action.apply(&msg.acker).await?;
            return Ok(action);
        }
    };

    let decision = match AssertUnwindSafe(handler.handle(value)).catch_unwind().await {
        Ok(decision) => decision,
        Err(_) => {
            error!(
                queue = settings.queue.as_str(),
                "handler panicked, discarding message"
            );
            span.set_status(Status::Error {
                description: Cow::from("handler panicked"),
            });
            AckDecision::DiscardPermanently
        }
    };

    // ids are only tracked while a cap is set
    let tracked_id = settings.max_redeliveries.and(msg.message_id());

    let decision = match settings.max_redeliveries {
        Some(max) => {
            let previous = tracked_id
                .as_deref()
                .map(|id| log.previous(id, msg.redelivered))
                .unwrap_or_default();
            let count = delivery_count(&msg.properties).max(i64::from(previous));
            cap_redeliveries(decision, count, max)
        }
        None => decision,
    };
    let action = decision.action();

    debug!(?decision, queue = settings.queue.as_str(), "message handled");

    match action.apply(&msg.acker).await {
        Err(err) => {
            span.record_error(&err);
            span.set_status(Status::Error {
                description: Cow::from("error to settle msg"),
            });
            Err(err)
        }
        Ok(_) => {
            if let Some(id) = tracked_id.as_deref() {
                match action {
                    AckAction::Nack { requeue: true } => log.record_requeue(id),
                    _ => log.forget(id),
                }
            }
            if decision == AckDecision::Ack {
                span.set_status(Status::Ok);
            }
            Ok(action)
        }
    }
}

/// Turns a retry into a discard once the message has been delivered
/// `max` times already.
fn cap_redeliveries(decision: AckDecision, count: i64, max: u32) -> AckDecision {
    if decision != AckDecision::RequeueAndRetry {
        return decision;
    }

    if count >= i64::from(max) {
        warn!(count, max, "too many attempts, sending to dlq");
        return AckDecision::DiscardPermanently;
    }

    decision
}

/// Extracts the number of earlier deliveries from the message headers.
///
/// # Parameters
/// * `props` - RabbitMQ message properties
///
/// # Returns
/// The higher of `x-delivery-count` and the first `x-death` count, or 0
/// when the broker set neither
pub(crate) fn delivery_count(props: &AMQPProperties) -> i64 {

    let Some(headers) = props.headers() else {
        return 0;
    };

    let delivery_count = headers
        .inner()
        .get(AMQP_HEADERS_DELIVERY_COUNT)
        .and_then(as_integer)
        .unwrap_or_default();

    let death_count = headers
        .inner()
        .get(AMQP_HEADERS_X_DEATH)
        .and_then(|value| value.as_array())
        .and_then(|arr| arr.as_slice().first())
        .and_then(|value| value.as_field_table())
        .and_then(|table| table.inner().get(AMQP_HEADERS_COUNT))
        .and_then(as_integer)
        .unwrap_or_default();

    delivery_count.max(death_count)
}

fn as_integer(value: &AMQPValue) -> Option<i64> {
    match value {
        AMQPValue::ShortShortInt(v) => Some(i64::from(*v)),
        AMQPValue::ShortShortUInt(v) => Some(i64::from(*v)),
        AMQPValue::ShortInt(v) => Some(i64::from(*v)),
        AMQPValue::ShortUInt(v) => Some(i64::from(*v)),
        AMQPValue::LongInt(v) => Some(i64::from(*v)),
        AMQPValue::LongUInt(v) => Some(i64::from(*v)),
        AMQPValue::LongLongInt(v) => Some(*v),
        _ => None,
    }
}

/// Resolves once a stop is requested. If the sender is gone the
/// subscription is detached and this never resolves.
async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    let detached = stop.wait_for(|stopped| *stopped).await.is_err();
    if detached {
        std::future::pending::<()>().await;
    }
}

/// Drives a subscription until its delivery stream closes or a stop is
/// requested. A stop lets the message in hand finish first.
pub(crate) async fn run<T, S, A, C, H>(
    mut deliveries: S,
    mut stop: watch::Receiver<bool>,
    settings: ConsumeSettings,
    codec: C,
    handler: H,
) where
    S: Stream<Item = Result<InboundMessage<A>, AmqpError>> + Unpin,
    A: Acknowledger,
    T: serde::de::DeserializeOwned + Send + 'static,
    C: Codec,
    H: Handler<T>,
{
    debug!(queue = settings.queue.as_str(), "consuming...");

    let mut log = RedeliveryLog::default();

    loop {
        tokio::select! {
            biased;

            _ = stop_requested(&mut stop) => {
                debug!(queue = settings.queue.as_str(), "stop requested");
                break;
            }

            next = deliveries.next() => match next {
                None => {
                    debug!(queue = settings.queue.as_str(), "delivery stream closed");
                    break;
                }
                Some(Err(err)) => error!(error = err.to_string(), "errors consume msg"),
                Some(Ok(msg)) => {
                    if let Err(err) = consume(&settings, &mut log, &codec, &handler, msg).await {
                        error!(error = err.to_string(), "error consume msg");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ack::MockAcknowledger,
        codec::{CborCodec, JsonCodec, JSON_CONTENT_TYPE},
    };
    use futures_util::stream;
    use lapin::{
        types::{FieldArray, FieldTable, LongString, ShortString},
        BasicProperties,
    };
    use mockall::predicate::eq;
    use serde::Deserialize;
    use std::{
        collections::BTreeMap,
        sync::{Arc, Mutex},
    };

    #[derive(Debug, Clone, PartialEq, Deserialize, serde::Serialize)]
    struct War {
        #[serde(rename = "Attacker")]
        attacker: String,
        #[serde(rename = "Defender")]
        defender: String,
    }

    fn settings(max_redeliveries: Option<u32>) -> ConsumeSettings {
        ConsumeSettings {
            queue: "war".to_owned(),
            max_redeliveries,
        }
    }

    fn json_props() -> AMQPProperties {
        BasicProperties::default().with_content_type(ShortString::from(JSON_CONTENT_TYPE))
    }

    fn message(data: &[u8], acker: MockAcknowledger) -> InboundMessage<MockAcknowledger> {
        InboundMessage {
            data: data.to_vec(),
            properties: json_props(),
            redelivered: false,
            acker,
        }
    }

    fn war_bytes() -> Vec<u8> {
        br#"{"Attacker":"alice","Defender":"bob"}"#.to_vec()
    }

    fn acks_once() -> MockAcknowledger {
        let mut acker = MockAcknowledger::new();
        acker.expect_ack().times(1).returning(|| Ok(()));
        acker.expect_nack().never();
        acker
    }

    fn nacks_once(requeue: bool) -> MockAcknowledger {
        let mut acker = MockAcknowledger::new();
        acker
            .expect_nack()
            .with(eq(requeue))
            .times(1)
            .returning(|_| Ok(()));
        acker.expect_ack().never();
        acker
    }

    fn headers(entries: Vec<(&str, AMQPValue)>) -> AMQPProperties {
        let table: BTreeMap<ShortString, AMQPValue> = entries
            .into_iter()
            .map(|(k, v)| (ShortString::from(k), v))
            .collect();
        json_props().with_headers(FieldTable::from(table))
    }

    #[tokio::test]
    async fn decoded_value_reaches_handler_and_is_acked() {
        let seen = Arc::new(Mutex::new(vec![]));
        let sink = seen.clone();
        let handler = move |war: War| {
            sink.lock().unwrap().push(war);
            AckDecision::Ack
        };

        let action = consume::<War, _, _, _>(
            &settings(None),
            &mut RedeliveryLog::default(),
            &JsonCodec,
            &handler,
            message(&war_bytes(), acks_once()),
        )
        .await
        .unwrap();

        assert_eq!(action, AckAction::Ack);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![War {
                attacker: "alice".to_owned(),
                defender: "bob".to_owned()
            }]
        );
    }

    #[tokio::test]
    async fn each_decision_settles_as_its_action() {
        for (decision, acker) in [
            (AckDecision::Ack, acks_once()),
            (AckDecision::RequeueAndRetry, nacks_once(true)),
            (AckDecision::DiscardPermanently, nacks_once(false)),
        ] {
            let handler = move |_: War| decision;
            let action = consume::<War, _, _, _>(
                &settings(None),
            &mut RedeliveryLog::default(),
                &JsonCodec,
                &handler,
                message(&war_bytes(), acker),
            )
            .await
            .unwrap();
            assert_eq!(action, decision.action());
        }
    }

    #[tokio::test]
    async fn undecodable_payload_is_dropped_without_calling_handler() {
        let calls = Arc::new(Mutex::new(0));
        let counter = calls.clone();
        let handler = move |_: War| {
            *counter.lock().unwrap() += 1;
            AckDecision::Ack
        };

        let action = consume::<War, _, _, _>(
            &settings(None),
            &mut RedeliveryLog::default(),
            &JsonCodec,
            &handler,
            message(b"{\"Attacker\":", nacks_once(false)),
        )
        .await
        .unwrap();

        assert_eq!(action, AckAction::Nack { requeue: false });
        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn payload_from_another_codec_is_dropped() {
        let handler = |_: War| AckDecision::Ack;
        let msg = InboundMessage {
            data: war_bytes(),
            properties: json_props(),
            redelivered: false,
            acker: nacks_once(false),
        };

        // json tag, but the subscription decodes cbor
        let action = consume::<War, _, _, _>(
            &settings(None),
            &mut RedeliveryLog::default(),
            &CborCodec,
            &handler,
            msg,
        )
        .await
        .unwrap();
        assert_eq!(action, AckAction::Nack { requeue: false });
    }

    #[tokio::test]
    async fn panicking_handler_discards_the_message() {
        let handler = |_: War| -> AckDecision { panic!("boom") };

        let action = consume::<War, _, _, _>(
            &settings(None),
            &mut RedeliveryLog::default(),
            &JsonCodec,
            &handler,
            message(&war_bytes(), nacks_once(false)),
        )
        .await
        .unwrap();
        assert_eq!(action, AckAction::Nack { requeue: false });
    }

    #[tokio::test]
    async fn retry_becomes_discard_after_the_cap() {
        let handler = |_: War| AckDecision::RequeueAndRetry;

        let under = InboundMessage {
            data: war_bytes(),
            properties: headers(vec![(AMQP_HEADERS_DELIVERY_COUNT, AMQPValue::LongLongInt(2))]),
            redelivered: true,
            acker: nacks_once(true),
        };
        let action = consume::<War, _, _, _>(
            &settings(Some(3)),
            &mut RedeliveryLog::default(),
            &JsonCodec,
            &handler,
            under,
        )
        .await
        .unwrap();
        assert_eq!(action, AckAction::Nack { requeue: true });

        let reached = InboundMessage {
            data: war_bytes(),
            properties: headers(vec![(AMQP_HEADERS_DELIVERY_COUNT, AMQPValue::LongLongInt(3))]),
            redelivered: true,
            acker: nacks_once(false),
        };
        let action = consume::<War, _, _, _>(
            &settings(Some(3)),
            &mut RedeliveryLog::default(),
            &JsonCodec,
            &handler,
            reached,
        )
        .await
        .unwrap();
        assert_eq!(action, AckAction::Nack { requeue: false });
    }

    #[tokio::test]
    async fn no_cap_means_unbounded_retries() {
        let handler = |_: War| AckDecision::RequeueAndRetry;
        let msg = InboundMessage {
            data: war_bytes(),
            properties: headers(vec![(AMQP_HEADERS_DELIVERY_COUNT, AMQPValue::LongInt(500))]),
            redelivered: true,
            acker: nacks_once(true),
        };
        let action = consume::<War, _, _, _>(
            &settings(None),
            &mut RedeliveryLog::default(),
            &JsonCodec,
            &handler,
            msg,
        )
        .await
        .unwrap();
        assert_eq!(action, AckAction::Nack { requeue: true });
    }

    fn tracked(
        id: &str,
        redelivered: bool,
        acker: MockAcknowledger,
    ) -> InboundMessage<MockAcknowledger> {
        InboundMessage {
            data: war_bytes(),
            properties: json_props().with_message_id(ShortString::from(id)),
            redelivered,
            acker,
        }
    }

    #[tokio::test]
    async fn cap_applies_without_broker_count_headers() {
        let handler = |_: War| AckDecision::RequeueAndRetry;
        let mut log = RedeliveryLog::default();

        let first = consume::<War, _, _, _>(
            &settings(Some(1)),
            &mut log,
            &JsonCodec,
            &handler,
            tracked("m-1", false, nacks_once(true)),
        )
        .await
        .unwrap();
        assert_eq!(first, AckAction::Nack { requeue: true });

        // a classic queue requeue: redelivered flag set, no count headers
        let second = consume::<War, _, _, _>(
            &settings(Some(1)),
            &mut log,
            &JsonCodec,
            &handler,
            tracked("m-1", true, nacks_once(false)),
        )
        .await
        .unwrap();
        assert_eq!(second, AckAction::Nack { requeue: false });
    }

    #[tokio::test]
    async fn requeues_are_counted_per_message_id() {
        let handler = |_: War| AckDecision::RequeueAndRetry;
        let mut log = RedeliveryLog::default();

        for attempt in 0..3 {
            let action = consume::<War, _, _, _>(
                &settings(Some(3)),
                &mut log,
                &JsonCodec,
                &handler,
                tracked("m-1", attempt > 0, nacks_once(true)),
            )
            .await
            .unwrap();
            assert_eq!(action, AckAction::Nack { requeue: true });
        }

        let other = consume::<War, _, _, _>(
            &settings(Some(3)),
            &mut log,
            &JsonCodec,
            &handler,
            tracked("m-2", false, nacks_once(true)),
        )
        .await
        .unwrap();
        assert_eq!(other, AckAction::Nack { requeue: true });

        let last = consume::<War, _, _, _>(
            &settings(Some(3)),
            &mut log,
            &JsonCodec,
            &handler,
            tracked("m-1", true, nacks_once(false)),
        )
        .await
        .unwrap();
        assert_eq!(last, AckAction::Nack { requeue: false });
    }

    #[tokio::test]
    async fn messages_without_id_rely_on_headers() {
        let handler = |_: War| AckDecision::RequeueAndRetry;
        let mut msg = message(&war_bytes(), nacks_once(true));
        msg.redelivered = true;

        let action = consume::<War, _, _, _>(
            &settings(Some(1)),
            &mut RedeliveryLog::default(),
            &JsonCodec,
            &handler,
            msg,
        )
        .await
        .unwrap();
        assert_eq!(action, AckAction::Nack { requeue: true });
    }

    #[test]
    fn redelivery_log_evicts_oldest_and_resets_on_first_delivery() {
        let mut log = RedeliveryLog::with_capacity(2);
        log.record_requeue("a");
        log.record_requeue("b");
        log.record_requeue("b");
        log.record_requeue("c");

        assert_eq!(log.previous("a", true), 0);
        assert_eq!(log.previous("b", true), 2);
        assert_eq!(log.previous("c", true), 1);

        assert_eq!(log.previous("c", false), 0);
        assert_eq!(log.previous("c", true), 0);
    }

    #[test]
    fn envelope_takes_the_payload_without_copying() {
        let mut msg = message(&war_bytes(), MockAcknowledger::new());
        let payload = msg.data.as_ptr();

        let envelope = msg.take_envelope();
        assert_eq!(envelope.payload.as_ptr(), payload);
        assert_eq!(envelope.content_type, JSON_CONTENT_TYPE);
        assert!(msg.data.is_empty());
    }

    #[tokio::test]
    async fn settle_failure_is_reported() {
        let handler = |_: War| AckDecision::Ack;
        let mut acker = MockAcknowledger::new();
        acker
            .expect_ack()
            .returning(|| Err(AmqpError::AckMessageError));

        let err = consume::<War, _, _, _>(
            &settings(None),
            &mut RedeliveryLog::default(),
            &JsonCodec,
            &handler,
            message(&war_bytes(), acker),
        )
        .await
        .unwrap_err();
        assert_eq!(err, AmqpError::AckMessageError);
    }

    #[test]
    fn delivery_count_reads_quorum_and_death_headers() {
        assert_eq!(delivery_count(&json_props()), 0);

        let quorum = headers(vec![(AMQP_HEADERS_DELIVERY_COUNT, AMQPValue::LongUInt(4))]);
        assert_eq!(delivery_count(&quorum), 4);

        let mut death = BTreeMap::new();
        death.insert(ShortString::from(AMQP_HEADERS_COUNT), AMQPValue::LongLongInt(6));
        death.insert(
            ShortString::from("reason"),
            AMQPValue::LongString(LongString::from("rejected")),
        );
        let dead = headers(vec![(
            AMQP_HEADERS_X_DEATH,
            AMQPValue::FieldArray(FieldArray::from(vec![AMQPValue::FieldTable(
                FieldTable::from(death),
            )])),
        )]);
        assert_eq!(delivery_count(&dead), 6);
    }

    #[tokio::test]
    async fn poison_message_does_not_stop_the_loop() {
        let seen = Arc::new(Mutex::new(vec![]));
        let sink = seen.clone();
        let handler = move |war: War| {
            sink.lock().unwrap().push(war.attacker);
            AckDecision::Ack
        };

        let deliveries = stream::iter(vec![
            Ok(message(b"garbage", nacks_once(false))),
            Err(AmqpError::ConsumerError("transient".to_owned())),
            Ok(message(&war_bytes(), acks_once())),
            Ok(message(
                br#"{"Attacker":"carl","Defender":"dana"}"#,
                acks_once(),
            )),
        ]);

        let (_stop_tx, stop_rx) = watch::channel(false);
        run::<War, _, _, _, _>(deliveries, stop_rx, settings(None), JsonCodec, handler).await;

        assert_eq!(*seen.lock().unwrap(), vec!["alice", "carl"]);
    }

    #[tokio::test]
    async fn loop_counts_requeues_across_deliveries() {
        let handler = |_: War| AckDecision::RequeueAndRetry;
        let deliveries = stream::iter(vec![
            Ok(tracked("m-1", false, nacks_once(true))),
            Ok(tracked("m-1", true, nacks_once(true))),
            Ok(tracked("m-1", true, nacks_once(false))),
        ]);

        let (_stop_tx, stop_rx) = watch::channel(false);
        run::<War, _, _, _, _>(deliveries, stop_rx, settings(Some(2)), JsonCodec, handler).await;
    }

    #[tokio::test]
    async fn loop_ends_on_stop_signal() {
        let deliveries =
            stream::pending::<Result<InboundMessage<MockAcknowledger>, AmqpError>>();
        let (stop_tx, stop_rx) = watch::channel(false);
        let handler = |_: War| AckDecision::Ack;

        let task = tokio::spawn(run::<War, _, _, _, _>(
            deliveries,
            stop_rx,
            settings(None),
            JsonCodec,
            handler,
        ));
        stop_tx.send(true).unwrap();

        tokio::time::timeout(std::time::Duration::from_secs(5), task)
            .await
            .expect("loop stops")
            .unwrap();
    }

    #[tokio::test]
    async fn dropped_stop_sender_detaches_instead_of_stopping() {
        let handler = |_: War| AckDecision::Ack;
        let (stop_tx, stop_rx) = watch::channel(false);
        drop(stop_tx);

        let deliveries = stream::iter(vec![Ok(message(&war_bytes(), acks_once()))]);
        // only the end of the stream can finish the loop now
        run::<War, _, _, _, _>(deliveries, stop_rx, settings(None), JsonCodec, handler).await;
    }
}
