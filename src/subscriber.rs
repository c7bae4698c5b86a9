// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Subscriber
//!
//! Binds a queue, opens a consumer on a channel of its own and spawns one task
//! that feeds every delivery to a handler. Setup failures are returned from
//! [`Subscriber::subscribe`]; anything that goes wrong later stays inside the
//! task and is only logged.
//!
//! Each channel allows [`PREFETCH_COUNT`] unacknowledged deliveries, which
//! bounds memory and slows the broker down when the handler is slow.

use crate::{
    ack::AckDecision,
    codec::{CborCodec, Codec, JsonCodec},
    configs::RabbitMQConfigs,
    consumer::{run, ConsumeSettings, InboundMessage},
    errors::AmqpError,
    queue::{Binding, QueueKind},
    topology::{declare_binding, DeadLetterPolicy},
};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    options::{BasicConsumeOptions, BasicQosOptions},
    types::FieldTable,
    Connection,
};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, error, info_span, Instrument, Span};

/// Unacknowledged deliveries allowed in flight per subscription channel.
pub const PREFETCH_COUNT: u16 = 10;

/// Domain logic plugged into a subscription.
///
/// A handler always answers with a decision; failures it can recover from
/// should become [`AckDecision::RequeueAndRetry`] and the rest
/// [`AckDecision::DiscardPermanently`]. Any `Fn(T) -> AckDecision` closure is a
/// handler.
#[async_trait]
pub trait Handler<T: Send + 'static>: Send + Sync + 'static {
    async fn handle(&self, value: T) -> AckDecision;
}

#[async_trait]
impl<T, F> Handler<T> for F
where
    T: Send + 'static,
    F: Fn(T) -> AckDecision + Send + Sync + 'static,
{
    async fn handle(&self, value: T) -> AckDecision {
        self(value)
    }
}

/// Handle on a running subscription task.
///
/// Dropping it detaches the task, which then runs until the channel or the
/// connection is closed.
pub struct Subscription {
    queue: String,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Subscription {
    /// Name of the consumed queue, as assigned by the broker.
    pub fn queue_name(&self) -> &str {
        &self.queue
    }

    /// Whether the task has ended, after a stop or because the delivery
    /// stream closed.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Asks the task to stop after the message in hand and waits for it.
    ///
    /// # Returns
    /// Ok(()) once the task ended, or `InternalError` if it panicked
    pub async fn stop(self) -> Result<(), AmqpError> {
        let _ = self.stop.send(true);
        self.join().await
    }

    /// Waits for the task to end on its own, when the delivery stream closes.
    pub async fn join(self) -> Result<(), AmqpError> {
        self.task.await.map_err(|err| {
            error!(error = err.to_string(), "subscription task failed");
            AmqpError::InternalError
        })
    }
}

/// Per-queue behaviour shared by every subscription of a [`Subscriber`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Where rejected messages of every declared queue go
    pub dead_letter: DeadLetterPolicy,
    /// Deliveries after which a retry becomes a discard, unbounded when `None`
    pub max_redeliveries: Option<u32>,
}

impl From<&RabbitMQConfigs> for SubscribeOptions {
    fn from(cfg: &RabbitMQConfigs) -> Self {
        SubscribeOptions {
            dead_letter: DeadLetterPolicy::from(cfg),
            max_redeliveries: cfg.max_redeliveries,
        }
    }
}

impl SubscribeOptions {
    pub(crate) fn consume_settings(&self, queue: &str) -> ConsumeSettings {
        ConsumeSettings {
            queue: queue.to_owned(),
            max_redeliveries: self.max_redeliveries,
        }
    }
}

/// Builds subscriptions on a shared connection.
pub struct Subscriber {
    conn: Arc<Connection>,
    options: SubscribeOptions,
    span: Option<Span>,
}

impl Subscriber {
    /// Creates a subscriber with the default dead-letter policy and no
    /// redelivery cap.
    ///
    /// # Parameters
    /// * `conn` - Connection every subscription opens its channel on
    ///
    /// # Returns
    /// A new Subscriber instance
    pub fn new(conn: Arc<Connection>) -> Self {
        Subscriber {
            conn,
            options: SubscribeOptions::default(),
            span: None,
        }
    }

    /// Creates a subscriber applying the configured dead-letter exchange and
    /// redelivery cap.
    ///
    /// # Parameters
    /// * `conn` - Connection every subscription opens its channel on
    /// * `cfg` - Loaded broker configs
    ///
    /// # Returns
    /// A new Subscriber instance
    pub fn from_configs(conn: Arc<Connection>, cfg: &RabbitMQConfigs) -> Self {
        Subscriber::new(conn).with_options(SubscribeOptions::from(cfg))
    }

    /// Replaces every per-queue option at once.
    pub fn with_options(mut self, options: SubscribeOptions) -> Self {
        self.options = options;
        self
    }

    /// Dead-letter exchange attached to every queue this subscriber declares.
    /// It has to exist on the broker, see `install_game_topology`.
    pub fn with_dead_letter(mut self, policy: DeadLetterPolicy) -> Self {
        self.options.dead_letter = policy;
        self
    }

    /// Discards a message instead of requeuing it once it was delivered
    /// `max` times. The count comes from the broker headers when present,
    /// otherwise from the requeues the subscription has seen for the same
    /// message id.
    pub fn with_max_redeliveries(mut self, max: u32) -> Self {
        self.options.max_redeliveries = Some(max);
        self
    }

    /// Span the subscription task runs in. Defaults to a `subscription`
    /// span carrying the queue and exchange.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn options(&self) -> &SubscribeOptions {
        &self.options
    }

    /// Declares `binding`, starts consuming and spawns the handling task.
    ///
    /// # Parameters
    /// * `binding` - Queue, kind and exchange binding to declare
    /// * `codec` - Codec every payload is decoded with
    /// * `handler` - Domain handler deciding each message's outcome
    ///
    /// # Returns
    /// A handle on the running subscription, or the setup error
    pub async fn subscribe<T, C, H>(
        &self,
        binding: &Binding<'_>,
        codec: C,
        handler: H,
    ) -> Result<Subscription, AmqpError>
    where
        T: DeserializeOwned + Send + 'static,
        C: Codec,
        H: Handler<T>,
    {
        let (channel, queue) =
            declare_binding(&self.conn, binding, &self.options.dead_letter).await?;
        let queue_name = queue.name().as_str().to_owned();

        if let Err(err) = channel
            .basic_qos(PREFETCH_COUNT, BasicQosOptions { global: false })
            .await
        {
            error!(error = err.to_string(), "error to configure qos");
            return Err(AmqpError::QoSDeclarationError(err.to_string()));
        }

        let consumer = match channel
            .basic_consume(
                &queue_name,
                "",
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: false,
                    exclusive: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to create the consumer");
                Err(AmqpError::ConsumerDeclarationError(err.to_string()))
            }
            Ok(c) => Ok(c),
        }?;

        let deliveries = consumer.map(|result| {
            result
                .map(InboundMessage::from)
                .map_err(|err| AmqpError::ConsumerError(err.to_string()))
        });

        let span = self.span.clone().unwrap_or_else(|| {
            info_span!(
                "subscription",
                queue = queue_name.as_str(),
                exchange = binding.exchange
            )
        });

        let settings = self.options.consume_settings(&queue_name);

        let (stop_tx, stop_rx) = watch::channel(false);

        let task = tokio::spawn(
            async move {
                // the channel lives as long as the loop
                let _channel = channel;
                run::<T, _, _, _, _>(deliveries, stop_rx, settings, codec, handler).await;
            }
            .instrument(span),
        );

        debug!(queue = queue_name.as_str(), "subscribed");

        Ok(Subscription {
            queue: queue_name,
            stop: stop_tx,
            task,
        })
    }
}

/// Subscribes `handler` to `queue_name`, bound to `exchange` under
/// `routing_key`, decoding with `codec`.
///
/// # Parameters
/// * `subscriber` - Connection and per-queue options, see [`Subscriber::from_configs`]
/// * `exchange` - Exchange the queue is bound to
/// * `routing_key` - Binding key
/// * `queue_name` - Queue to declare, empty for a broker-named one
/// * `kind` - Durable or transient
/// * `handler` - Domain handler deciding each message's outcome
/// * `codec` - Codec every payload is decoded with
///
/// # Returns
/// A handle on the running subscription, or the setup error
pub async fn subscribe<T, C, H>(
    subscriber: &Subscriber,
    exchange: &str,
    routing_key: &str,
    queue_name: &str,
    kind: QueueKind,
    handler: H,
    codec: C,
) -> Result<Subscription, AmqpError>
where
    T: DeserializeOwned + Send + 'static,
    C: Codec,
    H: Handler<T>,
{
    let binding = Binding::new(queue_name)
        .exchange(exchange)
        .routing_key(routing_key)
        .kind(kind);

    subscriber
        .subscribe::<T, C, H>(&binding, codec, handler)
        .await
}

/// [`subscribe`] with the JSON codec.
pub async fn subscribe_json<T, H>(
    subscriber: &Subscriber,
    exchange: &str,
    routing_key: &str,
    queue_name: &str,
    kind: QueueKind,
    handler: H,
) -> Result<Subscription, AmqpError>
where
    T: DeserializeOwned + Send + 'static,
    H: Handler<T>,
{
    subscribe::<T, _, H>(
        subscriber,
        exchange,
        routing_key,
        queue_name,
        kind,
        handler,
        JsonCodec,
    )
    .await
}

/// [`subscribe`] with the CBOR codec.
pub async fn subscribe_cbor<T, H>(
    subscriber: &Subscriber,
    exchange: &str,
    routing_key: &str,
    queue_name: &str,
    kind: QueueKind,
    handler: H,
) -> Result<Subscription, AmqpError>
where
    T: DeserializeOwned + Send + 'static,
    H: Handler<T>,
{
    subscribe::<T, _, H>(
        subscriber,
        exchange,
        routing_key,
        queue_name,
        kind,
        handler,
        CborCodec,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Handler<String> for Counting {
        async fn handle(&self, value: String) -> AckDecision {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if value.is_empty() {
                AckDecision::DiscardPermanently
            } else {
                AckDecision::Ack
            }
        }
    }

    #[tokio::test]
    async fn closures_are_handlers() {
        let handler = |n: u32| {
            if n % 2 == 0 {
                AckDecision::Ack
            } else {
                AckDecision::RequeueAndRetry
            }
        };
        assert_eq!(handler.handle(2).await, AckDecision::Ack);
        assert_eq!(handler.handle(3).await, AckDecision::RequeueAndRetry);
    }

    #[tokio::test]
    async fn structs_are_handlers() {
        let handler = Counting {
            calls: AtomicUsize::new(0),
        };
        assert_eq!(handler.handle("move".to_owned()).await, AckDecision::Ack);
        assert_eq!(
            handler.handle(String::new()).await,
            AckDecision::DiscardPermanently
        );
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn configured_values_reach_queue_and_loop_settings() {
        let cfg = RabbitMQConfigs {
            dead_letter_exchange: "custom_dlx".to_owned(),
            max_redeliveries: Some(5),
            ..RabbitMQConfigs::default()
        };

        let options = SubscribeOptions::from(&cfg);
        assert_eq!(options.dead_letter, DeadLetterPolicy::new("custom_dlx"));
        assert_eq!(
            options.consume_settings("war.alice"),
            ConsumeSettings {
                queue: "war.alice".to_owned(),
                max_redeliveries: Some(5),
            }
        );
    }

    #[test]
    fn default_options_use_peril_dlx_without_cap() {
        let options = SubscribeOptions::from(&RabbitMQConfigs::default());
        assert_eq!(options, SubscribeOptions::default());
        assert_eq!(options.dead_letter.exchange(), "peril_dlx");
        assert_eq!(options.consume_settings("q").max_redeliveries, None);
    }

    #[test]
    fn prefetch_window_is_ten() {
        assert_eq!(PREFETCH_COUNT, 10);
    }

    #[tokio::test]
    async fn stop_waits_for_the_task() {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let _ = stop_rx.wait_for(|stopped| *stopped).await;
        });
        let subscription = Subscription {
            queue: "pause.alice".to_owned(),
            stop: stop_tx,
            task,
        };

        assert_eq!(subscription.queue_name(), "pause.alice");
        assert!(!subscription.is_finished());
        subscription.stop().await.unwrap();
    }
}
