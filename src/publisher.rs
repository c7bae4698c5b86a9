// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Publisher
//!
//! Encodes a value with a [`Codec`] and hands the bytes to the broker. Publishes
//! are neither mandatory nor immediate: a message routed to no queue is
//! dropped by the broker, so the topology must exist before publishing.
//! Broker errors are returned as they are, without retries.
//!
//! Give each concurrent publisher its own channel.

use crate::{
    codec::{CborCodec, Codec, Envelope, JsonCodec},
    errors::AmqpError,
    otel,
};
use async_trait::async_trait;
use lapin::{
    options::BasicPublishOptions,
    types::{FieldTable, ShortString},
    BasicProperties, Channel,
};
#[cfg(test)]
use mockall::automock;
use opentelemetry::Context;
use serde::Serialize;
use std::{collections::BTreeMap, sync::Arc};
use tracing::{debug, error, Instrument, Span};
use uuid::Uuid;

/// Delivers an encoded envelope to an exchange.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        exchange: &str,
        routing_key: &str,
        envelope: &Envelope,
    ) -> Result<(), AmqpError>;
}

#[async_trait]
impl Transport for Channel {
    async fn send(
        &self,
        exchange: &str,
        routing_key: &str,
        envelope: &Envelope,
    ) -> Result<(), AmqpError> {
        let mut headers = BTreeMap::new();
        otel::inject(&Context::current(), &mut headers);

        match self
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions {
                    mandatory: false,
                    immediate: false,
                },
                &envelope.payload,
                BasicProperties::default()
                    .with_content_type(ShortString::from(envelope.content_type.clone()))
                    .with_message_id(ShortString::from(Uuid::new_v4().to_string()))
                    .with_headers(FieldTable::from(headers)),
            )
            .await
        {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    exchange, routing_key, "error publishing message"
                );
                Err(AmqpError::PublishingError(err.to_string()))
            }
            _ => Ok(()),
        }
    }
}

/// Encodes `value` with `codec` and sends it to `exchange` under `routing_key`.
///
/// An encode failure returns before anything reaches the transport.
///
/// # Parameters
/// * `transport` - Where the envelope is sent, usually a dedicated channel
/// * `codec` - Encoding and content-type tag of the message
/// * `exchange` - The exchange to publish to
/// * `routing_key` - The routing key of the message
/// * `value` - The value to encode
///
/// # Returns
/// Ok(()) once the broker accepted the write, `Codec` on encode failure,
/// or the broker error as it was returned
pub async fn publish<P, C, T>(
    transport: &P,
    codec: &C,
    exchange: &str,
    routing_key: &str,
    value: &T,
) -> Result<(), AmqpError>
where
    P: Transport + ?Sized,
    C: Codec,
    T: Serialize,
{
    let envelope = codec.encode(value).map_err(|err| {
        error!(error = err.to_string(), "error encoding message");
        err
    })?;

    transport.send(exchange, routing_key, &envelope).await?;

    debug!(exchange, routing_key, "message published");
    Ok(())
}

/// Publishes `value` as JSON.
pub async fn publish_json<T: Serialize>(
    channel: &Channel,
    exchange: &str,
    routing_key: &str,
    value: &T,
) -> Result<(), AmqpError> {
    publish(channel, &JsonCodec, exchange, routing_key, value).await
}

/// Publishes `value` as CBOR.
pub async fn publish_cbor<T: Serialize>(
    channel: &Channel,
    exchange: &str,
    routing_key: &str,
    value: &T,
) -> Result<(), AmqpError> {
    publish(channel, &CborCodec, exchange, routing_key, value).await
}

/// A publisher bound to one channel and one codec.
pub struct RabbitMQPublisher<C: Codec> {
    transport: Arc<dyn Transport>,
    codec: C,
    span: Span,
}

impl<C: Codec> RabbitMQPublisher<C> {
    /// Takes ownership of a dedicated `channel`.
    pub fn new(channel: Channel, codec: C) -> Self {
        Self::from_transport(Arc::new(channel), codec)
    }

    /// Builds a publisher on any [`Transport`].
    pub fn from_transport(transport: Arc<dyn Transport>, codec: C) -> Self {
        RabbitMQPublisher {
            transport,
            codec,
            span: Span::none(),
        }
    }

    /// Span every publish is recorded under.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Publishes `value` with this publisher's codec, under its span.
    ///
    /// # Parameters
    /// * `exchange` - The exchange to publish to
    /// * `routing_key` - The routing key of the message
    /// * `value` - The value to encode
    pub async fn publish<T: Serialize>(
        &self,
        exchange: &str,
        routing_key: &str,
        value: &T,
    ) -> Result<(), AmqpError> {
        publish(
            self.transport.as_ref(),
            &self.codec,
            exchange,
            routing_key,
            value,
        )
        .instrument(self.span.clone())
        .await
    }
}
