// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the Pub/Sub Layer
//!
//! `AmqpError` covers everything that can go wrong while talking to the broker:
//! connection and channel setup, topology declaration, publishing and
//! acknowledging. `CodecError` covers payload encoding and decoding, and keeps
//! the two directions apart so a caller can tell a bad value from bad bytes.

use thiserror::Error;

/// Represents errors that can occur during AMQP/RabbitMQ operations.
///
/// Setup failures (connection, channel, declare, bind, qos, consume) are
/// returned synchronously to whoever started the setup. Failures inside a
/// running subscription never surface here; they are logged instead.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AmqpError {
    /// Internal errors that don't fit into other categories
    #[error("internal error")]
    InternalError,

    /// Error loading the broker configuration
    #[error("failure to load configs `{0}`")]
    ConfigError(String),

    /// Error establishing a connection to the RabbitMQ server
    #[error("failure to connect")]
    ConnectionError,

    /// Error creating a channel from an established connection
    #[error("failure to create a channel")]
    ChannelError,

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{0}`")]
    DeclareExchangeError(String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// Error binding an exchange to a queue
    #[error("failure to binding exchange `{0}` to queue `{1}`")]
    BindingExchangeToQueueError(String, String),

    /// A raw queue kind value that maps to neither durable nor transient
    #[error("unknown queue kind `{0}`")]
    InvalidQueueKind(i64),

    /// Error configuring Quality of Service parameters
    #[error("failure to configure qos `{0}`")]
    QoSDeclarationError(String),

    /// Error declaring a consumer
    #[error("consumer declaration error `{0}`")]
    ConsumerDeclarationError(String),

    /// Error publishing a message, carrying the broker's message
    #[error("failure to publish `{0}`")]
    PublishingError(String),

    /// Error acknowledging a message
    #[error("failure to ack message")]
    AckMessageError,

    /// Error negative-acknowledging a message
    #[error("failure to nack message")]
    NackMessageError,

    /// Error consuming a message
    #[error("failure to consume message `{0}`")]
    ConsumerError(String),

    /// Error encoding or decoding a payload
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Errors produced by a [`Codec`](crate::codec::Codec).
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodecError {
    /// The value could not be serialized
    #[error("failure to encode payload: {0}")]
    Encode(String),

    /// The bytes could not be turned back into a value
    #[error("failure to decode payload: {0}")]
    Decode(String),

    /// The envelope was produced by a different codec
    #[error("content type mismatch: expected `{expected}`, found `{found}`")]
    ContentTypeMismatch { expected: String, found: String },
}
