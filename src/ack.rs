// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Acknowledgment Decisions
//!
//! A handler reports what should happen to a message through an
//! [`AckDecision`]. This is the only way domain logic influences redelivery.
//! The decision is translated into an [`AckAction`], the broker primitive, and
//! applied through an [`Acknowledger`].

use crate::errors::AmqpError;
use async_trait::async_trait;
use lapin::{
    acker::Acker,
    options::{BasicAckOptions, BasicNackOptions},
};
#[cfg(test)]
use mockall::automock;
use tracing::{error, warn};

/// What a handler wants done with the message it just processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AckDecision {
    /// Processed; remove it from the queue.
    Ack,
    /// Not processable right now; put it back for another attempt.
    RequeueAndRetry,
    /// Never processable; drop it to the dead-letter exchange.
    DiscardPermanently,
}

impl AckDecision {
    /// Decodes the numeric form used by older peers: `0` ack, `1` requeue,
    /// `2` discard.
    ///
    /// Any other value is treated as [`AckDecision::Ack`]. This fail-open
    /// default keeps unknown decisions from piling up in the queue; it also
    /// means they are lost rather than dead-lettered.
    pub fn from_code(code: i64) -> Self {
        match code {
            0 => AckDecision::Ack,
            1 => AckDecision::RequeueAndRetry,
            2 => AckDecision::DiscardPermanently,
            other => {
                warn!(code = other, "unknown ack decision, acknowledging");
                AckDecision::Ack
            }
        }
    }

    /// Maps the decision to the broker primitive that settles the message.
    ///
    /// # Returns
    /// * `Ack` for [`AckDecision::Ack`]
    /// * `Nack { requeue: true }` for [`AckDecision::RequeueAndRetry`]
    /// * `Nack { requeue: false }` for [`AckDecision::DiscardPermanently`]
    pub fn action(self) -> AckAction {
        match self {
            AckDecision::Ack => AckAction::Ack,
            AckDecision::RequeueAndRetry => AckAction::Nack { requeue: true },
            AckDecision::DiscardPermanently => AckAction::Nack { requeue: false },
        }
    }
}

/// A broker acknowledgment primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckAction {
    Ack,
    Nack { requeue: bool },
}

/// Settles one delivery with the broker.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> Result<(), AmqpError>;

    async fn nack(&self, requeue: bool) -> Result<(), AmqpError>;
}

#[async_trait]
impl Acknowledger for Acker {
    async fn ack(&self) -> Result<(), AmqpError> {
        match Acker::ack(self, BasicAckOptions { multiple: false }).await {
            Err(err) => {
                error!(error = err.to_string(), "error whiling ack msg");
                Err(AmqpError::AckMessageError)
            }
            _ => Ok(()),
        }
    }

    async fn nack(&self, requeue: bool) -> Result<(), AmqpError> {
        match Acker::nack(
            self,
            BasicNackOptions {
                multiple: false,
                requeue,
            },
        )
        .await
        {
            Err(err) => {
                error!(error = err.to_string(), requeue, "error whiling nack msg");
                Err(AmqpError::NackMessageError)
            }
            _ => Ok(()),
        }
    }
}

impl AckAction {
    /// Sends this acknowledgment for one delivery.
    ///
    /// # Parameters
    /// * `acker` - Settles the delivery with the broker
    ///
    /// # Returns
    /// Ok(()) on success, or `AckMessageError`/`NackMessageError` on failure
    pub async fn apply<A>(self, acker: &A) -> Result<(), AmqpError>
    where
        A: Acknowledger + ?Sized,
    {
        match self {
            AckAction::Ack => acker.ack().await,
            AckAction::Nack { requeue } => acker.nack(requeue).await,
        }
    }
}
