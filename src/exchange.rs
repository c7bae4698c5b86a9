// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Exchange Management
//!
//! Exchanges are owned by the broker bootstrap, not by subscribers: the game
//! uses a direct exchange for control signals, a topic exchange for events and
//! a fanout exchange as the dead-letter sink.

use crate::errors::AmqpError;
use lapin::{options::ExchangeDeclareOptions, types::FieldTable, Channel};
use tracing::{debug, error};

/// Represents the types of exchanges available in RabbitMQ.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExchangeKind {
    #[default]
    Direct,
    Fanout,
    Topic,
    Headers,
}

impl From<ExchangeKind> for lapin::ExchangeKind {
    fn from(kind: ExchangeKind) -> Self {
        match kind {
            ExchangeKind::Direct => lapin::ExchangeKind::Direct,
            ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
            ExchangeKind::Headers => lapin::ExchangeKind::Headers,
            ExchangeKind::Topic => lapin::ExchangeKind::Topic,
        }
    }
}

/// Definition of a RabbitMQ exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeDefinition<'ex> {
    pub(crate) name: &'ex str,
    pub(crate) kind: ExchangeKind,
    pub(crate) delete: bool,
    pub(crate) durable: bool,
    pub(crate) passive: bool,
    pub(crate) internal: bool,
}

impl<'ex> ExchangeDefinition<'ex> {
    /// Creates a non-durable direct exchange definition.
    ///
    /// # Parameters
    /// * `name` - The name of the exchange
    ///
    /// # Returns
    /// A new exchange definition with default settings
    pub fn new(name: &'ex str) -> ExchangeDefinition<'ex> {
        ExchangeDefinition {
            name,
            kind: ExchangeKind::Direct,
            delete: false,
            durable: false,
            passive: false,
            internal: false,
        }
    }

    /// Sets the exchange type.
    pub fn kind(mut self, kind: ExchangeKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn direct(self) -> Self {
        self.kind(ExchangeKind::Direct)
    }

    pub fn fanout(self) -> Self {
        self.kind(ExchangeKind::Fanout)
    }

    pub fn topic(self) -> Self {
        self.kind(ExchangeKind::Topic)
    }

    /// Sets the exchange to auto-delete when no longer used.
    pub fn delete(mut self) -> Self {
        self.delete = true;
        self
    }

    /// Makes the exchange durable, persisting across broker restarts.
    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    /// Only checks that the exchange exists, without creating it.
    pub fn passive(mut self) -> Self {
        self.passive = true;
        self
    }

    /// Makes the exchange internal, preventing direct publishing.
    pub fn internal(mut self) -> Self {
        self.internal = true;
        self
    }

    pub(crate) fn options(&self) -> ExchangeDeclareOptions {
        ExchangeDeclareOptions {
            passive: self.passive,
            durable: self.durable,
            auto_delete: self.delete,
            internal: self.internal,
            nowait: false,
        }
    }

    /// Declares the exchange. Redeclaring with the same parameters is a
    /// no-op.
    ///
    /// # Parameters
    /// * `channel` - Channel the declaration runs on
    ///
    /// # Returns
    /// Ok(()) on success or `DeclareExchangeError` on failure
    pub async fn declare(&self, channel: &Channel) -> Result<(), AmqpError> {
        debug!("creating exchange: {}", self.name);

        match channel
            .exchange_declare(
                self.name,
                self.kind.into(),
                self.options(),
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    name = self.name,
                    "error to declare the exchange"
                );
                Err(AmqpError::DeclareExchangeError(self.name.to_owned()))
            }
            _ => {
                debug!("exchange: {} was created", self.name);
                Ok(())
            }
        }
    }
}
