// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Kinds and Bindings
//!
//! A queue is declared with exactly one [`QueueKind`], which decides the three
//! broker flags together. There is no way to set `durable`, `auto_delete` or
//! `exclusive` independently.

use crate::errors::AmqpError;
use lapin::options::QueueDeclareOptions;

/// Lifetime policy of a declared queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    /// Survives broker restarts and is shared by competing consumers.
    Durable,
    /// Lives as long as the declaring connection and is exclusive to it.
    Transient,
}

/// The broker flags a [`QueueKind`] resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFlags {
    pub durable: bool,
    pub auto_delete: bool,
    pub exclusive: bool,
}

impl QueueKind {
    /// Every kind, in declaration order.
    pub const ALL: [QueueKind; 2] = [QueueKind::Durable, QueueKind::Transient];

    /// Resolves the kind into its broker flags.
    ///
    /// # Returns
    /// * Durable: durable, not auto-deleted, not exclusive
    /// * Transient: not durable, auto-deleted, exclusive to the connection
    pub fn flags(self) -> QueueFlags {
        match self {
            QueueKind::Durable => QueueFlags {
                durable: true,
                auto_delete: false,
                exclusive: false,
            },
            QueueKind::Transient => QueueFlags {
                durable: false,
                auto_delete: true,
                exclusive: true,
            },
        }
    }
}

/// Raw numeric kinds, as stored in configs or sent by older peers:
/// `0` is durable and `1` is transient.
impl TryFrom<i64> for QueueKind {
    type Error = AmqpError;

    fn try_from(raw: i64) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(QueueKind::Durable),
            1 => Ok(QueueKind::Transient),
            other => Err(AmqpError::InvalidQueueKind(other)),
        }
    }
}

impl From<QueueFlags> for QueueDeclareOptions {
    fn from(flags: QueueFlags) -> Self {
        QueueDeclareOptions {
            passive: false,
            durable: flags.durable,
            exclusive: flags.exclusive,
            auto_delete: flags.auto_delete,
            nowait: false,
        }
    }
}

/// A queue bound to an exchange under a routing key.
///
/// Declaring the same binding twice is a no-op on the broker side. An empty
/// queue name asks the broker to generate one; an empty routing key is legal
/// for fanout exchanges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding<'b> {
    pub(crate) exchange: &'b str,
    pub(crate) routing_key: &'b str,
    pub(crate) queue_name: &'b str,
    pub(crate) kind: QueueKind,
}

impl<'b> Binding<'b> {
    /// Creates a transient binding for `queue` with no exchange and no key.
    ///
    /// # Parameters
    /// * `queue` - The queue name, empty for a broker-generated one
    ///
    /// # Returns
    /// A new binding to refine with the builder methods
    pub fn new(queue: &'b str) -> Binding<'b> {
        Binding {
            exchange: "",
            routing_key: "",
            queue_name: queue,
            kind: QueueKind::Transient,
        }
    }

    /// Exchange to bind to. Left empty, the queue is declared but not bound.
    pub fn exchange(mut self, exchange: &'b str) -> Self {
        self.exchange = exchange;
        self
    }

    /// Key the binding matches on.
    pub fn routing_key(mut self, key: &'b str) -> Self {
        self.routing_key = key;
        self
    }

    pub fn kind(mut self, kind: QueueKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn durable(self) -> Self {
        self.kind(QueueKind::Durable)
    }

    pub fn transient(self) -> Self {
        self.kind(QueueKind::Transient)
    }
}
