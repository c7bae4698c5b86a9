// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Topology Declaration
//!
//! Declares queues with the flags of their [`QueueKind`], binds them to an
//! exchange and attaches the dead-letter policy. Every call is idempotent:
//! declaring an existing queue with identical parameters is a no-op on the
//! broker, and so is repeating a binding.
//!
//! Nothing here is ever torn down. Durable queues outlive the process and
//! transient ones disappear with their connection.

use crate::{
    channel::new_amqp_channel,
    configs::RabbitMQConfigs,
    errors::AmqpError,
    exchange::ExchangeDefinition,
    queue::{Binding, QueueKind},
    routing::{
        wildcard, DEAD_LETTER_EXCHANGE, DEAD_LETTER_QUEUE, EXCHANGE_PERIL_DIRECT,
        EXCHANGE_PERIL_TOPIC, GAME_LOG_SLUG,
    },
};
use lapin::{
    options::{QueueBindOptions, QueueDeclareOptions},
    types::{AMQPValue, FieldTable, LongString, ShortString},
    Channel, Connection, Queue,
};
use std::collections::BTreeMap;
use tracing::{debug, error};

/// Constant for the queue argument used to specify a dead letter exchange
pub const AMQP_HEADERS_DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";

/// Where a queue sends messages that are rejected without requeue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterPolicy {
    exchange: String,
}

impl Default for DeadLetterPolicy {
    fn default() -> Self {
        Self::new(DEAD_LETTER_EXCHANGE)
    }
}

impl From<&RabbitMQConfigs> for DeadLetterPolicy {
    fn from(cfg: &RabbitMQConfigs) -> Self {
        Self::new(&cfg.dead_letter_exchange)
    }
}

impl DeadLetterPolicy {
    /// Creates a new dead-letter policy.
    ///
    /// # Parameters
    /// * `exchange` - The name of the exchange rejected messages are routed to
    ///
    /// # Returns
    /// A policy attaching `exchange` as `x-dead-letter-exchange`
    pub fn new(exchange: &str) -> Self {
        Self {
            exchange: exchange.to_owned(),
        }
    }

    /// Name of the dead-letter exchange.
    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// The queue arguments attaching this policy.
    pub(crate) fn arguments(&self) -> FieldTable {
        let mut args = BTreeMap::new();
        args.insert(
            ShortString::from(AMQP_HEADERS_DEAD_LETTER_EXCHANGE),
            AMQPValue::LongString(LongString::from(self.exchange.clone())),
        );
        FieldTable::from(args)
    }
}

/// Opens a channel, declares `queue_name` as `kind`, and binds it to
/// `exchange` under `routing_key`.
///
/// # Parameters
/// * `conn` - Connection the channel is opened on
/// * `exchange` - Exchange to bind to, empty to skip the binding
/// * `queue_name` - Queue to declare, empty for a broker-named one
/// * `routing_key` - Binding key, may be empty for fanout exchanges
/// * `kind` - Durable or transient, resolved into the queue flags
/// * `dead_letter` - Where rejected messages go
///
/// # Returns
/// The channel, which belongs to the caller, and the declared queue
pub async fn declare_and_bind(
    conn: &Connection,
    exchange: &str,
    queue_name: &str,
    routing_key: &str,
    kind: QueueKind,
    dead_letter: &DeadLetterPolicy,
) -> Result<(Channel, Queue), AmqpError> {
    let binding = Binding::new(queue_name)
        .exchange(exchange)
        .routing_key(routing_key)
        .kind(kind);

    declare_binding(conn, &binding, dead_letter).await
}

/// Same as [`declare_and_bind`], taking a prepared [`Binding`].
pub async fn declare_binding(
    conn: &Connection,
    binding: &Binding<'_>,
    dead_letter: &DeadLetterPolicy,
) -> Result<(Channel, Queue), AmqpError> {
    let channel = new_amqp_channel(conn).await?;
    let queue = declare_on(&channel, binding, dead_letter).await?;
    Ok((channel, queue))
}

/// Declares and binds on an already open channel.
pub(crate) async fn declare_on(
    channel: &Channel,
    binding: &Binding<'_>,
    dead_letter: &DeadLetterPolicy,
) -> Result<Queue, AmqpError> {
    debug!(
        queue = binding.queue_name,
        kind = ?binding.kind,
        "creating queue"
    );

    let options: QueueDeclareOptions = binding.kind.flags().into();

    let queue = match channel
        .queue_declare(binding.queue_name, options, dead_letter.arguments())
        .await
    {
        Err(err) => {
            error!(
                error = err.to_string(),
                queue = binding.queue_name,
                "error to declare the queue"
            );
            Err(AmqpError::DeclareQueueError(binding.queue_name.to_owned()))
        }
        Ok(q) => Ok(q),
    }?;

    // an empty queue name is filled in by the broker, bind what it gave back
    let queue_name = queue.name().as_str().to_owned();
    debug!("queue: {} was created", queue_name);

    if binding.exchange.is_empty() {
        debug!(queue = queue_name.as_str(), "no exchange given, skipping binding");
        return Ok(queue);
    }

    debug!(
        "binding queue: {} to the exchange: {} with the key: {}",
        queue_name, binding.exchange, binding.routing_key
    );

    match channel
        .queue_bind(
            &queue_name,
            binding.exchange,
            binding.routing_key,
            QueueBindOptions { nowait: false },
            FieldTable::default(),
        )
        .await
    {
        Err(err) => {
            error!(error = err.to_string(), "error to bind queue to exchange");
            Err(AmqpError::BindingExchangeToQueueError(
                binding.exchange.to_owned(),
                queue_name,
            ))
        }
        _ => Ok(queue),
    }
}

/// Declares the exchanges and shared queues every game process relies on.
///
/// - `peril_direct`: direct exchange for pause/resume
/// - `peril_topic`: durable topic exchange for game events
/// - the dead-letter fanout exchange and its durable sink queue
/// - the durable `game_logs` queue fed by `game_logs.*`
///
/// Safe to run repeatedly.
///
/// # Parameters
/// * `conn` - Connection the declarations run on
/// * `dead_letter` - Policy whose exchange is declared and attached to the queues
///
/// # Returns
/// Ok(()) on success or the first declaration error
pub async fn install_game_topology(
    conn: &Connection,
    dead_letter: &DeadLetterPolicy,
) -> Result<(), AmqpError> {
    let channel = new_amqp_channel(conn).await?;

    ExchangeDefinition::new(EXCHANGE_PERIL_DIRECT)
        .direct()
        .declare(&channel)
        .await?;
    ExchangeDefinition::new(EXCHANGE_PERIL_TOPIC)
        .topic()
        .durable()
        .declare(&channel)
        .await?;
    ExchangeDefinition::new(dead_letter.exchange())
        .fanout()
        .durable()
        .declare(&channel)
        .await?;

    let dlq = Binding::new(DEAD_LETTER_QUEUE)
        .exchange(dead_letter.exchange())
        .durable();
    declare_on(&channel, &dlq, dead_letter).await?;

    let game_logs_key = wildcard(GAME_LOG_SLUG);
    let game_logs = Binding::new(GAME_LOG_SLUG)
        .exchange(EXCHANGE_PERIL_TOPIC)
        .routing_key(&game_logs_key)
        .durable();
    declare_on(&channel, &game_logs, dead_letter).await?;

    debug!("game topology installed");

    Ok(())
}
