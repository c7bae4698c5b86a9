// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Connection and Channel Management
//!
//! One connection is shared by the whole process; channels are cheap and are
//! never shared between concurrent users. Every publish call site and every
//! subscription takes its own channel from here.

use crate::{configs::RabbitMQConfigs, errors::AmqpError};
use lapin::{types::LongString, Channel, Connection, ConnectionProperties};
use std::sync::Arc;
use tracing::{debug, error};

/// Dials the broker described by `cfg`.
///
/// The connection is named after `cfg.app_name` so it can be told apart in the
/// broker's management UI. Closing it force-closes every channel and every
/// subscription task built on top of it.
///
/// # Parameters
/// * `cfg` - Configs carrying the broker URI and the application name
///
/// # Returns
/// * `Result<Arc<Connection>, AmqpError>` -
///   The shared connection on success, or `ConnectionError` on failure.
///
/// # Example
/// ```ignore
/// let cfg = RabbitMQConfigs::load(None)?;
/// let conn = new_amqp_connection(&cfg).await?;
/// ```
pub async fn new_amqp_connection(cfg: &RabbitMQConfigs) -> Result<Arc<Connection>, AmqpError> {
    debug!("creating amqp connection...");
    let options = ConnectionProperties::default()
        .with_connection_name(LongString::from(cfg.app_name.clone()));

    match Connection::connect(&cfg.uri(), options).await {
        Ok(conn) => {
            debug!("amqp connected");
            Ok(Arc::new(conn))
        }
        Err(err) => {
            error!(error = err.to_string(), "failure to connect");
            Err(AmqpError::ConnectionError)
        }
    }
}

/// Opens a fresh channel on `conn`.
///
/// The returned channel is meant for a single concurrent user.
///
/// # Parameters
/// * `conn` - An open connection
///
/// # Returns
/// The new channel, or `ChannelError` on failure
pub async fn new_amqp_channel(conn: &Connection) -> Result<Channel, AmqpError> {
    debug!("creating amqp channel...");
    match conn.create_channel().await {
        Ok(c) => {
            debug!(channel = c.id(), "channel created");
            Ok(c)
        }
        Err(err) => {
            error!(error = err.to_string(), "error to create the channel");
            Err(AmqpError::ChannelError)
        }
    }
}
