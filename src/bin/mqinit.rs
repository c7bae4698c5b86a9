// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Declares the game's exchanges and shared queues on the configured broker.
//!
//! Usage: `mqinit [config-file]`. Connection settings come from the file, a
//! `.env` file and `RABBITMQ_*` variables.

use pubsub::{
    channel::new_amqp_connection,
    configs::RabbitMQConfigs,
    errors::AmqpError,
    topology::{install_game_topology, DeadLetterPolicy},
};
use std::{env, path::PathBuf, process::ExitCode};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    match init(env::args().nth(1).map(PathBuf::from)).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = err.to_string(), "failure to initialize broker topology");
            ExitCode::FAILURE
        }
    }
}

async fn init(config_path: Option<PathBuf>) -> Result<(), AmqpError> {
    let cfg = RabbitMQConfigs::load(config_path.as_deref())?;
    let conn = new_amqp_connection(&cfg).await?;

    install_game_topology(&conn, &DeadLetterPolicy::from(&cfg)).await?;
    info!(
        host = cfg.host.as_str(),
        dead_letter_exchange = cfg.dead_letter_exchange.as_str(),
        "broker topology installed"
    );

    if let Err(err) = conn.close(200, "topology installed").await {
        error!(error = err.to_string(), "error closing connection");
    }

    Ok(())
}
