// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Routing Conventions
//!
//! Exchange names, routing key prefixes and the small payload types that the
//! game processes exchange through this layer. Keys are dotted segments,
//! `<prefix>.<player>`, and wildcard subscriptions match the last segment.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Direct exchange for point-to-point control signals.
pub const EXCHANGE_PERIL_DIRECT: &str = "peril_direct";
/// Topic exchange for broadcast game events.
pub const EXCHANGE_PERIL_TOPIC: &str = "peril_topic";
/// Fanout exchange collecting every discarded message.
pub const DEAD_LETTER_EXCHANGE: &str = "peril_dlx";
/// Durable sink queue bound to [`DEAD_LETTER_EXCHANGE`].
pub const DEAD_LETTER_QUEUE: &str = "peril_dlq";

/// Key of the pause/resume signal.
pub const PAUSE_KEY: &str = "pause";
pub const ARMY_MOVES_PREFIX: &str = "army_moves";
pub const WAR_RECOGNITIONS_PREFIX: &str = "war";
pub const GAME_LOG_SLUG: &str = "game_logs";

/// Builds a routing key.
///
/// # Parameters
/// * `prefix` - The key family, e.g. [`ARMY_MOVES_PREFIX`]
/// * `id` - Usually the player name
///
/// # Returns
/// `<prefix>.<id>`
pub fn routing_key(prefix: &str, id: &str) -> String {
    format!("{prefix}.{id}")
}

/// Builds `<prefix>.*`, matching any single trailing segment on a topic exchange.
pub fn wildcard(prefix: &str) -> String {
    routing_key(prefix, "*")
}

/// Pause/resume signal sent by the server on [`EXCHANGE_PERIL_DIRECT`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayingState {
    #[serde(rename = "IsPaused")]
    pub is_paused: bool,
}

/// One line of the shared game log, published with the binary codec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameLog {
    #[serde(rename = "CurrentTime")]
    pub current_time: DateTime<Utc>,
    #[serde(rename = "Message")]
    pub message: String,
    #[serde(rename = "Username")]
    pub username: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_dotted() {
        assert_eq!(routing_key(ARMY_MOVES_PREFIX, "alice"), "army_moves.alice");
        assert_eq!(routing_key(PAUSE_KEY, "bob"), "pause.bob");
        assert_eq!(wildcard(GAME_LOG_SLUG), "game_logs.*");
    }

    #[test]
    fn playing_state_uses_wire_field_names() {
        let json = serde_json::to_string(&PlayingState { is_paused: true }).unwrap();
        assert_eq!(json, r#"{"IsPaused":true}"#);
    }
}
