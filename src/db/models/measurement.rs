//! Rows of the `measurement` event log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    StartGame,
    StopGame,
    Ping,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::StartGame => "start_game",
            EventKind::StopGame => "stop_game",
            EventKind::Ping => "ping",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MeasurementEvent {
    /// `None` until the row is inserted.
    pub id: Option<i64>,
    pub player_id: i64,
    pub device_id: i64,
    pub event: EventKind,
    /// Game label for `start_game`, ping text for `ping`.
    pub note: String,
    pub timestamp: DateTime<Utc>,
}

impl MeasurementEvent {
    pub fn new(player_id: i64, device_id: i64, event: EventKind, note: impl Into<String>) -> Self {
        Self {
            id: None,
            player_id,
            device_id,
            event,
            note: note.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PingEvent {
    pub timestamp: DateTime<Utc>,
    pub note: String,
}
