//! Outbound events for whatever renders the dashboard.
//!
//! The controller and the refresh loop never talk to a UI directly; they emit
//! named JSON payloads (`live-chart`, `notice`, `command-result`, ...) through
//! an [`EventSink`].

use std::io::Write;

use chrono::Utc;
use log::error;
use serde::Serialize;
use serde_json::{json, Value};

pub const LIVE_CHART_EVENT: &str = "live-chart";
pub const NOTICE_EVENT: &str = "notice";
pub const SESSION_STATE_EVENT: &str = "session-state-changed";

pub trait EventSink: Send + Sync {
    fn emit(&self, event: &str, payload: Value);
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize)]
struct Notice<'a> {
    level: NoticeLevel,
    message: &'a str,
}

pub fn emit_notice(sink: &dyn EventSink, level: NoticeLevel, message: &str) {
    sink.emit(NOTICE_EVENT, json!(Notice { level, message }));
}

/// Serialize `payload` and emit it; serialization failures are logged and dropped.
pub fn emit_serialized<T: Serialize>(sink: &dyn EventSink, event: &str, payload: &T) {
    match serde_json::to_value(payload) {
        Ok(value) => sink.emit(event, value),
        Err(err) => error!("Failed to serialize {event} payload: {err}"),
    }
}

/// Writes one JSON object per line to stdout.
pub struct StdoutSink;

impl EventSink for StdoutSink {
    fn emit(&self, event: &str, payload: Value) {
        let line = json!({
            "event": event,
            "at": Utc::now().to_rfc3339(),
            "payload": payload,
        });

        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        if let Err(err) = writeln!(handle, "{line}").and_then(|_| handle.flush()) {
            error!("Failed to write {event} event: {err}");
        }
    }
}
