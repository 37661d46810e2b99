//! Domain errors surfaced to the operator.
//!
//! Infrastructure code (SQLite, threads, files) keeps using `anyhow`; these
//! variants are the ones the session workflow and the historical view need to
//! tell apart.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MonitorError {
    #[error("device unavailable on {port}: {reason}")]
    DeviceUnavailable { port: String, reason: String },

    #[error("no player selected")]
    PlayerNotSelected,

    #[error("no active session")]
    NoActiveSession,

    #[error("no sample received yet")]
    NoSampleYet,

    #[error("failed to record {event} event: {reason}")]
    PersistenceWriteFailed { event: String, reason: String },

    #[error("insufficient peaks for HRV: detected {found}, need at least 2")]
    InsufficientPeaks { found: usize },
}

impl MonitorError {
    pub fn persistence(event: impl Into<String>, err: &anyhow::Error) -> Self {
        MonitorError::PersistenceWriteFailed {
            event: event.into(),
            reason: format!("{err:#}"),
        }
    }
}
