//! Read-only views over completed sessions.

pub mod hrv;

use anyhow::Result;
use chrono::Utc;
use log::warn;
use serde::Serialize;

use crate::{
    chart::{render_history_chart, ChartSpec},
    db::{Database, PingEvent},
    error::MonitorError,
    models::{Annotation, Sample, Session},
};

pub use hrv::{compute_hrv, HrvSummary};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryView {
    pub session: Session,
    pub sample_count: usize,
    pub chart: ChartSpec,
    pub annotations: Vec<Annotation>,
    pub hrv: Option<HrvSummary>,
    /// Shown instead of the metrics when they could not be computed.
    pub warning: Option<String>,
}

pub async fn list_sessions(db: &Database) -> Result<Vec<Session>> {
    db.list_sessions().await
}

/// Sensor rows recorded by the session's device while it was running.
pub async fn fetch_samples(db: &Database, session: &Session) -> Result<Vec<Sample>> {
    let end = session.end_time.unwrap_or_else(Utc::now);
    db.fetch_samples(session.device_id, session.start_time, end)
        .await
}

/// Pins each ping to the sample closest in time. On a tie the earlier sample
/// wins. `samples` must be sorted by timestamp.
pub fn snap_pings(samples: &[Sample], pings: &[PingEvent]) -> Vec<Annotation> {
    if samples.is_empty() {
        return Vec::new();
    }

    pings
        .iter()
        .map(|ping| {
            let after = samples.partition_point(|s| s.timestamp < ping.timestamp);
            let nearest = match (after.checked_sub(1), samples.get(after)) {
                (Some(before), Some(next)) => {
                    let gap_before = ping.timestamp - samples[before].timestamp;
                    let gap_after = next.timestamp - ping.timestamp;
                    if gap_before <= gap_after {
                        &samples[before]
                    } else {
                        next
                    }
                }
                (Some(before), None) => &samples[before],
                (None, Some(next)) => next,
                (None, None) => &samples[0],
            };
            Annotation::anchored_to(nearest, ping.note.clone())
        })
        .collect()
}

pub async fn history_view(
    db: &Database,
    session: &Session,
    sampling_rate_hz: f64,
) -> Result<HistoryView> {
    let samples = fetch_samples(db, session).await?;
    let end = session.end_time.unwrap_or_else(Utc::now);
    let pings = db
        .list_ping_events(session.device_id, session.start_time, end)
        .await?;
    let annotations = snap_pings(&samples, &pings);

    let (hrv, warning) = match compute_hrv(&samples, sampling_rate_hz) {
        Ok(summary) => (Some(summary), None),
        Err(err @ MonitorError::InsufficientPeaks { .. }) => {
            warn!("Session {}: {err}", session.id);
            (None, Some(err.to_string()))
        }
        Err(err) => return Err(err.into()),
    };

    Ok(HistoryView {
        session: session.clone(),
        sample_count: samples.len(),
        chart: render_history_chart(&samples, &annotations),
        annotations,
        hrv,
        warning,
    })
}
