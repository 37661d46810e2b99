//! Declarative chart descriptions for the renderer. Pure functions of their
//! inputs; recomputed on every refresh tick.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Annotation, Sample};

pub const GSR_SERIES: &str = "gsr";
pub const GSR_RAW_SERIES: &str = "gsr_raw";
pub const PPG_RAW_SERIES: &str = "ppg_raw";
pub const HISTORY_TITLE: &str = "GSR (galvanic skin response)";
const MARKER_SYMBOL: &str = "arrow-down";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ChartPoint {
    pub x: DateTime<Utc>,
    pub y: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LineSeries {
    pub name: String,
    pub points: Vec<ChartPoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChartMarker {
    pub x: DateTime<Utc>,
    pub y: f64,
    pub symbol: String,
    pub tooltip: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChartSpec {
    pub title: Option<String>,
    pub x_title: String,
    pub y_title: String,
    pub series: Vec<LineSeries>,
    pub markers: Vec<ChartMarker>,
    /// Pan/zoom bound to the scales.
    pub interactive: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ChartOptions {
    pub include_raw_channels: bool,
}

fn series(name: &str, samples: &[Sample], value: impl Fn(&Sample) -> f64) -> LineSeries {
    LineSeries {
        name: name.to_string(),
        points: samples
            .iter()
            .map(|sample| ChartPoint {
                x: sample.timestamp,
                y: value(sample),
            })
            .collect(),
    }
}

fn markers(annotations: &[Annotation]) -> Vec<ChartMarker> {
    annotations
        .iter()
        .map(|annotation| ChartMarker {
            x: annotation.timestamp,
            y: annotation.y_value,
            symbol: MARKER_SYMBOL.to_string(),
            tooltip: annotation.text.clone(),
        })
        .collect()
}

/// Rolling-window chart: derived GSR over time with a marker per visible ping.
pub fn render_live_chart(
    samples: &[Sample],
    annotations: &[Annotation],
    options: ChartOptions,
) -> ChartSpec {
    let mut lines = vec![series(GSR_SERIES, samples, |s| s.gsr)];
    if options.include_raw_channels {
        lines.push(series(GSR_RAW_SERIES, samples, |s| f64::from(s.gsr_raw)));
        lines.push(series(PPG_RAW_SERIES, samples, |s| f64::from(s.ppg_raw)));
    }

    ChartSpec {
        title: None,
        x_title: "Datetime".into(),
        y_title: "value".into(),
        series: lines,
        markers: markers(annotations),
        interactive: true,
    }
}

/// Whole-session chart for the historical view.
pub fn render_history_chart(samples: &[Sample], annotations: &[Annotation]) -> ChartSpec {
    ChartSpec {
        title: Some(HISTORY_TITLE.into()),
        x_title: "datetime".into(),
        y_title: "gsr".into(),
        series: vec![series(GSR_SERIES, samples, |s| s.gsr)],
        markers: markers(annotations),
        interactive: true,
    }
}
