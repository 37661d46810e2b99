use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Sample;

/// Operator ping pinned to a sample on the GSR chart.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Annotation {
    pub timestamp: DateTime<Utc>,
    pub text: String,
    pub y_value: f64,
}

impl Annotation {
    pub fn anchored_to(sample: &Sample, text: impl Into<String>) -> Self {
        Self {
            timestamp: sample.timestamp,
            text: text.into(),
            y_value: sample.gsr,
        }
    }
}
