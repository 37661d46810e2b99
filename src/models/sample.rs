use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::device::gsr::adc_to_conductance;

/// One device reading. `gsr` is the derived skin conductance (µS).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub gsr_raw: u16,
    pub gsr: f64,
    pub ppg_raw: u16,
}

impl Sample {
    pub fn from_raw(timestamp: DateTime<Utc>, gsr_raw: u16, ppg_raw: u16) -> Self {
        Self {
            timestamp,
            gsr_raw,
            gsr: adc_to_conductance(gsr_raw),
            ppg_raw,
        }
    }
}
