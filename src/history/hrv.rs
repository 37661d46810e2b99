//! Heart-rate variability from the PPG channel.
//!
//! Systolic peaks are found with two moving averages over the squared,
//! detrended pulse wave: a short one spanning a systolic peak and a longer
//! one spanning a beat. Wherever the short average rises above the long one
//! (plus a small offset) we have a block of interest, and the tallest sample
//! in each wide-enough block is a beat.

use serde::Serialize;

use crate::{error::MonitorError, models::Sample};

const DETREND_WINDOW_SEC: f64 = 1.0;
const PEAK_WINDOW_SEC: f64 = 0.111;
const BEAT_WINDOW_SEC: f64 = 0.667;
const OFFSET_FACTOR: f64 = 0.02;
const REFRACTORY_SEC: f64 = 0.3;

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HrvSummary {
    pub mean_nn_ms: f64,
    pub min_nn_ms: f64,
    pub max_nn_ms: f64,
    pub heart_rate_bpm: f64,
    pub peak_count: usize,
}

pub fn compute_hrv(samples: &[Sample], sampling_rate_hz: f64) -> Result<HrvSummary, MonitorError> {
    let rate = sampling_rate_hz.max(1.0);
    let signal: Vec<f64> = samples.iter().map(|s| f64::from(s.ppg_raw)).collect();
    let peaks = detect_peaks(&signal, rate);

    if peaks.len() < 2 {
        return Err(MonitorError::InsufficientPeaks { found: peaks.len() });
    }

    let intervals: Vec<f64> = peaks
        .windows(2)
        .map(|pair| (pair[1] - pair[0]) as f64 / rate * 1000.0)
        .collect();

    let mean_nn_ms = intervals.iter().sum::<f64>() / intervals.len() as f64;
    let min_nn_ms = intervals.iter().copied().fold(f64::INFINITY, f64::min);
    let max_nn_ms = intervals.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    Ok(HrvSummary {
        mean_nn_ms,
        min_nn_ms,
        max_nn_ms,
        heart_rate_bpm: 60_000.0 / mean_nn_ms,
        peak_count: peaks.len(),
    })
}

/// Indices of systolic peaks in `signal`.
pub fn detect_peaks(signal: &[f64], rate: f64) -> Vec<usize> {
    if signal.is_empty() {
        return Vec::new();
    }

    let trend = moving_average(signal, window_len(DETREND_WINDOW_SEC, rate));
    let clipped: Vec<f64> = signal
        .iter()
        .zip(&trend)
        .map(|(value, baseline)| (value - baseline).max(0.0))
        .collect();
    let squared: Vec<f64> = clipped.iter().map(|v| v * v).collect();

    let peak_window = window_len(PEAK_WINDOW_SEC, rate);
    let ma_peak = moving_average(&squared, peak_window);
    let ma_beat = moving_average(&squared, window_len(BEAT_WINDOW_SEC, rate));
    let offset = OFFSET_FACTOR * squared.iter().sum::<f64>() / squared.len() as f64;

    let refractory = (REFRACTORY_SEC * rate).round() as usize;
    let mut peaks: Vec<usize> = Vec::new();
    let mut accept = |block: std::ops::Range<usize>| {
        if block.len() < peak_window {
            return;
        }
        let Some(peak) = block.max_by(|&a, &b| clipped[a].total_cmp(&clipped[b])) else {
            return;
        };
        match peaks.last() {
            Some(&last) if peak - last < refractory => {}
            _ => peaks.push(peak),
        }
    };

    let mut block_start = None;
    for i in 0..squared.len() {
        let inside = ma_peak[i] > ma_beat[i] + offset;
        match (inside, block_start) {
            (true, None) => block_start = Some(i),
            (false, Some(start)) => {
                accept(start..i);
                block_start = None;
            }
            _ => {}
        }
    }
    if let Some(start) = block_start {
        accept(start..squared.len());
    }

    peaks
}

fn window_len(seconds: f64, rate: f64) -> usize {
    ((seconds * rate).round() as usize).max(1)
}

/// Centered moving average; the window shrinks at the edges.
fn moving_average(values: &[f64], window: usize) -> Vec<f64> {
    let mut prefix = Vec::with_capacity(values.len() + 1);
    prefix.push(0.0);
    for value in values {
        let last = prefix[prefix.len() - 1];
        prefix.push(last + value);
    }

    let half = window / 2;
    (0..values.len())
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + window - half).min(values.len());
            (prefix[hi] - prefix[lo]) / (hi - lo) as f64
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use std::f64::consts::PI;

    fn pulse(freq_hz: f64, seconds: f64, rate: f64) -> Vec<Sample> {
        let origin = Utc.with_ymd_and_hms(2024, 7, 11, 14, 0, 0).unwrap();
        let n = (seconds * rate) as usize;
        (0..n)
            .map(|i| {
                let t = i as f64 / rate;
                let ppg = 2048.0 + 400.0 * (2.0 * PI * freq_hz * t).sin();
                Sample::from_raw(
                    origin + Duration::microseconds((t * 1e6) as i64),
                    1500,
                    ppg.round() as u16,
                )
            })
            .collect()
    }

    #[test]
    fn steady_pulse_gives_expected_heart_rate() {
        let summary = compute_hrv(&pulse(1.2, 10.0, 100.0), 100.0).expect("hrv");

        assert!((10..=13).contains(&summary.peak_count), "{summary:?}");
        assert!(
            (780.0..=890.0).contains(&summary.mean_nn_ms),
            "{summary:?}"
        );
        assert!((67.0..=77.0).contains(&summary.heart_rate_bpm), "{summary:?}");
        assert!(summary.min_nn_ms <= summary.mean_nn_ms);
        assert!(summary.max_nn_ms >= summary.mean_nn_ms);
    }

    #[test]
    fn flat_signal_has_no_peaks() {
        let origin = Utc::now();
        let flat: Vec<Sample> = (0..500)
            .map(|i| Sample::from_raw(origin + Duration::milliseconds(10 * i), 1500, 2048))
            .collect();

        assert_eq!(
            compute_hrv(&flat, 100.0),
            Err(MonitorError::InsufficientPeaks { found: 0 })
        );
    }

    #[test]
    fn empty_input_has_no_peaks() {
        assert_eq!(
            compute_hrv(&[], 100.0),
            Err(MonitorError::InsufficientPeaks { found: 0 })
        );
    }

    #[test]
    fn a_single_beat_is_not_enough() {
        // Under one second covers only a single crest at 1.2 Hz.
        let result = compute_hrv(&pulse(1.2, 0.6, 100.0), 100.0);
        assert!(matches!(
            result,
            Err(MonitorError::InsufficientPeaks { found }) if found < 2
        ));
    }

    #[test]
    fn moving_average_shrinks_at_edges() {
        let averaged = moving_average(&[0.0, 3.0, 6.0, 9.0], 3);
        assert_eq!(averaged, vec![1.5, 3.0, 6.0, 7.5]);
    }
}
