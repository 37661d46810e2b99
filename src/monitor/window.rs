use chrono::{DateTime, Utc};

use crate::{
    models::{Annotation, Sample},
    settings::DEFAULT_WINDOW_CAPACITY,
};

/// Most recent samples for the live chart, ordered by timestamp with no two
/// samples sharing a timestamp.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    capacity: usize,
    samples: Vec<Sample>,
}

impl Default for RollingWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_CAPACITY)
    }
}

impl RollingWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            samples: Vec::with_capacity(capacity + 1),
        }
    }

    pub fn append(&mut self, sample: Sample) {
        match self
            .samples
            .binary_search_by(|probe| probe.timestamp.cmp(&sample.timestamp))
        {
            Ok(_) => return,
            Err(index) => self.samples.insert(index, sample),
        }

        if self.samples.len() > self.capacity {
            let excess = self.samples.len() - self.capacity;
            self.samples.drain(..excess);
        }
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn min_timestamp(&self) -> Option<DateTime<Utc>> {
        self.samples.first().map(|sample| sample.timestamp)
    }

    pub fn latest(&self) -> Option<&Sample> {
        self.samples.last()
    }

    /// Annotations at or after the oldest sample still in the window. An empty
    /// window shows nothing.
    pub fn visible_annotations(&self, annotations: &[Annotation]) -> Vec<Annotation> {
        let Some(min) = self.min_timestamp() else {
            return Vec::new();
        };
        annotations
            .iter()
            .filter(|annotation| annotation.timestamp >= min)
            .cloned()
            .collect()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(index: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 11, 14, 51, 19).unwrap() + Duration::milliseconds(10 * index)
    }

    fn sample(index: i64) -> Sample {
        Sample::from_raw(t(index), 1000 + index as u16, 2048)
    }

    fn note(index: i64, text: &str) -> Annotation {
        Annotation {
            timestamp: t(index),
            text: text.into(),
            y_value: 1.0,
        }
    }

    #[test]
    fn never_exceeds_capacity_and_stays_sorted() {
        let mut window = RollingWindow::default();
        // Out-of-order arrivals with repeats.
        let order = [5, 3, 9, 1, 7, 3, 60, 2, 45, 44, 100, 8, 59, 61, 0, 99];
        for round in 0..10 {
            for index in order {
                window.append(sample(index + round * 7));
                assert!(window.len() <= 40);
                assert!(window
                    .samples()
                    .windows(2)
                    .all(|pair| pair[0].timestamp < pair[1].timestamp));
            }
        }
    }

    #[test]
    fn duplicate_timestamp_is_ignored() {
        let mut window = RollingWindow::new(40);
        window.append(sample(1));
        window.append(sample(2));
        window.append(Sample::from_raw(t(2), 4000, 1));
        assert_eq!(window.len(), 2);
        assert_eq!(window.latest().map(|s| s.gsr_raw), Some(1002));
    }

    #[test]
    fn keeps_most_recent_forty() {
        let mut window = RollingWindow::new(40);
        for index in 0..50 {
            window.append(sample(index));
        }
        assert_eq!(window.len(), 40);
        assert_eq!(window.min_timestamp(), Some(t(10)));
        assert_eq!(window.latest().map(|s| s.timestamp), Some(t(49)));
    }

    #[test]
    fn stale_arrival_in_full_window_is_evicted_immediately() {
        let mut window = RollingWindow::new(3);
        for index in 10..13 {
            window.append(sample(index));
        }
        window.append(sample(1));
        assert_eq!(window.min_timestamp(), Some(t(10)));
        assert_eq!(window.len(), 3);
    }

    #[test]
    fn visible_annotations_use_inclusive_lower_bound() {
        let mut window = RollingWindow::new(40);
        for index in 100..120 {
            window.append(sample(index));
        }
        let log = vec![note(99, "stale"), note(100, "edge"), note(110, "inside")];

        let visible = window.visible_annotations(&log);
        let texts: Vec<&str> = visible.iter().map(|a| a.text.as_str()).collect();
        assert_eq!(texts, vec!["edge", "inside"]);
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn empty_window_shows_no_annotations() {
        let window = RollingWindow::new(40);
        assert!(window.visible_annotations(&[note(0, "early")]).is_empty());
    }
}
