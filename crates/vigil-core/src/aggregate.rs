//! Timestamped distance samples and the presence statistics derived from them.

use std::collections::HashMap;

use crate::error::Error;

/// A frame counts as "present" when its distance is at or below this value.
pub const PRESENCE_THRESHOLD: f64 = 0.3;

/// Summary statistics over every recorded distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stats {
    /// Fraction of samples with distance ≤ [`PRESENCE_THRESHOLD`], in [0, 1].
    pub pct_present: f64,
    pub avg_distance: f64,
    /// Population standard deviation (divides by N).
    pub std_distance: f64,
}

/// Insertion-ordered map from timestamp to distance.
///
/// Re-recording an existing timestamp replaces its distance in place and
/// keeps its original position.
#[derive(Debug, Default, Clone)]
pub struct Aggregator {
    samples: Vec<(i64, f64)>,
    index: HashMap<i64, usize>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the distance for `timestamp`.
    pub fn record(&mut self, timestamp: i64, distance: f64) {
        match self.index.get(&timestamp) {
            Some(&pos) => self.samples[pos].1 = distance,
            None => {
                self.index.insert(timestamp, self.samples.len());
                self.samples.push((timestamp, distance));
            }
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Samples in the order their timestamps were first recorded.
    pub fn samples(&self) -> &[(i64, f64)] {
        &self.samples
    }

    /// Compute presence and distance statistics.
    ///
    /// Fails with [`Error::EmptyAggregate`] when nothing has been recorded.
    pub fn compute(&self) -> Result<Stats, Error> {
        if self.samples.is_empty() {
            return Err(Error::EmptyAggregate);
        }

        let n = self.samples.len() as f64;
        let present = self
            .samples
            .iter()
            .filter(|(_, d)| *d <= PRESENCE_THRESHOLD)
            .count();
        let mean = self.samples.iter().map(|(_, d)| d).sum::<f64>() / n;
        let variance = self
            .samples
            .iter()
            .map(|(_, d)| (d - mean).powi(2))
            .sum::<f64>()
            / n;

        Ok(Stats {
            pct_present: present as f64 / n,
            avg_distance: mean,
            std_distance: variance.sqrt(),
        })
    }
}
