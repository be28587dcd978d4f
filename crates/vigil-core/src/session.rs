use std::sync::{Mutex, PoisonError};

use crate::aggregate::Aggregator;
use crate::error::Error;
use crate::types::{AggregateResult, Embedding};

/// One user's verification session.
///
/// The owner and baseline are fixed at construction. Distances are guarded
/// by a per-session lock so concurrent frames for the same session never
/// lose updates, without touching the cache-wide lock.
#[derive(Debug)]
pub struct Session {
    id: String,
    user_id: String,
    baseline: Embedding,
    distances: Mutex<Aggregator>,
}

impl Session {
    /// Build a session around a validated baseline snapshot.
    pub fn new(id: impl Into<String>, user_id: impl Into<String>, baseline: Embedding) -> Result<Self, Error> {
        baseline.validate()?;
        Ok(Self {
            id: id.into(),
            user_id: user_id.into(),
            baseline,
            distances: Mutex::new(Aggregator::new()),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn baseline(&self) -> &Embedding {
        &self.baseline
    }

    /// Record the distance observed at `timestamp`, replacing any earlier
    /// value for the same timestamp.
    pub fn record(&self, timestamp: i64, distance: f64) {
        self.distances
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(timestamp, distance);
    }

    pub fn sample_count(&self) -> usize {
        self.distances
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Aggregate statistics over everything recorded so far.
    pub fn result(&self) -> Result<AggregateResult, Error> {
        let stats = self
            .distances
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .compute()?;
        Ok(AggregateResult {
            session_id: Some(self.id.clone()),
            user_id: self.user_id.clone(),
            pct_present: stats.pct_present,
            avg_distance: stats.avg_distance,
            std_distance: stats.std_distance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_rejects_invalid_baseline() {
        let err = Session::new("s", "u", Embedding::new(vec![])).unwrap_err();
        assert!(matches!(err, Error::InvalidEmbedding(_)));
    }

    #[test]
    fn test_result_before_any_frame() {
        let s = Session::new("s", "u", Embedding::new(vec![1.0])).unwrap();
        assert_eq!(s.result(), Err(Error::EmptyAggregate));
    }

    #[test]
    fn test_result_carries_identity() {
        let s = Session::new("s1", "u7", Embedding::new(vec![1.0])).unwrap();
        s.record(100, 0.0);
        s.record(200, 0.2);
        s.record(300, 0.4);
        let r = s.result().unwrap();
        assert_eq!(r.session_id.as_deref(), Some("s1"));
        assert_eq!(r.user_id, "u7");
        assert!((r.avg_distance - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_concurrent_records_not_lost() {
        let s = Arc::new(Session::new("s", "u", Embedding::new(vec![1.0])).unwrap());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let s = Arc::clone(&s);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        s.record(t * 1000 + i, 0.1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(s.sample_count(), 800);
    }
}
