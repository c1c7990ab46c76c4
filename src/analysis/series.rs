// SPDX-License-Identifier: Apache-2.0

//! Per-entity metric series
//!
//! Ordered time/value points with derived statistics. Statistics are
//! computed fresh on every call; the series never caches a stale mean.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Time-ordered observations of one metric for one entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityMetricSeries {
    entity: String,
    points: Vec<(DateTime<Utc>, f64)>,
}

impl EntityMetricSeries {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            points: Vec::new(),
        }
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Adds a point, keeping the series time-ordered regardless of
    /// insertion order.
    pub fn push(&mut self, at: DateTime<Utc>, value: f64) {
        let pos = self.points.partition_point(|(t, _)| *t <= at);
        self.points.insert(pos, (at, value));
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.points.iter().map(|(_, v)| *v)
    }

    pub fn mean(&self) -> Option<f64> {
        if self.points.is_empty() {
            return None;
        }
        Some(self.values().sum::<f64>() / self.points.len() as f64)
    }

    /// Sample standard deviation. Needs at least two points.
    pub fn stddev(&self) -> Option<f64> {
        let n = self.points.len();
        if n < 2 {
            return None;
        }
        let mean = self.mean()?;
        let variance =
            self.values().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
        Some(variance.sqrt())
    }

    pub fn p50(&self) -> Option<f64> {
        self.percentile(50.0)
    }

    pub fn p95(&self) -> Option<f64> {
        self.percentile(95.0)
    }

    /// Nearest-rank percentile over the value distribution.
    pub fn percentile(&self, pct: f64) -> Option<f64> {
        if self.points.is_empty() {
            return None;
        }
        let mut sorted: Vec<f64> = self.values().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
        Some(sorted[rank.clamp(1, sorted.len()) - 1])
    }

    /// z-score of a candidate value against this baseline.
    ///
    /// `None` when the baseline has no spread: a flat history cannot rank a
    /// deviation, and pretending otherwise would flag every sample.
    pub fn z_score(&self, value: f64) -> Option<f64> {
        let stddev = self.stddev()?;
        if stddev == 0.0 {
            return None;
        }
        Some((value - self.mean()?) / stddev)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn points_stay_time_ordered() {
        let mut series = EntityMetricSeries::new("alice");
        series.push(at(10), 2.0);
        series.push(at(8), 1.0);
        series.push(at(9), 3.0);
        let values: Vec<f64> = series.values().collect();
        assert_eq!(values, vec![1.0, 3.0, 2.0]);
    }

    #[test]
    fn statistics_match_hand_computation() {
        let mut series = EntityMetricSeries::new("alice");
        for (i, v) in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0].iter().enumerate() {
            series.push(at(i as u32), *v);
        }
        assert_eq!(series.mean(), Some(5.0));
        let stddev = series.stddev().unwrap();
        assert!((stddev - 2.138).abs() < 0.001);
        assert_eq!(series.p50(), Some(4.0));
        assert_eq!(series.p95(), Some(9.0));
    }

    #[test]
    fn z_score_is_none_for_flat_baseline() {
        let mut series = EntityMetricSeries::new("alice");
        for i in 0..5 {
            series.push(at(i), 10.0);
        }
        assert_eq!(series.z_score(100.0), None);
    }

    #[test]
    fn z_score_measures_deviation() {
        let mut series = EntityMetricSeries::new("alice");
        for (i, v) in [8.0, 10.0, 12.0, 10.0, 10.0].iter().enumerate() {
            series.push(at(i as u32), *v);
        }
        let z = series.z_score(10.0).unwrap();
        assert!(z.abs() < f64::EPSILON);
        assert!(series.z_score(20.0).unwrap() > 3.0);
    }
}
