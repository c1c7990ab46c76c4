// SPDX-License-Identifier: Apache-2.0

//! Aggregation & Anomaly Engine
//!
//! Statistical detectors over hourly per-entity access aggregates. Each
//! entity is compared against its own history only; there is no cross-entity
//! baseline. Entities with too little history are skipped, never flagged.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analysis::series::EntityMetricSeries;
use crate::config::{LensConfig, Sensitivity};

/// One hourly access aggregate for one entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessSample {
    pub entity: String,
    pub at: DateTime<Utc>,
    pub query_count: u64,
    pub rows_read: u64,
    pub distinct_databases: u32,
    pub objects: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    UnusualHours,
    VolumeOutlier,
    ScopeExpansion,
    NewObjectAccess,
}

/// Finding severity. Ordered so `High > Medium > Low`.
///
/// `Low` is reserved for wire compatibility with downstream consumers; the
/// built-in graders only ever emit `Medium` and `High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyFinding {
    pub entity: String,
    pub kind: AnomalyKind,
    pub severity: Severity,
    pub at: DateTime<Utc>,
    /// The value that tripped the detector: rows read, distinct databases,
    /// the novel-object count, or for the hour detector the signed circular
    /// offset from the entity's usual hour.
    pub observed: f64,
    pub baseline_mean: Option<f64>,
    pub baseline_stddev: Option<f64>,
    pub z_score: Option<f64>,
    pub detail: String,
}

/// Deterministic detector output: findings sorted severity-descending,
/// then entity ascending.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyReport {
    pub sensitivity: Sensitivity,
    pub findings: Vec<AnomalyFinding>,
    /// Entities with fewer than the minimum observations, listed so the
    /// caller knows they were not cleared, only unjudged.
    pub skipped_entities: Vec<String>,
}

/// Runs the four detectors over baseline + evaluation samples.
pub struct AnomalyEngine {
    thresholds: crate::config::SensitivityThresholds,
    extreme_z: f64,
    min_observations: usize,
    novelty_high_count: usize,
}

impl AnomalyEngine {
    pub fn new(config: &LensConfig) -> Self {
        Self {
            thresholds: config.sensitivity_thresholds.clone(),
            extreme_z: config.extreme_z,
            min_observations: config.min_observations,
            novelty_high_count: config.novelty_high_count,
        }
    }

    /// Evaluates `window` samples against per-entity baselines built from
    /// `baseline` samples. `baseline_objects` is the long-window object set
    /// per entity used by the novelty detector.
    pub fn detect(
        &self,
        baseline: &[AccessSample],
        window: &[AccessSample],
        baseline_objects: &HashMap<String, HashSet<String>>,
        sensitivity: Sensitivity,
    ) -> AnomalyReport {
        let threshold = self.thresholds.threshold(sensitivity);

        let mut hour_points: HashMap<&str, Vec<(DateTime<Utc>, f64)>> = HashMap::new();
        let mut volumes: HashMap<&str, EntityMetricSeries> = HashMap::new();
        let mut scopes: HashMap<&str, EntityMetricSeries> = HashMap::new();
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for sample in baseline {
            let entity = sample.entity.as_str();
            *counts.entry(entity).or_default() += 1;
            hour_points
                .entry(entity)
                .or_default()
                .push((sample.at, f64::from(sample.at.hour())));
            volumes
                .entry(entity)
                .or_insert_with(|| EntityMetricSeries::new(entity))
                .push(sample.at, sample.rows_read as f64);
            scopes
                .entry(entity)
                .or_insert_with(|| EntityMetricSeries::new(entity))
                .push(sample.at, f64::from(sample.distinct_databases));
        }

        // Hours live on a 24h circle: center each baseline on its circular
        // mean so a 23:00-01:00 shift does not average out to noon.
        let hours: HashMap<&str, (f64, EntityMetricSeries)> = hour_points
            .into_iter()
            .map(|(entity, points)| {
                let center = circular_mean_hour(points.iter().map(|(_, hour)| *hour));
                let mut series = EntityMetricSeries::new(entity);
                for (at, hour) in points {
                    series.push(at, hour_offset(hour, center));
                }
                (entity, (center, series))
            })
            .collect();

        let mut findings = Vec::new();
        let mut skipped: HashSet<String> = HashSet::new();
        let mut novel: HashMap<&str, (HashSet<&str>, DateTime<Utc>)> = HashMap::new();

        for sample in window {
            let entity = sample.entity.as_str();
            if counts.get(entity).copied().unwrap_or(0) < self.min_observations {
                skipped.insert(sample.entity.clone());
                continue;
            }

            if let Some((center, series)) = hours.get(entity) {
                let offset = hour_offset(f64::from(sample.at.hour()), *center);
                if let Some(finding) = self.judge(
                    series,
                    offset,
                    threshold,
                    sample,
                    AnomalyKind::UnusualHours,
                    format!(
                        "activity at hour {:02}, {:.1}h from the usual hour",
                        sample.at.hour(),
                        offset.abs()
                    ),
                ) {
                    findings.push(finding);
                }
            }

            if let Some(series) = volumes.get(entity) {
                if let Some(finding) = self.judge(
                    series,
                    sample.rows_read as f64,
                    threshold,
                    sample,
                    AnomalyKind::VolumeOutlier,
                    format!("{} rows read", sample.rows_read),
                ) {
                    findings.push(finding);
                }
            }

            if let Some(series) = scopes.get(entity) {
                if let Some(finding) = self.judge(
                    series,
                    f64::from(sample.distinct_databases),
                    threshold,
                    sample,
                    AnomalyKind::ScopeExpansion,
                    format!("{} distinct databases", sample.distinct_databases),
                ) {
                    findings.push(finding);
                }
            }

            if let Some(known) = baseline_objects.get(entity) {
                let entry = novel.entry(entity).or_insert_with(|| (HashSet::new(), sample.at));
                for object in &sample.objects {
                    if !known.contains(object) {
                        entry.0.insert(object.as_str());
                        entry.1 = entry.1.max(sample.at);
                    }
                }
            }
        }

        for (entity, (objects, last_seen)) in &novel {
            if objects.is_empty() {
                continue;
            }
            let severity = if objects.len() >= self.novelty_high_count {
                Severity::High
            } else {
                Severity::Medium
            };
            let mut names: Vec<&str> = objects.iter().copied().collect();
            names.sort_unstable();
            findings.push(AnomalyFinding {
                entity: (*entity).to_string(),
                kind: AnomalyKind::NewObjectAccess,
                severity,
                at: *last_seen,
                observed: names.len() as f64,
                baseline_mean: None,
                baseline_stddev: None,
                z_score: None,
                detail: format!("{} objects never seen in baseline: {}", names.len(), names.join(", ")),
            });
        }

        findings.sort_by(|a, b| {
            b.severity
                .cmp(&a.severity)
                .then_with(|| a.entity.cmp(&b.entity))
                .then_with(|| a.at.cmp(&b.at))
                .then_with(|| format!("{:?}", a.kind).cmp(&format!("{:?}", b.kind)))
        });

        let mut skipped_entities: Vec<String> = skipped.into_iter().collect();
        skipped_entities.sort_unstable();

        debug!(
            findings = findings.len(),
            skipped = skipped_entities.len(),
            "anomaly detection complete"
        );

        AnomalyReport {
            sensitivity,
            findings,
            skipped_entities,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn judge(
        &self,
        series: &EntityMetricSeries,
        observed: f64,
        threshold: f64,
        sample: &AccessSample,
        kind: AnomalyKind,
        detail: String,
    ) -> Option<AnomalyFinding> {
        let z = series.z_score(observed)?;
        let severity = self.grade(z, threshold)?;
        Some(AnomalyFinding {
            entity: sample.entity.clone(),
            kind,
            severity,
            at: sample.at,
            observed,
            baseline_mean: series.mean(),
            baseline_stddev: series.stddev(),
            z_score: Some(z),
            detail,
        })
    }

    /// Grades an absolute deviation.
    ///
    /// Extreme deviations are always high severity, whatever the active
    /// profile; this keeps grading monotone across sensitivity levels.
    fn grade(&self, z: f64, threshold: f64) -> Option<Severity> {
        let magnitude = z.abs();
        if magnitude >= 2.0 * threshold || magnitude >= self.extreme_z {
            Some(Severity::High)
        } else if magnitude >= threshold {
            Some(Severity::Medium)
        } else {
            None
        }
    }
}

/// Mean hour on the 24h circle.
fn circular_mean_hour(hours: impl Iterator<Item = f64>) -> f64 {
    let mut sin = 0.0;
    let mut cos = 0.0;
    for hour in hours {
        let angle = hour * std::f64::consts::TAU / 24.0;
        sin += angle.sin();
        cos += angle.cos();
    }
    let mean = sin.atan2(cos) * 24.0 / std::f64::consts::TAU;
    mean.rem_euclid(24.0)
}

/// Signed shortest distance from `hour` to `center` on the 24h circle,
/// in `(-12, 12]`.
fn hour_offset(hour: f64, center: f64) -> f64 {
    let mut offset = (hour - center).rem_euclid(24.0);
    if offset > 12.0 {
        offset -= 24.0;
    }
    offset
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap()
    }

    fn sample(entity: &str, day: u32, hour: u32, rows: u64, dbs: u32) -> AccessSample {
        AccessSample {
            entity: entity.to_string(),
            at: at(day, hour),
            query_count: 10,
            rows_read: rows,
            distinct_databases: dbs,
            objects: Vec::new(),
        }
    }

    fn engine() -> AnomalyEngine {
        AnomalyEngine::new(&LensConfig::default())
    }

    /// Steady daytime baseline: enough spread to rank deviations without
    /// flagging normal samples.
    fn baseline(entity: &str) -> Vec<AccessSample> {
        (1..=10)
            .map(|day| sample(entity, day, 9 + (day % 3), 1_000 + (day as u64 % 4) * 100, 1 + day % 2))
            .collect()
    }

    #[test]
    fn normal_sample_yields_no_findings() {
        let base = baseline("alice");
        let window = vec![sample("alice", 11, 10, 1_100, 1)];
        let report = engine().detect(&base, &window, &HashMap::new(), Sensitivity::Medium);
        assert!(report.findings.is_empty(), "{:?}", report.findings);
    }

    #[test]
    fn constant_history_yields_no_findings_at_any_sensitivity() {
        let base: Vec<AccessSample> = (1..=10).map(|d| sample("alice", d, 10, 500, 1)).collect();
        let window = vec![sample("alice", 11, 10, 500, 1)];
        let engine = engine();
        for sensitivity in [Sensitivity::Low, Sensitivity::Medium, Sensitivity::High] {
            let report = engine.detect(&base, &window, &HashMap::new(), sensitivity);
            assert!(report.findings.is_empty(), "{sensitivity:?}");
        }
    }

    #[test]
    fn volume_spike_is_flagged() {
        let base = baseline("alice");
        let window = vec![sample("alice", 11, 10, 1_000_000, 1)];
        let report = engine().detect(&base, &window, &HashMap::new(), Sensitivity::Medium);
        assert!(report
            .findings
            .iter()
            .any(|f| f.kind == AnomalyKind::VolumeOutlier && f.severity == Severity::High));
    }

    #[test]
    fn extreme_outlier_is_high_at_every_sensitivity() {
        let base = baseline("alice");
        // Baseline rows: mean 1150, stddev ~108, so 1600 lands at z ~4.2 —
        // below 2x the low-sensitivity threshold but past the extreme cutoff.
        let window = vec![sample("alice", 11, 10, 1_600, 1)];
        for sensitivity in [Sensitivity::Low, Sensitivity::Medium, Sensitivity::High] {
            let report = engine().detect(&base, &window, &HashMap::new(), sensitivity);
            assert_eq!(report.findings.len(), 1, "{sensitivity:?}");
            let volume = &report.findings[0];
            assert_eq!(volume.kind, AnomalyKind::VolumeOutlier);
            assert!(volume.z_score.unwrap() >= 4.0);
            assert_eq!(volume.severity, Severity::High, "{sensitivity:?}");
        }
    }

    #[test]
    fn higher_sensitivity_never_reports_fewer_findings() {
        let base = baseline("alice");
        // z ~1.8 and z ~2.5 respectively: the first only clears the high
        // profile, the second clears medium and high.
        let window = vec![
            sample("alice", 11, 10, 1_344, 1),
            sample("alice", 11, 11, 1_420, 1),
        ];
        let engine = engine();
        let low = engine
            .detect(&base, &window, &HashMap::new(), Sensitivity::Low)
            .findings
            .len();
        let medium = engine
            .detect(&base, &window, &HashMap::new(), Sensitivity::Medium)
            .findings
            .len();
        let high = engine
            .detect(&base, &window, &HashMap::new(), Sensitivity::High)
            .findings
            .len();
        assert!(low <= medium && medium <= high, "{low} {medium} {high}");
    }

    #[test]
    fn night_shift_baseline_centers_across_midnight() {
        // Active 23:00-01:00 every night. Midnight is in-envelope; noon is
        // the outlier, even though it sits nearer the arithmetic hour mean.
        let base: Vec<AccessSample> = (1..=9)
            .map(|day| sample("nightowl", day, [23, 0, 1][(day % 3) as usize], 1_000, 1))
            .collect();
        let engine = engine();

        let quiet = engine.detect(
            &base,
            &[sample("nightowl", 11, 0, 1_000, 1)],
            &HashMap::new(),
            Sensitivity::High,
        );
        assert!(
            !quiet.findings.iter().any(|f| f.kind == AnomalyKind::UnusualHours),
            "{:?}",
            quiet.findings
        );

        let noisy = engine.detect(
            &base,
            &[sample("nightowl", 11, 12, 1_000, 1)],
            &HashMap::new(),
            Sensitivity::Medium,
        );
        assert!(noisy
            .findings
            .iter()
            .any(|f| f.kind == AnomalyKind::UnusualHours && f.severity == Severity::High));
    }

    #[test]
    fn hour_offsets_wrap_around_midnight() {
        assert_eq!(hour_offset(23.0, 0.0), -1.0);
        assert_eq!(hour_offset(1.0, 23.0), 2.0);
        let midnight = circular_mean_hour([23.0, 0.0, 1.0].into_iter());
        assert!(hour_offset(midnight, 0.0).abs() < 1e-9, "{midnight}");
        assert!((circular_mean_hour([9.0, 10.0, 11.0].into_iter()) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn thin_history_is_skipped_not_flagged() {
        let base = vec![sample("bob", 1, 10, 100, 1), sample("bob", 2, 10, 120, 1)];
        let window = vec![sample("bob", 3, 3, 1_000_000, 9)];
        let report = engine().detect(&base, &window, &HashMap::new(), Sensitivity::High);
        assert!(report.findings.is_empty());
        assert_eq!(report.skipped_entities, vec!["bob".to_string()]);
    }

    #[test]
    fn novel_objects_graded_by_count() {
        let base = baseline("alice");
        let known: HashMap<String, HashSet<String>> = [(
            "alice".to_string(),
            ["DB.S.T1".to_string()].into_iter().collect(),
        )]
        .into_iter()
        .collect();

        let mut one_new = sample("alice", 11, 10, 1_100, 1);
        one_new.objects = vec!["DB.S.T1".to_string(), "DB.S.T2".to_string()];
        let report = engine().detect(&base, &[one_new], &known, Sensitivity::Medium);
        let finding = report
            .findings
            .iter()
            .find(|f| f.kind == AnomalyKind::NewObjectAccess)
            .unwrap();
        assert_eq!(finding.severity, Severity::Medium);

        let mut many_new = sample("alice", 11, 10, 1_100, 1);
        many_new.objects = (0..6).map(|i| format!("DB.S.NEW{i}")).collect();
        let report = engine().detect(&base, &[many_new], &known, Sensitivity::Medium);
        let finding = report
            .findings
            .iter()
            .find(|f| f.kind == AnomalyKind::NewObjectAccess)
            .unwrap();
        assert_eq!(finding.severity, Severity::High);
    }

    #[test]
    fn findings_sort_by_severity_then_entity() {
        let mut base = baseline("alice");
        base.extend(baseline("zed"));
        let window = vec![
            sample("zed", 11, 10, 1_000_000, 1),
            sample("alice", 11, 10, 1_600, 1),
        ];
        let report = engine().detect(&base, &window, &HashMap::new(), Sensitivity::High);
        assert!(report.findings.len() >= 2);
        for pair in report.findings.windows(2) {
            let ordered = pair[0].severity > pair[1].severity
                || (pair[0].severity == pair[1].severity && pair[0].entity <= pair[1].entity);
            assert!(ordered, "{pair:?}");
        }
    }
}
