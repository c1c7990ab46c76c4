// SPDX-License-Identifier: Apache-2.0

//! AccountAnalyzer
//!
//! The facade collaborators talk to. Wires the safety gate, the executor
//! adapter, and the analysis engines together; every statement, whether
//! caller-written or template-rendered, flows through the same chokepoint.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{instrument, warn};

use crate::analysis::anomaly::{AccessSample, AnomalyEngine, AnomalyReport};
use crate::analysis::audit::{AuditDifferencer, AuditReport, PrivilegeAction, PrivilegeEvent};
use crate::analysis::auth::{
    build_profiles, method_transitions, AuthMethod, AuthObservation, AuthReport, LoginEvent,
};
use crate::catalog;
use crate::config::{LensConfig, Sensitivity};
use crate::engine::adapter::ExecutorAdapter;
use crate::engine::traits::DataSource;
use crate::engine::types::ResultSet;
use crate::error::{LensError, LensResult};
use crate::gate::classifier::StatementClassifier;
use crate::gate::limits::LimitInjector;
use crate::gate::templates::{QueryTemplate, TemplateLibrary};

/// Anomaly baselines look back this many evaluation windows.
const BASELINE_WINDOW_FACTOR: u32 = 4;
const MAX_BASELINE_DAYS: u32 = 3_650;

/// Read-only analytics facade over one account-usage store.
pub struct AccountAnalyzer {
    config: LensConfig,
    classifier: StatementClassifier,
    injector: LimitInjector,
    templates: TemplateLibrary,
    adapter: ExecutorAdapter,
    anomaly: AnomalyEngine,
    differencer: AuditDifferencer,
}

impl AccountAnalyzer {
    pub fn new(source: Arc<dyn DataSource>, config: LensConfig) -> Self {
        Self {
            classifier: StatementClassifier::new(&config),
            injector: LimitInjector::new(&config),
            templates: TemplateLibrary::new(&config),
            adapter: ExecutorAdapter::new(source, &config),
            anomaly: AnomalyEngine::new(&config),
            differencer: AuditDifferencer::new(&config),
            config,
        }
    }

    pub fn config(&self) -> &LensConfig {
        &self.config
    }

    /// Classifies, plans, and executes one caller-written statement.
    ///
    /// Results carry the worst-case staleness of the source views the
    /// statement touched.
    #[instrument(skip(self, raw))]
    pub async fn run_statement(
        &self,
        raw: &str,
        rows: Option<u32>,
        timeout_secs: Option<u32>,
    ) -> LensResult<ResultSet> {
        let verdict = self.classifier.classify(raw);
        if let Some(reason) = verdict.reason.clone() {
            return Err(LensError::rejected(reason));
        }
        let plan = self.injector.build_plan(&verdict, rows, timeout_secs)?;
        let mut result = self.adapter.execute(&plan).await?;
        result.staleness_minutes = catalog::max_staleness_minutes(&verdict.normalized);
        Ok(result)
    }

    /// Renders a vetted template and executes it.
    #[instrument(skip(self, template))]
    pub async fn run_template(&self, template: &QueryTemplate) -> LensResult<ResultSet> {
        let verdict = self.templates.build(template)?;
        let plan = self.injector.build_plan(&verdict, None, None)?;
        let mut result = self.adapter.execute(&plan).await?;
        result.staleness_minutes = catalog::max_staleness_minutes(&verdict.normalized);
        Ok(result)
    }

    /// Executes an analysis feed at the hard row ceiling.
    ///
    /// Feed statements are ordered ascending by time, so the default row
    /// limit would make the source drop the newest rows, which are exactly
    /// the evaluation window the analyses judge. A feed that fills the
    /// ceiling is marked truncated: the analysis ran on partial data.
    async fn run_feed(&self, template: &QueryTemplate) -> LensResult<ResultSet> {
        let verdict = self.templates.build(template)?;
        let plan = self
            .injector
            .build_plan(&verdict, Some(self.config.max_rows), None)?;
        let mut result = self.adapter.execute(&plan).await?;
        if result.rows.len() as u32 >= plan.row_limit {
            warn!(
                rows = result.rows.len(),
                row_limit = plan.row_limit,
                "analysis feed filled its row ceiling; window may be incomplete"
            );
            result.truncated = true;
        }
        result.staleness_minutes = catalog::max_staleness_minutes(&verdict.normalized);
        Ok(result)
    }

    // --- performance / cost / monitoring passthroughs -----------------

    pub async fn slow_queries(&self, hours_back: u32, limit: u32) -> LensResult<ResultSet> {
        self.run_template(&QueryTemplate::SlowQueries { hours_back, limit })
            .await
    }

    pub async fn query_patterns(&self, hours_back: u32, limit: u32) -> LensResult<ResultSet> {
        self.run_template(&QueryTemplate::QueryPatterns { hours_back, limit })
            .await
    }

    pub async fn execution_time_distribution(&self, days_back: u32) -> LensResult<ResultSet> {
        self.run_template(&QueryTemplate::ExecutionTimeDistribution { days_back })
            .await
    }

    pub async fn warehouse_costs(&self, days_back: u32) -> LensResult<ResultSet> {
        self.run_template(&QueryTemplate::WarehouseCreditUsage { days_back })
            .await
    }

    pub async fn cost_per_query(&self, days_back: u32) -> LensResult<ResultSet> {
        self.run_template(&QueryTemplate::CostPerQuery { days_back })
            .await
    }

    pub async fn expensive_queries(&self, days_back: u32, limit: u32) -> LensResult<ResultSet> {
        self.run_template(&QueryTemplate::ExpensiveQueries { days_back, limit })
            .await
    }

    pub async fn user_activity(&self, days_back: u32) -> LensResult<ResultSet> {
        self.run_template(&QueryTemplate::UserActivitySummary { days_back })
            .await
    }

    pub async fn warehouse_utilization(&self, days_back: u32) -> LensResult<ResultSet> {
        self.run_template(&QueryTemplate::WarehouseUtilization { days_back })
            .await
    }

    pub async fn acceleration_candidates(
        &self,
        days_back: u32,
        limit: u32,
    ) -> LensResult<ResultSet> {
        self.run_template(&QueryTemplate::AccelerationCandidates { days_back, limit })
            .await
    }

    pub async fn explore_schema(&self, table_pattern: Option<String>) -> LensResult<ResultSet> {
        self.run_template(&QueryTemplate::SchemaTables { table_pattern })
            .await
    }

    pub async fn describe_table(&self, table: &str) -> LensResult<ResultSet> {
        self.run_template(&QueryTemplate::SchemaColumns {
            table: table.to_string(),
        })
        .await
    }

    // --- analyses ------------------------------------------------------

    /// Per-user credential posture plus method-flapping transitions.
    #[instrument(skip(self, users))]
    pub async fn authentication_audit(
        &self,
        users: Vec<String>,
        days_back: u32,
    ) -> LensResult<AuthReport> {
        let summary = self
            .run_feed(&QueryTemplate::AuthenticationSummary {
                days_back,
                users: users.clone(),
            })
            .await?;
        let timeline = self
            .run_feed(&QueryTemplate::LoginTimeline { days_back, users })
            .await?;

        let mut observations = Vec::new();
        for row in 0..summary.rows.len() {
            let user = text(&summary, row, "user_name");
            let factor = text(&summary, row, "first_authentication_factor");
            let logins = int(&summary, row, "login_count");
            let last_login = timestamp(&summary, row, "last_login");
            match (user, factor, logins, last_login) {
                (Some(user), Some(factor), Some(logins), Some(last_login)) => {
                    observations.push(AuthObservation {
                        user,
                        method: AuthMethod::from_factor(&factor),
                        logins: logins.max(0) as u64,
                        last_login,
                    });
                }
                _ => warn!(row, "skipping malformed login summary row"),
            }
        }

        let mut events = Vec::new();
        for row in 0..timeline.rows.len() {
            let user = text(&timeline, row, "user_name");
            let at = timestamp(&timeline, row, "event_timestamp");
            let factor = text(&timeline, row, "first_authentication_factor");
            let success = text(&timeline, row, "is_success");
            match (user, at, factor) {
                (Some(user), Some(at), Some(factor)) => events.push(LoginEvent {
                    user,
                    at,
                    method: AuthMethod::from_factor(&factor),
                    success: success.as_deref() == Some("YES"),
                }),
                _ => warn!(row, "skipping malformed login event row"),
            }
        }

        Ok(AuthReport {
            profiles: build_profiles(&observations),
            transitions: method_transitions(&events),
        })
    }

    /// Grant/revoke walk over the window.
    #[instrument(skip(self))]
    pub async fn privilege_audit(
        &self,
        days_back: u32,
        role_filter: Option<String>,
    ) -> LensResult<AuditReport> {
        let changes = self
            .run_feed(&QueryTemplate::PrivilegeChanges {
                days_back,
                role_filter,
            })
            .await?;

        let mut events = Vec::new();
        for row in 0..changes.rows.len() {
            let action = text(&changes, row, "action");
            let at = timestamp(&changes, row, "event_time");
            let grantee = text(&changes, row, "grantee_name");
            let role = text(&changes, row, "changed_role");
            let granted_by = text(&changes, row, "granted_by");
            match (action.as_deref(), at, grantee, role) {
                (Some("GRANTED"), Some(at), Some(grantee), Some(role)) => {
                    events.push(PrivilegeEvent {
                        at,
                        grantee,
                        role,
                        action: PrivilegeAction::Grant,
                        granted_by,
                    });
                }
                (Some("REVOKED"), Some(at), Some(grantee), Some(role)) => {
                    events.push(PrivilegeEvent {
                        at,
                        grantee,
                        role,
                        action: PrivilegeAction::Revoke,
                        granted_by,
                    });
                }
                _ => warn!(row, "skipping malformed privilege event row"),
            }
        }

        Ok(self.differencer.diff(&events))
    }

    /// Statistical anomaly sweep: the most recent `days_back` days evaluated
    /// against a longer self-baseline.
    #[instrument(skip(self))]
    pub async fn access_anomalies(
        &self,
        days_back: u32,
        sensitivity: Sensitivity,
    ) -> LensResult<AnomalyReport> {
        let baseline_days = days_back
            .saturating_mul(BASELINE_WINDOW_FACTOR)
            .min(MAX_BASELINE_DAYS);

        let activity = self
            .run_feed(&QueryTemplate::AccessActivity {
                days_back: baseline_days,
            })
            .await?;
        let object_history = self
            .run_feed(&QueryTemplate::ObjectAccessBaseline {
                days_back: baseline_days,
            })
            .await?;

        let mut samples = Vec::new();
        for row in 0..activity.rows.len() {
            let entity = text(&activity, row, "user_name");
            let at = timestamp(&activity, row, "activity_hour");
            let query_count = int(&activity, row, "query_count").unwrap_or(0);
            let rows_read = int(&activity, row, "rows_read").unwrap_or(0);
            let distinct_databases = int(&activity, row, "distinct_databases").unwrap_or(0);
            let objects = text(&activity, row, "objects")
                .and_then(|raw| serde_json::from_str::<Vec<String>>(&raw).ok())
                .unwrap_or_default();
            match (entity, at) {
                (Some(entity), Some(at)) => samples.push(AccessSample {
                    entity,
                    at,
                    query_count: query_count.max(0) as u64,
                    rows_read: rows_read.max(0) as u64,
                    distinct_databases: distinct_databases.clamp(0, i64::from(u32::MAX)) as u32,
                    objects,
                }),
                _ => warn!(row, "skipping malformed access activity row"),
            }
        }

        let Some(newest) = samples.iter().map(|s| s.at).max() else {
            return Ok(AnomalyReport {
                sensitivity,
                findings: Vec::new(),
                skipped_entities: Vec::new(),
            });
        };
        let cutoff = newest - Duration::days(i64::from(days_back));
        let (window, baseline): (Vec<AccessSample>, Vec<AccessSample>) =
            samples.into_iter().partition(|s| s.at >= cutoff);

        let baseline_objects = object_baseline(&object_history, cutoff);

        Ok(self
            .anomaly
            .detect(&baseline, &window, &baseline_objects, sensitivity))
    }
}

/// Objects each entity was already touching before the evaluation window.
fn object_baseline(
    history: &ResultSet,
    cutoff: DateTime<Utc>,
) -> HashMap<String, HashSet<String>> {
    let mut baseline: HashMap<String, HashSet<String>> = HashMap::new();
    for row in 0..history.rows.len() {
        let user = text(history, row, "user_name");
        let object = text(history, row, "object_name");
        let first_seen = timestamp(history, row, "first_seen");
        if let (Some(user), Some(object), Some(first_seen)) = (user, object, first_seen) {
            if first_seen < cutoff {
                baseline.entry(user).or_default().insert(object);
            }
        }
    }
    baseline
}

fn text(rs: &ResultSet, row: usize, column: &str) -> Option<String> {
    rs.value(row, column)
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

fn int(rs: &ResultSet, row: usize, column: &str) -> Option<i64> {
    rs.value(row, column).and_then(|v| v.as_i64())
}

fn timestamp(rs: &ResultSet, row: usize, column: &str) -> Option<DateTime<Utc>> {
    rs.value(row, column).and_then(|v| v.as_timestamp())
}
