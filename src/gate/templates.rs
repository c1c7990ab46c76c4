// SPDX-License-Identifier: Apache-2.0

//! Safe Query Template Library
//!
//! Pre-vetted, parameterized analysis queries. Parameters are validated and
//! interpolated as typed fragments (integers formatted as integers,
//! identifiers whitelisted and upper-cased) so no raw caller string ever
//! reaches the rendered SQL. Every rendered statement still passes through
//! the classifier; the templates get no bypass.

use regex::Regex;

use crate::catalog::UsageTable;
use crate::config::LensConfig;
use crate::error::{LensError, LensResult};
use crate::gate::classifier::{StatementClassifier, Verdict};

const MAX_DAYS_BACK: u32 = 3_650;
const MAX_HOURS_BACK: u32 = 87_600;

/// One vetted analysis query with its typed parameters.
#[derive(Debug, Clone)]
pub enum QueryTemplate {
    /// Slowest successful queries in the window.
    SlowQueries { hours_back: u32, limit: u32 },
    /// Repeated query shapes by hash, ranked by total elapsed time.
    QueryPatterns { hours_back: u32, limit: u32 },
    /// Bucketed execution-time histogram.
    ExecutionTimeDistribution { days_back: u32 },
    /// Credit consumption per warehouse, priced.
    WarehouseCreditUsage { days_back: u32 },
    /// Cost divided by query count, per warehouse.
    CostPerQuery { days_back: u32 },
    /// Queries ranked by cloud-services credits.
    ExpensiveQueries { days_back: u32, limit: u32 },
    /// Per-user query counts and resource totals.
    UserActivitySummary { days_back: u32 },
    /// Concurrency and credit profile per warehouse.
    WarehouseUtilization { days_back: u32 },
    /// Queries eligible for the acceleration service.
    AccelerationCandidates { days_back: u32, limit: u32 },
    /// Per-user login counts by authentication factor.
    AuthenticationSummary { days_back: u32, users: Vec<String> },
    /// Event-level login records, ordered per user, for transition analysis.
    LoginTimeline { days_back: u32, users: Vec<String> },
    /// Grant and revoke events in the window, chronologically.
    PrivilegeChanges {
        days_back: u32,
        role_filter: Option<String>,
    },
    /// Hourly per-user access aggregates for the anomaly engine.
    AccessActivity { days_back: u32 },
    /// Long-window object sets per user for novelty detection.
    ObjectAccessBaseline { days_back: u32 },
    /// Table listing, optionally filtered by a LIKE pattern.
    SchemaTables { table_pattern: Option<String> },
    /// Column listing for one table.
    SchemaColumns { table: String },
}

/// Renders and vets [`QueryTemplate`]s.
pub struct TemplateLibrary {
    classifier: StatementClassifier,
    namespace: String,
    credit_price: f64,
    max_rows: u32,
    identifier: Regex,
    like_pattern: Regex,
}

impl TemplateLibrary {
    pub fn new(config: &LensConfig) -> Self {
        Self {
            classifier: StatementClassifier::new(config),
            namespace: config.namespace_prefix(),
            credit_price: config.credit_price,
            max_rows: config.max_rows,
            identifier: Regex::new(r"^[A-Za-z_][A-Za-z0-9_$]*$").expect("valid pattern"),
            like_pattern: Regex::new(r"^[A-Za-z0-9_$%]+$").expect("valid pattern"),
        }
    }

    /// Validates parameters, renders the SQL, and classifies it.
    ///
    /// A template whose rendered SQL fails classification indicates a broken
    /// template, not bad caller input, so it surfaces as an internal error.
    pub fn build(&self, template: &QueryTemplate) -> LensResult<Verdict> {
        let sql = self.render(template)?;
        let verdict = self.classifier.classify(&sql);
        if !verdict.allowed {
            let reason = verdict
                .reason
                .map(|r| r.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            return Err(LensError::internal(format!(
                "rendered template failed classification: {reason}"
            )));
        }
        Ok(verdict)
    }

    fn render(&self, template: &QueryTemplate) -> LensResult<String> {
        match template {
            QueryTemplate::SlowQueries { hours_back, limit } => {
                let hours = hours(*hours_back)?;
                let limit = self.limit(*limit)?;
                Ok(format!(
                    "SELECT query_id, query_text, warehouse_name, user_name, \
                     execution_time/1000 AS execution_time_seconds, \
                     total_elapsed_time/1000 AS total_elapsed_time_seconds, \
                     bytes_scanned, rows_produced, compilation_time, \
                     queued_provisioning_time + queued_overload_time + queued_repair_time AS total_queued_time \
                     FROM {qh} \
                     WHERE start_time >= DATEADD(hour, -{hours}, CURRENT_TIMESTAMP()) \
                     AND execution_status = 'SUCCESS' \
                     ORDER BY execution_time DESC LIMIT {limit}",
                    qh = self.fqn(UsageTable::QueryHistory),
                ))
            }
            QueryTemplate::QueryPatterns { hours_back, limit } => {
                let hours = hours(*hours_back)?;
                let limit = self.limit(*limit)?;
                Ok(format!(
                    "SELECT query_hash, COUNT(*) AS execution_count, \
                     SUM(total_elapsed_time)/1000 AS total_time_seconds, \
                     AVG(total_elapsed_time)/1000 AS avg_time_seconds, \
                     SUM(COALESCE(credits_used_cloud_services, 0)) AS total_credits_used, \
                     ANY_VALUE(query_id) AS sample_query_id, \
                     ANY_VALUE(query_text) AS sample_query_text, \
                     ANY_VALUE(warehouse_name) AS warehouse_name \
                     FROM {qh} \
                     WHERE start_time >= DATEADD(hour, -{hours}, CURRENT_TIMESTAMP()) \
                     AND execution_status = 'SUCCESS' \
                     GROUP BY query_hash HAVING COUNT(*) > 1 \
                     ORDER BY SUM(total_elapsed_time) DESC LIMIT {limit}",
                    qh = self.fqn(UsageTable::QueryHistory),
                ))
            }
            QueryTemplate::ExecutionTimeDistribution { days_back } => {
                let days = days(*days_back)?;
                Ok(format!(
                    "WITH buckets AS ( \
                     SELECT 'Less than 1 second' AS bucket, 0 AS lower_bound, 1000 AS upper_bound \
                     UNION ALL SELECT '1-5 seconds', 1000, 5000 \
                     UNION ALL SELECT '5-10 seconds', 5000, 10000 \
                     UNION ALL SELECT '10-20 seconds', 10000, 20000 \
                     UNION ALL SELECT '20-30 seconds', 20000, 30000 \
                     UNION ALL SELECT '30-60 seconds', 30000, 60000 \
                     UNION ALL SELECT '1-2 minutes', 60000, 120000 \
                     UNION ALL SELECT 'More than 2 minutes', 120000, 999999999) \
                     SELECT b.bucket AS execution_time_bucket, COUNT(q.query_id) AS query_count, \
                     ROUND(100.0 * COUNT(q.query_id) / SUM(COUNT(q.query_id)) OVER(), 2) AS percentage \
                     FROM {qh} q \
                     JOIN buckets b ON q.execution_time >= b.lower_bound AND q.execution_time < b.upper_bound \
                     WHERE q.start_time >= DATEADD(day, -{days}, CURRENT_TIMESTAMP()) \
                     AND q.execution_status = 'SUCCESS' \
                     GROUP BY b.bucket, b.lower_bound ORDER BY b.lower_bound",
                    qh = self.fqn(UsageTable::QueryHistory),
                ))
            }
            QueryTemplate::WarehouseCreditUsage { days_back } => {
                let days = days(*days_back)?;
                Ok(format!(
                    "SELECT warehouse_name, SUM(credits_used_compute) AS credits_used_compute_sum, \
                     AVG(credits_used_compute) AS avg_credits_per_hour, COUNT(*) AS active_hours, \
                     SUM(credits_used_compute) * {price:.2} AS estimated_cost \
                     FROM {wmh} \
                     WHERE start_time >= DATEADD(day, -{days}, CURRENT_TIMESTAMP()) \
                     GROUP BY warehouse_name ORDER BY credits_used_compute_sum DESC",
                    price = self.credit_price,
                    wmh = self.fqn(UsageTable::WarehouseMeteringHistory),
                ))
            }
            QueryTemplate::CostPerQuery { days_back } => {
                let days = days(*days_back)?;
                Ok(format!(
                    "WITH query_counts AS ( \
                     SELECT warehouse_name, COUNT(query_id) AS query_count \
                     FROM {qh} \
                     WHERE start_time >= DATEADD(day, -{days}, CURRENT_TIMESTAMP()) \
                     AND execution_status = 'SUCCESS' GROUP BY warehouse_name), \
                     warehouse_costs AS ( \
                     SELECT warehouse_name, SUM(credits_used) AS credits_used, \
                     SUM(credits_used) * {price:.2} AS total_cost \
                     FROM {wmh} \
                     WHERE start_time >= DATEADD(day, -{days}, CURRENT_TIMESTAMP()) \
                     GROUP BY warehouse_name) \
                     SELECT COALESCE(wc.warehouse_name, qc.warehouse_name) AS warehouse_name, \
                     qc.query_count, wc.credits_used, wc.total_cost, \
                     CASE WHEN qc.query_count > 0 THEN ROUND(wc.total_cost / qc.query_count, 4) ELSE 0 END AS cost_per_query \
                     FROM query_counts qc \
                     FULL OUTER JOIN warehouse_costs wc ON wc.warehouse_name = qc.warehouse_name \
                     ORDER BY cost_per_query DESC NULLS LAST",
                    price = self.credit_price,
                    qh = self.fqn(UsageTable::QueryHistory),
                    wmh = self.fqn(UsageTable::WarehouseMeteringHistory),
                ))
            }
            QueryTemplate::ExpensiveQueries { days_back, limit } => {
                let days = days(*days_back)?;
                let limit = self.limit(*limit)?;
                Ok(format!(
                    "SELECT query_id, query_text, warehouse_name, user_name, start_time, \
                     execution_time/1000 AS execution_seconds, credits_used_cloud_services, \
                     bytes_scanned, rows_produced \
                     FROM {qh} \
                     WHERE start_time >= DATEADD(day, -{days}, CURRENT_TIMESTAMP()) \
                     AND execution_status = 'SUCCESS' AND credits_used_cloud_services > 0 \
                     ORDER BY credits_used_cloud_services DESC LIMIT {limit}",
                    qh = self.fqn(UsageTable::QueryHistory),
                ))
            }
            QueryTemplate::UserActivitySummary { days_back } => {
                let days = days(*days_back)?;
                Ok(format!(
                    "SELECT user_name, COUNT(query_id) AS total_queries, \
                     SUM(execution_time)/1000 AS total_execution_seconds, \
                     AVG(execution_time)/1000 AS avg_execution_seconds, \
                     SUM(COALESCE(credits_used_cloud_services, 0)) AS total_credits_used, \
                     COUNT(DISTINCT warehouse_name) AS warehouses_used \
                     FROM {qh} \
                     WHERE start_time >= DATEADD(day, -{days}, CURRENT_TIMESTAMP()) \
                     AND execution_status = 'SUCCESS' \
                     GROUP BY user_name HAVING COUNT(query_id) > 0 \
                     ORDER BY total_credits_used DESC",
                    qh = self.fqn(UsageTable::QueryHistory),
                ))
            }
            QueryTemplate::WarehouseUtilization { days_back } => {
                let days = days(*days_back)?;
                Ok(format!(
                    "WITH warehouse_sizes AS ( \
                     SELECT warehouse_name, MODE(warehouse_size) AS current_warehouse_size \
                     FROM {qh} \
                     WHERE start_time >= DATEADD(day, -{days}, CURRENT_TIMESTAMP()) \
                     AND warehouse_size IS NOT NULL GROUP BY warehouse_name) \
                     SELECT wlh.warehouse_name, \
                     COALESCE(ws.current_warehouse_size, 'UNKNOWN') AS warehouse_size, \
                     AVG(wlh.avg_running) AS avg_concurrent_queries, \
                     AVG(wlh.avg_queued_load) AS avg_queued_queries, \
                     SUM(wmh.credits_used_compute) AS total_credits, \
                     COUNT(DISTINCT DATE_TRUNC('hour', wlh.start_time)) AS total_hours_active, \
                     ROUND(SUM(wmh.credits_used_compute) / NULLIF(COUNT(DISTINCT DATE_TRUNC('hour', wlh.start_time)), 0), 2) AS avg_credits_per_hour \
                     FROM {wlh} wlh \
                     LEFT JOIN {wmh} wmh ON wlh.warehouse_name = wmh.warehouse_name \
                     AND DATE_TRUNC('hour', wlh.start_time) = wmh.start_time \
                     LEFT JOIN warehouse_sizes ws ON wlh.warehouse_name = ws.warehouse_name \
                     WHERE wlh.start_time >= DATEADD(day, -{days}, CURRENT_TIMESTAMP()) \
                     GROUP BY wlh.warehouse_name, ws.current_warehouse_size \
                     ORDER BY total_credits DESC NULLS LAST",
                    qh = self.fqn(UsageTable::QueryHistory),
                    wlh = self.fqn(UsageTable::WarehouseLoadHistory),
                    wmh = self.fqn(UsageTable::WarehouseMeteringHistory),
                ))
            }
            QueryTemplate::AccelerationCandidates { days_back, limit } => {
                let days = days(*days_back)?;
                let limit = self.limit(*limit)?;
                Ok(format!(
                    "SELECT query_id, eligible_query_acceleration_time, warehouse_name, \
                     query_text, user_name, start_time \
                     FROM {qae} \
                     WHERE start_time >= DATEADD(day, -{days}, CURRENT_TIMESTAMP()) \
                     ORDER BY eligible_query_acceleration_time DESC LIMIT {limit}",
                    qae = self.fqn(UsageTable::QueryAccelerationEligible),
                ))
            }
            QueryTemplate::AuthenticationSummary { days_back, users } => {
                let days = days(*days_back)?;
                let user_filter = if users.is_empty() {
                    String::new()
                } else {
                    let quoted: Vec<String> = users
                        .iter()
                        .map(|u| self.quoted_identifier("users", u))
                        .collect::<LensResult<_>>()?;
                    format!("AND user_name IN ({}) ", quoted.join(", "))
                };
                Ok(format!(
                    "SELECT user_name, first_authentication_factor, COUNT(*) AS login_count, \
                     MAX(event_timestamp) AS last_login \
                     FROM {lh} \
                     WHERE event_timestamp >= DATEADD(day, -{days}, CURRENT_TIMESTAMP()) \
                     AND is_success = 'YES' {user_filter}\
                     GROUP BY user_name, first_authentication_factor \
                     ORDER BY user_name, first_authentication_factor",
                    lh = self.fqn(UsageTable::LoginHistory),
                ))
            }
            QueryTemplate::LoginTimeline { days_back, users } => {
                let days = days(*days_back)?;
                let user_filter = if users.is_empty() {
                    String::new()
                } else {
                    let quoted: Vec<String> = users
                        .iter()
                        .map(|u| self.quoted_identifier("users", u))
                        .collect::<LensResult<_>>()?;
                    format!("AND user_name IN ({}) ", quoted.join(", "))
                };
                Ok(format!(
                    "SELECT user_name, event_timestamp, first_authentication_factor, is_success \
                     FROM {lh} \
                     WHERE event_timestamp >= DATEADD(day, -{days}, CURRENT_TIMESTAMP()) {user_filter}\
                     ORDER BY user_name, event_timestamp",
                    lh = self.fqn(UsageTable::LoginHistory),
                ))
            }
            QueryTemplate::PrivilegeChanges {
                days_back,
                role_filter,
            } => {
                let days = days(*days_back)?;
                let role_clause = match role_filter {
                    Some(role) => {
                        format!("AND role = {} ", self.quoted_identifier("role_filter", role)?)
                    }
                    None => String::new(),
                };
                Ok(format!(
                    "SELECT 'GRANTED' AS action, created_on AS event_time, grantee_name, \
                     role AS changed_role, granted_by \
                     FROM {gtu} \
                     WHERE created_on >= DATEADD(day, -{days}, CURRENT_TIMESTAMP()) {role_clause}\
                     UNION ALL \
                     SELECT 'REVOKED' AS action, deleted_on AS event_time, grantee_name, \
                     role AS changed_role, granted_by \
                     FROM {gtu} \
                     WHERE deleted_on >= DATEADD(day, -{days}, CURRENT_TIMESTAMP()) {role_clause}\
                     ORDER BY event_time",
                    gtu = self.fqn(UsageTable::GrantsToUsers),
                ))
            }
            QueryTemplate::AccessActivity { days_back } => {
                let days = days(*days_back)?;
                Ok(format!(
                    "SELECT ah.user_name, DATE_TRUNC('hour', ah.query_start_time) AS activity_hour, \
                     COUNT(DISTINCT ah.query_id) AS query_count, \
                     SUM(COALESCE(qh.rows_produced, 0)) AS rows_read, \
                     COUNT(DISTINCT SPLIT_PART(obj.value:\"objectName\"::STRING, '.', 1)) AS distinct_databases, \
                     ARRAY_AGG(DISTINCT obj.value:\"objectName\"::STRING) AS objects \
                     FROM {ah} ah, \
                     LATERAL FLATTEN(input => ah.direct_objects_accessed) obj \
                     LEFT JOIN {qh} qh ON qh.query_id = ah.query_id \
                     WHERE ah.query_start_time >= DATEADD(day, -{days}, CURRENT_TIMESTAMP()) \
                     GROUP BY ah.user_name, DATE_TRUNC('hour', ah.query_start_time) \
                     ORDER BY activity_hour, ah.user_name",
                    ah = self.fqn(UsageTable::AccessHistory),
                    qh = self.fqn(UsageTable::QueryHistory),
                ))
            }
            QueryTemplate::ObjectAccessBaseline { days_back } => {
                let days = days(*days_back)?;
                Ok(format!(
                    "SELECT ah.user_name, obj.value:\"objectName\"::STRING AS object_name, \
                     MIN(ah.query_start_time) AS first_seen, COUNT(*) AS access_count \
                     FROM {ah} ah, \
                     LATERAL FLATTEN(input => ah.direct_objects_accessed) obj \
                     WHERE ah.query_start_time >= DATEADD(day, -{days}, CURRENT_TIMESTAMP()) \
                     GROUP BY ah.user_name, object_name \
                     ORDER BY ah.user_name, object_name",
                    ah = self.fqn(UsageTable::AccessHistory),
                ))
            }
            QueryTemplate::SchemaTables { table_pattern } => {
                let pattern_clause = match table_pattern {
                    Some(pattern) => {
                        format!("AND table_name LIKE {} ", self.quoted_pattern(pattern)?)
                    }
                    None => String::new(),
                };
                Ok(format!(
                    "SELECT table_name, table_schema, table_type, row_count, bytes, \
                     created, last_altered \
                     FROM {tables} \
                     WHERE deleted IS NULL {pattern_clause}\
                     ORDER BY table_schema, table_name",
                    tables = self.fqn(UsageTable::Tables),
                ))
            }
            QueryTemplate::SchemaColumns { table } => Ok(format!(
                "SELECT column_name, data_type, is_nullable, ordinal_position, comment \
                 FROM {columns} \
                 WHERE table_name = {table} AND deleted IS NULL \
                 ORDER BY ordinal_position",
                columns = self.fqn(UsageTable::Columns),
                table = self.quoted_identifier("table", table)?,
            )),
        }
    }

    fn fqn(&self, table: UsageTable) -> String {
        format!("{}.{}", self.namespace, table.name())
    }

    fn limit(&self, limit: u32) -> LensResult<u32> {
        if limit == 0 || limit > self.max_rows {
            return Err(LensError::invalid_parameter(
                "limit",
                format!("must be between 1 and {}", self.max_rows),
            ));
        }
        Ok(limit)
    }

    /// Validates an identifier and returns it upper-cased as a quoted
    /// literal for a predicate.
    fn quoted_identifier(&self, name: &str, value: &str) -> LensResult<String> {
        if !self.identifier.is_match(value) {
            return Err(LensError::invalid_parameter(
                name,
                format!("'{value}' is not a valid identifier"),
            ));
        }
        Ok(format!("'{}'", value.to_uppercase()))
    }

    fn quoted_pattern(&self, value: &str) -> LensResult<String> {
        if !self.like_pattern.is_match(value) {
            return Err(LensError::invalid_parameter(
                "table_pattern",
                format!("'{value}' is not a valid LIKE pattern"),
            ));
        }
        Ok(format!("'{}'", value.to_uppercase()))
    }
}

fn days(days_back: u32) -> LensResult<u32> {
    if days_back == 0 || days_back > MAX_DAYS_BACK {
        return Err(LensError::invalid_parameter(
            "days_back",
            format!("must be between 1 and {MAX_DAYS_BACK}"),
        ));
    }
    Ok(days_back)
}

fn hours(hours_back: u32) -> LensResult<u32> {
    if hours_back == 0 || hours_back > MAX_HOURS_BACK {
        return Err(LensError::invalid_parameter(
            "hours_back",
            format!("must be between 1 and {MAX_HOURS_BACK}"),
        ));
    }
    Ok(hours_back)
}
