// SPDX-License-Identifier: Apache-2.0

//! Source table registry
//!
//! The account-usage views the core reads from, with their documented
//! replication latency. The service stamps the worst-case staleness of the
//! tables a statement touches onto its result.

use serde::{Deserialize, Serialize};

use crate::config::LensConfig;

/// Account-usage views known to the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageTable {
    QueryHistory,
    LoginHistory,
    AccessHistory,
    GrantsToUsers,
    GrantsToRoles,
    WarehouseMeteringHistory,
    WarehouseLoadHistory,
    QueryAccelerationEligible,
    Tables,
    Columns,
}

impl UsageTable {
    pub const ALL: &'static [UsageTable] = &[
        Self::QueryHistory,
        Self::LoginHistory,
        Self::AccessHistory,
        Self::GrantsToUsers,
        Self::GrantsToRoles,
        Self::WarehouseMeteringHistory,
        Self::WarehouseLoadHistory,
        Self::QueryAccelerationEligible,
        Self::Tables,
        Self::Columns,
    ];

    /// Bare view name as it appears in the source schema.
    pub fn name(&self) -> &'static str {
        match self {
            Self::QueryHistory => "QUERY_HISTORY",
            Self::LoginHistory => "LOGIN_HISTORY",
            Self::AccessHistory => "ACCESS_HISTORY",
            Self::GrantsToUsers => "GRANTS_TO_USERS",
            Self::GrantsToRoles => "GRANTS_TO_ROLES",
            Self::WarehouseMeteringHistory => "WAREHOUSE_METERING_HISTORY",
            Self::WarehouseLoadHistory => "WAREHOUSE_LOAD_HISTORY",
            Self::QueryAccelerationEligible => "QUERY_ACCELERATION_ELIGIBLE",
            Self::Tables => "TABLES",
            Self::Columns => "COLUMNS",
        }
    }

    /// Fully-qualified name under the configured namespace.
    pub fn fqn(&self, config: &LensConfig) -> String {
        format!("{}.{}", config.namespace_prefix(), self.name())
    }

    /// Documented worst-case replication latency of the view.
    pub fn staleness_minutes(&self) -> u32 {
        match self {
            Self::QueryHistory => 45,
            Self::LoginHistory => 120,
            Self::AccessHistory => 180,
            Self::GrantsToUsers => 120,
            Self::GrantsToRoles => 120,
            Self::WarehouseMeteringHistory => 180,
            Self::WarehouseLoadHistory => 180,
            Self::QueryAccelerationEligible => 180,
            Self::Tables => 90,
            Self::Columns => 90,
        }
    }
}

/// Finds which known views a normalized statement references.
pub fn detect_tables(normalized_sql: &str) -> Vec<UsageTable> {
    let upper = normalized_sql.to_uppercase();
    UsageTable::ALL
        .iter()
        .copied()
        .filter(|table| references(&upper, table.name()))
        .collect()
}

/// Worst-case staleness across every view the statement touches.
pub fn max_staleness_minutes(normalized_sql: &str) -> Option<u32> {
    detect_tables(normalized_sql)
        .iter()
        .map(|t| t.staleness_minutes())
        .max()
}

/// Word-bounded containment check. `QUERY_HISTORY` must not match inside
/// `QUERY_HISTORY_ARCHIVE`.
fn references(upper_sql: &str, name: &str) -> bool {
    let mut start = 0;
    while let Some(pos) = upper_sql[start..].find(name) {
        let at = start + pos;
        let end = at + name.len();
        let before = upper_sql[..at].chars().next_back();
        let after = upper_sql[end..].chars().next();
        let bounded = |c: Option<char>| c.map_or(true, |c| !c.is_alphanumeric() && c != '_');
        if bounded(before) && bounded(after) {
            return true;
        }
        start = end;
    }
    false
}
