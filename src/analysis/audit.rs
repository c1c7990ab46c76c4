// SPDX-License-Identifier: Apache-2.0

//! Audit Differencer
//!
//! Reconstructs per-grantee role state from a chronological stream of grant
//! and revoke events and flags the patterns worth a human look. Malformed or
//! inconsistent records become diagnostics, never aborts: an audit that dies
//! halfway is worse than one with a caveat attached.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analysis::anomaly::Severity;
use crate::config::LensConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivilegeAction {
    Grant,
    Revoke,
}

/// One grant or revoke event from the log store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivilegeEvent {
    pub at: DateTime<Utc>,
    pub grantee: String,
    pub role: String,
    pub action: PrivilegeAction,
    pub granted_by: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditFinding {
    /// A role from the sensitive list was granted.
    SensitiveGrant {
        at: DateTime<Utc>,
        grantee: String,
        role: String,
        granted_by: Option<String>,
        severity: Severity,
    },
    /// A grantee accumulated distinct new roles faster than the window
    /// allows.
    RapidAccumulation {
        grantee: String,
        roles: Vec<String>,
        window_end: DateTime<Utc>,
        severity: Severity,
    },
}

impl AuditFinding {
    pub fn severity(&self) -> Severity {
        match self {
            Self::SensitiveGrant { severity, .. } => *severity,
            Self::RapidAccumulation { severity, .. } => *severity,
        }
    }

    pub fn grantee(&self) -> &str {
        match self {
            Self::SensitiveGrant { grantee, .. } => grantee,
            Self::RapidAccumulation { grantee, .. } => grantee,
        }
    }
}

/// Non-fatal oddity encountered during the walk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditDiagnostic {
    /// Revoke of a role the grantee did not hold inside the window. Usually
    /// means the grant predates the window, so it is reported, not fatal.
    InconsistentRevoke {
        at: DateTime<Utc>,
        grantee: String,
        role: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditReport {
    pub findings: Vec<AuditFinding>,
    pub diagnostics: Vec<AuditDiagnostic>,
    /// Roles held per grantee at the end of the window, as reconstructed
    /// from the events alone. Holdings from before the window are unknown.
    pub held_roles: HashMap<String, Vec<String>>,
}

/// Walks privilege events chronologically and produces the audit report.
pub struct AuditDifferencer {
    sensitive_roles: Vec<String>,
    rapid_count: usize,
    rapid_window: Duration,
}

impl AuditDifferencer {
    pub fn new(config: &LensConfig) -> Self {
        Self {
            sensitive_roles: config
                .sensitive_roles
                .iter()
                .map(|r| r.to_uppercase())
                .collect(),
            rapid_count: config.rapid_accumulation_count,
            rapid_window: Duration::hours(config.rapid_accumulation_window_hours),
        }
    }

    pub fn diff(&self, events: &[PrivilegeEvent]) -> AuditReport {
        let mut ordered: Vec<&PrivilegeEvent> = events.iter().collect();
        ordered.sort_by_key(|e| e.at);

        let mut findings = Vec::new();
        let mut diagnostics = Vec::new();
        let mut held: HashMap<&str, HashSet<String>> = HashMap::new();
        let mut recent_grants: HashMap<&str, VecDeque<(DateTime<Utc>, String)>> = HashMap::new();
        let mut rapid_flagged: HashSet<&str> = HashSet::new();

        for event in ordered {
            let grantee = event.grantee.as_str();
            let role = event.role.to_uppercase();
            match event.action {
                PrivilegeAction::Grant => {
                    if self.sensitive_roles.contains(&role) {
                        findings.push(AuditFinding::SensitiveGrant {
                            at: event.at,
                            grantee: event.grantee.clone(),
                            role: role.clone(),
                            granted_by: event.granted_by.clone(),
                            severity: Severity::High,
                        });
                    }

                    let holdings = held.entry(grantee).or_default();
                    if holdings.insert(role.clone()) {
                        let recent = recent_grants.entry(grantee).or_default();
                        recent.push_back((event.at, role));
                        while recent
                            .front()
                            .is_some_and(|(at, _)| event.at - *at > self.rapid_window)
                        {
                            recent.pop_front();
                        }
                        if recent.len() > self.rapid_count && !rapid_flagged.contains(grantee) {
                            rapid_flagged.insert(grantee);
                            findings.push(AuditFinding::RapidAccumulation {
                                grantee: event.grantee.clone(),
                                roles: recent.iter().map(|(_, r)| r.clone()).collect(),
                                window_end: event.at,
                                severity: Severity::High,
                            });
                        }
                    }
                }
                PrivilegeAction::Revoke => {
                    let removed = held
                        .get_mut(grantee)
                        .map(|holdings| holdings.remove(&role))
                        .unwrap_or(false);
                    if !removed {
                        diagnostics.push(AuditDiagnostic::InconsistentRevoke {
                            at: event.at,
                            grantee: event.grantee.clone(),
                            role,
                        });
                    }
                }
            }
        }

        let held_roles = held
            .into_iter()
            .map(|(grantee, roles)| {
                let mut roles: Vec<String> = roles.into_iter().collect();
                roles.sort_unstable();
                (grantee.to_string(), roles)
            })
            .collect();

        debug!(
            findings = findings.len(),
            diagnostics = diagnostics.len(),
            "privilege audit complete"
        );

        AuditReport {
            findings,
            diagnostics,
            held_roles,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap()
    }

    fn grant(day: u32, hour: u32, grantee: &str, role: &str) -> PrivilegeEvent {
        PrivilegeEvent {
            at: at(day, hour),
            grantee: grantee.to_string(),
            role: role.to_string(),
            action: PrivilegeAction::Grant,
            granted_by: Some("SECURITYADMIN".to_string()),
        }
    }

    fn revoke(day: u32, hour: u32, grantee: &str, role: &str) -> PrivilegeEvent {
        PrivilegeEvent {
            at: at(day, hour),
            grantee: grantee.to_string(),
            role: role.to_string(),
            action: PrivilegeAction::Revoke,
            granted_by: None,
        }
    }

    fn differencer() -> AuditDifferencer {
        AuditDifferencer::new(&LensConfig::default())
    }

    #[test]
    fn sensitive_grant_is_always_flagged() {
        let report = differencer().diff(&[grant(1, 9, "eve", "accountadmin")]);
        assert_eq!(report.findings.len(), 1);
        assert!(matches!(
            &report.findings[0],
            AuditFinding::SensitiveGrant { role, .. } if role == "ACCOUNTADMIN"
        ));
    }

    #[test]
    fn grant_then_revoke_of_sensitive_role_is_one_finding() {
        let report = differencer().diff(&[
            grant(1, 9, "eve", "ACCOUNTADMIN"),
            revoke(1, 12, "eve", "ACCOUNTADMIN"),
        ]);
        assert_eq!(report.findings.len(), 1);
        assert!(matches!(
            &report.findings[0],
            AuditFinding::SensitiveGrant { .. }
        ));
        assert!(report.diagnostics.is_empty());
    }

    #[test]
    fn rapid_accumulation_requires_exceeding_count_in_window() {
        let d = differencer();

        // Three new roles in a day: at the limit, not over it.
        let report = d.diff(&[
            grant(1, 9, "eve", "R1"),
            grant(1, 10, "eve", "R2"),
            grant(1, 11, "eve", "R3"),
        ]);
        assert!(!report
            .findings
            .iter()
            .any(|f| matches!(f, AuditFinding::RapidAccumulation { .. })));

        // A fourth within the window tips it.
        let report = d.diff(&[
            grant(1, 9, "eve", "R1"),
            grant(1, 10, "eve", "R2"),
            grant(1, 11, "eve", "R3"),
            grant(1, 12, "eve", "R4"),
        ]);
        let rapid = report
            .findings
            .iter()
            .find(|f| matches!(f, AuditFinding::RapidAccumulation { .. }));
        assert!(rapid.is_some());

        // Spread over a week the same grants are unremarkable.
        let report = d.diff(&[
            grant(1, 9, "eve", "R1"),
            grant(3, 9, "eve", "R2"),
            grant(5, 9, "eve", "R3"),
            grant(7, 9, "eve", "R4"),
        ]);
        assert!(!report
            .findings
            .iter()
            .any(|f| matches!(f, AuditFinding::RapidAccumulation { .. })));
    }

    #[test]
    fn regrant_of_held_role_does_not_count_as_new() {
        let report = differencer().diff(&[
            grant(1, 9, "eve", "R1"),
            grant(1, 10, "eve", "R1"),
            grant(1, 11, "eve", "R1"),
            grant(1, 12, "eve", "R1"),
            grant(1, 13, "eve", "R2"),
        ]);
        assert!(!report
            .findings
            .iter()
            .any(|f| matches!(f, AuditFinding::RapidAccumulation { .. })));
    }

    #[test]
    fn revoke_of_unheld_role_is_a_diagnostic_not_an_abort() {
        let report = differencer().diff(&[
            revoke(1, 9, "eve", "R_OLD"),
            grant(1, 10, "eve", "R1"),
        ]);
        assert_eq!(report.diagnostics.len(), 1);
        assert!(matches!(
            &report.diagnostics[0],
            AuditDiagnostic::InconsistentRevoke { role, .. } if role == "R_OLD"
        ));
        assert_eq!(report.held_roles["eve"], vec!["R1".to_string()]);
    }

    #[test]
    fn out_of_order_input_is_walked_chronologically() {
        let report = differencer().diff(&[
            revoke(2, 9, "eve", "R1"),
            grant(1, 9, "eve", "R1"),
        ]);
        assert!(report.diagnostics.is_empty());
        assert!(report.held_roles["eve"].is_empty());
    }
}
