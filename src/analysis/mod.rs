// SPDX-License-Identifier: Apache-2.0

//! Behavioral analyses over account-usage aggregates: statistical anomaly
//! detection, privilege audits, authentication audits.

pub mod anomaly;
pub mod audit;
pub mod auth;
pub mod series;

pub use anomaly::{AccessSample, AnomalyEngine, AnomalyFinding, AnomalyKind, AnomalyReport, Severity};
pub use audit::{AuditDiagnostic, AuditDifferencer, AuditFinding, AuditReport, PrivilegeAction, PrivilegeEvent};
pub use auth::{AuthMethod, AuthProfile, AuthReport, AuthStatus, LoginEvent, MethodTransition};
pub use series::EntityMetricSeries;
