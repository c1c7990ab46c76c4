// usagelens - Account-usage intelligence core
// Query safety gate + anomaly/audit engine over a read-only log store

pub mod analysis;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod gate;
pub mod observability;
pub mod service;

pub use analysis::{AnomalyReport, AuditReport, AuthReport, Severity};
pub use config::{LensConfig, Sensitivity};
pub use engine::{DataSource, ResultSet, SourceSession};
pub use error::{LensError, LensResult, RejectReason};
pub use gate::{ExecutionPlan, QueryTemplate, Verdict};
pub use service::AccountAnalyzer;
