// SPDX-License-Identifier: Apache-2.0

//! Normalized error types for the usagelens core
//!
//! Gate rejections, parameter errors, and executor failures are all mapped
//! to these unified types so callers can decide whether an input correction
//! or a narrower request is the right follow-up.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why the statement classifier refused a statement.
///
/// Carried inside a [`crate::gate::Verdict`] rather than thrown: a rejection
/// is a normal, expected outcome of classification.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectReason {
    #[error("statement is empty or contains only comments")]
    EmptyStatement,

    #[error("statement is not a read-only query: {message}")]
    NotReadOnly { message: String },

    #[error("forbidden keyword: {keyword}")]
    ForbiddenKeyword { keyword: String },

    #[error("statement chaining is not allowed")]
    MultiStatement,

    #[error("statement references an object outside the permitted schema: {object}")]
    ScopeViolation { object: String },
}

/// Unified error type for all core operations.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum LensError {
    #[error("statement rejected: {reason}")]
    Rejected { reason: RejectReason },

    #[error("invalid parameter '{name}': {message}")]
    InvalidParameter { name: String, message: String },

    #[error("precondition failed: {message}")]
    Precondition { message: String },

    #[error("query execution error: {message}")]
    Execution { message: String },

    #[error("query timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u32 },

    #[error("result exceeds the {max_bytes} byte ceiling")]
    ResultTooLarge { max_bytes: u64 },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl LensError {
    pub fn rejected(reason: RejectReason) -> Self {
        Self::Rejected { reason }
    }

    pub fn invalid_parameter(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::Precondition { message: msg.into() }
    }

    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution { message: msg.into() }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal { message: msg.into() }
    }

    /// True for errors the caller can fix by correcting the submitted input
    /// (as opposed to narrowing the request or investigating the source).
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::Rejected { .. } | Self::InvalidParameter { .. } | Self::Precondition { .. }
        )
    }
}

/// Result type alias for core operations.
pub type LensResult<T> = Result<T, LensError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_messages_name_the_offending_fragment() {
        let err = LensError::rejected(RejectReason::ForbiddenKeyword {
            keyword: "DROP".to_string(),
        });
        assert!(err.to_string().contains("DROP"));

        let err = LensError::invalid_parameter("days_back", "must be between 1 and 3650");
        assert!(err.to_string().contains("days_back"));
    }

    #[test]
    fn input_errors_are_distinguished_from_executor_errors() {
        assert!(LensError::rejected(RejectReason::MultiStatement).is_input_error());
        assert!(LensError::invalid_parameter("x", "bad").is_input_error());
        assert!(!LensError::Timeout { timeout_secs: 30 }.is_input_error());
        assert!(!LensError::execution("boom").is_input_error());
    }

    #[test]
    fn reject_reason_serializes_with_a_kind_tag() {
        let json = serde_json::to_value(RejectReason::ScopeViolation {
            object: "PROD.SALES.ORDERS".to_string(),
        })
        .unwrap();
        assert_eq!(json["kind"], "scope_violation");
        assert_eq!(json["object"], "PROD.SALES.ORDERS");
    }
}
