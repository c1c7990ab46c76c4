// SPDX-License-Identifier: Apache-2.0

//! Limit & Timeout Injector
//!
//! Turns an approved verdict into an execution plan with all resource limits
//! resolved. Caller wishes are clamped to the system ceilings and an existing
//! LIMIT clause is never raised, only lowered.

use serde::{Deserialize, Serialize};
use sqlparser::dialect::GenericDialect;
use sqlparser::keywords::Keyword;
use sqlparser::tokenizer::{Token, Tokenizer};

use crate::config::LensConfig;
use crate::error::{LensError, LensResult};
use crate::gate::classifier::Verdict;

/// A fully-resolved, ready-to-execute statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub statement: String,
    pub row_limit: u32,
    pub timeout_secs: u32,
    pub max_result_bytes: u64,
}

/// Resolves row limits and timeouts for approved statements.
pub struct LimitInjector {
    default_rows: u32,
    max_rows: u32,
    default_timeout_secs: u32,
    max_timeout_secs: u32,
    max_result_bytes: u64,
}

impl LimitInjector {
    pub fn new(config: &LensConfig) -> Self {
        Self {
            default_rows: config.default_rows,
            max_rows: config.max_rows,
            default_timeout_secs: config.default_timeout_secs,
            max_timeout_secs: config.max_timeout_secs,
            max_result_bytes: config.max_result_bytes,
        }
    }

    /// Builds the execution plan for an approved verdict.
    ///
    /// A rejected verdict is a precondition failure here: the injector is
    /// only ever reachable after classification approved the statement.
    pub fn build_plan(
        &self,
        verdict: &Verdict,
        requested_rows: Option<u32>,
        requested_timeout_secs: Option<u32>,
    ) -> LensResult<ExecutionPlan> {
        if !verdict.allowed {
            let reason = verdict
                .reason
                .as_ref()
                .map(|r| r.to_string())
                .unwrap_or_else(|| "statement was not approved".to_string());
            return Err(LensError::precondition(reason));
        }
        if requested_rows == Some(0) {
            return Err(LensError::invalid_parameter("rows", "must be at least 1"));
        }
        if requested_timeout_secs == Some(0) {
            return Err(LensError::invalid_parameter(
                "timeout_secs",
                "must be at least 1",
            ));
        }

        let mut row_limit = requested_rows.unwrap_or(self.default_rows).min(self.max_rows);
        let timeout_secs = requested_timeout_secs
            .unwrap_or(self.default_timeout_secs)
            .min(self.max_timeout_secs);

        let existing = existing_row_limit(&verdict.normalized);
        let statement = match existing {
            Some(n) => {
                row_limit = row_limit.min(n);
                verdict.normalized.clone()
            }
            None => format!("{} LIMIT {}", verdict.normalized, row_limit),
        };

        Ok(ExecutionPlan {
            statement,
            row_limit,
            timeout_secs,
            max_result_bytes: self.max_result_bytes,
        })
    }
}

/// Finds an explicit `LIMIT n` or `FETCH FIRST n` clause, if any.
///
/// Values too large for u32 saturate to the maximum, which the clamp then
/// reduces to the system ceiling anyway.
fn existing_row_limit(normalized: &str) -> Option<u32> {
    let dialect = GenericDialect {};
    let tokens: Vec<Token> = Tokenizer::new(&dialect, normalized)
        .tokenize()
        .ok()?
        .into_iter()
        .filter(|t| !matches!(t, Token::Whitespace(_)))
        .collect();

    for (i, token) in tokens.iter().enumerate() {
        let keyword = match token {
            Token::Word(w) if w.quote_style.is_none() => w.keyword,
            _ => continue,
        };
        let number_at = match keyword {
            Keyword::LIMIT => i + 1,
            Keyword::FETCH => match tokens.get(i + 1) {
                Some(Token::Word(w)) if w.keyword == Keyword::FIRST => i + 2,
                _ => continue,
            },
            _ => continue,
        };
        if let Some(Token::Number(n, _)) = tokens.get(number_at) {
            return Some(n.parse::<u32>().unwrap_or(u32::MAX));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::classifier::StatementClassifier;
    use proptest::prelude::*;

    fn approved(sql: &str) -> Verdict {
        let verdict = StatementClassifier::new(&LensConfig::default()).classify(sql);
        assert!(verdict.allowed, "{:?}", verdict.reason);
        verdict
    }

    fn injector() -> LimitInjector {
        LimitInjector::new(&LensConfig::default())
    }

    #[test]
    fn appends_default_limit_when_absent() {
        let plan = injector().build_plan(&approved("SELECT 1"), None, None).unwrap();
        assert_eq!(plan.statement, "SELECT 1 LIMIT 1000");
        assert_eq!(plan.row_limit, 1000);
        assert_eq!(plan.timeout_secs, 300);
    }

    #[test]
    fn existing_lower_limit_is_preserved() {
        let plan = injector()
            .build_plan(&approved("SELECT 1 LIMIT 5"), Some(100), None)
            .unwrap();
        assert_eq!(plan.statement, "SELECT 1 LIMIT 5");
        assert_eq!(plan.row_limit, 5);
    }

    #[test]
    fn existing_higher_limit_is_not_raised_but_capped_in_plan() {
        // The statement keeps its own clause; the adapter enforces the cap.
        let plan = injector()
            .build_plan(&approved("SELECT 1 LIMIT 999999"), None, None)
            .unwrap();
        assert_eq!(plan.statement, "SELECT 1 LIMIT 999999");
        assert_eq!(plan.row_limit, 1000);
    }

    #[test]
    fn fetch_first_counts_as_existing_limit() {
        let plan = injector()
            .build_plan(&approved("SELECT 1 FETCH FIRST 7 ROWS ONLY"), None, None)
            .unwrap();
        assert_eq!(plan.row_limit, 7);
        assert!(!plan.statement.contains("LIMIT"));
    }

    #[test]
    fn requested_values_are_clamped_to_ceilings() {
        let plan = injector()
            .build_plan(&approved("SELECT 1"), Some(1_000_000), Some(86_400))
            .unwrap();
        assert_eq!(plan.row_limit, 10_000);
        assert_eq!(plan.timeout_secs, 300);
    }

    #[test]
    fn rejected_verdict_never_yields_a_plan() {
        let verdict = StatementClassifier::new(&LensConfig::default()).classify("DROP TABLE t");
        let err = injector().build_plan(&verdict, None, None).unwrap_err();
        assert!(matches!(err, LensError::Precondition { .. }));
    }

    #[test]
    fn commented_lowercase_statement_gets_requested_limit_appended() {
        let verdict = approved(
            "  -- comment\nselect user_name, count(*) from login_history group by user_name",
        );
        let plan = injector().build_plan(&verdict, Some(50), None).unwrap();
        assert_eq!(plan.row_limit, 50);
        assert!(plan.statement.ends_with("LIMIT 50"));
    }

    #[test]
    fn zero_rows_is_an_invalid_parameter() {
        let err = injector()
            .build_plan(&approved("SELECT 1"), Some(0), None)
            .unwrap_err();
        assert!(matches!(err, LensError::InvalidParameter { .. }));
    }

    proptest! {
        #[test]
        fn plan_limits_never_exceed_ceilings(
            rows in proptest::option::of(1u32..2_000_000),
            timeout in proptest::option::of(1u32..100_000),
        ) {
            let config = LensConfig::default();
            let plan = LimitInjector::new(&config)
                .build_plan(&approved("SELECT 1"), rows, timeout)
                .unwrap();
            prop_assert!(plan.row_limit <= config.max_rows);
            prop_assert!(plan.timeout_secs <= config.max_timeout_secs);
            prop_assert!(plan.statement.contains("LIMIT"));
        }
    }
}
