// SPDX-License-Identifier: Apache-2.0

//! Statement Classifier
//!
//! Pure, deterministic read-only vetting for raw SQL. Keyword checks run on
//! the token stream, not on substrings, so identifiers like `update_time`
//! never trip the forbidden list. Anything the tokenizer cannot prove safe
//! is rejected.

use serde::{Deserialize, Serialize};
use sqlparser::dialect::GenericDialect;
use sqlparser::keywords::Keyword;
use sqlparser::tokenizer::{Token, Tokenizer};
use tracing::debug;

use crate::config::LensConfig;
use crate::error::RejectReason;

/// Mutation and DDL keywords that terminate classification immediately.
const FORBIDDEN: &[Keyword] = &[
    Keyword::INSERT,
    Keyword::UPDATE,
    Keyword::DELETE,
    Keyword::DROP,
    Keyword::CREATE,
    Keyword::ALTER,
    Keyword::TRUNCATE,
    Keyword::MERGE,
    Keyword::COPY,
    Keyword::GRANT,
    Keyword::REVOKE,
    Keyword::CALL,
    Keyword::EXECUTE,
];

/// Outcome of classifying one statement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub allowed: bool,
    pub reason: Option<RejectReason>,
    /// Comment-stripped, whitespace-collapsed statement; the form every
    /// downstream component (injector, executor, audit trail) works with.
    pub normalized: String,
}

impl Verdict {
    fn rejected(reason: RejectReason, normalized: String) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            normalized,
        }
    }

    fn approved(normalized: String) -> Self {
        Self {
            allowed: true,
            reason: None,
            normalized,
        }
    }
}

/// Classifies raw statements as read-only-in-scope or rejected.
pub struct StatementClassifier {
    permitted_namespaces: Vec<(String, String)>,
}

impl StatementClassifier {
    pub fn new(config: &LensConfig) -> Self {
        Self {
            permitted_namespaces: config
                .permitted_namespaces
                .iter()
                .map(|(db, schema)| (db.to_uppercase(), schema.to_uppercase()))
                .collect(),
        }
    }

    /// Classifies a raw statement. Same input, same verdict, always.
    pub fn classify(&self, raw: &str) -> Verdict {
        let normalized = self.normalize(raw);
        if normalized.is_empty() {
            return Verdict::rejected(RejectReason::EmptyStatement, normalized);
        }

        let dialect = GenericDialect {};
        let tokens = match Tokenizer::new(&dialect, &normalized).tokenize() {
            Ok(tokens) => tokens,
            Err(err) => {
                debug!(error = %err, "tokenizer failed, cannot prove read-only");
                return Verdict::rejected(
                    RejectReason::NotReadOnly {
                        message: format!("statement could not be tokenized: {err}"),
                    },
                    normalized,
                );
            }
        };
        let tokens: Vec<Token> = tokens
            .into_iter()
            .filter(|t| !matches!(t, Token::Whitespace(_)))
            .collect();

        // Chaining first: "SELECT 1; DROP TABLE X" is a chaining violation,
        // not a keyword violation.
        if let Some(pos) = tokens.iter().position(|t| matches!(t, Token::SemiColon)) {
            if pos + 1 < tokens.len() {
                return Verdict::rejected(RejectReason::MultiStatement, normalized);
            }
        }

        for token in &tokens {
            if let Token::Word(word) = token {
                if word.quote_style.is_none() && FORBIDDEN.contains(&word.keyword) {
                    return Verdict::rejected(
                        RejectReason::ForbiddenKeyword {
                            keyword: word.value.to_uppercase(),
                        },
                        normalized,
                    );
                }
            }
        }

        let leading = tokens.first().and_then(|t| match t {
            Token::Word(word) if word.quote_style.is_none() => Some(word.keyword),
            _ => None,
        });
        if !matches!(
            leading,
            Some(Keyword::SELECT) | Some(Keyword::WITH) | Some(Keyword::SHOW)
        ) {
            return Verdict::rejected(
                RejectReason::NotReadOnly {
                    message: "statement must begin with SELECT, WITH, or SHOW".to_string(),
                },
                normalized,
            );
        }

        if let Some(object) = self.scope_violation(&tokens) {
            return Verdict::rejected(RejectReason::ScopeViolation { object }, normalized);
        }

        Verdict::approved(normalized)
    }

    /// Strips comments, collapses whitespace, drops trailing semicolons.
    ///
    /// Comment stripping is string-literal-aware: a `--` or `/*` inside a
    /// quoted string is literal content and must survive untouched, or the
    /// normalized statement would carry an unterminated string.
    fn normalize(&self, raw: &str) -> String {
        let chars: Vec<char> = raw.chars().collect();
        let mut out = String::with_capacity(raw.len());
        let mut i = 0;
        while i < chars.len() {
            match chars[i] {
                '\'' => {
                    out.push('\'');
                    i += 1;
                    while i < chars.len() {
                        out.push(chars[i]);
                        if chars[i] == '\'' {
                            // '' is an escaped quote, not the end of the string
                            if chars.get(i + 1) == Some(&'\'') {
                                out.push('\'');
                                i += 2;
                                continue;
                            }
                            i += 1;
                            break;
                        }
                        i += 1;
                    }
                }
                '-' if chars.get(i + 1) == Some(&'-') => {
                    while i < chars.len() && chars[i] != '\n' {
                        i += 1;
                    }
                }
                '/' if chars.get(i + 1) == Some(&'*') => {
                    i += 2;
                    while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                        i += 1;
                    }
                    i = (i + 2).min(chars.len());
                    if !out.is_empty() && !out.ends_with(' ') {
                        out.push(' ');
                    }
                }
                c if c.is_whitespace() => {
                    if !out.is_empty() && !out.ends_with(' ') {
                        out.push(' ');
                    }
                    i += 1;
                }
                c => {
                    out.push(c);
                    i += 1;
                }
            }
        }
        out.trim().trim_end_matches(';').trim_end().to_string()
    }

    /// Finds the first qualified identifier outside the permitted namespaces.
    ///
    /// Three-part chains (`db.schema.object`) are checked strictly. Two-part
    /// chains are only checked when the head names a permitted database,
    /// since `alias.column` is indistinguishable from `db.schema` without
    /// full semantic analysis.
    fn scope_violation(&self, tokens: &[Token]) -> Option<String> {
        for chain in identifier_chains(tokens) {
            let upper: Vec<String> = chain.iter().map(|p| p.to_uppercase()).collect();
            match upper.len() {
                3 => {
                    let ok = self
                        .permitted_namespaces
                        .iter()
                        .any(|(db, schema)| *db == upper[0] && *schema == upper[1]);
                    if !ok {
                        return Some(chain.join("."));
                    }
                }
                2 => {
                    let head_is_db = self
                        .permitted_namespaces
                        .iter()
                        .any(|(db, _)| *db == upper[0]);
                    if head_is_db {
                        let ok = self
                            .permitted_namespaces
                            .iter()
                            .any(|(db, schema)| *db == upper[0] && *schema == upper[1]);
                        if !ok {
                            return Some(chain.join("."));
                        }
                    }
                }
                _ => {}
            }
        }
        None
    }
}

/// Collects dotted identifier chains (`a.b`, `a.b.c`) from the token stream.
fn identifier_chains(tokens: &[Token]) -> Vec<Vec<String>> {
    let mut chains = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        if let Token::Word(word) = &tokens[i] {
            let mut chain = vec![word.value.clone()];
            let mut j = i + 1;
            while j + 1 < tokens.len() && tokens[j] == Token::Period {
                if let Token::Word(next) = &tokens[j + 1] {
                    chain.push(next.value.clone());
                    j += 2;
                } else {
                    break;
                }
            }
            if chain.len() > 1 {
                chains.push(chain);
            }
            i = j.max(i + 1);
        } else {
            i += 1;
        }
    }
    chains
}
