// SPDX-License-Identifier: Apache-2.0

//! Query safety gate: classification, limit injection, vetted templates.
//!
//! Every statement — caller-written or template-rendered — passes through
//! [`classifier::StatementClassifier`] before it can reach an executor.

pub mod classifier;
pub mod limits;
pub mod templates;

pub use classifier::{StatementClassifier, Verdict};
pub use limits::{ExecutionPlan, LimitInjector};
pub use templates::{QueryTemplate, TemplateLibrary};
