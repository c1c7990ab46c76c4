// SPDX-License-Identifier: Apache-2.0

//! DataSource trait definitions
//!
//! The core abstraction the executor adapter runs against. Collaborators own
//! credentials and connection bootstrapping; the core only ever sees these
//! two traits.

use async_trait::async_trait;

use crate::engine::types::QueryOutput;
use crate::error::LensResult;

/// Factory for source sessions.
///
/// One `DataSource` corresponds to one upstream log store account. The pool
/// calls `open_session` lazily, on first demand beyond the idle stack.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Short identifier for log lines (e.g. "snowflake", "mock").
    fn source_id(&self) -> &'static str;

    /// Opens a fresh session against the store.
    async fn open_session(&self) -> LensResult<Box<dyn SourceSession>>;
}

/// One live session against the log store.
///
/// `run` takes `&mut self`: a session executes one statement at a time, and
/// the pool guarantees no two in-flight requests share one.
#[async_trait]
pub trait SourceSession: Send {
    /// Executes one already-vetted statement and returns the raw output.
    async fn run(&mut self, sql: &str) -> LensResult<QueryOutput>;

    /// Best-effort server-side cancellation of the running statement.
    async fn cancel(&mut self) -> LensResult<()>;
}
