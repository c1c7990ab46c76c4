// SPDX-License-Identifier: Apache-2.0

//! Query Executor Adapter
//!
//! The single path from an approved execution plan to the source. Enforces
//! the hard wall-clock timeout, the row cap, and the result-size ceiling;
//! decides whether the session goes back to the pool or is discarded.

use std::sync::Arc;

use tokio::time::{timeout, Duration};
use tracing::{instrument, warn};

use crate::config::LensConfig;
use crate::engine::pool::SessionPool;
use crate::engine::traits::DataSource;
use crate::engine::types::{ExecutionId, QueryOutput, ResultSet};
use crate::error::{LensError, LensResult};
use crate::gate::limits::ExecutionPlan;

/// Executes approved plans against the source through the session pool.
pub struct ExecutorAdapter {
    pool: SessionPool,
    cancel_grace: Duration,
    max_result_bytes: u64,
}

impl ExecutorAdapter {
    pub fn new(source: Arc<dyn DataSource>, config: &LensConfig) -> Self {
        Self {
            pool: SessionPool::new(source, config.pool_max_sessions),
            cancel_grace: Duration::from_secs(config.cancel_grace_secs),
            max_result_bytes: config.max_result_bytes,
        }
    }

    /// Runs the plan's statement exactly once.
    ///
    /// Timeouts and source errors discard the session; retries are the
    /// caller's decision, never made here.
    #[instrument(skip(self, plan), fields(
        execution_id = %ExecutionId::new().0,
        row_limit = plan.row_limit,
        timeout_secs = plan.timeout_secs,
    ))]
    pub async fn execute(&self, plan: &ExecutionPlan) -> LensResult<ResultSet> {
        let mut lease = self.pool.checkout().await?;

        let run = lease.session().run(&plan.statement);
        match timeout(Duration::from_secs(u64::from(plan.timeout_secs)), run).await {
            Ok(Ok(output)) => {
                let result = self.cap(output, plan)?;
                lease.checkin().await;
                Ok(result)
            }
            Ok(Err(err)) => {
                // Session state is suspect after a source error.
                drop(lease);
                Err(LensError::execution(err.to_string()))
            }
            Err(_) => {
                let mut session = lease.take();
                let cancel = timeout(self.cancel_grace, session.cancel()).await;
                if !matches!(cancel, Ok(Ok(()))) {
                    warn!("cancel not acknowledged within grace period");
                }
                drop(session);
                Err(LensError::Timeout {
                    timeout_secs: plan.timeout_secs,
                })
            }
        }
    }

    /// Applies the row cap and the byte ceiling to raw output.
    fn cap(&self, output: QueryOutput, plan: &ExecutionPlan) -> LensResult<ResultSet> {
        let row_limit = plan.row_limit as usize;
        let truncated = output.rows.len() > row_limit;

        let mut bytes: u64 = 0;
        let mut rows = Vec::with_capacity(output.rows.len().min(row_limit));
        for row in output.rows.into_iter().take(row_limit) {
            bytes = bytes.saturating_add(row.estimated_bytes());
            if bytes > self.max_result_bytes {
                return Err(LensError::ResultTooLarge {
                    max_bytes: self.max_result_bytes,
                });
            }
            rows.push(row);
        }

        Ok(ResultSet {
            columns: output.columns,
            rows,
            truncated,
            staleness_minutes: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::traits::SourceSession;
    use crate::engine::types::{Column, Row, Value};
    use crate::gate::limits::ExecutionPlan;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn plan(statement: &str, row_limit: u32, timeout_secs: u32) -> ExecutionPlan {
        ExecutionPlan {
            statement: statement.to_string(),
            row_limit,
            timeout_secs,
            max_result_bytes: 100 * 1024 * 1024,
        }
    }

    struct FixedSource {
        rows: usize,
        delay_ms: u64,
        cancelled: Arc<AtomicBool>,
        opened: Arc<AtomicUsize>,
    }

    struct FixedSession {
        rows: usize,
        delay_ms: u64,
        cancelled: Arc<AtomicBool>,
    }

    #[async_trait]
    impl SourceSession for FixedSession {
        async fn run(&mut self, _sql: &str) -> LensResult<QueryOutput> {
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            Ok(QueryOutput {
                columns: vec![Column::new("N", "INT")],
                rows: (0..self.rows)
                    .map(|i| Row::new(vec![Value::Int(i as i64)]))
                    .collect(),
            })
        }

        async fn cancel(&mut self) -> LensResult<()> {
            self.cancelled.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[async_trait]
    impl DataSource for FixedSource {
        fn source_id(&self) -> &'static str {
            "fixed"
        }

        async fn open_session(&self) -> LensResult<Box<dyn SourceSession>> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FixedSession {
                rows: self.rows,
                delay_ms: self.delay_ms,
                cancelled: Arc::clone(&self.cancelled),
            }))
        }
    }

    fn adapter(rows: usize, delay_ms: u64) -> (ExecutorAdapter, Arc<AtomicBool>, Arc<AtomicUsize>) {
        let cancelled = Arc::new(AtomicBool::new(false));
        let opened = Arc::new(AtomicUsize::new(0));
        let source = Arc::new(FixedSource {
            rows,
            delay_ms,
            cancelled: Arc::clone(&cancelled),
            opened: Arc::clone(&opened),
        });
        let adapter = ExecutorAdapter::new(source, &LensConfig::default());
        (adapter, cancelled, opened)
    }

    #[tokio::test]
    async fn row_cap_sets_truncated_flag() {
        let (adapter, _, _) = adapter(10, 0);
        let result = adapter.execute(&plan("SELECT 1", 3, 5)).await.unwrap();
        assert_eq!(result.rows.len(), 3);
        assert!(result.truncated);
    }

    #[tokio::test]
    async fn under_cap_result_is_not_truncated() {
        let (adapter, _, _) = adapter(2, 0);
        let result = adapter.execute(&plan("SELECT 1", 3, 5)).await.unwrap();
        assert_eq!(result.rows.len(), 2);
        assert!(!result.truncated);
    }

    #[tokio::test]
    async fn timeout_cancels_and_discards_session() {
        let (adapter, cancelled, opened) = adapter(1, 5_000);

        let err = adapter.execute(&plan("SELECT 1", 10, 1)).await.unwrap_err();
        assert!(matches!(err, LensError::Timeout { timeout_secs: 1 }));
        assert!(cancelled.load(Ordering::SeqCst));

        // The timed-out session must not be reused: the next execution
        // opens a fresh one.
        let _ = adapter.execute(&plan("SELECT 1", 10, 1)).await;
        assert_eq!(opened.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn byte_ceiling_aborts_without_partial_result() {
        let cancelled = Arc::new(AtomicBool::new(false));
        let opened = Arc::new(AtomicUsize::new(0));
        let source = Arc::new(FixedSource {
            rows: 100,
            delay_ms: 0,
            cancelled,
            opened,
        });
        let config = LensConfig {
            max_result_bytes: 16,
            ..LensConfig::default()
        };
        let adapter = ExecutorAdapter::new(source, &config);

        let err = adapter
            .execute(&plan("SELECT 1", 100, 5))
            .await
            .unwrap_err();
        assert!(matches!(err, LensError::ResultTooLarge { max_bytes: 16 }));
    }

    #[tokio::test]
    async fn successful_session_is_reused() {
        let (adapter, _, opened) = adapter(1, 0);
        adapter.execute(&plan("SELECT 1", 10, 5)).await.unwrap();
        adapter.execute(&plan("SELECT 1", 10, 5)).await.unwrap();
        assert_eq!(opened.load(Ordering::SeqCst), 1);
    }
}
