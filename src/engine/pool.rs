// SPDX-License-Identifier: Apache-2.0

//! Bounded session pool
//!
//! Concurrency against the source is capped at `pool_max_sessions`. Idle
//! sessions are stacked and reused; a leased session dropped without an
//! explicit checkin is discarded, never silently returned.

use std::sync::Arc;

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::engine::traits::{DataSource, SourceSession};
use crate::error::{LensError, LensResult};

/// Pool of reusable sessions against one [`DataSource`].
pub struct SessionPool {
    source: Arc<dyn DataSource>,
    permits: Arc<Semaphore>,
    idle: Arc<Mutex<Vec<Box<dyn SourceSession>>>>,
}

impl SessionPool {
    pub fn new(source: Arc<dyn DataSource>, max_sessions: usize) -> Self {
        Self {
            source,
            permits: Arc::new(Semaphore::new(max_sessions)),
            idle: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Checks out a session, waiting for a permit if the pool is saturated.
    ///
    /// Reuses an idle session when one exists, otherwise opens a fresh one.
    pub async fn checkout(&self) -> LensResult<PooledSession> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| LensError::internal("session pool is closed"))?;

        let reused = self.idle.lock().await.pop();
        let session = match reused {
            Some(session) => {
                debug!(source = self.source.source_id(), "reusing idle session");
                session
            }
            None => {
                debug!(source = self.source.source_id(), "opening new session");
                self.source.open_session().await?
            }
        };

        Ok(PooledSession {
            session,
            idle: Arc::clone(&self.idle),
            _permit: permit,
        })
    }

    /// Number of sessions currently available without waiting.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

/// A leased session. Holds the concurrency permit for its whole lifetime.
///
/// Call [`checkin`](Self::checkin) after a clean execution to return the
/// session to the idle stack. Dropping without checkin discards the session,
/// which is the right outcome after a timeout or source error.
pub struct PooledSession {
    session: Box<dyn SourceSession>,
    idle: Arc<Mutex<Vec<Box<dyn SourceSession>>>>,
    _permit: OwnedSemaphorePermit,
}

impl PooledSession {
    /// Mutable access to the underlying session.
    pub fn session(&mut self) -> &mut dyn SourceSession {
        self.session.as_mut()
    }

    /// Returns the session to the idle stack for reuse.
    pub async fn checkin(self) {
        self.idle.lock().await.push(self.session);
    }

    /// Takes the session out of the lease for teardown (cancel-then-discard).
    /// The concurrency permit is released with the lease.
    pub fn take(self) -> Box<dyn SourceSession> {
        self.session
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::QueryOutput;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        opened: AtomicUsize,
    }

    struct NoopSession;

    #[async_trait]
    impl SourceSession for NoopSession {
        async fn run(&mut self, _sql: &str) -> LensResult<QueryOutput> {
            Ok(QueryOutput::empty())
        }

        async fn cancel(&mut self) -> LensResult<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl DataSource for CountingSource {
        fn source_id(&self) -> &'static str {
            "counting"
        }

        async fn open_session(&self) -> LensResult<Box<dyn SourceSession>> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(NoopSession))
        }
    }

    #[tokio::test]
    async fn checkin_allows_session_reuse() {
        let source = Arc::new(CountingSource {
            opened: AtomicUsize::new(0),
        });
        let pool = SessionPool::new(source.clone(), 2);

        let lease = pool.checkout().await.unwrap();
        lease.checkin().await;
        let lease = pool.checkout().await.unwrap();
        lease.checkin().await;

        assert_eq!(source.opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dropped_lease_discards_session() {
        let source = Arc::new(CountingSource {
            opened: AtomicUsize::new(0),
        });
        let pool = SessionPool::new(source.clone(), 2);

        drop(pool.checkout().await.unwrap());
        let lease = pool.checkout().await.unwrap();
        drop(lease);

        // Discarded sessions are never reused, so each checkout opens fresh.
        assert_eq!(source.opened.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn pool_caps_concurrent_leases() {
        let source = Arc::new(CountingSource {
            opened: AtomicUsize::new(0),
        });
        let pool = SessionPool::new(source, 1);

        let lease = pool.checkout().await.unwrap();
        assert_eq!(pool.available(), 0);

        let blocked =
            tokio::time::timeout(std::time::Duration::from_millis(50), pool.checkout()).await;
        assert!(blocked.is_err());

        lease.checkin().await;
        assert_eq!(pool.available(), 1);
    }
}
