// SPDX-License-Identifier: Apache-2.0

//! Execution layer: source abstraction, session pool, executor adapter.

pub mod adapter;
pub mod pool;
pub mod traits;
pub mod types;

pub use adapter::ExecutorAdapter;
pub use pool::{PooledSession, SessionPool};
pub use traits::{DataSource, SourceSession};
pub use types::{Column, ExecutionId, QueryOutput, ResultSet, Row, Value};
