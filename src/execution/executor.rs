//! Query Executor
//!
//! Runs parameterized statements against the read-only warehouse pool.
//! Failures come back as exactly one of two kinds: `Transient` (timeouts,
//! connection trouble, deadlocks, "try again") or `Rejected` (anything else
//! the database reported, message passed through verbatim).

use crate::error::{GuardError, Result};
use crate::execution::result::{ColumnInfo, ExecutionResult, Row};
use crate::safety::parameterizer::{ParamValue, ParameterizedQuery};
use async_trait::async_trait;
use futures_util::TryStreamExt;
use serde::Serialize;
use sqlx::postgres::{PgArguments, PgPool, PgRow};
use sqlx::{Column, Postgres, Row as _, TypeInfo};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const TRANSIENT_MESSAGES: &[&str] = &[
    "connection reset",
    "connection refused",
    "statement timeout",
    "timed out",
    "deadlock",
    "try again",
    "too many connections",
];

#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Execute one statement. Errors are `Transient` or `Rejected`.
    async fn execute(&self, query: &ParameterizedQuery) -> Result<ExecutionResult>;
}

pub fn is_transient_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    TRANSIENT_MESSAGES.iter().any(|p| lower.contains(p))
}

/// SQLSTATE codes worth retrying unchanged: connection exceptions (08xxx),
/// serialization failure, deadlock, statement timeout, too many connections.
fn is_transient_sqlstate(code: &str) -> bool {
    code.starts_with("08") || matches!(code, "40001" | "40P01" | "57014" | "53300")
}

/// Map a driver error onto the executor's two failure kinds.
pub fn classify_sqlx_error(err: sqlx::Error) -> GuardError {
    match &err {
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::WorkerCrashed => GuardError::Transient(err.to_string()),
        sqlx::Error::Database(db) => {
            let message = db.message().to_string();
            // A reported SQLSTATE is authoritative; the message is only
            // consulted when the server sent no code.
            let transient = match db.code() {
                Some(code) => is_transient_sqlstate(&code),
                None => is_transient_message(&message),
            };
            if transient {
                GuardError::Transient(message)
            } else {
                GuardError::Rejected(message)
            }
        }
        _ => {
            let message = err.to_string();
            if is_transient_message(&message) {
                GuardError::Transient(message)
            } else {
                GuardError::Rejected(message)
            }
        }
    }
}

/// Linear backoff for immediate transient retries
#[derive(Debug, Clone)]
pub struct TransientRetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for TransientRetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
        }
    }
}

impl TransientRetryPolicy {
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.base_delay * (attempt + 1)
    }
}

/// Execute, retrying only `Transient` failures. `Rejected` returns at once:
/// the same statement would fail the same way.
pub async fn execute_with_retry(
    executor: &dyn QueryExecutor,
    query: &ParameterizedQuery,
    policy: &TransientRetryPolicy,
) -> Result<ExecutionResult> {
    let mut attempt = 0;
    loop {
        match executor.execute(query).await {
            Err(GuardError::Transient(message)) if attempt < policy.max_retries => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    "Transient execution failure (retry {}/{} in {:?}): {}",
                    attempt + 1,
                    policy.max_retries,
                    delay,
                    message
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// Executor wrapper applying [`execute_with_retry`] to every call
pub struct RetryingExecutor {
    inner: Arc<dyn QueryExecutor>,
    policy: TransientRetryPolicy,
}

impl RetryingExecutor {
    pub fn new(inner: Arc<dyn QueryExecutor>, policy: TransientRetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl QueryExecutor for RetryingExecutor {
    async fn execute(&self, query: &ParameterizedQuery) -> Result<ExecutionResult> {
        execute_with_retry(self.inner.as_ref(), query, &self.policy).await
    }
}

/// PostgreSQL executor over a read-only pool
pub struct PgQueryExecutor {
    pool: PgPool,
    timeout: Duration,
    max_rows: usize,
}

impl PgQueryExecutor {
    pub fn new(pool: PgPool, timeout: Duration, max_rows: usize) -> Self {
        Self {
            pool,
            timeout,
            max_rows,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn run(&self, query: &ParameterizedQuery) -> Result<(Vec<ColumnInfo>, Vec<Row>, bool)> {
        let mut tx = self.pool.begin().await.map_err(classify_sqlx_error)?;

        // The pool already defaults to read-only sessions; this pins the
        // transaction even if that setting is overridden server-side.
        sqlx::query("SET TRANSACTION READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(classify_sqlx_error)?;
        sqlx::query(&format!("SET LOCAL statement_timeout = {}", self.timeout.as_millis()))
            .execute(&mut *tx)
            .await
            .map_err(classify_sqlx_error)?;

        let mut statement = sqlx::query(&query.sql);
        for param in &query.parameters {
            statement = bind_param(statement, param);
        }

        let mut columns = Vec::new();
        let mut rows = Vec::new();
        let mut truncated = false;
        {
            let mut stream = statement.fetch(&mut *tx);
            while let Some(row) = stream.try_next().await.map_err(classify_sqlx_error)? {
                if rows.len() >= self.max_rows {
                    truncated = true;
                    break;
                }
                if columns.is_empty() {
                    columns = describe_columns(&row);
                }
                rows.push(row_to_map(&row));
            }
        }

        tx.rollback().await.map_err(classify_sqlx_error)?;
        Ok((columns, rows, truncated))
    }
}

#[async_trait]
impl QueryExecutor for PgQueryExecutor {
    async fn execute(&self, query: &ParameterizedQuery) -> Result<ExecutionResult> {
        let start = Instant::now();
        debug!("Executing statement with {} parameters", query.parameters.len());

        let (columns, rows, truncated) = match tokio::time::timeout(self.timeout, self.run(query)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(GuardError::Transient(format!(
                    "query timeout after {}ms",
                    self.timeout.as_millis()
                )))
            }
        };

        let elapsed = start.elapsed().as_millis() as u64;
        info!(
            "Query returned {} rows in {}ms{}",
            rows.len(),
            elapsed,
            if truncated { " (truncated)" } else { "" }
        );
        Ok(ExecutionResult::new(columns, rows, elapsed, truncated))
    }
}

type PgQuery<'q> = sqlx::query::Query<'q, Postgres, PgArguments>;

fn bind_param<'q>(statement: PgQuery<'q>, param: &ParamValue) -> PgQuery<'q> {
    match param {
        ParamValue::Text(s) => statement.bind(s.clone()),
        ParamValue::Integer(i) => statement.bind(*i),
        ParamValue::Float(f) => statement.bind(*f),
        ParamValue::Date(d) => statement.bind(*d),
        ParamValue::Timestamp(ts) => statement.bind(*ts),
    }
}

fn describe_columns(row: &PgRow) -> Vec<ColumnInfo> {
    row.columns()
        .iter()
        .map(|c| ColumnInfo {
            name: c.name().to_string(),
            data_type: c.type_info().name().to_string(),
        })
        .collect()
}

fn row_to_map(row: &PgRow) -> Row {
    let mut map = Row::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let value = decode_value(row, idx, column.type_info().name());
        map.insert(column.name().to_string(), value);
    }
    map
}

fn get_json<T>(row: &PgRow, idx: usize) -> std::result::Result<serde_json::Value, sqlx::Error>
where
    T: for<'r> sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres> + Serialize,
{
    let value: Option<T> = row.try_get(idx)?;
    Ok(serde_json::to_value(value).unwrap_or(serde_json::Value::Null))
}

fn decode_value(row: &PgRow, idx: usize, type_name: &str) -> serde_json::Value {
    use serde_json::Value;

    let decoded = match type_name {
        "BOOL" => get_json::<bool>(row, idx),
        "INT2" => get_json::<i16>(row, idx),
        "INT4" => get_json::<i32>(row, idx),
        "INT8" => get_json::<i64>(row, idx),
        "FLOAT4" => get_json::<f32>(row, idx),
        "FLOAT8" => get_json::<f64>(row, idx),
        "NUMERIC" => row
            .try_get::<Option<sqlx::types::BigDecimal>, _>(idx)
            .map(|v| match v {
                Some(d) => {
                    let text = d.to_string();
                    match text.parse::<f64>() {
                        Ok(f) if f.is_finite() => serde_json::json!(f),
                        _ => Value::String(text),
                    }
                }
                None => Value::Null,
            }),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CITEXT" => get_json::<String>(row, idx),
        "DATE" => get_json::<chrono::NaiveDate>(row, idx),
        "TIMESTAMP" => get_json::<chrono::NaiveDateTime>(row, idx),
        "TIMESTAMPTZ" => get_json::<chrono::DateTime<chrono::Utc>>(row, idx),
        "UUID" => row
            .try_get::<Option<sqlx::types::Uuid>, _>(idx)
            .map(|v| v.map(|u| Value::String(u.to_string())).unwrap_or(Value::Null)),
        "JSON" | "JSONB" => get_json::<Value>(row, idx),
        other => {
            debug!("No decoder for column type {}, returning null", other);
            Ok(Value::Null)
        }
    };

    decoded.unwrap_or_else(|e| {
        debug!("Failed to decode column {} ({}): {}", idx, type_name, e);
        Value::Null
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Flaky {
        calls: AtomicUsize,
        failures: usize,
        error: fn() -> GuardError,
    }

    #[async_trait]
    impl QueryExecutor for Flaky {
        async fn execute(&self, _query: &ParameterizedQuery) -> Result<ExecutionResult> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err((self.error)())
            } else {
                Ok(ExecutionResult::empty())
            }
        }
    }

    fn fast_policy() -> TransientRetryPolicy {
        TransientRetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn test_transient_messages() {
        assert!(is_transient_message("read: connection reset by peer"));
        assert!(is_transient_message("deadlock detected"));
        assert!(is_transient_message("Please try again later"));
        assert!(is_transient_message("canceling statement due to statement timeout"));
        assert!(is_transient_message("pool timed out while waiting for an open connection"));
        assert!(!is_transient_message("relation \"patients\" does not exist"));
        assert!(!is_transient_message("column \"session_timeout\" does not exist"));
    }

    #[test]
    fn test_transient_sqlstate() {
        assert!(is_transient_sqlstate("08006"));
        assert!(is_transient_sqlstate("40P01"));
        assert!(is_transient_sqlstate("57014"));
        assert!(!is_transient_sqlstate("42P01"));
    }

    #[test]
    fn test_pool_timeout_is_transient() {
        assert!(matches!(
            classify_sqlx_error(sqlx::Error::PoolTimedOut),
            GuardError::Transient(_)
        ));
        assert!(matches!(
            classify_sqlx_error(sqlx::Error::RowNotFound),
            GuardError::Rejected(_)
        ));
    }

    #[derive(Debug)]
    struct FakeDbError {
        code: Option<&'static str>,
        message: &'static str,
    }

    impl std::fmt::Display for FakeDbError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(self.message)
        }
    }

    impl std::error::Error for FakeDbError {}

    impl sqlx::error::DatabaseError for FakeDbError {
        fn message(&self) -> &str {
            self.message
        }

        fn code(&self) -> Option<std::borrow::Cow<'_, str>> {
            self.code.map(std::borrow::Cow::Borrowed)
        }

        fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn std::error::Error + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> sqlx::error::ErrorKind {
            sqlx::error::ErrorKind::Other
        }
    }

    fn db_error(code: Option<&'static str>, message: &'static str) -> sqlx::Error {
        sqlx::Error::Database(Box::new(FakeDbError { code, message }))
    }

    #[test]
    fn test_sqlstate_decides_over_message() {
        let err = classify_sqlx_error(db_error(
            Some("42703"),
            "column \"session_timeout\" does not exist",
        ));
        match err {
            GuardError::Rejected(message) => {
                assert_eq!(message, "column \"session_timeout\" does not exist")
            }
            other => panic!("unexpected: {:?}", other),
        }

        assert!(matches!(
            classify_sqlx_error(db_error(Some("57014"), "canceling statement due to statement timeout")),
            GuardError::Transient(_)
        ));
        assert!(matches!(
            classify_sqlx_error(db_error(Some("40P01"), "deadlock detected")),
            GuardError::Transient(_)
        ));
    }

    #[test]
    fn test_message_used_without_sqlstate() {
        assert!(matches!(
            classify_sqlx_error(db_error(None, "server asked to try again")),
            GuardError::Transient(_)
        ));
        assert!(matches!(
            classify_sqlx_error(sqlx::Error::Protocol(
                "column \"session_timeout\" does not exist".to_string()
            )),
            GuardError::Rejected(_)
        ));
    }

    #[test]
    fn test_linear_backoff() {
        let policy = TransientRetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let executor = Flaky {
            calls: AtomicUsize::new(0),
            failures: 2,
            error: || GuardError::Transient("timeout".to_string()),
        };
        let query = ParameterizedQuery::trusted("SELECT 1", vec![]);
        let result = execute_with_retry(&executor, &query, &fast_policy()).await;
        assert!(result.is_ok());
        assert_eq!(executor.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_rejected_is_not_retried() {
        let executor = Flaky {
            calls: AtomicUsize::new(0),
            failures: 10,
            error: || GuardError::Rejected("syntax error at or near \"FORM\"".to_string()),
        };
        let query = ParameterizedQuery::trusted("SELECT 1", vec![]);
        let err = execute_with_retry(&executor, &query, &fast_policy()).await.unwrap_err();
        assert!(matches!(err, GuardError::Rejected(_)));
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_budget_exhausted() {
        let executor = Flaky {
            calls: AtomicUsize::new(0),
            failures: 10,
            error: || GuardError::Transient("connection refused".to_string()),
        };
        let query = ParameterizedQuery::trusted("SELECT 1", vec![]);
        let err = execute_with_retry(&executor, &query, &fast_policy()).await.unwrap_err();
        assert!(matches!(err, GuardError::Transient(_)));
        assert_eq!(executor.calls.load(Ordering::SeqCst), 4);
    }
}
