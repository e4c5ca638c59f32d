#![allow(dead_code)]

use async_trait::async_trait;
use guarded_query::error::{GuardError, Result};
use guarded_query::execution::{ColumnInfo, ExecutionResult, QueryExecutor};
use guarded_query::safety::ParameterizedQuery;
use guarded_query::schema_rag::SchemaContext;
use guarded_query::security::{DecisionSource, PolicyDecision, PolicyDecisionPoint, PolicyInput};
use guarded_query::{GeneratedSql, PipelineConfig, SqlGenerator};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Replays scripted results in order, then succeeds with `fallback`
pub struct ScriptedExecutor {
    script: Mutex<Vec<Result<ExecutionResult>>>,
    seen: Mutex<Vec<String>>,
    fallback: ExecutionResult,
}

impl ScriptedExecutor {
    pub fn new(mut script: Vec<Result<ExecutionResult>>) -> Self {
        script.reverse();
        Self {
            script: Mutex::new(script),
            seen: Mutex::new(Vec::new()),
            fallback: sample_result(3),
        }
    }

    pub fn always(result: ExecutionResult) -> Self {
        Self {
            script: Mutex::new(Vec::new()),
            seen: Mutex::new(Vec::new()),
            fallback: result,
        }
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueryExecutor for ScriptedExecutor {
    async fn execute(&self, query: &ParameterizedQuery) -> Result<ExecutionResult> {
        self.seen.lock().unwrap().push(query.sql.clone());
        let next = self.script.lock().unwrap().pop();
        next.unwrap_or_else(|| Ok(self.fallback.clone()))
    }
}

/// Never finishes on its own
pub struct HangingExecutor {
    pub calls: AtomicUsize,
}

#[async_trait]
impl QueryExecutor for HangingExecutor {
    async fn execute(&self, _query: &ParameterizedQuery) -> Result<ExecutionResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(ExecutionResult::empty())
    }
}

pub struct CountingGenerator {
    pub sql: String,
    pub calls: AtomicUsize,
}

impl CountingGenerator {
    pub fn new(sql: &str) -> Self {
        Self {
            sql: sql.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SqlGenerator for CountingGenerator {
    async fn generate(&self, _query_text: &str, _context: &SchemaContext) -> Result<GeneratedSql> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(GeneratedSql {
            sql: self.sql.clone(),
            intent: Some("kpi".to_string()),
            confidence: Some(0.9),
        })
    }
}

/// Policy service that denies everything
pub struct DenyAll;

#[async_trait]
impl PolicyDecisionPoint for DenyAll {
    async fn evaluate(&self, _input: &PolicyInput) -> Result<PolicyDecision> {
        Ok(PolicyDecision::deny("finance data restricted", DecisionSource::Remote))
    }
}

/// `rows` rows of `department_name`/`total`
pub fn sample_result(rows: usize) -> ExecutionResult {
    let columns = vec![
        ColumnInfo {
            name: "department_name".to_string(),
            data_type: "TEXT".to_string(),
        },
        ColumnInfo {
            name: "total".to_string(),
            data_type: "INT8".to_string(),
        },
    ];
    let rows = (0..rows)
        .map(|i| {
            let mut row = serde_json::Map::new();
            row.insert("department_name".to_string(), serde_json::json!(format!("dept_{}", i)));
            row.insert("total".to_string(), serde_json::json!(1000 * (i + 1)));
            row
        })
        .collect();
    ExecutionResult::new(columns, rows, 5, false)
}

/// Defaults with a permissive guard threshold and millisecond backoff
pub fn test_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.guard.threshold = 0.1;
    config.correction.backoff_base = Duration::from_millis(1);
    config.correction.max_backoff = Duration::from_millis(5);
    config
}

pub fn transient() -> Result<ExecutionResult> {
    Err(GuardError::Transient("connection reset by peer".to_string()))
}
