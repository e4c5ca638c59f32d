//! Audit Trail
//!
//! One append-only event per terminal pipeline outcome.

use crate::confidence::router::RoutingDecision;
use crate::correction::agent::Correction;
use crate::error::{ErrorKind, GuardError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// How a query ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Exhausted,
    Uncorrectable,
    Cancelled,
    OffTopic,
    NeedsClarification,
    /// Stopped by the safety analyzer or the authorization policy
    Blocked,
    Failed,
}

impl AuditOutcome {
    /// Outcome for a query that stopped on `error` before producing a result
    pub fn from_error(error: &GuardError) -> Self {
        match error.kind() {
            ErrorKind::OffTopic => AuditOutcome::OffTopic,
            ErrorKind::NeedsClarification => AuditOutcome::NeedsClarification,
            ErrorKind::Exhausted => AuditOutcome::Exhausted,
            ErrorKind::Uncorrectable => AuditOutcome::Uncorrectable,
            ErrorKind::Cancelled => AuditOutcome::Cancelled,
            ErrorKind::Unauthorized
            | ErrorKind::InjectionSuspected
            | ErrorKind::ForbiddenKeyword
            | ErrorKind::MultiStatement
            | ErrorKind::InvalidIdentifier => AuditOutcome::Blocked,
            _ => AuditOutcome::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub query_id: String,
    pub user_id: Option<String>,
    pub query_text: String,
    pub final_sql: Option<String>,
    pub outcome: AuditOutcome,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
    pub confidence_score: Option<f64>,
    pub routing_decision: Option<RoutingDecision>,
    #[serde(default)]
    pub correction_trail: Vec<Correction>,
    pub attempts: u32,
    pub execution_time_ms: u64,
}

impl AuditEvent {
    pub fn new(query_id: &str, query_text: &str, outcome: AuditOutcome) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            query_id: query_id.to_string(),
            user_id: None,
            query_text: query_text.to_string(),
            final_sql: None,
            outcome,
            error_kind: None,
            error_message: None,
            confidence_score: None,
            routing_decision: None,
            correction_trail: Vec::new(),
            attempts: 0,
            execution_time_ms: 0,
        }
    }

    pub fn with_error(mut self, error: &GuardError) -> Self {
        self.error_kind = Some(error.kind());
        self.error_message = Some(error.to_string());
        self
    }
}

/// Append-only destination for audit events
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: &AuditEvent) -> Result<()>;
}

/// Writes one JSON object per line
pub struct JsonlAuditSink {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonlAuditSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AuditSink for JsonlAuditSink {
    async fn record(&self, event: &AuditEvent) -> Result<()> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| GuardError::Storage(format!("failed to open audit log {}: {}", self.path.display(), e)))?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Keeps events in memory; used when no audit path is configured and in tests
#[derive(Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, event: &AuditEvent) -> Result<()> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event.clone());
        Ok(())
    }
}
