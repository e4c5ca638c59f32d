//! Review Queue
//!
//! Low-confidence outcomes handed off for human review. The pipeline only
//! ever enqueues; status changes come from a reviewer.

use crate::confidence::router::{EscalationLevel, ReviewPriority, RoutingDecision};
use crate::confidence::scorer::ConfidenceScore;
use crate::error::{GuardError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    Pending,
    Reviewed,
    Resolved,
    Dismissed,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Pending => "pending",
            ReviewStatus::Reviewed => "reviewed",
            ReviewStatus::Resolved => "resolved",
            ReviewStatus::Dismissed => "dismissed",
        }
    }
}

impl FromStr for ReviewStatus {
    type Err = GuardError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(ReviewStatus::Pending),
            "reviewed" => Ok(ReviewStatus::Reviewed),
            "resolved" => Ok(ReviewStatus::Resolved),
            "dismissed" => Ok(ReviewStatus::Dismissed),
            other => Err(GuardError::Storage(format!("unknown review status '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewQueueEntry {
    pub id: String,
    pub query_id: String,
    pub score_id: String,
    pub score: f64,
    pub routing_decision: RoutingDecision,
    pub priority: ReviewPriority,
    pub escalation: EscalationLevel,
    pub status: ReviewStatus,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub resolution: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ReviewQueueEntry {
    /// Pending entry for a scored query
    pub fn pending(score: &ConfidenceScore, priority: ReviewPriority, escalation: EscalationLevel) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            query_id: score.query_id.clone(),
            score_id: score.id.clone(),
            score: score.score,
            routing_decision: score.routing_decision,
            priority,
            escalation,
            status: ReviewStatus::Pending,
            reviewed_by: None,
            reviewed_at: None,
            resolution: None,
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait ReviewQueue: Send + Sync {
    async fn enqueue(&self, entry: &ReviewQueueEntry) -> Result<()>;
}

/// SQLite-backed queue
pub struct SqliteReviewQueue {
    db: Arc<Mutex<Connection>>,
}

impl SqliteReviewQueue {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS review_queue (
                id TEXT PRIMARY KEY,
                query_id TEXT NOT NULL,
                score_id TEXT NOT NULL,
                score REAL NOT NULL,
                routing_decision TEXT NOT NULL,
                priority TEXT NOT NULL,
                escalation TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                reviewed_by TEXT,
                reviewed_at TEXT,
                resolution TEXT,
                created_at TEXT NOT NULL
            )
            "#,
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_review_queue_status ON review_queue(status)",
            [],
        )?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(db: &Mutex<Connection>) -> Result<std::sync::MutexGuard<'_, Connection>> {
        db.lock()
            .map_err(|_| GuardError::Storage("review queue lock poisoned".to_string()))
    }

    /// Record a reviewer's decision. Returns false when the entry does not exist.
    pub fn mark_reviewed(
        &self,
        id: &str,
        reviewer: &str,
        status: ReviewStatus,
        resolution: Option<&str>,
    ) -> Result<bool> {
        let db = Self::lock(&self.db)?;
        let updated = db.execute(
            "UPDATE review_queue SET status = ?2, reviewed_by = ?3, reviewed_at = ?4, resolution = ?5 WHERE id = ?1",
            params![id, status.as_str(), reviewer, Utc::now().to_rfc3339(), resolution],
        )?;
        Ok(updated > 0)
    }

    pub fn get(&self, id: &str) -> Result<Option<ReviewQueueEntry>> {
        let db = Self::lock(&self.db)?;
        let raw = db
            .query_row(
                "SELECT id, query_id, score_id, score, routing_decision, priority, escalation, status, \
                 reviewed_by, reviewed_at, resolution, created_at FROM review_queue WHERE id = ?1",
                params![id],
                RawEntry::from_row,
            )
            .optional()?;
        raw.map(RawEntry::into_entry).transpose()
    }

    /// Entries in `status`, oldest first
    pub fn list(&self, status: ReviewStatus, limit: usize) -> Result<Vec<ReviewQueueEntry>> {
        let db = Self::lock(&self.db)?;
        let mut stmt = db.prepare(
            "SELECT id, query_id, score_id, score, routing_decision, priority, escalation, status, \
             reviewed_by, reviewed_at, resolution, created_at FROM review_queue \
             WHERE status = ?1 ORDER BY created_at ASC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![status.as_str(), limit as i64], RawEntry::from_row)?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?.into_entry()?);
        }
        Ok(entries)
    }

    pub fn count(&self, status: ReviewStatus) -> Result<usize> {
        let db = Self::lock(&self.db)?;
        let count: i64 = db.query_row(
            "SELECT COUNT(*) FROM review_queue WHERE status = ?1",
            params![status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

#[async_trait]
impl ReviewQueue for SqliteReviewQueue {
    async fn enqueue(&self, entry: &ReviewQueueEntry) -> Result<()> {
        let db = Arc::clone(&self.db);
        let entry = entry.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = Self::lock(&db)?;
            conn.execute(
                r#"
                INSERT INTO review_queue
                (id, query_id, score_id, score, routing_decision, priority, escalation, status,
                 reviewed_by, reviewed_at, resolution, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                "#,
                params![
                    entry.id,
                    entry.query_id,
                    entry.score_id,
                    entry.score,
                    entry.routing_decision.as_str(),
                    entry.priority.as_str(),
                    entry.escalation.as_str(),
                    entry.status.as_str(),
                    entry.reviewed_by,
                    entry.reviewed_at.map(|t| t.to_rfc3339()),
                    entry.resolution,
                    entry.created_at.to_rfc3339(),
                ],
            )?;
            info!("Queued query {} for {} review", entry.query_id, entry.priority);
            Ok(())
        })
        .await
        .map_err(|e| GuardError::Storage(format!("review queue task failed: {}", e)))?
    }
}

/// Column values as stored, before enum/timestamp parsing
struct RawEntry {
    id: String,
    query_id: String,
    score_id: String,
    score: f64,
    routing_decision: String,
    priority: String,
    escalation: String,
    status: String,
    reviewed_by: Option<String>,
    reviewed_at: Option<String>,
    resolution: Option<String>,
    created_at: String,
}

impl RawEntry {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            query_id: row.get(1)?,
            score_id: row.get(2)?,
            score: row.get(3)?,
            routing_decision: row.get(4)?,
            priority: row.get(5)?,
            escalation: row.get(6)?,
            status: row.get(7)?,
            reviewed_by: row.get(8)?,
            reviewed_at: row.get(9)?,
            resolution: row.get(10)?,
            created_at: row.get(11)?,
        })
    }

    fn into_entry(self) -> Result<ReviewQueueEntry> {
        Ok(ReviewQueueEntry {
            id: self.id,
            query_id: self.query_id,
            score_id: self.score_id,
            score: self.score,
            routing_decision: parse_tag(&self.routing_decision)?,
            priority: parse_tag(&self.priority)?,
            escalation: parse_tag(&self.escalation)?,
            status: self.status.parse()?,
            reviewed_by: self.reviewed_by,
            reviewed_at: self.reviewed_at.as_deref().map(parse_time).transpose()?,
            resolution: self.resolution,
            created_at: parse_time(&self.created_at)?,
        })
    }
}

/// Decode a lowercase serde tag such as `warning` or `high`
fn parse_tag<T: serde::de::DeserializeOwned>(tag: &str) -> Result<T> {
    Ok(serde_json::from_value(serde_json::Value::String(tag.to_string()))?)
}

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| GuardError::Storage(format!("bad timestamp '{}': {}", value, e)))
}

/// In-process queue; entries are never removed
#[derive(Default)]
pub struct MemoryReviewQueue {
    entries: Mutex<Vec<ReviewQueueEntry>>,
}

impl MemoryReviewQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<ReviewQueueEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl ReviewQueue for MemoryReviewQueue {
    async fn enqueue(&self, entry: &ReviewQueueEntry) -> Result<()> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(entry.clone());
        Ok(())
    }
}
