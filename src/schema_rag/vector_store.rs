//! Vector Store Abstraction
//!
//! Similarity search over schema embeddings (tables, query patterns).
//! `InMemoryVectorStore` does exact cosine search; `PgVectorStore` delegates
//! to a pgvector table in the warehouse.

use crate::error::{GuardError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPool;
use sqlx::Row;
use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

/// Vector embedding (simple f32 vector)
pub type Embedding = Vec<f32>;

/// Kind of entity an embedding describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingType {
    Table,
    QueryPattern,
}

impl EmbeddingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingType::Table => "table",
            EmbeddingType::QueryPattern => "query_pattern",
        }
    }
}

impl fmt::Display for EmbeddingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored schema embedding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaEmbedding {
    pub embedding_type: EmbeddingType,
    pub entity_name: String,
    pub description: String,
    /// Table metadata or query-pattern metadata, depending on the type
    pub metadata: serde_json::Value,
    #[serde(skip)]
    pub embedding: Embedding,
}

/// Similarity search request
#[derive(Debug, Clone)]
pub struct VectorQuery {
    pub embedding_type: EmbeddingType,
    pub vector: Embedding,
    pub limit: usize,
    /// Exact-match filters on string fields of the metadata
    pub filters: HashMap<String, String>,
}

impl VectorQuery {
    pub fn new(embedding_type: EmbeddingType, vector: Embedding, limit: usize) -> Self {
        Self {
            embedding_type,
            vector,
            limit,
            filters: HashMap::new(),
        }
    }
}

/// Ranked search hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMatch {
    pub entity_name: String,
    pub description: String,
    pub metadata: serde_json::Value,
    pub similarity: f64,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Return up to `limit` matches, best first.
    async fn search(&self, query: &VectorQuery) -> Result<Vec<VectorMatch>>;
}

/// Cosine similarity; zero when either vector has no magnitude or the
/// lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Exact in-memory cosine search
pub struct InMemoryVectorStore {
    dimension: usize,
    documents: RwLock<Vec<SchemaEmbedding>>,
}

impl InMemoryVectorStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            documents: RwLock::new(Vec::new()),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn add(&self, document: SchemaEmbedding) -> Result<()> {
        if document.embedding.len() != self.dimension {
            return Err(GuardError::Retrieval(format!(
                "Embedding dimension {} doesn't match store dimension {} for '{}'",
                document.embedding.len(),
                self.dimension,
                document.entity_name
            )));
        }
        self.documents
            .write()
            .map_err(|_| GuardError::Retrieval("vector store lock poisoned".to_string()))?
            .push(document);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.documents.read().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn search(&self, query: &VectorQuery) -> Result<Vec<VectorMatch>> {
        if query.vector.len() != self.dimension {
            return Err(GuardError::Retrieval(format!(
                "Query embedding dimension {} doesn't match store dimension {}",
                query.vector.len(),
                self.dimension
            )));
        }

        let documents = self
            .documents
            .read()
            .map_err(|_| GuardError::Retrieval("vector store lock poisoned".to_string()))?;

        let mut matches: Vec<VectorMatch> = documents
            .iter()
            .filter(|doc| doc.embedding_type == query.embedding_type)
            .filter(|doc| {
                query.filters.iter().all(|(key, value)| {
                    doc.metadata.get(key).and_then(|v| v.as_str()) == Some(value.as_str())
                })
            })
            .map(|doc| VectorMatch {
                entity_name: doc.entity_name.clone(),
                description: doc.description.clone(),
                metadata: doc.metadata.clone(),
                similarity: cosine_similarity(&query.vector, &doc.embedding),
            })
            .collect();

        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(query.limit);
        Ok(matches)
    }
}

/// pgvector-backed store reading `schema_embeddings`
/// (`embedding_type`, `entity_name`, `description`, `metadata jsonb`, `embedding vector`).
pub struct PgVectorStore {
    pool: PgPool,
}

impl PgVectorStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn vector_literal(vector: &[f32]) -> String {
    let parts: Vec<String> = vector.iter().map(|v| v.to_string()).collect();
    format!("[{}]", parts.join(","))
}

#[async_trait]
impl VectorStore for PgVectorStore {
    async fn search(&self, query: &VectorQuery) -> Result<Vec<VectorMatch>> {
        let rows = sqlx::query(
            r#"
            SELECT entity_name, description, metadata,
                   1 - (embedding <=> $1::vector) AS similarity
            FROM schema_embeddings
            WHERE embedding_type = $2
            ORDER BY embedding <=> $1::vector
            LIMIT $3
            "#,
        )
        .bind(vector_literal(&query.vector))
        .bind(query.embedding_type.as_str())
        .bind(query.limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| GuardError::Retrieval(format!("vector search failed: {}", e)))?;

        let mut matches = Vec::with_capacity(rows.len());
        for row in rows {
            let metadata: serde_json::Value = row
                .try_get("metadata")
                .map_err(|e| GuardError::Retrieval(e.to_string()))?;
            let keep = query.filters.iter().all(|(key, value)| {
                metadata.get(key).and_then(|v| v.as_str()) == Some(value.as_str())
            });
            if !keep {
                continue;
            }
            matches.push(VectorMatch {
                entity_name: row
                    .try_get("entity_name")
                    .map_err(|e| GuardError::Retrieval(e.to_string()))?,
                description: row
                    .try_get::<Option<String>, _>("description")
                    .map_err(|e| GuardError::Retrieval(e.to_string()))?
                    .unwrap_or_default(),
                metadata,
                similarity: row
                    .try_get("similarity")
                    .map_err(|e| GuardError::Retrieval(e.to_string()))?,
            });
        }
        Ok(matches)
    }
}
