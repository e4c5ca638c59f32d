//! Schema Context Retriever
//!
//! Finds the tables and query patterns most relevant to a natural-language
//! query. Purely advisory: the result feeds SQL generation and correction
//! hints, nothing here touches the warehouse data.

use crate::config::RetrievalConfig;
use crate::error::{GuardError, Result};
use crate::schema_rag::embedder::Embedder;
use crate::schema_rag::vector_store::{EmbeddingType, VectorMatch, VectorQuery, VectorStore};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyRef {
    pub column: String,
    pub ref_table: String,
    pub ref_column: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableContext {
    pub name: String,
    pub description: String,
    pub columns: Vec<String>,
    pub primary_keys: Vec<String>,
    pub foreign_keys: Vec<ForeignKeyRef>,
    pub relevance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternContext {
    pub name: String,
    pub description: String,
    pub template_sql: String,
    pub metrics: Vec<String>,
    pub dimensions: Vec<String>,
    pub relevance: f64,
}

/// Retrieved context for one request; built once and never mutated.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SchemaContext {
    pub tables: Vec<TableContext>,
    pub query_patterns: Vec<PatternContext>,
    pub relevance_score: f64,
}

/// Metadata stored alongside a table embedding
#[derive(Debug, Clone, Default, Deserialize)]
struct TableMetadata {
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    primary_keys: Vec<String>,
    #[serde(default)]
    foreign_keys: Vec<ForeignKeyRef>,
}

/// Metadata stored alongside a query-pattern embedding
#[derive(Debug, Clone, Default, Deserialize)]
struct PatternMetadata {
    #[serde(default)]
    template_sql: String,
    #[serde(default)]
    metrics: Vec<String>,
    #[serde(default)]
    dimensions: Vec<String>,
}

impl SchemaContext {
    /// Render the context as a markdown block for the SQL generator prompt.
    pub fn to_prompt(&self) -> String {
        let mut out = String::from("## Available Tables\n\n");
        for table in &self.tables {
            out.push_str(&format!("### {}\n{}\n\n", table.name, table.description));
            if !table.columns.is_empty() {
                out.push_str(&format!("Columns: {}\n", table.columns.join(", ")));
            }
            if !table.primary_keys.is_empty() {
                out.push_str(&format!("Primary Keys: {}\n", table.primary_keys.join(", ")));
            }
            out.push('\n');
        }

        if !self.query_patterns.is_empty() {
            out.push_str("## Similar Query Patterns\n\n");
            for pattern in &self.query_patterns {
                out.push_str(&format!("### {}\n{}\n\n", pattern.name, pattern.description));
                if !pattern.template_sql.is_empty() {
                    out.push_str(&format!("Template: {}\n\n", pattern.template_sql));
                }
            }
        }
        out
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(|t| t.name.clone()).collect()
    }

    /// Unique column names across all tables, first occurrence order.
    pub fn column_names(&self) -> Vec<String> {
        self.tables
            .iter()
            .flat_map(|t| t.columns.iter().cloned())
            .unique()
            .collect()
    }

    /// Hints for the correction strategies: `table.column` for every column
    /// and `table.column=ref_table.ref_column` for every foreign key.
    pub fn schema_hints(&self) -> Vec<String> {
        let columns = self
            .tables
            .iter()
            .flat_map(|t| t.columns.iter().map(move |c| format!("{}.{}", t.name, c)));
        let keys = self.tables.iter().flat_map(|t| {
            t.foreign_keys
                .iter()
                .map(move |fk| format!("{}.{}={}.{}", t.name, fk.column, fk.ref_table, fk.ref_column))
        });
        columns.chain(keys).unique().collect()
    }
}

/// Schema context retriever
pub struct SchemaRetriever {
    vector_store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    config: RetrievalConfig,
}

impl SchemaRetriever {
    pub fn new(
        vector_store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            vector_store,
            embedder,
            config,
        }
    }

    /// Retrieve relevant schema context for a natural-language query.
    pub async fn retrieve(&self, query_text: &str) -> Result<SchemaContext> {
        debug!("Retrieving schema context for query: {}", query_text);

        let vector = self.embedder.embed(query_text).await.map_err(|e| match e {
            GuardError::Embedding(_) => e,
            other => GuardError::Embedding(other.to_string()),
        })?;

        let table_query = VectorQuery::new(
            EmbeddingType::Table,
            vector.clone(),
            self.config.max_tables * 2,
        );
        let table_matches = self.vector_store.search(&table_query).await.map_err(|e| match e {
            GuardError::Retrieval(_) => e,
            other => GuardError::Retrieval(other.to_string()),
        })?;

        let pattern_query = VectorQuery::new(
            EmbeddingType::QueryPattern,
            vector,
            self.config.max_patterns * 2,
        );
        let pattern_matches = match self.vector_store.search(&pattern_query).await {
            Ok(matches) => matches,
            Err(e) => {
                warn!("Query pattern search failed, continuing without patterns: {}", e);
                Vec::new()
            }
        };

        let tables: Vec<TableContext> = self
            .select(table_matches, self.config.max_tables)
            .into_iter()
            .filter_map(|m| match serde_json::from_value::<TableMetadata>(m.metadata.clone()) {
                Ok(meta) => Some(TableContext {
                    name: m.entity_name,
                    description: m.description,
                    columns: meta.columns,
                    primary_keys: meta.primary_keys,
                    foreign_keys: meta.foreign_keys,
                    relevance: m.similarity,
                }),
                Err(e) => {
                    warn!("Failed to parse table metadata for {}: {}", m.entity_name, e);
                    None
                }
            })
            .collect();

        let query_patterns: Vec<PatternContext> = self
            .select(pattern_matches, self.config.max_patterns)
            .into_iter()
            .filter_map(|m| match serde_json::from_value::<PatternMetadata>(m.metadata.clone()) {
                Ok(meta) => Some(PatternContext {
                    name: m.entity_name,
                    description: m.description,
                    template_sql: meta.template_sql,
                    metrics: meta.metrics,
                    dimensions: meta.dimensions,
                    relevance: m.similarity,
                }),
                Err(e) => {
                    warn!("Failed to parse pattern metadata for {}: {}", m.entity_name, e);
                    None
                }
            })
            .collect();

        let relevance_score = relevance_score(&tables, !query_patterns.is_empty());

        info!(
            "Schema context retrieved: {} tables, {} patterns, relevance {:.2}",
            tables.len(),
            query_patterns.len(),
            relevance_score
        );

        Ok(SchemaContext {
            tables,
            query_patterns,
            relevance_score,
        })
    }

    /// Drop candidates under the similarity floor and keep the best `max`.
    fn select(&self, mut candidates: Vec<VectorMatch>, max: usize) -> Vec<VectorMatch> {
        candidates.retain(|m| m.similarity >= self.config.min_similarity);
        candidates.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(max);
        candidates
    }
}

/// Mean table relevance, boosted 10% (capped at 1.0) when patterns matched.
pub fn relevance_score(tables: &[TableContext], has_patterns: bool) -> f64 {
    if tables.is_empty() {
        return 0.0;
    }
    let mean = tables.iter().map(|t| t.relevance).sum::<f64>() / tables.len() as f64;
    if has_patterns {
        (mean * 1.1).min(1.0)
    } else {
        mean
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema_rag::vector_store::{InMemoryVectorStore, SchemaEmbedding};
    use async_trait::async_trait;

    /// Always embeds to the unit x-axis
    struct AxisEmbedder;

    #[async_trait]
    impl Embedder for AxisEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0, 0.0])
        }
    }

    struct BrokenEmbedder;

    #[async_trait]
    impl Embedder for BrokenEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(GuardError::Config("EMBEDDING_API_KEY is not set".to_string()))
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl VectorStore for BrokenStore {
        async fn search(&self, _query: &VectorQuery) -> Result<Vec<VectorMatch>> {
            Err(GuardError::Storage("connection refused".to_string()))
        }
    }

    /// Unit vector whose cosine with the x-axis is `similarity`
    fn at(similarity: f32) -> Vec<f32> {
        vec![similarity, (1.0 - similarity * similarity).sqrt()]
    }

    fn doc(embedding_type: EmbeddingType, name: &str, similarity: f32) -> SchemaEmbedding {
        let metadata = match embedding_type {
            EmbeddingType::Table => serde_json::json!({"columns": ["id"], "primary_keys": ["id"]}),
            EmbeddingType::QueryPattern => {
                serde_json::json!({"template_sql": format!("SELECT * FROM {}", name)})
            }
        };
        SchemaEmbedding {
            embedding_type,
            entity_name: name.to_string(),
            description: String::new(),
            metadata,
            embedding: at(similarity),
        }
    }

    fn store() -> Arc<InMemoryVectorStore> {
        let store = InMemoryVectorStore::new(2);
        for (name, similarity) in [
            ("dim_doctor", 0.75),
            ("fact_billing", 0.95),
            ("dim_date", 0.3),
            ("dim_patient", 0.85),
            ("dim_department", 0.6),
        ] {
            store.add(doc(EmbeddingType::Table, name, similarity)).unwrap();
        }
        store.add(doc(EmbeddingType::QueryPattern, "monthly_revenue", 0.9)).unwrap();
        store.add(doc(EmbeddingType::QueryPattern, "visit_counts", 0.8)).unwrap();
        store.add(doc(EmbeddingType::QueryPattern, "stock_levels", 0.2)).unwrap();
        Arc::new(store)
    }

    fn retriever(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        max_tables: usize,
        max_patterns: usize,
    ) -> SchemaRetriever {
        SchemaRetriever::new(
            store,
            embedder,
            RetrievalConfig {
                max_tables,
                max_patterns,
                min_similarity: 0.7,
            },
        )
    }

    #[tokio::test]
    async fn test_retrieve_drops_candidates_below_floor() {
        let ctx = retriever(store(), Arc::new(AxisEmbedder), 5, 3)
            .retrieve("revenue per doctor")
            .await
            .unwrap();
        assert_eq!(ctx.table_names(), vec!["fact_billing", "dim_patient", "dim_doctor"]);
        assert!(ctx.tables.iter().all(|t| t.relevance >= 0.7));
        let patterns: Vec<&str> = ctx.query_patterns.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(patterns, vec!["monthly_revenue", "visit_counts"]);
        assert_eq!(ctx.tables[0].columns, vec!["id"]);
    }

    #[tokio::test]
    async fn test_retrieve_truncates_by_descending_similarity() {
        let ctx = retriever(store(), Arc::new(AxisEmbedder), 2, 1)
            .retrieve("revenue per doctor")
            .await
            .unwrap();
        assert_eq!(ctx.table_names(), vec!["fact_billing", "dim_patient"]);
        assert_eq!(ctx.query_patterns.len(), 1);
        assert_eq!(ctx.query_patterns[0].name, "monthly_revenue");
        assert!(ctx.relevance_score > 0.0 && ctx.relevance_score <= 1.0);
    }

    #[tokio::test]
    async fn test_retrieve_embedding_failure() {
        let err = retriever(store(), Arc::new(BrokenEmbedder), 5, 3)
            .retrieve("revenue per doctor")
            .await
            .unwrap_err();
        assert!(matches!(err, GuardError::Embedding(_)));
        assert_eq!(err.kind(), crate::error::ErrorKind::Embedding);
    }

    #[tokio::test]
    async fn test_retrieve_store_failure() {
        let err = retriever(Arc::new(BrokenStore), Arc::new(AxisEmbedder), 5, 3)
            .retrieve("revenue per doctor")
            .await
            .unwrap_err();
        assert!(matches!(err, GuardError::Retrieval(_)));
    }

    #[tokio::test]
    async fn test_retrieve_dimension_mismatch_is_retrieval_error() {
        let store = Arc::new(InMemoryVectorStore::new(3));
        let err = retriever(store, Arc::new(AxisEmbedder), 5, 3)
            .retrieve("revenue per doctor")
            .await
            .unwrap_err();
        assert!(matches!(err, GuardError::Retrieval(_)));
    }

    fn table(name: &str, relevance: f64) -> TableContext {
        TableContext {
            name: name.to_string(),
            description: String::new(),
            columns: vec!["id".to_string(), "amount".to_string()],
            primary_keys: vec!["id".to_string()],
            foreign_keys: vec![],
            relevance,
        }
    }

    #[test]
    fn test_relevance_score() {
        assert_eq!(relevance_score(&[], true), 0.0);
        let tables = vec![table("a", 0.8), table("b", 0.6)];
        assert!((relevance_score(&tables, false) - 0.7).abs() < 1e-9);
        assert!((relevance_score(&tables, true) - 0.77).abs() < 1e-9);
        assert_eq!(relevance_score(&[table("a", 0.95)], true), 1.0);
    }

    #[test]
    fn test_column_names_deduplicated() {
        let ctx = SchemaContext {
            tables: vec![table("a", 0.8), table("b", 0.7)],
            query_patterns: vec![],
            relevance_score: 0.75,
        };
        assert_eq!(ctx.column_names(), vec!["id", "amount"]);
        assert_eq!(ctx.table_names(), vec!["a", "b"]);
    }

    #[test]
    fn test_schema_hints_include_foreign_keys() {
        let mut billing = table("fact_billing", 0.9);
        billing.foreign_keys.push(ForeignKeyRef {
            column: "patient_id".to_string(),
            ref_table: "dim_patient".to_string(),
            ref_column: "patient_id".to_string(),
        });
        let ctx = SchemaContext {
            tables: vec![billing],
            query_patterns: vec![],
            relevance_score: 0.9,
        };
        let hints = ctx.schema_hints();
        assert!(hints.contains(&"fact_billing.amount".to_string()));
        assert!(hints.contains(&"fact_billing.patient_id=dim_patient.patient_id".to_string()));
    }

    #[test]
    fn test_prompt_rendering() {
        let ctx = SchemaContext {
            tables: vec![table("fact_billing", 0.9)],
            query_patterns: vec![],
            relevance_score: 0.9,
        };
        let prompt = ctx.to_prompt();
        assert!(prompt.contains("### fact_billing"));
        assert!(prompt.contains("Columns: id, amount"));
        assert!(!prompt.contains("Similar Query Patterns"));
    }
}
