//! Guarded Query Pipeline
//!
//! guard → retrieve → generate → safety → policy → execute/correct →
//! score → route → audit/review.
//!
//! Every terminal outcome, including guard rejections, is written to the
//! audit sink before `run` returns. Outcomes routed to `warning` or
//! `clarify` are also pushed onto the review queue.

use crate::cache::BoundedCache;
use crate::confidence::factors::ScoreSignals;
use crate::confidence::router::RoutingDecision;
use crate::confidence::scorer::{ConfidenceScore, ConfidenceScorer};
use crate::config::PipelineConfig;
use crate::correction::agent::{Correction, CorrectionAgent, CorrectionCache};
use crate::db::connection::init_read_only_pool;
use crate::error::{ErrorKind, GuardError, Result};
use crate::execution::executor::{PgQueryExecutor, QueryExecutor, RetryingExecutor, TransientRetryPolicy};
use crate::execution::result::ExecutionResult;
use crate::execution_loop::orchestrator::{RetryOrchestrator, RetryOutcome, StatementGate};
use crate::execution_loop::retry::RetryPolicy;
use crate::guard::guard::{GuardCache, TopicGuard};
use crate::observability::audit::{AuditEvent, AuditOutcome, AuditSink, JsonlAuditSink, MemoryAuditSink};
use crate::observability::review_queue::{MemoryReviewQueue, ReviewQueue, ReviewQueueEntry, SqliteReviewQueue};
use crate::safety::guardrails::SafetyAnalyzer;
use crate::safety::parameterizer::ParameterizedQuery;
use crate::schema_rag::embedder::OpenAiEmbedder;
use crate::schema_rag::retriever::{SchemaContext, SchemaRetriever};
use crate::schema_rag::vector_store::PgVectorStore;
use crate::security::opa_client::{OpaClient, PolicyDecisionPoint};
use crate::security::policy::{CallerContext, LocalPolicy, PolicyEnforcer};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

/// SQL drafted by an external generator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedSql {
    pub sql: String,
    /// kpi, trend, comparison, breakdown or table
    pub intent: Option<String>,
    pub confidence: Option<f64>,
}

/// Natural-language to SQL drafting; lives outside this crate
#[async_trait]
pub trait SqlGenerator: Send + Sync {
    async fn generate(&self, query_text: &str, context: &SchemaContext) -> Result<GeneratedSql>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query_text: String,
    #[serde(default = "default_locale")]
    pub locale: String,
    pub caller: CallerContext,
    /// Candidate SQL supplied by the caller; the generator is skipped when set
    #[serde(default)]
    pub candidate_sql: Option<String>,
    #[serde(default)]
    pub detected_intent: Option<String>,
    #[serde(default)]
    pub intent_confidence: Option<f64>,
}

fn default_locale() -> String {
    "en".to_string()
}

impl QueryRequest {
    pub fn new(query_text: impl Into<String>, caller: CallerContext) -> Self {
        Self {
            query_text: query_text.into(),
            locale: default_locale(),
            caller,
            candidate_sql: None,
            detected_intent: None,
            intent_confidence: None,
        }
    }

    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.candidate_sql = Some(sql.into());
        self
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }

    pub fn with_intent(mut self, intent: impl Into<String>, confidence: f64) -> Self {
        self.detected_intent = Some(intent.into());
        self.intent_confidence = Some(confidence);
        self
    }
}

/// What the caller gets back for one query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineOutput {
    pub query_id: String,
    /// Withheld when routed to `clarify`
    pub result: Option<ExecutionResult>,
    pub final_sql: Option<String>,
    pub confidence_score: Option<ConfidenceScore>,
    pub routing_decision: Option<RoutingDecision>,
    pub rejection_message: Option<String>,
    pub clarification_message: Option<String>,
    pub warning_message: Option<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub correction_trail: Vec<Correction>,
    pub error_kind: Option<ErrorKind>,
    pub attempts: u32,
}

impl PipelineOutput {
    fn new(query_id: &str) -> Self {
        Self {
            query_id: query_id.to_string(),
            result: None,
            final_sql: None,
            confidence_score: None,
            routing_decision: None,
            rejection_message: None,
            clarification_message: None,
            warning_message: None,
            suggestions: Vec::new(),
            correction_trail: Vec::new(),
            error_kind: None,
            attempts: 0,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error_kind.is_none()
    }
}

/// Re-admits corrected statements through the same safety and policy gates
/// as the caller's first statement.
struct CallerGate<'a> {
    safety: &'a SafetyAnalyzer,
    policy: &'a PolicyEnforcer,
    caller: &'a CallerContext,
}

#[async_trait]
impl<'a> StatementGate for CallerGate<'a> {
    async fn admit(&self, sql: &str) -> Result<ParameterizedQuery> {
        let query = self.safety.prepare(sql)?;
        self.policy.authorize(sql, self.caller).await?;
        Ok(query)
    }
}

pub struct GuardedQueryPipeline {
    guard: TopicGuard,
    retriever: Option<Arc<SchemaRetriever>>,
    generator: Option<Arc<dyn SqlGenerator>>,
    safety: SafetyAnalyzer,
    policy: PolicyEnforcer,
    orchestrator: RetryOrchestrator,
    scorer: ConfidenceScorer,
    audit: Arc<dyn AuditSink>,
    review_queue: Arc<dyn ReviewQueue>,
}

impl GuardedQueryPipeline {
    pub fn builder(config: PipelineConfig, executor: Arc<dyn QueryExecutor>) -> PipelineBuilder {
        PipelineBuilder::new(config, executor)
    }

    /// Wire the production collaborators: read-only Postgres pool, optional
    /// OPA client, pgvector retrieval when an embedding key is set, JSONL
    /// audit and SQLite review queue when their paths are configured.
    pub async fn from_config(config: PipelineConfig) -> Result<Self> {
        let pool = init_read_only_pool(&config.database).await?;

        let mut executor: Arc<dyn QueryExecutor> = Arc::new(PgQueryExecutor::new(
            pool.clone(),
            config.database.query_timeout,
            config.database.max_rows,
        ));
        if config.database.transient_retries > 0 {
            executor = Arc::new(RetryingExecutor::new(
                executor,
                TransientRetryPolicy {
                    max_retries: config.database.transient_retries,
                    base_delay: config.correction.backoff_base,
                },
            ));
        }

        let remote = OpaClient::from_config(&config.policy)?
            .map(|client| Arc::new(client) as Arc<dyn PolicyDecisionPoint>);
        let policy = PolicyEnforcer::new(
            remote,
            LocalPolicy::new(config.policy.privileged_roles.clone()),
            config.policy.strict,
        );

        let retriever = config.embedding.api_key.as_ref().map(|_| {
            Arc::new(SchemaRetriever::new(
                Arc::new(PgVectorStore::new(pool.clone())),
                Arc::new(OpenAiEmbedder::from_config(&config.embedding)),
                config.retrieval.clone(),
            ))
        });

        let audit: Arc<dyn AuditSink> = match &config.observability.audit_log_path {
            Some(path) => Arc::new(JsonlAuditSink::new(path.clone())),
            None => Arc::new(MemoryAuditSink::new()),
        };
        let review_queue: Arc<dyn ReviewQueue> = match &config.observability.review_queue_db {
            Some(path) => Arc::new(SqliteReviewQueue::open(path)?),
            None => Arc::new(MemoryReviewQueue::new()),
        };

        let mut builder = PipelineBuilder::new(config, executor)
            .policy(policy)
            .audit_sink(audit)
            .review_queue(review_queue);
        if let Some(retriever) = retriever {
            builder = builder.retriever(retriever);
        }
        Ok(builder.build())
    }

    pub fn guard(&self) -> &TopicGuard {
        &self.guard
    }

    pub fn scorer(&self) -> &ConfidenceScorer {
        &self.scorer
    }

    /// Answer one query. Never fails: every outcome is described by the
    /// returned output and its `error_kind`.
    pub async fn run(&self, request: &QueryRequest, cancel: &CancellationToken) -> PipelineOutput {
        let query_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        let mut output = PipelineOutput::new(&query_id);

        let verdict = self.guard.guard(&request.query_text, &request.locale);
        if let Some(error) = verdict.to_error() {
            output.rejection_message = verdict.rejection_message.clone();
            output.clarification_message = verdict.clarification_message.clone();
            output.suggestions = verdict.suggestions.clone();
            output.error_kind = Some(error.kind());
            self.record(request, &output, Some(&error), started).await;
            return output;
        }

        let context = self.retrieve(&request.query_text).await;

        let (sql, intent, intent_confidence) = match self.candidate_sql(request, &context).await {
            Ok(generated) => (
                generated.sql,
                request.detected_intent.clone().or(generated.intent),
                request
                    .intent_confidence
                    .or(generated.confidence)
                    .unwrap_or(verdict.confidence),
            ),
            Err(error) => return self.stop(request, output, error, started).await,
        };

        let initial = match self.safety.prepare(&sql) {
            Ok(query) => query,
            Err(error) => return self.stop(request, output, error, started).await,
        };
        let validation_passed = initial.is_safe;

        if let Err(error) = self.policy.authorize(&sql, &request.caller).await {
            return self.stop(request, output, error, started).await;
        }

        let gate = CallerGate {
            safety: &self.safety,
            policy: &self.policy,
            caller: &request.caller,
        };
        let hints = context.schema_hints();
        let outcome = self.orchestrator.run(&sql, initial, &gate, &hints, cancel).await;

        output.attempts = outcome.attempts();
        output.correction_trail = outcome.trail().to_vec();
        let retry_count = outcome.state().correction_count() as u32;

        let (result, final_sql) = match outcome {
            RetryOutcome::Success { result, final_sql, .. } => (result, final_sql),
            failed => {
                output.final_sql = Some(failed.state().last_sql.clone());
                let error = failed.error().unwrap_or(GuardError::Cancelled);
                return self.stop(request, output, error, started).await;
            }
        };

        let signals = ScoreSignals {
            user_query: request.query_text.clone(),
            generated_sql: final_sql.clone(),
            schema_matches: context.table_names(),
            retry_count,
            execution_time_ms: Some(result.execution_time_ms),
            row_count: result.row_count,
            detected_intent: intent,
            intent_confidence,
            validation_passed,
        };
        let score = self.scorer.score_signals(&query_id, &signals);
        let router = self.scorer.router();
        let decision = score.routing_decision;

        match decision {
            RoutingDecision::Normal => {}
            RoutingDecision::Warning => output.warning_message = Some(router.warning_message(score.score)),
            RoutingDecision::Clarify => {
                output.clarification_message = Some(router.clarification_message(&request.query_text))
            }
        }
        if decision.shows_result() {
            output.result = Some(result);
        }
        output.final_sql = Some(final_sql);
        output.routing_decision = Some(decision);

        if decision.needs_review() {
            let entry = ReviewQueueEntry::pending(
                &score,
                router.review_priority(score.score),
                router.escalation_level(score.score, retry_count),
            );
            if let Err(e) = self.review_queue.enqueue(&entry).await {
                warn!("Failed to enqueue query {} for review: {}", query_id, e);
            }
        }

        output.confidence_score = Some(score);
        self.record(request, &output, None, started).await;
        output
    }

    async fn retrieve(&self, query_text: &str) -> SchemaContext {
        let Some(retriever) = &self.retriever else {
            return SchemaContext::default();
        };
        match retriever.retrieve(query_text).await {
            Ok(context) => context,
            Err(e) => {
                warn!("Schema retrieval failed, continuing without context: {}", e);
                SchemaContext::default()
            }
        }
    }

    async fn candidate_sql(&self, request: &QueryRequest, context: &SchemaContext) -> Result<GeneratedSql> {
        if let Some(sql) = &request.candidate_sql {
            return Ok(GeneratedSql {
                sql: sql.clone(),
                intent: None,
                confidence: None,
            });
        }
        match &self.generator {
            Some(generator) => generator.generate(&request.query_text, context).await,
            None => Err(GuardError::Config(
                "no candidate SQL supplied and no SQL generator configured".to_string(),
            )),
        }
    }

    /// Terminal failure: fill in the error, audit, return
    async fn stop(
        &self,
        request: &QueryRequest,
        mut output: PipelineOutput,
        error: GuardError,
        started: Instant,
    ) -> PipelineOutput {
        output.error_kind = Some(error.kind());
        output.rejection_message = match &error {
            GuardError::Cancelled => None,
            GuardError::Uncorrectable(message) => Some(message.clone()),
            other => Some(other.to_string()),
        };
        self.record(request, &output, Some(&error), started).await;
        output
    }

    async fn record(
        &self,
        request: &QueryRequest,
        output: &PipelineOutput,
        error: Option<&GuardError>,
        started: Instant,
    ) {
        let outcome = error.map(AuditOutcome::from_error).unwrap_or(AuditOutcome::Success);
        let mut event = AuditEvent::new(&output.query_id, &request.query_text, outcome);
        if let Some(error) = error {
            event = event.with_error(error);
        }
        event.user_id = Some(request.caller.user_id.clone()).filter(|u| !u.is_empty());
        event.final_sql = output.final_sql.clone();
        event.confidence_score = output.confidence_score.as_ref().map(|s| s.score);
        event.routing_decision = output.routing_decision;
        event.correction_trail = output.correction_trail.clone();
        event.attempts = output.attempts;
        event.execution_time_ms = started.elapsed().as_millis() as u64;

        info!(
            query_id = %output.query_id,
            outcome = ?outcome,
            attempts = output.attempts,
            "Query finished"
        );
        if let Err(e) = self.audit.record(&event).await {
            warn!("Failed to write audit event for query {}: {}", output.query_id, e);
        }
    }
}

/// Assembles a pipeline; caches are created here and injected into the
/// components that share them.
pub struct PipelineBuilder {
    config: PipelineConfig,
    executor: Arc<dyn QueryExecutor>,
    retriever: Option<Arc<SchemaRetriever>>,
    generator: Option<Arc<dyn SqlGenerator>>,
    policy: Option<PolicyEnforcer>,
    audit: Option<Arc<dyn AuditSink>>,
    review_queue: Option<Arc<dyn ReviewQueue>>,
    guard_cache: Option<Arc<GuardCache>>,
    correction_cache: Option<Arc<CorrectionCache>>,
}

impl PipelineBuilder {
    pub fn new(config: PipelineConfig, executor: Arc<dyn QueryExecutor>) -> Self {
        Self {
            config,
            executor,
            retriever: None,
            generator: None,
            policy: None,
            audit: None,
            review_queue: None,
            guard_cache: None,
            correction_cache: None,
        }
    }

    pub fn retriever(mut self, retriever: Arc<SchemaRetriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    pub fn generator(mut self, generator: Arc<dyn SqlGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn policy(mut self, policy: PolicyEnforcer) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn review_queue(mut self, queue: Arc<dyn ReviewQueue>) -> Self {
        self.review_queue = Some(queue);
        self
    }

    /// Share a guard cache between pipelines
    pub fn guard_cache(mut self, cache: Arc<GuardCache>) -> Self {
        self.guard_cache = Some(cache);
        self
    }

    /// Share a correction cache between pipelines
    pub fn correction_cache(mut self, cache: Arc<CorrectionCache>) -> Self {
        self.correction_cache = Some(cache);
        self
    }

    pub fn build(self) -> GuardedQueryPipeline {
        let config = self.config;
        let guard_cache = self
            .guard_cache
            .unwrap_or_else(|| Arc::new(BoundedCache::new(config.guard.cache_capacity)));
        let correction_cache = self
            .correction_cache
            .unwrap_or_else(|| Arc::new(BoundedCache::new(config.correction_cache_capacity)));

        let agent = Arc::new(CorrectionAgent::new(config.correction.max_retries, correction_cache));
        let orchestrator = RetryOrchestrator::new(
            self.executor,
            agent,
            RetryPolicy::from_config(&config.correction),
        );

        GuardedQueryPipeline {
            guard: TopicGuard::new(config.guard.threshold, guard_cache),
            retriever: self.retriever,
            generator: self.generator,
            safety: SafetyAnalyzer::new(config.injection_policy),
            policy: self
                .policy
                .unwrap_or_else(|| PolicyEnforcer::local_only(LocalPolicy::new(config.policy.privileged_roles.clone()))),
            orchestrator,
            scorer: ConfidenceScorer::new(config.routing),
            audit: self.audit.unwrap_or_else(|| Arc::new(MemoryAuditSink::new())),
            review_queue: self.review_queue.unwrap_or_else(|| Arc::new(MemoryReviewQueue::new())),
        }
    }
}
