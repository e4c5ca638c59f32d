//! Confidence Scorer
//!
//! `score = clamp((mean(intent_clarity, schema_match_quality) - penalties) * 100, 0, 100)`
//! where penalties are complexity, retry and hallucination risk.

use crate::config::RoutingThresholds;
use crate::confidence::factors::{ConfidenceFactors, ScoreSignals};
use crate::confidence::router::{RoutingDecision, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceScore {
    pub id: String,
    pub query_id: String,
    /// 0..=100
    pub score: f64,
    pub factors: ConfidenceFactors,
    pub routing_decision: RoutingDecision,
    pub created_at: DateTime<Utc>,
}

impl ConfidenceScore {
    pub fn needs_review(&self) -> bool {
        self.routing_decision.needs_review()
    }

    pub fn requires_clarification(&self) -> bool {
        self.routing_decision == RoutingDecision::Clarify
    }
}

/// Deterministic combination of the five factors
pub fn calculate_score(factors: &ConfidenceFactors) -> f64 {
    let base = (factors.intent_clarity + factors.schema_match_quality) / 2.0;
    let penalty =
        factors.sql_complexity_penalty + factors.retry_penalty + factors.hallucination_risk;
    ((base - penalty) * 100.0).clamp(0.0, 100.0)
}

#[derive(Debug, Clone, Default)]
pub struct ConfidenceScorer {
    router: Router,
}

impl ConfidenceScorer {
    pub fn new(thresholds: RoutingThresholds) -> Self {
        Self {
            router: Router::new(thresholds),
        }
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn score(&self, query_id: &str, factors: ConfidenceFactors) -> ConfidenceScore {
        let score = calculate_score(&factors);
        let routing_decision = self.router.decide(score);
        info!(
            "Confidence for query {}: {:.1} ({})",
            query_id, score, routing_decision
        );
        ConfidenceScore {
            id: Uuid::new_v4().to_string(),
            query_id: query_id.to_string(),
            score,
            factors,
            routing_decision,
            created_at: Utc::now(),
        }
    }

    pub fn score_signals(&self, query_id: &str, signals: &ScoreSignals) -> ConfidenceScore {
        self.score(query_id, ConfidenceFactors::from_signals(signals))
    }
}
