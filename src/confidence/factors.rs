//! Confidence factor calculators
//!
//! Each factor is derived from raw request signals. Penalties are capped
//! at 0.3; the other factors live in 0..1.

use crate::safety::inspect::SqlProfile;
use serde::{Deserialize, Serialize};

const JOIN_WEIGHT: f64 = 0.05;
const SUBQUERY_WEIGHT: f64 = 0.08;
const AGGREGATE_WEIGHT: f64 = 0.02;
const WINDOW_WEIGHT: f64 = 0.10;
const CTE_WEIGHT: f64 = 0.07;

/// Upper bound for the complexity and retry penalties
pub const MAX_PENALTY: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ConfidenceFactors {
    pub intent_clarity: f64,
    pub schema_match_quality: f64,
    pub sql_complexity_penalty: f64,
    pub retry_penalty: f64,
    pub hallucination_risk: f64,
}

/// Raw signals gathered while answering one query
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoreSignals {
    pub user_query: String,
    pub generated_sql: String,
    /// Schema entities matched during retrieval
    pub schema_matches: Vec<String>,
    /// Correction attempts consumed
    pub retry_count: u32,
    pub execution_time_ms: Option<u64>,
    pub row_count: usize,
    /// Intent label from the upstream generator: kpi, trend, comparison, breakdown, table
    pub detected_intent: Option<String>,
    pub intent_confidence: f64,
    pub validation_passed: bool,
}

impl ConfidenceFactors {
    pub fn from_signals(signals: &ScoreSignals) -> Self {
        Self {
            intent_clarity: intent_clarity(signals),
            schema_match_quality: schema_match_quality(signals),
            sql_complexity_penalty: sql_complexity_penalty(&signals.generated_sql),
            retry_penalty: retry_penalty(signals.retry_count),
            hallucination_risk: hallucination_risk(signals),
        }
    }
}

pub fn intent_clarity(signals: &ScoreSignals) -> f64 {
    let mut clarity = signals.intent_confidence;

    let query_len = signals.user_query.trim().chars().count();
    if query_len < 10 {
        clarity *= 0.7;
    } else if query_len < 20 {
        clarity *= 0.9;
    }

    let bonus = match signals.detected_intent.as_deref() {
        Some("kpi") => Some(0.1),
        Some("trend") | Some("comparison") | Some("breakdown") => Some(0.05),
        Some("table") => Some(0.0),
        _ => None,
    };
    if let Some(bonus) = bonus {
        clarity = (clarity + bonus).min(1.0);
    }

    if !signals.validation_passed {
        clarity *= 0.6;
    }

    clarity.clamp(0.0, 1.0)
}

pub fn schema_match_quality(signals: &ScoreSignals) -> f64 {
    let matches = signals.schema_matches.len();
    if matches == 0 {
        return 0.3;
    }

    let mut quality = 0.5;
    if matches >= 1 {
        quality += 0.2;
    }
    if matches >= 2 {
        quality += 0.1;
    }
    if matches >= 3 {
        quality += 0.1;
    }
    // Many matches suggest an ambiguous question
    if matches >= 5 {
        quality -= 0.1;
    }
    if matches >= 8 {
        quality -= 0.2;
    }

    match signals.execution_time_ms {
        Some(ms) if ms > 0 && ms < 1_000 => quality += 0.05,
        Some(ms) if ms > 10_000 => quality -= 0.1,
        _ => {}
    }

    f64::clamp(quality, 0.0, 1.0)
}

pub fn sql_complexity_penalty(sql: &str) -> f64 {
    let profile = SqlProfile::from_sql(sql);
    let mut penalty = profile.join_count as f64 * JOIN_WEIGHT
        + profile.subquery_count as f64 * SUBQUERY_WEIGHT
        + profile.aggregate_count as f64 * AGGREGATE_WEIGHT;
    if profile.uses_window_functions {
        penalty += WINDOW_WEIGHT;
    }
    if profile.uses_ctes {
        penalty += CTE_WEIGHT;
    }
    penalty.min(MAX_PENALTY)
}

/// Grows with every correction consumed, so a corrected answer never
/// outscores a first-attempt one.
pub fn retry_penalty(retry_count: u32) -> f64 {
    (retry_count as f64 * 0.1).min(MAX_PENALTY)
}

pub fn hallucination_risk(signals: &ScoreSignals) -> f64 {
    let mut risk = 0.0;

    if signals.row_count == 0 {
        risk += 0.2;
    }
    if signals.row_count > 100_000 {
        risk += 0.15;
    }
    if signals.retry_count > 0 && sql_complexity_penalty(&signals.generated_sql) > 0.15 {
        risk += 0.1;
    }
    if signals.intent_confidence < 0.7 {
        risk += 0.15;
    }
    if signals.schema_matches.len() > 6 {
        risk += 0.1;
    }
    if signals.validation_passed {
        risk -= 0.1;
    }

    f64::clamp(risk, 0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signals() -> ScoreSignals {
        ScoreSignals {
            user_query: "total revenue by department last month".to_string(),
            generated_sql: "SELECT department_name, SUM(amount) FROM fact_billing GROUP BY 1".to_string(),
            schema_matches: vec!["fact_billing".to_string(), "dim_department".to_string()],
            retry_count: 0,
            execution_time_ms: Some(120),
            row_count: 12,
            detected_intent: Some("kpi".to_string()),
            intent_confidence: 0.85,
            validation_passed: true,
        }
    }

    #[test]
    fn test_intent_clarity() {
        let s = signals();
        assert!((intent_clarity(&s) - 0.95).abs() < 1e-9);

        let short = ScoreSignals {
            user_query: "revenue".to_string(),
            detected_intent: None,
            ..signals()
        };
        assert!((intent_clarity(&short) - 0.85 * 0.7).abs() < 1e-9);

        let invalid = ScoreSignals {
            validation_passed: false,
            detected_intent: None,
            ..signals()
        };
        assert!((intent_clarity(&invalid) - 0.85 * 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_schema_match_quality() {
        let s = signals();
        assert!((schema_match_quality(&s) - 0.85).abs() < 1e-9);

        let none = ScoreSignals {
            schema_matches: vec![],
            ..signals()
        };
        assert_eq!(schema_match_quality(&none), 0.3);

        let many = ScoreSignals {
            schema_matches: (0..8).map(|i| format!("t{}", i)).collect(),
            execution_time_ms: Some(20_000),
            ..signals()
        };
        assert!((schema_match_quality(&many) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_complexity_penalty_capped() {
        assert_eq!(sql_complexity_penalty("SELECT 1"), 0.0);
        let joins = "SELECT a.x FROM a JOIN b ON a.id = b.id JOIN c ON b.id = c.id";
        assert!((sql_complexity_penalty(joins) - 0.1).abs() < 1e-9);
        let heavy = "WITH t AS (SELECT id FROM a) SELECT SUM(x) OVER (PARTITION BY y), \
                     (SELECT MAX(z) FROM c) FROM t JOIN b ON t.id = b.id JOIN d ON d.id = b.id";
        assert_eq!(sql_complexity_penalty(heavy), MAX_PENALTY);
    }

    #[test]
    fn test_retry_penalty_monotonic_and_capped() {
        let mut last = 0.0;
        for retries in 0..6 {
            let p = retry_penalty(retries);
            assert!(p >= last);
            last = p;
        }
        assert_eq!(retry_penalty(10), MAX_PENALTY);
    }

    #[test]
    fn test_hallucination_risk() {
        assert_eq!(hallucination_risk(&signals()), 0.0);
        let empty = ScoreSignals {
            row_count: 0,
            intent_confidence: 0.5,
            validation_passed: false,
            ..signals()
        };
        assert!((hallucination_risk(&empty) - 0.35).abs() < 1e-9);
    }
}
