use guarded_query::confidence::{
    calculate_score, retry_penalty, ConfidenceFactors, ConfidenceScorer, RoutingDecision, Router,
};

#[test]
fn test_routing_boundary_at_seventy() {
    let router = Router::default();
    assert_eq!(router.decide(72.0), RoutingDecision::Normal);
    assert_eq!(router.decide(70.0), RoutingDecision::Normal);
    assert_eq!(router.decide(68.0), RoutingDecision::Warning);
    assert_eq!(router.decide(49.9), RoutingDecision::Clarify);
}

#[test]
fn test_score_never_rises_with_retry_penalty() {
    for intent in [0.2, 0.5, 0.8, 1.0] {
        for schema in [0.3, 0.7, 0.95] {
            let mut previous = f64::MAX;
            for retries in 0..8 {
                let factors = ConfidenceFactors {
                    intent_clarity: intent,
                    schema_match_quality: schema,
                    sql_complexity_penalty: 0.05,
                    retry_penalty: retry_penalty(retries),
                    hallucination_risk: 0.0,
                };
                let score = calculate_score(&factors);
                assert!(score <= previous, "intent {} schema {} retries {}", intent, schema, retries);
                assert!((0.0..=100.0).contains(&score));
                previous = score;
            }
        }
    }
}

#[test]
fn test_corrected_answer_scores_below_first_attempt() {
    let scorer = ConfidenceScorer::default();
    let first = ConfidenceFactors {
        intent_clarity: 0.9,
        schema_match_quality: 0.9,
        sql_complexity_penalty: 0.0,
        retry_penalty: retry_penalty(0),
        hallucination_risk: 0.0,
    };
    let corrected = ConfidenceFactors {
        retry_penalty: retry_penalty(1),
        ..first
    };
    assert!(scorer.score("q", corrected).score < scorer.score("q", first).score);
}
