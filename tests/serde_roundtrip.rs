use chrono::Utc;
use guarded_query::confidence::{ConfidenceFactors, ConfidenceScore, RoutingDecision};
use guarded_query::correction::{CorrectionResponse, ErrorType};
use guarded_query::execution::{ColumnInfo, ExecutionResult};

#[test]
fn test_correction_response_round_trip() {
    let response = CorrectionResponse {
        original_sql: "SELECT * FROM patients".to_string(),
        corrected_sql: "SELECT * FROM dim_patient".to_string(),
        correction_description: "Replaced relation patients with dim_patient".to_string(),
        retry_count: 1,
        should_retry: true,
        confidence: 0.9,
        error_type: ErrorType::RelationNotFound,
    };
    let json = serde_json::to_string(&response).unwrap();
    assert!(json.contains("\"relation_not_found\""));
    let back: CorrectionResponse = serde_json::from_str(&json).unwrap();
    assert_eq!(back, response);
}

#[test]
fn test_execution_result_round_trip() {
    let mut row = serde_json::Map::new();
    row.insert("department_name".to_string(), serde_json::json!("Cardiology"));
    row.insert("visits".to_string(), serde_json::json!(412));
    row.insert("discharged_on".to_string(), serde_json::Value::Null);
    let mut result = ExecutionResult::new(
        vec![
            ColumnInfo {
                name: "department_name".to_string(),
                data_type: "TEXT".to_string(),
            },
            ColumnInfo {
                name: "visits".to_string(),
                data_type: "INT8".to_string(),
            },
            ColumnInfo {
                name: "discharged_on".to_string(),
                data_type: "DATE".to_string(),
            },
        ],
        vec![row],
        17,
        true,
    );
    result.error_message = Some("row limit reached".to_string());

    let json = serde_json::to_string(&result).unwrap();
    let back: ExecutionResult = serde_json::from_str(&json).unwrap();
    assert_eq!(back, result);
    assert_eq!(back.row_count, 1);
}

#[test]
fn test_confidence_score_round_trip() {
    let score = ConfidenceScore {
        id: "score-1".to_string(),
        query_id: "query-1".to_string(),
        score: 63.5,
        factors: ConfidenceFactors {
            intent_clarity: 1.0,
            schema_match_quality: 0.3,
            sql_complexity_penalty: 0.02,
            retry_penalty: 0.1,
            hallucination_risk: 0.05,
        },
        routing_decision: RoutingDecision::Warning,
        created_at: Utc::now(),
    };
    let json = serde_json::to_string(&score).unwrap();
    assert!(json.contains("\"warning\""));
    let back: ConfidenceScore = serde_json::from_str(&json).unwrap();
    assert_eq!(back, score);
}
