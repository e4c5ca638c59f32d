use guarded_query::error::GuardError;
use guarded_query::safety::{
    extract_parameters, parameterize, validate_for_read_only, SafetyAnalyzer, FORBIDDEN_KEYWORDS,
};

const LITERAL_STATEMENTS: &[&str] = &[
    "SELECT * FROM dim_patient WHERE patient_name = 'Ahmed'",
    "SELECT * FROM t WHERE a = 'x' AND b = 'it''s' LIMIT 5",
    "SELECT COUNT(*) FROM fact_billing WHERE status IN ('paid', 'pending') AND amount > 250.75",
    "SELECT * FROM fact_appointments WHERE visit_date >= DATE '2024-01-01'",
    "SELECT * FROM t WHERE note = '; DROP TABLE users; --'",
    "SELECT 'a' || 'b' AS joined FROM t",
    "SELECT \"Patient Name\" FROM dim_patient WHERE city = 'Riyadh'",
];

#[test]
fn test_literals_never_survive_parameterization() {
    for sql in LITERAL_STATEMENTS {
        let query = parameterize(sql);
        assert!(!query.sql.contains('\''), "quote left in {:?}", query.sql);
        assert_eq!(
            query.parameters.len(),
            extract_parameters(&query.sql).len(),
            "placeholder count mismatch for {}",
            sql
        );
        assert!(!query.parameters.is_empty());
    }
}

#[test]
fn test_parameterize_is_idempotent() {
    for sql in LITERAL_STATEMENTS {
        let once = parameterize(sql);
        let twice = parameterize(&once.sql);
        assert_eq!(once.sql, twice.sql, "{}", sql);
        assert!(twice.parameters.is_empty(), "{}", sql);
    }
}

#[test]
fn test_every_mutating_keyword_rejected() {
    let analyzer = SafetyAnalyzer::default();
    for keyword in FORBIDDEN_KEYWORDS {
        let upper = format!("SELECT * FROM t WHERE x IN (SELECT 1) {} y", keyword);
        let lower = upper.to_lowercase();
        for sql in [upper, lower] {
            assert!(
                matches!(validate_for_read_only(&sql), Err(GuardError::ForbiddenKeyword(_))),
                "{}",
                sql
            );
            assert!(analyzer.prepare(&sql).unwrap_err().is_safety_violation());
        }
    }
}

#[test]
fn test_keyword_fragments_are_not_keywords() {
    for sql in [
        "SELECT updated_at, created_by, dropped_flag FROM audit_rows",
        "SELECT callback_count FROM fact_calls",
    ] {
        assert!(validate_for_read_only(sql).is_ok(), "{}", sql);
    }
}
