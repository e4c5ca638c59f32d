//! Synonym tables
//!
//! Static business-term → schema mappings and the vendor function dialect map.

/// Confidence for a column synonym hit
pub const COLUMN_SYNONYM_CONFIDENCE: f64 = 0.85;

/// Confidence for a relation synonym hit
pub const RELATION_SYNONYM_CONFIDENCE: f64 = 0.9;

/// Confidence for a function dialect rewrite
pub const FUNCTION_MAP_CONFIDENCE: f64 = 0.85;

const COLUMN_SYNONYMS: &[(&str, &str)] = &[
    ("patient_name", "p.patient_name"),
    ("doctor_name", "d.doctor_name"),
    ("department", "dept.department_name"),
    ("amount", "f.amount"),
    ("date", "d.date_actual"),
    ("billing_date", "d.date_actual"),
];

const RELATION_SYNONYMS: &[(&str, &str)] = &[
    ("patients", "dim_patient"),
    ("patient", "dim_patient"),
    ("doctors", "dim_doctor"),
    ("doctor", "dim_doctor"),
    ("departments", "dim_department"),
    ("department", "dim_department"),
    ("appointments", "fact_appointments"),
    ("appointment", "fact_appointments"),
    ("visits", "fact_appointments"),
    ("patient_visits", "fact_appointments"),
    ("billing", "fact_billing"),
    ("bills", "fact_billing"),
    ("revenue", "fact_billing"),
    ("payments", "fact_payments"),
    ("payment", "fact_payments"),
];

/// A vendor function spelling and its warehouse equivalent.
/// `pattern` is a case-insensitive regex matched at a word boundary.
pub struct FunctionRewrite {
    pub name: &'static str,
    pub pattern: &'static str,
    pub replacement: &'static str,
}

/// Applied in order; each entry rewrites every occurrence.
pub const FUNCTION_MAP: &[FunctionRewrite] = &[
    FunctionRewrite { name: "YEAR", pattern: r"(?i)\bYEAR\s*\(", replacement: "EXTRACT(YEAR FROM " },
    FunctionRewrite { name: "MONTH", pattern: r"(?i)\bMONTH\s*\(", replacement: "EXTRACT(MONTH FROM " },
    FunctionRewrite { name: "DAY", pattern: r"(?i)\bDAY\s*\(", replacement: "EXTRACT(DAY FROM " },
    FunctionRewrite { name: "GETDATE", pattern: r"(?i)\bGETDATE\s*\(\s*\)", replacement: "CURRENT_DATE" },
    FunctionRewrite { name: "NOW", pattern: r"(?i)\bNOW\s*\(\s*\)", replacement: "CURRENT_TIMESTAMP" },
    FunctionRewrite { name: "LEN", pattern: r"(?i)\bLEN\s*\(", replacement: "LENGTH(" },
    FunctionRewrite { name: "ISNULL", pattern: r"(?i)\bISNULL\s*\(", replacement: "COALESCE(" },
    FunctionRewrite { name: "IFNULL", pattern: r"(?i)\bIFNULL\s*\(", replacement: "COALESCE(" },
    FunctionRewrite { name: "NVL", pattern: r"(?i)\bNVL\s*\(", replacement: "COALESCE(" },
];

/// Schema-qualified column for a business term, e.g. `amount` → `f.amount`
pub fn column_synonym(name: &str) -> Option<&'static str> {
    lookup(COLUMN_SYNONYMS, name)
}

/// Warehouse table for a business term, e.g. `patients` → `dim_patient`
pub fn relation_synonym(name: &str) -> Option<&'static str> {
    lookup(RELATION_SYNONYMS, name)
}

fn lookup(table: &[(&str, &'static str)], name: &str) -> Option<&'static str> {
    let lower = name.to_lowercase();
    table.iter().find(|(term, _)| *term == lower).map(|(_, target)| *target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relation_synonyms() {
        assert_eq!(relation_synonym("patients"), Some("dim_patient"));
        assert_eq!(relation_synonym("Revenue"), Some("fact_billing"));
        assert_eq!(relation_synonym("widgets"), None);
    }

    #[test]
    fn test_column_synonyms() {
        assert_eq!(column_synonym("billing_date"), Some("d.date_actual"));
        assert_eq!(column_synonym("nothing"), None);
    }

    #[test]
    fn test_function_patterns_compile() {
        for rewrite in FUNCTION_MAP {
            assert!(regex::Regex::new(rewrite.pattern).is_ok(), "{}", rewrite.name);
        }
    }
}
