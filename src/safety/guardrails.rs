//! Safety Guardrails
//!
//! Mandatory gates in front of the executor: read-only validation, identifier
//! sanitization and the injection policy. Nothing reaches the warehouse
//! without passing all of them.

use crate::error::{GuardError, Result};
use crate::safety::inspect::SqlProfile;
use crate::safety::parameterizer::{parameterize, ParameterizedQuery};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::warn;

/// Keywords that mutate data, schema or privileges
pub const FORBIDDEN_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "CREATE", "ALTER", "TRUNCATE", "GRANT", "REVOKE", "EXEC",
    "EXECUTE", "CALL",
];

const RESERVED_WORDS: &[&str] = &[
    "SELECT", "FROM", "WHERE", "JOIN", "INNER", "OUTER", "LEFT", "RIGHT", "ON", "AND", "OR", "NOT",
    "IN", "LIKE", "BETWEEN", "IS", "NULL", "TRUE", "FALSE", "AS", "ORDER", "BY", "GROUP", "HAVING",
    "LIMIT", "OFFSET", "UNION", "ALL", "DISTINCT", "COUNT", "SUM", "AVG", "MIN", "MAX", "CASE",
    "WHEN", "THEN", "ELSE", "END",
];

lazy_static! {
    static ref FORBIDDEN_PATTERNS: Vec<(&'static str, Regex)> = FORBIDDEN_KEYWORDS
        .iter()
        .map(|kw| (*kw, Regex::new(&format!(r"(?i)\b{}\b", kw)).unwrap()))
        .collect();
    static ref IDENTIFIER: Regex = Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").unwrap();
}

/// What to do when the parameterizer reports injection indicators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectionPolicy {
    /// Refuse to execute
    #[default]
    Block,
    /// Execute anyway and carry the warnings forward
    FlagAndProceed,
}

impl FromStr for InjectionPolicy {
    type Err = GuardError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "block" => Ok(InjectionPolicy::Block),
            "flag" | "flag_and_proceed" | "proceed" => Ok(InjectionPolicy::FlagAndProceed),
            other => Err(GuardError::Config(format!(
                "invalid value for INJECTION_POLICY: '{}' (expected block or flag)",
                other
            ))),
        }
    }
}

/// Reject statements that could modify anything.
///
/// Keywords are matched as whole words anywhere in the text, literals
/// included. Semicolons inside literals or quoted identifiers do not count
/// as separators; one trailing separator is allowed.
pub fn validate_for_read_only(sql: &str) -> Result<()> {
    for (keyword, pattern) in FORBIDDEN_PATTERNS.iter() {
        if pattern.is_match(sql) {
            return Err(GuardError::ForbiddenKeyword(keyword.to_string()));
        }
    }

    let code = strip_quoted(sql);
    let trimmed = code.trim_end();
    let body = trimmed.strip_suffix(';').unwrap_or(trimmed);
    if body.contains(';') {
        return Err(GuardError::MultiStatement);
    }

    Ok(())
}

/// Validate a bare identifier (table, column or alias name).
pub fn sanitize_identifier(name: &str) -> Result<String> {
    if !IDENTIFIER.is_match(name) {
        return Err(GuardError::InvalidIdentifier {
            name: name.to_string(),
            reason: "must start with a letter or underscore and contain only letters, digits and underscores".to_string(),
        });
    }
    let upper = name.to_uppercase();
    if RESERVED_WORDS.contains(&upper.as_str()) {
        return Err(GuardError::InvalidIdentifier {
            name: name.to_string(),
            reason: "reserved keyword".to_string(),
        });
    }
    Ok(name.to_string())
}

/// Replace the contents of string literals and quoted identifiers with
/// spaces, keeping byte positions of everything else.
fn strip_quoted(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut quote: Option<char> = None;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match quote {
            None => {
                if c == '\'' || c == '"' {
                    quote = Some(c);
                }
                out.push(c);
            }
            Some(q) => {
                if c == '\\' && q == '\'' {
                    out.push(' ');
                    if chars.next().is_some() {
                        out.push(' ');
                    }
                } else if c == q {
                    if chars.peek() == Some(&q) {
                        chars.next();
                        out.push_str("  ");
                    } else {
                        quote = None;
                        out.push(c);
                    }
                } else {
                    out.push(' ');
                }
            }
        }
    }
    out
}

/// Runs every gate and produces the statement the executor may receive.
#[derive(Debug, Clone, Default)]
pub struct SafetyAnalyzer {
    injection_policy: InjectionPolicy,
}

impl SafetyAnalyzer {
    pub fn new(injection_policy: InjectionPolicy) -> Self {
        Self { injection_policy }
    }

    pub fn injection_policy(&self) -> InjectionPolicy {
        self.injection_policy
    }

    /// Validate and parameterize a candidate statement.
    ///
    /// Order: read-only check, identifier check on referenced tables,
    /// parameterization, then the injection policy.
    pub fn prepare(&self, sql: &str) -> Result<ParameterizedQuery> {
        validate_for_read_only(sql)?;

        for table in SqlProfile::from_sql(sql).tables {
            for part in table.split('.') {
                sanitize_identifier(part)?;
            }
        }

        let query = parameterize(sql);
        if !query.is_safe {
            match self.injection_policy {
                InjectionPolicy::Block => {
                    warn!("Blocking statement with injection indicators: {:?}", query.warnings);
                    return Err(GuardError::InjectionSuspected(query.warnings));
                }
                InjectionPolicy::FlagAndProceed => {
                    warn!("Proceeding with flagged statement: {:?}", query.warnings);
                }
            }
        }

        Ok(query)
    }
}
