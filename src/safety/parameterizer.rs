//! SQL Parameterizer
//!
//! Replaces literals in generated SQL with positional `$n` placeholders and
//! scans what remains for injection indicators.
//!
//! Steps run in a fixed order: string literals, temporal literals, numeric
//! literals, then the injection scan. Each step only touches text the earlier
//! steps left behind, so running the whole thing on its own output is a no-op.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Typed value bound to a placeholder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ParamValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
            ParamValue::Integer(i) => write!(f, "{}", i),
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::Date(d) => write!(f, "DATE '{}'", d.format("%Y-%m-%d")),
            ParamValue::Timestamp(ts) => write!(f, "TIMESTAMP '{}'", ts.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

/// SQL with literals lifted out into an ordered parameter list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterizedQuery {
    pub sql: String,
    pub parameters: Vec<ParamValue>,
    pub is_safe: bool,
    pub warnings: Vec<String>,
}

impl ParameterizedQuery {
    /// Wrap SQL that is already fully parameterized.
    pub fn trusted(sql: impl Into<String>, parameters: Vec<ParamValue>) -> Self {
        Self {
            sql: sql.into(),
            parameters,
            is_safe: true,
            warnings: Vec::new(),
        }
    }
}

lazy_static! {
    static ref PLACEHOLDER: Regex = Regex::new(r"\$(\d+)").unwrap();
    static ref TEMPORAL_PREFIX: Regex = Regex::new(r"(?i)\b(DATE|TIMESTAMP|INTERVAL)\s+\$(\d+)\b").unwrap();
    // Alternation order matters: placeholders and quoted identifiers are
    // consumed whole so their digits never reach the numeric branch.
    static ref NUMERIC_SCAN: Regex = Regex::new(r#"\$\d+|"(?:[^"]|"")*"|\b\d+(?:\.\d+)?\b"#).unwrap();
    static ref POSITIONAL_LIST: Regex = Regex::new(
        r"(?i)\b(?:ORDER|GROUP)\s+BY\s+\d+(?:\s+(?:ASC|DESC))?(?:\s*,\s*\d+(?:\s+(?:ASC|DESC))?)*"
    ).unwrap();
    static ref CHAINED_STATEMENT: Regex =
        Regex::new(r"(?i);\s*(drop|delete|truncate|insert|update|alter|create)\b").unwrap();
    static ref LINE_COMMENT: Regex = Regex::new(r"--").unwrap();
    static ref BLOCK_COMMENT: Regex = Regex::new(r"/\*").unwrap();
    static ref UNION_SELECT: Regex = Regex::new(r"(?i)\bunion\s+(?:all\s+)?select\b").unwrap();
    static ref OR_COMPARISON: Regex = Regex::new(r"(?i)\bor\s+([\w$.]+)\s*=\s*([\w$.]+)").unwrap();
    static ref OR_TRUE: Regex = Regex::new(r"(?i)\bor\s+true\b").unwrap();
    static ref EXEC_CALL: Regex = Regex::new(r"(?i)\bexec(?:ute)?\s*\(").unwrap();
    static ref XP_CMDSHELL: Regex = Regex::new(r"(?i)xp_cmdshell").unwrap();
    static ref LITERAL_VALUE: Regex = Regex::new(r"^(?:\$\d+|\d+(?:\.\d+)?|true|false|null)$").unwrap();
}

/// Parameterize a SQL statement.
///
/// Placeholders introduced here are numbered after the highest `$n` already
/// present, so partially parameterized input keeps its existing bindings.
pub fn parameterize(sql: &str) -> ParameterizedQuery {
    let base = highest_placeholder(sql);
    let mut parameters = Vec::new();
    let mut warnings = Vec::new();

    let (text, unterminated) = extract_string_literals(sql, base, &mut parameters);
    if unterminated {
        warnings.push("Unterminated string literal".to_string());
    }
    let text = extract_temporal_literals(&text, base, &mut parameters);
    let text = extract_numeric_literals(&text, base, &mut parameters);

    warnings.extend(scan_injection_patterns(&text));

    ParameterizedQuery {
        is_safe: warnings.is_empty(),
        sql: text,
        parameters,
        warnings,
    }
}

/// List the `$n` placeholders in order of appearance.
pub fn extract_parameters(sql: &str) -> Vec<String> {
    PLACEHOLDER
        .find_iter(sql)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Inline parameters back into the statement. Debug logging only; the
/// result is never executed.
pub fn rebuild_query(query: &ParameterizedQuery) -> String {
    PLACEHOLDER
        .replace_all(&query.sql, |caps: &regex::Captures| {
            caps[1]
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .and_then(|idx| query.parameters.get(idx))
                .map(|p| p.to_string())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn highest_placeholder(sql: &str) -> usize {
    PLACEHOLDER
        .captures_iter(sql)
        .filter_map(|c| c[1].parse::<usize>().ok())
        .max()
        .unwrap_or(0)
}

fn push_param(params: &mut Vec<ParamValue>, base: usize, value: ParamValue) -> String {
    params.push(value);
    format!("${}", base + params.len())
}

/// Lift single-quoted literals. `''`, `\'` and `\\` are unescaped; double-quoted
/// identifiers are copied through untouched. Returns `true` as the second
/// element if a literal is left open, in which case the rest is copied verbatim.
fn extract_string_literals(sql: &str, base: usize, params: &mut Vec<ParamValue>) -> (String, bool) {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len());
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '"' => {
                let end = closing_double_quote(&chars, i + 1);
                out.extend(&chars[i..end]);
                i = end;
            }
            '\'' => {
                let mut value = String::new();
                let mut j = i + 1;
                let mut closed = false;
                while j < chars.len() {
                    let c = chars[j];
                    let next = chars.get(j + 1).copied();
                    match (c, next) {
                        ('\\', Some(n)) if n == '\'' || n == '\\' => {
                            value.push(n);
                            j += 2;
                        }
                        ('\'', Some('\'')) => {
                            value.push('\'');
                            j += 2;
                        }
                        ('\'', _) => {
                            closed = true;
                            j += 1;
                            break;
                        }
                        (c, _) => {
                            value.push(c);
                            j += 1;
                        }
                    }
                }
                if !closed {
                    out.extend(&chars[i..]);
                    return (out, true);
                }
                out.push_str(&push_param(params, base, ParamValue::Text(value)));
                i = j;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }

    (out, false)
}

fn closing_double_quote(chars: &[char], mut j: usize) -> usize {
    while j < chars.len() {
        if chars[j] == '"' {
            if chars.get(j + 1) == Some(&'"') {
                j += 2;
                continue;
            }
            return j + 1;
        }
        j += 1;
    }
    chars.len()
}

/// Collapse `DATE $n` / `TIMESTAMP $n` onto the placeholder and retype the
/// bound string when it parses. `INTERVAL $n` becomes `$n::interval` with the
/// value left as text, since a bare placeholder cannot follow a type keyword.
/// Only placeholders introduced by this call are considered.
fn extract_temporal_literals(text: &str, base: usize, params: &mut [ParamValue]) -> String {
    TEMPORAL_PREFIX
        .replace_all(text, |caps: &regex::Captures| {
            let n = match caps[2].parse::<usize>() {
                Ok(n) if n > base && n - base <= params.len() => n,
                _ => return caps[0].to_string(),
            };
            if caps[1].eq_ignore_ascii_case("INTERVAL") {
                return format!("${}::interval", n);
            }
            let slot = &mut params[n - base - 1];
            if let ParamValue::Text(raw) = slot {
                let typed = if caps[1].eq_ignore_ascii_case("TIMESTAMP") {
                    parse_timestamp(raw).map(ParamValue::Timestamp)
                } else {
                    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok().map(ParamValue::Date)
                };
                if let Some(value) = typed {
                    *slot = value;
                }
            }
            format!("${}", n)
        })
        .into_owned()
}

fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.naive_utc()))
}

/// Lift standalone numeric literals.
///
/// A number counts as standalone when the character before it is not an
/// identifier character (`_`, letter, digit), `$` or `.`. This single-character
/// adjacency rule is a heuristic, not tokenization: `table_2026` is left alone,
/// but digits separated from an identifier by other punctuation are treated
/// as literals. Positional `ORDER BY 1` / `GROUP BY 1, 2` lists are kept
/// because a bound parameter there would sort or group by a constant.
fn extract_numeric_literals(text: &str, base: usize, params: &mut Vec<ParamValue>) -> String {
    let protected: Vec<(usize, usize)> = POSITIONAL_LIST
        .find_iter(text)
        .map(|m| (m.start(), m.end()))
        .collect();

    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for m in NUMERIC_SCAN.find_iter(text) {
        let token = m.as_str();
        if token.starts_with('$') || token.starts_with('"') {
            continue;
        }
        if protected.iter().any(|(s, e)| m.start() >= *s && m.end() <= *e) {
            continue;
        }
        let prev = text[..m.start()].chars().next_back();
        if is_identifier_adjacent(prev) {
            continue;
        }
        let value = if token.contains('.') {
            token.parse::<f64>().ok().map(ParamValue::Float)
        } else {
            token.parse::<i64>().ok().map(ParamValue::Integer)
        };
        // Integers beyond i64 stay inline.
        let Some(value) = value else { continue };

        out.push_str(&text[last..m.start()]);
        out.push_str(&push_param(params, base, value));
        last = m.end();
    }
    out.push_str(&text[last..]);
    out
}

fn is_identifier_adjacent(prev: Option<char>) -> bool {
    matches!(prev, Some(c) if c == '_' || c == '$' || c == '.' || c.is_alphanumeric())
}

/// Scan parameterized SQL for injection indicators. Each distinct indicator
/// contributes one warning.
pub fn scan_injection_patterns(sql: &str) -> Vec<String> {
    let mut warnings: Vec<String> = Vec::new();
    let mut add = |w: String| {
        if !warnings.contains(&w) {
            warnings.push(w);
        }
    };

    for caps in CHAINED_STATEMENT.captures_iter(sql) {
        add(format!("Possible {} statement detected", caps[1].to_uppercase()));
    }
    if LINE_COMMENT.is_match(sql) {
        add("Possible SQL comment at end of statement".to_string());
    }
    if BLOCK_COMMENT.is_match(sql) {
        add("Possible SQL comment block".to_string());
    }
    if UNION_SELECT.is_match(sql) {
        add("Possible UNION-based injection".to_string());
    }
    if OR_TRUE.is_match(sql) || has_tautology(sql) {
        add("Possible boolean injection".to_string());
    }
    if EXEC_CALL.is_match(sql) {
        add("Possible EXEC call".to_string());
    }
    if XP_CMDSHELL.is_match(sql) {
        add("Possible xp_cmdshell call".to_string());
    }

    warnings
}

/// `OR x = x`, or `OR` comparing two values with no column involved.
fn has_tautology(sql: &str) -> bool {
    OR_COMPARISON.captures_iter(sql).any(|caps| {
        let left = caps[1].to_lowercase();
        let right = caps[2].to_lowercase();
        left == right || (LITERAL_VALUE.is_match(&left) && LITERAL_VALUE.is_match(&right))
    })
}
