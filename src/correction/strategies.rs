//! Correction Strategies
//!
//! Pure functions mapping a failing statement, the database error and the
//! retrieved schema hints to a candidate fix. A strategy that finds nothing
//! usable returns an empty statement with confidence 0 rather than guessing.
//!
//! Schema hints come in two shapes: `table.column` and foreign keys written
//! as `table.column=ref_table.ref_column`.

use crate::correction::classifier::ErrorType;
use crate::correction::synonyms::{
    column_synonym, relation_synonym, COLUMN_SYNONYM_CONFIDENCE, FUNCTION_MAP,
    FUNCTION_MAP_CONFIDENCE, RELATION_SYNONYM_CONFIDENCE,
};
use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use strsim::jaro_winkler;

/// Confidence for fixes inferred from schema hints
pub const SCHEMA_HINT_CONFIDENCE: f64 = 0.7;

/// Minimum Jaro-Winkler similarity for a fuzzy schema-hint match
pub const FUZZY_MATCH_THRESHOLD: f64 = 0.85;

/// Aliases conventionally used for fact and dimension tables
const PREFERRED_ALIASES: &[&str] = &["f", "d", "a", "p", "dept"];

const CLAUSE_KEYWORDS: &[&str] = &[
    "SELECT", "FROM", "WHERE", "JOIN", "INNER", "LEFT", "RIGHT", "FULL", "CROSS", "OUTER",
    "NATURAL", "ON", "USING", "GROUP", "ORDER", "BY", "HAVING", "LIMIT", "OFFSET", "UNION",
    "WINDOW", "FETCH", "AS", "DISTINCT", "AND", "OR", "NOT",
];

lazy_static! {
    static ref MISSING_COLUMN: Regex =
        Regex::new(r#"(?i)column\s+"?([\w.]+)"?\s+does not exist"#).unwrap();
    static ref MISSING_RELATION: Regex =
        Regex::new(r#"(?i)relation\s+"([^"]+)"\s+does not exist"#).unwrap();
    static ref AMBIGUOUS_COLUMN: Regex =
        Regex::new(r#"(?i)column\s+(?:reference\s+)?"([^"]+)"\s+is ambiguous"#).unwrap();
    static ref GROUP_BY_COLUMN: Regex =
        Regex::new(r#"(?i)column\s+"([^"]+)"\s+must appear in the GROUP BY clause"#).unwrap();
    static ref DATE_LITERAL: Regex =
        Regex::new(r"(?i)(\b(?:DATE|TIMESTAMP)\s+)?'(\d{4}-\d{2}-\d{2})'").unwrap();
    static ref QUOTED_NUMBER_COMPARISON: Regex =
        Regex::new(r"(\w+)\s*(<>|!=|>=|<=|=|>|<)\s*'(\d+)'").unwrap();
    static ref AGGREGATE_CALL: Regex = Regex::new(r"(?i)\b(COUNT|SUM|AVG|MIN|MAX)\s*\(").unwrap();
    static ref TRAILING_ALIAS: Regex = Regex::new(r"(?is)^(.*?)\s+AS\s+\w+$").unwrap();
    static ref SIMPLE_IDENTIFIER: Regex = Regex::new(r"^[A-Za-z_][\w.]*$").unwrap();
    static ref JOIN_WITHOUT_CONDITION: Regex =
        Regex::new(r"(?i)\bJOIN\s+(\w+)(?:\s+\w+)?\s+JOIN\b").unwrap();
    static ref QUALIFIER: Regex = Regex::new(r"\b([A-Za-z_]\w*)\.[A-Za-z_]").unwrap();
    static ref FUNCTION_REWRITES: Vec<(&'static str, &'static str, Regex)> = FUNCTION_MAP
        .iter()
        .map(|rw| (rw.name, rw.replacement, Regex::new(rw.pattern).unwrap()))
        .collect();
}

/// Result of applying one strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyOutcome {
    /// Empty when no fix was found
    pub corrected_sql: String,
    pub description: String,
    pub confidence: f64,
}

impl StrategyOutcome {
    fn fixed(corrected_sql: String, description: impl Into<String>, confidence: f64) -> Self {
        Self {
            corrected_sql,
            description: description.into(),
            confidence,
        }
    }

    fn none(description: impl Into<String>) -> Self {
        Self {
            corrected_sql: String::new(),
            description: description.into(),
            confidence: 0.0,
        }
    }

    pub fn is_fix(&self) -> bool {
        !self.corrected_sql.is_empty() && self.confidence > 0.0
    }
}

/// Dispatch to the strategy registered for `error_type`
pub fn apply_strategy(
    error_type: ErrorType,
    sql: &str,
    error: &str,
    schema_hints: &[String],
) -> StrategyOutcome {
    let outcome = match error_type {
        ErrorType::ColumnNotFound => fix_missing_column(sql, error, schema_hints),
        ErrorType::RelationNotFound => fix_missing_relation(sql, error, schema_hints),
        ErrorType::SyntaxError => repair_syntax(sql),
        ErrorType::TypeMismatch => fix_type_mismatch(sql),
        ErrorType::FunctionError => translate_functions(sql),
        ErrorType::AmbiguousReference => qualify_ambiguous_column(sql, error),
        ErrorType::GroupByError => fix_group_by(sql, error),
        ErrorType::JoinError => fix_join(sql, schema_hints),
        other => StrategyOutcome::none(format!("no correction strategy for {}", other)),
    };

    if outcome.is_fix() && outcome.corrected_sql == sql {
        return StrategyOutcome::none(format!("{} produced no change", outcome.description));
    }
    outcome
}

pub fn fix_missing_column(sql: &str, error: &str, schema_hints: &[String]) -> StrategyOutcome {
    let token = match MISSING_COLUMN.captures(error) {
        Some(caps) => caps[1].to_string(),
        None => return StrategyOutcome::none("Could not identify missing column"),
    };
    let name = last_segment(&token);

    if let Some(target) = column_synonym(name) {
        if let Some(corrected) = replace_identifier(sql, &token, target) {
            return StrategyOutcome::fixed(
                corrected,
                format!("Mapped column '{}' -> '{}'", token, target),
                COLUMN_SYNONYM_CONFIDENCE,
            );
        }
    }

    let columns = column_hints(schema_hints);

    for (table, column) in columns.iter().filter(|(_, c)| c.eq_ignore_ascii_case(name)) {
        if let Some(qualifier) = table_qualifier(sql, table) {
            let target = format!("{}.{}", qualifier, column);
            if target == token {
                continue;
            }
            if let Some(corrected) = replace_identifier(sql, &token, &target) {
                return StrategyOutcome::fixed(
                    corrected,
                    format!("Qualified column '{}' as '{}' from schema hints", token, target),
                    SCHEMA_HINT_CONFIDENCE,
                );
            }
        }
    }

    let lower = name.to_lowercase();
    let closest = columns
        .iter()
        .filter(|(_, c)| !c.eq_ignore_ascii_case(name))
        .map(|(t, c)| (jaro_winkler(&lower, &c.to_lowercase()), t, c))
        .filter(|(score, _, _)| *score >= FUZZY_MATCH_THRESHOLD)
        .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

    if let Some((_, table, column)) = closest {
        let target = match table_qualifier(sql, table) {
            Some(qualifier) => format!("{}.{}", qualifier, column),
            None => column.clone(),
        };
        if let Some(corrected) = replace_identifier(sql, &token, &target) {
            return StrategyOutcome::fixed(
                corrected,
                format!("Replaced column '{}' with closest schema match '{}'", token, target),
                SCHEMA_HINT_CONFIDENCE,
            );
        }
    }

    StrategyOutcome::none(format!("Column '{}' not found, no correction available", name))
}

pub fn fix_missing_relation(sql: &str, error: &str, schema_hints: &[String]) -> StrategyOutcome {
    let token = match MISSING_RELATION.captures(error) {
        Some(caps) => caps[1].to_string(),
        None => return StrategyOutcome::none("Could not identify missing relation"),
    };
    let name = last_segment(&token);

    if let Some(target) = relation_synonym(name) {
        if let Some(corrected) = replace_identifier(sql, &token, target) {
            return StrategyOutcome::fixed(
                corrected,
                format!("Corrected table name '{}' -> '{}'", token, target),
                RELATION_SYNONYM_CONFIDENCE,
            );
        }
    }

    let lower = name.to_lowercase();
    let singular = lower.trim_end_matches('s').to_string();
    let tables = hint_tables(schema_hints);
    let candidates: Vec<&String> = tables.iter().filter(|t| t.to_lowercase() != lower).collect();

    let by_suffix = candidates.iter().find(|t| {
        let t = t.to_lowercase();
        t.ends_with(&format!("_{}", lower)) || (!singular.is_empty() && t.ends_with(&format!("_{}", singular)))
    });
    let chosen = by_suffix.copied().or_else(|| {
        candidates
            .iter()
            .map(|t| (jaro_winkler(&lower, &t.to_lowercase()), *t))
            .filter(|(score, _)| *score >= FUZZY_MATCH_THRESHOLD)
            .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(_, t)| t)
    });

    if let Some(target) = chosen {
        if let Some(corrected) = replace_identifier(sql, &token, target) {
            return StrategyOutcome::fixed(
                corrected,
                format!("Replaced table '{}' with schema match '{}'", token, target),
                SCHEMA_HINT_CONFIDENCE,
            );
        }
    }

    StrategyOutcome::none(format!("Table '{}' not found, no correction available", name))
}

/// Mechanical repairs: close an unterminated literal, balance parentheses,
/// insert missing commas in a select list. Confidence is the lowest of the
/// repairs applied.
pub fn repair_syntax(sql: &str) -> StrategyOutcome {
    let mut current = sql.to_string();
    let mut repairs: Vec<String> = Vec::new();
    let mut confidence: f64 = 1.0;

    if let Some(closed) = close_unterminated_literal(&current) {
        current = closed;
        repairs.push("Added missing closing quote".to_string());
        confidence = confidence.min(0.75);
    }

    if let Some((balanced, description)) = balance_parentheses(&current) {
        current = balanced;
        repairs.push(description);
        confidence = confidence.min(0.8);
    }

    if let Some(with_commas) = insert_select_commas(&current) {
        current = with_commas;
        repairs.push("Added missing commas in SELECT list".to_string());
        confidence = confidence.min(0.7);
    }

    if repairs.is_empty() {
        return StrategyOutcome::none("Could not identify syntax error correction");
    }
    StrategyOutcome::fixed(current, repairs.join("; "), confidence)
}

/// Type bare `'yyyy-mm-dd'` literals as dates, whatever operator compares
/// them (`=`, `>=`, `<`, `BETWEEN`, `IN`), or unquote quoted integers.
pub fn fix_type_mismatch(sql: &str) -> StrategyOutcome {
    let dated = DATE_LITERAL
        .replace_all(sql, |caps: &regex::Captures| match caps.get(1) {
            Some(_) => caps[0].to_string(),
            None => format!("DATE '{}'", &caps[2]),
        })
        .into_owned();
    if dated != sql {
        return StrategyOutcome::fixed(dated, "Added DATE cast to date literal", 0.8);
    }

    if QUOTED_NUMBER_COMPARISON.is_match(sql) {
        let corrected = QUOTED_NUMBER_COMPARISON.replace_all(sql, "${1} ${2} ${3}").into_owned();
        return StrategyOutcome::fixed(corrected, "Removed quotes from numeric comparison", 0.7);
    }

    StrategyOutcome::none("Could not identify type mismatch correction")
}

pub fn translate_functions(sql: &str) -> StrategyOutcome {
    let mut current = sql.to_string();
    let mut applied = Vec::new();

    for (name, replacement, pattern) in FUNCTION_REWRITES.iter() {
        if pattern.is_match(&current) {
            current = pattern.replace_all(&current, *replacement).into_owned();
            applied.push(format!("'{}' -> '{}'", name, replacement.trim_end()));
        }
    }

    if applied.is_empty() {
        return StrategyOutcome::none("Could not identify function error correction");
    }
    StrategyOutcome::fixed(
        current,
        format!("Corrected function {}", applied.join(", ")),
        FUNCTION_MAP_CONFIDENCE,
    )
}

pub fn qualify_ambiguous_column(sql: &str, error: &str) -> StrategyOutcome {
    let column = match AMBIGUOUS_COLUMN.captures(error) {
        Some(caps) => caps[1].to_string(),
        None => return StrategyOutcome::none("Could not identify ambiguous column"),
    };

    let used: Vec<String> = QUALIFIER
        .captures_iter(sql)
        .map(|c| c[1].to_string())
        .unique()
        .collect();
    let candidates = PREFERRED_ALIASES
        .iter()
        .map(|a| a.to_string())
        .filter(|a| used.contains(a))
        .chain(used.iter().cloned())
        .unique();

    for alias in candidates {
        let target = format!("{}.{}", alias, column);
        if let Some(corrected) = replace_identifier(sql, &column, &target) {
            return StrategyOutcome::fixed(
                corrected,
                format!("Qualified ambiguous column '{}' with alias '{}'", column, alias),
                0.6,
            );
        }
    }

    StrategyOutcome::none(format!("Could not resolve ambiguity for column '{}'", column))
}

pub fn fix_group_by(sql: &str, error: &str) -> StrategyOutcome {
    let words = top_level_words(sql);
    let group_by = find_phrase(&words, "GROUP", "BY");
    let (body, _) = split_trailing_semicolon(sql);

    if let (Some(caps), Some(group_idx)) = (GROUP_BY_COLUMN.captures(error), group_by) {
        let column = caps[1].to_string();
        let end = words[group_idx + 2..]
            .iter()
            .find(|(_, w)| is_any(w, &["HAVING", "ORDER", "LIMIT", "OFFSET", "UNION", "WINDOW", "FETCH"]))
            .map(|(pos, _)| *pos)
            .unwrap_or(body.len());
        let head = sql[..end].trim_end();
        let corrected = format!("{}, {}{}{}", head, column, spacer(&sql[end..body.len()]), &sql[end..]);
        return StrategyOutcome::fixed(corrected, format!("Added column '{}' to GROUP BY", column), 0.6);
    }

    if group_by.is_none() && AGGREGATE_CALL.is_match(sql) {
        let (start, end) = match select_list_span(sql) {
            Some(span) => span,
            None => return StrategyOutcome::none("Could not parse SELECT clause"),
        };
        let keys: Vec<String> = split_top_level(&sql[start..end])
            .into_iter()
            .filter(|item| !AGGREGATE_CALL.is_match(item))
            .map(|item| match TRAILING_ALIAS.captures(&item) {
                Some(caps) => caps[1].trim().to_string(),
                None => item,
            })
            .collect();
        if keys.is_empty() {
            return StrategyOutcome::none("No non-aggregate columns to group by");
        }

        let insert_at = words
            .iter()
            .filter(|(pos, _)| *pos > end)
            .find(|(_, w)| is_any(w, &["HAVING", "ORDER", "LIMIT", "OFFSET", "UNION", "WINDOW", "FETCH"]))
            .map(|(pos, _)| *pos)
            .unwrap_or(body.len());
        let head = sql[..insert_at].trim_end();
        let corrected = format!(
            "{} GROUP BY {}{}{}",
            head,
            keys.join(", "),
            spacer(&sql[insert_at..body.len()]),
            &sql[insert_at..]
        );
        return StrategyOutcome::fixed(corrected, "Added missing GROUP BY clause", 0.6);
    }

    StrategyOutcome::none("Could not correct GROUP BY error")
}

pub fn fix_join(sql: &str, schema_hints: &[String]) -> StrategyOutcome {
    if let Some(caps) = JOIN_WITHOUT_CONDITION.captures(sql) {
        return StrategyOutcome::none(format!(
            "JOIN on '{}' has no ON clause and no join condition can be inferred",
            &caps[1]
        ));
    }

    let words = top_level_words(sql);
    let foreign_keys = foreign_key_hints(schema_hints);

    for (idx, (_, word)) in words.iter().enumerate() {
        if !word.eq_ignore_ascii_case("JOIN") {
            continue;
        }
        let (table_pos, table) = match words.get(idx + 1) {
            Some(w) => *w,
            None => break,
        };
        let mut end = table_pos + table.len();
        let mut alias: Option<&str> = None;
        let mut next = idx + 2;
        if let Some((pos, w)) = words.get(next) {
            if w.eq_ignore_ascii_case("AS") {
                if let Some((apos, a)) = words.get(next + 1) {
                    alias = Some(a);
                    end = apos + a.len();
                    next += 2;
                }
            } else if !is_keyword(w) {
                alias = Some(w);
                end = pos + w.len();
                next += 1;
            }
        }
        if let Some((_, w)) = words.get(next) {
            if is_any(w, &["ON", "USING"]) {
                continue;
            }
        }

        for ((lt, lc), (rt, rc)) in &foreign_keys {
            let (this_col, other_table, other_col) = if lt.eq_ignore_ascii_case(table) {
                (lc, rt, rc)
            } else if rt.eq_ignore_ascii_case(table) {
                (rc, lt, lc)
            } else {
                continue;
            };
            let other = match table_qualifier(sql, other_table) {
                Some(q) if !q.eq_ignore_ascii_case(table) => q,
                _ => continue,
            };
            let this = alias.unwrap_or(table);
            let corrected = format!(
                "{} ON {}.{} = {}.{}{}",
                &sql[..end],
                this,
                this_col,
                other,
                other_col,
                &sql[end..]
            );
            return StrategyOutcome::fixed(
                corrected,
                format!("Added join condition for '{}' from foreign key hint", table),
                0.5,
            );
        }
    }

    StrategyOutcome::none("Could not correct JOIN error")
}

fn last_segment(token: &str) -> &str {
    token.rsplit('.').next().unwrap_or(token)
}

fn is_keyword(word: &str) -> bool {
    CLAUSE_KEYWORDS.iter().any(|k| k.eq_ignore_ascii_case(word))
}

fn is_any(word: &str, candidates: &[&str]) -> bool {
    candidates.iter().any(|c| c.eq_ignore_ascii_case(word))
}

fn spacer(rest: &str) -> &'static str {
    if rest.trim().is_empty() {
        ""
    } else {
        " "
    }
}

fn inside_literal(sql: &str, pos: usize) -> bool {
    sql[..pos].matches('\'').count() % 2 == 1
}

/// Replace whole-word occurrences of `name` that are not already qualified,
/// not inside a literal, and not used as a function name or typed literal.
fn replace_identifier(sql: &str, name: &str, replacement: &str) -> Option<String> {
    let pattern = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(name))).ok()?;
    let mut out = String::with_capacity(sql.len() + replacement.len());
    let mut last = 0;
    let mut replaced = false;

    for m in pattern.find_iter(sql) {
        let before = sql[..m.start()].chars().next_back();
        let after = sql[m.end()..].trim_start().chars().next();
        if matches!(before, Some('.') | Some('"'))
            || matches!(after, Some('(') | Some('\''))
            || inside_literal(sql, m.start())
        {
            continue;
        }
        out.push_str(&sql[last..m.start()]);
        out.push_str(replacement);
        last = m.end();
        replaced = true;
    }

    if !replaced {
        return None;
    }
    out.push_str(&sql[last..]);
    Some(out)
}

/// How `table` is referenced in FROM/JOIN: its alias when it has one, else
/// its own name. `None` when the statement does not reference it.
fn table_qualifier(sql: &str, table: &str) -> Option<String> {
    let pattern = Regex::new(&format!(
        r"(?i)\b(?:FROM|JOIN)\s+(?:\w+\.)?{}\b(?:\s+(?:AS\s+)?(\w+))?",
        regex::escape(table)
    ))
    .ok()?;
    let caps = pattern.captures(sql)?;
    match caps.get(1) {
        Some(alias) if !is_keyword(alias.as_str()) => Some(alias.as_str().to_string()),
        _ => Some(table.to_string()),
    }
}

fn column_hints(hints: &[String]) -> Vec<(String, String)> {
    hints
        .iter()
        .filter(|h| !h.contains('='))
        .filter_map(|h| h.split_once('.'))
        .map(|(t, c)| (t.trim().to_string(), c.trim().to_string()))
        .collect()
}

fn foreign_key_hints(hints: &[String]) -> Vec<((String, String), (String, String))> {
    hints
        .iter()
        .filter_map(|h| h.split_once('='))
        .filter_map(|(left, right)| {
            let (lt, lc) = left.trim().split_once('.')?;
            let (rt, rc) = right.trim().split_once('.')?;
            Some(((lt.to_string(), lc.to_string()), (rt.to_string(), rc.to_string())))
        })
        .collect()
}

fn hint_tables(hints: &[String]) -> Vec<String> {
    hints
        .iter()
        .flat_map(|h| h.split('='))
        .map(|part| part.trim().split('.').next().unwrap_or("").to_string())
        .filter(|t| !t.is_empty())
        .unique()
        .collect()
}

/// Words outside literals and parentheses, with their byte offsets
fn top_level_words(sql: &str) -> Vec<(usize, &str)> {
    let mut words = Vec::new();
    let mut depth = 0usize;
    let mut in_literal = false;
    let mut start: Option<usize> = None;

    for (i, c) in sql.char_indices() {
        if in_literal {
            if c == '\'' {
                in_literal = false;
            }
            continue;
        }
        if c.is_alphanumeric() || c == '_' {
            if start.is_none() && depth == 0 {
                start = Some(i);
            }
            continue;
        }
        if let Some(s) = start.take() {
            words.push((s, &sql[s..i]));
        }
        match c {
            '\'' => in_literal = true,
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    if let Some(s) = start {
        words.push((s, &sql[s..]));
    }
    words
}

fn find_phrase(words: &[(usize, &str)], first: &str, second: &str) -> Option<usize> {
    words.windows(2).position(|pair| {
        pair[0].1.eq_ignore_ascii_case(first) && pair[1].1.eq_ignore_ascii_case(second)
    })
}

/// Byte span of the outermost select list, between SELECT [DISTINCT] and FROM
fn select_list_span(sql: &str) -> Option<(usize, usize)> {
    let words = top_level_words(sql);
    let select_idx = words.iter().position(|(_, w)| w.eq_ignore_ascii_case("SELECT"))?;
    let (select_pos, select_word) = words[select_idx];
    let mut start = select_pos + select_word.len();
    if let Some((pos, w)) = words.get(select_idx + 1) {
        if w.eq_ignore_ascii_case("DISTINCT") {
            start = pos + w.len();
        }
    }
    let (from_pos, _) = words[select_idx + 1..]
        .iter()
        .find(|(_, w)| w.eq_ignore_ascii_case("FROM"))?;
    let list = &sql[start..*from_pos];
    let leading = list.len() - list.trim_start().len();
    let trailing = list.len() - list.trim_end().len();
    if start + leading >= from_pos - trailing {
        return None;
    }
    Some((start + leading, from_pos - trailing))
}

fn split_top_level(list: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut depth = 0usize;
    let mut in_literal = false;
    let mut current = String::new();

    for c in list.chars() {
        match c {
            '\'' => in_literal = !in_literal,
            '(' if !in_literal => depth += 1,
            ')' if !in_literal => depth = depth.saturating_sub(1),
            ',' if !in_literal && depth == 0 => {
                items.push(current.trim().to_string());
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    if !current.trim().is_empty() {
        items.push(current.trim().to_string());
    }
    items
}

fn split_trailing_semicolon(sql: &str) -> (&str, &str) {
    let trimmed = sql.trim_end();
    match trimmed.strip_suffix(';') {
        Some(body) => (body, &sql[body.len()..]),
        None => (sql, ""),
    }
}

fn close_unterminated_literal(sql: &str) -> Option<String> {
    if sql.matches('\'').count() % 2 == 0 {
        return None;
    }
    let open = sql.rfind('\'')?;
    let close_at = sql[open + 1..]
        .char_indices()
        .find(|(_, c)| c.is_whitespace() || matches!(c, ')' | ',' | ';'))
        .map(|(i, _)| open + 1 + i)
        .unwrap_or(sql.len());
    Some(format!("{}'{}", &sql[..close_at], &sql[close_at..]))
}

fn balance_parentheses(sql: &str) -> Option<(String, String)> {
    let mut depth = 0usize;
    let mut removed = 0usize;
    let mut in_literal = false;
    let mut out = String::with_capacity(sql.len() + 4);

    for c in sql.chars() {
        match c {
            '\'' => in_literal = !in_literal,
            '(' if !in_literal => depth += 1,
            ')' if !in_literal => {
                if depth == 0 {
                    removed += 1;
                    continue;
                }
                depth -= 1;
            }
            _ => {}
        }
        out.push(c);
    }

    if depth == 0 && removed == 0 {
        return None;
    }

    let mut notes = Vec::new();
    if removed > 0 {
        notes.push(format!("Removed {} extra closing parenthesis(es)", removed));
    }
    if depth > 0 {
        let (body, tail) = split_trailing_semicolon(&out);
        out = format!("{}{}{}", body, ")".repeat(depth), tail);
        notes.push(format!("Added {} missing closing parenthesis(es)", depth));
    }
    Some((out, notes.join("; ")))
}

fn insert_select_commas(sql: &str) -> Option<String> {
    let (start, end) = select_list_span(sql)?;
    let list = &sql[start..end];
    if list.contains(',') {
        return None;
    }
    let tokens: Vec<&str> = list.split_whitespace().collect();
    if tokens.len() < 2
        || !tokens
            .iter()
            .all(|t| SIMPLE_IDENTIFIER.is_match(t) && !is_keyword(t))
    {
        return None;
    }
    Some(format!("{}{}{}", &sql[..start], tokens.join(", "), &sql[end..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hints(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_relation_synonym() {
        let outcome = fix_missing_relation(
            "SELECT COUNT(*) FROM patients",
            "relation \"patients\" does not exist",
            &[],
        );
        assert_eq!(outcome.corrected_sql, "SELECT COUNT(*) FROM dim_patient");
        assert!(outcome.confidence >= 0.85);
    }

    #[test]
    fn test_relation_from_schema_hints() {
        let outcome = fix_missing_relation(
            "SELECT * FROM clinics",
            "relation \"clinics\" does not exist",
            &hints(&["dim_clinic.clinic_id", "dim_clinic.name"]),
        );
        assert_eq!(outcome.corrected_sql, "SELECT * FROM dim_clinic");
        assert_eq!(outcome.confidence, SCHEMA_HINT_CONFIDENCE);
    }

    #[test]
    fn test_unknown_relation_has_no_fix() {
        let outcome = fix_missing_relation("SELECT * FROM widgets", "relation \"widgets\" does not exist", &[]);
        assert!(!outcome.is_fix());
        assert_eq!(outcome.confidence, 0.0);
    }

    #[test]
    fn test_column_synonym() {
        let outcome = fix_missing_column(
            "SELECT SUM(amount) FROM fact_billing f",
            "column \"amount\" does not exist",
            &[],
        );
        assert_eq!(outcome.corrected_sql, "SELECT SUM(f.amount) FROM fact_billing f");
        assert_eq!(outcome.confidence, COLUMN_SYNONYM_CONFIDENCE);
    }

    #[test]
    fn test_column_fuzzy_hint() {
        let outcome = fix_missing_column(
            "SELECT visit_dte FROM fact_appointments a",
            "column \"visit_dte\" does not exist",
            &hints(&["fact_appointments.visit_date", "fact_appointments.patient_id"]),
        );
        assert_eq!(outcome.corrected_sql, "SELECT a.visit_date FROM fact_appointments a");
        assert_eq!(outcome.confidence, SCHEMA_HINT_CONFIDENCE);
    }

    #[test]
    fn test_column_inside_literal_untouched() {
        let outcome = fix_missing_column(
            "SELECT amount FROM fact_billing f WHERE note = 'amount'",
            "column \"amount\" does not exist",
            &[],
        );
        assert_eq!(
            outcome.corrected_sql,
            "SELECT f.amount FROM fact_billing f WHERE note = 'amount'"
        );
    }

    #[test]
    fn test_syntax_parentheses() {
        let outcome = repair_syntax("SELECT COUNT(* FROM fact_billing;");
        assert_eq!(outcome.corrected_sql, "SELECT COUNT(* FROM fact_billing);");
        assert_eq!(outcome.confidence, 0.8);
    }

    #[test]
    fn test_syntax_unterminated_quote() {
        let outcome = repair_syntax("SELECT * FROM dim_patient WHERE city = 'Muscat");
        assert_eq!(outcome.corrected_sql, "SELECT * FROM dim_patient WHERE city = 'Muscat'");
        assert_eq!(outcome.confidence, 0.75);
    }

    #[test]
    fn test_syntax_missing_commas() {
        let outcome = repair_syntax("SELECT patient_id name city FROM dim_patient");
        assert_eq!(outcome.corrected_sql, "SELECT patient_id, name, city FROM dim_patient");
        assert_eq!(outcome.confidence, 0.7);
    }

    #[test]
    fn test_type_mismatch_date_cast() {
        let outcome = fix_type_mismatch("SELECT * FROM fact_billing WHERE billing_date = '2024-01-31'");
        assert_eq!(
            outcome.corrected_sql,
            "SELECT * FROM fact_billing WHERE billing_date = DATE '2024-01-31'"
        );
        assert_eq!(outcome.confidence, 0.8);
    }

    #[test]
    fn test_type_mismatch_date_range() {
        let outcome = fix_type_mismatch(
            "SELECT * FROM fact_appointments WHERE visit_date >= '2024-01-01' AND visit_date < '2024-02-01'",
        );
        assert_eq!(
            outcome.corrected_sql,
            "SELECT * FROM fact_appointments WHERE visit_date >= DATE '2024-01-01' AND visit_date < DATE '2024-02-01'"
        );

        let outcome = fix_type_mismatch(
            "SELECT * FROM fact_billing WHERE billing_date BETWEEN '2024-01-01' AND DATE '2024-03-31'",
        );
        assert_eq!(
            outcome.corrected_sql,
            "SELECT * FROM fact_billing WHERE billing_date BETWEEN DATE '2024-01-01' AND DATE '2024-03-31'"
        );
    }

    #[test]
    fn test_type_mismatch_already_typed_has_no_fix() {
        let outcome = fix_type_mismatch("SELECT * FROM fact_billing WHERE billing_date >= DATE '2024-01-01'");
        assert!(!outcome.is_fix());
    }

    #[test]
    fn test_type_mismatch_quoted_number_range() {
        let outcome = fix_type_mismatch("SELECT * FROM fact_billing WHERE amount >= '100'");
        assert_eq!(outcome.corrected_sql, "SELECT * FROM fact_billing WHERE amount >= 100");
    }

    #[test]
    fn test_type_mismatch_quoted_number() {
        let outcome = fix_type_mismatch("SELECT * FROM dim_patient WHERE patient_id = '42'");
        assert_eq!(outcome.corrected_sql, "SELECT * FROM dim_patient WHERE patient_id = 42");
        assert_eq!(outcome.confidence, 0.7);
    }

    #[test]
    fn test_function_translation() {
        let outcome = translate_functions("SELECT YEAR(visit_date), ISNULL(amount, 0) FROM fact_billing");
        assert_eq!(
            outcome.corrected_sql,
            "SELECT EXTRACT(YEAR FROM visit_date), COALESCE(amount, 0) FROM fact_billing"
        );
        assert_eq!(outcome.confidence, 0.85);
    }

    #[test]
    fn test_getdate() {
        let outcome = translate_functions("SELECT * FROM fact_billing WHERE billing_date < GETDATE()");
        assert_eq!(
            outcome.corrected_sql,
            "SELECT * FROM fact_billing WHERE billing_date < CURRENT_DATE"
        );
    }

    #[test]
    fn test_ambiguous_reference() {
        let outcome = qualify_ambiguous_column(
            "SELECT patient_id, f.amount FROM fact_billing f JOIN dim_patient p ON f.patient_id = p.patient_id",
            "column reference \"patient_id\" is ambiguous",
        );
        assert_eq!(
            outcome.corrected_sql,
            "SELECT f.patient_id, f.amount FROM fact_billing f JOIN dim_patient p ON f.patient_id = p.patient_id"
        );
        assert_eq!(outcome.confidence, 0.6);
    }

    #[test]
    fn test_group_by_added() {
        let outcome = fix_group_by(
            "SELECT department_name, SUM(amount) AS total FROM fact_billing ORDER BY total DESC",
            "column \"fact_billing.department_name\" must appear in the GROUP BY clause",
        );
        assert_eq!(
            outcome.corrected_sql,
            "SELECT department_name, SUM(amount) AS total FROM fact_billing GROUP BY department_name ORDER BY total DESC"
        );
        assert_eq!(outcome.confidence, 0.6);
    }

    #[test]
    fn test_group_by_extended() {
        let outcome = fix_group_by(
            "SELECT city, gender, COUNT(*) FROM dim_patient GROUP BY city",
            "column \"dim_patient.gender\" must appear in the GROUP BY clause or be used in an aggregate function",
        );
        assert_eq!(
            outcome.corrected_sql,
            "SELECT city, gender, COUNT(*) FROM dim_patient GROUP BY city, dim_patient.gender"
        );
    }

    #[test]
    fn test_join_chain_without_on_has_no_fix() {
        let outcome = fix_join("SELECT * FROM fact_billing JOIN dim_patient JOIN dim_doctor", &[]);
        assert!(!outcome.is_fix());
        assert!(outcome.description.contains("dim_patient"));
    }

    #[test]
    fn test_join_condition_from_foreign_key() {
        let outcome = fix_join(
            "SELECT p.name FROM fact_billing f JOIN dim_patient p WHERE f.amount > 100",
            &hints(&["fact_billing.patient_id=dim_patient.patient_id"]),
        );
        assert_eq!(
            outcome.corrected_sql,
            "SELECT p.name FROM fact_billing f JOIN dim_patient p ON p.patient_id = f.patient_id WHERE f.amount > 100"
        );
        assert_eq!(outcome.confidence, 0.5);
    }

    #[test]
    fn test_no_strategy_for_permission() {
        let outcome = apply_strategy(ErrorType::PermissionError, "SELECT 1", "permission denied", &[]);
        assert!(!outcome.is_fix());
    }
}
