//! SQL Inspection
//!
//! Extracts the statement characteristics the policy check, the identifier
//! gate and the confidence scorer need: whether the statement is a pure read,
//! which tables it references, and how complex it is.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlparser::ast::{
    visit_expressions, visit_relations, Expr, ObjectName, Query, SetExpr, Statement, TableFactor,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use std::collections::HashSet;
use std::ops::ControlFlow;

lazy_static! {
    static ref SELECT_OR_WITH: Regex = Regex::new(r"(?i)^\s*(SELECT|WITH)\b").unwrap();
    static ref WRITE_KEYWORD: Regex = Regex::new(
        r"(?i)\b(INSERT|UPDATE|DELETE|DROP|CREATE|ALTER|TRUNCATE|GRANT|REVOKE|EXEC|EXECUTE|CALL)\b"
    ).unwrap();
    static ref TABLE_REF: Regex = Regex::new(r"(?i)\b(?:FROM|JOIN)\s+([a-zA-Z_][a-zA-Z0-9_.]*)").unwrap();
    static ref EXTRACT_FROM: Regex = Regex::new(r"(?i)\bEXTRACT\s*\(\s*\w+\s+FROM\s+[a-zA-Z0-9_.]+").unwrap();
    static ref CTE_NAME: Regex = Regex::new(r"(?i)(?:\bWITH|,)\s*(?:RECURSIVE\s+)?([a-zA-Z_][a-zA-Z0-9_]*)\s+AS\s*\(").unwrap();
    static ref JOIN: Regex = Regex::new(r"(?i)\bJOIN\b").unwrap();
    static ref SUBQUERY: Regex = Regex::new(r"(?i)\(\s*SELECT\b").unwrap();
    static ref AGGREGATE: Regex = Regex::new(r"(?i)\b(COUNT|SUM|AVG|MIN|MAX)\s*\(").unwrap();
    static ref WINDOW: Regex = Regex::new(r"(?i)\bOVER\s*\(").unwrap();
}

/// Statement characteristics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlProfile {
    pub is_select_only: bool,
    /// Referenced base tables, CTE names excluded, in first-seen order
    pub tables: Vec<String>,
    pub join_count: usize,
    pub subquery_count: usize,
    pub aggregate_count: usize,
    pub uses_window_functions: bool,
    pub uses_ctes: bool,
    /// Whether the AST parse succeeded; `false` means the heuristics were used
    pub parsed: bool,
}

impl SqlProfile {
    /// Profile a statement with the Postgres parser, falling back to
    /// keyword heuristics when it does not parse.
    pub fn from_sql(sql: &str) -> Self {
        let mut profile = Self::heuristic(sql);

        match Parser::parse_sql(&PostgreSqlDialect {}, sql) {
            Ok(statements) => {
                let mut select_only = statements.len() == 1;
                for stmt in &statements {
                    match stmt {
                        Statement::Query(query) => {
                            if !query_is_read_only(query) {
                                select_only = false;
                            }
                        }
                        _ => select_only = false,
                    }
                }
                profile.is_select_only = select_only;
                profile.tables = collect_tables(&statements);
                profile.parsed = true;
            }
            Err(e) => {
                tracing::debug!("SQL parsing failed: {}, using heuristic profile", e);
            }
        }

        profile
    }

    fn heuristic(sql: &str) -> Self {
        let ctes: HashSet<String> = CTE_NAME
            .captures_iter(sql)
            .map(|c| c[1].to_lowercase())
            .collect();
        // EXTRACT(YEAR FROM col) is not a table reference
        let scrubbed = EXTRACT_FROM.replace_all(sql, "EXTRACT(");
        let mut tables: Vec<String> = Vec::new();
        for caps in TABLE_REF.captures_iter(&scrubbed) {
            let name = caps[1].trim_end_matches('.').to_string();
            if ctes.contains(&name.to_lowercase()) || tables.contains(&name) {
                continue;
            }
            tables.push(name);
        }

        Self {
            is_select_only: is_select_only_heuristic(sql),
            tables,
            join_count: JOIN.find_iter(sql).count(),
            subquery_count: SUBQUERY.find_iter(sql).count(),
            aggregate_count: AGGREGATE.find_iter(sql).count(),
            uses_window_functions: WINDOW.is_match(sql),
            uses_ctes: SELECT_OR_WITH
                .captures(sql)
                .map(|c| c[1].eq_ignore_ascii_case("WITH"))
                .unwrap_or(false),
            parsed: false,
        }
    }
}

/// SELECT/WITH statement with no write keyword anywhere.
pub fn is_select_only_heuristic(sql: &str) -> bool {
    SELECT_OR_WITH.is_match(sql) && !WRITE_KEYWORD.is_match(sql)
}

pub fn is_select_only(sql: &str) -> bool {
    SqlProfile::from_sql(sql).is_select_only
}

pub fn referenced_tables(sql: &str) -> Vec<String> {
    SqlProfile::from_sql(sql).tables
}

/// `SELECT ... INTO`, `FOR UPDATE` locks and data-modifying CTE bodies write.
fn query_is_read_only(query: &Query) -> bool {
    if !query.locks.is_empty() {
        return false;
    }
    if let Some(with) = &query.with {
        if !with.cte_tables.iter().all(|cte| query_is_read_only(&cte.query)) {
            return false;
        }
    }
    set_expr_is_read_only(&query.body)
}

fn set_expr_is_read_only(body: &SetExpr) -> bool {
    match body {
        SetExpr::Select(select) => select.into.is_none(),
        SetExpr::Query(q) => query_is_read_only(q),
        SetExpr::SetOperation { left, right, .. } => {
            set_expr_is_read_only(left) && set_expr_is_read_only(right)
        }
        SetExpr::Values(_) | SetExpr::Table(_) => true,
        _ => false,
    }
}

/// Every relation the statements read, CTE names excluded, in first-seen
/// order. Relations are collected by the AST visitor so tables inside
/// function arguments, `CASE`, casts, `ANY`/`ALL`, join constraints and
/// `GROUP BY`/`ORDER BY` expressions are all included.
fn collect_tables(statements: &[Statement]) -> Vec<String> {
    let mut tables: Vec<String> = Vec::new();
    let mut ctes = HashSet::new();

    for stmt in statements {
        let _ = visit_relations(stmt, |relation: &ObjectName| {
            let name = relation
                .0
                .iter()
                .map(|ident| ident.value.clone())
                .collect::<Vec<_>>()
                .join(".");
            if !tables.contains(&name) {
                tables.push(name);
            }
            ControlFlow::<()>::Continue(())
        });

        if let Statement::Query(query) = stmt {
            collect_cte_names(query, &mut ctes);
        }
        // CTEs declared inside expression subqueries
        let _ = visit_expressions(stmt, |expr: &Expr| {
            match expr {
                Expr::Subquery(q)
                | Expr::Exists { subquery: q, .. }
                | Expr::InSubquery { subquery: q, .. } => collect_cte_names(q, &mut ctes),
                _ => {}
            }
            ControlFlow::<()>::Continue(())
        });
    }

    tables
        .into_iter()
        .filter(|t| !ctes.contains(&t.to_lowercase()))
        .collect()
}

fn collect_cte_names(query: &Query, ctes: &mut HashSet<String>) {
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            ctes.insert(cte.alias.name.value.to_lowercase());
            collect_cte_names(&cte.query, ctes);
        }
    }
    collect_set_expr_ctes(&query.body, ctes);
}

fn collect_set_expr_ctes(body: &SetExpr, ctes: &mut HashSet<String>) {
    match body {
        SetExpr::Select(select) => {
            for twj in &select.from {
                collect_factor_ctes(&twj.relation, ctes);
                for join in &twj.joins {
                    collect_factor_ctes(&join.relation, ctes);
                }
            }
        }
        SetExpr::Query(q) => collect_cte_names(q, ctes),
        SetExpr::SetOperation { left, right, .. } => {
            collect_set_expr_ctes(left, ctes);
            collect_set_expr_ctes(right, ctes);
        }
        _ => {}
    }
}

fn collect_factor_ctes(factor: &TableFactor, ctes: &mut HashSet<String>) {
    match factor {
        TableFactor::Derived { subquery, .. } => collect_cte_names(subquery, ctes),
        TableFactor::NestedJoin { table_with_joins, .. } => {
            collect_factor_ctes(&table_with_joins.relation, ctes);
            for join in &table_with_joins.joins {
                collect_factor_ctes(&join.relation, ctes);
            }
        }
        _ => {}
    }
}
