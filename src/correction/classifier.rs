//! Error Classifier
//!
//! Classifies database error messages into a taxonomy for correction.
//! Rules are checked in order and the first match wins, since one message
//! can contain several matchable phrases.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// SQL error classification taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    ColumnNotFound,
    RelationNotFound,
    SyntaxError,
    TypeMismatch,
    FunctionError,
    PermissionError,
    TimeoutError,
    AmbiguousReference,
    GroupByError,
    AggregateError,
    JoinError,
    NullConstraint,
    UniqueViolation,
    ForeignKeyError,
    Unknown,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::ColumnNotFound => "column_not_found",
            ErrorType::RelationNotFound => "relation_not_found",
            ErrorType::SyntaxError => "syntax_error",
            ErrorType::TypeMismatch => "type_mismatch",
            ErrorType::FunctionError => "function_error",
            ErrorType::PermissionError => "permission_error",
            ErrorType::TimeoutError => "timeout_error",
            ErrorType::AmbiguousReference => "ambiguous_reference",
            ErrorType::GroupByError => "group_by_error",
            ErrorType::AggregateError => "aggregate_error",
            ErrorType::JoinError => "join_error",
            ErrorType::NullConstraint => "null_constraint",
            ErrorType::UniqueViolation => "unique_violation",
            ErrorType::ForeignKeyError => "foreign_key_error",
            ErrorType::Unknown => "unknown",
        }
    }

    /// Whether any strategy can attempt a fix for this kind of failure
    pub fn is_correctable(&self) -> bool {
        matches!(
            self,
            ErrorType::ColumnNotFound
                | ErrorType::RelationNotFound
                | ErrorType::SyntaxError
                | ErrorType::TypeMismatch
                | ErrorType::FunctionError
                | ErrorType::AmbiguousReference
                | ErrorType::GroupByError
                | ErrorType::JoinError
        )
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ErrorType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CLASSIFICATION_ORDER
            .iter()
            .map(|(_, t)| *t)
            .chain(std::iter::once(ErrorType::Unknown))
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown error type: {}", s))
    }
}

/// Ordered rules: every phrase of a rule must appear in the lowercased
/// message. More specific rules sit above the generic ones they overlap.
const CLASSIFICATION_ORDER: &[(&[&str], ErrorType)] = &[
    (&["is ambiguous"], ErrorType::AmbiguousReference),
    (&["ambiguous"], ErrorType::AmbiguousReference),
    (&["group by"], ErrorType::GroupByError),
    (&["column", "does not exist"], ErrorType::ColumnNotFound),
    (&["column", "not found"], ErrorType::ColumnNotFound),
    (&["relation", "does not exist"], ErrorType::RelationNotFound),
    (&["table", "does not exist"], ErrorType::RelationNotFound),
    (&["invalid input syntax"], ErrorType::TypeMismatch),
    (&["operator does not exist"], ErrorType::TypeMismatch),
    (&["syntax error"], ErrorType::SyntaxError),
    (&["unterminated"], ErrorType::SyntaxError),
    (&["function"], ErrorType::FunctionError),
    (&["permission denied"], ErrorType::PermissionError),
    (&["timeout"], ErrorType::TimeoutError),
    (&["aggregate"], ErrorType::AggregateError),
    (&["join"], ErrorType::JoinError),
    (&["null value"], ErrorType::NullConstraint),
    (&["unique"], ErrorType::UniqueViolation),
    (&["foreign key"], ErrorType::ForeignKeyError),
    (&["does not exist"], ErrorType::RelationNotFound),
];

/// Classify an error message into the taxonomy
pub fn classify(error_message: &str) -> ErrorType {
    let lower = error_message.to_lowercase();
    CLASSIFICATION_ORDER
        .iter()
        .find(|(phrases, _)| phrases.iter().all(|p| lower.contains(p)))
        .map(|(_, error_type)| *error_type)
        .unwrap_or(ErrorType::Unknown)
}
