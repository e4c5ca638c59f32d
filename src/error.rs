use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GuardError {
    #[error("Off-topic query ({category}): {message}")]
    OffTopic { category: String, message: String },

    #[error("Clarification needed: {0}")]
    NeedsClarification(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Possible SQL injection: {}", .0.join("; "))]
    InjectionSuspected(Vec<String>),

    #[error("Forbidden keyword: {0} (read-only queries only)")]
    ForbiddenKeyword(String),

    #[error("Multiple SQL statements not allowed")]
    MultiStatement,

    #[error("Invalid identifier '{name}': {reason}")]
    InvalidIdentifier { name: String, reason: String },

    #[error("Transient execution error: {0}")]
    Transient(String),

    /// Database-reported failure; the message is the server's text verbatim.
    #[error("{0}")]
    Rejected(String),

    #[error("No correction available: {0}")]
    Uncorrectable(String),

    #[error("Retry budget exhausted after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },

    #[error("Query cancelled")]
    Cancelled,

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Retrieval error: {0}")]
    Retrieval(String),

    #[error("Policy service error: {0}")]
    Policy(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Serializable tag for a [`GuardError`], used in audit events and caller output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    OffTopic,
    NeedsClarification,
    Unauthorized,
    InjectionSuspected,
    ForbiddenKeyword,
    MultiStatement,
    InvalidIdentifier,
    Transient,
    Rejected,
    Uncorrectable,
    Exhausted,
    Cancelled,
    Embedding,
    Retrieval,
    Policy,
    Config,
    Storage,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::OffTopic => "off_topic",
            ErrorKind::NeedsClarification => "needs_clarification",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::InjectionSuspected => "injection_suspected",
            ErrorKind::ForbiddenKeyword => "forbidden_keyword",
            ErrorKind::MultiStatement => "multi_statement",
            ErrorKind::InvalidIdentifier => "invalid_identifier",
            ErrorKind::Transient => "transient",
            ErrorKind::Rejected => "rejected",
            ErrorKind::Uncorrectable => "uncorrectable",
            ErrorKind::Exhausted => "exhausted",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Embedding => "embedding",
            ErrorKind::Retrieval => "retrieval",
            ErrorKind::Policy => "policy",
            ErrorKind::Config => "config",
            ErrorKind::Storage => "storage",
        };
        write!(f, "{}", s)
    }
}

impl GuardError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GuardError::OffTopic { .. } => ErrorKind::OffTopic,
            GuardError::NeedsClarification(_) => ErrorKind::NeedsClarification,
            GuardError::Unauthorized(_) => ErrorKind::Unauthorized,
            GuardError::InjectionSuspected(_) => ErrorKind::InjectionSuspected,
            GuardError::ForbiddenKeyword(_) => ErrorKind::ForbiddenKeyword,
            GuardError::MultiStatement => ErrorKind::MultiStatement,
            GuardError::InvalidIdentifier { .. } => ErrorKind::InvalidIdentifier,
            GuardError::Transient(_) => ErrorKind::Transient,
            GuardError::Rejected(_) => ErrorKind::Rejected,
            GuardError::Uncorrectable(_) => ErrorKind::Uncorrectable,
            GuardError::Exhausted { .. } => ErrorKind::Exhausted,
            GuardError::Cancelled => ErrorKind::Cancelled,
            GuardError::Embedding(_) => ErrorKind::Embedding,
            GuardError::Retrieval(_) => ErrorKind::Retrieval,
            GuardError::Policy(_) => ErrorKind::Policy,
            GuardError::Config(_) => ErrorKind::Config,
            GuardError::Storage(_)
            | GuardError::Io(_)
            | GuardError::Json(_)
            | GuardError::Csv(_)
            | GuardError::Sqlite(_) => ErrorKind::Storage,
        }
    }

    /// Safety-gate failures are never executed and never retried.
    pub fn is_safety_violation(&self) -> bool {
        matches!(
            self,
            GuardError::InjectionSuspected(_)
                | GuardError::ForbiddenKeyword(_)
                | GuardError::MultiStatement
                | GuardError::InvalidIdentifier { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, GuardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejected_message_is_verbatim() {
        let err = GuardError::Rejected("relation \"patients\" does not exist".to_string());
        assert_eq!(err.to_string(), "relation \"patients\" does not exist");
        assert_eq!(err.kind(), ErrorKind::Rejected);
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::ForbiddenKeyword).unwrap();
        assert_eq!(json, "\"forbidden_keyword\"");
        assert_eq!(ErrorKind::OffTopic.to_string(), "off_topic");
    }

    #[test]
    fn test_safety_violation() {
        assert!(GuardError::MultiStatement.is_safety_violation());
        assert!(!GuardError::Transient("timeout".into()).is_safety_violation());
    }

    #[test]
    fn test_display_messages_are_capitalized() {
        let errors = vec![
            GuardError::ForbiddenKeyword("DELETE".into()),
            GuardError::MultiStatement,
            GuardError::InvalidIdentifier {
                name: "weird name".into(),
                reason: "reserved keyword".into(),
            },
            GuardError::Cancelled,
            GuardError::Config("bad".into()),
        ];
        for err in errors {
            let text = err.to_string();
            assert!(text.starts_with(char::is_uppercase), "{}", text);
        }
        assert_eq!(
            GuardError::ForbiddenKeyword("DELETE".into()).to_string(),
            "Forbidden keyword: DELETE (read-only queries only)"
        );
    }
}
