//! Routing
//!
//! Turns a confidence score into the user-facing disposition plus the
//! messages and review metadata that go with it.

use crate::config::RoutingThresholds;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Longest query excerpt quoted back in a clarification request
const CLARIFICATION_EXCERPT_CHARS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingDecision {
    /// Answer shown directly
    Normal,
    /// Answer shown with a verification note and queued for review
    Warning,
    /// Answer withheld; the user is asked to rephrase
    Clarify,
}

impl RoutingDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingDecision::Normal => "normal",
            RoutingDecision::Warning => "warning",
            RoutingDecision::Clarify => "clarify",
        }
    }

    pub fn needs_review(&self) -> bool {
        !matches!(self, RoutingDecision::Normal)
    }

    pub fn shows_result(&self) -> bool {
        !matches!(self, RoutingDecision::Clarify)
    }
}

impl fmt::Display for RoutingDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewPriority {
    Critical,
    High,
    Medium,
    Low,
}

impl ReviewPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewPriority::Critical => "critical",
            ReviewPriority::High => "high",
            ReviewPriority::Medium => "medium",
            ReviewPriority::Low => "low",
        }
    }
}

impl fmt::Display for ReviewPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Who should look at a queued result, lowest to highest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EscalationLevel {
    None,
    Junior,
    Standard,
    Senior,
}

impl EscalationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscalationLevel::None => "none",
            EscalationLevel::Junior => "junior",
            EscalationLevel::Standard => "standard",
            EscalationLevel::Senior => "senior",
        }
    }

    fn bump(self) -> Self {
        match self {
            EscalationLevel::None => EscalationLevel::None,
            EscalationLevel::Junior => EscalationLevel::Standard,
            EscalationLevel::Standard | EscalationLevel::Senior => EscalationLevel::Senior,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Router {
    thresholds: RoutingThresholds,
}

impl Router {
    pub fn new(thresholds: RoutingThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> RoutingThresholds {
        self.thresholds
    }

    /// `score >= normal` → normal, `score >= warning` → warning, else clarify
    pub fn decide(&self, score: f64) -> RoutingDecision {
        if score >= self.thresholds.normal {
            RoutingDecision::Normal
        } else if score >= self.thresholds.warning {
            RoutingDecision::Warning
        } else {
            RoutingDecision::Clarify
        }
    }

    pub fn warning_message(&self, score: f64) -> String {
        format!(
            "This result has a confidence score of {:.0}%. Please verify the data before making decisions.",
            score
        )
    }

    pub fn clarification_message(&self, query: &str) -> String {
        format!(
            "I'm not confident about the results for \"{}\". Could you please rephrase or provide more details?",
            truncate(query, CLARIFICATION_EXCERPT_CHARS)
        )
    }

    pub fn review_priority(&self, score: f64) -> ReviewPriority {
        if score < 30.0 {
            ReviewPriority::Critical
        } else if score < 50.0 {
            ReviewPriority::High
        } else if score < 70.0 {
            ReviewPriority::Medium
        } else {
            ReviewPriority::Low
        }
    }

    /// Base level from the score, one level higher after three or more retries
    pub fn escalation_level(&self, score: f64, retry_count: u32) -> EscalationLevel {
        let base = if score < 30.0 {
            EscalationLevel::Senior
        } else if score < 50.0 {
            EscalationLevel::Standard
        } else if score < 70.0 {
            EscalationLevel::Junior
        } else {
            EscalationLevel::None
        };

        if retry_count >= 3 {
            base.bump()
        } else {
            base
        }
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let head: String = s.chars().take(max_chars).collect();
    format!("{}...", head)
}
