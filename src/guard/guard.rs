//! Topic Guard
//!
//! Pre-filters natural-language queries before any SQL is generated.
//! Off-topic categories reject outright; otherwise the best on-topic
//! category must clear the acceptance threshold or the user is asked to
//! clarify.

use crate::cache::BoundedCache;
use crate::error::GuardError;
use crate::guard::categories::{OFF_TOPIC_CATEGORIES, ON_TOPIC_CATEGORIES};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Category reported when no on-topic category is confident enough
pub const AMBIGUOUS_CATEGORY: &str = "ambiguous";

const SUGGESTION_TERMS: &[&str] = &[
    "revenue",
    "patients",
    "appointments",
    "visits",
    "billing",
    "pharmacy",
    "clinic",
    "doctors",
];

const MAX_SUGGESTIONS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    En,
    Ar,
}

impl Locale {
    /// Parse a language tag such as `ar` or `ar-SA`; anything unknown is English.
    pub fn from_tag(tag: &str) -> Self {
        let lang = tag.split(['-', '_']).next().unwrap_or("").to_lowercase();
        match lang.as_str() {
            "ar" => Locale::Ar,
            _ => Locale::En,
        }
    }

    pub fn rejection_message(&self) -> &'static str {
        match self {
            Locale::En => "I can only help with healthcare and financial data queries. Please ask about patient visits, revenue, appointments, or other business metrics.",
            Locale::Ar => "يمكنني فقط المساعدة في استعلامات البيانات الصحية والمالية. يرجى السؤال عن زيارات المرضى أو الإيرادات أو المواعيد أو مقاييس الأعمال الأخرى.",
        }
    }

    pub fn clarification_message(&self) -> &'static str {
        match self {
            Locale::En => "Could you please specify what data you'd like to see? For example: patient visits, revenue, appointments, or inventory?",
            Locale::Ar => "هل يمكنك تحديد البيانات التي تريد رؤيتها؟ على سبيل المثال: زيارات المرضى أو الإيرادات أو المواعيد أو المخزون؟",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardResult {
    pub is_on_topic: bool,
    pub category: String,
    pub confidence: f64,
    pub rejection_message: Option<String>,
    pub needs_clarification: bool,
    pub clarification_message: Option<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

impl GuardResult {
    /// Whether the query may continue to SQL generation
    pub fn admits(&self) -> bool {
        self.is_on_topic && !self.needs_clarification
    }

    /// Terminal error for a query the guard stops
    pub fn to_error(&self) -> Option<GuardError> {
        if !self.is_on_topic {
            return Some(GuardError::OffTopic {
                category: self.category.clone(),
                message: self.rejection_message.clone().unwrap_or_default(),
            });
        }
        if self.needs_clarification {
            return Some(GuardError::NeedsClarification(
                self.clarification_message.clone().unwrap_or_default(),
            ));
        }
        None
    }
}

/// Keyed by locale and exact query text
pub type GuardCache = BoundedCache<(Locale, String), GuardResult>;

pub struct TopicGuard {
    threshold: f64,
    cache: Arc<GuardCache>,
}

impl TopicGuard {
    pub fn new(threshold: f64, cache: Arc<GuardCache>) -> Self {
        Self { threshold, cache }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn guard(&self, query: &str, locale: &str) -> GuardResult {
        let locale = Locale::from_tag(locale);
        let key = (locale, query.to_string());
        if let Some(cached) = self.cache.get(&key) {
            debug!("Guard cache hit");
            return cached;
        }

        let result = self.evaluate(query, locale);
        info!(
            "Guard decision: category={}, on_topic={}, clarify={}, confidence={:.2}",
            result.category, result.is_on_topic, result.needs_clarification, result.confidence
        );
        self.cache.insert(key, result.clone());
        result
    }

    fn evaluate(&self, query: &str, locale: Locale) -> GuardResult {
        let lower = query.to_lowercase();

        if let Some(category) = OFF_TOPIC_CATEGORIES.iter().find(|c| c.matches(&lower)) {
            return GuardResult {
                is_on_topic: false,
                category: category.name.to_string(),
                confidence: category.confidence,
                rejection_message: Some(locale.rejection_message().to_string()),
                needs_clarification: false,
                clarification_message: None,
                suggestions: Vec::new(),
            };
        }

        let best = ON_TOPIC_CATEGORIES
            .iter()
            .map(|c| (c.name, c.score(&lower)))
            .fold(None, |best: Option<(&str, f64)>, (name, score)| match best {
                Some((_, top)) if top >= score => best,
                _ => Some((name, score)),
            });

        match best {
            Some((name, score)) if score > 0.0 && score >= self.threshold => GuardResult {
                is_on_topic: true,
                category: name.to_string(),
                confidence: score,
                rejection_message: None,
                needs_clarification: false,
                clarification_message: None,
                suggestions: Vec::new(),
            },
            best => GuardResult {
                is_on_topic: true,
                category: AMBIGUOUS_CATEGORY.to_string(),
                confidence: best.map(|(_, score)| score).unwrap_or(0.0),
                rejection_message: None,
                needs_clarification: true,
                clarification_message: Some(locale.clarification_message().to_string()),
                suggestions: suggestions_for(&lower),
            },
        }
    }
}

/// Up to three suggestion terms the query does not already mention
fn suggestions_for(lower: &str) -> Vec<String> {
    SUGGESTION_TERMS
        .iter()
        .filter(|term| {
            let stem = term.trim_end_matches('s');
            !lower.contains(stem)
        })
        .take(MAX_SUGGESTIONS)
        .map(|term| term.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guard(threshold: f64) -> TopicGuard {
        TopicGuard::new(threshold, Arc::new(GuardCache::new(16)))
    }

    #[test]
    fn test_weather_is_off_topic() {
        let result = guard(0.7).guard("What's the weather tomorrow?", "en");
        assert!(!result.is_on_topic);
        assert_eq!(result.category, "weather");
        assert_eq!(result.confidence, 0.95);
        assert_eq!(result.rejection_message.as_deref(), Some(Locale::En.rejection_message()));
        assert!(matches!(result.to_error(), Some(GuardError::OffTopic { .. })));
    }

    #[test]
    fn test_arabic_rejection_and_fallback() {
        let g = guard(0.7);
        let ar = g.guard("write a poem about the sea", "ar-SA");
        assert_eq!(ar.category, "creative_writing");
        assert_eq!(ar.rejection_message.as_deref(), Some(Locale::Ar.rejection_message()));

        let fallback = g.guard("write a poem about the sea", "fr");
        assert_eq!(fallback.rejection_message.as_deref(), Some(Locale::En.rejection_message()));
    }

    #[test]
    fn test_low_overlap_needs_clarification() {
        let result = guard(0.7).guard("revenue by department", "en");
        assert!(result.is_on_topic);
        assert!(result.needs_clarification);
        assert_eq!(result.category, AMBIGUOUS_CATEGORY);
        assert!(!result.admits());
        assert!(result.suggestions.len() <= 3);
        assert!(!result.suggestions.contains(&"revenue".to_string()));
        assert_eq!(result.suggestions, vec!["patients", "appointments", "visits"]);
    }

    #[test]
    fn test_unknown_text_needs_clarification() {
        let result = guard(0.0).guard("hello there", "en");
        assert!(result.needs_clarification);
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_accepted_above_threshold() {
        let result = guard(0.1).guard("total revenue by department", "en");
        assert!(result.admits());
        assert_eq!(result.category, "financial_analytics");
        assert!(result.to_error().is_none());
    }

    #[test]
    fn test_results_are_cached() {
        let cache = Arc::new(GuardCache::new(16));
        let g = TopicGuard::new(0.7, Arc::clone(&cache));
        g.guard("What's the weather tomorrow?", "en");
        g.guard("What's the weather tomorrow?", "en");
        assert_eq!(cache.len(), 1);
        g.guard("What's the weather tomorrow?", "ar");
        assert_eq!(cache.len(), 2);
    }
}
