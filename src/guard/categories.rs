//! Topic categories
//!
//! Static off-topic (rejection-only) and on-topic (scored) categories.
//! Compiled once on first use and never mutated afterwards.

use lazy_static::lazy_static;
use regex::Regex;

/// Source table row for one category
struct CategoryDef {
    name: &'static str,
    description: &'static str,
    patterns: &'static [&'static str],
    keywords: &'static [&'static str],
    confidence: f64,
}

const OFF_TOPIC: &[CategoryDef] = &[
    CategoryDef {
        name: "weather",
        description: "Weather conditions and forecasts",
        patterns: &[
            r"\bweather\b",
            r"\btemperature\b.*\btoday\b",
            r"\bforecast\b",
            r"\brain\b.*\btomorrow\b",
            r"\bsunny\b",
            r"\bcloudy\b",
        ],
        keywords: &["weather", "temperature", "forecast", "rain", "sunny", "cloudy", "snow", "wind"],
        confidence: 0.95,
    },
    CategoryDef {
        name: "creative_writing",
        description: "Poems, stories and other creative text",
        patterns: &[
            r"\bwrite.*poem\b",
            r"\bwrite.*story\b",
            r"\bwrite.*song\b",
            r"\bcompose\b",
            r"\bcreate.*haiku\b",
            r"\bcreative\b",
        ],
        keywords: &["poem", "story", "song", "haiku", "novel", "fiction", "creative", "compose"],
        confidence: 0.98,
    },
    CategoryDef {
        name: "programming",
        description: "General programming help",
        patterns: &[
            r"\bhow.*implement\b.*\bcode\b",
            r"\bwrite.*function\b",
            r"\bdebug.*code\b",
            r"\balgorithm\b",
            r"\bdata structure\b",
            r"\bsource code\b",
            r"\bprogramming\b",
        ],
        keywords: &[
            "code", "programming", "algorithm", "debug", "function", "class", "variable", "loop", "array",
        ],
        confidence: 0.85,
    },
    CategoryDef {
        name: "general_knowledge",
        description: "Trivia and general knowledge",
        patterns: &[
            r"\bwho.*president\b",
            r"\bwhat.*capital\b",
            r"\bhistory\b",
            r"\bgeography\b",
            r"\bpopulation.*of\b",
        ],
        keywords: &["president", "capital", "country", "history", "geography", "population"],
        confidence: 0.90,
    },
    CategoryDef {
        name: "personal_advice",
        description: "Personal recommendations",
        patterns: &[
            r"\bshould i\b",
            r"\bwhat should\b",
            r"\badvice.*me\b",
            r"\brecommend.*restaurant\b",
            r"\bbest.*movie\b",
        ],
        keywords: &["should", "advice", "recommend", "best movie", "restaurant", "book"],
        confidence: 0.80,
    },
    CategoryDef {
        name: "entertainment",
        description: "Movies, music, games and sports",
        patterns: &[r"\bmovie\b", r"\bmusic\b", r"\bgame\b", r"\bsports\b.*\bscore\b", r"\bcelebrity\b"],
        keywords: &["movie", "music", "game", "sports", "celebrity", "tv show", "netflix"],
        confidence: 0.92,
    },
    CategoryDef {
        name: "math_homework",
        description: "Math problems and homework",
        patterns: &[
            r"\bsolve.*equation\b",
            r"\bcalculate.*\d+\s*[+\-*/]\s*\d+",
            r"\bhomework\b",
            r"\bmath.*problem\b",
            r"\bcalculus\b",
        ],
        keywords: &["equation", "homework", "calculus", "algebra", "geometry"],
        confidence: 0.88,
    },
    CategoryDef {
        name: "travel",
        description: "Travel booking",
        patterns: &[r"\bflight\b", r"\bhotel\b", r"\bvacation\b", r"\btravel.*to\b", r"\bbook.*ticket\b"],
        keywords: &["flight", "hotel", "vacation", "travel", "booking", "reservation"],
        confidence: 0.93,
    },
    CategoryDef {
        name: "cooking",
        description: "Recipes and cooking",
        patterns: &[r"\brecipe\b", r"\bcook\b", r"\bingredients\b", r"\bhow.*make.*food\b"],
        keywords: &["recipe", "cook", "ingredients", "bake", "food"],
        confidence: 0.90,
    },
    CategoryDef {
        name: "legal_advice",
        description: "Legal questions",
        patterns: &[r"\blegal.*advice\b", r"\blawyer\b", r"\bcourt\b", r"\blawsuit\b"],
        keywords: &["legal", "lawyer", "court", "lawsuit", "attorney"],
        confidence: 0.95,
    },
];

const ON_TOPIC: &[CategoryDef] = &[
    CategoryDef {
        name: "healthcare_analytics",
        description: "Patients, visits, appointments and clinical operations",
        patterns: &[
            r"\bpatient.*visit\b",
            r"\bappointment.*count\b",
            r"\bdoctor.*performance\b",
            r"\bclinic.*metric\b",
            r"\bpharmacy.*sales\b",
        ],
        keywords: &[
            "patient", "visit", "appointment", "doctor", "clinic", "hospital", "treatment", "diagnosis",
            "prescription", "pharmacy", "medical", "healthcare", "health", "admission", "discharge", "bed",
        ],
        confidence: 1.0,
    },
    CategoryDef {
        name: "financial_analytics",
        description: "Revenue, billing, payments and costs",
        patterns: &[
            r"\brevenue.*by\b",
            r"\btotal.*amount\b",
            r"\bprofit.*margin\b",
            r"\bbilling.*summary\b",
            r"\bpayment.*status\b",
        ],
        keywords: &[
            "revenue", "profit", "cost", "expense", "billing", "payment", "amount", "price", "income",
            "earnings", "margin", "budget", "financial", "money", "cash", "invoice", "transaction",
        ],
        confidence: 1.0,
    },
    CategoryDef {
        name: "operational_metrics",
        description: "Trends, comparisons and KPIs",
        patterns: &[
            r"\bshow.*trend\b",
            r"\bcompare.*performance\b",
            r"\bdepartment.*statistics\b",
            r"\bmonthly.*report\b",
            r"\bkpi\b",
        ],
        keywords: &[
            "trend", "compare", "report", "statistics", "metric", "kpi", "performance", "growth", "rate",
            "average", "total", "count", "summary", "breakdown", "analysis", "dashboard",
        ],
        confidence: 1.0,
    },
    CategoryDef {
        name: "inventory_management",
        description: "Stock levels and supply",
        patterns: &[
            r"\binventory.*level\b",
            r"\bstock.*status\b",
            r"\bmedicine.*available\b",
            r"\bsupply.*chain\b",
        ],
        keywords: &[
            "inventory", "stock", "medicine", "supply", "drug", "item", "quantity", "available", "order",
            "reorder", "warehouse",
        ],
        confidence: 1.0,
    },
    CategoryDef {
        name: "staff_management",
        description: "Staffing, shifts and payroll",
        patterns: &[
            r"\bstaff.*schedule\b",
            r"\bemployee.*count\b",
            r"\bshift.*report\b",
            r"\bpayroll.*summary\b",
        ],
        keywords: &[
            "staff", "employee", "doctor", "nurse", "shift", "schedule", "payroll", "salary", "working",
            "hours", "attendance",
        ],
        confidence: 1.0,
    },
];

/// A compiled topic category
#[derive(Debug)]
pub struct Category {
    pub name: &'static str,
    pub description: &'static str,
    pub patterns: Vec<Regex>,
    pub keywords: Vec<&'static str>,
    /// Whole-word matchers, parallel to `keywords`
    keyword_patterns: Vec<Regex>,
    pub confidence: f64,
}

impl Category {
    fn compile(def: &CategoryDef) -> Self {
        Self {
            name: def.name,
            description: def.description,
            patterns: def.patterns.iter().filter_map(|p| Regex::new(p).ok()).collect(),
            keywords: def.keywords.to_vec(),
            keyword_patterns: def
                .keywords
                .iter()
                .filter_map(|k| Regex::new(&format!(r"\b{}\b", regex::escape(k))).ok())
                .collect(),
            confidence: def.confidence,
        }
    }

    /// Rejection test for off-topic categories: any pattern or whole-word
    /// keyword hit. `query` must already be lowercased.
    pub fn matches(&self, query: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(query))
            || self.keyword_patterns.iter().any(|k| k.is_match(query))
    }

    /// Overlap score for on-topic categories: share of keywords present plus
    /// 0.1 per matching pattern, capped at 1.0. `query` must be lowercased.
    pub fn score(&self, query: &str) -> f64 {
        if self.keywords.is_empty() {
            return 0.0;
        }
        let keyword_hits = self.keywords.iter().filter(|k| query.contains(*k)).count();
        let pattern_hits = self.patterns.iter().filter(|p| p.is_match(query)).count();
        let score = keyword_hits as f64 / self.keywords.len() as f64 + 0.1 * pattern_hits as f64;
        score.min(1.0)
    }
}

lazy_static! {
    /// Checked first, in order; the first match rejects the query
    pub static ref OFF_TOPIC_CATEGORIES: Vec<Category> = OFF_TOPIC.iter().map(Category::compile).collect();

    pub static ref ON_TOPIC_CATEGORIES: Vec<Category> = ON_TOPIC.iter().map(Category::compile).collect();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_patterns_compile() {
        for (def, compiled) in OFF_TOPIC.iter().zip(OFF_TOPIC_CATEGORIES.iter()) {
            assert_eq!(def.patterns.len(), compiled.patterns.len(), "{}", def.name);
            assert_eq!(def.keywords.len(), compiled.keyword_patterns.len(), "{}", def.name);
        }
        for (def, compiled) in ON_TOPIC.iter().zip(ON_TOPIC_CATEGORIES.iter()) {
            assert_eq!(def.patterns.len(), compiled.patterns.len(), "{}", def.name);
        }
    }

    #[test]
    fn test_keyword_matches_whole_words_only() {
        let weather = &OFF_TOPIC_CATEGORIES[0];
        assert!(weather.matches("will it rain tomorrow"));
        assert!(!weather.matches("staff training hours"));
    }

    #[test]
    fn test_on_topic_score() {
        let financial = ON_TOPIC_CATEGORIES
            .iter()
            .find(|c| c.name == "financial_analytics")
            .unwrap();
        // revenue: 1 of 17 keywords plus the `revenue.*by` pattern
        let score = financial.score("revenue by department");
        assert!((score - (1.0 / 17.0 + 0.1)).abs() < 1e-9);
        assert_eq!(financial.score("hello there"), 0.0);
    }
}
