//! Pipeline Configuration
//!
//! Typed configuration for every pipeline component, read from the environment
//! (after `dotenv`) with defaults that match the production deployment.

use crate::error::{GuardError, Result};
use crate::safety::guardrails::InjectionPolicy;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Warehouse connection and execution limits
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    /// How long a task waits for a pooled connection before failing
    pub acquire_timeout: Duration,
    pub query_timeout: Duration,
    pub max_rows: usize,
    /// Local retries for transient failures inside the executor
    pub transient_retries: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            acquire_timeout: Duration::from_secs(30),
            query_timeout: Duration::from_secs(30),
            max_rows: 10_000,
            transient_retries: 3,
        }
    }
}

/// External policy-decision service settings
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    /// Base URL of the OPA server; `None` means local rules only
    pub url: Option<String>,
    pub timeout: Duration,
    /// Dotted policy path, e.g. `bi.read_only`
    pub sql_policy: String,
    /// Fail closed instead of falling back to local rules when OPA is unreachable
    pub strict: bool,
    pub privileged_roles: Vec<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout: Duration::from_secs(5),
            sql_policy: "bi.read_only".to_string(),
            strict: false,
            privileged_roles: vec!["admin".to_string(), "finance_head".to_string()],
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "text-embedding-3-small".to_string(),
        }
    }
}

/// Schema context retrieval limits
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub max_tables: usize,
    pub max_patterns: usize,
    pub min_similarity: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_tables: 5,
            max_patterns: 3,
            min_similarity: 0.7,
        }
    }
}

/// Correction / retry loop settings
#[derive(Debug, Clone)]
pub struct CorrectionConfig {
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub max_backoff: Duration,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_millis(100),
            max_backoff: Duration::from_millis(5000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GuardConfig {
    pub threshold: f64,
    pub cache_capacity: usize,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            threshold: 0.7,
            cache_capacity: 1000,
        }
    }
}

/// Score thresholds for the router (0-100 scale)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoutingThresholds {
    pub normal: f64,
    pub warning: f64,
}

impl Default for RoutingThresholds {
    fn default() -> Self {
        Self {
            normal: 70.0,
            warning: 50.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub audit_log_path: Option<PathBuf>,
    pub review_queue_db: Option<PathBuf>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            audit_log_path: None,
            review_queue_db: None,
        }
    }
}

/// Complete pipeline configuration
#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
    pub database: DatabaseConfig,
    pub policy: PolicyConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub correction: CorrectionConfig,
    pub guard: GuardConfig,
    pub routing: RoutingThresholds,
    pub injection_policy: InjectionPolicy,
    pub correction_cache_capacity: usize,
    pub observability: ObservabilityConfig,
}

impl PipelineConfig {
    /// Load configuration from process environment variables.
    ///
    /// Call `dotenv::dotenv().ok()` first to pick up a `.env` file.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let env = EnvReader { lookup: &lookup };

        let database = DatabaseConfig {
            url: env.string("DATABASE_URL"),
            max_connections: env.parse("DB_MAX_CONNECTIONS", defaults.database.max_connections)?,
            acquire_timeout: env.secs("DB_ACQUIRE_TIMEOUT_SECS", defaults.database.acquire_timeout)?,
            query_timeout: env.secs("QUERY_TIMEOUT_SECS", defaults.database.query_timeout)?,
            max_rows: env.parse("QUERY_MAX_ROWS", defaults.database.max_rows)?,
            transient_retries: env.parse("EXECUTOR_TRANSIENT_RETRIES", defaults.database.transient_retries)?,
        };

        let policy = PolicyConfig {
            url: env.string("OPA_URL"),
            timeout: env.secs("OPA_TIMEOUT_SECS", defaults.policy.timeout)?,
            sql_policy: env.string("OPA_SQL_POLICY").unwrap_or(defaults.policy.sql_policy),
            strict: env.parse("OPA_STRICT", defaults.policy.strict)?,
            privileged_roles: env
                .string("OPA_PRIVILEGED_ROLES")
                .map(|s| {
                    s.split(',')
                        .map(|r| r.trim().to_lowercase())
                        .filter(|r| !r.is_empty())
                        .collect()
                })
                .unwrap_or(defaults.policy.privileged_roles),
        };

        let embedding = EmbeddingConfig {
            api_key: env.string("EMBEDDING_API_KEY").or_else(|| env.string("OPENAI_API_KEY")),
            base_url: env.string("EMBEDDING_BASE_URL").unwrap_or(defaults.embedding.base_url),
            model: env.string("EMBEDDING_MODEL").unwrap_or(defaults.embedding.model),
        };

        let retrieval = RetrievalConfig {
            max_tables: env.parse("RETRIEVAL_MAX_TABLES", defaults.retrieval.max_tables)?,
            max_patterns: env.parse("RETRIEVAL_MAX_PATTERNS", defaults.retrieval.max_patterns)?,
            min_similarity: env.parse("RETRIEVAL_MIN_SIMILARITY", defaults.retrieval.min_similarity)?,
        };

        let correction = CorrectionConfig {
            max_retries: env.parse("CORRECTION_MAX_RETRIES", defaults.correction.max_retries)?,
            backoff_base: env.millis("RETRY_BACKOFF_MS", defaults.correction.backoff_base)?,
            max_backoff: env.millis("RETRY_MAX_BACKOFF_MS", defaults.correction.max_backoff)?,
        };

        let cache_capacity = env.parse("CACHE_CAPACITY", defaults.guard.cache_capacity)?;
        let guard = GuardConfig {
            threshold: env.parse("GUARD_THRESHOLD", defaults.guard.threshold)?,
            cache_capacity,
        };

        let routing = RoutingThresholds {
            normal: env.parse("CONFIDENCE_NORMAL_THRESHOLD", defaults.routing.normal)?,
            warning: env.parse("CONFIDENCE_WARNING_THRESHOLD", defaults.routing.warning)?,
        };
        if routing.warning > routing.normal {
            return Err(GuardError::Config(format!(
                "CONFIDENCE_WARNING_THRESHOLD ({}) must not exceed CONFIDENCE_NORMAL_THRESHOLD ({})",
                routing.warning, routing.normal
            )));
        }

        let injection_policy = match env.string("INJECTION_POLICY") {
            Some(raw) => raw.parse()?,
            None => defaults.injection_policy,
        };

        let observability = ObservabilityConfig {
            log_level: env.string("LOG_LEVEL").unwrap_or(defaults.observability.log_level),
            audit_log_path: env.string("AUDIT_LOG_PATH").map(PathBuf::from),
            review_queue_db: env.string("REVIEW_QUEUE_DB").map(PathBuf::from),
        };

        Ok(Self {
            database,
            policy,
            embedding,
            retrieval,
            correction,
            guard,
            routing,
            injection_policy,
            correction_cache_capacity: cache_capacity,
            observability,
        })
    }
}

struct EnvReader<'a, F: Fn(&str) -> Option<String>> {
    lookup: &'a F,
}

impl<'a, F: Fn(&str) -> Option<String>> EnvReader<'a, F> {
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: FromStr>(&self, key: &str, default: T) -> Result<T> {
        match self.string(key) {
            Some(raw) => raw
                .parse::<T>()
                .map_err(|_| GuardError::Config(format!("invalid value for {}: '{}'", key, raw))),
            None => Ok(default),
        }
    }

    fn secs(&self, key: &str, default: Duration) -> Result<Duration> {
        self.parse(key, default.as_secs()).map(Duration::from_secs)
    }

    fn millis(&self, key: &str, default: Duration) -> Result<Duration> {
        self.parse(key, default.as_millis() as u64).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_env_empty() {
        let config = PipelineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.database.max_rows, 10_000);
        assert_eq!(config.database.query_timeout, Duration::from_secs(30));
        assert_eq!(config.retrieval.max_tables, 5);
        assert_eq!(config.correction.max_retries, 3);
        assert_eq!(config.routing.normal, 70.0);
        assert_eq!(config.injection_policy, InjectionPolicy::Block);
        assert!(config.policy.url.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = PipelineConfig::from_lookup(lookup(&[
            ("QUERY_MAX_ROWS", "500"),
            ("OPA_URL", "http://opa:8181"),
            ("INJECTION_POLICY", "flag"),
            ("OPA_PRIVILEGED_ROLES", "Admin, auditor"),
            ("RETRY_BACKOFF_MS", "20"),
        ]))
        .unwrap();
        assert_eq!(config.database.max_rows, 500);
        assert_eq!(config.policy.url.as_deref(), Some("http://opa:8181"));
        assert_eq!(config.injection_policy, InjectionPolicy::FlagAndProceed);
        assert_eq!(config.policy.privileged_roles, vec!["admin", "auditor"]);
        assert_eq!(config.correction.backoff_base, Duration::from_millis(20));
    }

    #[test]
    fn test_invalid_number_names_variable() {
        let err = PipelineConfig::from_lookup(lookup(&[("QUERY_MAX_ROWS", "lots")])).unwrap_err();
        assert!(err.to_string().contains("QUERY_MAX_ROWS"));
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let result = PipelineConfig::from_lookup(lookup(&[
            ("CONFIDENCE_NORMAL_THRESHOLD", "40"),
            ("CONFIDENCE_WARNING_THRESHOLD", "60"),
        ]));
        assert!(result.is_err());
    }
}
