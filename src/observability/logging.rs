//! Tracing subscriber setup

use crate::config::ObservabilityConfig;
use crate::error::{GuardError, Result};
use tracing_subscriber::EnvFilter;

/// Noisy dependencies kept at warn unless `RUST_LOG` says otherwise
const QUIET_TARGETS: &[(&str, &str)] = &[
    ("sqlx", "warn"),
    ("sqlparser", "warn"),
    ("hyper", "warn"),
    ("reqwest", "warn"),
    ("rustls", "warn"),
];

/// Filter from `RUST_LOG` when set, otherwise the configured level plus
/// the quiet-target overrides.
pub fn build_env_filter(level: &str) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let mut directives = vec![level.to_string()];
    directives.extend(QUIET_TARGETS.iter().map(|(target, lvl)| format!("{}={}", target, lvl)));
    let filter = directives.join(",");
    EnvFilter::try_new(&filter)
        .map_err(|e| GuardError::Config(format!("invalid log filter '{}': {}", filter, e)))
}

/// Install the global subscriber. A second call is a no-op.
pub fn init_tracing(config: &ObservabilityConfig) -> Result<()> {
    let filter = build_env_filter(&config.log_level)?;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .compact()
        .try_init();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_accepts_plain_level() {
        assert!(build_env_filter("debug").is_ok());
    }

    #[test]
    fn test_init_twice_is_harmless() {
        let config = ObservabilityConfig::default();
        assert!(init_tracing(&config).is_ok());
        assert!(init_tracing(&config).is_ok());
    }
}
