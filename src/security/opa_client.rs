//! OPA Client
//!
//! Queries an Open Policy Agent server through its data API.

use crate::config::PolicyConfig;
use crate::error::{GuardError, Result};
use crate::security::policy::{DecisionSource, PolicyDecision, PolicyInput};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// External policy-decision service. `Err` means no decision could be
/// obtained (unreachable, malformed reply), never a denial.
#[async_trait]
pub trait PolicyDecisionPoint: Send + Sync {
    async fn evaluate(&self, input: &PolicyInput) -> Result<PolicyDecision>;
}

pub struct OpaClient {
    client: reqwest::Client,
    base_url: String,
    policy: String,
}

impl OpaClient {
    pub fn new(base_url: &str, policy: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GuardError::Config(format!("failed to build OPA client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            policy: policy.to_string(),
        })
    }

    /// Build a client when `OPA_URL` is configured.
    pub fn from_config(config: &PolicyConfig) -> Result<Option<Self>> {
        match &config.url {
            Some(url) => Self::new(url, &config.sql_policy, config.timeout).map(Some),
            None => Ok(None),
        }
    }

    /// `bi.read_only` → `{base}/v1/data/bi/read_only`
    pub fn decision_url(&self) -> String {
        format!("{}/v1/data/{}", self.base_url, self.policy.replace('.', "/"))
    }
}

#[async_trait]
impl PolicyDecisionPoint for OpaClient {
    async fn evaluate(&self, input: &PolicyInput) -> Result<PolicyDecision> {
        let url = self.decision_url();
        debug!("Evaluating OPA policy at {}", url);

        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "input": input }))
            .send()
            .await
            .map_err(|e| GuardError::Policy(format!("OPA request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GuardError::Policy(format!("OPA returned {}: {}", status, body)));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GuardError::Policy(format!("invalid OPA response: {}", e)))?;

        Ok(parse_decision(&body))
    }
}

/// Interpret an OPA data-API reply. The result is either a bare boolean or
/// an object carrying `allow`; an undefined result denies.
pub fn parse_decision(body: &serde_json::Value) -> PolicyDecision {
    match body.get("result") {
        Some(serde_json::Value::Bool(true)) => PolicyDecision::allow(DecisionSource::Remote),
        Some(serde_json::Value::Bool(false)) => {
            PolicyDecision::deny("denied by policy", DecisionSource::Remote)
        }
        Some(serde_json::Value::Object(result)) => {
            let allowed = result.get("allow").and_then(|v| v.as_bool()).unwrap_or(false);
            let reason = result
                .get("blocked_reason")
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(str::to_string);
            let warnings = result
                .get("warnings")
                .and_then(|v| v.as_array())
                .map(|arr| {
                    arr.iter()
                        .filter_map(|w| w.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default();
            PolicyDecision {
                allowed,
                reason: if allowed {
                    None
                } else {
                    Some(reason.unwrap_or_else(|| "denied by policy".to_string()))
                },
                warnings,
                source: DecisionSource::Remote,
            }
        }
        _ => PolicyDecision::deny("policy result undefined", DecisionSource::Remote),
    }
}
