//! Authorization Policy
//!
//! Builds the policy-decision input for a statement, applies the local
//! fallback rule and enforces the decision before execution.

use crate::config::PolicyConfig;
use crate::error::{GuardError, Result};
use crate::safety::inspect::SqlProfile;
use crate::security::opa_client::PolicyDecisionPoint;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Caller identity; only used for authorization and audit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerContext {
    pub user_id: String,
    pub tenant_id: Option<String>,
    pub roles: Vec<String>,
}

impl CallerContext {
    pub fn new(user_id: impl Into<String>, roles: Vec<String>) -> Self {
        Self {
            user_id: user_id.into(),
            tenant_id: None,
            roles: roles.into_iter().map(|r| r.to_lowercase()).collect(),
        }
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn has_any_role(&self, roles: &[String]) -> bool {
        self.roles
            .iter()
            .any(|r| roles.iter().any(|p| p.eq_ignore_ascii_case(r)))
    }
}

/// Input document sent to the policy-decision service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyInput {
    pub action: String,
    pub sql: String,
    pub is_select_only: bool,
    pub tables: Vec<String>,
    pub roles: Vec<String>,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
}

impl PolicyInput {
    pub fn for_query(sql: &str, caller: &CallerContext) -> Self {
        let profile = SqlProfile::from_sql(sql);
        Self {
            action: "query".to_string(),
            sql: sql.to_string(),
            is_select_only: profile.is_select_only,
            tables: profile.tables,
            roles: caller.roles.clone(),
            user_id: caller.user_id.clone(),
            tenant_id: caller.tenant_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    Remote,
    Local,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub allowed: bool,
    pub reason: Option<String>,
    pub warnings: Vec<String>,
    pub source: DecisionSource,
}

impl PolicyDecision {
    pub fn allow(source: DecisionSource) -> Self {
        Self {
            allowed: true,
            reason: None,
            warnings: Vec::new(),
            source,
        }
    }

    pub fn deny(reason: impl Into<String>, source: DecisionSource) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            warnings: Vec::new(),
            source,
        }
    }
}

/// Conservative rule used when the policy service cannot be reached:
/// non-privileged callers may only run SELECT/WITH statements.
#[derive(Debug, Clone)]
pub struct LocalPolicy {
    privileged_roles: Vec<String>,
}

impl LocalPolicy {
    pub fn new(privileged_roles: Vec<String>) -> Self {
        Self { privileged_roles }
    }

    pub fn decide(&self, input: &PolicyInput) -> PolicyDecision {
        if input.is_select_only {
            return PolicyDecision::allow(DecisionSource::Local);
        }
        let privileged = input
            .roles
            .iter()
            .any(|r| self.privileged_roles.iter().any(|p| p.eq_ignore_ascii_case(r)));
        if privileged {
            PolicyDecision::allow(DecisionSource::Local)
        } else {
            PolicyDecision::deny(
                format!("only SELECT queries are allowed for roles {:?}", input.roles),
                DecisionSource::Local,
            )
        }
    }
}

impl Default for LocalPolicy {
    fn default() -> Self {
        Self::new(PolicyConfig::default().privileged_roles)
    }
}

/// Authorization gate in front of the executor
pub struct PolicyEnforcer {
    remote: Option<Arc<dyn PolicyDecisionPoint>>,
    local: LocalPolicy,
    strict: bool,
}

impl PolicyEnforcer {
    pub fn new(remote: Option<Arc<dyn PolicyDecisionPoint>>, local: LocalPolicy, strict: bool) -> Self {
        Self {
            remote,
            local,
            strict,
        }
    }

    /// Local rules only.
    pub fn local_only(local: LocalPolicy) -> Self {
        Self::new(None, local, false)
    }

    /// Decide whether `caller` may run `sql`. A denial is an `Unauthorized`
    /// error; an unreachable service falls back to the local rule unless the
    /// enforcer is strict.
    pub async fn authorize(&self, sql: &str, caller: &CallerContext) -> Result<PolicyDecision> {
        let input = PolicyInput::for_query(sql, caller);

        let decision = match &self.remote {
            Some(remote) => match remote.evaluate(&input).await {
                Ok(decision) => decision,
                Err(e) if self.strict => {
                    return Err(GuardError::Policy(format!(
                        "policy service unavailable in strict mode: {}",
                        e
                    )));
                }
                Err(e) => {
                    warn!("Policy service unavailable, using local rules: {}", e);
                    let mut decision = self.local.decide(&input);
                    decision
                        .warnings
                        .push("policy service unavailable; local rules applied".to_string());
                    decision
                }
            },
            None => self.local.decide(&input),
        };

        info!(
            user_id = %caller.user_id,
            allowed = decision.allowed,
            source = ?decision.source,
            tables = ?input.tables,
            "Policy decision"
        );

        if !decision.allowed {
            return Err(GuardError::Unauthorized(
                decision
                    .reason
                    .clone()
                    .unwrap_or_else(|| format!("query not allowed for roles {:?}", caller.roles)),
            ));
        }
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Unreachable;

    #[async_trait]
    impl PolicyDecisionPoint for Unreachable {
        async fn evaluate(&self, _input: &PolicyInput) -> Result<PolicyDecision> {
            Err(GuardError::Policy("connection refused".to_string()))
        }
    }

    struct DenyAll;

    #[async_trait]
    impl PolicyDecisionPoint for DenyAll {
        async fn evaluate(&self, _input: &PolicyInput) -> Result<PolicyDecision> {
            Ok(PolicyDecision::deny("tenant mismatch", DecisionSource::Remote))
        }
    }

    fn analyst() -> CallerContext {
        CallerContext::new("u-1", vec!["Analyst".to_string()])
    }

    #[test]
    fn test_policy_input() {
        let input = PolicyInput::for_query(
            "SELECT * FROM fact_billing f JOIN dim_patient p ON f.patient_id = p.patient_id",
            &analyst(),
        );
        assert!(input.is_select_only);
        assert_eq!(input.tables, vec!["fact_billing", "dim_patient"]);
        assert_eq!(input.roles, vec!["analyst"]);
    }

    #[test]
    fn test_policy_input_includes_nested_tables() {
        let input = PolicyInput::for_query(
            "SELECT COALESCE((SELECT MAX(salary) FROM staff_payroll), 0) FROM dim_patient",
            &analyst(),
        );
        assert!(input.tables.contains(&"staff_payroll".to_string()));
        assert!(input.tables.contains(&"dim_patient".to_string()));
    }

    #[test]
    fn test_local_rule() {
        let local = LocalPolicy::default();
        let mut input = PolicyInput::for_query("DELETE FROM dim_patient", &analyst());
        assert!(!local.decide(&input).allowed);
        input.roles = vec!["admin".to_string()];
        assert!(local.decide(&input).allowed);
    }

    #[tokio::test]
    async fn test_fallback_when_unreachable() {
        let enforcer = PolicyEnforcer::new(Some(Arc::new(Unreachable)), LocalPolicy::default(), false);
        let decision = enforcer.authorize("SELECT 1", &analyst()).await.unwrap();
        assert_eq!(decision.source, DecisionSource::Local);

        let err = enforcer
            .authorize("UPDATE dim_patient SET x = 1", &analyst())
            .await
            .unwrap_err();
        assert!(matches!(err, GuardError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_strict_mode_fails_closed() {
        let enforcer = PolicyEnforcer::new(Some(Arc::new(Unreachable)), LocalPolicy::default(), true);
        let err = enforcer.authorize("SELECT 1", &analyst()).await.unwrap_err();
        assert!(matches!(err, GuardError::Policy(_)));
    }

    #[tokio::test]
    async fn test_remote_denial() {
        let enforcer = PolicyEnforcer::new(Some(Arc::new(DenyAll)), LocalPolicy::default(), false);
        match enforcer.authorize("SELECT 1", &analyst()).await {
            Err(GuardError::Unauthorized(reason)) => assert_eq!(reason, "tenant mismatch"),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
