//! Retry Orchestrator
//!
//! Bounded execute → correct → execute loop.
//!
//! ```text
//! Initial → Executing → Success
//!                     → Failed(Transient) → backoff → Executing
//!                     → Failed(Rejected)  → Correcting → backoff → Executing
//!                                         → Uncorrectable
//!           (attempts used up)            → Exhausted
//!           (token cancelled)             → Cancelled
//! ```
//!
//! Execution within one loop is strictly sequential. Every wait (execution,
//! re-validation of a correction, backoff) is raced against the caller's
//! cancellation token.

use crate::correction::agent::{Correction, CorrectionAgent, CorrectionRequest};
use crate::correction::classifier::classify;
use crate::error::{GuardError, Result};
use crate::execution::executor::QueryExecutor;
use crate::execution::result::ExecutionResult;
use crate::execution_loop::retry::{RetryPolicy, RetryState};
use crate::safety::guardrails::SafetyAnalyzer;
use crate::safety::parameterizer::ParameterizedQuery;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Admits a corrected statement back into execution. Implementations run
/// the same gates the first statement went through.
#[async_trait]
pub trait StatementGate: Send + Sync {
    async fn admit(&self, sql: &str) -> Result<ParameterizedQuery>;
}

#[async_trait]
impl StatementGate for SafetyAnalyzer {
    async fn admit(&self, sql: &str) -> Result<ParameterizedQuery> {
        self.prepare(sql)
    }
}

/// Terminal state of a retry loop; every variant carries the full trail
#[derive(Debug)]
pub enum RetryOutcome {
    Success {
        result: ExecutionResult,
        final_sql: String,
        state: RetryState,
    },
    Exhausted {
        state: RetryState,
    },
    Uncorrectable {
        /// Database message, verbatim
        last_error: String,
        description: String,
        state: RetryState,
    },
    Cancelled {
        state: RetryState,
    },
}

impl RetryOutcome {
    pub fn state(&self) -> &RetryState {
        match self {
            RetryOutcome::Success { state, .. }
            | RetryOutcome::Exhausted { state }
            | RetryOutcome::Uncorrectable { state, .. }
            | RetryOutcome::Cancelled { state } => state,
        }
    }

    pub fn trail(&self) -> &[Correction] {
        &self.state().corrections
    }

    pub fn attempts(&self) -> u32 {
        self.state().attempt
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RetryOutcome::Success { .. })
    }

    /// Error for a non-success outcome
    pub fn error(&self) -> Option<GuardError> {
        match self {
            RetryOutcome::Success { .. } => None,
            RetryOutcome::Exhausted { state } => Some(GuardError::Exhausted {
                attempts: state.attempt,
                last_error: state.last_error.clone().unwrap_or_default(),
            }),
            RetryOutcome::Uncorrectable { last_error, .. } => {
                Some(GuardError::Uncorrectable(last_error.clone()))
            }
            RetryOutcome::Cancelled { .. } => Some(GuardError::Cancelled),
        }
    }
}

pub struct RetryOrchestrator {
    executor: Arc<dyn QueryExecutor>,
    agent: Arc<CorrectionAgent>,
    policy: RetryPolicy,
}

impl RetryOrchestrator {
    pub fn new(executor: Arc<dyn QueryExecutor>, agent: Arc<CorrectionAgent>, policy: RetryPolicy) -> Self {
        Self {
            executor,
            agent,
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `initial` (already admitted from `sql`) until success or a
    /// terminal state.
    pub async fn run(
        &self,
        sql: &str,
        initial: ParameterizedQuery,
        gate: &dyn StatementGate,
        schema_hints: &[String],
        cancel: &CancellationToken,
    ) -> RetryOutcome {
        let mut state = RetryState::new(self.policy.max_attempts, sql);
        let mut current_sql = sql.to_string();
        let mut query = initial;

        loop {
            state.attempt += 1;
            info!("Execution attempt {} of {}", state.attempt, state.max_attempts);

            let executed = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Query cancelled during execution attempt {}", state.attempt);
                    return RetryOutcome::Cancelled { state: state.finish() };
                }
                result = self.executor.execute(&query) => result,
            };

            match executed {
                Ok(result) => {
                    info!("Execution succeeded on attempt {}", state.attempt);
                    state.last_sql = current_sql.clone();
                    return RetryOutcome::Success {
                        result,
                        final_sql: current_sql,
                        state: state.finish(),
                    };
                }
                Err(GuardError::Transient(message)) => {
                    warn!("Transient failure on attempt {}: {}", state.attempt, message);
                    state.record_transient(&current_sql, &message);
                    if !state.can_retry() {
                        return RetryOutcome::Exhausted { state: state.finish() };
                    }
                }
                Err(GuardError::Rejected(message)) => {
                    let error_type = classify(&message);
                    warn!("Statement rejected ({}): {}", error_type, message);
                    state.record_failure(&current_sql, &message, error_type.as_str());
                    if !state.can_retry() {
                        return RetryOutcome::Exhausted { state: state.finish() };
                    }

                    let response = self.agent.correct(&CorrectionRequest {
                        sql: current_sql.clone(),
                        error: message.clone(),
                        retry_count: state.correction_count() as u32,
                        schema_hints: schema_hints.to_vec(),
                    });
                    if !response.should_retry {
                        info!("No usable correction: {}", response.correction_description);
                        return RetryOutcome::Uncorrectable {
                            last_error: message,
                            description: response.correction_description,
                            state: state.finish(),
                        };
                    }

                    state.corrections.push(response.to_correction());
                    let admitted = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            info!("Query cancelled while re-validating correction");
                            return RetryOutcome::Cancelled { state: state.finish() };
                        }
                        admitted = gate.admit(&response.corrected_sql) => admitted,
                    };
                    match admitted {
                        Ok(admitted) => {
                            info!("Applied correction: {}", response.correction_description);
                            current_sql = response.corrected_sql;
                            query = admitted;
                        }
                        Err(e) => {
                            warn!("Corrected statement failed validation: {}", e);
                            return RetryOutcome::Uncorrectable {
                                last_error: message,
                                description: format!("corrected statement rejected: {}", e),
                                state: state.finish(),
                            };
                        }
                    }
                }
                Err(GuardError::Cancelled) => {
                    return RetryOutcome::Cancelled { state: state.finish() };
                }
                Err(other) => {
                    let message = other.to_string();
                    warn!("Execution failed with non-retryable error: {}", message);
                    state.record_failure(&current_sql, &message, other.kind().to_string().as_str());
                    return RetryOutcome::Uncorrectable {
                        description: "no correction strategy for this failure".to_string(),
                        last_error: message,
                        state: state.finish(),
                    };
                }
            }

            let delay = self.policy.backoff_for(state.attempt - 1);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Query cancelled during backoff");
                    return RetryOutcome::Cancelled { state: state.finish() };
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
