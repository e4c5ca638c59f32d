//! SQL Correction Agent
//!
//! Classifies a database error, runs the matching strategy and decides
//! whether the corrected statement is worth another execution.

use crate::cache::BoundedCache;
use crate::correction::classifier::{classify, ErrorType};
use crate::correction::strategies::apply_strategy;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Corrections below or at this confidence are reported but not retried
pub const RETRY_CONFIDENCE_FLOOR: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionRequest {
    pub sql: String,
    pub error: String,
    pub retry_count: u32,
    /// `table.column` and `table.column=ref_table.ref_column` entries
    #[serde(default)]
    pub schema_hints: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionResponse {
    pub original_sql: String,
    /// Empty when no correction was found
    pub corrected_sql: String,
    pub correction_description: String,
    pub retry_count: u32,
    pub should_retry: bool,
    pub confidence: f64,
    pub error_type: ErrorType,
}

impl CorrectionResponse {
    /// Trail entry for this response
    pub fn to_correction(&self) -> Correction {
        Correction {
            correction_type: self.error_type.as_str().to_string(),
            description: self.correction_description.clone(),
            original: self.original_sql.clone(),
            corrected: self.corrected_sql.clone(),
        }
    }
}

/// One step of the correction trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correction {
    #[serde(rename = "type")]
    pub correction_type: String,
    pub description: String,
    pub original: String,
    pub corrected: String,
}

/// A successful correction remembered by error text
#[derive(Debug, Clone, PartialEq)]
pub struct CachedCorrection {
    pub correction: Correction,
    pub error_type: ErrorType,
    pub confidence: f64,
}

pub type CorrectionCache = BoundedCache<String, CachedCorrection>;

pub struct CorrectionAgent {
    max_retries: u32,
    cache: Arc<CorrectionCache>,
}

impl CorrectionAgent {
    pub fn new(max_retries: u32, cache: Arc<CorrectionCache>) -> Self {
        Self { max_retries, cache }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Propose a corrected statement for a failed execution
    pub fn correct(&self, request: &CorrectionRequest) -> CorrectionResponse {
        debug!(
            "Analyzing SQL error (retry {}, {} schema hints): {}",
            request.retry_count,
            request.schema_hints.len(),
            request.error
        );

        let error_type = classify(&request.error);

        if request.retry_count >= self.max_retries {
            return CorrectionResponse {
                original_sql: request.sql.clone(),
                corrected_sql: String::new(),
                correction_description: "maximum retries exceeded".to_string(),
                retry_count: request.retry_count,
                should_retry: false,
                confidence: 0.0,
                error_type,
            };
        }

        if let Some(cached) = self.cache.get(&request.error) {
            if cached.correction.original == request.sql && !cached.correction.corrected.is_empty() {
                debug!("Reusing cached {} correction", cached.error_type);
                return CorrectionResponse {
                    original_sql: request.sql.clone(),
                    corrected_sql: cached.correction.corrected,
                    correction_description: cached.correction.description,
                    retry_count: request.retry_count + 1,
                    should_retry: cached.confidence > RETRY_CONFIDENCE_FLOOR,
                    confidence: cached.confidence,
                    error_type: cached.error_type,
                };
            }
        }

        let outcome = apply_strategy(error_type, &request.sql, &request.error, &request.schema_hints);
        let should_retry =
            !outcome.corrected_sql.is_empty() && outcome.confidence > RETRY_CONFIDENCE_FLOOR;

        let response = CorrectionResponse {
            original_sql: request.sql.clone(),
            corrected_sql: outcome.corrected_sql,
            correction_description: outcome.description,
            retry_count: request.retry_count + 1,
            should_retry,
            confidence: outcome.confidence,
            error_type,
        };

        if should_retry {
            self.cache.insert(
                request.error.clone(),
                CachedCorrection {
                    correction: response.to_correction(),
                    error_type,
                    confidence: response.confidence,
                },
            );
        }

        info!(
            "Correction for {}: confidence {:.2}, should_retry {}",
            error_type, response.confidence, response.should_retry
        );
        response
    }
}
