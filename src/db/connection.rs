//! Database connection management using sqlx

use crate::config::DatabaseConfig;
use crate::error::{GuardError, Result};
use crate::execution::executor::classify_sqlx_error;
use serde::Serialize;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

pub type DbPool = PgPool;

/// Open a pool whose sessions default to read-only transactions.
pub async fn init_read_only_pool(config: &DatabaseConfig) -> Result<PgPool> {
    let url = config
        .url
        .as_deref()
        .ok_or_else(|| GuardError::Config("DATABASE_URL is not set".to_string()))?;

    let options = PgConnectOptions::from_str(url)
        .map_err(|e| GuardError::Config(format!("invalid DATABASE_URL: {}", e)))?
        .options([("default_transaction_read_only", "on")]);

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .connect_with(options)
        .await
        .map_err(classify_sqlx_error)?;

    // Test the connection
    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .map_err(classify_sqlx_error)?;

    info!(
        "Connected read-only warehouse pool (max {} connections)",
        config.max_connections
    );
    Ok(pool)
}

/// Round-trip `SELECT 1` within five seconds.
pub async fn check_connection(pool: &PgPool) -> bool {
    let health_check = sqlx::query("SELECT 1").execute(pool);
    match tokio::time::timeout(Duration::from_secs(5), health_check).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            warn!("Warehouse health check failed: {}", e);
            false
        }
        Err(_) => {
            warn!("Warehouse health check timed out");
            false
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub size: u32,
    pub idle: usize,
}

pub fn pool_stats(pool: &PgPool) -> PoolStats {
    PoolStats {
        size: pool.size(),
        idle: pool.num_idle(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_url_is_config_error() {
        let config = DatabaseConfig {
            url: None,
            ..DatabaseConfig::default()
        };
        let err = init_read_only_pool(&config).await.unwrap_err();
        assert!(matches!(err, GuardError::Config(_)));
    }

    #[tokio::test]
    async fn test_malformed_url_is_config_error() {
        let config = DatabaseConfig {
            url: Some("not a url".to_string()),
            ..DatabaseConfig::default()
        };
        let err = init_read_only_pool(&config).await.unwrap_err();
        assert!(matches!(err, GuardError::Config(_)));
    }
}
