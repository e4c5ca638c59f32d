use guarded_query::cache::BoundedCache;
use guarded_query::correction::{classify, CorrectionAgent, CorrectionRequest};
use guarded_query::guard::TopicGuard;
use guarded_query::observability::init_tracing;
use guarded_query::safety::SafetyAnalyzer;
use guarded_query::security::CallerContext;
use guarded_query::{GuardedQueryPipeline, PipelineConfig, QueryRequest};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser)]
#[command(name = "guarded-query")]
#[command(about = "Guarded SQL execution for natural-language analytics")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate and parameterize a statement without executing it
    Check {
        /// Candidate SQL statement
        sql: String,
    },
    /// Classify a database error and optionally propose a correction
    Classify {
        /// Error text as reported by the database
        error: String,

        /// Statement that produced the error
        #[arg(long)]
        sql: Option<String>,

        /// Schema hints: `table.column` or `table.column=ref_table.ref_column`
        #[arg(long = "hint")]
        hints: Vec<String>,
    },
    /// Run only the topic guard on a question
    Guard {
        /// Natural-language question
        query: String,

        #[arg(long, default_value = "en")]
        locale: String,
    },
    /// Run the full pipeline against DATABASE_URL
    Run {
        /// Natural-language question
        #[arg(long)]
        query: String,

        /// Candidate SQL from the generator
        #[arg(long)]
        sql: String,

        #[arg(long, default_value = "cli")]
        user: String,

        /// Comma-separated caller roles
        #[arg(long, value_delimiter = ',')]
        roles: Vec<String>,

        #[arg(long, default_value = "en")]
        locale: String,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let config = PipelineConfig::from_env().context("failed to load configuration")?;
    init_tracing(&config.observability)?;

    let args = Args::parse();

    match args.command {
        Commands::Check { sql } => {
            let analyzer = SafetyAnalyzer::new(config.injection_policy);
            let query = analyzer.prepare(&sql)?;
            print_json(&query)?;
        }
        Commands::Classify { error, sql, hints } => {
            let error_type = classify(&error);
            match sql {
                Some(sql) => {
                    let agent = CorrectionAgent::new(
                        config.correction.max_retries,
                        Arc::new(BoundedCache::new(config.correction_cache_capacity)),
                    );
                    let response = agent.correct(&CorrectionRequest {
                        sql,
                        error,
                        retry_count: 0,
                        schema_hints: hints,
                    });
                    print_json(&response)?;
                }
                None => print_json(&serde_json::json!({
                    "error_type": error_type,
                    "correctable": error_type.is_correctable(),
                }))?,
            }
        }
        Commands::Guard { query, locale } => {
            let guard = TopicGuard::new(
                config.guard.threshold,
                Arc::new(BoundedCache::new(config.guard.cache_capacity)),
            );
            print_json(&guard.guard(&query, &locale))?;
        }
        Commands::Run {
            query,
            sql,
            user,
            roles,
            locale,
        } => {
            let pipeline = GuardedQueryPipeline::from_config(config).await?;
            let request = QueryRequest::new(query, CallerContext::new(user, roles))
                .with_sql(sql)
                .with_locale(locale);

            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Interrupt received, cancelling query");
                    on_interrupt.cancel();
                }
            });

            let output = pipeline.run(&request, &cancel).await;
            print_json(&output)?;
        }
    }

    Ok(())
}
