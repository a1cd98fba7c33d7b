//! Ledger Batch - Main entry point

use std::process;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use ledger_batch::cli::{selected_jobs, Cli, Commands};
use ledger_batch::{BatchConfig, BatchRunner, EntityStore, MemoryStore, RunParameters};
use ledger_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_config = LogConfig::builder()
        .level(if cli.verbose { LogLevel::Debug } else { LogLevel::Info })
        .output(LogOutput::Console)
        .log_file_prefix("ledger-batch")
        .filter_directives("sqlx=warn")
        .build();

    // LOG_* variables take precedence over the flags
    let log_config = log_config.clone().with_env_overrides().unwrap_or(log_config);
    let _guard = match init_logging(&log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Warning: logging disabled: {e:#}");
            None
        },
    };

    match execute(cli).await {
        Ok(true) => {},
        Ok(false) => process::exit(1),
        Err(e) => {
            error!(error = %e, "batch run failed");
            eprintln!("Error: {e:#}");
            process::exit(2);
        },
    }
}

/// Run the selected jobs; `Ok(false)` when any of them failed
async fn execute(cli: Cli) -> anyhow::Result<bool> {
    let Commands::Run {
        jobs,
        data_dir,
        as_of_month,
        json,
        #[cfg(feature = "database")]
        database_url,
    } = cli.command;

    let mut config = BatchConfig::from_env()?;
    if let Some(dir) = data_dir {
        config.data_dir = dir;
    }
    #[cfg(feature = "database")]
    if let Some(url) = database_url {
        config.database = Some(ledger_batch::config::DatabaseConfig {
            url,
            max_connections: config
                .database
                .as_ref()
                .map(|db| db.max_connections)
                .unwrap_or(ledger_batch::config::DEFAULT_DB_MAX_CONNECTIONS),
        });
    }
    config.validate()?;

    let store = open_store(&config).await?;
    let runner = BatchRunner::new(config, store);
    let params = RunParameters {
        as_of_month,
        ..RunParameters::default()
    };

    let reports = runner.run_all(&selected_jobs(&jobs), &params).await?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&reports).context("Failed to serialize reports")?
        );
    } else {
        for report in &reports {
            println!(
                "{:<14} {:<20} read={} written={} skipped={} chunks={} success={:.1}%",
                report.job,
                report.status,
                report.read,
                report.written,
                report.skipped,
                report.chunks,
                report.success_rate() * 100.0
            );
            if let Some(failure) = &report.failure {
                println!("{:<14} failure: {failure}", "");
            }
        }
    }

    Ok(reports.iter().all(|r| r.status.is_success()))
}

#[cfg(feature = "database")]
async fn open_store(config: &BatchConfig) -> anyhow::Result<Arc<dyn EntityStore>> {
    let Some(db) = &config.database else {
        info!("no database configured, using the in-memory store");
        return Ok(Arc::new(MemoryStore::new()));
    };

    let store = ledger_batch::PgEntityStore::connect(&db.url, db.max_connections)
        .await
        .context("Failed to connect to PostgreSQL")?;
    store.migrate().await.context("Failed to run migrations")?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "database"))]
async fn open_store(_config: &BatchConfig) -> anyhow::Result<Arc<dyn EntityStore>> {
    info!("built without the database feature, using the in-memory store");
    Ok(Arc::new(MemoryStore::new()))
}
