//! Job definitions and the batch runner
//!
//! Each [`JobKind`] pairs an input file with a domain. [`BatchRunner`] wires
//! the configured store and observer into a [`ChunkOrchestrator`] per job.

use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use ledger_common::dates::YearMonth;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::BatchConfig;
use crate::domain::transaction::TransactionRules;
use crate::domain::{AccountDomain, AnnualDomain, InterestRateTable, KeyFormat, ProcessContext, TransactionDomain};
use crate::error::PipelineError;
use crate::observer::{PipelineObserver, TracingObserver};
use crate::orchestrator::ChunkOrchestrator;
use crate::report::ExecutionReport;
use crate::store::EntityStore;

/// The three loads, in the order a full run executes them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Transactions,
    Interests,
    Annual,
}

impl JobKind {
    pub const ALL: [JobKind; 3] = [JobKind::Transactions, JobKind::Interests, JobKind::Annual];

    /// Input file name inside the data directory
    pub fn file_name(&self) -> &'static str {
        match self {
            JobKind::Transactions => "transacciones.csv",
            JobKind::Interests => "intereses.csv",
            JobKind::Annual => "cuentas_anuales.csv",
        }
    }

    pub fn job_name(&self) -> &'static str {
        match self {
            JobKind::Transactions => "transactions",
            JobKind::Interests => "interests",
            JobKind::Annual => "annual",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.job_name())
    }
}

/// Caller-supplied inputs for one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunParameters {
    /// Month stamped on interest postings, `YYYY-MM`; defaults to the current month
    #[serde(default)]
    pub as_of_month: Option<String>,
    /// Reference day for date rules; defaults to today in local time
    #[serde(default)]
    pub today: Option<NaiveDate>,
}

impl RunParameters {
    pub fn with_as_of_month(mut self, month: impl Into<String>) -> Self {
        self.as_of_month = Some(month.into());
        self
    }

    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    /// Resolve into the context shared by every record of the run
    pub fn context(&self) -> Result<ProcessContext, PipelineError> {
        let today = self
            .today
            .unwrap_or_else(|| chrono::Local::now().date_naive());
        let as_of_month = match &self.as_of_month {
            Some(raw) => raw
                .parse::<YearMonth>()
                .map_err(|e| PipelineError::InvalidParameters(format!("as_of_month '{raw}': {e}")))?,
            None => YearMonth::of(today),
        };
        Ok(ProcessContext::new(today, as_of_month))
    }
}

pub struct BatchRunner {
    config: BatchConfig,
    store: Arc<dyn EntityStore>,
    observer: Arc<dyn PipelineObserver>,
    rates: InterestRateTable,
}

impl BatchRunner {
    pub fn new(config: BatchConfig, store: Arc<dyn EntityStore>) -> Self {
        Self {
            config,
            store,
            observer: Arc::new(TracingObserver),
            rates: InterestRateTable::default(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_interest_rates(mut self, rates: InterestRateTable) -> Self {
        self.rates = rates;
        self
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Run a single job.
    ///
    /// Only invalid parameters or configuration are returned as errors; a job
    /// that runs and fails is reported through its status.
    pub async fn run_job(&self, kind: JobKind, params: &RunParameters) -> Result<ExecutionReport, PipelineError> {
        let ctx = params.context()?;
        self.run_with_context(kind, &ctx).await
    }

    /// Run `kinds` in canonical order, once each, sharing one context.
    ///
    /// A failed job does not stop the ones after it.
    pub async fn run_all(&self, kinds: &[JobKind], params: &RunParameters) -> Result<Vec<ExecutionReport>, PipelineError> {
        let ctx = params.context()?;

        let mut ordered = kinds.to_vec();
        ordered.sort();
        ordered.dedup();

        let mut reports = Vec::with_capacity(ordered.len());
        for kind in ordered {
            reports.push(self.run_with_context(kind, &ctx).await?);
        }

        let succeeded = reports.iter().filter(|r| r.status.is_success()).count();
        let failed = reports.len() - succeeded;
        if failed > 0 {
            warn!(succeeded, failed, "batch finished with failed jobs");
        } else {
            info!(succeeded, failed, "batch finished");
        }
        Ok(reports)
    }

    async fn run_with_context(&self, kind: JobKind, ctx: &ProcessContext) -> Result<ExecutionReport, PipelineError> {
        let settings = self.config.job_settings(kind);
        let path = self.config.input_path(kind);
        let keys = KeyFormat::standard().map_err(|e| PipelineError::Configuration(e.to_string()))?;
        let store = Arc::clone(&self.store);
        let observer = Arc::clone(&self.observer);

        let report = match kind {
            JobKind::Transactions => {
                let domain = TransactionDomain::new(keys, TransactionRules::default());
                ChunkOrchestrator::new(domain, settings, store, observer)
                    .run(kind.job_name(), &path, ctx)
                    .await
            },
            JobKind::Interests => {
                let domain = AccountDomain::new(keys, self.rates.clone());
                ChunkOrchestrator::new(domain, settings, store, observer)
                    .run(kind.job_name(), &path, ctx)
                    .await
            },
            JobKind::Annual => {
                ChunkOrchestrator::new(AnnualDomain::new(keys), settings, store, observer)
                    .run(kind.job_name(), &path, ctx)
                    .await
            },
        };

        info!(
            job = %kind,
            status = %report.status,
            read = report.read,
            written = report.written,
            skipped = report.skipped,
            failure = report.failure.as_deref().unwrap_or("-"),
            "job summary"
        );
        Ok(report)
    }
}
