//! End-to-end job runs against the in-memory store

mod common;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use common::{
    init_tracing, params, settings, today, transaction_lines, DataDir, Recorded, RecordingObserver, ACCOUNT_HEADER,
    ANNUAL_HEADER, TRANSACTION_HEADER,
};
use ledger_batch::domain::{
    Account, Domain, EntityKey, EntityKind, ProcessContext, ProcessOutcome, TransactionDomain, TransactionRow,
    ValidatedEntity,
};
use ledger_batch::{
    BatchRunner, ChunkOrchestrator, EntityStore, JobKind, JobStatus, MemoryStore, RecordError, RunParameters,
};
use ledger_common::dates::YearMonth;
use rust_decimal::Decimal;

fn context() -> ProcessContext {
    ProcessContext::new(today(), YearMonth::of(today()))
}

fn transaction_key(id: &str) -> EntityKey {
    EntityKey::Transaction {
        transaction_id: id.to_string(),
    }
}

#[tokio::test]
async fn test_run_all_jobs() {
    init_tracing();
    let data = DataDir::new();
    data.write(JobKind::Transactions, TRANSACTION_HEADER, &[
        "t-100,2024-06-01,1500.00,credito",
        "T-101,15/05/2024,\"1,250.75\",debito",
    ]);
    data.write(JobKind::Interests, ACCOUNT_HEADER, &[
        "101,Ana,1000.00,30,savings",
        "acc-2,Luis,-50.00,41,corriente",
    ]);
    data.write(JobKind::Annual, ANNUAL_HEADER, &[
        "101,2023-12-31,deposito,250000.00,cierre anual",
        "102,2024-01-15,retiro,300.00,",
    ]);

    let store = MemoryStore::new();
    let runner = BatchRunner::new(data.config(), Arc::new(store.clone()));
    let reports = runner
        .run_all(&JobKind::ALL, &params().with_as_of_month("2024-05"))
        .await
        .unwrap();

    assert_eq!(reports.len(), 3);
    for report in &reports {
        assert_eq!(report.status, JobStatus::Completed, "{report:?}");
        assert_eq!(report.written, 2);
    }
    assert_eq!(store.count(EntityKind::Transaction).await.unwrap(), 2);
    assert_eq!(store.count(EntityKind::Account).await.unwrap(), 2);
    assert_eq!(store.count(EntityKind::AnnualSummary).await.unwrap(), 2);

    let account = store
        .get(&EntityKey::Account {
            account_number: "101".into(),
        })
        .await
        .unwrap();
    let Some(ValidatedEntity::Account(Account {
        interest,
        balance,
        as_of_month,
        ..
    })) = account
    else {
        panic!("account 101 not stored");
    };
    assert_eq!(interest.to_string(), "2.08");
    assert_eq!(balance.to_string(), "1002.08");
    assert_eq!(as_of_month.to_string(), "2024-05");

    let overdrawn = store
        .get(&EntityKey::Account {
            account_number: "ACC-2".into(),
        })
        .await
        .unwrap();
    assert!(matches!(overdrawn, Some(ValidatedEntity::Account(a)) if a.interest == Decimal::new(0, 2)));

    let summary = store
        .get(&EntityKey::AnnualSummary {
            account_number: "101".into(),
            year: 2023,
        })
        .await
        .unwrap();
    assert!(matches!(summary, Some(ValidatedEntity::AnnualSummary(s)) if s.needs_review));
}

#[tokio::test]
async fn test_chunk_count_and_sizes() {
    init_tracing();
    let data = DataDir::new();
    let lines = transaction_lines(1, 23);
    let lines: Vec<&str> = lines.iter().map(String::as_str).collect();
    let path = data.write(JobKind::Transactions, TRANSACTION_HEADER, &lines);

    let store = MemoryStore::new();
    let observer = RecordingObserver::new();
    let orchestrator = ChunkOrchestrator::new(
        TransactionDomain::standard().unwrap(),
        settings(5),
        Arc::new(store.clone()),
        observer.clone(),
    );
    let report = orchestrator.run("transactions", &path, &context()).await;

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.read, 23);
    assert_eq!(report.chunks, 5);
    assert_eq!(report.committed_chunks, 5);
    assert_eq!(report.written, 23);
    assert!((report.success_rate() - 1.0).abs() < f64::EPSILON);

    let mut sizes: Vec<u64> = observer
        .events()
        .into_iter()
        .filter_map(|e| match e {
            Recorded::ChunkCommitted { written, .. } => Some(written),
            _ => None,
        })
        .collect();
    sizes.sort_unstable();
    assert_eq!(sizes, vec![3, 5, 5, 5, 5]);
    assert_eq!(observer.events().first(), Some(&Recorded::JobStarted));
    assert_eq!(
        observer.events().last(),
        Some(&Recorded::JobFinished {
            status: "completed".into()
        })
    );
}

#[tokio::test]
async fn test_skip_budget_exhausted_fails_job() {
    init_tracing();
    let data = DataDir::new();
    data.write(JobKind::Transactions, TRANSACTION_HEADER, &[
        "T1,2024-06-01,10.00,credito",
        "T2,2024-13-01,10.00,credito",
        "T3,2024-06-01,abc,credito",
        "T4,2024-06-01,10.00,trueque",
        "T5,2024-06-01,10.00,credito",
    ]);

    let mut config = data.config();
    config.skip_limit = 2;
    let runner = BatchRunner::new(config, Arc::new(MemoryStore::new()));
    let report = runner.run_job(JobKind::Transactions, &params()).await.unwrap();

    assert_eq!(report.status, JobStatus::Failed);
    assert_eq!(report.skipped, 2);
    assert_eq!(report.read, 4);
    let failure = report.failure.unwrap();
    assert!(failure.contains("skip limit of 2"), "{failure}");
    assert!(failure.contains("trueque"), "{failure}");
}

#[tokio::test]
async fn test_invalid_date_is_skipped_and_job_continues() {
    init_tracing();
    let data = DataDir::new();
    data.write(JobKind::Transactions, TRANSACTION_HEADER, &[
        "T1,2024-13-01,10.00,credito",
        "T2,2024-06-01,10.00,credito",
    ]);

    let observer = RecordingObserver::new();
    let runner = BatchRunner::new(data.config(), Arc::new(MemoryStore::new())).with_observer(observer.clone());
    let report = runner.run_job(JobKind::Transactions, &params()).await.unwrap();

    assert_eq!(report.status, JobStatus::PartiallyCompleted);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.written, 1);
    assert_eq!(report.skip_reasons.get("parse-failure"), Some(&1));
    assert_eq!(
        observer.count(|e| matches!(e, Recorded::RecordSkipped { line: 2, reason } if reason == "parse-failure")),
        1
    );
}

#[tokio::test]
async fn test_zero_amount_is_flagged_and_written() {
    init_tracing();
    let data = DataDir::new();
    data.write(JobKind::Transactions, TRANSACTION_HEADER, &["T9,2024-06-15,0.00,credito"]);

    let store = MemoryStore::new();
    let observer = RecordingObserver::new();
    let runner = BatchRunner::new(data.config(), Arc::new(store.clone())).with_observer(observer.clone());
    let report = runner.run_job(JobKind::Transactions, &params()).await.unwrap();

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.written, 1);
    assert!(report.anomalies >= 1);
    assert!(observer.events().contains(&Recorded::AnomalyDetected {
        key: "transaction:T9".into(),
        anomaly: "zero_amount".into(),
    }));
    assert!(store.get(&transaction_key("T9")).await.unwrap().is_some());
}

#[tokio::test]
async fn test_rerun_updates_instead_of_duplicating() {
    init_tracing();
    let data = DataDir::new();
    data.write(JobKind::Transactions, TRANSACTION_HEADER, &["T1,2024-06-01,10.00,credito", "T2,2024-06-01,20.00,debito"]);

    let store = MemoryStore::new();
    let runner = BatchRunner::new(data.config(), Arc::new(store.clone()));
    runner.run_job(JobKind::Transactions, &params()).await.unwrap();

    data.write(JobKind::Transactions, TRANSACTION_HEADER, &["T1,2024-06-01,99.00,credito"]);
    let report = runner.run_job(JobKind::Transactions, &params()).await.unwrap();

    assert_eq!(report.written, 1);
    assert_eq!(store.count(EntityKind::Transaction).await.unwrap(), 2);
    let stored = store.get(&transaction_key("T1")).await.unwrap();
    assert!(matches!(stored, Some(ValidatedEntity::Transaction(t)) if t.amount == Decimal::new(9900, 2)));
}

#[tokio::test]
async fn test_commit_retry_recovers() {
    init_tracing();
    let data = DataDir::new();
    data.write(JobKind::Transactions, TRANSACTION_HEADER, &["T1,2024-06-01,10.00,credito"]);

    let store = MemoryStore::new();
    store.fail_next_commits(1);
    let observer = RecordingObserver::new();
    let runner = BatchRunner::new(data.config(), Arc::new(store.clone())).with_observer(observer.clone());
    let report = runner.run_job(JobKind::Transactions, &params()).await.unwrap();

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.rolled_back_chunks, 1);
    assert_eq!(report.committed_chunks, 1);
    assert_eq!(report.written, 1);
    assert_eq!(observer.count(|e| matches!(e, Recorded::ChunkRolledBack { chunk: 1, attempt: 1 })), 1);
}

#[tokio::test]
async fn test_commit_failure_fails_job() {
    init_tracing();
    let data = DataDir::new();
    let lines = transaction_lines(1, 12);
    let lines: Vec<&str> = lines.iter().map(String::as_str).collect();
    data.write(JobKind::Transactions, TRANSACTION_HEADER, &lines);

    let store = MemoryStore::new();
    store.fail_next_commits(u32::MAX);
    let runner = BatchRunner::new(data.config(), Arc::new(store.clone()));
    let report = runner.run_job(JobKind::Transactions, &params()).await.unwrap();

    assert_eq!(report.status, JobStatus::Failed);
    assert_eq!(report.written, 0);
    assert_eq!(report.committed_chunks, 0);
    assert!(report.rolled_back_chunks >= 2);
    assert!(report.failure.unwrap().contains("failed to commit"));
    assert!(store.rows().await.is_empty());
}

#[tokio::test]
async fn test_rejected_entity_is_a_write_error() {
    init_tracing();
    let data = DataDir::new();
    data.write(JobKind::Transactions, TRANSACTION_HEADER, &[
        "T1,2024-06-01,10.00,credito",
        "BAD,2024-06-01,10.00,credito",
        "T3,2024-06-01,10.00,credito",
    ]);

    let store = MemoryStore::new();
    store.reject_key(transaction_key("BAD"));
    let runner = BatchRunner::new(data.config(), Arc::new(store.clone()));
    let report = runner.run_job(JobKind::Transactions, &params()).await.unwrap();

    assert_eq!(report.status, JobStatus::PartiallyCompleted);
    assert_eq!(report.processed, 3);
    assert_eq!(report.written, 2);
    assert_eq!(report.write_errors, 1);
    assert_eq!(report.skipped, 0);
}

#[tokio::test]
async fn test_missing_input_fails_job() {
    init_tracing();
    let data = DataDir::new();
    let runner = BatchRunner::new(data.config(), Arc::new(MemoryStore::new()));
    let report = runner.run_job(JobKind::Interests, &params()).await.unwrap();

    assert_eq!(report.status, JobStatus::Failed);
    assert_eq!(report.read, 0);
    assert!(report.failure.unwrap().contains("intereses.csv"));
}

#[tokio::test]
async fn test_wrong_layout_fails_on_first_record() {
    init_tracing();
    let data = DataDir::new();
    data.write(JobKind::Interests, "cuenta_id,nombre,saldo", &["101,Ana,1000.00", "102,Luis,50.00"]);

    let runner = BatchRunner::new(data.config(), Arc::new(MemoryStore::new()));
    let report = runner.run_job(JobKind::Interests, &params()).await.unwrap();

    assert_eq!(report.status, JobStatus::Failed);
    assert_eq!(report.read, 1);
    assert_eq!(report.written, 0);
    assert!(report.failure.unwrap().contains("schema mismatch"));
}

#[tokio::test]
async fn test_short_record_after_first_is_skipped() {
    init_tracing();
    let data = DataDir::new();
    data.write(JobKind::Interests, ACCOUNT_HEADER, &["101,Ana,1000.00,30,savings", "102,Luis,50.00"]);

    let runner = BatchRunner::new(data.config(), Arc::new(MemoryStore::new()));
    let report = runner.run_job(JobKind::Interests, &params()).await.unwrap();

    assert_eq!(report.status, JobStatus::PartiallyCompleted);
    assert_eq!(report.skip_reasons.get("malformed-record"), Some(&1));
    assert_eq!(report.written, 1);
}

#[tokio::test]
async fn test_invalid_run_parameters_are_rejected() {
    let data = DataDir::new();
    let runner = BatchRunner::new(data.config(), Arc::new(MemoryStore::new()));
    let result = runner
        .run_job(JobKind::Interests, &RunParameters::default().with_as_of_month("2024-13"))
        .await;
    assert!(result.is_err());
}

/// Fails with a transient error a set number of times per record before
/// delegating to the real transaction rules
struct FlakyDomain {
    inner: TransactionDomain,
    failures: u32,
    attempts: Mutex<HashMap<String, u32>>,
}

impl Domain for FlakyDomain {
    type Row = TransactionRow;

    fn name(&self) -> &'static str {
        "flaky-transactions"
    }

    fn process(&self, row: &TransactionRow, ctx: &ProcessContext) -> ProcessOutcome {
        let id = row.transaction_id.clone().unwrap_or_default();
        if id.starts_with("FLAKY") {
            let mut attempts = self.attempts.lock().unwrap();
            let seen = attempts.entry(id).or_insert(0);
            *seen += 1;
            if *seen <= self.failures {
                return ProcessOutcome::Fail(RecordError::Transient("rate service timed out".into()));
            }
        }
        self.inner.process(row, ctx)
    }
}

async fn run_flaky(failures: u32) -> (ledger_batch::ExecutionReport, Arc<RecordingObserver>) {
    let data = DataDir::new();
    let path = data.write(JobKind::Transactions, TRANSACTION_HEADER, &[
        "T1,2024-06-01,10.00,credito",
        "FLAKY1,2024-06-01,10.00,credito",
    ]);
    let observer = RecordingObserver::new();
    let domain = FlakyDomain {
        inner: TransactionDomain::standard().unwrap(),
        failures,
        attempts: Mutex::new(HashMap::new()),
    };
    let orchestrator = ChunkOrchestrator::new(domain, settings(10), Arc::new(MemoryStore::new()), observer.clone());
    let report = orchestrator.run("transactions", &path, &context()).await;
    (report, observer)
}

#[tokio::test]
async fn test_transient_failure_is_retried() {
    init_tracing();
    let (report, observer) = run_flaky(2).await;

    assert_eq!(report.status, JobStatus::Completed);
    assert_eq!(report.retried, 2);
    assert_eq!(report.written, 2);
    assert_eq!(observer.count(|e| matches!(e, Recorded::RecordRetried { line: 3, retries: 2 })), 1);
}

#[tokio::test]
async fn test_exhausted_retries_become_a_skip() {
    init_tracing();
    let (report, _) = run_flaky(5).await;

    assert_eq!(report.status, JobStatus::PartiallyCompleted);
    assert_eq!(report.retried, 2);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.skip_reasons.get("generic"), Some(&1));
    assert_eq!(report.written, 1);
}
