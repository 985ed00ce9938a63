use serde::Serialize;
use tracing::{info, warn};

use crate::model::Document;
use crate::store::{
    CollectionStore, ConnectionDescriptor, DuplicateKey, ErrorKind, RejectedDocument, StoreError,
};

/// Orchestrator stages in execution order. A run never moves backwards.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Connecting,
    Wiping,
    ConstraintAsserted,
    Inserting,
    Verifying,
    DuplicateScanning,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Self::Connecting,
        Self::Wiping,
        Self::ConstraintAsserted,
        Self::Inserting,
        Self::Verifying,
        Self::DuplicateScanning,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Wiping => "wiping",
            Self::ConstraintAsserted => "constraint_asserted",
            Self::Inserting => "inserting",
            Self::Verifying => "verifying",
            Self::DuplicateScanning => "duplicate_scanning",
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Completed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageFailure {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    pub status: StageStatus,
    pub detail: String,
    pub failure: Option<StageFailure>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FinalState {
    Done,
    /// The first stage that failed. Later diagnostics may have run regardless.
    Failed { stage: Stage, kind: ErrorKind },
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub state: FinalState,
    pub atomic: bool,
    pub key_field: String,
    pub attempted: usize,
    pub inserted: usize,
    pub collection_count: Option<u64>,
    pub duplicate_keys: Option<Vec<DuplicateKey>>,
    pub rejected: Vec<RejectedDocument>,
    pub stages: Vec<StageReport>,
}

#[derive(Debug, Clone)]
pub struct IngestPlan<'a> {
    pub key_field: &'a str,
    /// Wipe, constraint and insert share one store transaction.
    pub atomic: bool,
}

struct StageLog {
    reports: Vec<StageReport>,
    first_failure: Option<(Stage, ErrorKind)>,
}

impl StageLog {
    fn new() -> Self {
        Self {
            reports: Vec::with_capacity(Stage::ALL.len()),
            first_failure: None,
        }
    }

    fn completed(&mut self, stage: Stage, detail: String) {
        info!(stage = stage.as_str(), detail = %detail, "stage completed");
        self.reports.push(StageReport {
            stage,
            status: StageStatus::Completed,
            detail,
            failure: None,
        });
    }

    fn failed(&mut self, stage: Stage, detail: String, err: &StoreError) {
        let kind = err.kind();
        warn!(stage = stage.as_str(), kind = kind.as_str(), error = %err, "stage failed");
        self.first_failure.get_or_insert((stage, kind));
        self.reports.push(StageReport {
            stage,
            status: StageStatus::Failed,
            detail,
            failure: Some(StageFailure {
                kind,
                message: err.to_string(),
            }),
        });
    }

    fn skipped(&mut self, stage: Stage, detail: &str) {
        self.reports.push(StageReport {
            stage,
            status: StageStatus::Skipped,
            detail: detail.to_string(),
            failure: None,
        });
    }

    fn final_state(&self) -> FinalState {
        match self.first_failure {
            Some((stage, kind)) => FinalState::Failed { stage, kind },
            None => FinalState::Done,
        }
    }
}

/// Runs a full bulk load of `documents` into the collection behind `descriptor`.
///
/// Stage errors never escape: each one is recorded in the outcome. Verifying
/// and duplicate scanning run after any failure past Connecting, so a broken
/// insert still reports what the collection now holds.
pub fn ingest<S: CollectionStore>(
    descriptor: &ConnectionDescriptor,
    documents: &[Document],
    plan: &IngestPlan<'_>,
) -> IngestOutcome {
    let mut log = StageLog::new();
    let mut outcome = IngestOutcome {
        state: FinalState::Done,
        atomic: plan.atomic,
        key_field: plan.key_field.to_string(),
        attempted: documents.len(),
        inserted: 0,
        collection_count: None,
        duplicate_keys: None,
        rejected: Vec::new(),
        stages: Vec::new(),
    };

    let mut store = match S::connect(descriptor) {
        Ok(store) => {
            log.completed(
                Stage::Connecting,
                format!("connected to {}", descriptor.target()),
            );
            store
        }
        Err(err) => {
            log.failed(Stage::Connecting, "connection failed".to_string(), &err);
            for stage in &Stage::ALL[1..] {
                log.skipped(*stage, "not connected");
            }
            outcome.state = log.final_state();
            outcome.stages = log.reports;
            return outcome;
        }
    };

    let mut transaction_open = false;
    let mut proceed = true;

    if plan.atomic {
        match store.begin_transaction() {
            Ok(()) => transaction_open = true,
            Err(err) => {
                log.failed(Stage::Wiping, "could not open transaction".to_string(), &err);
                proceed = false;
            }
        }
    }

    if proceed {
        match store.delete_all() {
            Ok(removed) => log.completed(
                Stage::Wiping,
                format!("removed {removed} existing document(s)"),
            ),
            Err(err) => {
                log.failed(Stage::Wiping, "wipe failed".to_string(), &err);
                proceed = false;
            }
        }
    } else if log.reports.iter().all(|report| report.stage != Stage::Wiping) {
        log.skipped(Stage::Wiping, "earlier stage failed");
    }

    if proceed {
        match store.ensure_unique_key(plan.key_field) {
            Ok(()) => log.completed(
                Stage::ConstraintAsserted,
                format!("unique key on `{}` in place", plan.key_field),
            ),
            Err(err) => {
                log.failed(
                    Stage::ConstraintAsserted,
                    "unique key not established".to_string(),
                    &err,
                );
                proceed = false;
            }
        }
    } else {
        log.skipped(Stage::ConstraintAsserted, "earlier stage failed");
    }

    if proceed {
        let result = store.insert_many(documents);
        let result = match (transaction_open, result) {
            (true, Ok(inserted)) => store.commit_transaction().map(|()| inserted),
            (_, result) => result,
        };
        transaction_open = false;

        match result {
            Ok(inserted) => {
                outcome.inserted = inserted;
                log.completed(
                    Stage::Inserting,
                    format!("inserted {inserted} of {} document(s)", documents.len()),
                );
            }
            Err(err) => {
                if let StoreError::Insert { inserted, rejected } = &err {
                    outcome.inserted = *inserted;
                    outcome.rejected = rejected.clone();
                }
                let detail = if plan.atomic {
                    rollback(&mut store);
                    outcome.inserted = 0;
                    "insert failed; transaction rolled back".to_string()
                } else {
                    format!(
                        "insert failed after {} of {} document(s)",
                        outcome.inserted,
                        documents.len()
                    )
                };
                log.failed(Stage::Inserting, detail, &err);
            }
        }
    } else {
        log.skipped(Stage::Inserting, "earlier stage failed");
    }

    if transaction_open {
        rollback(&mut store);
    }

    match store.count() {
        Ok(count) => {
            outcome.collection_count = Some(count);
            log.completed(Stage::Verifying, format!("collection holds {count} document(s)"));
        }
        Err(err) => log.failed(Stage::Verifying, "count failed".to_string(), &err),
    }

    match store.find_duplicate_keys(plan.key_field) {
        Ok(duplicates) => {
            let detail = if duplicates.is_empty() {
                "no duplicate keys".to_string()
            } else {
                format!("{} duplicated key(s)", duplicates.len())
            };
            outcome.duplicate_keys = Some(duplicates);
            log.completed(Stage::DuplicateScanning, detail);
        }
        Err(err) => log.failed(
            Stage::DuplicateScanning,
            "duplicate scan failed".to_string(),
            &err,
        ),
    }

    outcome.state = log.final_state();
    outcome.stages = log.reports;
    outcome
}

fn rollback<S: CollectionStore>(store: &mut S) {
    if let Err(err) = store.rollback_transaction() {
        warn!(error = %err, "transaction rollback failed");
    }
}
