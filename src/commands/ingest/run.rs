use anyhow::{Result, bail};
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::pipeline::{FinalState, IngestOutcome, IngestPlan, ingest};
use crate::cli::LoadArgs;
use crate::config;
use crate::normalize::normalize;
use crate::source::read_rows;
use crate::store::SqliteCollectionStore;
use crate::util::{compact_timestamp, file_sha256, rfc3339, write_report};

#[derive(Debug, Clone, Serialize)]
struct SourceSummary {
    path: String,
    sha256: String,
    variant: String,
    rows_read: usize,
    rows_dropped: usize,
}

#[derive(Debug, Clone, Serialize)]
struct TargetSummary {
    uri: String,
    database: String,
    collection: String,
}

#[derive(Debug, Clone, Serialize)]
struct LoadRunReport {
    report_version: u32,
    run_id: String,
    started_at: String,
    finished_at: String,
    source: SourceSummary,
    target: TargetSummary,
    outcome: IngestOutcome,
}

pub fn run(args: LoadArgs) -> Result<()> {
    let started_ts = Utc::now();
    let run_id = format!("load-{}", compact_timestamp(started_ts));

    let store_config = config::resolve(&args.store)?;
    let descriptor = store_config.descriptor();

    info!(
        run_id = %run_id,
        csv = %args.csv.display(),
        variant = args.variant.as_str(),
        store = %descriptor.target(),
        atomic = args.atomic,
        "starting load"
    );

    let rows = read_rows(&args.csv)?;
    let source_sha256 = file_sha256(&args.csv)?;
    let normalized = normalize(&rows, args.variant.columns());

    for rejection in &normalized.rejected {
        debug!(
            row = rejection.row_index,
            column = %rejection.column,
            reason = rejection.reason.as_str(),
            "dropped input row"
        );
    }
    if !normalized.rejected.is_empty() {
        warn!(
            dropped = normalized.rejected.len(),
            kept = normalized.documents.len(),
            "dropped rows with missing or invalid required columns"
        );
    }

    let plan = IngestPlan {
        key_field: &args.key_field,
        atomic: args.atomic,
    };
    let outcome = ingest::<SqliteCollectionStore>(&descriptor, &normalized.documents, &plan);

    if let Some(duplicates) = outcome.duplicate_keys.as_ref().filter(|d| !d.is_empty()) {
        for duplicate in duplicates {
            warn!(key = %duplicate.key, count = duplicate.count, "duplicate key in collection");
        }
    }

    let finished_ts = Utc::now();
    let report = LoadRunReport {
        report_version: 1,
        run_id: run_id.clone(),
        started_at: rfc3339(started_ts),
        finished_at: rfc3339(finished_ts),
        source: SourceSummary {
            path: args.csv.display().to_string(),
            sha256: source_sha256,
            variant: args.variant.as_str().to_string(),
            rows_read: rows.len(),
            rows_dropped: normalized.rejected.len(),
        },
        target: TargetSummary {
            uri: descriptor.redacted_uri(),
            database: descriptor.database.clone(),
            collection: descriptor.collection.clone(),
        },
        outcome,
    };

    let report_path = args
        .report_dir
        .join(format!("load_run_{}.json", compact_timestamp(started_ts)));
    write_report(&report_path, &report)?;
    info!(path = %report_path.display(), "wrote load run report");

    match &report.outcome.state {
        FinalState::Done => {
            info!(
                run_id = %run_id,
                inserted = report.outcome.inserted,
                collection_count = report.outcome.collection_count.unwrap_or_default(),
                "load completed"
            );
            Ok(())
        }
        FinalState::Failed { stage, kind } => bail!(
            "load {run_id} failed at stage {} ({}); see {}",
            stage.as_str(),
            kind.as_str(),
            report_path.display()
        ),
    }
}
