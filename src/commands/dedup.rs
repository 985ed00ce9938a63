use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cli::DedupArgs;
use crate::config;
use crate::store::{CollectionStore, InternalId, SqliteCollectionStore, StoreError};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Survivor {
    pub key: Value,
    pub internal_id: InternalId,
    pub removed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepReport {
    pub keys_resolved: usize,
    pub documents_removed: usize,
    pub survivors: Vec<Survivor>,
}

/// Leaves exactly one document per duplicated key: the one with the lowest
/// internal id, i.e. the earliest inserted. The others are deleted one by one.
pub fn sweep_duplicates<S: CollectionStore>(
    store: &mut S,
    key_field: &str,
) -> Result<SweepReport, StoreError> {
    let mut report = SweepReport::default();

    for duplicate in store.find_duplicate_keys(key_field)? {
        let copies = store.find_by_key(key_field, &duplicate.key)?;
        let Some((keep, extra)) = copies.split_first() else {
            continue;
        };

        let mut removed = 0;
        for copy in extra {
            debug!(internal_id = copy.internal_id, body = ?copy.document, "removing duplicate copy");
            if store.delete_one_by_internal_id(copy.internal_id)? {
                removed += 1;
            }
        }

        info!(
            key = %duplicate.key,
            kept = keep.internal_id,
            removed,
            "resolved duplicate key"
        );

        report.keys_resolved += 1;
        report.documents_removed += removed;
        report.survivors.push(Survivor {
            key: duplicate.key,
            internal_id: keep.internal_id,
            removed,
        });
    }

    Ok(report)
}

pub fn run(args: DedupArgs) -> Result<()> {
    let descriptor = config::resolve(&args.store)?.descriptor();
    let mut store = SqliteCollectionStore::connect(&descriptor)
        .with_context(|| format!("failed to open {}", descriptor.target()))?;

    info!(store = %descriptor.target(), key_field = %args.key_field, "starting duplicate sweep");

    if args.dry_run {
        let duplicates = store.find_duplicate_keys(&args.key_field)?;
        for duplicate in &duplicates {
            warn!(key = %duplicate.key, count = duplicate.count, "duplicate key");
        }
        info!(duplicated_keys = duplicates.len(), "dedup dry-run complete");
        return Ok(());
    }

    let report = sweep_duplicates(&mut store, &args.key_field)
        .context("duplicate sweep failed")?;

    if args.enforce {
        store
            .ensure_unique_key(&args.key_field)
            .with_context(|| format!("failed to enforce unique key on {}", args.key_field))?;
        info!(key_field = %args.key_field, "unique key enforced");
    }

    info!(
        keys_resolved = report.keys_resolved,
        documents_removed = report.documents_removed,
        collection_count = store.count()?,
        "dedup completed"
    );

    Ok(())
}
