use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::config;
use crate::store::{CollectionStore, SqliteCollectionStore};

pub fn run(args: StatusArgs) -> Result<()> {
    let descriptor = config::resolve(&args.store)?.descriptor();

    info!(store = %descriptor.target(), "status requested");

    let store = SqliteCollectionStore::connect(&descriptor)
        .with_context(|| format!("failed to open {}", descriptor.target()))?;

    let count = store.count().context("failed to count documents")?;
    let duplicates = store
        .find_duplicate_keys(&args.key_field)
        .context("failed to scan for duplicate keys")?;

    info!(
        database = %descriptor.database,
        collection = %descriptor.collection,
        documents = count,
        duplicated_keys = duplicates.len(),
        "collection status"
    );

    for duplicate in &duplicates {
        warn!(key = %duplicate.key, count = duplicate.count, "duplicate key");
    }

    Ok(())
}
