use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{info, warn};

use crate::cli::AddArgs;
use crate::config;
use crate::model::{Document, StudentRecord};
use crate::normalize::coerce_category;
use crate::store::{CollectionStore, InternalId, SqliteCollectionStore, StoreError};

/// Inserts `document` unless a document with the same key already exists.
///
/// This is check-then-act: two concurrent callers can both pass the check,
/// in which case the unique key (when asserted) rejects the second insert.
pub fn add_record<S: CollectionStore>(
    store: &mut S,
    key_field: &str,
    document: &Document,
) -> Result<InternalId, StoreError> {
    let key = document
        .get(key_field)
        .cloned()
        .unwrap_or(Value::Null);

    if store.exists_by_key(key_field, &key)? {
        return Err(StoreError::DuplicateKey {
            field: key_field.to_string(),
            key,
        });
    }

    store.insert_one(document)
}

/// Asserts the unique key first so a collection that was never loaded still
/// rejects a concurrent duplicate, then adds the record.
fn add_student<S: CollectionStore>(
    store: &mut S,
    key_field: &str,
    document: &Document,
) -> Result<InternalId> {
    store.ensure_unique_key(key_field).with_context(|| {
        format!("unique key on `{key_field}` cannot be enforced; run `dedup` first")
    })?;

    let student_id = document.get(key_field).cloned().unwrap_or(Value::Null);
    match add_record(store, key_field, document) {
        Ok(internal_id) => Ok(internal_id),
        Err(err @ StoreError::DuplicateKey { .. }) => {
            warn!(student_id = %student_id, "student id already taken; choose a different id");
            Err(err).context("student record was not added")
        }
        Err(err) => Err(err).with_context(|| format!("failed to add student {student_id}")),
    }
}

pub fn run(args: AddArgs) -> Result<()> {
    let descriptor = config::resolve(&args.store)?.descriptor();

    let record = StudentRecord {
        student_id: args.student_id.trim().to_string(),
        age: args.age,
        gender: label(&args.gender),
        gpa: args.gpa,
        grade_class: label(&args.grade_class),
    };
    let student_id = record.student_id.clone();
    let document = record.into_document(&args.key_field);

    info!(student_id = %student_id, store = %descriptor.target(), "adding student record");

    let mut store = SqliteCollectionStore::connect(&descriptor)
        .with_context(|| format!("failed to open {}", descriptor.target()))?;

    let internal_id = add_student(&mut store, &args.key_field, &document)?;
    info!(student_id = %student_id, internal_id, "student record added");
    Ok(())
}

fn label(raw: &str) -> Value {
    coerce_category(&Value::String(raw.to_string())).unwrap_or(Value::Null)
}
