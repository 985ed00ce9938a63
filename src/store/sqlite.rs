use std::path::PathBuf;

use chrono::Utc;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use serde_json::{Number, Value};
use tracing::debug;

use super::{
    CollectionStore, ConnectionDescriptor, DuplicateKey, InternalId, MEMORY_URI,
    RejectedDocument, StoreError, StoredDocument,
};
use crate::model::Document;

const STORE_SCHEMA_VERSION: &str = "1";

/// A collection stored as a table of JSON documents inside `<dir>/<database>.sqlite`.
///
/// Unique keys are expression indexes over `json_extract(body, ...)`, recorded
/// in `_unique_keys` so that violations can be traced back to a field.
pub struct SqliteCollectionStore {
    connection: Connection,
    collection: String,
}

enum Location {
    Memory,
    Directory(PathBuf),
}

impl Location {
    fn parse(uri: &str) -> Result<Self, String> {
        let uri = uri.trim();
        if uri == MEMORY_URI || uri == ":memory:" {
            return Ok(Self::Memory);
        }
        if let Some(path) = uri.strip_prefix("sqlite://") {
            return Ok(Self::Directory(PathBuf::from(path)));
        }
        if let Some((scheme, _)) = uri.split_once("://") {
            return Err(format!("unsupported store scheme `{scheme}`"));
        }
        if uri.is_empty() {
            return Err("store uri is empty".to_string());
        }
        Ok(Self::Directory(PathBuf::from(uri)))
    }
}

impl SqliteCollectionStore {
    fn table(&self) -> String {
        quote_ident(&self.collection)
    }

    fn unique_keys(&self) -> Result<Vec<(String, String)>, StoreError> {
        let mut statement = self.connection.prepare_cached(
            "SELECT field, index_name FROM _unique_keys WHERE collection = ?1 ORDER BY created_at, field",
        )?;
        let rows = statement.query_map([&self.collection], |row| Ok((row.get(0)?, row.get(1)?)))?;

        let mut keys = Vec::new();
        for row in rows {
            keys.push(row?);
        }
        Ok(keys)
    }
}

impl CollectionStore for SqliteCollectionStore {
    fn connect(descriptor: &ConnectionDescriptor) -> Result<Self, StoreError> {
        validate_name("database", &descriptor.database)?;
        validate_name("collection", &descriptor.collection)?;

        let target = descriptor.target();
        let connection_error = |reason: String| StoreError::Connection {
            target: target.clone(),
            reason,
        };

        let location = Location::parse(&descriptor.uri).map_err(connection_error)?;
        let connection = match &location {
            Location::Memory => Connection::open_in_memory(),
            Location::Directory(directory) => {
                if !directory.is_dir() {
                    return Err(connection_error(format!(
                        "directory {} does not exist",
                        directory.display()
                    )));
                }
                Connection::open(directory.join(format!("{}.sqlite", descriptor.database)))
            }
        }
        .map_err(|err| connection_error(err.to_string()))?;

        configure_connection(&connection, &location, descriptor)
            .and_then(|()| ensure_schema(&connection, &descriptor.collection))
            .map_err(|err| connection_error(err.to_string()))?;

        debug!(store = %target, "opened collection store");

        Ok(Self {
            connection,
            collection: descriptor.collection.clone(),
        })
    }

    fn replace_all(&mut self, documents: &[Document]) -> Result<usize, StoreError> {
        let unique_keys = self.unique_keys()?;
        let table = self.table();
        let savepoint = self.connection.savepoint()?;

        savepoint.execute(&format!("DELETE FROM {table}"), [])?;
        let (inserted, rejected) = insert_documents(&savepoint, &table, &unique_keys, documents)?;

        if !rejected.is_empty() {
            savepoint.finish()?;
            return Err(StoreError::Insert {
                inserted: 0,
                rejected,
            });
        }

        savepoint.commit()?;
        Ok(inserted)
    }

    fn delete_all(&mut self) -> Result<usize, StoreError> {
        let removed = self
            .connection
            .execute(&format!("DELETE FROM {}", self.table()), [])?;
        Ok(removed)
    }

    fn ensure_unique_key(&mut self, field: &str) -> Result<(), StoreError> {
        validate_name("field", field)?;

        let index_name = unique_index_name(&self.collection, field);
        let sql = format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} ({})",
            quote_ident(&index_name),
            self.table(),
            key_expr(field)
        );

        match self.connection.execute(&sql, []) {
            Ok(_) => {}
            Err(err) if is_constraint_violation(&err) => {
                return Err(StoreError::Constraint {
                    field: field.to_string(),
                    detail: err.to_string(),
                });
            }
            Err(err) => return Err(err.into()),
        }

        self.connection.execute(
            "INSERT INTO _unique_keys(collection, field, index_name, created_at)
             VALUES(?1, ?2, ?3, ?4)
             ON CONFLICT(collection, field) DO UPDATE SET index_name = excluded.index_name",
            params![&self.collection, field, &index_name, Utc::now()],
        )?;

        Ok(())
    }

    fn insert_many(&mut self, documents: &[Document]) -> Result<usize, StoreError> {
        let unique_keys = self.unique_keys()?;
        let table = self.table();
        let savepoint = self.connection.savepoint()?;

        let (inserted, rejected) = insert_documents(&savepoint, &table, &unique_keys, documents)?;
        savepoint.commit()?;

        if rejected.is_empty() {
            Ok(inserted)
        } else {
            Err(StoreError::Insert { inserted, rejected })
        }
    }

    fn count(&self) -> Result<u64, StoreError> {
        let count: i64 = self.connection.query_row(
            &format!("SELECT COUNT(*) FROM {}", self.table()),
            [],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    fn find_duplicate_keys(&self, field: &str) -> Result<Vec<DuplicateKey>, StoreError> {
        validate_name("field", field)?;

        let expr = key_expr(field);
        let sql = format!(
            "SELECT {expr} AS dup_key, COUNT(*) AS dup_count FROM {}
             WHERE {expr} IS NOT NULL
             GROUP BY dup_key
             HAVING COUNT(*) > 1
             ORDER BY dup_key",
            self.table()
        );

        let mut statement = self.connection.prepare(&sql)?;
        let rows = statement.query_map([], |row| {
            let key: SqlValue = row.get(0)?;
            let count: i64 = row.get(1)?;
            Ok((key, count))
        })?;

        let mut duplicates = Vec::new();
        for row in rows {
            let (key, count) = row?;
            duplicates.push(DuplicateKey {
                key: json_from_sql(key),
                count: u64::try_from(count).unwrap_or_default(),
            });
        }
        Ok(duplicates)
    }

    fn find_by_key(&self, field: &str, key: &Value) -> Result<Vec<StoredDocument>, StoreError> {
        validate_name("field", field)?;
        let key_param = sql_from_key(field, key)?;

        let sql = format!(
            "SELECT internal_id, body FROM {} WHERE {} = ?1 ORDER BY internal_id",
            self.table(),
            key_expr(field)
        );

        let mut statement = self.connection.prepare(&sql)?;
        let rows = statement.query_map([key_param], |row| {
            let internal_id: InternalId = row.get(0)?;
            let body: String = row.get(1)?;
            Ok((internal_id, body))
        })?;

        let mut documents = Vec::new();
        for row in rows {
            let (internal_id, body) = row?;
            documents.push(StoredDocument {
                internal_id,
                document: serde_json::from_str(&body)?,
            });
        }
        Ok(documents)
    }

    fn delete_one_by_internal_id(&mut self, internal_id: InternalId) -> Result<bool, StoreError> {
        let removed = self.connection.execute(
            &format!("DELETE FROM {} WHERE internal_id = ?1", self.table()),
            [internal_id],
        )?;
        Ok(removed == 1)
    }

    fn exists_by_key(&self, field: &str, key: &Value) -> Result<bool, StoreError> {
        validate_name("field", field)?;
        key_exists(&self.connection, &self.table(), field, key)
    }

    fn insert_one(&mut self, document: &Document) -> Result<InternalId, StoreError> {
        let body = serde_json::to_string(document)?;
        let sql = format!(
            "INSERT INTO {} (body, inserted_at) VALUES (?1, ?2)",
            self.table()
        );

        match self.connection.execute(&sql, params![body, Utc::now()]) {
            Ok(_) => Ok(self.connection.last_insert_rowid()),
            Err(err) if is_constraint_violation(&err) => {
                let unique_keys = self.unique_keys()?;
                match violated_key(&self.connection, &self.table(), &unique_keys, document, &err)? {
                    Some((field, key)) => Err(StoreError::DuplicateKey { field, key }),
                    None => Err(err.into()),
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    fn begin_transaction(&mut self) -> Result<(), StoreError> {
        self.connection.execute_batch("BEGIN IMMEDIATE")?;
        Ok(())
    }

    fn commit_transaction(&mut self) -> Result<(), StoreError> {
        self.connection.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback_transaction(&mut self) -> Result<(), StoreError> {
        self.connection.execute_batch("ROLLBACK")?;
        Ok(())
    }
}

fn configure_connection(
    connection: &Connection,
    location: &Location,
    descriptor: &ConnectionDescriptor,
) -> rusqlite::Result<()> {
    connection.busy_timeout(descriptor.timeout)?;

    if let Location::Directory(_) = location {
        connection.pragma_update(None, "journal_mode", "WAL")?;
        connection.pragma_update(None, "synchronous", "NORMAL")?;
    }

    Ok(())
}

fn ensure_schema(connection: &Connection, collection: &str) -> rusqlite::Result<()> {
    connection.execute_batch(&format!(
        "
        CREATE TABLE IF NOT EXISTS _metadata (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS _unique_keys (
          collection TEXT NOT NULL,
          field TEXT NOT NULL,
          index_name TEXT NOT NULL,
          created_at TEXT NOT NULL,
          PRIMARY KEY (collection, field)
        );

        CREATE TABLE IF NOT EXISTS {} (
          internal_id INTEGER PRIMARY KEY AUTOINCREMENT,
          body TEXT NOT NULL,
          inserted_at TEXT NOT NULL
        );
        ",
        quote_ident(collection)
    ))?;

    connection.execute(
        "INSERT INTO _metadata(key, value) VALUES('store_schema_version', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        [STORE_SCHEMA_VERSION],
    )?;

    Ok(())
}

/// Inserts row by row so a collision only skips the offending document.
fn insert_documents(
    connection: &Connection,
    table: &str,
    unique_keys: &[(String, String)],
    documents: &[Document],
) -> Result<(usize, Vec<RejectedDocument>), StoreError> {
    let mut statement =
        connection.prepare(&format!("INSERT INTO {table} (body, inserted_at) VALUES (?1, ?2)"))?;

    let mut inserted = 0;
    let mut rejected = Vec::new();

    for (position, document) in documents.iter().enumerate() {
        let body = serde_json::to_string(document)?;

        match statement.execute(params![body, Utc::now()]) {
            Ok(_) => inserted += 1,
            Err(err) if is_constraint_violation(&err) => {
                let (field, key) = violated_key(connection, table, unique_keys, document, &err)?
                    .map_or((None, None), |(field, key)| (Some(field), Some(key)));
                debug!(position, field = ?field, "document rejected by unique key");
                rejected.push(RejectedDocument {
                    position,
                    field,
                    key,
                });
            }
            Err(err) => return Err(err.into()),
        }
    }

    Ok((inserted, rejected))
}

/// Finds the unique field a rejected document collided on: the index named in
/// the SQLite message first, else the first registered field whose value is taken.
fn violated_key(
    connection: &Connection,
    table: &str,
    unique_keys: &[(String, String)],
    document: &Document,
    err: &rusqlite::Error,
) -> Result<Option<(String, Value)>, StoreError> {
    let message = err.to_string();

    let named = unique_keys
        .iter()
        .find(|(_, index_name)| message.contains(&format!("'{index_name}'")));
    if let Some((field, _)) = named {
        let key = document.get(field).cloned().unwrap_or(Value::Null);
        return Ok(Some((field.clone(), key)));
    }

    for (field, _) in unique_keys {
        let Some(key) = document.get(field) else {
            continue;
        };
        if key_exists(connection, table, field, key)? {
            return Ok(Some((field.clone(), key.clone())));
        }
    }

    Ok(None)
}

fn key_exists(
    connection: &Connection,
    table: &str,
    field: &str,
    key: &Value,
) -> Result<bool, StoreError> {
    let key_param = sql_from_key(field, key)?;
    let sql = format!(
        "SELECT 1 FROM {table} WHERE {} = ?1 LIMIT 1",
        key_expr(field)
    );

    let found: Option<i64> = connection
        .query_row(&sql, [key_param], |row| row.get(0))
        .optional()?;
    Ok(found.is_some())
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _) if failure.code == ErrorCode::ConstraintViolation
    )
}

/// Names become SQL identifiers and JSON paths, so they are limited to
/// ASCII letters, digits, `_`, `-` and spaces, starting with a letter.
fn validate_name(what: &'static str, name: &str) -> Result<(), StoreError> {
    let mut chars = name.chars();
    let starts_with_letter = chars.next().is_some_and(|c| c.is_ascii_alphabetic());
    let rest_allowed = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | ' '));
    let reserved = name.to_ascii_lowercase().starts_with("sqlite_");

    if starts_with_letter && rest_allowed && !reserved {
        return Ok(());
    }

    Err(StoreError::InvalidName {
        what,
        name: name.to_string(),
    })
}

/// Index names share one namespace per database file. The length prefix keeps
/// `("a_b", "c")` and `("a", "b_c")` apart.
fn unique_index_name(collection: &str, field: &str) -> String {
    format!("ux_{}_{collection}_{field}", collection.len())
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Expression used both by the unique index and by key lookups, so the
/// planner can use the index. `field` must already be validated.
fn key_expr(field: &str) -> String {
    format!("json_extract(body, '$.\"{field}\"')")
}

fn sql_from_key(field: &str, key: &Value) -> Result<SqlValue, StoreError> {
    let invalid = || StoreError::InvalidKey {
        field: field.to_string(),
        key: key.clone(),
    };

    match key {
        Value::String(text) => Ok(SqlValue::Text(text.clone())),
        Value::Bool(flag) => Ok(SqlValue::Integer(i64::from(*flag))),
        Value::Number(number) => match number.as_i64() {
            Some(value) => Ok(SqlValue::Integer(value)),
            None => number.as_f64().map(SqlValue::Real).ok_or_else(invalid),
        },
        Value::Null | Value::Array(_) | Value::Object(_) => Err(invalid()),
    }
}

fn json_from_sql(value: SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(value) => Value::from(value),
        SqlValue::Real(value) => Number::from_f64(value).map_or(Value::Null, Value::Number),
        SqlValue::Text(text) => Value::String(text),
        SqlValue::Blob(bytes) => Value::String(String::from_utf8_lossy(&bytes).into_owned()),
    }
}
