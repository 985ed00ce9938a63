use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

pub fn rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn compact_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y%m%dT%H%M%SZ").to_string()
}

/// Hex SHA-256 of a source file, recorded in run reports.
pub fn file_sha256(path: &Path) -> Result<String> {
    let file = File::open(path)
        .with_context(|| format!("failed to open {} for hashing", path.display()))?;

    let mut hasher = Sha256::new();
    io::copy(&mut BufReader::new(file), &mut hasher)
        .with_context(|| format!("failed to hash {}", path.display()))?;

    Ok(format!("{:x}", hasher.finalize()))
}

pub fn write_report<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }

    let file = File::create(path)
        .with_context(|| format!("failed to create report {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)
        .with_context(|| format!("failed to serialize report {}", path.display()))?;
    writeln!(writer)?;
    writer
        .flush()
        .with_context(|| format!("failed to write report {}", path.display()))?;

    Ok(())
}
