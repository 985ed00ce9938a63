use std::path::PathBuf;

use clap::builder::NonEmptyStringValueParser;
use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::model::KEY_FIELD;
use crate::normalize::{CORE_COLUMNS, ColumnSpec, EXTENDED_COLUMNS};

#[derive(Parser, Debug)]
#[command(
    name = "student-ingest",
    version,
    about = "Load student performance records into a document collection"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Wipe the collection and bulk-load a CSV file into it.
    Load(LoadArgs),
    /// Add a single student record, refusing existing ids.
    Add(AddArgs),
    /// Remove all but one document for every duplicated key.
    Dedup(DedupArgs),
    /// Report document count and duplicated keys.
    Status(StatusArgs),
    /// Normalize a CSV file and print the chart view without touching the store.
    Preview(PreviewArgs),
}

/// Connection settings shared by every command that talks to the store.
#[derive(Args, Debug, Clone, Default)]
pub struct StoreArgs {
    /// TOML file with a `[store]` table.
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long, env = "STUDENT_STORE_URI", hide_env_values = true)]
    pub uri: Option<String>,

    #[arg(long, env = "STUDENT_STORE_DATABASE")]
    pub database: Option<String>,

    #[arg(long, env = "STUDENT_STORE_COLLECTION")]
    pub collection: Option<String>,

    #[arg(long, env = "STUDENT_STORE_TIMEOUT_MS")]
    pub timeout_ms: Option<u64>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum RecordVariant {
    Core,
    Extended,
}

impl RecordVariant {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Core => "core",
            Self::Extended => "extended",
        }
    }

    pub fn columns(self) -> &'static [ColumnSpec] {
        match self {
            Self::Core => &CORE_COLUMNS,
            Self::Extended => &EXTENDED_COLUMNS,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct LoadArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[arg(long, default_value = "Student_performance_data.csv")]
    pub csv: PathBuf,

    #[arg(long, value_enum, default_value_t = RecordVariant::Core)]
    pub variant: RecordVariant,

    #[arg(long, default_value = KEY_FIELD)]
    pub key_field: String,

    /// Run wipe, constraint and insert inside one transaction.
    #[arg(long, default_value_t = false)]
    pub atomic: bool,

    #[arg(long, default_value = ".cache/student_ingest/reports")]
    pub report_dir: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct AddArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[arg(long, default_value = KEY_FIELD)]
    pub key_field: String,

    #[arg(long, value_parser = NonEmptyStringValueParser::new())]
    pub student_id: String,

    #[arg(long, default_value_t = 18, value_parser = clap::value_parser!(i64).range(1..=100))]
    pub age: i64,

    #[arg(long)]
    pub gender: String,

    #[arg(long, default_value_t = 0.0, value_parser = parse_gpa)]
    pub gpa: f64,

    #[arg(long, value_parser = NonEmptyStringValueParser::new())]
    pub grade_class: String,
}

#[derive(Args, Debug, Clone)]
pub struct DedupArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[arg(long, default_value = KEY_FIELD)]
    pub key_field: String,

    /// Report duplicated keys without deleting anything.
    #[arg(long, default_value_t = false)]
    pub dry_run: bool,

    /// Assert the unique key once the sweep has finished.
    #[arg(long, default_value_t = false)]
    pub enforce: bool,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[command(flatten)]
    pub store: StoreArgs,

    #[arg(long, default_value = KEY_FIELD)]
    pub key_field: String,
}

#[derive(Args, Debug, Clone)]
pub struct PreviewArgs {
    #[arg(long, default_value = "Student_performance_data.csv")]
    pub csv: PathBuf,

    #[arg(long, value_enum, default_value_t = RecordVariant::Core)]
    pub variant: RecordVariant,

    #[arg(long, default_value_t = 10)]
    pub limit: usize,
}

fn parse_gpa(raw: &str) -> Result<f64, String> {
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|_| format!("`{raw}` is not a number"))?;

    if (0.0..=4.0).contains(&value) {
        Ok(value)
    } else {
        Err(format!("GPA must be between 0.0 and 4.0, got {value}"))
    }
}
