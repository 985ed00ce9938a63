//! Raw rows to canonical student documents.
//!
//! Normalization is a pure function of its input. A row is kept only when
//! every required column is present, non-null and coercible to its field
//! kind; everything else is recorded as a [`RowRejection`] and skipped.

use serde::Serialize;
use serde_json::{Number, Value};

use crate::model::{Document, RawRow};


/// Cell spellings treated as missing, on top of the empty string.
const NULL_MARKERS: [&str; 10] = [
    "NA", "N/A", "n/a", "NaN", "nan", "NULL", "null", "None", "#N/A", "<NA>",
];

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FieldKind {
    /// Identifier stored as a string, never as a number.
    Key,
    /// Numeric value rounded half-to-even and stored as an integer.
    RoundedInteger,
    Float,
    /// Integer code when the value is integral, otherwise trimmed text.
    Category,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ColumnSpec {
    /// Header name in the tabular source.
    pub column: &'static str,
    /// Field name in the stored document. Also accepted as an input alias.
    pub field: &'static str,
    pub kind: FieldKind,
}

const fn column(column: &'static str, field: &'static str, kind: FieldKind) -> ColumnSpec {
    ColumnSpec {
        column,
        field,
        kind,
    }
}

pub const CORE_COLUMNS: [ColumnSpec; 5] = [
    column("StudentID", "StudentID", FieldKind::Key),
    column("Age", "Age", FieldKind::RoundedInteger),
    column("Gender", "Gender", FieldKind::Category),
    column("GPA", "GPA", FieldKind::Float),
    column("GradeClass", "GradeClass", FieldKind::Category),
];

pub const EXTENDED_COLUMNS: [ColumnSpec; 15] = [
    column("StudentID", "StudentID", FieldKind::Key),
    column("Age", "Age", FieldKind::RoundedInteger),
    column("Gender", "Gender", FieldKind::Category),
    column("Ethnicity", "Ethnicity", FieldKind::Category),
    column(
        "ParentalEducation",
        "Parental Education",
        FieldKind::Category,
    ),
    column("StudyTimeWeekly", "Weekly Study Time", FieldKind::Float),
    column("Absences", "Absences", FieldKind::RoundedInteger),
    column("Tutoring", "Tutoring", FieldKind::Category),
    column("ParentalSupport", "Parental Support", FieldKind::Category),
    column(
        "Extracurricular",
        "Extracurricular Activities",
        FieldKind::Category,
    ),
    column("Sports", "Sports", FieldKind::Category),
    column("Music", "Music", FieldKind::Category),
    column("Volunteering", "Volunteering", FieldKind::Category),
    column("GPA", "GPA", FieldKind::Float),
    column("GradeClass", "GradeClass", FieldKind::Category),
];

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    Missing,
    Invalid,
}

impl RejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Missing => "missing",
            Self::Invalid => "invalid",
        }
    }
}

/// A dropped input row. Rows are zero-indexed, header excluded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowRejection {
    pub row_index: usize,
    pub column: String,
    pub reason: RejectReason,
}

#[derive(Debug, Default)]
pub struct Normalized {
    pub documents: Vec<Document>,
    pub rejected: Vec<RowRejection>,
}

pub fn normalize(rows: &[RawRow], columns: &[ColumnSpec]) -> Normalized {
    let mut normalized = Normalized {
        documents: Vec::with_capacity(rows.len()),
        rejected: Vec::new(),
    };

    'rows: for (row_index, row) in rows.iter().enumerate() {
        let mut document = Document::new();

        for spec in columns {
            match coerce_column(row, spec) {
                Ok(value) => {
                    document.insert(spec.field.to_string(), value);
                }
                Err(reason) => {
                    normalized.rejected.push(RowRejection {
                        row_index,
                        column: spec.column.to_string(),
                        reason,
                    });
                    continue 'rows;
                }
            }
        }

        normalized.documents.push(document);
    }

    normalized
}

fn coerce_column(row: &RawRow, spec: &ColumnSpec) -> Result<Value, RejectReason> {
    let raw = row
        .get(spec.column)
        .or_else(|| row.get(spec.field))
        .filter(|value| !is_blank(value))
        .ok_or(RejectReason::Missing)?;

    let coerced = match spec.kind {
        FieldKind::Key => coerce_key(raw),
        FieldKind::RoundedInteger => numeric(raw)
            .and_then(|value| exact_i64(value.round_ties_even()))
            .map(Value::from),
        FieldKind::Float => numeric(raw).and_then(Number::from_f64).map(Value::Number),
        FieldKind::Category => coerce_category(raw),
    };

    coerced.ok_or(RejectReason::Invalid)
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => {
            let text = text.trim();
            text.is_empty() || NULL_MARKERS.contains(&text)
        }
        _ => false,
    }
}

fn numeric(raw: &Value) -> Option<f64> {
    let value = match raw {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }?;

    value.is_finite().then_some(value)
}

/// Keys are text. Integer spellings such as `"0042"` are kept verbatim, while
/// float spellings of a whole number (`1001.0`, `"1001.0"`, `"1.001e3"`) become
/// the plain integer text.
fn coerce_key(raw: &Value) -> Option<Value> {
    let text = match raw {
        Value::String(text) => {
            let text = text.trim();
            if text.parse::<i64>().is_ok() {
                text.to_string()
            } else {
                match text.parse::<f64>().ok().and_then(exact_i64) {
                    Some(value) => value.to_string(),
                    None => text.to_string(),
                }
            }
        }
        Value::Number(number) => integral_text(number),
        _ => return None,
    };

    Some(Value::String(text))
}

fn integral_text(number: &Number) -> String {
    if let Some(value) = number.as_i64() {
        return value.to_string();
    }
    if let Some(value) = number.as_u64() {
        return value.to_string();
    }
    match number.as_f64().and_then(exact_i64) {
        Some(value) => value.to_string(),
        None => number.to_string(),
    }
}

/// Whole numbers that fit in `i64`. `as` would saturate anything larger.
fn exact_i64(value: f64) -> Option<i64> {
    let in_range = value >= i64::MIN as f64 && value < i64::MAX as f64;
    (value.is_finite() && value.fract() == 0.0 && in_range).then_some(value as i64)
}

/// Categorical labels keep integral codes as integers (`"2.0"` becomes `2`)
/// and everything else as trimmed text.
pub fn coerce_category(raw: &Value) -> Option<Value> {
    match raw {
        Value::Number(number) => Some(integral_number(number)),
        Value::String(text) => {
            let text = text.trim();
            match text.parse::<f64>() {
                Ok(value) if value.is_finite() && value.fract() == 0.0 => {
                    exact_i64(value).map(Value::from)
                }
                _ => Some(Value::String(text.to_string())),
            }
        }
        Value::Bool(flag) => Some(Value::Bool(*flag)),
        _ => None,
    }
}

fn integral_number(number: &Number) -> Value {
    match number.as_f64() {
        Some(value) if number.is_f64() => match exact_i64(value) {
            Some(integer) => Value::from(integer),
            None => Value::Number(number.clone()),
        },
        _ => Value::Number(number.clone()),
    }
}

/// Coarse GPA bucket for chart summaries, using half-open thresholds.
pub fn categorize_gpa(gpa: f64) -> &'static str {
    if gpa < 1.5 {
        "1.0"
    } else if gpa < 2.5 {
        "2.0"
    } else if gpa < 3.5 {
        "3.0"
    } else {
        "4.0"
    }
}

/// Chart-summary projection of a stored document. Never written to the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartRow {
    #[serde(rename = "StudentID")]
    pub student_id: Value,
    #[serde(rename = "Age")]
    pub age: Value,
    #[serde(rename = "Gender")]
    pub gender: Value,
    #[serde(rename = "GPA")]
    pub gpa: f64,
    #[serde(rename = "GPA_Cat")]
    pub gpa_category: &'static str,
    #[serde(rename = "GradeClass")]
    pub grade_class: Value,
}

pub fn chart_rows(documents: &[Document]) -> Vec<ChartRow> {
    documents
        .iter()
        .filter_map(|document| {
            let gpa = document.get("GPA").and_then(Value::as_f64)?;
            let field = |name: &str| document.get(name).cloned().unwrap_or(Value::Null);

            Some(ChartRow {
                student_id: field("StudentID"),
                age: field("Age"),
                gender: field("Gender"),
                gpa,
                gpa_category: categorize_gpa(gpa),
                grade_class: field("GradeClass"),
            })
        })
        .collect()
}
