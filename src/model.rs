use serde_json::{Map, Value, json};

/// A stored document: an unordered mapping of field name to JSON value.
pub type Document = Map<String, Value>;

/// One parsed input row before normalization. Values may be strings, numbers or null.
pub type RawRow = Map<String, Value>;

pub const KEY_FIELD: &str = "StudentID";

/// The five core fields entered through the single-record flow.
#[derive(Debug, Clone, PartialEq)]
pub struct StudentRecord {
    pub student_id: String,
    pub age: i64,
    pub gender: Value,
    pub gpa: f64,
    pub grade_class: Value,
}

impl StudentRecord {
    /// The student id is stored under `key_field`, `KEY_FIELD` unless overridden.
    pub fn into_document(self, key_field: &str) -> Document {
        let mut document = Document::new();
        document.insert(key_field.to_string(), Value::String(self.student_id));
        document.insert("Age".to_string(), json!(self.age));
        document.insert("Gender".to_string(), self.gender);
        document.insert("GPA".to_string(), json!(self.gpa));
        document.insert("GradeClass".to_string(), self.grade_class);
        document
    }
}
