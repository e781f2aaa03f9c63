use serde::Serialize;
use serde_json::json;
use thiserror::Error;

/// A required cell that is blank or a status token that does not decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowValidationError {
    pub row: usize,
    pub field: String,
    pub reason: String,
}

/// A studentId seen earlier in the same upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateStudentError {
    pub row: usize,
    pub student_id: String,
    pub first_row: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RowIssue {
    RowValidation(RowValidationError),
    DuplicateStudent(DuplicateStudentError),
}

impl RowIssue {
    pub fn row(&self) -> usize {
        match self {
            RowIssue::RowValidation(e) => e.row,
            RowIssue::DuplicateStudent(e) => e.row,
        }
    }
}

#[derive(Debug, Error)]
pub enum AttendanceError {
    #[error("unsupported or unreadable file: {0}")]
    FileFormat(String),

    #[error("upload is {size} bytes, the limit is {limit} bytes")]
    SizeLimitExceeded { size: u64, limit: u64 },

    #[error("missing required column(s): {}", .missing.join(", "))]
    Schema {
        missing: Vec<String>,
        headers: Vec<String>,
    },

    #[error("{} problem(s) found in uploaded rows", .0.len())]
    Validation(Vec<RowIssue>),

    #[error("{0} not found")]
    NotFound(String),

    #[error("not permitted: {0}")]
    Authorization(String),

    #[error("{0}")]
    InvalidInput(String),

    #[error("a session for this class meeting already exists: {}", .existing.join(", "))]
    DuplicateSession { existing: Vec<String> },

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, AttendanceError>;

impl AttendanceError {
    pub fn code(&self) -> &'static str {
        match self {
            AttendanceError::FileFormat(_) => "file_format",
            AttendanceError::SizeLimitExceeded { .. } => "size_limit_exceeded",
            AttendanceError::Schema { .. } => "schema_error",
            AttendanceError::Validation(_) => "validation_failed",
            AttendanceError::NotFound(_) => "not_found",
            AttendanceError::Authorization(_) => "forbidden",
            AttendanceError::InvalidInput(_) => "bad_params",
            AttendanceError::DuplicateSession { .. } => "duplicate_session",
            AttendanceError::Storage(_) => "db_query_failed",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            AttendanceError::SizeLimitExceeded { size, limit } => {
                Some(json!({ "size": size, "limit": limit }))
            }
            AttendanceError::Schema { missing, headers } => {
                Some(json!({ "missing": missing, "headers": headers }))
            }
            AttendanceError::Validation(issues) => Some(json!({ "errors": issues })),
            AttendanceError::DuplicateSession { existing } => {
                Some(json!({ "existing": existing }))
            }
            _ => None,
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        AttendanceError::InvalidInput(message.into())
    }
}
