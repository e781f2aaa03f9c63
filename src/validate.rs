use std::collections::HashMap;

use crate::error::{AttendanceError, DuplicateStudentError, Result, RowIssue, RowValidationError};
use crate::model::{AttendanceStatus, StudentAttendanceEntry};
use crate::schema::{CanonicalField, SchemaMap};
use crate::upload::is_blank_row;

const REQUIRED: [CanonicalField; 4] = [
    CanonicalField::StudentId,
    CanonicalField::StudentName,
    CanonicalField::RollNumber,
    CanonicalField::Status,
];

/// Checks every data row and returns either all entries or every problem
/// found. Rows are numbered from 1 after the header; blank rows are
/// skipped but still consume a number.
pub fn validate_rows(map: &SchemaMap, rows: &[Vec<String>]) -> Result<Vec<StudentAttendanceEntry>> {
    let mut issues: Vec<RowIssue> = Vec::new();
    let mut entries: Vec<StudentAttendanceEntry> = Vec::with_capacity(rows.len());
    let mut first_seen: HashMap<String, usize> = HashMap::new();

    for (idx, row) in rows.iter().enumerate() {
        if is_blank_row(row) {
            continue;
        }
        let row_no = idx + 1;
        let issues_before = issues.len();

        for field in REQUIRED {
            if map.cell(row, field).is_empty() {
                issues.push(RowIssue::RowValidation(RowValidationError {
                    row: row_no,
                    field: field.name().to_string(),
                    reason: "required value is empty".to_string(),
                }));
            }
        }

        let raw_status = map.cell(row, CanonicalField::Status);
        let status = AttendanceStatus::parse_token(raw_status);
        if status.is_none() && !raw_status.is_empty() {
            issues.push(RowIssue::RowValidation(RowValidationError {
                row: row_no,
                field: CanonicalField::Status.name().to_string(),
                reason: format!(
                    "unrecognized status {:?}, expected Present/P, Absent/A, Late/L or Excused/E",
                    raw_status
                ),
            }));
        }

        let student_id = map.cell(row, CanonicalField::StudentId);
        if !student_id.is_empty() {
            if let Some(first_row) = first_seen.get(student_id) {
                issues.push(RowIssue::DuplicateStudent(DuplicateStudentError {
                    row: row_no,
                    student_id: student_id.to_string(),
                    first_row: *first_row,
                }));
            } else {
                first_seen.insert(student_id.to_string(), row_no);
            }
        }

        if issues.len() > issues_before {
            continue;
        }
        let Some(status) = status else { continue };
        let remarks = map.cell(row, CanonicalField::Remarks);
        entries.push(StudentAttendanceEntry {
            student_id: student_id.to_string(),
            student_name: map.cell(row, CanonicalField::StudentName).to_string(),
            roll_number: map.cell(row, CanonicalField::RollNumber).to_string(),
            status,
            remarks: (!remarks.is_empty()).then(|| remarks.to_string()),
        });
    }

    if !issues.is_empty() {
        tracing::debug!(
            issues = issues.len(),
            first_row = issues[0].row(),
            "upload rows rejected"
        );
        return Err(AttendanceError::Validation(issues));
    }
    Ok(entries)
}
