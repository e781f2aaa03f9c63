use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{AttendanceError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CanonicalField {
    StudentId,
    StudentName,
    RollNumber,
    Status,
    Remarks,
}

impl CanonicalField {
    pub const ALL: [CanonicalField; 5] = [
        CanonicalField::StudentId,
        CanonicalField::StudentName,
        CanonicalField::RollNumber,
        CanonicalField::Status,
        CanonicalField::Remarks,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CanonicalField::StudentId => "studentId",
            CanonicalField::StudentName => "studentName",
            CanonicalField::RollNumber => "rollNumber",
            CanonicalField::Status => "status",
            CanonicalField::Remarks => "remarks",
        }
    }

    pub fn required(self) -> bool {
        self != CanonicalField::Remarks
    }
}

/// Accepted spellings per canonical field. Append here to teach the
/// resolver a new header; the normalized pass covers case, spacing and
/// punctuation variants of every entry.
pub const HEADER_ALIASES: &[(CanonicalField, &[&str])] = &[
    (
        CanonicalField::StudentId,
        &[
            "studentId",
            "student_id",
            "Student ID",
            "StudentID",
            "ID",
            "Student No",
            "Student Number",
            "Admission No",
            "Registration No",
            "Reg No",
            "Enrollment No",
        ],
    ),
    (
        CanonicalField::StudentName,
        &["studentName", "student_name", "Student Name", "Name", "Full Name"],
    ),
    (
        CanonicalField::RollNumber,
        &["rollNumber", "roll_number", "Roll Number", "Roll No", "Roll", "Roll #"],
    ),
    (
        CanonicalField::Status,
        &["status", "Attendance", "Attendance Status", "Present/Absent", "Mark"],
    ),
    (
        CanonicalField::Remarks,
        &["remarks", "Remark", "Comments", "Comment", "Notes", "Note"],
    ),
];

/// Canonical field -> column position in the uploaded table.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SchemaMap {
    columns: BTreeMap<CanonicalField, usize>,
}

impl SchemaMap {
    pub fn column(&self, field: CanonicalField) -> Option<usize> {
        self.columns.get(&field).copied()
    }

    /// Trimmed cell for `field`, empty when the column is absent or the
    /// row is short.
    pub fn cell<'a>(&self, row: &'a [String], field: CanonicalField) -> &'a str {
        self.column(field)
            .and_then(|idx| row.get(idx))
            .map(|c| c.trim())
            .unwrap_or("")
    }

    pub fn to_json(&self, headers: &[String]) -> serde_json::Value {
        let mut out = serde_json::Map::new();
        for (field, idx) in &self.columns {
            out.insert(
                field.name().to_string(),
                serde_json::json!({
                    "column": idx,
                    "header": headers.get(*idx).cloned().unwrap_or_default(),
                }),
            );
        }
        serde_json::Value::Object(out)
    }
}

pub fn normalize_header(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

fn aliases_for(field: CanonicalField) -> &'static [&'static str] {
    HEADER_ALIASES
        .iter()
        .find(|(f, _)| *f == field)
        .map(|(_, aliases)| *aliases)
        .unwrap_or(&[])
}

/// Exact (case-insensitive) alias match first, then the normalized match.
/// A column is bound to at most one field.
pub fn resolve_headers(headers: &[String]) -> Result<SchemaMap> {
    let normalized: Vec<String> = headers.iter().map(|h| normalize_header(h)).collect();
    let mut taken = vec![false; headers.len()];
    let mut map = SchemaMap::default();

    for field in CanonicalField::ALL {
        let aliases = aliases_for(field);
        let exact = headers.iter().enumerate().position(|(idx, h)| {
            !taken[idx] && aliases.iter().any(|a| a.eq_ignore_ascii_case(h.trim()))
        });
        let found = exact.or_else(|| {
            let wanted: Vec<String> = aliases.iter().map(|a| normalize_header(a)).collect();
            normalized
                .iter()
                .enumerate()
                .position(|(idx, n)| !taken[idx] && !n.is_empty() && wanted.contains(n))
        });
        if let Some(idx) = found {
            taken[idx] = true;
            map.columns.insert(field, idx);
        }
    }

    let missing: Vec<String> = CanonicalField::ALL
        .iter()
        .filter(|f| f.required() && map.column(**f).is_none())
        .map(|f| f.name().to_string())
        .collect();
    if !missing.is_empty() {
        return Err(AttendanceError::Schema {
            missing,
            headers: headers.to_vec(),
        });
    }
    Ok(map)
}
