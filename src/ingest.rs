use chrono::NaiveDate;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{AttendanceError, Result, RowIssue};
use crate::model::{AttendanceSession, Caller, ClassInfo, StudentAttendanceEntry, TeacherInfo, TimeSlot};
use crate::schema::resolve_headers;
use crate::stats::{statistics_for_entries, SessionStatistics};
use crate::store::{MeetingKey, SessionStore};
use crate::upload::{decode_upload, sha256_hex, DecodeLimits, UploadFile};
use crate::validate::validate_rows;

pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 5 * 1024 * 1024;
pub const DEFAULT_MAX_ROWS: usize = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicatePolicy {
    /// Record the session and tell the teacher which sessions it repeats.
    Warn,
    Reject,
}

impl DuplicatePolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "warn" => Some(Self::Warn),
            "reject" => Some(Self::Reject),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct IngestSettings {
    pub limits: DecodeLimits,
    pub duplicate_policy: DuplicatePolicy,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            limits: DecodeLimits {
                max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
                max_rows: DEFAULT_MAX_ROWS,
            },
            duplicate_policy: DuplicatePolicy::Warn,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub caller: Caller,
    pub class_info: ClassInfo,
    pub date: NaiveDate,
    pub time_slot: TimeSlot,
    pub file: UploadFile,
}

/// Everything about the class meeting except the rows, already checked.
#[derive(Debug, Clone)]
pub struct SessionMeta {
    pub class_info: ClassInfo,
    pub date: NaiveDate,
    pub time_slot: TimeSlot,
    pub teacher: TeacherInfo,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestOutcome {
    pub session: AttendanceSession,
    pub statistics: SessionStatistics,
    pub duplicate_of: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewOutcome {
    pub columns: serde_json::Value,
    pub row_count: usize,
    pub valid: bool,
    pub errors: Vec<RowIssue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statistics: Option<SessionStatistics>,
}

pub fn check_metadata(req: &UploadRequest) -> Result<SessionMeta> {
    let caller = req.caller.clone().validated()?;
    let teacher = caller.require_teacher()?;
    Ok(SessionMeta {
        class_info: req.class_info.clone().validated()?,
        date: req.date,
        time_slot: req.time_slot.validated()?,
        teacher,
    })
}

/// Assembles a new session with a fresh id. Statistics are never stored
/// with it; readers derive them.
pub fn build_session(meta: SessionMeta, entries: Vec<StudentAttendanceEntry>) -> AttendanceSession {
    AttendanceSession {
        id: Uuid::new_v4().to_string(),
        class_info: meta.class_info,
        date: meta.date,
        time_slot: meta.time_slot,
        teacher_info: meta.teacher,
        entries,
    }
}

/// Decode, resolve, validate, then commit all rows as one session. Any
/// failure before the commit leaves the store untouched.
pub fn ingest_upload(
    store: &dyn SessionStore,
    req: &UploadRequest,
    settings: &IngestSettings,
) -> Result<IngestOutcome> {
    let result = run_ingest(store, req, settings);
    if let Err(e) = &result {
        warn!(
            code = e.code(),
            teacher_id = %req.caller.id,
            file = req.file.file_name.as_deref().unwrap_or("-"),
            "attendance upload rejected: {}",
            e
        );
    }
    result
}

fn run_ingest(
    store: &dyn SessionStore,
    req: &UploadRequest,
    settings: &IngestSettings,
) -> Result<IngestOutcome> {
    let meta = check_metadata(req)?;
    let table = decode_upload(&req.file, &settings.limits)?;
    let map = resolve_headers(&table.headers)?;
    let entries = validate_rows(&map, &table.rows)?;
    let session = build_session(meta, entries);

    let duplicate_of = store.find_meeting(&MeetingKey::of(&session))?;
    let mut warnings = Vec::new();
    if !duplicate_of.is_empty() {
        if settings.duplicate_policy == DuplicatePolicy::Reject {
            return Err(AttendanceError::DuplicateSession {
                existing: duplicate_of,
            });
        }
        warnings.push(format!(
            "attendance for {} {} on {} at {} was already recorded ({} earlier session(s)); \
             both will count toward statistics",
            session.class_info.subject,
            session.class_info.section,
            session.date,
            crate::model::hhmm::format(&session.time_slot.start_time),
            duplicate_of.len()
        ));
    }

    let digest = sha256_hex(&req.file.bytes);
    store.create(&session, Some(&digest))?;
    info!(
        session_id = %session.id,
        teacher_id = %session.teacher_info.teacher_id,
        entries = session.entries.len(),
        duplicates = duplicate_of.len(),
        "attendance session recorded"
    );

    let statistics = statistics_for_entries(&session.entries);
    Ok(IngestOutcome {
        session,
        statistics,
        duplicate_of,
        warnings,
    })
}

/// Runs every check an upload would face and reports the result without
/// writing anything.
pub fn preview_upload(req: &UploadRequest, settings: &IngestSettings) -> Result<PreviewOutcome> {
    check_metadata(req)?;
    let table = decode_upload(&req.file, &settings.limits)?;
    let map = resolve_headers(&table.headers)?;
    let columns = map.to_json(&table.headers);
    let row_count = table.data_row_count();
    match validate_rows(&map, &table.rows) {
        Ok(entries) => Ok(PreviewOutcome {
            columns,
            row_count,
            valid: true,
            errors: Vec::new(),
            statistics: Some(statistics_for_entries(&entries)),
        }),
        Err(AttendanceError::Validation(errors)) => Ok(PreviewOutcome {
            columns,
            row_count,
            valid: false,
            errors,
            statistics: None,
        }),
        Err(e) => Err(e),
    }
}

/// Header plus one example row with the canonical column names.
pub fn upload_template() -> String {
    "studentId,studentName,rollNumber,status,remarks\n\
     STU001,Asha Rao,1,Present,\n"
        .to_string()
}
