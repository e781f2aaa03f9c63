use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{AttendanceError, Result};
use crate::model::{AttendanceSession, Caller, Role, StudentAttendanceEntry};
use crate::stats::{
    session_statistics, student_statistics, teacher_summary, SessionStatistics,
    StudentAggregateStatistics, TeacherSummary,
};
use crate::store::{SessionFilter, SessionStore};

/// Filters as sent by either view. Blank strings count as absent.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryFilters {
    #[serde(default)]
    pub academic_year: Option<String>,
    #[serde(default)]
    pub semester: Option<u8>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub section: Option<String>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy)]
pub struct QuerySettings {
    pub academic_year_fallback: bool,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            academic_year_fallback: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GatewayResult {
    pub sessions: Vec<AttendanceSession>,
    pub academic_year_filter_ignored: bool,
    pub warnings: Vec<String>,
}

fn non_blank(v: &Option<String>) -> Option<String> {
    v.as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn scoped_filter(caller: &Caller, filters: &QueryFilters) -> Result<SessionFilter> {
    if let Some(semester) = filters.semester {
        if !(1..=8).contains(&semester) {
            return Err(AttendanceError::invalid("semester must be between 1 and 8"));
        }
    }
    if let (Some(start), Some(end)) = (filters.start_date, filters.end_date) {
        if start > end {
            return Err(AttendanceError::invalid("startDate must not be after endDate"));
        }
    }
    let mut filter = SessionFilter {
        academic_year: non_blank(&filters.academic_year),
        semester: filters.semester,
        subject_contains: non_blank(&filters.subject),
        section: non_blank(&filters.section),
        start_date: filters.start_date,
        end_date: filters.end_date,
        ..SessionFilter::default()
    };
    match caller.role {
        Role::Teacher => filter.teacher_id = Some(caller.id.clone()),
        Role::Student => filter.student_id = Some(caller.id.clone()),
    }
    Ok(filter)
}

/// Sessions visible to the caller that match every filter. When an
/// academic year was given and nothing matched, the query is repeated
/// without it and the result says so.
pub fn find_sessions(
    store: &dyn SessionStore,
    caller: &Caller,
    filters: &QueryFilters,
    settings: &QuerySettings,
) -> Result<GatewayResult> {
    let mut filter = scoped_filter(caller, filters)?;
    let sessions = store.query(&filter)?;
    if !sessions.is_empty() || !settings.academic_year_fallback {
        return Ok(GatewayResult {
            sessions,
            ..GatewayResult::default()
        });
    }
    let Some(year) = filter.academic_year.take() else {
        return Ok(GatewayResult::default());
    };

    let sessions = store.query(&filter)?;
    info!(
        caller_id = %caller.id,
        academic_year = %year,
        matched = sessions.len(),
        "academic year filter matched nothing, retried without it"
    );
    Ok(GatewayResult {
        sessions,
        academic_year_filter_ignored: true,
        warnings: vec![format!(
            "no sessions recorded for academic year {}; showing results without the academic year filter",
            year
        )],
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub session: AttendanceSession,
    pub statistics: SessionStatistics,
}

impl SessionView {
    fn of(session: AttendanceSession) -> Self {
        let statistics = session_statistics(&session);
        Self {
            session,
            statistics,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherView {
    pub sessions: Vec<SessionView>,
    pub summary: TeacherSummary,
    pub academic_year_filter_ignored: bool,
    pub warnings: Vec<String>,
}

pub fn teacher_view(
    store: &dyn SessionStore,
    caller: &Caller,
    filters: &QueryFilters,
    settings: &QuerySettings,
) -> Result<TeacherView> {
    if caller.role != Role::Teacher {
        return Err(AttendanceError::Authorization(
            "the teacher view requires the teacher role".to_string(),
        ));
    }
    let found = find_sessions(store, caller, filters, settings)?;
    let summary = teacher_summary(&found.sessions);
    Ok(TeacherView {
        sessions: found.sessions.into_iter().map(SessionView::of).collect(),
        summary,
        academic_year_filter_ignored: found.academic_year_filter_ignored,
        warnings: found.warnings,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentSessionView {
    /// Carries only the caller's own entry.
    pub session: AttendanceSession,
    pub statistics: SessionStatistics,
    pub my_entry: StudentAttendanceEntry,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentView {
    pub sessions: Vec<StudentSessionView>,
    pub statistics: StudentAggregateStatistics,
    pub academic_year_filter_ignored: bool,
    pub warnings: Vec<String>,
}

pub fn student_view(
    store: &dyn SessionStore,
    caller: &Caller,
    filters: &QueryFilters,
    settings: &QuerySettings,
) -> Result<StudentView> {
    if caller.role != Role::Student {
        return Err(AttendanceError::Authorization(
            "the student view requires the student role".to_string(),
        ));
    }
    let found = find_sessions(store, caller, filters, settings)?;
    let statistics = student_statistics(&caller.id, &found.sessions);
    let sessions = found
        .sessions
        .into_iter()
        .filter_map(|session| student_session(session, &caller.id))
        .collect();
    Ok(StudentView {
        sessions,
        statistics,
        academic_year_filter_ignored: found.academic_year_filter_ignored,
        warnings: found.warnings,
    })
}

fn student_session(mut session: AttendanceSession, student_id: &str) -> Option<StudentSessionView> {
    let statistics = session_statistics(&session);
    let my_entry = session.entry_for(student_id)?.clone();
    session.entries = vec![my_entry.clone()];
    Some(StudentSessionView {
        session,
        statistics,
        my_entry,
    })
}

/// Point lookup. Students see only their own entry.
pub fn get_session(store: &dyn SessionStore, caller: &Caller, id: &str) -> Result<serde_json::Value> {
    let session = store
        .get(id)?
        .ok_or_else(|| AttendanceError::NotFound(format!("session {}", id)))?;
    if !caller.can_read(&session) {
        return Err(AttendanceError::Authorization(format!(
            "session {} is not visible to {}",
            id, caller.id
        )));
    }
    let value = match caller.role {
        Role::Teacher => serde_json::to_value(SessionView::of(session)),
        Role::Student => serde_json::to_value(student_session(session, &caller.id)),
    };
    value.map_err(|e| AttendanceError::invalid(e.to_string()))
}

/// Removes a session the caller owns. Unknown ids are reported, not
/// ignored.
pub fn delete_session(store: &dyn SessionStore, caller: &Caller, id: &str) -> Result<()> {
    let session = store
        .get(id)?
        .ok_or_else(|| AttendanceError::NotFound(format!("session {}", id)))?;
    if !caller.can_delete(&session) {
        return Err(AttendanceError::Authorization(format!(
            "only the teacher who recorded session {} may delete it",
            id
        )));
    }
    if !store.delete(id)? {
        return Err(AttendanceError::NotFound(format!("session {}", id)));
    }
    info!(session_id = %id, teacher_id = %caller.id, "attendance session deleted");
    Ok(())
}
