use std::collections::BTreeMap;

use serde::Serialize;

use crate::model::{AttendanceSession, AttendanceStatus, StudentAttendanceEntry};

/// `round(part / total * 100)`, half-up, 0 for an empty total. Integer
/// arithmetic keeps `1/8` at 13 rather than drifting with float error.
pub fn percent_rounded(part: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    let part = part.min(total) as u64;
    let total = total as u64;
    ((part * 200 + total) / (2 * total)) as u32
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatistics {
    pub total_students: usize,
    pub present_count: usize,
    pub absent_count: usize,
    pub late_count: usize,
    pub excused_count: usize,
    pub attendance_percentage: u32,
}

/// Present-vs-absent view of one sheet. Late and Excused are counted on
/// their own and fall in neither bucket.
pub fn statistics_for_entries(entries: &[StudentAttendanceEntry]) -> SessionStatistics {
    let mut stats = SessionStatistics {
        total_students: entries.len(),
        ..SessionStatistics::default()
    };
    for e in entries {
        match e.status {
            AttendanceStatus::Present => stats.present_count += 1,
            AttendanceStatus::Absent => stats.absent_count += 1,
            AttendanceStatus::Late => stats.late_count += 1,
            AttendanceStatus::Excused => stats.excused_count += 1,
        }
    }
    stats.attendance_percentage = percent_rounded(stats.present_count, stats.total_students);
    stats
}

pub fn session_statistics(session: &AttendanceSession) -> SessionStatistics {
    statistics_for_entries(&session.entries)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectStatistics {
    pub subject: String,
    pub total_classes: usize,
    pub attended_classes: usize,
    pub percentage: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentAggregateStatistics {
    pub total_classes: usize,
    pub attended_classes: usize,
    pub overall_percentage: u32,
    pub subject_wise_stats: Vec<SubjectStatistics>,
}

/// Aggregates one student's record over `sessions`. Sessions without an
/// entry for the student are not classes they were enrolled in and are
/// ignored.
pub fn student_statistics(student_id: &str, sessions: &[AttendanceSession]) -> StudentAggregateStatistics {
    let mut by_subject: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
    let mut total = 0usize;
    let mut attended = 0usize;

    for session in sessions {
        let Some(entry) = session.entry_for(student_id) else {
            continue;
        };
        let bucket = by_subject
            .entry(session.class_info.subject.as_str())
            .or_insert((0, 0));
        total += 1;
        bucket.0 += 1;
        if entry.status.is_attended() {
            attended += 1;
            bucket.1 += 1;
        }
    }

    StudentAggregateStatistics {
        total_classes: total,
        attended_classes: attended,
        overall_percentage: percent_rounded(attended, total),
        subject_wise_stats: by_subject
            .into_iter()
            .map(|(subject, (classes, present))| SubjectStatistics {
                subject: subject.to_string(),
                total_classes: classes,
                attended_classes: present,
                percentage: percent_rounded(present, classes),
            })
            .collect(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherSummary {
    pub total_sessions: usize,
    pub total_entries: usize,
    pub present_count: usize,
    pub absent_count: usize,
    pub late_count: usize,
    pub excused_count: usize,
    pub average_attendance_percentage: u32,
}

pub fn teacher_summary(sessions: &[AttendanceSession]) -> TeacherSummary {
    let mut summary = TeacherSummary {
        total_sessions: sessions.len(),
        ..TeacherSummary::default()
    };
    let mut percent_sum = 0usize;
    for session in sessions {
        let s = session_statistics(session);
        summary.total_entries += s.total_students;
        summary.present_count += s.present_count;
        summary.absent_count += s.absent_count;
        summary.late_count += s.late_count;
        summary.excused_count += s.excused_count;
        percent_sum += s.attendance_percentage as usize;
    }
    if !sessions.is_empty() {
        let n = sessions.len();
        summary.average_attendance_percentage = ((percent_sum * 2 + n) / (2 * n)) as u32;
    }
    summary
}
