use chrono::{NaiveDate, NaiveTime, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};

use crate::error::Result;
use crate::model::{
    hhmm, AttendanceSession, AttendanceStatus, ClassInfo, StudentAttendanceEntry, TeacherInfo,
    TimeSlot,
};

const DATE_FMT: &str = "%Y-%m-%d";

const SESSION_COLUMNS: &str = "s.id, s.subject, s.subject_code, s.class_name, s.section, s.semester,
     s.academic_year, s.session_date, s.start_time, s.end_time, s.teacher_id, s.teacher_name";

/// Conjunctive filter over stored sessions. `None` means unconstrained.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionFilter {
    pub teacher_id: Option<String>,
    pub student_id: Option<String>,
    pub academic_year: Option<String>,
    pub semester: Option<u8>,
    /// Case-insensitive substring of `classInfo.subject`.
    pub subject_contains: Option<String>,
    pub section: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

/// Identifies one class meeting for the repeated-upload check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeetingKey {
    pub date: NaiveDate,
    pub subject: String,
    pub section: String,
    pub teacher_id: String,
    pub start_time: NaiveTime,
}

impl MeetingKey {
    pub fn of(session: &AttendanceSession) -> Self {
        MeetingKey {
            date: session.date,
            subject: session.class_info.subject.clone(),
            section: session.class_info.section.clone(),
            teacher_id: session.teacher_info.teacher_id.clone(),
            start_time: session.time_slot.start_time,
        }
    }
}

/// Record store the pipeline is written against.
pub trait SessionStore {
    /// Persists the session and all of its entries, or nothing.
    fn create(&self, session: &AttendanceSession, source_sha256: Option<&str>) -> Result<()>;
    fn get(&self, id: &str) -> Result<Option<AttendanceSession>>;
    /// Removes the session and its entries. `false` when the id is unknown.
    fn delete(&self, id: &str) -> Result<bool>;
    /// Matching sessions ordered by date, start time, id.
    fn query(&self, filter: &SessionFilter) -> Result<Vec<AttendanceSession>>;
    fn find_meeting(&self, key: &MeetingKey) -> Result<Vec<String>>;
}

pub struct SqliteSessionStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteSessionStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn load_entries(&self, session_id: &str) -> Result<Vec<StudentAttendanceEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT student_id, student_name, roll_number, status, remarks
             FROM attendance_entries
             WHERE session_id = ?
             ORDER BY position",
        )?;
        let entries = stmt
            .query_map([session_id], |r| {
                let raw_status: String = r.get(3)?;
                let status = AttendanceStatus::parse_token(&raw_status).ok_or_else(|| {
                    conversion_error(3, format!("unknown stored status {:?}", raw_status))
                })?;
                Ok(StudentAttendanceEntry {
                    student_id: r.get(0)?,
                    student_name: r.get(1)?,
                    roll_number: r.get(2)?,
                    status,
                    remarks: r.get(4)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}

/// Case-insensitive text predicates. SQLite's `lower()` folds ASCII only,
/// so these run on the loaded headers with Unicode lowercasing.
struct TextFilter {
    academic_year: Option<String>,
    subject_contains: Option<String>,
    section: Option<String>,
}

impl TextFilter {
    fn of(filter: &SessionFilter) -> Self {
        TextFilter {
            academic_year: filter.academic_year.as_deref().map(|y| y.trim().to_lowercase()),
            subject_contains: filter.subject_contains.as_deref().map(str::to_lowercase),
            section: filter.section.as_deref().map(str::to_lowercase),
        }
    }

    fn matches(&self, class: &ClassInfo) -> bool {
        if let Some(year) = &self.academic_year {
            if class.academic_year.trim().to_lowercase() != *year {
                return false;
            }
        }
        if let Some(subject) = &self.subject_contains {
            if !class.subject.to_lowercase().contains(subject.as_str()) {
                return false;
            }
        }
        if let Some(section) = &self.section {
            if class.section.to_lowercase() != *section {
                return false;
            }
        }
        true
    }
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn session_header(r: &Row<'_>) -> rusqlite::Result<AttendanceSession> {
    let date_raw: String = r.get(7)?;
    let start_raw: String = r.get(8)?;
    let end_raw: String = r.get(9)?;
    let date = NaiveDate::parse_from_str(&date_raw, DATE_FMT)
        .map_err(|e| conversion_error(7, e.to_string()))?;
    let start_time = hhmm::parse(&start_raw)
        .ok_or_else(|| conversion_error(8, format!("bad start time {:?}", start_raw)))?;
    let end_time = hhmm::parse(&end_raw)
        .ok_or_else(|| conversion_error(9, format!("bad end time {:?}", end_raw)))?;
    Ok(AttendanceSession {
        id: r.get(0)?,
        class_info: ClassInfo {
            subject: r.get(1)?,
            subject_code: r.get(2)?,
            class_name: r.get(3)?,
            section: r.get(4)?,
            semester: r.get(5)?,
            academic_year: r.get(6)?,
        },
        date,
        time_slot: TimeSlot {
            start_time,
            end_time,
        },
        teacher_info: TeacherInfo {
            teacher_id: r.get(10)?,
            teacher_name: r.get(11)?,
        },
        entries: Vec::new(),
    })
}

impl SessionStore for SqliteSessionStore<'_> {
    fn create(&self, session: &AttendanceSession, source_sha256: Option<&str>) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO attendance_sessions(
                id, subject, subject_code, class_name, section, semester, academic_year,
                session_date, start_time, end_time, teacher_id, teacher_name, created_at,
                source_sha256)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            rusqlite::params![
                session.id,
                session.class_info.subject,
                session.class_info.subject_code,
                session.class_info.class_name,
                session.class_info.section,
                session.class_info.semester,
                session.class_info.academic_year,
                session.date.format(DATE_FMT).to_string(),
                hhmm::format(&session.time_slot.start_time),
                hhmm::format(&session.time_slot.end_time),
                session.teacher_info.teacher_id,
                session.teacher_info.teacher_name,
                Utc::now().to_rfc3339(),
                source_sha256,
            ],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO attendance_entries(
                    session_id, position, student_id, student_name, roll_number, status, remarks)
                 VALUES(?, ?, ?, ?, ?, ?, ?)",
            )?;
            for (position, e) in session.entries.iter().enumerate() {
                stmt.execute(rusqlite::params![
                    session.id,
                    position as i64,
                    e.student_id,
                    e.student_name,
                    e.roll_number,
                    e.status.as_str(),
                    e.remarks,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<AttendanceSession>> {
        let sql = format!("SELECT {} FROM attendance_sessions s WHERE s.id = ?", SESSION_COLUMNS);
        let header = self
            .conn
            .query_row(&sql, [id], session_header)
            .optional()?;
        match header {
            Some(mut session) => {
                session.entries = self.load_entries(&session.id)?;
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    fn delete(&self, id: &str) -> Result<bool> {
        let n = self
            .conn
            .execute("DELETE FROM attendance_sessions WHERE id = ?", [id])?;
        Ok(n > 0)
    }

    fn query(&self, filter: &SessionFilter) -> Result<Vec<AttendanceSession>> {
        let mut sql = format!("SELECT {} FROM attendance_sessions s WHERE 1 = 1", SESSION_COLUMNS);
        let mut bind: Vec<Value> = Vec::new();

        if let Some(teacher_id) = &filter.teacher_id {
            sql.push_str(" AND s.teacher_id = ?");
            bind.push(Value::Text(teacher_id.clone()));
        }
        if let Some(student_id) = &filter.student_id {
            sql.push_str(
                " AND EXISTS (SELECT 1 FROM attendance_entries e
                              WHERE e.session_id = s.id AND e.student_id = ?)",
            );
            bind.push(Value::Text(student_id.clone()));
        }
        if let Some(semester) = filter.semester {
            sql.push_str(" AND s.semester = ?");
            bind.push(Value::Integer(i64::from(semester)));
        }
        if let Some(start) = filter.start_date {
            sql.push_str(" AND s.session_date >= ?");
            bind.push(Value::Text(start.format(DATE_FMT).to_string()));
        }
        if let Some(end) = filter.end_date {
            sql.push_str(" AND s.session_date <= ?");
            bind.push(Value::Text(end.format(DATE_FMT).to_string()));
        }
        sql.push_str(" ORDER BY s.session_date, s.start_time, s.id");

        let mut stmt = self.conn.prepare(&sql)?;
        let headers = stmt
            .query_map(params_from_iter(bind), session_header)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let text = TextFilter::of(filter);
        let mut sessions = Vec::with_capacity(headers.len());
        for mut session in headers.into_iter().filter(|s| text.matches(&s.class_info)) {
            session.entries = self.load_entries(&session.id)?;
            sessions.push(session);
        }
        Ok(sessions)
    }

    fn find_meeting(&self, key: &MeetingKey) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, subject, section FROM attendance_sessions
             WHERE session_date = ? AND teacher_id = ? AND start_time = ?
             ORDER BY created_at, id",
        )?;
        let rows = stmt
            .query_map(
                (
                    key.date.format(DATE_FMT).to_string(),
                    &key.teacher_id,
                    hhmm::format(&key.start_time),
                ),
                |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?, r.get::<_, String>(2)?)),
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let subject = key.subject.to_lowercase();
        let section = key.section.to_lowercase();
        Ok(rows
            .into_iter()
            .filter(|(_, sub, sec)| sub.to_lowercase() == subject && sec.to_lowercase() == section)
            .map(|(id, _, _)| id)
            .collect())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db;

    pub(crate) fn memory_conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        db::init_schema(&conn).expect("schema");
        conn
    }

    pub(crate) fn sample_session(
        id: &str,
        teacher: &str,
        subject: &str,
        year: &str,
        date: (i32, u32, u32),
        entries: &[(&str, AttendanceStatus)],
    ) -> AttendanceSession {
        AttendanceSession {
            id: id.to_string(),
            class_info: ClassInfo {
                subject: subject.to_string(),
                subject_code: Some("MTH101".to_string()),
                class_name: "Grade 10".to_string(),
                section: "A".to_string(),
                semester: 2,
                academic_year: year.to_string(),
            },
            date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).expect("date"),
            time_slot: TimeSlot {
                start_time: NaiveTime::from_hms_opt(9, 0, 0).expect("t"),
                end_time: NaiveTime::from_hms_opt(9, 50, 0).expect("t"),
            },
            teacher_info: TeacherInfo {
                teacher_id: teacher.to_string(),
                teacher_name: format!("Teacher {teacher}"),
            },
            entries: entries
                .iter()
                .enumerate()
                .map(|(i, (sid, status))| StudentAttendanceEntry {
                    student_id: sid.to_string(),
                    student_name: format!("Student {sid}"),
                    roll_number: (i + 1).to_string(),
                    status: *status,
                    remarks: (i == 0).then(|| "front row".to_string()),
                })
                .collect(),
        }
    }

    fn entry_count(conn: &Connection) -> i64 {
        conn.query_row("SELECT COUNT(*) FROM attendance_entries", [], |r| r.get(0))
            .expect("count")
    }

    #[test]
    fn create_then_get_returns_the_same_session() {
        let conn = memory_conn();
        let store = SqliteSessionStore::new(&conn);
        let s = sample_session(
            "s1",
            "T1",
            "Mathematics",
            "2024-25",
            (2024, 9, 2),
            &[("S1", AttendanceStatus::Present), ("S2", AttendanceStatus::Late)],
        );
        store.create(&s, Some("abc")).expect("create");
        assert_eq!(store.get("s1").expect("get"), Some(s));
        assert_eq!(store.get("nope").expect("get"), None);
    }

    #[test]
    fn failed_create_leaves_nothing_behind() {
        let conn = memory_conn();
        let store = SqliteSessionStore::new(&conn);
        // Same student twice violates the entry primary key mid-insert.
        let s = sample_session(
            "s1",
            "T1",
            "Mathematics",
            "2024-25",
            (2024, 9, 2),
            &[("S1", AttendanceStatus::Present), ("S1", AttendanceStatus::Absent)],
        );
        assert!(store.create(&s, None).is_err());
        assert_eq!(store.get("s1").expect("get"), None);
        assert_eq!(entry_count(&conn), 0);
    }

    #[test]
    fn delete_cascades_entries_and_reports_absence() {
        let conn = memory_conn();
        let store = SqliteSessionStore::new(&conn);
        let s = sample_session(
            "s1",
            "T1",
            "Mathematics",
            "2024-25",
            (2024, 9, 2),
            &[("S1", AttendanceStatus::Present), ("S2", AttendanceStatus::Absent)],
        );
        store.create(&s, None).expect("create");
        assert_eq!(entry_count(&conn), 2);
        assert!(store.delete("s1").expect("delete"));
        assert_eq!(entry_count(&conn), 0);
        assert!(!store.delete("s1").expect("delete again"));
    }

    #[test]
    fn query_filters_are_conjunctive() {
        let conn = memory_conn();
        let store = SqliteSessionStore::new(&conn);
        let p = AttendanceStatus::Present;
        for s in [
            sample_session("a", "T1", "Mathematics", "2024-25", (2024, 9, 2), &[("S1", p)]),
            sample_session("b", "T1", "Applied Math", "2024-25", (2024, 9, 9), &[("S2", p)]),
            sample_session("c", "T1", "Physics", "2024-25", (2024, 9, 3), &[("S1", p)]),
            sample_session("d", "T2", "Mathematics", "2023-24", (2023, 10, 1), &[("S1", p)]),
        ] {
            store.create(&s, None).expect("create");
        }

        let ids = |f: SessionFilter| -> Vec<String> {
            store
                .query(&f)
                .expect("query")
                .into_iter()
                .map(|s| s.id)
                .collect()
        };

        assert_eq!(ids(SessionFilter::default()), vec!["d", "a", "c", "b"]);
        assert_eq!(
            ids(SessionFilter {
                subject_contains: Some("MATH".into()),
                ..Default::default()
            }),
            vec!["d", "a", "b"]
        );
        assert_eq!(
            ids(SessionFilter {
                subject_contains: Some("math".into()),
                teacher_id: Some("T1".into()),
                start_date: NaiveDate::from_ymd_opt(2024, 9, 3),
                ..Default::default()
            }),
            vec!["b"]
        );
        assert_eq!(
            ids(SessionFilter {
                student_id: Some("S1".into()),
                academic_year: Some(" 2024-25 ".into()),
                ..Default::default()
            }),
            vec!["a", "c"]
        );
        assert_eq!(
            ids(SessionFilter {
                semester: Some(2),
                section: Some("a".into()),
                end_date: NaiveDate::from_ymd_opt(2024, 9, 2),
                ..Default::default()
            }),
            vec!["d", "a"]
        );
        assert!(ids(SessionFilter {
            semester: Some(5),
            ..Default::default()
        })
        .is_empty());
    }

    #[test]
    fn text_filters_fold_non_ascii_case() {
        let conn = memory_conn();
        let store = SqliteSessionStore::new(&conn);
        let p = AttendanceStatus::Present;
        let mut eco = sample_session("e", "T1", "Économie", "2024-25", (2024, 9, 2), &[("S1", p)]);
        eco.class_info.section = "Ä".to_string();
        store.create(&eco, None).expect("create");
        store
            .create(
                &sample_session("m", "T1", "Mathematics", "2024-25", (2024, 9, 3), &[("S1", p)]),
                None,
            )
            .expect("create");

        let ids = |f: SessionFilter| -> Vec<String> {
            store
                .query(&f)
                .expect("query")
                .into_iter()
                .map(|s| s.id)
                .collect()
        };
        assert_eq!(
            ids(SessionFilter {
                subject_contains: Some("économie".into()),
                ..Default::default()
            }),
            vec!["e"]
        );
        assert_eq!(
            ids(SessionFilter {
                subject_contains: Some("ÉCON".into()),
                section: Some("ä".into()),
                ..Default::default()
            }),
            vec!["e"]
        );
        assert!(ids(SessionFilter {
            section: Some("a".into()),
            subject_contains: Some("é".into()),
            ..Default::default()
        })
        .is_empty());

        let key = MeetingKey {
            subject: "ÉCONOMIE".into(),
            section: "ä".into(),
            ..MeetingKey::of(&eco)
        };
        assert_eq!(store.find_meeting(&key).expect("find"), vec!["e"]);
    }

    #[test]
    fn find_meeting_matches_same_class_slot() {
        let conn = memory_conn();
        let store = SqliteSessionStore::new(&conn);
        let first = sample_session("a", "T1", "Mathematics", "2024-25", (2024, 9, 2), &[]);
        store.create(&first, None).expect("create");
        let key = MeetingKey::of(&first);
        assert_eq!(store.find_meeting(&key).expect("find"), vec!["a"]);

        let other_day = MeetingKey {
            date: NaiveDate::from_ymd_opt(2024, 9, 3).expect("date"),
            ..key.clone()
        };
        assert!(store.find_meeting(&other_day).expect("find").is_empty());
        let other_teacher = MeetingKey {
            teacher_id: "T2".into(),
            ..key
        };
        assert!(store.find_meeting(&other_teacher).expect("find").is_empty());
    }
}
