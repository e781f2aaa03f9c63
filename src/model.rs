use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::error::{AttendanceError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
    Excused,
}

impl AttendanceStatus {
    /// Accepts full words or single-letter codes, any case.
    pub fn parse_token(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "present" | "p" => Some(Self::Present),
            "absent" | "a" => Some(Self::Absent),
            "late" | "l" => Some(Self::Late),
            "excused" | "e" => Some(Self::Excused),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Present => "Present",
            Self::Absent => "Absent",
            Self::Late => "Late",
            Self::Excused => "Excused",
        }
    }

    /// Present and Late count toward a student's attendance.
    pub fn is_attended(self) -> bool {
        matches!(self, Self::Present | Self::Late)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassInfo {
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_code: Option<String>,
    pub class_name: String,
    pub section: String,
    pub semester: u8,
    pub academic_year: String,
}

impl ClassInfo {
    /// Trims every text field and checks ranges. Returns the cleaned copy.
    pub fn validated(self) -> Result<ClassInfo> {
        let subject = required_text(&self.subject, "classInfo.subject")?;
        let class_name = required_text(&self.class_name, "classInfo.className")?;
        let section = required_text(&self.section, "classInfo.section")?;
        let academic_year = required_text(&self.academic_year, "classInfo.academicYear")?;
        if !(1..=8).contains(&self.semester) {
            return Err(AttendanceError::invalid(
                "classInfo.semester must be between 1 and 8",
            ));
        }
        if !is_academic_year(&academic_year) {
            return Err(AttendanceError::invalid(format!(
                "classInfo.academicYear must look like 2024-25 or 2024-2025, got {:?}",
                academic_year
            )));
        }
        let subject_code = self
            .subject_code
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        Ok(ClassInfo {
            subject,
            subject_code,
            class_name,
            section,
            semester: self.semester,
            academic_year,
        })
    }
}

fn required_text(value: &str, key: &str) -> Result<String> {
    let t = value.trim();
    if t.is_empty() {
        return Err(AttendanceError::invalid(format!("{} must not be empty", key)));
    }
    Ok(t.to_string())
}

/// `YYYY-YY` or `YYYY-YYYY`, second year following the first.
pub fn is_academic_year(value: &str) -> bool {
    let Some((first, second)) = value.split_once('-') else {
        return false;
    };
    if first.len() != 4 || !first.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    if !second.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    let Ok(start) = first.parse::<u32>() else {
        return false;
    };
    match second.len() {
        2 => second.parse::<u32>().ok() == Some((start + 1) % 100),
        4 => second.parse::<u32>().ok() == Some(start + 1),
        _ => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSlot {
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
}

impl TimeSlot {
    pub fn validated(self) -> Result<TimeSlot> {
        if self.end_time <= self.start_time {
            return Err(AttendanceError::invalid(
                "timeSlot.endTime must be after timeSlot.startTime",
            ));
        }
        Ok(self)
    }
}

pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn parse(raw: &str) -> Option<NaiveTime> {
        let t = raw.trim();
        NaiveTime::parse_from_str(t, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(t, "%H:%M"))
            .ok()
    }

    pub fn format(t: &NaiveTime) -> String {
        t.format("%H:%M").to_string()
    }

    pub fn serialize<S: Serializer>(t: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format(t))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        parse(&raw).ok_or_else(|| {
            serde::de::Error::custom(format!("time must be HH:MM or HH:MM:SS, got {:?}", raw))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherInfo {
    pub teacher_id: String,
    pub teacher_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentAttendanceEntry {
    pub student_id: String,
    pub student_name: String,
    pub roll_number: String,
    pub status: AttendanceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remarks: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceSession {
    pub id: String,
    pub class_info: ClassInfo,
    pub date: NaiveDate,
    pub time_slot: TimeSlot,
    pub teacher_info: TeacherInfo,
    pub entries: Vec<StudentAttendanceEntry>,
}

impl AttendanceSession {
    pub fn entry_for(&self, student_id: &str) -> Option<&StudentAttendanceEntry> {
        self.entries.iter().find(|e| e.student_id == student_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Teacher,
    Student,
}

/// Identity handed in by the authenticating layer in front of the sidecar.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Caller {
    pub role: Role,
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl Caller {
    pub fn validated(self) -> Result<Caller> {
        let id = required_text(&self.id, "caller.id")?;
        Ok(Caller { id, ..self })
    }

    pub fn require_teacher(&self) -> Result<TeacherInfo> {
        if self.role != Role::Teacher {
            return Err(AttendanceError::Authorization(
                "only teachers may record attendance".to_string(),
            ));
        }
        let name = self
            .name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.id);
        Ok(TeacherInfo {
            teacher_id: self.id.clone(),
            teacher_name: name.to_string(),
        })
    }

    /// Owners and students listed in the session may read it.
    pub fn can_read(&self, session: &AttendanceSession) -> bool {
        match self.role {
            Role::Teacher => session.teacher_info.teacher_id == self.id,
            Role::Student => session.entry_for(&self.id).is_some(),
        }
    }

    pub fn can_delete(&self, session: &AttendanceSession) -> bool {
        self.role == Role::Teacher && session.teacher_info.teacher_id == self.id
    }
}
