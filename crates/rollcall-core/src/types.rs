use crate::encoding::Encoding;
use crate::ids::{ClassId, RecordId, SessionId, StudentId, TeacherId};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A teacher profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Teacher {
    pub id: TeacherId,
    pub name: String,
    pub employee_id: String,
    pub department: String,
}

/// A student profile with its enrollment attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    pub id: StudentId,
    pub name: String,
    pub roll_number: String,
    pub department: String,
    pub semester: u32,
    pub batch: String,
}

/// One course section taught by one teacher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassInfo {
    pub id: ClassId,
    pub course_name: String,
    pub course_code: String,
    pub section: String,
    pub teacher_id: TeacherId,
}

/// A stored reference encoding with metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceEncoding {
    /// UUID v4.
    pub id: String,
    pub student_id: StudentId,
    pub primary: bool,
    pub encoding: Encoding,
    pub created_at: DateTime<Utc>,
}

/// Attendance session for one class on one calendar date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassSession {
    pub id: SessionId,
    pub class_id: ClassId,
    pub date: NaiveDate,
    /// Cleared once the session ends; never set again.
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// Session with class details and live counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    #[serde(flatten)]
    pub session: ClassSession,
    pub class_name: String,
    pub course_code: String,
    pub section: String,
    /// Active enrollments right now, not at open time.
    pub total_enrolled: u32,
    pub total_present: u32,
    pub total_absent: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AttendanceStatus {
    Present,
    Absent,
}

impl AttendanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "PRESENT",
            AttendanceStatus::Absent => "ABSENT",
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown attendance status '{0}'")]
pub struct UnknownStatus(pub String);

impl FromStr for AttendanceStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PRESENT" => Ok(AttendanceStatus::Present),
            "ABSENT" => Ok(AttendanceStatus::Absent),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// One student's outcome in one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub id: RecordId,
    pub session_id: SessionId,
    pub student_id: StudentId,
    pub student_name: String,
    pub roll_number: String,
    pub status: AttendanceStatus,
    /// `1 - distance` of the last match; `None` while absent.
    pub confidence: Option<f64>,
    pub marked_at: DateTime<Utc>,
}

/// A student's outcome in one session, seen from the student side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentAttendance {
    pub session_id: SessionId,
    pub class_id: ClassId,
    pub course_name: String,
    pub course_code: String,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    pub confidence: Option<f64>,
}
