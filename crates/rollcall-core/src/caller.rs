//! Caller identity, resolved once at the transport boundary.
//!
//! Authentication is somebody else's job; by the time a request reaches
//! the core the caller is a typed value and every operation receives it
//! explicitly.

use crate::ids::{StudentId, TeacherId};
use crate::types::ClassInfo;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "role", content = "id", rename_all = "snake_case")]
pub enum Caller {
    Admin,
    Teacher(TeacherId),
    Student(StudentId),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallerError {
    #[error("caller must be 'admin', 'teacher:<id>' or 'student:<id>', got '{0}'")]
    Malformed(String),
}

impl Caller {
    /// Admins manage every class; teachers only the classes they own.
    pub fn can_manage_class(&self, class: &ClassInfo) -> bool {
        match self {
            Caller::Admin => true,
            Caller::Teacher(id) => *id == class.teacher_id,
            Caller::Student(_) => false,
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Caller::Admin)
    }

    /// The student this caller acts as, if any.
    pub fn student(&self) -> Option<StudentId> {
        match self {
            Caller::Student(id) => Some(*id),
            _ => None,
        }
    }
}

impl FromStr for Caller {
    type Err = CallerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("admin") {
            return Ok(Caller::Admin);
        }
        let (role, id) = s
            .split_once(':')
            .ok_or_else(|| CallerError::Malformed(s.to_string()))?;
        let id: i64 = id
            .trim()
            .parse()
            .map_err(|_| CallerError::Malformed(s.to_string()))?;
        match role.trim().to_ascii_lowercase().as_str() {
            "teacher" => Ok(Caller::Teacher(TeacherId(id))),
            "student" => Ok(Caller::Student(StudentId(id))),
            _ => Err(CallerError::Malformed(s.to_string())),
        }
    }
}

impl fmt::Display for Caller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Caller::Admin => f.write_str("admin"),
            Caller::Teacher(id) => write!(f, "teacher:{id}"),
            Caller::Student(id) => write!(f, "student:{id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ClassId;

    fn class_owned_by(teacher: i64) -> ClassInfo {
        ClassInfo {
            id: ClassId(1),
            course_name: "Signals".into(),
            course_code: "EE201".into(),
            section: "A".into(),
            teacher_id: TeacherId(teacher),
        }
    }

    #[test]
    fn test_parse_roles() {
        assert_eq!("admin".parse::<Caller>(), Ok(Caller::Admin));
        assert_eq!("teacher:4".parse::<Caller>(), Ok(Caller::Teacher(TeacherId(4))));
        assert_eq!(" Student: 12 ".parse::<Caller>(), Ok(Caller::Student(StudentId(12))));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for bad in ["", "teacher", "teacher:x", "janitor:1", "student:"] {
            assert!(bad.parse::<Caller>().is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_display_roundtrip() {
        for caller in [Caller::Admin, Caller::Teacher(TeacherId(3)), Caller::Student(StudentId(8))] {
            assert_eq!(caller.to_string().parse::<Caller>(), Ok(caller));
        }
    }

    #[test]
    fn test_class_ownership() {
        let class = class_owned_by(2);
        assert!(Caller::Admin.can_manage_class(&class));
        assert!(Caller::Teacher(TeacherId(2)).can_manage_class(&class));
        assert!(!Caller::Teacher(TeacherId(3)).can_manage_class(&class));
        assert!(!Caller::Student(StudentId(2)).can_manage_class(&class));
    }
}
