//! The set of matchable students for one recognition call.

use crate::encoding::Encoding;
use crate::ids::StudentId;
use crate::types::Student;
use std::collections::BTreeMap;

/// A student together with every stored reference encoding.
#[derive(Debug, Clone)]
pub struct RosterEntry {
    pub student: Student,
    pub encodings: Vec<Encoding>,
}

/// Actively enrolled students of a session's class, keyed by id.
///
/// Built fresh for every recognition call. Students without encodings
/// are never stored, so they can never be a match target. Iteration is
/// in ascending student id.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    entries: BTreeMap<StudentId, RosterEntry>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one reference encoding for `student`.
    pub fn push(&mut self, student: &Student, encoding: Encoding) {
        self.entries
            .entry(student.id)
            .or_insert_with(|| RosterEntry {
                student: student.clone(),
                encodings: Vec::new(),
            })
            .encodings
            .push(encoding);
    }

    /// Add a student with all of its encodings. An empty list is dropped.
    pub fn insert(&mut self, student: Student, encodings: Vec<Encoding>) {
        if encodings.is_empty() {
            tracing::debug!(student_id = %student.id, "student has no encodings; not matchable");
            return;
        }
        for encoding in encodings {
            self.push(&student, encoding);
        }
    }

    pub fn get(&self, id: StudentId) -> Option<&RosterEntry> {
        self.entries.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RosterEntry> {
        self.entries.values()
    }

    /// Number of matchable students.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total reference encodings across all students.
    pub fn encoding_count(&self) -> usize {
        self.entries.values().map(|e| e.encodings.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn student(id: i64) -> Student {
        Student {
            id: StudentId(id),
            name: format!("student{id}"),
            roll_number: format!("R{id:03}"),
            department: "CSE".into(),
            semester: 3,
            batch: "2023".into(),
        }
    }

    #[test]
    fn test_empty_encodings_are_dropped() {
        let mut roster = Roster::new();
        roster.insert(student(1), vec![]);
        assert!(roster.is_empty());
        assert!(roster.get(StudentId(1)).is_none());
    }

    #[test]
    fn test_push_groups_by_student() {
        let mut roster = Roster::new();
        let s = student(5);
        roster.push(&s, Encoding::new(vec![0.0]));
        roster.push(&s, Encoding::new(vec![1.0]));
        roster.push(&student(2), Encoding::new(vec![2.0]));

        assert_eq!(roster.len(), 2);
        assert_eq!(roster.encoding_count(), 3);
        let ids: Vec<i64> = roster.iter().map(|e| e.student.id.0).collect();
        assert_eq!(ids, vec![2, 5]);
    }
}
