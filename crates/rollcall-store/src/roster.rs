//! Teachers, students, classes and enrollments.
//!
//! Only what the matcher and the ledger consume: who teaches a class and
//! who is actively enrolled in it.

use crate::error::{Result, StoreError};
use crate::Store;
use chrono::Utc;
use rollcall_core::{ClassId, ClassInfo, Student, StudentId, Teacher, TeacherId};
use rusqlite::{params, OptionalExtension, Row};

pub(crate) const STUDENT_COLUMNS: &str = "st.id, st.name, st.roll_number, st.department, st.semester, st.batch";

/// Map the six [`STUDENT_COLUMNS`] starting at `offset`.
pub(crate) fn student_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<Student> {
    Ok(Student {
        id: StudentId(row.get(offset)?),
        name: row.get(offset + 1)?,
        roll_number: row.get(offset + 2)?,
        department: row.get(offset + 3)?,
        semester: row.get(offset + 4)?,
        batch: row.get(offset + 5)?,
    })
}

fn class_from_row(row: &Row<'_>) -> rusqlite::Result<ClassInfo> {
    Ok(ClassInfo {
        id: ClassId(row.get(0)?),
        course_name: row.get(1)?,
        course_code: row.get(2)?,
        section: row.get(3)?,
        teacher_id: TeacherId(row.get(4)?),
    })
}

impl Store {
    pub fn add_teacher(&self, name: &str, employee_id: &str, department: &str) -> Result<Teacher> {
        self.conn.execute(
            "INSERT INTO teachers (name, employee_id, department) VALUES (?1, ?2, ?3)",
            params![name, employee_id, department],
        )?;
        let id = TeacherId(self.conn.last_insert_rowid());
        tracing::info!(teacher_id = %id, employee_id, "teacher added");
        Ok(Teacher {
            id,
            name: name.to_string(),
            employee_id: employee_id.to_string(),
            department: department.to_string(),
        })
    }

    pub fn teacher(&self, id: TeacherId) -> Result<Teacher> {
        self.conn
            .query_row(
                "SELECT id, name, employee_id, department FROM teachers WHERE id = ?1",
                params![id.0],
                |row| {
                    Ok(Teacher {
                        id: TeacherId(row.get(0)?),
                        name: row.get(1)?,
                        employee_id: row.get(2)?,
                        department: row.get(3)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found("teacher", id))
    }

    pub fn add_student(
        &self,
        name: &str,
        roll_number: &str,
        department: &str,
        semester: u32,
        batch: &str,
    ) -> Result<Student> {
        self.conn.execute(
            "INSERT INTO students (name, roll_number, department, semester, batch)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![name, roll_number, department, semester, batch],
        )?;
        let id = StudentId(self.conn.last_insert_rowid());
        tracing::info!(student_id = %id, roll_number, "student added");
        Ok(Student {
            id,
            name: name.to_string(),
            roll_number: roll_number.to_string(),
            department: department.to_string(),
            semester,
            batch: batch.to_string(),
        })
    }

    pub fn student(&self, id: StudentId) -> Result<Student> {
        self.conn
            .query_row(
                &format!("SELECT {STUDENT_COLUMNS} FROM students st WHERE st.id = ?1"),
                params![id.0],
                |row| student_from_row(row, 0),
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found("student", id))
    }

    /// All students, ordered by roll number.
    pub fn students(&self) -> Result<Vec<Student>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {STUDENT_COLUMNS} FROM students st ORDER BY st.roll_number"
        ))?;
        let rows = stmt.query_map([], |row| student_from_row(row, 0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn add_class(
        &self,
        course_name: &str,
        course_code: &str,
        section: &str,
        teacher_id: TeacherId,
    ) -> Result<ClassInfo> {
        self.teacher(teacher_id)?;
        self.conn.execute(
            "INSERT INTO classes (course_name, course_code, section, teacher_id)
             VALUES (?1, ?2, ?3, ?4)",
            params![course_name, course_code, section, teacher_id.0],
        )?;
        let id = ClassId(self.conn.last_insert_rowid());
        tracing::info!(class_id = %id, teacher_id = %teacher_id, course_code, "class added");
        Ok(ClassInfo {
            id,
            course_name: course_name.to_string(),
            course_code: course_code.to_string(),
            section: section.to_string(),
            teacher_id,
        })
    }

    pub fn class(&self, id: ClassId) -> Result<ClassInfo> {
        self.conn
            .query_row(
                "SELECT id, course_name, course_code, section, teacher_id FROM classes WHERE id = ?1",
                params![id.0],
                class_from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found("class", id))
    }

    pub fn classes_for_teacher(&self, teacher_id: TeacherId) -> Result<Vec<ClassInfo>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, course_name, course_code, section, teacher_id
             FROM classes WHERE teacher_id = ?1 ORDER BY id DESC",
        )?;
        let rows = stmt.query_map(params![teacher_id.0], class_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Enroll a student, or re-activate a previous enrollment.
    pub fn enroll(&self, class_id: ClassId, student_id: StudentId) -> Result<()> {
        self.class(class_id)?;
        self.student(student_id)?;
        self.conn.execute(
            "INSERT INTO enrollments (class_id, student_id, is_active, enrolled_at)
             VALUES (?1, ?2, 1, ?3)
             ON CONFLICT (class_id, student_id) DO UPDATE SET is_active = 1",
            params![class_id.0, student_id.0, Utc::now()],
        )?;
        tracing::info!(class_id = %class_id, student_id = %student_id, "student enrolled");
        Ok(())
    }

    /// Deactivate an enrollment. Existing attendance rows are kept.
    pub fn unenroll(&self, class_id: ClassId, student_id: StudentId) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE enrollments SET is_active = 0
             WHERE class_id = ?1 AND student_id = ?2 AND is_active = 1",
            params![class_id.0, student_id.0],
        )?;
        if changed == 0 {
            return Err(StoreError::not_found(
                "enrollment",
                format!("{class_id}/{student_id}"),
            ));
        }
        tracing::info!(class_id = %class_id, student_id = %student_id, "student unenrolled");
        Ok(())
    }

    /// Actively enrolled students, ordered by roll number.
    pub fn enrolled_students(&self, class_id: ClassId) -> Result<Vec<Student>> {
        self.class(class_id)?;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {STUDENT_COLUMNS}
             FROM enrollments e JOIN students st ON st.id = e.student_id
             WHERE e.class_id = ?1 AND e.is_active = 1
             ORDER BY st.roll_number"
        ))?;
        let rows = stmt.query_map(params![class_id.0], |row| student_from_row(row, 0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

#[cfg(test)]
mod tests {
    use crate::testutil::*;
    use crate::StoreError;
    use rollcall_core::{ClassId, StudentId};

    #[test]
    fn test_add_and_fetch_student() {
        let store = store();
        let id = student(&store, "R-001");
        let s = store.student(id).unwrap();
        assert_eq!(s.roll_number, "R-001");
        assert_eq!(s.semester, 5);
        assert!(matches!(store.student(StudentId(999)), Err(StoreError::NotFound { .. })));
    }

    #[test]
    fn test_duplicate_roll_number_rejected() {
        let store = store();
        student(&store, "R-001");
        assert!(store.add_student("dup", "R-001", "CSE", 1, "2024").is_err());
    }

    #[test]
    fn test_class_requires_existing_teacher() {
        let store = store();
        let err = store
            .add_class("Networks", "CS320", "A", rollcall_core::TeacherId(42))
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { entity: "teacher", .. }));
    }

    #[test]
    fn test_enroll_unenroll_reenroll() {
        let store = store();
        let t = teacher(&store, "E-1");
        let c = class(&store, t);
        let a = student(&store, "R-002");
        let b = student(&store, "R-001");

        store.enroll(c, a).unwrap();
        store.enroll(c, b).unwrap();
        let rolls: Vec<String> = store
            .enrolled_students(c)
            .unwrap()
            .into_iter()
            .map(|s| s.roll_number)
            .collect();
        assert_eq!(rolls, vec!["R-001", "R-002"]);

        store.unenroll(c, a).unwrap();
        assert_eq!(store.enrolled_students(c).unwrap().len(), 1);
        assert!(store.unenroll(c, a).is_err());

        store.enroll(c, a).unwrap();
        assert_eq!(store.enrolled_students(c).unwrap().len(), 2);
    }

    #[test]
    fn test_enroll_unknown_class() {
        let store = store();
        let s = student(&store, "R-003");
        assert!(matches!(
            store.enroll(ClassId(5), s),
            Err(StoreError::NotFound { entity: "class", .. })
        ));
    }

    #[test]
    fn test_classes_for_teacher() {
        let store = store();
        let t1 = teacher(&store, "E-1");
        let t2 = teacher(&store, "E-2");
        class(&store, t1);
        class(&store, t1);
        class(&store, t2);
        assert_eq!(store.classes_for_teacher(t1).unwrap().len(), 2);
        assert_eq!(store.teacher(t2).unwrap().employee_id, "E-2");
    }
}
