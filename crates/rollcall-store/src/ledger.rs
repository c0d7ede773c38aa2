//! Attendance sessions and their per-student outcomes.
//!
//! A session is `OPEN → CLOSED`, nothing else. Outcome rows are created
//! in bulk when the session opens and only ever move ABSENT → PRESENT
//! (or PRESENT → PRESENT with a new confidence). Deleting a row is the
//! only way to undo a mark.

use crate::error::{Result, StoreError};
use crate::{conversion_error, Store};
use chrono::{NaiveDate, Utc};
use rollcall_core::{
    AttendanceRecord, AttendanceStatus, ClassId, ClassSession, RecordId, SessionId, SessionSummary,
    StudentAttendance, StudentId,
};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;

const SUMMARY_SELECT: &str = "
SELECT s.id, s.class_id, s.date, s.is_active, s.created_at,
       c.course_name, c.course_code, c.section,
       (SELECT COUNT(*) FROM enrollments e WHERE e.class_id = s.class_id AND e.is_active = 1),
       (SELECT COUNT(*) FROM attendance_records r WHERE r.session_id = s.id AND r.status = 'PRESENT'),
       (SELECT COUNT(*) FROM attendance_records r WHERE r.session_id = s.id AND r.status = 'ABSENT')
FROM attendance_sessions s
JOIN classes c ON c.id = s.class_id";

const RECORD_SELECT: &str = "
SELECT r.id, r.session_id, r.student_id, st.name, st.roll_number, r.status, r.confidence, r.marked_at
FROM attendance_records r
JOIN students st ON st.id = r.student_id";

/// What [`Store::delete_sessions_for_class`] removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeletedSessions {
    pub sessions_deleted: usize,
    pub records_deleted: usize,
}

/// A deleted outcome row, plus the session it belonged to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeletedRecord {
    pub record: AttendanceRecord,
    pub session_date: NaiveDate,
}

fn summary_from_row(row: &Row<'_>) -> rusqlite::Result<SessionSummary> {
    Ok(SessionSummary {
        session: ClassSession {
            id: SessionId(row.get(0)?),
            class_id: ClassId(row.get(1)?),
            date: row.get(2)?,
            active: row.get(3)?,
            created_at: row.get(4)?,
        },
        class_name: row.get(5)?,
        course_code: row.get(6)?,
        section: row.get(7)?,
        total_enrolled: row.get(8)?,
        total_present: row.get(9)?,
        total_absent: row.get(10)?,
    })
}

fn status_from_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<AttendanceStatus> {
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_error(idx, Type::Text, e))
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<AttendanceRecord> {
    Ok(AttendanceRecord {
        id: RecordId(row.get(0)?),
        session_id: SessionId(row.get(1)?),
        student_id: StudentId(row.get(2)?),
        student_name: row.get(3)?,
        roll_number: row.get(4)?,
        status: status_from_column(row, 5)?,
        confidence: row.get(6)?,
        marked_at: row.get(7)?,
    })
}

impl Store {
    /// Get or create the session for `(class_id, date)`.
    ///
    /// On creation every actively enrolled student gets an ABSENT row,
    /// in the same transaction. Returns `true` when the session is new.
    pub fn open_session(&mut self, class_id: ClassId, date: NaiveDate) -> Result<(SessionSummary, bool)> {
        let tx = self.conn.transaction()?;
        let class_exists: bool = tx.query_row(
            "SELECT EXISTS (SELECT 1 FROM classes WHERE id = ?1)",
            params![class_id.0],
            |row| row.get(0),
        )?;
        if !class_exists {
            return Err(StoreError::not_found("class", class_id));
        }

        let now = Utc::now();
        let created = tx.execute(
            "INSERT INTO attendance_sessions (class_id, date, is_active, created_at)
             VALUES (?1, ?2, 1, ?3)
             ON CONFLICT (class_id, date) DO NOTHING",
            params![class_id.0, date, now],
        )? == 1;

        let session_id = SessionId(tx.query_row(
            "SELECT id FROM attendance_sessions WHERE class_id = ?1 AND date = ?2",
            params![class_id.0, date],
            |row| row.get(0),
        )?);

        let mut materialized = 0;
        if created {
            materialized = tx.execute(
                "INSERT INTO attendance_records (session_id, student_id, status, confidence, marked_at)
                 SELECT ?1, e.student_id, 'ABSENT', NULL, ?2
                 FROM enrollments e WHERE e.class_id = ?3 AND e.is_active = 1",
                params![session_id.0, now, class_id.0],
            )?;
        }
        tx.commit()?;

        if created {
            tracing::info!(
                session_id = %session_id,
                class_id = %class_id,
                %date,
                records = materialized,
                "attendance session opened"
            );
        } else {
            tracing::debug!(session_id = %session_id, class_id = %class_id, %date, "attendance session already open");
        }

        Ok((self.session(session_id)?, created))
    }

    pub fn session(&self, session_id: SessionId) -> Result<SessionSummary> {
        self.conn
            .query_row(
                &format!("{SUMMARY_SELECT} WHERE s.id = ?1"),
                params![session_id.0],
                summary_from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found("attendance session", session_id))
    }

    pub fn session_for_date(&self, class_id: ClassId, date: NaiveDate) -> Result<Option<SessionSummary>> {
        Ok(self
            .conn
            .query_row(
                &format!("{SUMMARY_SELECT} WHERE s.class_id = ?1 AND s.date = ?2"),
                params![class_id.0, date],
                summary_from_row,
            )
            .optional()?)
    }

    /// All sessions of a class, newest date first.
    pub fn list_sessions(&self, class_id: ClassId) -> Result<Vec<SessionSummary>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{SUMMARY_SELECT} WHERE s.class_id = ?1 ORDER BY s.date DESC"))?;
        let rows = stmt.query_map(params![class_id.0], summary_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Mark `student_id` present in `session_id` with `confidence`.
    ///
    /// One conditional UPDATE: the row only changes while the session is
    /// active. Repeated calls overwrite (last write wins).
    pub fn apply_match(&self, session_id: SessionId, student_id: StudentId, confidence: f64) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE attendance_records
             SET status = 'PRESENT', confidence = ?3, marked_at = ?4
             WHERE session_id = ?1 AND student_id = ?2
               AND EXISTS (SELECT 1 FROM attendance_sessions WHERE id = ?1 AND is_active = 1)",
            params![session_id.0, student_id.0, confidence, Utc::now()],
        )?;
        if changed == 1 {
            tracing::debug!(session_id = %session_id, student_id = %student_id, confidence, "student marked present");
            return Ok(());
        }

        match self.session_active(session_id)? {
            None => Err(StoreError::not_found("attendance session", session_id)),
            Some(false) => Err(StoreError::SessionClosed(session_id)),
            Some(true) => Err(StoreError::NoSuchOutcome {
                session: session_id,
                student: student_id,
            }),
        }
    }

    /// End a session. One-way; ending a closed session fails.
    pub fn close_session(&self, session_id: SessionId) -> Result<SessionSummary> {
        let changed = self.conn.execute(
            "UPDATE attendance_sessions SET is_active = 0 WHERE id = ?1 AND is_active = 1",
            params![session_id.0],
        )?;
        if changed == 0 {
            return match self.session_active(session_id)? {
                None => Err(StoreError::not_found("attendance session", session_id)),
                Some(_) => Err(StoreError::SessionClosed(session_id)),
            };
        }
        tracing::info!(session_id = %session_id, "attendance session ended");
        self.session(session_id)
    }

    fn session_active(&self, session_id: SessionId) -> Result<Option<bool>> {
        Ok(self
            .conn
            .query_row(
                "SELECT is_active FROM attendance_sessions WHERE id = ?1",
                params![session_id.0],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Outcome rows of a session, ordered by roll number.
    pub fn records(&self, session_id: SessionId) -> Result<Vec<AttendanceRecord>> {
        self.session_active(session_id)?
            .ok_or_else(|| StoreError::not_found("attendance session", session_id))?;
        let mut stmt = self
            .conn
            .prepare(&format!("{RECORD_SELECT} WHERE r.session_id = ?1 ORDER BY st.roll_number"))?;
        let rows = stmt.query_map(params![session_id.0], record_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn record(&self, record_id: RecordId) -> Result<AttendanceRecord> {
        self.conn
            .query_row(
                &format!("{RECORD_SELECT} WHERE r.id = ?1"),
                params![record_id.0],
                record_from_row,
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found("attendance record", record_id))
    }

    /// Delete a session and its outcome rows. Returns the number of rows removed.
    pub fn delete_session(&mut self, session_id: SessionId) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let records = tx.execute(
            "DELETE FROM attendance_records WHERE session_id = ?1",
            params![session_id.0],
        )?;
        let sessions = tx.execute(
            "DELETE FROM attendance_sessions WHERE id = ?1",
            params![session_id.0],
        )?;
        if sessions == 0 {
            return Err(StoreError::not_found("attendance session", session_id));
        }
        tx.commit()?;
        tracing::info!(session_id = %session_id, records, "attendance session deleted");
        Ok(records)
    }

    pub fn delete_sessions_for_class(&mut self, class_id: ClassId) -> Result<DeletedSessions> {
        let tx = self.conn.transaction()?;
        let records_deleted = tx.execute(
            "DELETE FROM attendance_records
             WHERE session_id IN (SELECT id FROM attendance_sessions WHERE class_id = ?1)",
            params![class_id.0],
        )?;
        let sessions_deleted = tx.execute(
            "DELETE FROM attendance_sessions WHERE class_id = ?1",
            params![class_id.0],
        )?;
        tx.commit()?;
        tracing::info!(class_id = %class_id, sessions_deleted, records_deleted, "attendance sessions deleted");
        Ok(DeletedSessions {
            sessions_deleted,
            records_deleted,
        })
    }

    /// Remove one outcome row. The student is untracked in that session
    /// from then on.
    pub fn delete_record(&self, record_id: RecordId) -> Result<DeletedRecord> {
        let record = self.record(record_id)?;
        let session_date: NaiveDate = self.conn.query_row(
            "SELECT date FROM attendance_sessions WHERE id = ?1",
            params![record.session_id.0],
            |row| row.get(0),
        )?;
        self.conn.execute(
            "DELETE FROM attendance_records WHERE id = ?1",
            params![record_id.0],
        )?;
        tracing::info!(record_id = %record_id, session_id = %record.session_id, "attendance record deleted");
        Ok(DeletedRecord { record, session_date })
    }

    /// A student's outcomes across all sessions, newest first.
    pub fn student_attendance(&self, student_id: StudentId) -> Result<Vec<StudentAttendance>> {
        let mut stmt = self.conn.prepare(
            "SELECT s.id, s.class_id, c.course_name, c.course_code, s.date, r.status, r.confidence
             FROM attendance_records r
             JOIN attendance_sessions s ON s.id = r.session_id
             JOIN classes c ON c.id = s.class_id
             WHERE r.student_id = ?1
             ORDER BY s.date DESC, s.id DESC",
        )?;
        let rows = stmt.query_map(params![student_id.0], |row| {
            Ok(StudentAttendance {
                session_id: SessionId(row.get(0)?),
                class_id: ClassId(row.get(1)?),
                course_name: row.get(2)?,
                course_code: row.get(3)?,
                date: row.get(4)?,
                status: status_from_column(row, 5)?,
                confidence: row.get(6)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

#[cfg(test)]
mod tests {
    use crate::testutil::*;
    use crate::{Store, StoreError};
    use chrono::NaiveDate;
    use rollcall_core::{AttendanceStatus, ClassId, SessionId, StudentId};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 9, d).unwrap()
    }

    /// A class with three enrolled students (rolls R-1..R-3).
    fn classroom(store: &Store) -> (ClassId, Vec<StudentId>) {
        let t = teacher(store, "E-1");
        let c = class(store, t);
        let students: Vec<StudentId> = ["R-1", "R-2", "R-3"].iter().map(|r| student(store, r)).collect();
        for s in &students {
            store.enroll(c, *s).unwrap();
        }
        (c, students)
    }

    fn status_of(store: &Store, session: SessionId, student: StudentId) -> (AttendanceStatus, Option<f64>) {
        let rec = store
            .records(session)
            .unwrap()
            .into_iter()
            .find(|r| r.student_id == student)
            .unwrap();
        (rec.status, rec.confidence)
    }

    #[test]
    fn test_close_from_another_connection_blocks_later_matches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollcall.db");
        let mut store = Store::open(&path).unwrap();
        let (c, students) = classroom(&store);
        let (summary, _) = store.open_session(c, day(1)).unwrap();
        let session = summary.session.id;

        store.apply_match(session, students[0], 0.8).unwrap();

        // A second handle on the same file ends the session between two matches.
        let other = Store::open(&path).unwrap();
        let closed = other.close_session(session).unwrap();
        assert!(!closed.session.active);

        let err = store.apply_match(session, students[1], 0.9).unwrap_err();
        assert!(matches!(err, StoreError::SessionClosed(id) if id == session));
        assert!(matches!(other.apply_match(session, students[2], 0.9), Err(StoreError::SessionClosed(_))));
        assert!(matches!(store.close_session(session), Err(StoreError::SessionClosed(_))));

        assert_eq!(status_of(&store, session, students[0]), (AttendanceStatus::Present, Some(0.8)));
        assert_eq!(status_of(&store, session, students[1]), (AttendanceStatus::Absent, None));

        let raw = rusqlite::Connection::open(&path).unwrap();
        let present: i64 = raw
            .query_row(
                "SELECT COUNT(*) FROM attendance_records WHERE session_id = ?1 AND status = 'PRESENT'",
                [session.0],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(present, 1);
    }

    #[test]
    fn test_open_session_is_idempotent() {
        let mut store = store();
        let (c, _) = classroom(&store);

        let (first, created) = store.open_session(c, day(1)).unwrap();
        assert!(created);
        assert_eq!(first.total_absent, 3);

        let (second, created) = store.open_session(c, day(1)).unwrap();
        assert!(!created);
        assert_eq!(second.session.id, first.session.id);
        assert_eq!(store.records(first.session.id).unwrap().len(), 3);
    }

    #[test]
    fn test_separate_dates_get_separate_sessions() {
        let mut store = store();
        let (c, _) = classroom(&store);
        let (a, _) = store.open_session(c, day(1)).unwrap();
        let (b, _) = store.open_session(c, day(2)).unwrap();
        assert_ne!(a.session.id, b.session.id);

        let listed: Vec<NaiveDate> = store.list_sessions(c).unwrap().into_iter().map(|s| s.session.date).collect();
        assert_eq!(listed, vec![day(2), day(1)]);
        assert_eq!(store.session_for_date(c, day(2)).unwrap().unwrap().session.id, b.session.id);
        assert!(store.session_for_date(c, day(3)).unwrap().is_none());
    }

    #[test]
    fn test_open_session_unknown_class() {
        let mut store = store();
        assert!(matches!(
            store.open_session(ClassId(4), day(1)),
            Err(StoreError::NotFound { entity: "class", .. })
        ));
    }

    #[test]
    fn test_rows_only_for_students_enrolled_at_open() {
        let mut store = store();
        let (c, students) = classroom(&store);
        store.unenroll(c, students[2]).unwrap();

        let (summary, _) = store.open_session(c, day(1)).unwrap();
        let late = student(&store, "R-9");
        store.enroll(c, late).unwrap();

        let rows = store.records(summary.session.id).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.status == AttendanceStatus::Absent && r.confidence.is_none()));

        let err = store.apply_match(summary.session.id, late, 0.8).unwrap_err();
        assert!(matches!(err, StoreError::NoSuchOutcome { .. }));
        assert_eq!(store.session(summary.session.id).unwrap().total_enrolled, 3);
    }

    #[test]
    fn test_apply_match_marks_present() {
        let mut store = store();
        let (c, students) = classroom(&store);
        let (summary, _) = store.open_session(c, day(1)).unwrap();
        let id = summary.session.id;

        store.apply_match(id, students[1], 0.82).unwrap();
        assert_eq!(status_of(&store, id, students[1]), (AttendanceStatus::Present, Some(0.82)));
        assert_eq!(status_of(&store, id, students[0]).0, AttendanceStatus::Absent);

        let summary = store.session(id).unwrap();
        assert_eq!((summary.total_present, summary.total_absent), (1, 2));
    }

    #[test]
    fn test_last_write_wins() {
        let mut store = store();
        let (c, students) = classroom(&store);
        let (summary, _) = store.open_session(c, day(1)).unwrap();
        let id = summary.session.id;

        store.apply_match(id, students[0], 0.9).unwrap();
        store.apply_match(id, students[0], 0.7).unwrap();
        assert_eq!(status_of(&store, id, students[0]), (AttendanceStatus::Present, Some(0.7)));
    }

    #[test]
    fn test_closed_session_rejects_matches() {
        let mut store = store();
        let (c, students) = classroom(&store);
        let (summary, _) = store.open_session(c, day(1)).unwrap();
        let id = summary.session.id;
        store.apply_match(id, students[0], 0.6).unwrap();
        let before = store.records(id).unwrap();

        let closed = store.close_session(id).unwrap();
        assert!(!closed.session.active);

        let err = store.apply_match(id, students[1], 0.9).unwrap_err();
        assert!(matches!(err, StoreError::SessionClosed(s) if s == id));
        assert_eq!(store.records(id).unwrap(), before);

        assert!(matches!(store.close_session(id), Err(StoreError::SessionClosed(_))));
    }

    #[test]
    fn test_reopening_same_day_returns_closed_session() {
        let mut store = store();
        let (c, _) = classroom(&store);
        let (summary, _) = store.open_session(c, day(1)).unwrap();
        store.close_session(summary.session.id).unwrap();

        let (again, created) = store.open_session(c, day(1)).unwrap();
        assert!(!created);
        assert!(!again.session.active);
    }

    #[test]
    fn test_unknown_session() {
        let store = store();
        assert!(matches!(store.apply_match(SessionId(9), StudentId(1), 0.9), Err(StoreError::NotFound { .. })));
        assert!(matches!(store.close_session(SessionId(9)), Err(StoreError::NotFound { .. })));
        assert!(matches!(store.records(SessionId(9)), Err(StoreError::NotFound { .. })));
    }

    #[test]
    fn test_delete_record_untracks_student() {
        let mut store = store();
        let (c, students) = classroom(&store);
        let (summary, _) = store.open_session(c, day(4)).unwrap();
        let id = summary.session.id;
        store.apply_match(id, students[0], 0.75).unwrap();

        let row = store.records(id).unwrap().remove(0);
        let deleted = store.delete_record(row.id).unwrap();
        assert_eq!(deleted.record.status, AttendanceStatus::Present);
        assert_eq!(deleted.session_date, day(4));

        assert_eq!(store.records(id).unwrap().len(), 2);
        assert!(matches!(store.apply_match(id, students[0], 0.9), Err(StoreError::NoSuchOutcome { .. })));
        assert!(store.delete_record(row.id).is_err());
    }

    #[test]
    fn test_delete_sessions() {
        let mut store = store();
        let (c, _) = classroom(&store);
        let (a, _) = store.open_session(c, day(1)).unwrap();
        store.open_session(c, day(2)).unwrap();
        store.open_session(c, day(3)).unwrap();

        assert_eq!(store.delete_session(a.session.id).unwrap(), 3);
        assert!(store.delete_session(a.session.id).is_err());

        let removed = store.delete_sessions_for_class(c).unwrap();
        assert_eq!(removed.sessions_deleted, 2);
        assert_eq!(removed.records_deleted, 6);
        assert!(store.list_sessions(c).unwrap().is_empty());
    }

    #[test]
    fn test_student_attendance_history() {
        let mut store = store();
        let (c, students) = classroom(&store);
        let (first, _) = store.open_session(c, day(1)).unwrap();
        store.open_session(c, day(2)).unwrap();
        store.apply_match(first.session.id, students[0], 0.66).unwrap();

        let history = store.student_attendance(students[0]).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].date, day(2));
        assert_eq!(history[0].status, AttendanceStatus::Absent);
        assert_eq!(history[1].status, AttendanceStatus::Present);
        assert_eq!(history[1].confidence, Some(0.66));
    }
}
