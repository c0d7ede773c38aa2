//! Reference face encodings per student, and the per-session roster.
//!
//! Invariants: at most [`MAX_ENCODINGS_PER_STUDENT`] encodings per
//! student, and exactly one primary whenever any exist.

use crate::error::{Result, StoreError};
use crate::roster::{student_from_row, STUDENT_COLUMNS};
use crate::Store;
use chrono::{DateTime, Utc};
use rollcall_core::{
    Encoding, FaceEncoding, Roster, SessionId, StudentId, ENCODING_DIM, MAX_ENCODINGS_PER_STUDENT,
};
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;

/// A stored encoding's metadata. Readable even when the vector is not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncodingInfo {
    pub id: String,
    pub student_id: StudentId,
    pub primary: bool,
    pub created_at: DateTime<Utc>,
}

impl From<FaceEncoding> for EncodingInfo {
    fn from(face: FaceEncoding) -> Self {
        Self {
            id: face.id,
            student_id: face.student_id,
            primary: face.primary,
            created_at: face.created_at,
        }
    }
}

fn encoding_info_from_row(row: &Row<'_>) -> rusqlite::Result<EncodingInfo> {
    Ok(EncodingInfo {
        id: row.get(0)?,
        student_id: StudentId(row.get(1)?),
        primary: row.get(2)?,
        created_at: row.get(3)?,
    })
}

impl Store {
    /// Store a new reference encoding for `student_id`.
    ///
    /// The student's first encoding is always primary. Asking for
    /// `primary` clears the flag on the others.
    pub fn add_encoding(
        &mut self,
        student_id: StudentId,
        encoding: &Encoding,
        primary: bool,
    ) -> Result<FaceEncoding> {
        encoding.validate(ENCODING_DIM)?;

        let tx = self.conn.transaction()?;
        let exists: bool = tx.query_row(
            "SELECT EXISTS (SELECT 1 FROM students WHERE id = ?1)",
            params![student_id.0],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(StoreError::not_found("student", student_id));
        }

        let count: i64 = tx.query_row(
            "SELECT COUNT(*) FROM face_encodings WHERE student_id = ?1",
            params![student_id.0],
            |row| row.get(0),
        )?;
        let count = usize::try_from(count).unwrap_or(usize::MAX);
        if count >= MAX_ENCODINGS_PER_STUDENT {
            return Err(StoreError::EncodingLimit(student_id));
        }

        let primary = primary || count == 0;
        if primary {
            tx.execute(
                "UPDATE face_encodings SET is_primary = 0 WHERE student_id = ?1",
                params![student_id.0],
            )?;
        }

        let record = FaceEncoding {
            id: uuid::Uuid::new_v4().to_string(),
            student_id,
            primary,
            encoding: encoding.clone(),
            created_at: Utc::now(),
        };
        tx.execute(
            "INSERT INTO face_encodings (id, student_id, encoding, is_primary, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.id,
                student_id.0,
                encoding.to_bytes(),
                primary,
                record.created_at
            ],
        )?;
        tx.commit()?;

        tracing::info!(
            student_id = %student_id,
            encoding_id = %record.id,
            primary,
            stored = count + 1,
            "face encoding stored"
        );
        Ok(record)
    }

    /// A student's encodings without their vectors, primary first, then
    /// newest first. Rows whose blob no longer decodes are still listed.
    pub fn list_encoding_info(&self, student_id: StudentId) -> Result<Vec<EncodingInfo>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, student_id, is_primary, created_at
             FROM face_encodings WHERE student_id = ?1
             ORDER BY is_primary DESC, created_at DESC, rowid DESC",
        )?;
        let rows = stmt.query_map(params![student_id.0], encoding_info_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// A student's decoded encodings, in [`Store::list_encoding_info`]
    /// order. A stored blob that fails to decode is skipped with a warning.
    pub fn list_encodings(&self, student_id: StudentId) -> Result<Vec<FaceEncoding>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, student_id, is_primary, created_at, encoding
             FROM face_encodings WHERE student_id = ?1
             ORDER BY is_primary DESC, created_at DESC, rowid DESC",
        )?;
        let mut rows = stmt.query(params![student_id.0])?;

        let mut faces = Vec::new();
        while let Some(row) = rows.next()? {
            let info = encoding_info_from_row(row)?;
            let blob: Vec<u8> = row.get(4)?;
            match Encoding::from_bytes(&blob) {
                Ok(encoding) => faces.push(FaceEncoding {
                    id: info.id,
                    student_id: info.student_id,
                    encoding,
                    primary: info.primary,
                    created_at: info.created_at,
                }),
                Err(err) => tracing::warn!(
                    student_id = %student_id,
                    encoding_id = %info.id,
                    error = %err,
                    "skipping malformed stored encoding"
                ),
            }
        }
        Ok(faces)
    }

    /// Make `encoding_id` the student's only primary encoding.
    pub fn set_primary(&mut self, student_id: StudentId, encoding_id: &str) -> Result<()> {
        let tx = self.conn.transaction()?;
        let owned: bool = tx.query_row(
            "SELECT EXISTS (SELECT 1 FROM face_encodings WHERE id = ?1 AND student_id = ?2)",
            params![encoding_id, student_id.0],
            |row| row.get(0),
        )?;
        if !owned {
            return Err(StoreError::not_found("face encoding", encoding_id));
        }
        tx.execute(
            "UPDATE face_encodings SET is_primary = (id = ?1) WHERE student_id = ?2",
            params![encoding_id, student_id.0],
        )?;
        tx.commit()?;
        tracing::info!(student_id = %student_id, encoding_id, "primary encoding changed");
        Ok(())
    }

    /// Delete one encoding. Removing the primary promotes the oldest
    /// remaining encoding.
    pub fn remove_encoding(&mut self, student_id: StudentId, encoding_id: &str) -> Result<()> {
        let tx = self.conn.transaction()?;
        let was_primary: bool = tx
            .query_row(
                "SELECT is_primary FROM face_encodings WHERE id = ?1 AND student_id = ?2",
                params![encoding_id, student_id.0],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found("face encoding", encoding_id))?;

        tx.execute(
            "DELETE FROM face_encodings WHERE id = ?1",
            params![encoding_id],
        )?;
        if was_primary {
            tx.execute(
                "UPDATE face_encodings SET is_primary = 1
                 WHERE id = (SELECT id FROM face_encodings WHERE student_id = ?1
                             ORDER BY created_at ASC, rowid ASC LIMIT 1)",
                params![student_id.0],
            )?;
        }
        tx.commit()?;
        tracing::info!(student_id = %student_id, encoding_id, was_primary, "face encoding removed");
        Ok(())
    }

    /// Every stored encoding of every student actively enrolled in the
    /// session's class.
    ///
    /// Students without encodings are not in the result. A stored blob
    /// that fails to decode is skipped with a warning.
    pub fn roster_encodings(&self, session_id: SessionId) -> Result<Roster> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM attendance_sessions WHERE id = ?1)",
            params![session_id.0],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(StoreError::not_found("attendance session", session_id));
        }

        let mut stmt = self.conn.prepare(&format!(
            "SELECT {STUDENT_COLUMNS}, fe.id, fe.encoding
             FROM attendance_sessions s
             JOIN enrollments e ON e.class_id = s.class_id AND e.is_active = 1
             JOIN students st ON st.id = e.student_id
             JOIN face_encodings fe ON fe.student_id = st.id
             WHERE s.id = ?1
             ORDER BY st.id, fe.created_at, fe.rowid"
        ))?;
        let mut rows = stmt.query(params![session_id.0])?;

        let mut roster = Roster::new();
        let mut skipped = 0usize;
        while let Some(row) = rows.next()? {
            let student = student_from_row(row, 0)?;
            let encoding_id: String = row.get(6)?;
            let blob: Vec<u8> = row.get(7)?;

            let decoded = Encoding::from_bytes(&blob)
                .and_then(|enc| enc.validate(ENCODING_DIM).map(|()| enc));
            match decoded {
                Ok(encoding) => roster.push(&student, encoding),
                Err(err) => {
                    skipped += 1;
                    tracing::warn!(
                        student_id = %student.id,
                        encoding_id = %encoding_id,
                        error = %err,
                        "skipping malformed stored encoding"
                    );
                }
            }
        }

        tracing::debug!(
            session_id = %session_id,
            students = roster.len(),
            encodings = roster.encoding_count(),
            skipped,
            "roster loaded"
        );
        Ok(roster)
    }
}

#[cfg(test)]
mod tests {
    use super::EncodingInfo;
    use crate::testutil::*;
    use crate::StoreError;
    use chrono::NaiveDate;
    use rollcall_core::{Encoding, StudentId, ENCODING_DIM};
    use rusqlite::params;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
    }

    #[test]
    fn test_first_encoding_is_primary() {
        let mut store = store();
        let s = student(&store, "R-1");
        let first = store.add_encoding(s, &encoding(0.1), false).unwrap();
        assert!(first.primary);
        let second = store.add_encoding(s, &encoding(0.2), false).unwrap();
        assert!(!second.primary);
    }

    #[test]
    fn test_limit_of_three() {
        let mut store = store();
        let s = student(&store, "R-1");
        for i in 0..3 {
            store.add_encoding(s, &encoding(i as f64), false).unwrap();
        }
        let err = store.add_encoding(s, &encoding(9.0), false).unwrap_err();
        assert!(matches!(err, StoreError::EncodingLimit(id) if id == s));
        assert_eq!(store.list_encodings(s).unwrap().len(), 3);
    }

    #[test]
    fn test_rejects_wrong_dimension() {
        let mut store = store();
        let s = student(&store, "R-1");
        let err = store
            .add_encoding(s, &Encoding::new(vec![0.0; 3]), false)
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidEncoding(_)));
    }

    #[test]
    fn test_unknown_student() {
        let mut store = store();
        let err = store.add_encoding(StudentId(3), &encoding(0.0), false).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { entity: "student", .. }));
    }

    #[test]
    fn test_exactly_one_primary() {
        let mut store = store();
        let s = student(&store, "R-1");
        store.add_encoding(s, &encoding(0.1), false).unwrap();
        let b = store.add_encoding(s, &encoding(0.2), true).unwrap();
        let c = store.add_encoding(s, &encoding(0.3), false).unwrap();

        let primaries: Vec<String> = store
            .list_encodings(s)
            .unwrap()
            .into_iter()
            .filter(|e| e.primary)
            .map(|e| e.id)
            .collect();
        assert_eq!(primaries, vec![b.id.clone()]);

        store.set_primary(s, &c.id).unwrap();
        let listed = store.list_encodings(s).unwrap();
        assert_eq!(listed[0].id, c.id);
        assert_eq!(listed.iter().filter(|e| e.primary).count(), 1);
    }

    #[test]
    fn test_removing_primary_promotes_oldest() {
        let mut store = store();
        let s = student(&store, "R-1");
        let a = store.add_encoding(s, &encoding(0.1), false).unwrap();
        let b = store.add_encoding(s, &encoding(0.2), false).unwrap();
        let c = store.add_encoding(s, &encoding(0.3), false).unwrap();

        store.remove_encoding(s, &a.id).unwrap();
        let listed = store.list_encodings(s).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, b.id);
        assert!(listed[0].primary);
        assert!(!listed.iter().any(|e| e.id == c.id && e.primary));

        store.remove_encoding(s, &b.id).unwrap();
        store.remove_encoding(s, &c.id).unwrap();
        assert!(store.list_encodings(s).unwrap().is_empty());
    }

    #[test]
    fn test_encoding_ownership_is_checked() {
        let mut store = store();
        let owner = student(&store, "R-1");
        let other = student(&store, "R-2");
        let e = store.add_encoding(owner, &encoding(0.1), false).unwrap();
        assert!(store.set_primary(other, &e.id).is_err());
        assert!(store.remove_encoding(other, &e.id).is_err());
        assert_eq!(store.list_encodings(owner).unwrap().len(), 1);
    }

    #[test]
    fn test_stored_encoding_is_bit_identical() {
        let mut store = store();
        let s = student(&store, "R-1");
        let values: Vec<f64> = (0..ENCODING_DIM).map(|i| (i as f64).sin() / 3.0).collect();
        let original = Encoding::new(values);
        store.add_encoding(s, &original, false).unwrap();

        let loaded = store.list_encodings(s).unwrap().remove(0).encoding;
        let a: Vec<u64> = original.values().iter().map(|v| v.to_bits()).collect();
        let b: Vec<u64> = loaded.values().iter().map(|v| v.to_bits()).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_roster_only_active_students_with_encodings() {
        let mut store = store();
        let t = teacher(&store, "E-1");
        let c = class(&store, t);
        let with_faces = student(&store, "R-1");
        let no_faces = student(&store, "R-2");
        let dropped = student(&store, "R-3");
        let elsewhere = student(&store, "R-4");
        for s in [with_faces, no_faces, dropped] {
            store.enroll(c, s).unwrap();
        }
        store.add_encoding(with_faces, &encoding(0.1), false).unwrap();
        store.add_encoding(with_faces, &encoding(0.2), false).unwrap();
        store.add_encoding(dropped, &encoding(0.3), false).unwrap();
        store.add_encoding(elsewhere, &encoding(0.4), false).unwrap();

        let (summary, _) = store.open_session(c, date()).unwrap();
        store.unenroll(c, dropped).unwrap();

        let roster = store.roster_encodings(summary.session.id).unwrap();
        assert_eq!(roster.len(), 1);
        let entry = roster.get(with_faces).unwrap();
        assert_eq!(entry.encodings.len(), 2);
        assert!(roster.get(no_faces).is_none());
        assert!(roster.get(dropped).is_none());
    }

    #[test]
    fn test_roster_skips_malformed_blob() {
        let mut store = store();
        let t = teacher(&store, "E-1");
        let c = class(&store, t);
        let s = student(&store, "R-1");
        store.enroll(c, s).unwrap();
        store.add_encoding(s, &encoding(0.1), false).unwrap();
        let bad = store.add_encoding(s, &encoding(0.2), false).unwrap();
        store
            .conn
            .execute(
                "UPDATE face_encodings SET encoding = ?1 WHERE id = ?2",
                params![vec![1u8, 2, 3], bad.id],
            )
            .unwrap();

        let (summary, _) = store.open_session(c, date()).unwrap();
        let roster = store.roster_encodings(summary.session.id).unwrap();
        assert_eq!(roster.get(s).unwrap().encodings.len(), 1);
    }

    #[test]
    fn test_malformed_blob_stays_listed_and_removable() {
        let mut store = store();
        let s = student(&store, "R-1");
        let good = store.add_encoding(s, &encoding(0.1), false).unwrap();
        let bad = store.add_encoding(s, &encoding(0.2), false).unwrap();
        store.add_encoding(s, &encoding(0.3), false).unwrap();
        store
            .conn
            .execute(
                "UPDATE face_encodings SET encoding = ?1 WHERE id = ?2",
                params![vec![1u8, 2, 3], bad.id],
            )
            .unwrap();

        let decoded = store.list_encodings(s).unwrap();
        assert_eq!(decoded.len(), 2);
        assert!(decoded.iter().all(|e| e.id != bad.id));
        assert!(decoded.iter().any(|e| e.id == good.id));

        let info = store.list_encoding_info(s).unwrap();
        assert_eq!(info.len(), 3);
        assert!(info.iter().any(|e| e.id == bad.id));

        // At the limit until the broken row is cleared.
        assert!(matches!(
            store.add_encoding(s, &encoding(0.4), false),
            Err(StoreError::EncodingLimit(_))
        ));
        store.remove_encoding(s, &bad.id).unwrap();
        store.add_encoding(s, &encoding(0.4), false).unwrap();
        assert_eq!(store.list_encoding_info(s).unwrap().len(), 3);
        assert_eq!(store.list_encodings(s).unwrap().len(), 3);
    }

    #[test]
    fn test_encoding_info_matches_stored_rows() {
        let mut store = store();
        let s = student(&store, "R-1");
        let a = store.add_encoding(s, &encoding(0.1), false).unwrap();
        let b = store.add_encoding(s, &encoding(0.2), true).unwrap();

        let info = store.list_encoding_info(s).unwrap();
        assert_eq!(info[0].id, EncodingInfo::from(b).id);
        assert!(info[0].primary);
        assert_eq!(info[1].id, a.id);
        assert!(!info[1].primary);
    }

    #[test]
    fn test_roster_unknown_session() {
        let store = store();
        assert!(matches!(
            store.roster_encodings(rollcall_core::SessionId(1)),
            Err(StoreError::NotFound { .. })
        ));
    }
}
