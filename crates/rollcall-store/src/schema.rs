//! Versioned schema migrations, tracked in `PRAGMA user_version`.

use crate::error::{Result, StoreError};
use rusqlite::{Connection, Transaction};

const CURRENT_SCHEMA_VERSION: i32 = 1;

const SCHEMA_V1: &str = "
CREATE TABLE teachers (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT NOT NULL,
    employee_id TEXT NOT NULL UNIQUE,
    department  TEXT NOT NULL
);

CREATE TABLE students (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT NOT NULL,
    roll_number TEXT NOT NULL UNIQUE,
    department  TEXT NOT NULL,
    semester    INTEGER NOT NULL,
    batch       TEXT NOT NULL
);

CREATE TABLE classes (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    course_name TEXT NOT NULL,
    course_code TEXT NOT NULL,
    section     TEXT NOT NULL,
    teacher_id  INTEGER NOT NULL REFERENCES teachers(id) ON DELETE CASCADE
);

CREATE TABLE enrollments (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    class_id    INTEGER NOT NULL REFERENCES classes(id) ON DELETE CASCADE,
    student_id  INTEGER NOT NULL REFERENCES students(id) ON DELETE CASCADE,
    is_active   INTEGER NOT NULL DEFAULT 1,
    enrolled_at TEXT NOT NULL,
    UNIQUE (class_id, student_id)
);

CREATE TABLE face_encodings (
    id          TEXT PRIMARY KEY,
    student_id  INTEGER NOT NULL REFERENCES students(id) ON DELETE CASCADE,
    encoding    BLOB NOT NULL,
    is_primary  INTEGER NOT NULL DEFAULT 0,
    created_at  TEXT NOT NULL
);
CREATE INDEX idx_face_encodings_student ON face_encodings(student_id);

CREATE TABLE attendance_sessions (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    class_id    INTEGER NOT NULL REFERENCES classes(id) ON DELETE CASCADE,
    date        TEXT NOT NULL,
    is_active   INTEGER NOT NULL DEFAULT 1,
    created_at  TEXT NOT NULL,
    UNIQUE (class_id, date)
);

CREATE TABLE attendance_records (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id  INTEGER NOT NULL REFERENCES attendance_sessions(id) ON DELETE CASCADE,
    student_id  INTEGER NOT NULL REFERENCES students(id) ON DELETE CASCADE,
    status      TEXT NOT NULL DEFAULT 'ABSENT' CHECK (status IN ('PRESENT', 'ABSENT')),
    confidence  REAL,
    marked_at   TEXT NOT NULL,
    UNIQUE (session_id, student_id)
);
CREATE INDEX idx_attendance_records_student ON attendance_records(student_id);
";

pub(crate) fn run_migrations(conn: &mut Connection) -> Result<()> {
    let mut version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if version > CURRENT_SCHEMA_VERSION {
        return Err(StoreError::Schema(format!(
            "database version ({version}) is newer than supported schema ({CURRENT_SCHEMA_VERSION})"
        )));
    }
    if version == CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn.transaction()?;
    while version < CURRENT_SCHEMA_VERSION {
        let next = version + 1;
        apply_migration(&tx, next)?;
        tracing::info!(version = next, "applied schema migration");
        version = next;
    }
    tx.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)?;
    tx.commit()?;

    Ok(())
}

fn apply_migration(tx: &Transaction<'_>, version: i32) -> Result<()> {
    match version {
        1 => tx.execute_batch(SCHEMA_V1)?,
        other => {
            return Err(StoreError::Schema(format!("no migration for version {other}")));
        }
    }
    Ok(())
}
