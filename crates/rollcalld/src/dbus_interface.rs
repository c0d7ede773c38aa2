use crate::config::{BusKind, Config};
use crate::engine::{Engine, EngineError};
use chrono::{Local, NaiveDate};
use rollcall_core::{Caller, ClassId, ErrorKind, RecordId, SessionId, StudentId, TeacherId};
use serde::Serialize;
use zbus::interface;

pub const BUS_NAME: &str = "org.rollcall.Rollcall1";
pub const OBJECT_PATH: &str = "/org/rollcall/Rollcall1";

/// Map an engine failure onto a D-Bus error whose message starts with
/// the error kind.
fn to_fdo(err: EngineError) -> zbus::fdo::Error {
    let kind = err.kind();
    let message = format!("{kind}: {err}");
    match kind {
        ErrorKind::AuthorizationDenied => zbus::fdo::Error::AccessDenied(message),
        ErrorKind::DecodeError
        | ErrorKind::NoFacesDetected
        | ErrorKind::MultipleFaces
        | ErrorKind::InvalidArgument
        | ErrorKind::InvalidEncoding => zbus::fdo::Error::InvalidArgs(message),
        ErrorKind::Storage | ErrorKind::Internal => {
            tracing::error!(error = %err, "request failed");
            zbus::fdo::Error::Failed(message)
        }
        _ => zbus::fdo::Error::Failed(message),
    }
}

fn to_json<T: Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(format!("internal: {e}")))
}

fn reply<T: Serialize>(result: Result<T, EngineError>) -> zbus::fdo::Result<String> {
    to_json(&result.map_err(to_fdo)?)
}

fn parse_caller(raw: &str) -> Result<Caller, EngineError> {
    raw.parse()
        .map_err(|e: rollcall_core::CallerError| EngineError::InvalidArgument(e.to_string()))
}

/// Empty means today, in local time.
fn parse_date(raw: &str) -> Result<NaiveDate, EngineError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Local::now().date_naive());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| EngineError::InvalidArgument(format!("date '{raw}' is not YYYY-MM-DD: {e}")))
}

/// D-Bus interface for the Rollcall attendance daemon.
///
/// Bus name: org.rollcall.Rollcall1
/// Object path: /org/rollcall/Rollcall1
///
/// Every method takes the caller (`admin`, `teacher:<id>`, `student:<id>`)
/// first and replies with a JSON string.
pub struct RollcallService {
    engine: Engine,
    config: Config,
}

impl RollcallService {
    pub fn new(engine: Engine, config: Config) -> Self {
        Self { engine, config }
    }
}

#[interface(name = "org.rollcall.Rollcall1")]
impl RollcallService {
    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "database": self.config.db_path.display().to_string(),
            "extractor": self.config.extractor_program,
            "extractor_timeout_secs": self.config.extractor_timeout_secs,
            "bus": match self.config.bus {
                BusKind::System => "system",
                BusKind::Session => "session",
            },
            "match_threshold": self.engine.threshold(),
        })
        .to_string())
    }

    /// Mark every recognized student in a classroom photo present.
    async fn recognize(&self, caller: &str, session_id: i64, image: &str) -> zbus::fdo::Result<String> {
        let caller = parse_caller(caller).map_err(to_fdo)?;
        tracing::info!(%caller, session_id, image_len = image.len(), "recognize requested");
        reply(self.engine.recognize(caller, SessionId(session_id), image).await)
    }

    async fn open_session(&self, caller: &str, class_id: i64, date: &str) -> zbus::fdo::Result<String> {
        let caller = parse_caller(caller).map_err(to_fdo)?;
        let date = parse_date(date).map_err(to_fdo)?;
        tracing::info!(%caller, class_id, %date, "open_session requested");
        reply(self.engine.open_session(caller, ClassId(class_id), date).await)
    }

    async fn get_session(&self, caller: &str, session_id: i64) -> zbus::fdo::Result<String> {
        let caller = parse_caller(caller).map_err(to_fdo)?;
        reply(self.engine.session(caller, SessionId(session_id)).await)
    }

    /// The session of a class on a date, or `null`.
    async fn find_session(&self, caller: &str, class_id: i64, date: &str) -> zbus::fdo::Result<String> {
        let caller = parse_caller(caller).map_err(to_fdo)?;
        let date = parse_date(date).map_err(to_fdo)?;
        reply(self.engine.find_session(caller, ClassId(class_id), date).await)
    }

    async fn end_session(&self, caller: &str, session_id: i64) -> zbus::fdo::Result<String> {
        let caller = parse_caller(caller).map_err(to_fdo)?;
        tracing::info!(%caller, session_id, "end_session requested");
        reply(self.engine.end_session(caller, SessionId(session_id)).await)
    }

    async fn list_sessions(&self, caller: &str, class_id: i64) -> zbus::fdo::Result<String> {
        let caller = parse_caller(caller).map_err(to_fdo)?;
        reply(self.engine.list_sessions(caller, ClassId(class_id)).await)
    }

    async fn records(&self, caller: &str, session_id: i64) -> zbus::fdo::Result<String> {
        let caller = parse_caller(caller).map_err(to_fdo)?;
        reply(self.engine.records(caller, SessionId(session_id)).await)
    }

    async fn delete_session(&self, caller: &str, session_id: i64) -> zbus::fdo::Result<String> {
        let caller = parse_caller(caller).map_err(to_fdo)?;
        tracing::info!(%caller, session_id, "delete_session requested");
        let records_deleted = self
            .engine
            .delete_session(caller, SessionId(session_id))
            .await
            .map_err(to_fdo)?;
        Ok(serde_json::json!({
            "session_id": session_id,
            "records_deleted": records_deleted,
        })
        .to_string())
    }

    async fn delete_all_sessions(&self, caller: &str, class_id: i64) -> zbus::fdo::Result<String> {
        let caller = parse_caller(caller).map_err(to_fdo)?;
        tracing::info!(%caller, class_id, "delete_all_sessions requested");
        reply(self.engine.delete_all_sessions(caller, ClassId(class_id)).await)
    }

    async fn delete_record(&self, caller: &str, record_id: i64) -> zbus::fdo::Result<String> {
        let caller = parse_caller(caller).map_err(to_fdo)?;
        tracing::info!(%caller, record_id, "delete_record requested");
        reply(self.engine.delete_record(caller, RecordId(record_id)).await)
    }

    /// Add a reference encoding from a photo showing only the calling student.
    async fn enroll_face(&self, caller: &str, image: &str, primary: bool) -> zbus::fdo::Result<String> {
        let caller = parse_caller(caller).map_err(to_fdo)?;
        tracing::info!(%caller, primary, "enroll_face requested");
        reply(self.engine.enroll_face(caller, image, primary).await)
    }

    async fn list_faces(&self, caller: &str) -> zbus::fdo::Result<String> {
        let caller = parse_caller(caller).map_err(to_fdo)?;
        reply(self.engine.list_faces(caller).await)
    }

    async fn remove_face(&self, caller: &str, encoding_id: &str) -> zbus::fdo::Result<bool> {
        let caller = parse_caller(caller).map_err(to_fdo)?;
        tracing::info!(%caller, encoding_id, "remove_face requested");
        self.engine
            .remove_face(caller, encoding_id.to_string())
            .await
            .map_err(to_fdo)?;
        Ok(true)
    }

    async fn set_primary_face(&self, caller: &str, encoding_id: &str) -> zbus::fdo::Result<bool> {
        let caller = parse_caller(caller).map_err(to_fdo)?;
        self.engine
            .set_primary_face(caller, encoding_id.to_string())
            .await
            .map_err(to_fdo)?;
        Ok(true)
    }

    async fn my_attendance(&self, caller: &str) -> zbus::fdo::Result<String> {
        let caller = parse_caller(caller).map_err(to_fdo)?;
        reply(self.engine.my_attendance(caller).await)
    }

    async fn my_classes(&self, caller: &str) -> zbus::fdo::Result<String> {
        let caller = parse_caller(caller).map_err(to_fdo)?;
        reply(self.engine.my_classes(caller).await)
    }

    async fn add_teacher(
        &self,
        caller: &str,
        name: &str,
        employee_id: &str,
        department: &str,
    ) -> zbus::fdo::Result<String> {
        let caller = parse_caller(caller).map_err(to_fdo)?;
        reply(
            self.engine
                .add_teacher(caller, name.into(), employee_id.into(), department.into())
                .await,
        )
    }

    async fn add_student(
        &self,
        caller: &str,
        name: &str,
        roll_number: &str,
        department: &str,
        semester: u32,
        batch: &str,
    ) -> zbus::fdo::Result<String> {
        let caller = parse_caller(caller).map_err(to_fdo)?;
        reply(
            self.engine
                .add_student(
                    caller,
                    name.into(),
                    roll_number.into(),
                    department.into(),
                    semester,
                    batch.into(),
                )
                .await,
        )
    }

    async fn list_students(&self, caller: &str) -> zbus::fdo::Result<String> {
        let caller = parse_caller(caller).map_err(to_fdo)?;
        reply(self.engine.list_students(caller).await)
    }

    async fn add_class(
        &self,
        caller: &str,
        course_name: &str,
        course_code: &str,
        section: &str,
        teacher_id: i64,
    ) -> zbus::fdo::Result<String> {
        let caller = parse_caller(caller).map_err(to_fdo)?;
        reply(
            self.engine
                .add_class(
                    caller,
                    course_name.into(),
                    course_code.into(),
                    section.into(),
                    TeacherId(teacher_id),
                )
                .await,
        )
    }

    async fn enroll(&self, caller: &str, class_id: i64, student_id: i64) -> zbus::fdo::Result<bool> {
        let caller = parse_caller(caller).map_err(to_fdo)?;
        self.engine
            .enroll(caller, ClassId(class_id), StudentId(student_id))
            .await
            .map_err(to_fdo)?;
        Ok(true)
    }

    async fn unenroll(&self, caller: &str, class_id: i64, student_id: i64) -> zbus::fdo::Result<bool> {
        let caller = parse_caller(caller).map_err(to_fdo)?;
        self.engine
            .unenroll(caller, ClassId(class_id), StudentId(student_id))
            .await
            .map_err(to_fdo)?;
        Ok(true)
    }

    async fn list_enrollments(&self, caller: &str, class_id: i64) -> zbus::fdo::Result<String> {
        let caller = parse_caller(caller).map_err(to_fdo)?;
        reply(self.engine.list_enrollments(caller, ClassId(class_id)).await)
    }
}
