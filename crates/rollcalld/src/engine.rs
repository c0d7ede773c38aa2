use crate::extractor::{ExtractorError, FaceExtractor};
use chrono::{DateTime, NaiveDate, Utc};
use rollcall_core::{
    AttendanceRecord, Caller, ClassId, ClassInfo, Encoding, ErrorKind, EuclideanMatcher, Matcher,
    Photo, PhotoError, RecordId, SessionId, SessionSummary, Student, StudentAttendance, StudentId,
    Teacher, TeacherId,
};
use rollcall_store::{DeletedRecord, DeletedSessions, EncodingInfo, Store, StoreError};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Photo(#[from] PhotoError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Extractor(#[from] ExtractorError),
    #[error("{0}")]
    Denied(String),
    #[error("no face found in the photo")]
    NoFacesDetected,
    #[error("{0} faces found; an enrollment photo must show exactly one")]
    MultipleFaces(usize),
    #[error("{0}")]
    InvalidArgument(String),
    #[error("store worker exited")]
    ChannelClosed,
    #[error("failed to start store worker: {0}")]
    Spawn(#[source] std::io::Error),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Photo(_) => ErrorKind::DecodeError,
            EngineError::Store(err) => err.kind(),
            EngineError::Extractor(_) => ErrorKind::Extractor,
            EngineError::Denied(_) => ErrorKind::AuthorizationDenied,
            EngineError::NoFacesDetected => ErrorKind::NoFacesDetected,
            EngineError::MultipleFaces(_) => ErrorKind::MultipleFaces,
            EngineError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            EngineError::ChannelClosed | EngineError::Spawn(_) => ErrorKind::Internal,
        }
    }
}

/// One student marked present by a recognition call.
#[derive(Debug, Clone, Serialize)]
pub struct RecognizedStudent {
    pub student_id: StudentId,
    pub student_name: String,
    pub roll_number: String,
    pub confidence: f64,
}

/// Reply to a recognition request.
#[derive(Debug, Clone, Serialize)]
pub struct RecognitionReport {
    pub session_id: SessionId,
    pub faces_detected: usize,
    pub recognized: Vec<RecognizedStudent>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OpenedSession {
    #[serde(flatten)]
    pub summary: SessionSummary,
    /// False when the session for that class and date already existed.
    pub created: bool,
}

/// A stored face encoding without its vector.
#[derive(Debug, Clone, Serialize)]
pub struct FaceInfo {
    pub id: String,
    pub primary: bool,
    pub created_at: DateTime<Utc>,
}

impl From<EncodingInfo> for FaceInfo {
    fn from(face: EncodingInfo) -> Self {
        Self {
            id: face.id,
            primary: face.primary,
            created_at: face.created_at,
        }
    }
}

type StoreTask = Box<dyn FnOnce(&mut Store) + Send>;

/// Clone-safe handle to the store worker thread.
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::Sender<StoreTask>,
}

impl StoreHandle {
    /// Run `f` on the worker thread and wait for its result.
    pub async fn call<T, F>(&self, f: F) -> Result<T, EngineError>
    where
        F: FnOnce(&mut Store) -> Result<T, EngineError> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let task: StoreTask = Box::new(move |store| {
            let _ = reply_tx.send(f(store));
        });
        self.tx
            .send(task)
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Move the store onto a dedicated OS thread.
///
/// Every database access is queued to this thread, so roster reads and
/// ledger writes never interleave within the daemon.
pub fn spawn_store(store: Store) -> Result<StoreHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<StoreTask>(16);

    std::thread::Builder::new()
        .name("rollcall-store".into())
        .spawn(move || {
            let mut store = store;
            tracing::info!("store thread started");
            while let Some(task) = rx.blocking_recv() {
                task(&mut store);
            }
            tracing::info!("store thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(StoreHandle { tx })
}

fn require_admin(caller: &Caller) -> Result<(), EngineError> {
    if caller.is_admin() {
        Ok(())
    } else {
        Err(EngineError::Denied(format!("{caller} is not an admin")))
    }
}

fn require_student(caller: &Caller) -> Result<StudentId, EngineError> {
    caller
        .student()
        .ok_or_else(|| EngineError::Denied(format!("{caller} is not a student")))
}

fn managed_class(store: &Store, caller: &Caller, class_id: ClassId) -> Result<ClassInfo, EngineError> {
    let class = store.class(class_id)?;
    if caller.can_manage_class(&class) {
        Ok(class)
    } else {
        Err(EngineError::Denied(format!(
            "{caller} does not manage class {class_id}"
        )))
    }
}

fn managed_session(store: &Store, caller: &Caller, session_id: SessionId) -> Result<SessionSummary, EngineError> {
    let summary = store.session(session_id)?;
    managed_class(store, caller, summary.session.class_id)?;
    Ok(summary)
}

/// Match probes against the session roster and apply each match.
///
/// The roster is loaded once. A match for a student without an outcome
/// row (enrolled after the session opened) is skipped; a session that
/// closed meanwhile aborts the batch.
fn record_matches(
    store: &Store,
    matcher: &impl Matcher,
    session_id: SessionId,
    probes: &[Encoding],
) -> Result<Vec<RecognizedStudent>, EngineError> {
    let roster = store.roster_encodings(session_id)?;
    let mut recognized = Vec::new();

    for m in matcher.match_all(probes, &roster) {
        match store.apply_match(session_id, m.student_id, m.confidence) {
            Ok(()) => {}
            Err(StoreError::NoSuchOutcome { .. }) => {
                tracing::warn!(
                    session_id = %session_id,
                    student_id = %m.student_id,
                    probe = m.probe,
                    "matched student has no attendance record; skipping"
                );
                continue;
            }
            Err(err) => return Err(err.into()),
        }
        if let Some(entry) = roster.get(m.student_id) {
            recognized.push(RecognizedStudent {
                student_id: m.student_id,
                student_name: entry.student.name.clone(),
                roll_number: entry.student.roll_number.clone(),
                confidence: m.confidence,
            });
        }
    }
    Ok(recognized)
}

/// Attendance operations, with the caller checked on every call.
#[derive(Clone)]
pub struct Engine {
    store: StoreHandle,
    extractor: Arc<dyn FaceExtractor>,
    matcher: EuclideanMatcher,
}

impl Engine {
    pub fn new(store: StoreHandle, extractor: Arc<dyn FaceExtractor>) -> Self {
        Self {
            store,
            extractor,
            matcher: EuclideanMatcher::new(),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.matcher.threshold()
    }

    /// Decode a class photo, find every face and mark matched students present.
    pub async fn recognize(
        &self,
        caller: Caller,
        session_id: SessionId,
        image: &str,
    ) -> Result<RecognitionReport, EngineError> {
        self.store
            .call(move |store| {
                let summary = managed_session(store, &caller, session_id)?;
                if !summary.session.active {
                    return Err(StoreError::SessionClosed(session_id).into());
                }
                Ok(())
            })
            .await?;

        let photo = Photo::from_base64(image)?;
        let probes = self.extractor.extract(&photo).await?;
        let faces_detected = probes.len();
        if probes.is_empty() {
            tracing::info!(session_id = %session_id, "no faces detected");
            return Ok(RecognitionReport {
                session_id,
                faces_detected,
                recognized: Vec::new(),
                message: "No faces detected in the image".to_string(),
            });
        }

        let matcher = self.matcher;
        let recognized = self
            .store
            .call(move |store| record_matches(store, &matcher, session_id, &probes))
            .await?;

        tracing::info!(
            session_id = %session_id,
            faces = faces_detected,
            recognized = recognized.len(),
            "recognition complete"
        );
        Ok(RecognitionReport {
            session_id,
            faces_detected,
            message: format!(
                "Recognized {} of {} detected face(s)",
                recognized.len(),
                faces_detected
            ),
            recognized,
        })
    }

    pub async fn open_session(
        &self,
        caller: Caller,
        class_id: ClassId,
        date: NaiveDate,
    ) -> Result<OpenedSession, EngineError> {
        self.store
            .call(move |store| {
                managed_class(store, &caller, class_id)?;
                let (summary, created) = store.open_session(class_id, date)?;
                Ok(OpenedSession { summary, created })
            })
            .await
    }

    pub async fn session(&self, caller: Caller, session_id: SessionId) -> Result<SessionSummary, EngineError> {
        self.store
            .call(move |store| managed_session(store, &caller, session_id))
            .await
    }

    pub async fn find_session(
        &self,
        caller: Caller,
        class_id: ClassId,
        date: NaiveDate,
    ) -> Result<Option<SessionSummary>, EngineError> {
        self.store
            .call(move |store| {
                managed_class(store, &caller, class_id)?;
                Ok(store.session_for_date(class_id, date)?)
            })
            .await
    }

    pub async fn end_session(&self, caller: Caller, session_id: SessionId) -> Result<SessionSummary, EngineError> {
        self.store
            .call(move |store| {
                managed_session(store, &caller, session_id)?;
                Ok(store.close_session(session_id)?)
            })
            .await
    }

    pub async fn list_sessions(&self, caller: Caller, class_id: ClassId) -> Result<Vec<SessionSummary>, EngineError> {
        self.store
            .call(move |store| {
                managed_class(store, &caller, class_id)?;
                Ok(store.list_sessions(class_id)?)
            })
            .await
    }

    pub async fn records(&self, caller: Caller, session_id: SessionId) -> Result<Vec<AttendanceRecord>, EngineError> {
        self.store
            .call(move |store| {
                managed_session(store, &caller, session_id)?;
                Ok(store.records(session_id)?)
            })
            .await
    }

    /// Delete a session; returns how many outcome rows went with it.
    pub async fn delete_session(&self, caller: Caller, session_id: SessionId) -> Result<usize, EngineError> {
        self.store
            .call(move |store| {
                managed_session(store, &caller, session_id)?;
                Ok(store.delete_session(session_id)?)
            })
            .await
    }

    pub async fn delete_all_sessions(&self, caller: Caller, class_id: ClassId) -> Result<DeletedSessions, EngineError> {
        self.store
            .call(move |store| {
                managed_class(store, &caller, class_id)?;
                Ok(store.delete_sessions_for_class(class_id)?)
            })
            .await
    }

    pub async fn delete_record(&self, caller: Caller, record_id: RecordId) -> Result<DeletedRecord, EngineError> {
        self.store
            .call(move |store| {
                let record = store.record(record_id)?;
                managed_session(store, &caller, record.session_id)?;
                Ok(store.delete_record(record_id)?)
            })
            .await
    }

    /// Store the single face in `image` as a reference encoding of the calling student.
    pub async fn enroll_face(&self, caller: Caller, image: &str, primary: bool) -> Result<FaceInfo, EngineError> {
        let student_id = require_student(&caller)?;
        let photo = Photo::from_base64(image)?;
        let mut faces = self.extractor.extract(&photo).await?;
        let encoding = match faces.len() {
            0 => return Err(EngineError::NoFacesDetected),
            1 => faces.remove(0),
            n => return Err(EngineError::MultipleFaces(n)),
        };

        self.store
            .call(move |store| {
                let face = store.add_encoding(student_id, &encoding, primary)?;
                Ok(EncodingInfo::from(face).into())
            })
            .await
    }

    pub async fn list_faces(&self, caller: Caller) -> Result<Vec<FaceInfo>, EngineError> {
        let student_id = require_student(&caller)?;
        self.store
            .call(move |store| {
                let faces = store.list_encoding_info(student_id)?;
                Ok(faces.into_iter().map(FaceInfo::from).collect())
            })
            .await
    }

    pub async fn remove_face(&self, caller: Caller, encoding_id: String) -> Result<(), EngineError> {
        let student_id = require_student(&caller)?;
        self.store
            .call(move |store| Ok(store.remove_encoding(student_id, &encoding_id)?))
            .await
    }

    pub async fn set_primary_face(&self, caller: Caller, encoding_id: String) -> Result<(), EngineError> {
        let student_id = require_student(&caller)?;
        self.store
            .call(move |store| Ok(store.set_primary(student_id, &encoding_id)?))
            .await
    }

    pub async fn my_attendance(&self, caller: Caller) -> Result<Vec<StudentAttendance>, EngineError> {
        let student_id = require_student(&caller)?;
        self.store
            .call(move |store| Ok(store.student_attendance(student_id)?))
            .await
    }

    /// Classes taught by the calling teacher.
    pub async fn my_classes(&self, caller: Caller) -> Result<Vec<ClassInfo>, EngineError> {
        let Caller::Teacher(teacher_id) = caller else {
            return Err(EngineError::Denied(format!("{caller} is not a teacher")));
        };
        self.store
            .call(move |store| Ok(store.classes_for_teacher(teacher_id)?))
            .await
    }

    pub async fn add_teacher(
        &self,
        caller: Caller,
        name: String,
        employee_id: String,
        department: String,
    ) -> Result<Teacher, EngineError> {
        require_admin(&caller)?;
        self.store
            .call(move |store| Ok(store.add_teacher(&name, &employee_id, &department)?))
            .await
    }

    pub async fn add_student(
        &self,
        caller: Caller,
        name: String,
        roll_number: String,
        department: String,
        semester: u32,
        batch: String,
    ) -> Result<Student, EngineError> {
        require_admin(&caller)?;
        self.store
            .call(move |store| Ok(store.add_student(&name, &roll_number, &department, semester, &batch)?))
            .await
    }

    pub async fn list_students(&self, caller: Caller) -> Result<Vec<Student>, EngineError> {
        require_admin(&caller)?;
        self.store.call(|store| Ok(store.students()?)).await
    }

    /// Admins create classes for any teacher; a teacher only for themselves.
    pub async fn add_class(
        &self,
        caller: Caller,
        course_name: String,
        course_code: String,
        section: String,
        teacher_id: TeacherId,
    ) -> Result<ClassInfo, EngineError> {
        match caller {
            Caller::Admin => {}
            Caller::Teacher(id) if id == teacher_id => {}
            _ => {
                return Err(EngineError::Denied(format!(
                    "{caller} may not create classes for teacher {teacher_id}"
                )))
            }
        }
        self.store
            .call(move |store| Ok(store.add_class(&course_name, &course_code, &section, teacher_id)?))
            .await
    }

    pub async fn enroll(&self, caller: Caller, class_id: ClassId, student_id: StudentId) -> Result<(), EngineError> {
        require_admin(&caller)?;
        self.store
            .call(move |store| Ok(store.enroll(class_id, student_id)?))
            .await
    }

    pub async fn unenroll(&self, caller: Caller, class_id: ClassId, student_id: StudentId) -> Result<(), EngineError> {
        require_admin(&caller)?;
        self.store
            .call(move |store| Ok(store.unenroll(class_id, student_id)?))
            .await
    }

    pub async fn list_enrollments(&self, caller: Caller, class_id: ClassId) -> Result<Vec<Student>, EngineError> {
        self.store
            .call(move |store| {
                managed_class(store, &caller, class_id)?;
                Ok(store.enrolled_students(class_id)?)
            })
            .await
    }
}
