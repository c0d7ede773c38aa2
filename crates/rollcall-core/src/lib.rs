//! rollcall-core — Face matching engine for classroom attendance.
//!
//! Holds the encoding type and its byte codec, the per-session roster,
//! the Euclidean matcher, photo decoding and the caller/error vocabulary
//! shared by the store and the daemon.

pub mod caller;
pub mod encoding;
pub mod error;
pub mod ids;
pub mod matcher;
pub mod photo;
pub mod roster;
pub mod types;

pub use caller::{Caller, CallerError};
pub use encoding::{Encoding, EncodingError, ENCODING_DIM};
pub use error::ErrorKind;
pub use ids::{ClassId, RecordId, SessionId, StudentId, TeacherId};
pub use matcher::{EuclideanMatcher, Matcher, ProbeMatch, MATCH_THRESHOLD};
pub use photo::{Photo, PhotoError};
pub use roster::{Roster, RosterEntry};
pub use types::{
    AttendanceRecord, AttendanceStatus, ClassInfo, ClassSession, FaceEncoding, SessionSummary,
    Student, StudentAttendance, Teacher,
};

/// Maximum number of reference encodings a student may keep.
pub const MAX_ENCODINGS_PER_STUDENT: usize = 3;
