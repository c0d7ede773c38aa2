//! Error classification shared by every crate in the workspace.
//!
//! Each crate keeps its own `thiserror` enum; all of them map onto one
//! [`ErrorKind`] so callers can tell failures apart without parsing text.

use serde::Serialize;
use std::fmt;

/// Externally visible failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Submitted image is not valid base64 or not a decodable image.
    DecodeError,
    /// No face in a photo that needed one (enrollment only; recognition
    /// treats zero faces as an empty result).
    NoFacesDetected,
    /// More than one face in an enrollment photo.
    MultipleFaces,
    /// Match or end attempted against an ended session.
    SessionClosed,
    /// Student has no outcome row in the session.
    NoSuchOutcome,
    /// Caller lacks the role or ownership the operation needs.
    AuthorizationDenied,
    /// Referenced entity does not exist.
    NotFound,
    /// A request argument (caller, date) could not be parsed.
    InvalidArgument,
    /// Student already holds the maximum number of encodings.
    EncodingLimit,
    /// Encoding has the wrong dimension or non-finite values, or a
    /// stored blob does not decode.
    InvalidEncoding,
    /// Face extractor failed, timed out or produced unusable output.
    Extractor,
    /// Database failure.
    Storage,
    /// Anything else (worker gone, invariant broken).
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::DecodeError => "decode_error",
            ErrorKind::NoFacesDetected => "no_faces_detected",
            ErrorKind::MultipleFaces => "multiple_faces",
            ErrorKind::SessionClosed => "session_closed",
            ErrorKind::NoSuchOutcome => "no_such_outcome",
            ErrorKind::AuthorizationDenied => "authorization_denied",
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::EncodingLimit => "encoding_limit",
            ErrorKind::InvalidEncoding => "invalid_encoding",
            ErrorKind::Extractor => "extractor",
            ErrorKind::Storage => "storage",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
