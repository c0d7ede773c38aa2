//! Typed row identifiers.
//!
//! Every entity is keyed by an SQLite rowid. Wrapping them keeps a
//! student id from being passed where a class id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(raw: i64) -> Self {
                Self(raw)
            }
        }
    };
}

row_id!(
    /// Identifier of a teacher profile.
    TeacherId
);
row_id!(
    /// Identifier of a student profile.
    StudentId
);
row_id!(
    /// Identifier of a class (a course section taught by one teacher).
    ClassId
);
row_id!(
    /// Identifier of an attendance session (one class on one date).
    SessionId
);
row_id!(
    /// Identifier of one attendance outcome row.
    RecordId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_serialize_as_plain_integers() {
        let json = serde_json::to_string(&StudentId(42)).unwrap();
        assert_eq!(json, "42");
        let back: SessionId = serde_json::from_str("7").unwrap();
        assert_eq!(back, SessionId(7));
    }

    #[test]
    fn test_ids_order_numerically() {
        assert!(StudentId(2) < StudentId(10));
        assert_eq!(ClassId(3).to_string(), "3");
    }
}
