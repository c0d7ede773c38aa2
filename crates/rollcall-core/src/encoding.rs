//! Face encoding vectors and their byte representation.
//!
//! Encodings are 128-dimensional `f64` vectors produced by the external
//! extractor. At rest they are the little-endian IEEE-754 bytes of each
//! component, concatenated, so decoding recovers every bit.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Dimension of every encoding the extractor produces.
pub const ENCODING_DIM: usize = 128;

const COMPONENT_BYTES: usize = std::mem::size_of::<f64>();

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EncodingError {
    #[error("encoding has {actual} dimensions, expected {expected}")]
    WrongDimension { expected: usize, actual: usize },
    #[error("encoding component {0} is not finite")]
    NonFinite(usize),
    #[error("encoded length {0} is not a multiple of 8 bytes")]
    TruncatedBytes(usize),
    #[error("encoding is empty")]
    Empty,
}

/// A face encoding (one point in the encoder's feature space).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Encoding {
    values: Vec<f64>,
}

impl Encoding {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Check the vector against the extractor contract: exactly `dim`
    /// components, all finite.
    pub fn validate(&self, dim: usize) -> Result<(), EncodingError> {
        if self.values.len() != dim {
            return Err(EncodingError::WrongDimension {
                expected: dim,
                actual: self.values.len(),
            });
        }
        match self.values.iter().position(|v| !v.is_finite()) {
            Some(idx) => Err(EncodingError::NonFinite(idx)),
            None => Ok(()),
        }
    }

    /// Euclidean (L2) distance. Lower = more similar.
    ///
    /// Callers must compare encodings of equal dimension; extra
    /// components on the longer side are ignored.
    pub fn euclidean_distance(&self, other: &Encoding) -> f64 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f64>()
            .sqrt()
    }

    /// Serialize to little-endian `f64` bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.values.len() * COMPONENT_BYTES);
        for v in &self.values {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }

    /// Inverse of [`to_bytes`](Self::to_bytes).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EncodingError> {
        if bytes.is_empty() {
            return Err(EncodingError::Empty);
        }
        if bytes.len() % COMPONENT_BYTES != 0 {
            return Err(EncodingError::TruncatedBytes(bytes.len()));
        }
        let values = bytes
            .chunks_exact(COMPONENT_BYTES)
            .map(|chunk| {
                let mut raw = [0u8; COMPONENT_BYTES];
                raw.copy_from_slice(chunk);
                f64::from_le_bytes(raw)
            })
            .collect();
        Ok(Self { values })
    }
}

impl From<Vec<f64>> for Encoding {
    fn from(values: Vec<f64>) -> Self {
        Self::new(values)
    }
}
