//! Submitted photo decoding.
//!
//! Photos arrive as base64 text. They are decoded and fully parsed here,
//! before any extractor or database work, so a bad upload is rejected
//! without side effects.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::ImageFormat;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PhotoError {
    #[error("image data is empty")]
    Empty,
    #[error("invalid base64 image data: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("unrecognized image format")]
    UnknownFormat,
    #[error("image could not be decoded: {0}")]
    Image(#[from] image::ImageError),
}

/// A validated, decodable photo.
#[derive(Debug, Clone)]
pub struct Photo {
    bytes: Vec<u8>,
    format: ImageFormat,
    width: u32,
    height: u32,
}

impl Photo {
    /// Decode base64 text (optionally a `data:` URI) into a photo.
    pub fn from_base64(data: &str) -> Result<Self, PhotoError> {
        let payload = match data.trim().split_once(";base64,") {
            Some((prefix, rest)) if prefix.starts_with("data:") => rest,
            _ => data,
        };
        let compact: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        if compact.is_empty() {
            return Err(PhotoError::Empty);
        }
        let bytes = STANDARD.decode(compact.as_bytes())?;
        Self::from_bytes(bytes)
    }

    /// Validate raw image bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, PhotoError> {
        if bytes.is_empty() {
            return Err(PhotoError::Empty);
        }
        let format = image::guess_format(&bytes).map_err(|_| PhotoError::UnknownFormat)?;
        let decoded = image::load_from_memory_with_format(&bytes, format)?;

        tracing::debug!(
            ?format,
            width = decoded.width(),
            height = decoded.height(),
            size = bytes.len(),
            "photo decoded"
        );

        Ok(Self {
            width: decoded.width(),
            height: decoded.height(),
            bytes,
            format,
        })
    }

    /// The original encoded bytes, as handed to the extractor.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}
