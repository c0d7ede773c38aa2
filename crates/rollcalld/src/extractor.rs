//! Face extraction boundary.
//!
//! Detection and encoding are done by an external model. The daemon only
//! sees image bytes going in and one encoding per detected face coming out.

use async_trait::async_trait;
use rollcall_core::{Encoding, EncodingError, Photo, ENCODING_DIM};
use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

#[derive(Error, Debug)]
pub enum ExtractorError {
    #[error("failed to start extractor '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("extractor i/o: {0}")]
    Io(#[from] io::Error),
    #[error("extractor timed out after {0:?}")]
    Timeout(Duration),
    #[error("extractor exited with {status}: {stderr}")]
    Failed { status: ExitStatus, stderr: String },
    #[error("extractor output is not a list of encodings: {0}")]
    Output(#[from] serde_json::Error),
    #[error("extractor face {index}: {source}")]
    Encoding {
        index: usize,
        #[source]
        source: EncodingError,
    },
}

/// Produces one encoding per face found in a photo.
#[async_trait]
pub trait FaceExtractor: Send + Sync {
    /// Encodings in detection order. An empty list means no faces.
    async fn extract(&self, photo: &Photo) -> Result<Vec<Encoding>, ExtractorError>;
}

/// Runs a helper program per photo.
///
/// The raw image bytes are written to the program's stdin; it must print
/// a JSON array of number arrays (one per face) to stdout and exit 0.
/// The process is killed when the timeout elapses.
#[derive(Debug, Clone)]
pub struct CommandExtractor {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    dim: usize,
}

impl CommandExtractor {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
            dim: ENCODING_DIM,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn run(&self, image: Vec<u8>) -> Result<Vec<u8>, ExtractorError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExtractorError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let stdin = child.stdin.take();
        let feed = async move {
            let Some(mut stdin) = stdin else {
                return Ok(());
            };
            stdin.write_all(&image).await?;
            stdin.shutdown().await
        };

        let (fed, output) = tokio::join!(feed, child.wait_with_output());
        let output = output?;
        match fed {
            // The helper may exit without reading all of its input.
            Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {
                tracing::debug!("extractor closed stdin early");
            }
            other => other?,
        }

        if !output.status.success() {
            return Err(ExtractorError::Failed {
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output.stdout)
    }
}

#[async_trait]
impl FaceExtractor for CommandExtractor {
    async fn extract(&self, photo: &Photo) -> Result<Vec<Encoding>, ExtractorError> {
        let started = Instant::now();
        let stdout = tokio::time::timeout(self.timeout, self.run(photo.bytes().to_vec()))
            .await
            .map_err(|_| {
                tracing::warn!(program = %self.program, timeout = ?self.timeout, "extractor timed out; killed");
                ExtractorError::Timeout(self.timeout)
            })??;

        let faces: Vec<Vec<f64>> = serde_json::from_slice(&stdout)?;
        let encodings = faces
            .into_iter()
            .enumerate()
            .map(|(index, values)| {
                let encoding = Encoding::new(values);
                encoding
                    .validate(self.dim)
                    .map(|()| encoding)
                    .map_err(|source| ExtractorError::Encoding { index, source })
            })
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(
            program = %self.program,
            faces = encodings.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "faces extracted"
        );
        Ok(encodings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, RgbImage};
    use std::io::Cursor;

    fn photo() -> Photo {
        let img = DynamicImage::ImageRgb8(RgbImage::new(8, 8));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        Photo::from_bytes(buf.into_inner()).unwrap()
    }

    fn shell(script: &str) -> CommandExtractor {
        CommandExtractor::new(
            "sh",
            vec!["-c".to_string(), script.to_string()],
            Duration::from_secs(5),
        )
    }

    fn shell_dim(script: &str, dim: usize) -> CommandExtractor {
        CommandExtractor { dim, ..shell(script) }
    }

    #[tokio::test]
    async fn test_parses_one_encoding_per_face() {
        let extractor = shell_dim("cat >/dev/null; echo '[[0.1,0.2,0.3],[0.4,0.5,0.6]]'", 3);
        let faces = extractor.extract(&photo()).await.unwrap();
        assert_eq!(faces.len(), 2);
        assert_eq!(faces[1].values(), &[0.4, 0.5, 0.6]);
    }

    #[tokio::test]
    async fn test_no_faces() {
        let extractor = shell("cat >/dev/null; echo '[]'");
        assert!(extractor.extract(&photo()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_receives_image_bytes() {
        let photo = photo();
        let extractor = shell_dim("n=$(wc -c); echo \"[[$n]]\"", 1);
        let faces = extractor.extract(&photo).await.unwrap();
        assert_eq!(faces[0].values(), &[photo.bytes().len() as f64]);
    }

    #[tokio::test]
    async fn test_wrong_dimension_rejected() {
        let extractor = shell("cat >/dev/null; echo '[[0.1,0.2,0.3]]'");
        let err = extractor.extract(&photo()).await.unwrap_err();
        assert!(matches!(
            err,
            ExtractorError::Encoding {
                index: 0,
                source: EncodingError::WrongDimension { .. }
            }
        ));
    }

    #[tokio::test]
    async fn test_nonzero_exit() {
        let extractor = shell("cat >/dev/null; echo 'model missing' >&2; exit 3");
        match extractor.extract(&photo()).await {
            Err(ExtractorError::Failed { status, stderr }) => {
                assert_eq!(status.code(), Some(3));
                assert_eq!(stderr, "model missing");
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_garbage_output() {
        let extractor = shell("cat >/dev/null; echo 'faces: 2'");
        assert!(matches!(extractor.extract(&photo()).await, Err(ExtractorError::Output(_))));
    }

    #[tokio::test]
    async fn test_timeout_kills_helper() {
        let extractor = CommandExtractor::new(
            "sh",
            vec!["-c".to_string(), "sleep 5".to_string()],
            Duration::from_millis(200),
        );
        let started = Instant::now();
        let err = extractor.extract(&photo()).await.unwrap_err();
        assert!(matches!(err, ExtractorError::Timeout(_)));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let extractor = CommandExtractor::new("/nonexistent/rollcall-extract", vec![], Duration::from_secs(1));
        assert!(matches!(extractor.extract(&photo()).await, Err(ExtractorError::Spawn { .. })));
    }
}
