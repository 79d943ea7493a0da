use std::io::Cursor;
use std::path::PathBuf;

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use reqwest::Client;
use uuid::Uuid;

/// Fetch one remote image and re-encode it into a local artifact.
///
/// Implementations do not retry; the job worker owns the retry policy.
#[async_trait]
pub trait ImageTransform: Send + Sync {
    /// Returns the path of the written artifact.
    async fn transform(&self, source_locator: &str) -> Result<String, TransformError>;

    /// Remove an artifact written by an earlier `transform` call.
    async fn discard(&self, artifact_path: &str);
}

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("Failed to fetch image: {0}")]
    Fetch(String),

    #[error("Payload is not a decodable image: {0}")]
    Decode(String),

    #[error("Failed to re-encode image: {0}")]
    Encode(String),
}

impl From<reqwest::Error> for TransformError {
    fn from(e: reqwest::Error) -> Self {
        Self::Fetch(e.to_string())
    }
}

/// Downloads images over HTTP and stores them as JPEG at a fixed quality.
pub struct HttpImageTransform {
    http: Client,
    output_dir: PathBuf,
    quality: u8,
}

impl HttpImageTransform {
    pub fn new(output_dir: impl Into<PathBuf>, quality: u8) -> Self {
        Self {
            http: Client::new(),
            output_dir: output_dir.into(),
            quality,
        }
    }
}

/// Decode arbitrary image bytes and re-encode them as RGB JPEG.
pub fn reencode_jpeg(bytes: &[u8], quality: u8) -> Result<Vec<u8>, TransformError> {
    let decoded =
        image::load_from_memory(bytes).map_err(|e| TransformError::Decode(e.to_string()))?;
    let rgb = decoded.to_rgb8();

    let mut out = Cursor::new(Vec::new());
    let mut encoder = JpegEncoder::new_with_quality(&mut out, quality);
    encoder
        .encode_image(&rgb)
        .map_err(|e| TransformError::Encode(e.to_string()))?;
    Ok(out.into_inner())
}

#[async_trait]
impl ImageTransform for HttpImageTransform {
    async fn transform(&self, source_locator: &str) -> Result<String, TransformError> {
        let response = self
            .http
            .get(source_locator)
            .send()
            .await?
            .error_for_status()?;
        let bytes = response.bytes().await?;

        tracing::debug!(locator = %source_locator, size = bytes.len(), "Fetched image");

        let quality = self.quality;
        let encoded = tokio::task::spawn_blocking(move || reencode_jpeg(&bytes, quality))
            .await
            .map_err(|e| TransformError::Encode(format!("encoder task failed: {}", e)))??;

        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| TransformError::Encode(e.to_string()))?;
        let path = self.output_dir.join(format!("{}.jpg", Uuid::new_v4()));
        tokio::fs::write(&path, &encoded)
            .await
            .map_err(|e| TransformError::Encode(e.to_string()))?;

        Ok(path.to_string_lossy().into_owned())
    }

    async fn discard(&self, artifact_path: &str) {
        if let Err(e) = tokio::fs::remove_file(artifact_path).await {
            tracing::warn!(path = %artifact_path, error = %e, "Failed to remove partial artifact");
        }
    }
}
