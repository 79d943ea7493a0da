use async_trait::async_trait;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::{Bucket, Region};
use uuid::Uuid;

use crate::services::report::{ReportError, ReportStore};

const REPORT_PREFIX: &str = "reports";

/// Batch reports kept in an S3-compatible bucket (Cloudflare R2 or similar).
pub struct R2ReportStore {
    bucket: Box<Bucket>,
}

impl R2ReportStore {
    pub fn new(
        bucket_name: &str,
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: "auto".to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials =
            Credentials::new(Some(access_key), Some(secret_key), None, None, None)
                .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        Ok(Self { bucket })
    }

    fn key(batch_id: Uuid) -> String {
        format!("{}/{}_output.csv", REPORT_PREFIX, batch_id)
    }
}

#[async_trait]
impl ReportStore for R2ReportStore {
    fn location(&self, batch_id: Uuid) -> String {
        format!("s3://{}/{}", self.bucket.name(), Self::key(batch_id))
    }

    async fn write(&self, batch_id: Uuid, contents: &[u8]) -> Result<String, ReportError> {
        let response = self
            .bucket
            .put_object_with_content_type(Self::key(batch_id), contents, "text/csv")
            .await
            .map_err(StorageError::S3)?;
        if !(200..300).contains(&response.status_code()) {
            return Err(StorageError::Status(response.status_code()).into());
        }
        Ok(self.location(batch_id))
    }

    async fn read(&self, batch_id: Uuid) -> Result<Option<Vec<u8>>, ReportError> {
        match self.bucket.get_object(Self::key(batch_id)).await {
            Ok(response) if response.status_code() == 404 => Ok(None),
            Ok(response) if (200..300).contains(&response.status_code()) => {
                Ok(Some(response.to_vec()))
            }
            Ok(response) => Err(StorageError::Status(response.status_code()).into()),
            Err(S3Error::HttpFailWithBody(404, _)) => Ok(None),
            Err(e) => Err(StorageError::S3(e).into()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] S3Error),

    #[error("S3 request returned status {0}")]
    Status(u16),

    #[error("Storage configuration error: {0}")]
    Config(String),
}
