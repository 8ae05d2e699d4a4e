//! S3-backed [`ArtifactUploader`].
//!
//! Credentials and region come from the standard AWS environment chain
//! (`AWS_ACCESS_KEY_ID`, `AWS_PROFILE`, instance metadata, ...).

use std::path::Path;

use async_trait::async_trait;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;

use crate::{collect_files, object_key, ArtifactUploader, CloudError};

pub struct S3Uploader {
    client: aws_sdk_s3::Client,
    bucket: String,
    prefix: String,
}

impl S3Uploader {
    /// Build an uploader from the ambient AWS configuration.
    pub async fn from_env(bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        let config = aws_config::load_from_env().await;
        Self::new(aws_sdk_s3::Client::new(&config), bucket, prefix)
    }

    pub fn new(
        client: aws_sdk_s3::Client,
        bucket: impl Into<String>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            prefix: prefix.into(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl ArtifactUploader for S3Uploader {
    async fn upload_dir(&self, local_dir: &Path) -> Result<usize, CloudError> {
        let files = collect_files(local_dir).await?;

        for file in &files {
            let key = object_key(&self.prefix, local_dir, file);
            let body = ByteStream::from_path(file)
                .await
                .map_err(|e| CloudError::Read {
                    path: file.clone(),
                    reason: e.to_string(),
                })?;

            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(&key)
                .body(body)
                .send()
                .await
                .map_err(|e| CloudError::Upload {
                    key: key.clone(),
                    reason: DisplayErrorContext(&e).to_string(),
                })?;

            tracing::debug!(bucket = %self.bucket, key = %key, "Uploaded render artifact");
        }

        tracing::info!(
            bucket = %self.bucket,
            dir = %local_dir.display(),
            objects = files.len(),
            "Uploaded rendered views",
        );
        Ok(files.len())
    }
}
