use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use std::collections::HashMap;

use super::{object_key, ArtifactStore, ObjectMetadata};
use crate::config::StorageConfig;
use crate::utils::format_file_size;
use crate::PipelineError;

/// Artifact store backed by an S3-compatible service such as MinIO
pub struct S3ArtifactStore {
    client: S3Client,
    bucket: String,
    endpoint: String,
}

impl S3ArtifactStore {
    /// Connect to the configured endpoint with static credentials
    pub async fn new(config: &StorageConfig) -> Result<Self> {
        let endpoint = endpoint_url(&config.endpoint, config.secure);
        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "reelsmith-config",
        );

        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .endpoint_url(&endpoint)
            .load()
            .await;

        // MinIO serves buckets under the path, not as virtual hosts
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(true)
            .build();

        Ok(Self {
            client: S3Client::from_conf(s3_config),
            bucket: config.bucket.clone(),
            endpoint,
        })
    }

    /// Create the bucket if it does not exist yet
    pub async fn ensure_bucket(&self) -> Result<()> {
        if self.client.head_bucket().bucket(&self.bucket).send().await.is_ok() {
            return Ok(());
        }

        tracing::info!("Creating bucket: {}", self.bucket);
        self.client
            .create_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .with_context(|| format!("Failed to create bucket {}", self.bucket))?;

        Ok(())
    }
}

/// Prefix a scheme onto a bare `host:port` endpoint
pub fn endpoint_url(endpoint: &str, secure: bool) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.trim_end_matches('/').to_string()
    } else {
        let scheme = if secure { "https" } else { "http" };
        format!("{}://{}", scheme, endpoint.trim_end_matches('/'))
    }
}

#[async_trait]
impl ArtifactStore for S3ArtifactStore {
    async fn exists(&self, folder: &str, filename: &str) -> bool {
        let key = object_key(folder, filename);
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!("head_object {} -> {}", key, e);
                false
            }
        }
    }

    async fn get(&self, folder: &str, filename: &str) -> Result<Vec<u8>> {
        let key = object_key(folder, filename);

        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| {
                let missing = e
                    .as_service_error()
                    .map(|service| service.is_no_such_key())
                    .unwrap_or(false);
                if missing {
                    anyhow::Error::new(PipelineError::NotFound(key.clone()))
                } else {
                    anyhow::Error::new(e).context(format!("Failed to get s3://{}/{}", self.bucket, key))
                }
            })?;

        let data = response
            .body
            .collect()
            .await
            .with_context(|| format!("Failed to read body of {}", key))?
            .into_bytes()
            .to_vec();

        tracing::debug!("Retrieved {} ({})", key, format_file_size(data.len() as u64));
        Ok(data)
    }

    async fn put(
        &self,
        folder: &str,
        filename: &str,
        data: Vec<u8>,
        metadata: &ObjectMetadata,
    ) -> bool {
        let key = object_key(folder, filename);
        let size = data.len() as u64;
        let entries: HashMap<String, String> = metadata
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(data))
            .set_metadata(Some(entries));
        if !metadata.content_type.is_empty() {
            request = request.content_type(&metadata.content_type);
        }

        match request.send().await {
            Ok(_) => {
                tracing::info!("Uploaded {} ({})", key, format_file_size(size));
                true
            }
            Err(e) => {
                tracing::error!("Failed to upload {}: {}", key, e);
                false
            }
        }
    }

    fn describe(&self) -> String {
        format!("{}/{}", self.endpoint, self.bucket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_url() {
        assert_eq!(endpoint_url("localhost:9000", false), "http://localhost:9000");
        assert_eq!(endpoint_url("minio.local", true), "https://minio.local");
        assert_eq!(
            endpoint_url("https://minio.example.com/", false),
            "https://minio.example.com"
        );
    }
}
