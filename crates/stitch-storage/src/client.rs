//! S3 object store implementation.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use aws_types::SdkConfig;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};
use crate::store::{
    content_type_for, local_file_for, local_path_for, validate_key, ObjectStore,
};

/// Region used when none is configured.
pub const DEFAULT_REGION: &str = "ap-south-1";

/// Configuration for the S3 client.
#[derive(Debug, Clone)]
pub struct S3Config {
    pub region: String,
    /// Custom endpoint for S3-compatible stores
    pub endpoint_url: Option<String>,
    /// Static credentials; the default provider chain is used when unset
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

impl S3Config {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            endpoint_url: None,
            access_key_id: None,
            secret_access_key: None,
        }
    }

    /// Create config from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        let region = std::env::var("AWS_REGION")
            .or_else(|_| std::env::var("AWS_DEFAULT_REGION"))
            .unwrap_or_else(|_| DEFAULT_REGION.to_string());
        let non_empty = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());

        let config = Self {
            region,
            endpoint_url: non_empty("S3_ENDPOINT_URL"),
            access_key_id: non_empty("AWS_ACCESS_KEY_ID"),
            secret_access_key: non_empty("AWS_SECRET_ACCESS_KEY"),
        };

        if config.access_key_id.is_some() != config.secret_access_key.is_some() {
            return Err(StorageError::config_error(
                "AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY must be set together",
            ));
        }
        Ok(config)
    }
}

/// S3 storage client. Buckets are chosen per call.
#[derive(Clone)]
pub struct S3Store {
    client: Client,
}

impl S3Store {
    /// Create a new client from configuration.
    pub async fn new(config: S3Config) -> StorageResult<Self> {
        let shared: SdkConfig = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;

        let mut builder = Builder::from(&shared);
        if let (Some(key), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
            builder = builder.credentials_provider(Credentials::new(key, secret, None, None, "env"));
        }
        if let Some(endpoint) = &config.endpoint_url {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
        })
    }

    /// Create from environment variables.
    pub async fn from_env() -> StorageResult<Self> {
        let config = S3Config::from_env()?;
        Self::new(config).await
    }

    async fn download_to(&self, bucket: &str, key: &str, path: &Path) -> StorageResult<u64> {
        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let text = format!("{:?}", e);
                if text.contains("NoSuchKey") {
                    StorageError::not_found(bucket, key)
                } else {
                    StorageError::fetch_failed(format!("{}/{}", bucket, key), e)
                }
            })?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut body = response.body;
        let mut file = tokio::fs::File::create(path).await?;
        let mut written = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk =
                chunk.map_err(|e| StorageError::fetch_failed(format!("{}/{}", bucket, key), e))?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        Ok(written)
    }

    /// List object keys with a prefix.
    pub async fn list_keys(&self, bucket: &str, prefix: &str) -> StorageResult<Vec<String>> {
        debug!(bucket, prefix, "Listing objects");

        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self.client.list_objects_v2().bucket(bucket).prefix(prefix);
            if let Some(token) = continuation_token {
                request = request.continuation_token(token);
            }

            let response = request
                .send()
                .await
                .map_err(|e| StorageError::list_failed(format!("{}/{}", bucket, prefix), e))?;

            keys.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|obj| obj.key().map(str::to_string))
                    .filter(|key| !key.ends_with('/')),
            );

            if response.is_truncated() == Some(true) {
                continuation_token = response.next_continuation_token().map(str::to_string);
            } else {
                break;
            }
        }

        Ok(keys)
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn fetch(&self, bucket: &str, key: &str, dest_dir: &Path) -> StorageResult<PathBuf> {
        validate_key(key)?;
        let path = local_file_for(dest_dir, key);
        let bytes = self.download_to(bucket, key, &path).await?;
        info!(bucket, key, bytes, "Downloaded {}", path.display());
        Ok(path)
    }

    async fn fetch_prefix(
        &self,
        bucket: &str,
        prefix: &str,
        dest_dir: &Path,
    ) -> StorageResult<Vec<PathBuf>> {
        let keys = self.list_keys(bucket, prefix).await?;
        if keys.is_empty() {
            return Err(StorageError::not_found(bucket, prefix));
        }

        let mut paths = Vec::with_capacity(keys.len());
        for key in &keys {
            validate_key(key)?;
            let path = local_path_for(dest_dir, prefix, key);
            self.download_to(bucket, key, &path).await?;
            paths.push(path);
        }
        info!(bucket, prefix, count = paths.len(), "Downloaded prefix");
        Ok(paths)
    }

    async fn publish(&self, bucket: &str, key: &str, local: &Path) -> StorageResult<()> {
        validate_key(key)?;
        debug!("Uploading {} to {}/{}", local.display(), bucket, key);

        let body = ByteStream::from_path(local)
            .await
            .map_err(|e| StorageError::publish_failed(local.display().to_string(), e))?;

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .content_type(content_type_for(local))
            .send()
            .await
            .map_err(|e| StorageError::publish_failed(format!("{}/{}", bucket, key), e))?;

        info!(bucket, key, "Uploaded {}", local.display());
        Ok(())
    }
}
