//! AWS S3 storage backend.
//!
//! Uploads go to a single bucket under the key the upload handler derives;
//! read access is handed out as SigV4 presigned GET URLs produced by the
//! SDK.  Credentials come from the explicit [`AwsStorageConfig`] values,
//! never from ambient process state.

use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use base64::Engine;
use md5::{Digest, Md5};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

use super::backend::{StorageBackend, StorageError, StorageFuture};
use crate::config::AwsStorageConfig;

/// Backend that stores objects in an AWS S3 bucket.
#[derive(Clone)]
pub struct AwsBackend {
    /// AWS S3 SDK client.
    client: Client,
    /// Bucket all keys live in.
    bucket: String,
}

impl AwsBackend {
    /// Build the S3 client from explicit configuration.
    ///
    /// Region and static credentials are taken from `settings`; a custom
    /// endpoint (MinIO, LocalStack) is honoured when set.
    pub async fn new(settings: &AwsStorageConfig) -> anyhow::Result<Self> {
        let creds = aws_sdk_s3::config::Credentials::new(
            &settings.access_key_id,
            &settings.secret_access_key,
            None, // session_token
            None, // expiry
            "picvault-config",
        );

        let mut config_loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(settings.region.clone()))
            .credentials_provider(creds);

        if !settings.endpoint_url.is_empty() {
            config_loader = config_loader.endpoint_url(&settings.endpoint_url);
        }

        let sdk_config = config_loader.load().await;

        let s3_config_builder = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(settings.use_path_style);

        let client = Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %settings.bucket,
            region = %settings.region,
            "AWS storage backend initialized"
        );

        Ok(Self {
            client,
            bucket: settings.bucket.clone(),
        })
    }

    /// A backend sharing this client but addressing another bucket.
    pub fn with_bucket(&self, bucket: &str) -> Self {
        Self {
            client: self.client.clone(),
            bucket: bucket.to_string(),
        }
    }

    /// Base64 MD5 digest of the file at `path`, sent as `Content-MD5`.
    ///
    /// The file is hashed in fixed-size chunks.
    async fn file_md5(path: &Path) -> std::io::Result<String> {
        let mut file = tokio::fs::File::open(path).await?;
        let mut hasher = Md5::new();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(base64::engine::general_purpose::STANDARD.encode(hasher.finalize()))
    }

    /// Map an AWS SDK error to a backend error with context.
    fn map_sdk_error(context: &str, err: impl std::fmt::Display) -> StorageError {
        StorageError::Backend(anyhow::anyhow!("AWS S3 {context}: {err}"))
    }

    async fn head(&self, storage_key: &str) -> Result<bool, StorageError> {
        debug!(bucket = %self.bucket, key = %storage_key, "AWS head_object");

        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(storage_key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                let service_err = e.into_service_error();
                if service_err.is_not_found() {
                    Ok(false)
                } else {
                    Err(Self::map_sdk_error("head_object", service_err))
                }
            }
        }
    }
}

impl StorageBackend for AwsBackend {
    fn put(&self, storage_key: &str, source: &Path, content_type: &str) -> StorageFuture<'_, ()> {
        let storage_key = storage_key.to_string();
        let source: PathBuf = source.to_path_buf();
        let content_type = content_type.to_string();
        Box::pin(async move {
            debug!(
                bucket = %self.bucket,
                key = %storage_key,
                content_type = %content_type,
                source = %source.display(),
                "AWS put_object"
            );

            let md5 = Self::file_md5(&source).await.map_err(|e| {
                Self::map_sdk_error(&format!("hash {}", source.display()), e)
            })?;
            let body = ByteStream::from_path(&source).await.map_err(|e| {
                Self::map_sdk_error(&format!("read {}", source.display()), e)
            })?;

            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(&storage_key)
                .content_type(&content_type)
                .content_md5(md5)
                .body(body)
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("put_object", DisplayErrorContext(e)))?;

            Ok(())
        })
    }

    fn presign_get(&self, storage_key: &str, expires_in: Duration) -> StorageFuture<'_, String> {
        let storage_key = storage_key.to_string();
        Box::pin(async move {
            // Presigning is offline; probe first so a vanished object is
            // reported as NotFound instead of a URL that 404s later.
            if !self.head(&storage_key).await? {
                return Err(StorageError::NotFound { key: storage_key });
            }

            let presigning = PresigningConfig::expires_in(expires_in)
                .map_err(|e| Self::map_sdk_error("presigning config", e))?;

            let request = self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(&storage_key)
                .presigned(presigning)
                .await
                .map_err(|e| Self::map_sdk_error("presign get_object", DisplayErrorContext(e)))?;

            debug!(bucket = %self.bucket, key = %storage_key, "AWS presigned get_object");
            Ok(request.uri().to_string())
        })
    }

    fn delete(&self, storage_key: &str) -> StorageFuture<'_, ()> {
        let storage_key = storage_key.to_string();
        Box::pin(async move {
            debug!(bucket = %self.bucket, key = %storage_key, "AWS delete_object");

            // S3 delete_object is idempotent -- no error for missing keys.
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(&storage_key)
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("delete_object", DisplayErrorContext(e)))?;

            Ok(())
        })
    }

    fn exists(&self, storage_key: &str) -> StorageFuture<'_, bool> {
        let storage_key = storage_key.to_string();
        Box::pin(async move { self.head(&storage_key).await })
    }

    fn probe(&self) -> StorageFuture<'_, ()> {
        Box::pin(async move {
            self.client
                .head_bucket()
                .bucket(&self.bucket)
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("head_bucket", DisplayErrorContext(e)))?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn md5_of(data: &[u8]) -> String {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), data).unwrap();
        AwsBackend::file_md5(file.path()).await.unwrap()
    }

    #[tokio::test]
    async fn test_file_md5_empty() {
        // MD5("") = d41d8cd98f00b204e9800998ecf8427e
        assert_eq!(md5_of(b"").await, "1B2M2Y8AsgTpgAmY7PhCfg==");
    }

    #[tokio::test]
    async fn test_file_md5_hello() {
        // MD5("hello world") = 5eb63bbbe01eeed093cb22bb8f5acdc3
        assert_eq!(md5_of(b"hello world").await, "XrY7u+Ae7tCTyyK7j1rNww==");
    }

    #[tokio::test]
    async fn test_file_md5_spans_chunks() {
        let data = vec![b'x'; 200 * 1024];
        let mut hasher = Md5::new();
        hasher.update(&data);
        let expected = base64::engine::general_purpose::STANDARD.encode(hasher.finalize());
        assert_eq!(md5_of(&data).await, expected);
    }

    #[tokio::test]
    async fn test_file_md5_missing_file() {
        assert!(AwsBackend::file_md5(Path::new("/nonexistent/upload-x"))
            .await
            .is_err());
    }

    #[test]
    fn test_map_sdk_error_keeps_context() {
        let err = AwsBackend::map_sdk_error("put_object", "AccessDenied");
        assert!(matches!(err, StorageError::Backend(_)));
        assert_eq!(err.to_string(), "AWS S3 put_object: AccessDenied");
    }
}
