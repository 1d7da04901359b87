use async_trait::async_trait;
use aws_sdk_s3 as s3;
use s3::presigning::PresigningConfig;
use std::sync::Arc;
use std::time::Duration;

/// Lifetime of a signed download link.
pub const DOWNLOAD_URL_TTL: Duration = Duration::from_secs(600);

/// StorageService
///
/// Object storage as far as downloads are concerned: turning a stored object
/// key into a short-lived signed URL the client fetches directly.
#[async_trait]
pub trait StorageService: Send + Sync {
    /// Ensures the configured bucket exists. Only called for `Env::Local`.
    async fn ensure_bucket_exists(&self);

    async fn get_presigned_download_url(&self, key: &str) -> Result<String, String>;
}

/// StorageState
///
/// The type shared through the application state.
pub type StorageState = Arc<dyn StorageService>;

/// S3StorageClient
///
/// S3-compatible client (MinIO locally, a managed bucket in production).
/// Path-style addressing is forced because MinIO requires it.
#[derive(Clone)]
pub struct S3StorageClient {
    client: s3::Client,
    bucket_name: String,
}

impl S3StorageClient {
    pub fn new(
        endpoint: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
        bucket: &str,
    ) -> Self {
        let credentials =
            s3::config::Credentials::new(access_key, secret_key, None, None, "static");

        let config = s3::Config::builder()
            .credentials_provider(credentials)
            .endpoint_url(endpoint)
            .region(s3::config::Region::new(region.to_string()))
            .behavior_version_latest()
            .force_path_style(true)
            .build();

        Self {
            client: s3::Client::from_conf(config),
            bucket_name: bucket.to_string(),
        }
    }
}

#[async_trait]
impl StorageService for S3StorageClient {
    async fn ensure_bucket_exists(&self) {
        if let Err(e) = self
            .client
            .create_bucket()
            .bucket(&self.bucket_name)
            .send()
            .await
        {
            tracing::debug!("create_bucket: {:?}", e);
        }
    }

    async fn get_presigned_download_url(&self, key: &str) -> Result<String, String> {
        let presigning = PresigningConfig::expires_in(DOWNLOAD_URL_TTL).map_err(|e| e.to_string())?;

        let presigned_req = self
            .client
            .get_object()
            .bucket(&self.bucket_name)
            .key(sanitize_key(key))
            .presigned(presigning)
            .await
            .map_err(|e| e.to_string())?;

        Ok(presigned_req.uri().to_string())
    }
}

/// sanitize_key
///
/// Drops empty, `.` and `..` segments so a stored key can never walk out of
/// the bucket prefix.
pub fn sanitize_key(key: &str) -> String {
    key.split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".." && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// MockStorageService
///
/// Deterministic signer for tests.
#[derive(Clone, Default)]
pub struct MockStorageService {
    /// When true, every signing request fails.
    pub should_fail: bool,
}

impl MockStorageService {
    pub fn new() -> Self {
        Self { should_fail: false }
    }

    pub fn new_failing() -> Self {
        Self { should_fail: true }
    }
}

#[async_trait]
impl StorageService for MockStorageService {
    async fn ensure_bucket_exists(&self) {}

    async fn get_presigned_download_url(&self, key: &str) -> Result<String, String> {
        if self.should_fail {
            return Err("Mock Storage Error: Simulation requested".to_string());
        }

        Ok(format!(
            "http://localhost:9000/mock-bucket/{}?X-Amz-Expires={}&signature=fake",
            sanitize_key(key),
            DOWNLOAD_URL_TTL.as_secs()
        ))
    }
}
