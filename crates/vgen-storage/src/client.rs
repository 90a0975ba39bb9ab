//! R2 client implementation.

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use futures_util::StreamExt;
use metrics::{counter, histogram};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, info_span, Instrument};
use url::Url;

use crate::error::{StorageError, StorageResult};
use crate::object_store::ObjectStore;

/// Configuration for R2 client.
#[derive(Debug, Clone)]
pub struct R2Config {
    /// R2 endpoint URL (S3 API endpoint)
    pub endpoint_url: String,
    /// Access key ID
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
    /// Bucket name
    pub bucket_name: String,
    /// Region (usually "auto" for R2)
    pub region: String,
    /// Public base URL objects are served from
    pub public_url: String,
    /// Timeout for fetching source media
    pub download_timeout: Duration,
}

impl R2Config {
    /// Create config from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        Ok(Self {
            endpoint_url: std::env::var("R2_ENDPOINT_URL")
                .map_err(|_| StorageError::config_error("R2_ENDPOINT_URL not set"))?,
            access_key_id: std::env::var("R2_ACCESS_KEY_ID")
                .map_err(|_| StorageError::config_error("R2_ACCESS_KEY_ID not set"))?,
            secret_access_key: std::env::var("R2_SECRET_ACCESS_KEY")
                .map_err(|_| StorageError::config_error("R2_SECRET_ACCESS_KEY not set"))?,
            bucket_name: std::env::var("R2_BUCKET_NAME")
                .map_err(|_| StorageError::config_error("R2_BUCKET_NAME not set"))?,
            region: std::env::var("R2_REGION").unwrap_or_else(|_| "auto".to_string()),
            public_url: std::env::var("R2_PUBLIC_URL")
                .map_err(|_| StorageError::config_error("R2_PUBLIC_URL not set"))?,
            download_timeout: Duration::from_secs(
                std::env::var("R2_DOWNLOAD_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(300),
            ),
        })
    }
}

/// Cloudflare R2 storage client.
#[derive(Clone)]
pub struct R2Client {
    client: Client,
    http: reqwest::Client,
    bucket: String,
    public_url: String,
}

impl R2Client {
    /// Create a new R2 client from configuration.
    pub fn new(config: R2Config) -> StorageResult<Self> {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "r2",
        );

        let sdk_config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint_url)
            .region(Region::new(config.region))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        let http = reqwest::Client::builder()
            .timeout(config.download_timeout)
            .build()
            .map_err(|e| StorageError::config_error(e.to_string()))?;

        Ok(Self {
            client: Client::from_conf(sdk_config),
            http,
            bucket: config.bucket_name,
            public_url: config.public_url.trim_end_matches('/').to_string(),
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        Self::new(R2Config::from_env()?)
    }

    /// Public URL for a key.
    pub fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_url, key.trim_start_matches('/'))
    }

    /// Upload a file to R2.
    pub async fn upload_file(
        &self,
        path: impl AsRef<Path>,
        key: &str,
        content_type: &str,
    ) -> StorageResult<()> {
        let path = path.as_ref();
        debug!("Uploading {} to {}", path.display(), key);

        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        info!("Uploaded {} to {}", path.display(), key);
        Ok(())
    }

    /// Upload bytes to R2.
    pub async fn upload_bytes(
        &self,
        data: Vec<u8>,
        key: &str,
        content_type: &str,
    ) -> StorageResult<()> {
        debug!("Uploading {} bytes to {}", data.len(), key);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        Ok(())
    }

    /// Stream `source_url` into a temporary file. The file is removed when
    /// the returned handle drops.
    pub async fn download_to_temp(&self, source_url: &str) -> StorageResult<(tempfile::NamedTempFile, u64)> {
        let parsed = Url::parse(source_url)
            .map_err(|e| StorageError::InvalidSource(format!("{}: {}", source_url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(StorageError::InvalidSource(format!(
                "unsupported scheme {}",
                parsed.scheme()
            )));
        }

        let response = self
            .http
            .get(parsed)
            .send()
            .await
            .map_err(|e| StorageError::source_fetch(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StorageError::source_fetch(format!(
                "{} returned HTTP {}",
                source_url, status
            )));
        }

        let temp = tempfile::NamedTempFile::new()?;
        let mut file = tokio::fs::File::create(temp.path()).await?;
        let mut stream = response.bytes_stream();
        let mut size = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| StorageError::source_fetch(e.to_string()))?;
            size += chunk.len() as u64;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        Ok((temp, size))
    }

    /// Check bucket connectivity.
    pub async fn check_connectivity(&self) -> StorageResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| StorageError::AwsSdk(format!("R2 connectivity check failed: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for R2Client {
    async fn put_from_url(
        &self,
        source_url: &str,
        key: &str,
        content_type: &str,
    ) -> StorageResult<String> {
        let span = info_span!("r2_put_from_url", key = %key);

        async {
            let start = Instant::now();
            let result = async {
                let (temp, size) = self.download_to_temp(source_url).await?;
                debug!(bytes = size, "Source downloaded");
                self.upload_file(temp.path(), key, content_type).await?;
                Ok::<u64, StorageError>(size)
            }
            .await;

            let outcome = if result.is_ok() { "success" } else { "failure" };
            counter!("vgen_storage_copies_total", "outcome" => outcome).increment(1);
            histogram!("vgen_storage_copy_seconds").record(start.elapsed().as_secs_f64());

            result.map(|_| self.public_url(key))
        }
        .instrument(span)
        .await
    }

    async fn put_bytes(
        &self,
        data: Vec<u8>,
        key: &str,
        content_type: &str,
    ) -> StorageResult<String> {
        self.upload_bytes(data, key, content_type).await?;
        Ok(self.public_url(key))
    }

    async fn health_check(&self) -> bool {
        self.check_connectivity().await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config() -> R2Config {
        R2Config {
            endpoint_url: "http://127.0.0.1:9".into(),
            access_key_id: "ak".into(),
            secret_access_key: "sk".into(),
            bucket_name: "media".into(),
            region: "auto".into(),
            public_url: "https://media.example.com/".into(),
            download_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_public_url() {
        let client = R2Client::new(config()).unwrap();
        assert_eq!(
            client.public_url("videos/u1/1/video.mp4"),
            "https://media.example.com/videos/u1/1/video.mp4"
        );
    }

    #[test]
    #[serial]
    fn test_config_requires_public_url() {
        for (k, v) in [
            ("R2_ENDPOINT_URL", "http://r2"),
            ("R2_ACCESS_KEY_ID", "ak"),
            ("R2_SECRET_ACCESS_KEY", "sk"),
            ("R2_BUCKET_NAME", "media"),
        ] {
            std::env::set_var(k, v);
        }
        std::env::remove_var("R2_PUBLIC_URL");

        assert!(matches!(R2Config::from_env(), Err(StorageError::ConfigError(_))));

        std::env::set_var("R2_PUBLIC_URL", "https://media.example.com");
        assert_eq!(R2Config::from_env().unwrap().region, "auto");
        std::env::remove_var("R2_PUBLIC_URL");
    }

    #[tokio::test]
    async fn test_download_streams_to_temp_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v.mp4"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 4096]))
            .mount(&server)
            .await;

        let client = R2Client::new(config()).unwrap();
        let (temp, size) = client
            .download_to_temp(&format!("{}/v.mp4", server.uri()))
            .await
            .unwrap();

        assert_eq!(size, 4096);
        assert_eq!(std::fs::metadata(temp.path()).unwrap().len(), 4096);
    }

    #[tokio::test]
    async fn test_missing_source_fails_before_upload() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = R2Client::new(config()).unwrap();
        let err = client
            .put_from_url(&format!("{}/gone.mp4", server.uri()), "videos/u/1/video.mp4", "video/mp4")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::SourceFetch(_)));
    }

    #[tokio::test]
    async fn test_rejects_non_http_source() {
        let client = R2Client::new(config()).unwrap();
        let err = client.download_to_temp("file:///etc/passwd").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidSource(_)));
    }
}
