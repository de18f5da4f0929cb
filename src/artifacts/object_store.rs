// src/artifacts/object_store.rs
// Facade over the external object store
//
// Only paths and metadata flow through the primary store; this client owns
// the actual blob transfers. Without a configured bucket it runs in
// fallback mode: uploads resolve to `local://` paths and presigning is
// disabled. Transfer operations never fail the caller - outcomes carry
// `success = false` instead.

use crate::config::ArtifactConfig;
use chrono::NaiveDate;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::path::Path;
use std::time::{Duration, Instant};

/// Budget for a single blob transfer.
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(60);

/// Result of an upload or download. Failures surface here, never as `Err`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    pub success: bool,
    pub path: String,
    pub size_bytes: Option<u64>,
    pub duration_millis: u64,
    pub error: Option<String>,
}

impl TransferOutcome {
    fn ok(path: impl Into<String>, size_bytes: Option<u64>, started: Instant) -> Self {
        Self {
            success: true,
            path: path.into(),
            size_bytes,
            duration_millis: started.elapsed().as_millis() as u64,
            error: None,
        }
    }

    fn fail(path: impl Into<String>, error: impl Into<String>, started: Instant) -> Self {
        Self {
            success: false,
            path: path.into(),
            size_bytes: None,
            duration_millis: started.elapsed().as_millis() as u64,
            error: Some(error.into()),
        }
    }
}

/// Replace every character outside `[A-Za-z0-9._-]` with `_`.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Object store client holding the configured bucket handle.
///
/// Read-only after construction; shared freely across callers.
pub struct ObjectStoreClient {
    config: ArtifactConfig,
    http: reqwest::Client,
}

impl ObjectStoreClient {
    pub fn new(config: ArtifactConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Whether uploads and presigning are disabled.
    pub fn is_fallback(&self) -> bool {
        self.config.is_fallback()
    }

    /// Canonical object key: `<prefix>/<projectId>/<YYYY-MM-DD>/<artifactId>-<sanitizedName>`.
    pub fn object_path(
        &self,
        project_id: &str,
        artifact_id: &str,
        name: &str,
        date: NaiveDate,
    ) -> String {
        format!(
            "{prefix}/{project_id}/{date}/{artifact_id}-{name}",
            prefix = self.config.prefix,
            date = date.format("%Y-%m-%d"),
            name = sanitize_name(name),
        )
    }

    /// Canonical URI for a stored object (`s3://bucket/<path>`).
    pub fn canonical_uri(&self, object_path: &str) -> Option<String> {
        let bucket = self.config.bucket.as_deref()?;
        Some(format!("s3://{bucket}/{object_path}"))
    }

    /// Host serving the bucket: the configured endpoint's host, or the
    /// regional default.
    fn service_host(&self) -> String {
        if let Some(endpoint) = self.config.endpoint.as_deref()
            && let Ok(parsed) = url::Url::parse(endpoint)
            && let Some(host) = parsed.host_str()
        {
            return host.to_string();
        }
        let region = self.config.region.as_deref().unwrap_or("us-east-1");
        format!("s3.{region}.amazonaws.com")
    }

    /// Public URL for a stored object (`https://<bucket>.<service-host>/<path>`).
    pub fn public_url(&self, object_path: &str) -> Option<String> {
        let bucket = self.config.bucket.as_deref()?;
        Some(format!(
            "https://{bucket}.{host}/{object_path}",
            host = self.service_host()
        ))
    }

    /// Request URL for transfer calls against the configured endpoint.
    fn request_url(&self, object_path: &str) -> Option<String> {
        let bucket = self.config.bucket.as_deref()?;
        match self.config.endpoint.as_deref() {
            Some(endpoint) => Some(format!(
                "{}/{bucket}/{object_path}",
                endpoint.trim_end_matches('/')
            )),
            None => self.public_url(object_path),
        }
    }

    /// Upload a local file to the object store.
    ///
    /// `artifact_id` identifies the owning reference and is carried in the
    /// request so the store can tie the blob back to its record.
    pub async fn upload(
        &self,
        local_path: &Path,
        artifact_id: &str,
        object_path: &str,
    ) -> TransferOutcome {
        let started = Instant::now();

        if self.is_fallback() {
            let path = format!("local://{}", local_path.display());
            let size = tokio::fs::metadata(local_path).await.ok().map(|m| m.len());
            return TransferOutcome::ok(path, size, started);
        }

        let Some(url) = self.request_url(object_path) else {
            return TransferOutcome::fail(object_path, "no bucket configured", started);
        };

        let bytes = match tokio::fs::read(local_path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                return TransferOutcome::fail(
                    object_path,
                    format!("read {}: {e}", local_path.display()),
                    started,
                );
            }
        };
        let size = bytes.len() as u64;

        let mut request = self
            .http
            .put(&url)
            .timeout(TRANSFER_TIMEOUT)
            .header("x-artifact-id", artifact_id)
            .body(bytes);
        if let Some(access_key) = self.config.access_key.as_deref() {
            request = request.header("x-access-key", access_key);
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                TransferOutcome::ok(object_path, Some(size), started)
            }
            Ok(response) => TransferOutcome::fail(
                object_path,
                format!("upload rejected: HTTP {}", response.status()),
                started,
            ),
            Err(e) => TransferOutcome::fail(object_path, format!("upload failed: {e}"), started),
        }
    }

    /// Download an object to a local file.
    pub async fn download(&self, object_path: &str, local_path: &Path) -> TransferOutcome {
        let started = Instant::now();

        // Fallback-mode paths are plain files; a copy satisfies the contract.
        if let Some(source) = object_path.strip_prefix("local://") {
            return match tokio::fs::copy(source, local_path).await {
                Ok(size) => TransferOutcome::ok(object_path, Some(size), started),
                Err(e) => TransferOutcome::fail(object_path, format!("copy failed: {e}"), started),
            };
        }

        let Some(url) = self.request_url(object_path) else {
            return TransferOutcome::fail(object_path, "no bucket configured", started);
        };

        let mut request = self.http.get(&url).timeout(TRANSFER_TIMEOUT);
        if let Some(access_key) = self.config.access_key.as_deref() {
            request = request.header("x-access-key", access_key);
        }

        let response = match request.send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                return TransferOutcome::fail(
                    object_path,
                    format!("download rejected: HTTP {}", response.status()),
                    started,
                );
            }
            Err(e) => {
                return TransferOutcome::fail(
                    object_path,
                    format!("download failed: {e}"),
                    started,
                );
            }
        };

        match response.bytes().await {
            Ok(bytes) => {
                let size = bytes.len() as u64;
                match tokio::fs::write(local_path, &bytes).await {
                    Ok(()) => TransferOutcome::ok(object_path, Some(size), started),
                    Err(e) => TransferOutcome::fail(
                        object_path,
                        format!("write {}: {e}", local_path.display()),
                        started,
                    ),
                }
            }
            Err(e) => TransferOutcome::fail(object_path, format!("download body: {e}"), started),
        }
    }

    /// Time-limited signed URL for direct GET access.
    ///
    /// None in fallback mode or without signing credentials.
    pub fn presigned_url(&self, object_path: &str, ttl_seconds: u64) -> Option<String> {
        let bucket = self.config.bucket.as_deref()?;
        let secret = self.config.secret_key.as_deref()?;
        let access_key = self.config.access_key.as_deref().unwrap_or_default();

        let expires = crate::utils::now_millis() / 1000 + ttl_seconds as i64;
        let string_to_sign = format!("GET\n/{bucket}/{object_path}\n{expires}");

        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).ok()?;
        mac.update(string_to_sign.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());

        let base = self.request_url(object_path)?;
        Some(format!(
            "{base}?X-Access-Key={access_key}&X-Expires={expires}&X-Signature={signature}"
        ))
    }
}
