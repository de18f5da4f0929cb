// src/artifacts/mod.rs
// Artifact reference layer: canonical paths, registration, URL resolution
//
// The store records references only; blob bytes go through the
// `ObjectStoreClient` facade (or stay local in fallback mode).

pub mod object_store;

pub use object_store::{ObjectStoreClient, TransferOutcome, sanitize_name};

use crate::config::ArtifactConfig;
use crate::db::{
    self, DatabasePool, get_artifact_sync, get_artifacts_by_type_sync,
    get_artifacts_for_project_sync, save_artifact_sync,
};
use crate::error::{ContextError, Result};
use crate::types::{ArtifactReference, ArtifactType, Metadata};
use crate::utils::{new_id, now_millis};
use std::path::Path;
use std::sync::Arc;

/// Registration request for a new artifact reference.
#[derive(Debug, Clone)]
pub struct NewArtifact {
    pub project_id: String,
    pub task_id: Option<String>,
    pub artifact_type: ArtifactType,
    pub name: String,
    pub local_path: Option<String>,
    pub external_url: Option<String>,
    pub metadata: Metadata,
}

/// Artifact reference management over the primary store and object store.
pub struct ArtifactStore {
    db: Arc<DatabasePool>,
    client: ObjectStoreClient,
}

impl ArtifactStore {
    pub fn new(db: Arc<DatabasePool>, config: ArtifactConfig) -> Self {
        Self {
            db,
            client: ObjectStoreClient::new(config),
        }
    }

    /// Mint and persist a reference for an external artifact.
    ///
    /// Generates the object path when a bucket is configured, captures
    /// `size_bytes` by stat when the local file exists, and auto-creates
    /// the owning project. Fails with `ConstraintViolation` when the
    /// reference would point nowhere.
    pub async fn register_artifact(&self, new: NewArtifact) -> Result<ArtifactReference> {
        if self.client.is_fallback() && new.local_path.is_none() && new.external_url.is_none() {
            return Err(ContextError::ConstraintViolation(format!(
                "artifact '{}': no local path, external URL, or configured bucket",
                new.name
            )));
        }

        let id = new_id();
        let now = now_millis();

        let object_path = if self.client.is_fallback() {
            None
        } else {
            let date = chrono::Utc::now().date_naive();
            Some(self.client.object_path(&new.project_id, &id, &new.name, date))
        };

        let size_bytes = match new.local_path.as_deref() {
            Some(path) => tokio::fs::metadata(path).await.ok().map(|m| m.len() as i64),
            None => None,
        };

        let artifact = ArtifactReference {
            id,
            project_id: new.project_id,
            task_id: new.task_id,
            artifact_type: new.artifact_type,
            name: new.name,
            object_path,
            local_path: new.local_path,
            external_url: new.external_url,
            size_bytes,
            created_at: now,
            metadata: new.metadata,
        };

        let to_save = artifact.clone();
        self.db
            .interact(move |conn| {
                db::ensure_project_sync(conn, &to_save.project_id, now)?;
                save_artifact_sync(conn, &to_save)
            })
            .await?;

        Ok(artifact)
    }

    /// Artifact references for a project, newest first.
    pub async fn get_artifacts_by_project(
        &self,
        project_id: &str,
        limit: usize,
    ) -> Result<Vec<ArtifactReference>> {
        let project_id = project_id.to_string();
        self.db
            .interact(move |conn| get_artifacts_for_project_sync(conn, &project_id, limit))
            .await
    }

    /// Artifact references of one type within a project.
    pub async fn get_artifacts_by_type(
        &self,
        project_id: &str,
        artifact_type: ArtifactType,
    ) -> Result<Vec<ArtifactReference>> {
        let project_id = project_id.to_string();
        self.db
            .interact(move |conn| get_artifacts_by_type_sync(conn, &project_id, artifact_type))
            .await
    }

    /// Best URL for an artifact: object store (when a bucket is
    /// configured), then local file, then external URL.
    pub fn resolve_url(&self, artifact: &ArtifactReference) -> Option<String> {
        if !self.client.is_fallback()
            && let Some(object_path) = artifact.object_path.as_deref()
        {
            return self.client.public_url(object_path);
        }
        if let Some(local_path) = artifact.local_path.as_deref() {
            return Some(format!("file://{local_path}"));
        }
        artifact.external_url.clone()
    }

    /// Upload the registered artifact's local file to its object path.
    ///
    /// Never fails the caller; problems surface in the outcome.
    pub async fn upload_blob(&self, artifact_id: &str) -> TransferOutcome {
        let started = std::time::Instant::now();
        let id = artifact_id.to_string();
        let artifact = match self
            .db
            .interact(move |conn| get_artifact_sync(conn, &id))
            .await
        {
            Ok(Some(artifact)) => artifact,
            Ok(None) => {
                return TransferOutcome {
                    success: false,
                    path: artifact_id.to_string(),
                    size_bytes: None,
                    duration_millis: started.elapsed().as_millis() as u64,
                    error: Some(format!("unknown artifact {artifact_id}")),
                };
            }
            Err(e) => {
                return TransferOutcome {
                    success: false,
                    path: artifact_id.to_string(),
                    size_bytes: None,
                    duration_millis: started.elapsed().as_millis() as u64,
                    error: Some(e.to_string()),
                };
            }
        };

        let Some(local_path) = artifact.local_path.as_deref() else {
            return TransferOutcome {
                success: false,
                path: artifact_id.to_string(),
                size_bytes: None,
                duration_millis: started.elapsed().as_millis() as u64,
                error: Some("artifact has no local file to upload".to_string()),
            };
        };

        let object_path = artifact.object_path.as_deref().unwrap_or("");
        self.client
            .upload(Path::new(local_path), &artifact.id, object_path)
            .await
    }

    /// Download a stored object to a local file.
    pub async fn download_blob(&self, object_path: &str, local_path: &Path) -> TransferOutcome {
        self.client.download(object_path, local_path).await
    }

    /// Presigned GET URL, when signing is configured.
    pub fn presigned_url(&self, object_path: &str, ttl_seconds: u64) -> Option<String> {
        self.client.presigned_url(object_path, ttl_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::setup_test_pool;

    fn bucket_config() -> ArtifactConfig {
        ArtifactConfig {
            bucket: Some("hive".to_string()),
            region: None,
            prefix: "artifacts".to_string(),
            access_key: None,
            secret_key: None,
            endpoint: None,
        }
    }

    fn spec_request(local_path: Option<String>) -> NewArtifact {
        NewArtifact {
            project_id: "p1".to_string(),
            task_id: None,
            artifact_type: ArtifactType::Specification,
            name: "spec v8.md".to_string(),
            local_path,
            external_url: None,
            metadata: Metadata::default(),
        }
    }

    #[tokio::test]
    async fn test_register_without_any_location_fails() {
        let db = setup_test_pool().await;
        let store = ArtifactStore::new(db, ArtifactConfig::default());

        let err = store.register_artifact(spec_request(None)).await.unwrap_err();
        assert!(matches!(err, ContextError::ConstraintViolation(_)));
    }

    #[tokio::test]
    async fn test_register_local_file_fallback_mode() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("spec v8.md");
        tokio::fs::write(&file, vec![b'x'; 52_000]).await.unwrap();

        let db = setup_test_pool().await;
        let store = ArtifactStore::new(db, ArtifactConfig::default());

        let artifact = store
            .register_artifact(spec_request(Some(file.display().to_string())))
            .await
            .unwrap();

        assert_eq!(artifact.size_bytes, Some(52_000));
        assert!(artifact.object_path.is_none());
        assert_eq!(
            store.resolve_url(&artifact).unwrap(),
            format!("file://{}", file.display())
        );
    }

    #[tokio::test]
    async fn test_register_with_bucket_generates_sanitized_object_path() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("spec v8.md");
        tokio::fs::write(&file, b"content").await.unwrap();

        let db = setup_test_pool().await;
        let store = ArtifactStore::new(db, bucket_config());

        let artifact = store
            .register_artifact(spec_request(Some(file.display().to_string())))
            .await
            .unwrap();

        let object_path = artifact.object_path.as_deref().unwrap();
        assert!(object_path.starts_with("artifacts/p1/"));
        assert!(object_path.ends_with(&format!("/{}-spec_v8.md", artifact.id)));

        let url = store.resolve_url(&artifact).unwrap();
        assert!(url.starts_with("https://hive."));
    }

    #[tokio::test]
    async fn test_register_auto_creates_project_and_is_listed() {
        let db = setup_test_pool().await;
        let store = ArtifactStore::new(db.clone(), ArtifactConfig::default());

        let mut request = spec_request(None);
        request.external_url = Some("https://example.com/spec".to_string());
        let artifact = store.register_artifact(request).await.unwrap();

        let project = db
            .interact(|conn| crate::db::get_project_sync(conn, "p1"))
            .await
            .unwrap();
        assert!(project.is_some(), "owning project must be auto-created");

        let listed = store.get_artifacts_by_project("p1", 10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, artifact.id);

        assert_eq!(
            store.resolve_url(&artifact).unwrap(),
            "https://example.com/spec"
        );
    }

    #[tokio::test]
    async fn test_upload_blob_unknown_artifact_fails_soft() {
        let db = setup_test_pool().await;
        let store = ArtifactStore::new(db, ArtifactConfig::default());

        let outcome = store.upload_blob("missing").await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("unknown artifact"));
    }
}
