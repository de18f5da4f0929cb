// src/db/artifacts.rs
// Artifact reference operations
//
// Only the reference record lives here; blob content stays in the external
// object store. Artifact names and descriptions are not mirrored into the
// search index.

use super::{metadata_from_json, metadata_to_json, projects::touch_project_sync};
use crate::error::{ContextError, Result};
use crate::types::{ArtifactReference, ArtifactType};
use rusqlite::{Connection, OptionalExtension, Row, params};

const ARTIFACT_COLUMNS: &str = "id, project_id, task_id, artifact_type, name, object_path, \
     local_path, external_url, size_bytes, created_at, metadata";

fn row_to_artifact(row: &Row) -> rusqlite::Result<ArtifactReference> {
    Ok(ArtifactReference {
        id: row.get(0)?,
        project_id: row.get(1)?,
        task_id: row.get(2)?,
        artifact_type: ArtifactType::parse(&row.get::<_, String>(3)?),
        name: row.get(4)?,
        object_path: row.get(5)?,
        local_path: row.get(6)?,
        external_url: row.get(7)?,
        size_bytes: row.get(8)?,
        created_at: row.get(9)?,
        metadata: metadata_from_json(&row.get::<_, String>(10)?),
    })
}

/// Upsert an artifact reference by id.
///
/// At least one of `object_path` / `local_path` / `external_url` must be set.
pub fn save_artifact_sync(conn: &Connection, artifact: &ArtifactReference) -> Result<()> {
    if artifact.object_path.is_none()
        && artifact.local_path.is_none()
        && artifact.external_url.is_none()
    {
        return Err(ContextError::ConstraintViolation(format!(
            "artifact {}: no object_path, local_path, or external_url",
            artifact.id
        )));
    }

    conn.execute(
        "INSERT INTO artifacts (id, project_id, task_id, artifact_type, name, object_path,
                                local_path, external_url, size_bytes, created_at, metadata)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
         ON CONFLICT(id) DO UPDATE SET
             name = excluded.name,
             object_path = excluded.object_path,
             local_path = excluded.local_path,
             external_url = excluded.external_url,
             size_bytes = excluded.size_bytes,
             metadata = excluded.metadata",
        params![
            artifact.id,
            artifact.project_id,
            artifact.task_id,
            artifact.artifact_type.as_str(),
            artifact.name,
            artifact.object_path,
            artifact.local_path,
            artifact.external_url,
            artifact.size_bytes,
            artifact.created_at,
            metadata_to_json(&artifact.metadata),
        ],
    )?;

    touch_project_sync(conn, &artifact.project_id, crate::utils::now_millis())?;
    Ok(())
}

/// Get an artifact reference by id. Returns None on miss.
pub fn get_artifact_sync(conn: &Connection, id: &str) -> Result<Option<ArtifactReference>> {
    let artifact = conn
        .query_row(
            &format!("SELECT {ARTIFACT_COLUMNS} FROM artifacts WHERE id = ?1"),
            [id],
            row_to_artifact,
        )
        .optional()?;
    Ok(artifact)
}

/// Artifact references for a project, newest first.
pub fn get_artifacts_for_project_sync(
    conn: &Connection,
    project_id: &str,
    limit: usize,
) -> Result<Vec<ArtifactReference>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ARTIFACT_COLUMNS} FROM artifacts
         WHERE project_id = ?1
         ORDER BY created_at DESC, rowid DESC
         LIMIT ?2"
    ))?;
    let rows = stmt.query_map(params![project_id, limit as i64], row_to_artifact)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
}

/// Artifact references of one type within a project, newest first.
pub fn get_artifacts_by_type_sync(
    conn: &Connection,
    project_id: &str,
    artifact_type: ArtifactType,
) -> Result<Vec<ArtifactReference>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ARTIFACT_COLUMNS} FROM artifacts
         WHERE project_id = ?1 AND artifact_type = ?2
         ORDER BY created_at DESC, rowid DESC"
    ))?;
    let rows = stmt.query_map(
        params![project_id, artifact_type.as_str()],
        row_to_artifact,
    )?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
}
