// src/db/projects.rs
// Project operations: the ownership root for every other entity

use super::{metadata_from_json, metadata_to_json};
use crate::error::Result;
use crate::types::Project;
use rusqlite::{Connection, OptionalExtension, Row, params};

fn row_to_project(row: &Row) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        repository_url: row.get(3)?,
        created_at: row.get(4)?,
        last_accessed_at: row.get(5)?,
        metadata: metadata_from_json(&row.get::<_, String>(6)?),
    })
}

const PROJECT_COLUMNS: &str =
    "id, name, description, repository_url, created_at, last_accessed_at, metadata";

/// Upsert a project by id.
pub fn save_project_sync(conn: &Connection, project: &Project) -> Result<()> {
    conn.execute(
        "INSERT INTO projects (id, name, description, repository_url, created_at, last_accessed_at, metadata)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(id) DO UPDATE SET
             name = excluded.name,
             description = excluded.description,
             repository_url = excluded.repository_url,
             last_accessed_at = excluded.last_accessed_at,
             metadata = excluded.metadata",
        params![
            project.id,
            project.name,
            project.description,
            project.repository_url,
            project.created_at,
            project.last_accessed_at,
            metadata_to_json(&project.metadata),
        ],
    )?;
    Ok(())
}

/// Get a project by id. Returns None on miss.
pub fn get_project_sync(conn: &Connection, id: &str) -> Result<Option<Project>> {
    let project = conn
        .query_row(
            &format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?1"),
            [id],
            row_to_project,
        )
        .optional()?;
    Ok(project)
}

/// Ensure a project row exists, creating a stub on first reference.
///
/// The stub's name is the project id; callers can flesh it out later with
/// `save_project_sync`. Always refreshes `last_accessed_at`.
pub fn ensure_project_sync(conn: &Connection, project_id: &str, now: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO projects (id, name, created_at, last_accessed_at)
         VALUES (?1, ?1, ?2, ?2)
         ON CONFLICT(id) DO UPDATE SET last_accessed_at = ?2",
        params![project_id, now],
    )?;
    Ok(())
}

/// Refresh a project's `last_accessed_at`. Called on every child write.
pub fn touch_project_sync(conn: &Connection, project_id: &str, now: i64) -> Result<()> {
    conn.execute(
        "UPDATE projects SET last_accessed_at = ?2 WHERE id = ?1",
        params![project_id, now],
    )?;
    Ok(())
}

/// Delete a project and cascade to all owned entities and their search rows.
///
/// Returns the total number of rows removed (children included).
pub fn delete_project_sync(conn: &Connection, id: &str) -> Result<usize> {
    let children: i64 = conn.query_row(
        "SELECT (SELECT COUNT(*) FROM tasks WHERE project_id = ?1)
              + (SELECT COUNT(*) FROM conversations WHERE project_id = ?1)
              + (SELECT COUNT(*) FROM artifacts WHERE project_id = ?1)
              + (SELECT COUNT(*) FROM agent_memories WHERE project_id = ?1)",
        [id],
        |row| row.get(0),
    )?;

    // FK cascade removes the children; the FTS table has no FK support.
    let deleted = conn.execute("DELETE FROM projects WHERE id = ?1", [id])?;
    conn.execute("DELETE FROM search_index WHERE project_id = ?1", [id])?;

    Ok(deleted + children as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::setup_test_connection;
    use crate::utils::now_millis;

    #[test]
    fn test_save_and_get_project() {
        let conn = setup_test_connection();
        let now = now_millis();
        let project = Project {
            id: "p1".to_string(),
            name: "swarm".to_string(),
            description: Some("delegation graph".to_string()),
            repository_url: None,
            created_at: now,
            last_accessed_at: now,
            metadata: Default::default(),
        };

        save_project_sync(&conn, &project).unwrap();
        let loaded = get_project_sync(&conn, "p1").unwrap().unwrap();
        assert_eq!(loaded, project);

        assert!(get_project_sync(&conn, "missing").unwrap().is_none());
    }

    #[test]
    fn test_save_project_is_upsert() {
        let conn = setup_test_connection();
        let now = now_millis();
        let mut project = Project {
            id: "p1".to_string(),
            name: "first".to_string(),
            description: None,
            repository_url: None,
            created_at: now,
            last_accessed_at: now,
            metadata: Default::default(),
        };
        save_project_sync(&conn, &project).unwrap();

        project.name = "renamed".to_string();
        save_project_sync(&conn, &project).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM projects", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(get_project_sync(&conn, "p1").unwrap().unwrap().name, "renamed");
    }

    #[test]
    fn test_delete_project_cascades() {
        use crate::db::test_support::{seed_conversation, seed_memory, seed_task};
        use crate::types::{MemoryType, TaskStatus};

        let conn = setup_test_connection();
        ensure_project_sync(&conn, "p1", 1000).unwrap();
        ensure_project_sync(&conn, "p2", 1000).unwrap();
        seed_task(&conn, "p1", "t1", "doomed task", TaskStatus::Pending);
        seed_conversation(&conn, "p1", "c1", "queen", "doomed turn");
        seed_memory(&conn, "p1", "m1", "queen", MemoryType::Context, 0.5);
        seed_conversation(&conn, "p2", "c2", "queen", "survivor");

        let deleted = delete_project_sync(&conn, "p1").unwrap();
        assert_eq!(deleted, 4, "project plus three children");

        for (table, survivors) in [
            ("tasks", 0i64),
            ("conversations", 1),
            ("agent_memories", 0),
        ] {
            let count: i64 = conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                    row.get(0)
                })
                .unwrap();
            assert_eq!(count, survivors, "unexpected rows left in {table}");
        }

        // Search rows for the deleted project go with it
        let indexed: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM search_index WHERE project_id = 'p1'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(indexed, 0);
    }

    #[test]
    fn test_ensure_project_creates_stub_and_touches() {
        let conn = setup_test_connection();
        ensure_project_sync(&conn, "p1", 1000).unwrap();
        let stub = get_project_sync(&conn, "p1").unwrap().unwrap();
        assert_eq!(stub.name, "p1");
        assert_eq!(stub.created_at, 1000);

        ensure_project_sync(&conn, "p1", 2000).unwrap();
        let touched = get_project_sync(&conn, "p1").unwrap().unwrap();
        assert_eq!(touched.created_at, 1000, "created_at must not move");
        assert_eq!(touched.last_accessed_at, 2000);
    }
}
