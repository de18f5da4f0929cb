// src/db/tasks.rs
// Task operations

use super::search::upsert_search_row_sync;
use super::{metadata_from_json, metadata_to_json, projects::touch_project_sync};
use crate::error::{ContextError, Result};
use crate::types::{SourceType, Task, TaskResult, TaskStatus};
use rusqlite::{Connection, OptionalExtension, Row, params};

const TASK_COLUMNS: &str = "id, project_id, description, status, assigned_to, princess_id, \
     drone_id, created_at, completed_at, result, metadata";

fn row_to_task(row: &Row) -> rusqlite::Result<Task> {
    let result: Option<TaskResult> = row
        .get::<_, Option<String>>(9)?
        .and_then(|raw| serde_json::from_str(&raw).ok());
    Ok(Task {
        id: row.get(0)?,
        project_id: row.get(1)?,
        description: row.get(2)?,
        status: TaskStatus::parse(&row.get::<_, String>(3)?),
        assigned_to: row.get(4)?,
        princess_id: row.get(5)?,
        drone_id: row.get(6)?,
        created_at: row.get(7)?,
        completed_at: row.get(8)?,
        result,
        metadata: metadata_from_json(&row.get::<_, String>(10)?),
    })
}

/// Upsert a task by id and mirror its description into the search index.
///
/// Enforces the lifecycle invariant: `completed_at` is set iff the status
/// is terminal.
pub fn save_task_sync(conn: &Connection, task: &Task) -> Result<()> {
    if task.status.is_terminal() != task.completed_at.is_some() {
        return Err(ContextError::ConstraintViolation(format!(
            "task {}: completed_at must be set exactly when status is terminal (status={}, completed_at={:?})",
            task.id,
            task.status.as_str(),
            task.completed_at,
        )));
    }
    if let Some(completed_at) = task.completed_at
        && completed_at < task.created_at
    {
        return Err(ContextError::ConstraintViolation(format!(
            "task {}: completed_at precedes created_at",
            task.id
        )));
    }

    let result_json = task
        .result
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    conn.execute(
        "INSERT INTO tasks (id, project_id, description, status, assigned_to, princess_id,
                            drone_id, created_at, completed_at, result, metadata)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
         ON CONFLICT(id) DO UPDATE SET
             description = excluded.description,
             status = excluded.status,
             assigned_to = excluded.assigned_to,
             princess_id = excluded.princess_id,
             drone_id = excluded.drone_id,
             completed_at = excluded.completed_at,
             result = excluded.result,
             metadata = excluded.metadata",
        params![
            task.id,
            task.project_id,
            task.description,
            task.status.as_str(),
            task.assigned_to,
            task.princess_id,
            task.drone_id,
            task.created_at,
            task.completed_at,
            result_json,
            metadata_to_json(&task.metadata),
        ],
    )?;

    upsert_search_row_sync(
        conn,
        &task.id,
        SourceType::Task,
        &task.project_id,
        Some(&task.id),
        &task.description,
        task.created_at,
    )?;
    touch_project_sync(conn, &task.project_id, crate::utils::now_millis())?;
    Ok(())
}

/// Get a task by id. Returns None on miss.
pub fn get_task_sync(conn: &Connection, id: &str) -> Result<Option<Task>> {
    let task = conn
        .query_row(
            &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
            [id],
            row_to_task,
        )
        .optional()?;
    Ok(task)
}

/// Tasks for a project, newest first.
pub fn get_tasks_for_project_sync(
    conn: &Connection,
    project_id: &str,
    limit: usize,
) -> Result<Vec<Task>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {TASK_COLUMNS} FROM tasks
         WHERE project_id = ?1
         ORDER BY created_at DESC, rowid DESC
         LIMIT ?2"
    ))?;
    let rows = stmt.query_map(params![project_id, limit as i64], row_to_task)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
}

/// Tasks in one status within a project, newest first.
///
/// Backed by the `(project_id, status, created_at DESC)` index.
pub fn get_tasks_by_status_sync(
    conn: &Connection,
    project_id: &str,
    status: TaskStatus,
    limit: usize,
) -> Result<Vec<Task>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {TASK_COLUMNS} FROM tasks
         WHERE project_id = ?1 AND status = ?2
         ORDER BY created_at DESC, rowid DESC
         LIMIT ?3"
    ))?;
    let rows = stmt.query_map(
        params![project_id, status.as_str(), limit as i64],
        row_to_task,
    )?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
}

/// Tasks assigned to a specific agent within a project, newest first.
pub fn get_tasks_by_assignee_sync(
    conn: &Connection,
    project_id: &str,
    agent_id: &str,
    limit: usize,
) -> Result<Vec<Task>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {TASK_COLUMNS} FROM tasks
         WHERE project_id = ?1 AND assigned_to = ?2
         ORDER BY created_at DESC, rowid DESC
         LIMIT ?3"
    ))?;
    let rows = stmt.query_map(params![project_id, agent_id, limit as i64], row_to_task)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
}

/// Count tasks assigned to an agent within a project.
pub fn count_tasks_by_assignee_sync(
    conn: &Connection,
    project_id: &str,
    agent_id: &str,
) -> Result<usize> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM tasks WHERE project_id = ?1 AND assigned_to = ?2",
        params![project_id, agent_id],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{seed_project, seed_task, setup_test_connection};
    use crate::utils::now_millis;

    #[test]
    fn test_save_and_get_round_trip() {
        let conn = setup_test_connection();
        seed_project(&conn, "p1");
        let task = seed_task(&conn, "p1", "t1", "implement OAuth2 login", TaskStatus::Pending);

        let loaded = get_task_sync(&conn, "t1").unwrap().unwrap();
        assert_eq!(loaded, task);
    }

    #[test]
    fn test_terminal_requires_completed_at() {
        let conn = setup_test_connection();
        seed_project(&conn, "p1");
        let now = now_millis();

        let bad = Task {
            id: "t1".to_string(),
            project_id: "p1".to_string(),
            description: "x".to_string(),
            status: TaskStatus::Completed,
            assigned_to: None,
            princess_id: None,
            drone_id: None,
            created_at: now,
            completed_at: None,
            result: None,
            metadata: Default::default(),
        };
        assert!(matches!(
            save_task_sync(&conn, &bad),
            Err(ContextError::ConstraintViolation(_))
        ));

        let also_bad = Task {
            status: TaskStatus::Pending,
            completed_at: Some(now),
            ..bad
        };
        assert!(matches!(
            save_task_sync(&conn, &also_bad),
            Err(ContextError::ConstraintViolation(_))
        ));
    }

    #[test]
    fn test_completed_at_before_created_at_rejected() {
        let conn = setup_test_connection();
        seed_project(&conn, "p1");
        let now = now_millis();

        let task = Task {
            id: "t1".to_string(),
            project_id: "p1".to_string(),
            description: "x".to_string(),
            status: TaskStatus::Failed,
            assigned_to: None,
            princess_id: None,
            drone_id: None,
            created_at: now,
            completed_at: Some(now - 1),
            result: None,
            metadata: Default::default(),
        };
        assert!(matches!(
            save_task_sync(&conn, &task),
            Err(ContextError::ConstraintViolation(_))
        ));
    }

    #[test]
    fn test_resave_is_noop_on_row_count() {
        let conn = setup_test_connection();
        seed_project(&conn, "p1");
        let task = seed_task(&conn, "p1", "t1", "idempotent save", TaskStatus::Pending);
        save_task_sync(&conn, &task).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_listing_is_newest_first_and_bounded() {
        let conn = setup_test_connection();
        seed_project(&conn, "p1");
        for i in 0..5 {
            let mut task = seed_task(&conn, "p1", &format!("t{i}"), "work", TaskStatus::Pending);
            task.created_at = 1000 + i;
            save_task_sync(&conn, &task).unwrap();
        }

        let tasks = get_tasks_for_project_sync(&conn, "p1", 3).unwrap();
        assert_eq!(tasks.len(), 3);
        assert_eq!(tasks[0].id, "t4");
        assert_eq!(tasks[2].id, "t2");
    }

    #[test]
    fn test_status_filter() {
        let conn = setup_test_connection();
        seed_project(&conn, "p1");
        seed_task(&conn, "p1", "t1", "queued work", TaskStatus::Pending);
        seed_task(&conn, "p1", "t2", "running work", TaskStatus::InProgress);
        seed_task(&conn, "p1", "t3", "done work", TaskStatus::Completed);
        seed_task(&conn, "p1", "t4", "more queued work", TaskStatus::Pending);

        let pending = get_tasks_by_status_sync(&conn, "p1", TaskStatus::Pending, 10).unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending.iter().all(|t| t.status == TaskStatus::Pending));

        let failed = get_tasks_by_status_sync(&conn, "p1", TaskStatus::Failed, 10).unwrap();
        assert!(failed.is_empty());

        let bounded = get_tasks_by_status_sync(&conn, "p1", TaskStatus::Pending, 1).unwrap();
        assert_eq!(bounded.len(), 1);
    }

    #[test]
    fn test_result_round_trip() {
        let conn = setup_test_connection();
        seed_project(&conn, "p1");
        let now = now_millis();
        let task = Task {
            id: "t1".to_string(),
            project_id: "p1".to_string(),
            description: "deploy".to_string(),
            status: TaskStatus::Completed,
            assigned_to: Some("drone-3".to_string()),
            princess_id: None,
            drone_id: Some("drone-3".to_string()),
            created_at: now,
            completed_at: Some(now + 10),
            result: Some(TaskResult {
                success: true,
                output: Some("deployed".to_string()),
                error: None,
                artifacts: Vec::new(),
                metrics: None,
            }),
            metadata: Default::default(),
        };
        save_task_sync(&conn, &task).unwrap();

        let loaded = get_task_sync(&conn, "t1").unwrap().unwrap();
        assert_eq!(loaded.result.as_ref().unwrap().output.as_deref(), Some("deployed"));
    }
}
