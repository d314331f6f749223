//! Task registry queries. They take a plain connection so they can run either on
//! their own or inside a [`super::UnitOfWork`].

use super::models::{NewRegisteredTask, RegisteredTask};
use super::sqlite_store::{format_datetime, parse_datetime};
use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

const TASK_COLUMNS: &str = "id, task_name, description, host_id, created_at";

fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<RegisteredTask> {
    let created_at: String = row.get("created_at")?;
    Ok(RegisteredTask {
        id: row.get("id")?,
        task_name: row.get("task_name")?,
        description: row.get("description")?,
        host_id: row.get("host_id")?,
        created_at: parse_datetime(&created_at),
    })
}

pub(super) fn exists_covering(conn: &Connection, identifier: &str) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM registered_tasks WHERE id = ?1 OR task_name = ?1 LIMIT 1",
            params![identifier],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn get_task(conn: &Connection, id: &str) -> Result<Option<RegisteredTask>> {
    let task = conn
        .query_row(
            &format!("SELECT {TASK_COLUMNS} FROM registered_tasks WHERE id = ?1"),
            params![id],
            row_to_task,
        )
        .optional()?;
    Ok(task)
}

pub(super) fn list_tasks(conn: &Connection) -> Result<Vec<RegisteredTask>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {TASK_COLUMNS} FROM registered_tasks ORDER BY id"
    ))?;
    let tasks = stmt
        .query_map([], row_to_task)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(tasks)
}

/// Insert a task, or refresh the metadata of an existing one with the same id.
/// `created_at` of an existing entry is preserved.
pub fn register_task(conn: &Connection, task: &NewRegisteredTask) -> Result<RegisteredTask> {
    let now = format_datetime(&Utc::now());
    conn.execute(
        "INSERT INTO registered_tasks (id, task_name, description, host_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(id) DO UPDATE SET task_name = ?2, description = ?3, host_id = ?4",
        params![task.id, task.task_name, task.description, task.host_id, now],
    )
    .with_context(|| format!("Failed to register task {}", task.id))?;

    get_task(conn, &task.id)?
        .with_context(|| format!("Task {} missing right after registration", task.id))
}
