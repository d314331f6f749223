//! Analyzer hosts: the only write path for `analyzer_hosts` rows.
//!
//! Every insert, update and delete goes through [`HostService`], which emits the
//! matching [`EntityEvent`] inside the writing transaction.

use crate::events::{EntityEvent, EventBus};
use crate::store::{
    format_datetime, parse_datetime, parse_optional_datetime, AnalyzerHost, NewAnalyzerHost,
    SqliteStore, UnitOfWork,
};
use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Arc;
use tracing::info;

fn row_to_host(row: &rusqlite::Row) -> rusqlite::Result<AnalyzerHost> {
    let created_at: String = row.get("created_at")?;
    Ok(AnalyzerHost {
        id: row.get("id")?,
        name: row.get("name")?,
        url: row.get("url")?,
        api_key: row.get("api_key")?,
        created_at: parse_datetime(&created_at),
        install_completed: parse_optional_datetime(row.get("install_completed")?),
    })
}

pub fn get_host(conn: &Connection, host_id: i64) -> Result<Option<AnalyzerHost>> {
    let host = conn
        .query_row(
            "SELECT id, name, url, api_key, created_at, install_completed
             FROM analyzer_hosts WHERE id = ?1",
            params![host_id],
            row_to_host,
        )
        .optional()?;
    Ok(host)
}

/// Stamp the end of a successful install.
pub fn mark_installed(conn: &Connection, host_id: i64) -> Result<()> {
    let updated = conn.execute(
        "UPDATE analyzer_hosts SET install_completed = ?1 WHERE id = ?2",
        params![format_datetime(&Utc::now()), host_id],
    )?;
    if updated == 0 {
        anyhow::bail!("Analyzer host {} does not exist", host_id);
    }
    Ok(())
}

pub struct HostService {
    store: SqliteStore,
    events: Arc<EventBus>,
}

impl HostService {
    pub fn new(store: SqliteStore, events: Arc<EventBus>) -> Self {
        Self { store, events }
    }

    pub fn create_host(&self, host: &NewAnalyzerHost) -> Result<AnalyzerHost> {
        self.store.atomic(|uow| self.create_host_in(uow, host))
    }

    /// Insert a host as part of a caller-managed transaction.
    pub fn create_host_in(
        &self,
        uow: &mut UnitOfWork<'_>,
        host: &NewAnalyzerHost,
    ) -> Result<AnalyzerHost> {
        uow.execute(
            "INSERT INTO analyzer_hosts (name, url, api_key, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                host.name,
                host.url.trim_end_matches('/'),
                host.api_key,
                format_datetime(&Utc::now())
            ],
        )
        .with_context(|| format!("Failed to insert analyzer host {}", host.name))?;
        let host_id = uow.last_insert_rowid();
        info!("Created analyzer host {} ({})", host.name, host_id);

        self.events.emit(
            EntityEvent::HostSaved {
                host_id,
                created: true,
            },
            uow,
        )?;

        get_host(uow, host_id)?.context("Analyzer host missing right after insert")
    }

    /// Persist changes to an existing host. Never counts as a creation.
    pub fn update_host(&self, host: &AnalyzerHost) -> Result<()> {
        self.store.atomic(|uow| {
            let updated = uow.execute(
                "UPDATE analyzer_hosts SET name = ?1, url = ?2, api_key = ?3 WHERE id = ?4",
                params![
                    host.name,
                    host.url.trim_end_matches('/'),
                    host.api_key,
                    host.id
                ],
            )?;
            if updated == 0 {
                anyhow::bail!("Analyzer host {} does not exist", host.id);
            }
            self.events.emit(
                EntityEvent::HostSaved {
                    host_id: host.id,
                    created: false,
                },
                uow,
            )
        })
    }

    /// Delete a host and, through the cascade, the tasks it installed.
    pub fn delete_host(&self, host_id: i64) -> Result<bool> {
        self.store.atomic(|uow| {
            let deleted = uow.execute(
                "DELETE FROM analyzer_hosts WHERE id = ?1",
                params![host_id],
            )?;
            if deleted > 0 {
                self.events.emit(EntityEvent::HostDeleted { host_id }, uow)?;
            }
            Ok(deleted > 0)
        })
    }

    pub fn get_host(&self, host_id: i64) -> Result<Option<AnalyzerHost>> {
        self.store.read(|conn| get_host(conn, host_id))
    }
}
