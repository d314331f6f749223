//! Analysis records.
//!
//! Creation is all-or-nothing: the record, the creator's permissions and the document
//! links are written in one transaction, and any failure is logged and returned to the
//! caller with nothing persisted.

use crate::metrics;
use crate::permissions::{grant_full_control, ProtectedObject};
use crate::store::{
    format_datetime, get_task, parse_datetime, parse_optional_datetime, AnalysisRecord,
    SqliteStore,
};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Analyzer {0} is not registered")]
    UnknownAnalyzer(String),
    #[error("Analysis {0} not found")]
    NotFound(i64),
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("{0:#}")]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Default)]
pub struct AnalysisRequest {
    pub analyzer_id: String,
    pub creator_id: i64,
    pub corpus_id: Option<i64>,
    pub corpus_action_id: Option<i64>,
    pub document_ids: Vec<i64>,
}

/// Create an analysis, grant its creator full control and link its documents.
pub fn create_and_setup_analysis(
    store: &SqliteStore,
    request: &AnalysisRequest,
) -> Result<AnalysisRecord, AnalysisError> {
    let result = store.atomic(|uow| -> Result<AnalysisRecord, AnalysisError> {
        if get_task(uow, &request.analyzer_id)?.is_none() {
            return Err(AnalysisError::UnknownAnalyzer(request.analyzer_id.clone()));
        }

        uow.execute(
            "INSERT INTO analyses (analyzer_id, corpus_id, creator_id, corpus_action_id, analysis_started)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                request.analyzer_id,
                request.corpus_id,
                request.creator_id,
                request.corpus_action_id,
                format_datetime(&Utc::now())
            ],
        )?;
        let analysis_id = uow.last_insert_rowid();

        grant_full_control(uow, request.creator_id, ProtectedObject::Analysis(analysis_id))?;

        {
            let mut stmt = uow.prepare(
                "INSERT OR IGNORE INTO analysis_documents (analysis_id, document_id) VALUES (?1, ?2)",
            )?;
            for document_id in &request.document_ids {
                stmt.execute(params![analysis_id, document_id])?;
            }
        }

        load_analysis(uow, analysis_id)?.ok_or(AnalysisError::NotFound(analysis_id))
    });

    match result {
        Ok(record) => {
            info!(
                "Created analysis {} with analyzer {} for user {}",
                record.id, record.analyzer_id, record.creator_id
            );
            metrics::record_analysis("created");
            Ok(record)
        }
        Err(e) => {
            error!(
                "Failed to create analysis with analyzer {} for user {} (corpus {:?}, {} documents): {}",
                request.analyzer_id,
                request.creator_id,
                request.corpus_id,
                request.document_ids.len(),
                e
            );
            metrics::record_analysis("failed");
            Err(e)
        }
    }
}

/// Stamp the completion time of an analysis.
pub fn complete_analysis(
    store: &SqliteStore,
    analysis_id: i64,
) -> Result<AnalysisRecord, AnalysisError> {
    store.atomic(|uow| -> Result<AnalysisRecord, AnalysisError> {
        let updated = uow.execute(
            "UPDATE analyses SET analysis_completed = ?1 WHERE id = ?2",
            params![format_datetime(&Utc::now()), analysis_id],
        )?;
        if updated == 0 {
            return Err(AnalysisError::NotFound(analysis_id));
        }
        load_analysis(uow, analysis_id)?.ok_or(AnalysisError::NotFound(analysis_id))
    })
}

pub fn get_analysis(
    store: &SqliteStore,
    analysis_id: i64,
) -> Result<Option<AnalysisRecord>, AnalysisError> {
    Ok(store.read(|conn| Ok(load_analysis(conn, analysis_id)?))?)
}

fn load_analysis(
    conn: &Connection,
    analysis_id: i64,
) -> Result<Option<AnalysisRecord>, rusqlite::Error> {
    let record = conn
        .query_row(
            "SELECT id, analyzer_id, corpus_id, creator_id, corpus_action_id, analysis_started, analysis_completed
             FROM analyses WHERE id = ?1",
            params![analysis_id],
            |row| {
                let started: String = row.get("analysis_started")?;
                Ok(AnalysisRecord {
                    id: row.get("id")?,
                    analyzer_id: row.get("analyzer_id")?,
                    corpus_id: row.get("corpus_id")?,
                    creator_id: row.get("creator_id")?,
                    corpus_action_id: row.get("corpus_action_id")?,
                    analysis_started: parse_datetime(&started),
                    analysis_completed: parse_optional_datetime(row.get("analysis_completed")?),
                    analyzed_documents: Vec::new(),
                })
            },
        )
        .optional()?;

    let Some(mut record) = record else {
        return Ok(None);
    };
    let mut stmt = conn.prepare(
        "SELECT document_id FROM analysis_documents WHERE analysis_id = ?1 ORDER BY document_id",
    )?;
    record.analyzed_documents = stmt
        .query_map(params![analysis_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<i64>>>()?;
    Ok(Some(record))
}
