//! SQLite schema definitions for the analyzer database.
//!
//! Hosts, the task registry, analyses and their permissions live here, together with
//! the history of chain stage executions.

use crate::sqlite_column;
use crate::sqlite_persistence::{ForeignKey, ForeignKeyOnChange, SqlType, Table, VersionedSchema};

// =============================================================================
// Version 1 - Hosts, task registry, analyses, permissions
// =============================================================================

/// Remote analysis engines. Creating one triggers the install chain.
const ANALYZER_HOSTS_TABLE_V1: Table = Table {
    name: "analyzer_hosts",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("name", &SqlType::Text, non_null = true),
        sqlite_column!("url", &SqlType::Text, non_null = true),
        sqlite_column!("api_key", &SqlType::Text),
        sqlite_column!("created_at", &SqlType::Text, non_null = true),
        sqlite_column!("install_completed", &SqlType::Text),
    ],
    indices: &[],
    unique_constraints: &[],
};

const HOST_FK: ForeignKey = ForeignKey {
    foreign_table: "analyzer_hosts",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::Cascade,
};

/// Registry of invocable analyzer tasks. `task_name` is an optional synonym for `id`.
const REGISTERED_TASKS_TABLE_V1: Table = Table {
    name: "registered_tasks",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("task_name", &SqlType::Text),
        sqlite_column!("description", &SqlType::Text),
        sqlite_column!("host_id", &SqlType::Integer, foreign_key = Some(&HOST_FK)),
        sqlite_column!("created_at", &SqlType::Text, non_null = true),
    ],
    indices: &[
        ("idx_registered_tasks_task_name", "task_name"),
        ("idx_registered_tasks_host_id", "host_id"),
    ],
    unique_constraints: &[],
};

const ANALYZER_FK: ForeignKey = ForeignKey {
    foreign_table: "registered_tasks",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::Cascade,
};

const ANALYSES_TABLE_V1: Table = Table {
    name: "analyses",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!(
            "analyzer_id",
            &SqlType::Text,
            non_null = true,
            foreign_key = Some(&ANALYZER_FK)
        ),
        sqlite_column!("corpus_id", &SqlType::Integer),
        sqlite_column!("creator_id", &SqlType::Integer, non_null = true),
        sqlite_column!("corpus_action_id", &SqlType::Integer),
        sqlite_column!("analysis_started", &SqlType::Text, non_null = true),
        sqlite_column!("analysis_completed", &SqlType::Text),
    ],
    indices: &[
        ("idx_analyses_analyzer_id", "analyzer_id"),
        ("idx_analyses_creator_id", "creator_id"),
    ],
    unique_constraints: &[],
};

const ANALYSIS_FK: ForeignKey = ForeignKey {
    foreign_table: "analyses",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::Cascade,
};

const ANALYSIS_DOCUMENTS_TABLE_V1: Table = Table {
    name: "analysis_documents",
    columns: &[
        sqlite_column!(
            "analysis_id",
            &SqlType::Integer,
            non_null = true,
            foreign_key = Some(&ANALYSIS_FK)
        ),
        sqlite_column!("document_id", &SqlType::Integer, non_null = true),
    ],
    indices: &[],
    unique_constraints: &[&["analysis_id", "document_id"]],
};

const OBJECT_PERMISSIONS_TABLE_V1: Table = Table {
    name: "object_permissions",
    columns: &[
        sqlite_column!("user_id", &SqlType::Integer, non_null = true),
        sqlite_column!("object_type", &SqlType::Text, non_null = true),
        sqlite_column!("object_id", &SqlType::Text, non_null = true),
        sqlite_column!("permission", &SqlType::Integer, non_null = true),
    ],
    indices: &[("idx_object_permissions_object", "object_type, object_id")],
    unique_constraints: &[&["user_id", "object_type", "object_id", "permission"]],
};

// =============================================================================
// Version 2 - Chain stage run history
// =============================================================================

const CHAIN_STAGE_RUNS_TABLE_V2: Table = Table {
    name: "chain_stage_runs",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("chain_id", &SqlType::Text, non_null = true),
        sqlite_column!("stage_index", &SqlType::Integer, non_null = true),
        sqlite_column!("stage_name", &SqlType::Text, non_null = true),
        sqlite_column!("started_at", &SqlType::Text, non_null = true),
        sqlite_column!("finished_at", &SqlType::Text),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("error_message", &SqlType::Text),
        sqlite_column!("triggered_by", &SqlType::Text, non_null = true),
    ],
    indices: &[
        ("idx_chain_stage_runs_chain_id", "chain_id, stage_index"),
        ("idx_chain_stage_runs_status", "status"),
    ],
    unique_constraints: &[],
};

fn migrate_v1_to_v2(conn: &rusqlite::Connection) -> anyhow::Result<()> {
    CHAIN_STAGE_RUNS_TABLE_V2.create(conn)
}

/// All versioned schemas for the analyzer database.
///
/// Version 1: hosts, task registry, analyses, permissions
/// Version 2: chain stage run history
pub const ANALYZER_VERSIONED_SCHEMAS: &[VersionedSchema] = &[
    VersionedSchema {
        version: 1,
        tables: &[
            ANALYZER_HOSTS_TABLE_V1,
            REGISTERED_TASKS_TABLE_V1,
            ANALYSES_TABLE_V1,
            ANALYSIS_DOCUMENTS_TABLE_V1,
            OBJECT_PERMISSIONS_TABLE_V1,
        ],
        migration: None,
    },
    VersionedSchema {
        version: 2,
        tables: &[
            ANALYZER_HOSTS_TABLE_V1,
            REGISTERED_TASKS_TABLE_V1,
            ANALYSES_TABLE_V1,
            ANALYSIS_DOCUMENTS_TABLE_V1,
            OBJECT_PERMISSIONS_TABLE_V1,
            CHAIN_STAGE_RUNS_TABLE_V2,
        ],
        migration: Some(migrate_v1_to_v2),
    },
];
