//! Database schema for import_queue.db.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema, DEFAULT_TIMESTAMP};

// =============================================================================
// Import Queue Table - Version 0
// =============================================================================

const IMPORT_QUEUE_TABLE_V0: Table = Table {
    name: "import_queue",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("source_path", &SqlType::Text, non_null = true),
        sqlite_column!("category", &SqlType::Text),
        sqlite_column!("batch_id", &SqlType::Text),
        sqlite_column!("priority", &SqlType::Integer, non_null = true),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("retry_count", &SqlType::Integer, non_null = true, default_value = Some("0")),
        sqlite_column!("max_retries", &SqlType::Integer, non_null = true, default_value = Some("3")),
        sqlite_column!(
            "created_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
        sqlite_column!(
            "updated_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
        sqlite_column!("started_at", &SqlType::Integer),
        sqlite_column!("completed_at", &SqlType::Integer),
        sqlite_column!("next_attempt_at", &SqlType::Integer),
        sqlite_column!("error_message", &SqlType::Text),
        sqlite_column!("storage_path", &SqlType::Text),
        sqlite_column!("file_size", &SqlType::Integer),
    ],
    indices: &[
        ("idx_import_queue_claim", "status, priority, created_at"),
        ("idx_import_queue_source", "source_path"),
        ("idx_import_queue_batch", "batch_id"),
        ("idx_import_queue_category", "category"),
    ],
};

pub const IMPORT_QUEUE_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[IMPORT_QUEUE_TABLE_V0],
    migration: None,
}];
