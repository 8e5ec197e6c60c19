//! Database schema for health.db.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema};

const HEALTH_RECORDS_TABLE_V0: Table = Table {
    name: "health_records",
    columns: &[
        sqlite_column!(
            "file_path",
            &SqlType::Text,
            is_primary_key = true,
            non_null = true
        ),
        sqlite_column!("library_path", &SqlType::Text),
        sqlite_column!("source_nzb_path", &SqlType::Text),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("priority", &SqlType::Integer, non_null = true, default_value = Some("1")),
        sqlite_column!("retry_count", &SqlType::Integer, non_null = true, default_value = Some("0")),
        sqlite_column!("max_retries", &SqlType::Integer, non_null = true, default_value = Some("2")),
        sqlite_column!(
            "repair_retry_count",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "max_repair_retries",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("3")
        ),
        sqlite_column!("scheduled_check_at", &SqlType::Integer, non_null = true),
        sqlite_column!("last_checked_at", &SqlType::Integer),
        sqlite_column!("error_details", &SqlType::Text),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
        sqlite_column!("updated_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[
        (
            "idx_health_records_claim",
            "status, scheduled_check_at, priority",
        ),
        ("idx_health_records_source", "source_nzb_path"),
    ],
};

pub const HEALTH_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[HEALTH_RECORDS_TABLE_V0],
    migration: None,
}];
