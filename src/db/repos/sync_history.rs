use rusqlite::{params, OptionalExtension, Row};

use crate::db::models::{SyncHistoryEntry, SyncType};
use crate::db::DbPool;
use crate::error::AppError;

fn row_to_entry(row: &Row) -> rusqlite::Result<SyncHistoryEntry> {
    Ok(SyncHistoryEntry {
        timestamp: row.get("timestamp")?,
        sync_type: SyncType::parse(&row.get::<_, String>("sync_type")?),
        runs_added: row.get("runs_added")?,
        characters_processed: row.get("characters_processed")?,
        duration_ms: row.get("duration_ms")?,
        success: row.get::<_, i64>("success")? != 0,
        error_message: row.get("error_message")?,
    })
}

pub fn add(pool: &DbPool, entry: &SyncHistoryEntry) -> Result<(), AppError> {
    let conn = pool.get()?;
    conn.execute(
        "INSERT INTO sync_history
         (timestamp, sync_type, runs_added, characters_processed, duration_ms, success, error_message)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            entry.timestamp,
            entry.sync_type.as_str(),
            entry.runs_added,
            entry.characters_processed,
            entry.duration_ms,
            entry.success as i32,
            entry.error_message,
        ],
    )?;
    Ok(())
}

/// Most recent entries first. Defaults to the last 4 passes.
pub fn get_recent(pool: &DbPool, limit: Option<i64>) -> Result<Vec<SyncHistoryEntry>, AppError> {
    let limit = limit.unwrap_or(4);
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT * FROM sync_history ORDER BY timestamp DESC, id DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map(params![limit], row_to_entry)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(AppError::Database)
}

/// Time of the last successful pass as RFC 3339, if any.
pub fn get_last_success(pool: &DbPool) -> Result<Option<String>, AppError> {
    let conn = pool.get()?;
    let ts: Option<i64> = conn
        .query_row(
            "SELECT timestamp FROM sync_history WHERE success = 1 ORDER BY timestamp DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?;

    Ok(ts
        .and_then(chrono::DateTime::from_timestamp_millis)
        .map(|dt| dt.to_rfc3339()))
}
