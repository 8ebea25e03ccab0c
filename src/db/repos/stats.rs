use rusqlite::params;

use crate::db::models::StoreStats;
use crate::db::DbPool;
use crate::error::AppError;

/// Store-wide counters. `season = None` counts every season.
pub fn get(pool: &DbPool, season: Option<&str>) -> Result<StoreStats, AppError> {
    let conn = pool.get()?;

    let (run_count, character_count): (i64, i64) = conn.query_row(
        "SELECT COUNT(*), COUNT(DISTINCT character_id) FROM mythic_runs
         WHERE ?1 IS NULL OR season = ?1",
        params![season],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;

    let latest_run_timestamp: Option<i64> = conn.query_row(
        "SELECT MAX(completed_timestamp) FROM mythic_runs WHERE ?1 IS NULL OR season = ?1",
        params![season],
        |row| row.get(0),
    )?;

    let storage_size_bytes: i64 = conn.query_row(
        "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
        [],
        |row| row.get(0),
    )?;

    Ok(StoreStats {
        character_count,
        run_count,
        latest_run_timestamp,
        storage_size_bytes,
    })
}
