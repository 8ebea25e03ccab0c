use rusqlite::{params, Connection};

use crate::error::AppError;

/// A numbered schema step. Steps are applied in order, each at most once,
/// and the highest applied number is recorded in `schema_version`.
struct Migration {
    version: i64,
    name: &'static str,
    apply: fn(&Connection) -> Result<(), AppError>,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "base_schema",
        apply: base_schema,
    },
    Migration {
        version: 2,
        name: "bot_settings_realm_and_channel",
        apply: bot_settings_realm_and_channel,
    },
    Migration {
        version: 3,
        name: "sync_history",
        apply: sync_history,
    },
];

/// Apply every pending migration. Safe to call on every startup, including
/// against databases imported from older bot versions that predate
/// `schema_version`.
pub fn run(conn: &Connection) -> Result<(), AppError> {
    tracing::debug!("Running database migrations");

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version     INTEGER PRIMARY KEY,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL
        );",
    )?;

    let current = current_version(conn)?;
    let mut applied = 0;

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        conn.execute_batch("BEGIN IMMEDIATE;")?;
        let result = (migration.apply)(conn).and_then(|_| {
            conn.execute(
                "INSERT INTO schema_version (version, name, applied_at) VALUES (?1, ?2, ?3)",
                params![
                    migration.version,
                    migration.name,
                    chrono::Utc::now().timestamp_millis()
                ],
            )?;
            Ok(())
        });

        match result {
            Ok(()) => {
                conn.execute_batch("COMMIT;")?;
                applied += 1;
                tracing::info!(version = migration.version, name = migration.name, "Applied migration");
            }
            Err(e) => {
                let _ = conn.execute_batch("ROLLBACK;");
                tracing::error!(version = migration.version, name = migration.name, "Migration failed: {}", e);
                return Err(e);
            }
        }
    }

    tracing::info!(
        version = current_version(conn)?,
        applied,
        "Database migrations complete"
    );
    Ok(())
}

pub fn current_version(conn: &Connection) -> Result<i64, AppError> {
    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool, AppError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2",
        params![table, column],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn has_table(conn: &Connection, table: &str) -> Result<bool, AppError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn base_schema(conn: &Connection) -> Result<(), AppError> {
    conn.execute_batch(BASE_SCHEMA)?;
    Ok(())
}

fn bot_settings_realm_and_channel(conn: &Connection) -> Result<(), AppError> {
    if !has_column(conn, "bot_settings", "default_realm")? {
        conn.execute_batch("ALTER TABLE bot_settings ADD COLUMN default_realm TEXT NOT NULL DEFAULT '';")?;
        tracing::info!("Added default_realm column to bot_settings");
    }
    if !has_column(conn, "bot_settings", "beta_channel")? {
        conn.execute_batch("ALTER TABLE bot_settings ADD COLUMN beta_channel INTEGER NOT NULL DEFAULT 0;")?;
        tracing::info!("Added beta_channel column to bot_settings");
    }
    Ok(())
}

fn sync_history(conn: &Connection) -> Result<(), AppError> {
    // Older bots wrote (duration, error) without sync_type; rebuild those tables.
    if has_table(conn, "sync_history")? && !has_column(conn, "sync_history", "sync_type")? {
        tracing::info!("Old sync_history schema detected, recreating");
        conn.execute_batch(
            "ALTER TABLE sync_history RENAME TO sync_history_old;",
        )?;
        conn.execute_batch(SYNC_HISTORY_SCHEMA)?;
        let legacy_cols = (
            has_column(conn, "sync_history_old", "duration")?,
            has_column(conn, "sync_history_old", "error")?,
        );
        let duration = if legacy_cols.0 { "duration" } else { "NULL" };
        let error = if legacy_cols.1 { "error" } else { "NULL" };
        conn.execute_batch(&format!(
            "INSERT INTO sync_history (id, timestamp, success, runs_added, characters_processed, duration_ms, error_message)
             SELECT id, timestamp, success, COALESCE(runs_added, 0), COALESCE(characters_processed, 0), {duration}, {error}
             FROM sync_history_old;
             DROP TABLE sync_history_old;"
        ))?;
        return Ok(());
    }

    conn.execute_batch(SYNC_HISTORY_SCHEMA)?;
    Ok(())
}

const BASE_SCHEMA: &str = r#"

-- ============================================================================
-- Characters
-- ============================================================================

CREATE TABLE IF NOT EXISTS characters (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    name                TEXT NOT NULL COLLATE NOCASE,
    realm               TEXT NOT NULL COLLATE NOCASE,
    region              TEXT NOT NULL COLLATE NOCASE,
    class_name          TEXT,
    active_spec_name    TEXT,
    active_spec_role    TEXT CHECK(active_spec_role IN ('TANK', 'HEALING', 'DPS')),
    created_at          INTEGER NOT NULL,
    updated_at          INTEGER NOT NULL,
    UNIQUE(name, realm, region)
);

-- ============================================================================
-- Mythic+ runs
-- ============================================================================

CREATE TABLE IF NOT EXISTS mythic_runs (
    id                      INTEGER PRIMARY KEY AUTOINCREMENT,
    character_id            INTEGER NOT NULL REFERENCES characters(id) ON DELETE CASCADE,
    dungeon                 TEXT NOT NULL,
    mythic_level            INTEGER NOT NULL CHECK(mythic_level >= 2),
    completed_timestamp     INTEGER NOT NULL,
    clear_time_ms           INTEGER NOT NULL DEFAULT 0,
    keystone_run_id         INTEGER,
    timed                   INTEGER NOT NULL DEFAULT 0,
    score                   REAL NOT NULL DEFAULT 0,
    num_keystone_upgrades   INTEGER NOT NULL DEFAULT 0,
    spec_name               TEXT,
    spec_role               TEXT,
    affixes                 TEXT NOT NULL DEFAULT '[]',
    season                  TEXT,
    created_at              INTEGER NOT NULL,
    UNIQUE(character_id, dungeon, mythic_level, completed_timestamp)
);
CREATE INDEX IF NOT EXISTS idx_runs_character_completed ON mythic_runs(character_id, completed_timestamp DESC);
CREATE INDEX IF NOT EXISTS idx_runs_season              ON mythic_runs(season);
CREATE INDEX IF NOT EXISTS idx_runs_spec                ON mythic_runs(character_id, spec_name);

-- ============================================================================
-- Bot settings (singleton, id = 1)
-- ============================================================================

CREATE TABLE IF NOT EXISTS bot_settings (
    id                      INTEGER PRIMARY KEY CHECK(id = 1),
    current_season_id       INTEGER NOT NULL,
    current_season_name     TEXT NOT NULL,
    default_region          TEXT NOT NULL DEFAULT 'eu',
    active_dungeons         TEXT NOT NULL DEFAULT '[]',
    updated_at              INTEGER NOT NULL
);
"#;

const SYNC_HISTORY_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sync_history (
    id                      INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp               INTEGER NOT NULL,
    sync_type               TEXT NOT NULL DEFAULT 'auto',
    runs_added              INTEGER NOT NULL DEFAULT 0,
    characters_processed    INTEGER NOT NULL DEFAULT 0,
    duration_ms             INTEGER,
    success                 INTEGER NOT NULL DEFAULT 1,
    error_message           TEXT
);
CREATE INDEX IF NOT EXISTS idx_sync_history_timestamp ON sync_history(timestamp DESC);
"#;
