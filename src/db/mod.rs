pub mod migrations;
pub mod models;
pub mod repos;

use r2d2::{CustomizeConnection, Pool};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use std::path::{Path, PathBuf};

use crate::error::AppError;
use models::BOT_SETTINGS_ID;

pub type DbPool = Pool<SqliteConnectionManager>;

/// File name of the run database inside `<data_dir>/data`.
pub const DB_FILE_NAME: &str = "mythic_runs.db";

/// Connection customizer that sets per-connection SQLite pragmas.
#[derive(Debug)]
struct SqlitePragmaCustomizer;

impl CustomizeConnection<rusqlite::Connection, rusqlite::Error> for SqlitePragmaCustomizer {
    fn on_acquire(&self, conn: &mut rusqlite::Connection) -> Result<(), rusqlite::Error> {
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -8000;",
        )?;
        Ok(())
    }
}

pub fn db_path(data_dir: &Path) -> PathBuf {
    data_dir.join("data").join(DB_FILE_NAME)
}

/// Initialize the database: create file, enable WAL + foreign keys, run migrations, seed settings.
pub fn init_db(data_dir: &Path) -> Result<DbPool, AppError> {
    let db_path = db_path(data_dir);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::info!(path = %db_path.display(), "Initializing database");

    let manager = SqliteConnectionManager::file(&db_path);
    let pool = Pool::builder()
        .max_size(4)
        .connection_customizer(Box::new(SqlitePragmaCustomizer))
        .build(manager)?;

    // WAL is database-wide, only needs to run once
    {
        let conn = pool.get()?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        tracing::debug!("SQLite pragmas configured (WAL, FK, busy_timeout)");
    }

    {
        let conn = pool.get()?;
        migrations::run(&conn)?;
        seed_bot_settings(&conn)?;
    }

    tracing::info!("Database initialized successfully");
    Ok(pool)
}

/// Seed the singleton settings row. Existing settings are left untouched.
fn seed_bot_settings(conn: &rusqlite::Connection) -> Result<(), AppError> {
    let now = chrono::Utc::now().timestamp_millis();
    let dungeons = serde_json::to_string(&DEFAULT_DUNGEON_POOL)?;

    let seeded = conn.execute(
        "INSERT OR IGNORE INTO bot_settings
         (id, current_season_id, current_season_name, default_region, default_realm,
          active_dungeons, beta_channel, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
        params![
            BOT_SETTINGS_ID,
            DEFAULT_SEASON_ID,
            DEFAULT_SEASON_NAME,
            "eu",
            "",
            dungeons,
            now
        ],
    )?;

    if seeded > 0 {
        tracing::info!(season = DEFAULT_SEASON_NAME, "Seeded default bot settings");
    }
    Ok(())
}

const DEFAULT_SEASON_ID: i64 = 15;
const DEFAULT_SEASON_NAME: &str = "season-tww-3";
const DEFAULT_DUNGEON_POOL: [&str; 8] = [
    "Ara-Kara, City of Echoes",
    "The Dawnbreaker",
    "Eco-Dome Al'dani",
    "Halls of Atonement",
    "Operation: Floodgate",
    "Priory of the Sacred Flame",
    "Tazavesh: So'leah's Gambit",
    "Tazavesh: Streets of Wonder",
];

#[cfg(test)]
pub fn init_test_db() -> Result<DbPool, AppError> {
    use std::time::Duration;

    // Use a unique temp file for each test to avoid in-memory connection issues with r2d2.
    let tmp = std::env::temp_dir().join(format!("mplus_test_{}.db", uuid::Uuid::new_v4()));
    let manager = SqliteConnectionManager::file(&tmp);
    let pool = Pool::builder()
        .max_size(2)
        .connection_timeout(Duration::from_secs(5))
        .connection_customizer(Box::new(SqlitePragmaCustomizer))
        .build(manager)?;

    let conn = pool.get()?;
    migrations::run(&conn)?;
    seed_bot_settings(&conn)?;
    drop(conn);
    Ok(pool)
}
