//! Offline data loading: bulk run records (JSON) and whole-database
//! replacement from another SQLite file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::db::models::{normalize_realm, CharacterIdentity, InsertOutcome, NewRun};
use crate::db::repos::{characters, runs, settings};
use crate::db::{db_path, DbPool};
use crate::engine::spec_resolver::role_for_spec;
use crate::error::AppError;
use crate::validation;

/// One run as it appears in an import file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRecord {
    pub character: String,
    pub realm: String,
    pub region: String,
    pub dungeon: String,
    pub mythic_level: i64,
    /// RFC 3339.
    pub completed_at: String,
    #[serde(default)]
    pub clear_time_ms: i64,
    pub keystone_run_id: Option<i64>,
    /// Derived from `num_keystone_upgrades` when absent.
    pub timed: Option<bool>,
    #[serde(default)]
    pub num_keystone_upgrades: i64,
    #[serde(default)]
    pub score: f64,
    pub spec_name: Option<String>,
    #[serde(default)]
    pub affixes: Vec<String>,
    pub season: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowError {
    pub index: usize,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub inserted: u32,
    pub updated: u32,
    pub skipped: u32,
    pub errors: Vec<RowError>,
}

fn validate_record(record: &ImportRecord, default_season: Option<&str>) -> Result<(CharacterIdentity, NewRun), AppError> {
    validation::require_non_empty("character", &record.character)?;
    validation::require_non_empty("realm", &normalize_realm(&record.realm))?;
    validation::require_non_empty("region", &record.region)?;
    validation::require_non_empty("dungeon", &record.dungeon)?;
    validation::require_range("mythic_level", record.mythic_level, 2, 40)?;
    validation::require_range("num_keystone_upgrades", record.num_keystone_upgrades, 0, 3)?;
    let completed_timestamp = validation::parse_timestamp_ms("completed_at", &record.completed_at)?;

    let spec_name = record.spec_name.clone().filter(|s| !s.trim().is_empty());
    let run = NewRun {
        dungeon: record.dungeon.trim().to_string(),
        mythic_level: record.mythic_level as i32,
        completed_timestamp,
        clear_time_ms: record.clear_time_ms.max(0),
        keystone_run_id: record.keystone_run_id,
        timed: record.timed.unwrap_or(record.num_keystone_upgrades > 0),
        score: record.score,
        num_keystone_upgrades: record.num_keystone_upgrades as i32,
        spec_role: spec_name.as_deref().map(role_for_spec),
        spec_name,
        affixes: record.affixes.clone(),
        season: record.season.clone().or_else(|| default_season.map(str::to_string)),
    };
    let identity = CharacterIdentity::new(record.character.trim(), record.realm.trim(), record.region.trim());
    Ok((identity, run))
}

/// Validate and insert `records` through the normal dedup path.
///
/// Invalid rows are reported with their index and do not stop the import;
/// a persistence failure does.
pub fn import_runs(pool: &DbPool, records: &[ImportRecord]) -> Result<ImportReport, AppError> {
    let default_season = settings::get(pool)?.season_name;
    let mut report = ImportReport::default();

    for (index, record) in records.iter().enumerate() {
        let (identity, run) = match validate_record(record, Some(&default_season)) {
            Ok(v) => v,
            Err(e) => {
                report.errors.push(RowError {
                    index,
                    message: e.to_string(),
                });
                continue;
            }
        };

        let character_id = characters::get_or_create(pool, &identity)?;
        match runs::insert(pool, character_id, &run)? {
            InsertOutcome::Inserted(_) => report.inserted += 1,
            InsertOutcome::Updated(_) => report.updated += 1,
            InsertOutcome::Duplicate(_) => report.skipped += 1,
        }
    }

    tracing::info!(
        records = records.len(),
        inserted = report.inserted,
        updated = report.updated,
        skipped = report.skipped,
        invalid = report.errors.len(),
        "Run import finished"
    );
    Ok(report)
}

/// Import a JSON array of run records from `path`.
pub fn import_runs_file(pool: &DbPool, path: &Path) -> Result<ImportReport, AppError> {
    let text = std::fs::read_to_string(path)?;
    let records: Vec<ImportRecord> = serde_json::from_str(&text)?;
    import_runs(pool, &records)
}

const COPY_PAGES_PER_STEP: std::os::raw::c_int = 256;
const COPY_STEP_PAUSE: Duration = Duration::from_millis(5);

/// Replace the run database with `source`, keeping a timestamped backup of
/// the current contents next to it. Returns the backup path, if one was made.
///
/// Both copies go through SQLite's online backup, so pages still sitting in
/// the target's write-ahead log are included and no stale `-wal` file is
/// left to replay over the imported data.
pub fn import_database(source: &Path, data_dir: &Path) -> Result<Option<PathBuf>, AppError> {
    if !source.is_file() {
        return Err(AppError::NotFound(format!("import source {}", source.display())));
    }
    let source_conn = open_source_database(source)?;

    let target = db_path(data_dir);
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let backup = if target.exists() {
        let name = format!("mythic_runs_backup_{}.db", chrono::Local::now().format("%Y%m%d_%H%M%S"));
        let backup = target.with_file_name(name);
        let current = rusqlite::Connection::open(&target)?;
        copy_database(&current, &backup)?;
        tracing::info!(backup = %backup.display(), "Existing database backed up");
        Some(backup)
    } else {
        None
    };

    copy_database(&source_conn, &target)?;
    let conn = rusqlite::Connection::open(&target)?;
    conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;

    tracing::info!(source = %source.display(), target = %target.display(), "Database imported");
    Ok(backup)
}

fn copy_database(from: &rusqlite::Connection, to: &Path) -> Result<(), AppError> {
    let mut dest = rusqlite::Connection::open(to)?;
    let backup = rusqlite::backup::Backup::new(from, &mut dest)?;
    backup.run_to_completion(COPY_PAGES_PER_STEP, COPY_STEP_PAUSE, None)?;
    Ok(())
}

fn open_source_database(source: &Path) -> Result<rusqlite::Connection, AppError> {
    let not_sqlite = |e: rusqlite::Error| AppError::Validation(format!("{} is not a SQLite database: {e}", source.display()));
    let conn = rusqlite::Connection::open_with_flags(source, rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY)
        .map_err(not_sqlite)?;
    let tables: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'mythic_runs'",
            [],
            |row| row.get(0),
        )
        .map_err(not_sqlite)?;
    if tables == 0 {
        return Err(AppError::Validation(format!(
            "{} has no mythic_runs table",
            source.display()
        )));
    }
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_test_db;
    use crate::db::models::{Role, RunFilter};

    fn record(character: &str, dungeon: &str, level: i64, completed_at: &str) -> ImportRecord {
        ImportRecord {
            character: character.into(),
            realm: "Silvermoon".into(),
            region: "eu".into(),
            dungeon: dungeon.into(),
            mythic_level: level,
            completed_at: completed_at.into(),
            clear_time_ms: 1_750_000,
            keystone_run_id: None,
            timed: None,
            num_keystone_upgrades: 1,
            score: 240.0,
            spec_name: Some("Restoration".into()),
            affixes: vec!["Fortified".into()],
            season: None,
        }
    }

    #[test]
    fn test_import_reports_row_errors_and_dedups() {
        let pool = init_test_db().unwrap();
        let mut rescored = record("Thrall", "The Dawnbreaker", 12, "2024-09-20T19:33:12Z");
        rescored.score = 250.0;
        let records = vec![
            record("Thrall", "The Dawnbreaker", 12, "2024-09-20T19:33:12Z"),
            record("Thrall", "", 12, "2024-09-20T19:33:12Z"),
            record("Thrall", "The Dawnbreaker", 12, "2024-09-20T19:33:12Z"),
            record("Thrall", "Halls of Atonement", 1, "2024-09-21T10:00:00Z"),
            record("Thrall", "Halls of Atonement", 10, "not a date"),
            rescored,
        ];

        let report = import_runs(&pool, &records).unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.updated, 1);
        let bad: Vec<usize> = report.errors.iter().map(|e| e.index).collect();
        assert_eq!(bad, vec![1, 3, 4]);

        let stored = runs::get_by_spec(&pool, "Thrall", None, &RunFilter::new("silvermoon", "eu")).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].spec_role, Some(Role::Healing));
        assert!(stored[0].timed);
        assert_eq!(stored[0].season.as_deref(), Some("season-tww-3"));
    }

    #[test]
    fn test_import_runs_file() {
        let pool = init_test_db().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs.json");
        std::fs::write(
            &path,
            r#"[{"character": "Jaina", "realm": "Silvermoon", "region": "eu",
                 "dungeon": "The Dawnbreaker", "mythicLevel": 14,
                 "completedAt": "2024-09-20T19:33:12.000Z", "numKeystoneUpgrades": 0,
                 "season": "season-tww-2"}]"#,
        )
        .unwrap();

        let report = import_runs_file(&pool, &path).unwrap();
        assert_eq!(report.inserted, 1);
        let stored = runs::get_by_spec(&pool, "Jaina", None, &RunFilter::new("silvermoon", "eu")).unwrap();
        assert!(!stored[0].timed);
        assert!(stored[0].spec_name.is_none());
        assert_eq!(stored[0].season.as_deref(), Some("season-tww-2"));

        std::fs::write(&path, "{").unwrap();
        assert!(matches!(import_runs_file(&pool, &path), Err(AppError::Serde(_))));
    }

    #[test]
    fn test_import_database_backs_up_existing() {
        let source_dir = tempfile::tempdir().unwrap();
        let data_dir = tempfile::tempdir().unwrap();
        let source = source_dir.path().join("export.db");
        rusqlite::Connection::open(&source)
            .unwrap()
            .execute_batch("CREATE TABLE mythic_runs (id INTEGER PRIMARY KEY)")
            .unwrap();

        // no existing database: nothing to back up
        assert!(import_database(&source, data_dir.path()).unwrap().is_none());
        assert!(db_path(data_dir.path()).is_file());

        let backup = import_database(&source, data_dir.path()).unwrap().unwrap();
        assert!(backup.is_file());
        let name = backup.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("mythic_runs_backup_") && name.ends_with(".db"));
    }

    #[test]
    fn test_import_database_keeps_uncheckpointed_runs() {
        let source_dir = tempfile::tempdir().unwrap();
        let data_dir = tempfile::tempdir().unwrap();
        let source = source_dir.path().join("export.db");
        rusqlite::Connection::open(&source)
            .unwrap()
            .execute_batch(
                "CREATE TABLE mythic_runs (id INTEGER PRIMARY KEY, dungeon TEXT NOT NULL);
                 INSERT INTO mythic_runs (dungeon) VALUES ('Ara-Kara'), ('The Stonevault');",
            )
            .unwrap();

        // live pool in WAL mode, runs not yet checkpointed
        let pool = crate::db::init_db(data_dir.path()).unwrap();
        let character_id = characters::get_or_create(&pool, &CharacterIdentity::new("Thrall", "Silvermoon", "eu")).unwrap();
        for ts in 0..5 {
            runs::insert(&pool, character_id, &runs::tests::new_run("The Dawnbreaker", 10, 1_700_000_000_000 + ts)).unwrap();
        }

        let backup = import_database(&source, data_dir.path()).unwrap().unwrap();
        drop(pool);

        let saved: i64 = rusqlite::Connection::open(&backup)
            .unwrap()
            .query_row("SELECT COUNT(*) FROM mythic_runs", [], |row| row.get(0))
            .unwrap();
        assert_eq!(saved, 5);

        let target = db_path(data_dir.path());
        let conn = rusqlite::Connection::open(&target).unwrap();
        let check: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0)).unwrap();
        assert_eq!(check, "ok");
        let dungeons: Vec<String> = conn
            .prepare("SELECT dungeon FROM mythic_runs ORDER BY id")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(dungeons, vec!["Ara-Kara", "The Stonevault"]);
    }

    #[test]
    fn test_import_rejects_realm_that_normalizes_to_nothing() {
        let pool = init_test_db().unwrap();
        let mut bad_realm = record("Thrall", "The Dawnbreaker", 12, "2024-09-20T19:33:12Z");
        bad_realm.realm = "'".into();

        let report = import_runs(&pool, &[bad_realm]).unwrap();
        assert_eq!(report.inserted, 0);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].index, 0);
        assert!(characters::get_all(&pool).unwrap().is_empty());
    }

    #[test]
    fn test_import_database_rejects_bad_sources() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = tempfile::tempdir().unwrap();

        let missing = dir.path().join("missing.db");
        assert!(matches!(import_database(&missing, data_dir.path()), Err(AppError::NotFound(_))));

        let text = dir.path().join("notes.db");
        std::fs::write(&text, "definitely not sqlite, just some text padding it out").unwrap();
        assert!(matches!(import_database(&text, data_dir.path()), Err(AppError::Validation(_))));

        let other = dir.path().join("other.db");
        rusqlite::Connection::open(&other)
            .unwrap()
            .execute_batch("CREATE TABLE notes (id INTEGER)")
            .unwrap();
        assert!(matches!(import_database(&other, data_dir.path()), Err(AppError::Validation(_))));
        assert!(!db_path(data_dir.path()).exists());
    }
}
