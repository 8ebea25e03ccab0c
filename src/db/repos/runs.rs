use rusqlite::types::{ToSql, Type};
use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};

use crate::db::models::{normalize_realm, InsertOutcome, NewRun, Role, Run, RunFilter, SpecRunCount};
use crate::db::DbPool;
use crate::error::AppError;

/// Scores closer than this are the same score.
const SCORE_EPSILON: f64 = 1e-6;

// ============================================================================
// Row mappers
// ============================================================================

fn row_to_run(row: &Row) -> rusqlite::Result<Run> {
    let affixes_json: String = row.get("affixes")?;
    let affixes: Vec<String> = serde_json::from_str(&affixes_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, Type::Text, Box::new(e))
    })?;

    Ok(Run {
        id: row.get("id")?,
        character_id: row.get("character_id")?,
        dungeon: row.get("dungeon")?,
        mythic_level: row.get("mythic_level")?,
        completed_timestamp: row.get("completed_timestamp")?,
        clear_time_ms: row.get("clear_time_ms")?,
        keystone_run_id: row.get("keystone_run_id")?,
        timed: row.get::<_, i64>("timed")? != 0,
        score: row.get("score")?,
        num_keystone_upgrades: row.get("num_keystone_upgrades")?,
        spec_name: row.get("spec_name")?,
        spec_role: row.get::<_, Option<String>>("spec_role")?.map(|r| Role::parse(&r)),
        affixes,
        season: row.get("season")?,
        created_at: row.get("created_at")?,
    })
}

// ============================================================================
// Writes
// ============================================================================

/// Insert a run, collapsing re-observations of the same logical run.
///
/// The dedup key is (character, dungeon, level, completed timestamp); the
/// upstream run id plays no part in it. An existing row is rewritten only
/// when its spec name or score differs from `run`; any other difference
/// (timed flag, upgrades) alone leaves the row untouched.
pub fn insert(pool: &DbPool, character_id: i64, run: &NewRun) -> Result<InsertOutcome, AppError> {
    crate::validation::require_non_empty("dungeon", &run.dungeon)?;
    if run.mythic_level < 2 {
        return Err(AppError::Validation(format!(
            "mythic_level must be at least 2 (got {})",
            run.mythic_level
        )));
    }

    let affixes = serde_json::to_string(&run.affixes)?;
    let mut conn = pool.get()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let existing: Option<(i64, Option<String>, f64)> = tx
        .query_row(
            "SELECT id, spec_name, score FROM mythic_runs
             WHERE character_id = ?1 AND dungeon = ?2 AND mythic_level = ?3 AND completed_timestamp = ?4",
            params![character_id, run.dungeon, run.mythic_level, run.completed_timestamp],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;

    let outcome = match existing {
        None => {
            tx.execute(
                "INSERT INTO mythic_runs
                 (character_id, dungeon, mythic_level, completed_timestamp, clear_time_ms,
                  keystone_run_id, timed, score, num_keystone_upgrades, spec_name, spec_role,
                  affixes, season, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    character_id,
                    run.dungeon,
                    run.mythic_level,
                    run.completed_timestamp,
                    run.clear_time_ms,
                    run.keystone_run_id,
                    run.timed as i32,
                    run.score,
                    run.num_keystone_upgrades,
                    run.spec_name,
                    run.spec_role.map(|r| r.as_str()),
                    affixes,
                    run.season,
                    chrono::Utc::now().timestamp_millis(),
                ],
            )?;
            InsertOutcome::Inserted(tx.last_insert_rowid())
        }
        Some((id, stored_spec, stored_score)) => {
            let spec_changed = stored_spec.as_deref() != run.spec_name.as_deref();
            let score_changed = (stored_score - run.score).abs() > SCORE_EPSILON;

            if spec_changed || score_changed {
                tx.execute(
                    "UPDATE mythic_runs SET
                        spec_name = ?1,
                        spec_role = ?2,
                        score = ?3,
                        timed = ?4,
                        num_keystone_upgrades = ?5,
                        keystone_run_id = COALESCE(keystone_run_id, ?6)
                     WHERE id = ?7",
                    params![
                        run.spec_name,
                        run.spec_role.map(|r| r.as_str()),
                        run.score,
                        run.timed as i32,
                        run.num_keystone_upgrades,
                        run.keystone_run_id,
                        id,
                    ],
                )?;
                InsertOutcome::Updated(id)
            } else {
                InsertOutcome::Duplicate(id)
            }
        }
    };

    tx.commit()?;
    Ok(outcome)
}

// ============================================================================
// Reads
// ============================================================================

/// WHERE clause + params for a character's runs under `filter`.
/// Parameters are numbered from ?1.
fn build_where(
    character_name: &str,
    spec: Option<&str>,
    filter: &RunFilter,
) -> (String, Vec<Box<dyn ToSql>>) {
    let mut clauses: Vec<String> = vec![
        "c.name = ?1".into(),
        "c.realm = ?2".into(),
        "c.region = ?3".into(),
    ];
    let mut values: Vec<Box<dyn ToSql>> = vec![
        Box::new(character_name.trim().to_string()),
        Box::new(normalize_realm(&filter.realm)),
        Box::new(filter.region.trim().to_ascii_lowercase()),
    ];

    if let Some(spec) = spec {
        values.push(Box::new(spec.to_string()));
        clauses.push(format!("r.spec_name = ?{}", values.len()));
    }
    if let Some(ref dungeon) = filter.dungeon {
        values.push(Box::new(dungeon.clone()));
        clauses.push(format!("r.dungeon = ?{}", values.len()));
    }
    if let Some(ref season) = filter.season {
        values.push(Box::new(season.clone()));
        clauses.push(format!("r.season = ?{}", values.len()));
    }
    if let Some(min_level) = filter.min_level {
        values.push(Box::new(min_level));
        clauses.push(format!("r.mythic_level >= ?{}", values.len()));
    }

    (clauses.join(" AND "), values)
}

fn query_runs(
    pool: &DbPool,
    sql: &str,
    values: Vec<Box<dyn ToSql>>,
) -> Result<Vec<Run>, AppError> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(sql)?;
    let params_ref: Vec<&dyn ToSql> = values.iter().map(|p| p.as_ref()).collect();
    let rows = stmt.query_map(params_ref.as_slice(), row_to_run)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(AppError::Database)
}

/// A character's runs, newest first. `spec = None` means every spec.
pub fn get_by_spec(
    pool: &DbPool,
    character_name: &str,
    spec: Option<&str>,
    filter: &RunFilter,
) -> Result<Vec<Run>, AppError> {
    let (clause, mut values) = build_where(character_name, spec, filter);
    let mut sql = format!(
        "SELECT r.* FROM mythic_runs r
         JOIN characters c ON c.id = r.character_id
         WHERE {clause}
         ORDER BY r.completed_timestamp DESC"
    );
    if let Some(limit) = filter.limit {
        values.push(Box::new(limit));
        sql.push_str(&format!(" LIMIT ?{}", values.len()));
    }
    query_runs(pool, &sql, values)
}

/// One run per dungeon: the highest score, most recent on ties.
/// Result is ordered by score descending.
pub fn get_best_per_dungeon(
    pool: &DbPool,
    character_name: &str,
    spec: Option<&str>,
    filter: &RunFilter,
) -> Result<Vec<Run>, AppError> {
    let (clause, mut values) = build_where(character_name, spec, filter);
    let mut sql = format!(
        "SELECT * FROM (
            SELECT r.*, ROW_NUMBER() OVER (
                PARTITION BY r.dungeon
                ORDER BY r.score DESC, r.completed_timestamp DESC
            ) AS rank_in_dungeon
            FROM mythic_runs r
            JOIN characters c ON c.id = r.character_id
            WHERE {clause}
         )
         WHERE rank_in_dungeon = 1
         ORDER BY score DESC, completed_timestamp DESC"
    );
    if let Some(limit) = filter.limit {
        values.push(Box::new(limit));
        sql.push_str(&format!(" LIMIT ?{}", values.len()));
    }
    query_runs(pool, &sql, values)
}

/// Distinct spec names the character has runs on.
pub fn get_available_specs(
    pool: &DbPool,
    character_name: &str,
    filter: &RunFilter,
) -> Result<Vec<String>, AppError> {
    let (clause, values) = build_where(character_name, None, filter);
    let sql = format!(
        "SELECT DISTINCT r.spec_name FROM mythic_runs r
         JOIN characters c ON c.id = r.character_id
         WHERE {clause} AND r.spec_name IS NOT NULL
         ORDER BY r.spec_name ASC"
    );
    let conn = pool.get()?;
    let mut stmt = conn.prepare(&sql)?;
    let params_ref: Vec<&dyn ToSql> = values.iter().map(|p| p.as_ref()).collect();
    let rows = stmt.query_map(params_ref.as_slice(), |row| row.get::<_, String>(0))?;
    rows.collect::<Result<Vec<_>, _>>().map_err(AppError::Database)
}

/// Run counts grouped by spec, most played first.
pub fn get_counts_by_spec(
    pool: &DbPool,
    character_name: &str,
    filter: &RunFilter,
) -> Result<Vec<SpecRunCount>, AppError> {
    let (clause, values) = build_where(character_name, None, filter);
    let sql = format!(
        "SELECT r.spec_name, COUNT(*) AS run_count FROM mythic_runs r
         JOIN characters c ON c.id = r.character_id
         WHERE {clause} AND r.spec_name IS NOT NULL
         GROUP BY r.spec_name
         ORDER BY run_count DESC, r.spec_name ASC"
    );
    let conn = pool.get()?;
    let mut stmt = conn.prepare(&sql)?;
    let params_ref: Vec<&dyn ToSql> = values.iter().map(|p| p.as_ref()).collect();
    let rows = stmt.query_map(params_ref.as_slice(), |row| {
        Ok(SpecRunCount {
            spec_name: row.get(0)?,
            run_count: row.get(1)?,
        })
    })?;
    rows.collect::<Result<Vec<_>, _>>().map_err(AppError::Database)
}

/// Distinct season tags present in the store, newest first.
pub fn get_available_seasons(pool: &DbPool) -> Result<Vec<String>, AppError> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT DISTINCT season FROM mythic_runs WHERE season IS NOT NULL ORDER BY season DESC",
    )?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    rows.collect::<Result<Vec<_>, _>>().map_err(AppError::Database)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::init_test_db;
    use crate::db::models::{CharacterIdentity, CharacterProfile};
    use crate::db::repos::characters;

    pub(crate) fn seed_character(pool: &DbPool, name: &str) -> i64 {
        characters::upsert(
            pool,
            &CharacterIdentity::new(name, "silvermoon", "eu"),
            &CharacterProfile {
                class_name: Some("Death Knight".into()),
                active_spec_name: Some("Blood".into()),
                active_spec_role: Some(Role::Tank),
            },
        )
        .unwrap()
    }

    pub(crate) fn new_run(dungeon: &str, level: i32, ts: i64) -> NewRun {
        NewRun {
            dungeon: dungeon.into(),
            mythic_level: level,
            completed_timestamp: ts,
            clear_time_ms: 1_800_000,
            keystone_run_id: None,
            timed: true,
            score: 250.0,
            num_keystone_upgrades: 1,
            spec_name: Some("Blood".into()),
            spec_role: Some(Role::Tank),
            affixes: vec!["Tyrannical".into(), "Xal'atath's Bargain: Ascendant".into()],
            season: Some("season-tww-3".into()),
        }
    }

    fn row_count(pool: &DbPool, character_id: i64) -> i64 {
        pool.get()
            .unwrap()
            .query_row(
                "SELECT COUNT(*) FROM mythic_runs WHERE character_id = ?1",
                params![character_id],
                |r| r.get(0),
            )
            .unwrap()
    }

    fn filter() -> RunFilter {
        RunFilter::new("silvermoon", "eu")
    }

    #[test]
    fn test_reinserting_same_run_is_duplicate() {
        let pool = init_test_db().unwrap();
        let cid = seed_character(&pool, "Arthas");
        let run = new_run("The Dawnbreaker", 12, 1_700_000_000_000);

        let first = insert(&pool, cid, &run).unwrap();
        assert!(matches!(first, InsertOutcome::Inserted(_)));
        let second = insert(&pool, cid, &run).unwrap();
        assert_eq!(second, InsertOutcome::Duplicate(first.id()));
        assert!(!second.inserted());
        assert_eq!(row_count(&pool, cid), 1);
    }

    #[test]
    fn test_dedup_ignores_upstream_run_id() {
        let pool = init_test_db().unwrap();
        let cid = seed_character(&pool, "Arthas");
        let mut a = new_run("The Dawnbreaker", 12, 1_700_000_000_000);
        a.keystone_run_id = Some(111);
        let mut b = a.clone();
        b.keystone_run_id = Some(222);
        let mut c = a.clone();
        c.keystone_run_id = None;

        insert(&pool, cid, &a).unwrap();
        assert!(!insert(&pool, cid, &b).unwrap().inserted());
        assert!(!insert(&pool, cid, &c).unwrap().inserted());
        assert_eq!(row_count(&pool, cid), 1);
    }

    #[test]
    fn test_changed_score_or_spec_updates_in_place() {
        let pool = init_test_db().unwrap();
        let cid = seed_character(&pool, "Arthas");
        let run = new_run("The Dawnbreaker", 12, 1_700_000_000_000);
        let id = insert(&pool, cid, &run).unwrap().id();

        let mut rescored = run.clone();
        rescored.score = 262.5;
        assert_eq!(insert(&pool, cid, &rescored).unwrap(), InsertOutcome::Updated(id));

        let mut respecced = rescored.clone();
        respecced.spec_name = Some("Frost".into());
        respecced.spec_role = Some(Role::Dps);
        assert_eq!(insert(&pool, cid, &respecced).unwrap(), InsertOutcome::Updated(id));

        let runs = get_by_spec(&pool, "Arthas", None, &filter()).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].spec_name.as_deref(), Some("Frost"));
        assert_eq!(runs[0].spec_role, Some(Role::Dps));
        assert!((runs[0].score - 262.5).abs() < 1e-9);
    }

    #[test]
    fn test_timed_or_upgrade_change_alone_is_noop() {
        let pool = init_test_db().unwrap();
        let cid = seed_character(&pool, "Arthas");
        let run = new_run("The Dawnbreaker", 12, 1_700_000_000_000);
        insert(&pool, cid, &run).unwrap();

        let mut depleted = run.clone();
        depleted.timed = false;
        depleted.num_keystone_upgrades = 0;
        assert!(!insert(&pool, cid, &depleted).unwrap().inserted());

        let stored = &get_by_spec(&pool, "Arthas", None, &filter()).unwrap()[0];
        assert!(stored.timed);
        assert_eq!(stored.num_keystone_upgrades, 1);
    }

    #[test]
    fn test_update_fills_missing_upstream_id() {
        let pool = init_test_db().unwrap();
        let cid = seed_character(&pool, "Arthas");
        let run = new_run("The Dawnbreaker", 12, 1_700_000_000_000);
        insert(&pool, cid, &run).unwrap();

        let mut observed = run.clone();
        observed.keystone_run_id = Some(987);
        observed.score = 255.0;
        insert(&pool, cid, &observed).unwrap();

        let stored = &get_by_spec(&pool, "Arthas", None, &filter()).unwrap()[0];
        assert_eq!(stored.keystone_run_id, Some(987));
    }

    #[test]
    fn test_rejects_invalid_level() {
        let pool = init_test_db().unwrap();
        let cid = seed_character(&pool, "Arthas");
        let err = insert(&pool, cid, &new_run("The Dawnbreaker", 1, 1)).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_affixes_round_trip_in_order() {
        let pool = init_test_db().unwrap();
        let cid = seed_character(&pool, "Arthas");
        insert(&pool, cid, &new_run("The Dawnbreaker", 12, 1)).unwrap();
        let mut bare = new_run("Halls of Atonement", 10, 2);
        bare.affixes.clear();
        insert(&pool, cid, &bare).unwrap();

        let runs = get_by_spec(&pool, "Arthas", None, &filter()).unwrap();
        assert!(runs[0].affixes.is_empty());
        assert_eq!(runs[1].affixes, vec!["Tyrannical", "Xal'atath's Bargain: Ascendant"]);
    }

    #[test]
    fn test_get_by_spec_filters_and_orders() {
        let pool = init_test_db().unwrap();
        let cid = seed_character(&pool, "Arthas");
        insert(&pool, cid, &new_run("The Dawnbreaker", 12, 100)).unwrap();
        insert(&pool, cid, &new_run("The Dawnbreaker", 8, 300)).unwrap();
        let mut frost = new_run("Halls of Atonement", 14, 200);
        frost.spec_name = Some("Frost".into());
        insert(&pool, cid, &frost).unwrap();
        let mut old = new_run("Halls of Atonement", 15, 50);
        old.season = Some("season-tww-2".into());
        insert(&pool, cid, &old).unwrap();

        let all = get_by_spec(&pool, "Arthas", None, &filter()).unwrap();
        let stamps: Vec<i64> = all.iter().map(|r| r.completed_timestamp).collect();
        assert_eq!(stamps, vec![300, 200, 100, 50]);

        let blood = get_by_spec(&pool, "Arthas", Some("Blood"), &filter()).unwrap();
        assert_eq!(blood.len(), 3);

        let high = get_by_spec(&pool, "Arthas", None, &filter().min_level(10).season("season-tww-3")).unwrap();
        assert_eq!(high.len(), 2);

        let dawn = get_by_spec(&pool, "Arthas", None, &filter().dungeon("The Dawnbreaker").limit(1)).unwrap();
        assert_eq!(dawn.len(), 1);
        assert_eq!(dawn[0].completed_timestamp, 300);

        let other_realm = get_by_spec(&pool, "Arthas", None, &RunFilter::new("draenor", "eu")).unwrap();
        assert!(other_realm.is_empty());
    }

    #[test]
    fn test_best_per_dungeon_breaks_ties_by_recency() {
        let pool = init_test_db().unwrap();
        let cid = seed_character(&pool, "Arthas");
        let mut low = new_run("The Dawnbreaker", 10, 100);
        low.score = 200.0;
        let mut tie_old = new_run("The Dawnbreaker", 12, 200);
        tie_old.score = 260.0;
        let mut tie_new = new_run("The Dawnbreaker", 12, 300);
        tie_new.score = 260.0;
        let mut other = new_run("Halls of Atonement", 11, 150);
        other.score = 240.0;
        for run in [&low, &tie_old, &tie_new, &other] {
            insert(&pool, cid, run).unwrap();
        }

        let best = get_best_per_dungeon(&pool, "Arthas", None, &filter()).unwrap();
        assert_eq!(best.len(), 2);
        assert_eq!(best[0].dungeon, "The Dawnbreaker");
        assert_eq!(best[0].completed_timestamp, 300);
        assert_eq!(best[1].dungeon, "Halls of Atonement");
    }

    #[test]
    fn test_spec_projections_and_seasons() {
        let pool = init_test_db().unwrap();
        let cid = seed_character(&pool, "Arthas");
        insert(&pool, cid, &new_run("The Dawnbreaker", 12, 1)).unwrap();
        insert(&pool, cid, &new_run("The Dawnbreaker", 13, 2)).unwrap();
        let mut frost = new_run("Halls of Atonement", 14, 3);
        frost.spec_name = Some("Frost".into());
        frost.season = Some("season-tww-2".into());
        insert(&pool, cid, &frost).unwrap();

        assert_eq!(get_available_specs(&pool, "Arthas", &filter()).unwrap(), vec!["Blood", "Frost"]);
        let counts = get_counts_by_spec(&pool, "Arthas", &filter()).unwrap();
        assert_eq!(counts[0], SpecRunCount { spec_name: "Blood".into(), run_count: 2 });
        assert_eq!(counts[1].run_count, 1);
        assert_eq!(get_available_seasons(&pool).unwrap(), vec!["season-tww-3", "season-tww-2"]);
    }
}
