use rusqlite::{params, Row};

use crate::db::models::{Character, CharacterIdentity, CharacterProfile, Role};
use crate::db::DbPool;
use crate::error::AppError;

fn row_to_character(row: &Row) -> rusqlite::Result<Character> {
    Ok(Character {
        id: row.get("id")?,
        name: row.get("name")?,
        realm: row.get("realm")?,
        region: row.get("region")?,
        class_name: row.get("class_name")?,
        active_spec_name: row.get("active_spec_name")?,
        active_spec_role: row
            .get::<_, Option<String>>("active_spec_role")?
            .map(|r| Role::parse(&r)),
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

/// Checks the stored forms, so a realm that normalizes to nothing is rejected.
fn validate_identity(identity: &CharacterIdentity) -> Result<(), AppError> {
    crate::validation::require_non_empty("name", identity.name.trim())?;
    crate::validation::require_non_empty("realm", &identity.realm_slug())?;
    crate::validation::require_non_empty("region", &identity.region_code())?;
    Ok(())
}

/// Insert or refresh a character keyed by (name, realm, region).
///
/// Class and spec fields are always overwritten with the latest profile.
/// Returns the character's id, which is stable across calls.
pub fn upsert(
    pool: &DbPool,
    identity: &CharacterIdentity,
    profile: &CharacterProfile,
) -> Result<i64, AppError> {
    let name = identity.name.trim();
    validate_identity(identity)?;

    let now = chrono::Utc::now().timestamp_millis();
    let conn = pool.get()?;
    let id: i64 = conn.query_row(
        "INSERT INTO characters
         (name, realm, region, class_name, active_spec_name, active_spec_role, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
         ON CONFLICT(name, realm, region) DO UPDATE SET
            class_name = excluded.class_name,
            active_spec_name = excluded.active_spec_name,
            active_spec_role = excluded.active_spec_role,
            updated_at = excluded.updated_at
         RETURNING id",
        params![
            name,
            identity.realm_slug(),
            identity.region_code(),
            profile.class_name,
            profile.active_spec_name,
            profile.active_spec_role.map(|r| r.as_str()),
            now,
        ],
        |row| row.get(0),
    )?;

    tracing::debug!(character = %identity, id, "Character upserted");
    Ok(id)
}

/// Id of the character, creating a bare row if it does not exist yet.
/// Existing profile fields are left alone.
pub fn get_or_create(pool: &DbPool, identity: &CharacterIdentity) -> Result<i64, AppError> {
    let name = identity.name.trim();
    validate_identity(identity)?;

    let now = chrono::Utc::now().timestamp_millis();
    let conn = pool.get()?;
    conn.execute(
        "INSERT INTO characters (name, realm, region, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4)
         ON CONFLICT(name, realm, region) DO NOTHING",
        params![name, identity.realm_slug(), identity.region_code(), now],
    )?;
    let id = conn.query_row(
        "SELECT id FROM characters WHERE name = ?1 AND realm = ?2 AND region = ?3",
        params![name, identity.realm_slug(), identity.region_code()],
        |row| row.get(0),
    )?;
    Ok(id)
}

pub fn get_by_id(pool: &DbPool, id: i64) -> Result<Character, AppError> {
    let conn = pool.get()?;
    conn.query_row(
        "SELECT * FROM characters WHERE id = ?1",
        params![id],
        row_to_character,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => AppError::NotFound(format!("Character {id}")),
        other => AppError::Database(other),
    })
}

pub fn get_by_identity(pool: &DbPool, identity: &CharacterIdentity) -> Result<Character, AppError> {
    let conn = pool.get()?;
    conn.query_row(
        "SELECT * FROM characters WHERE name = ?1 AND realm = ?2 AND region = ?3",
        params![identity.name.trim(), identity.realm_slug(), identity.region_code()],
        row_to_character,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => AppError::NotFound(format!("Character {identity}")),
        other => AppError::Database(other),
    })
}

pub fn get_all(pool: &DbPool) -> Result<Vec<Character>, AppError> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare("SELECT * FROM characters ORDER BY name ASC")?;
    let rows = stmt.query_map([], row_to_character)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(AppError::Database)
}
