use rusqlite::params;

use crate::db::models::{BotSettings, BOT_SETTINGS_ID};
use crate::db::DbPool;
use crate::error::AppError;

/// Read the singleton settings row.
pub fn get(pool: &DbPool) -> Result<BotSettings, AppError> {
    let conn = pool.get()?;
    let result = conn.query_row(
        "SELECT current_season_id, current_season_name, default_region, default_realm,
                active_dungeons, beta_channel, updated_at
         FROM bot_settings WHERE id = ?1",
        params![BOT_SETTINGS_ID],
        |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, i64>(6)?,
            ))
        },
    );

    let (season_id, season_name, default_region, default_realm, dungeons_json, beta, updated_at) =
        match result {
            Ok(row) => row,
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                return Err(AppError::NotFound("Bot settings".into()))
            }
            Err(e) => return Err(AppError::Database(e)),
        };

    Ok(BotSettings {
        season_id,
        season_name,
        default_region,
        default_realm,
        active_dungeons: serde_json::from_str(&dungeons_json)?,
        beta_channel: beta != 0,
        updated_at: Some(updated_at),
    })
}

/// Replace the settings row. The season name must look like `season-<tag>`.
pub fn update(pool: &DbPool, settings: BotSettings) -> Result<BotSettings, AppError> {
    if !settings.season_name.starts_with("season-") {
        return Err(AppError::Validation(
            "Season name must start with 'season-' (e.g., season-mid-1)".into(),
        ));
    }
    crate::validation::require_non_empty("default_region", &settings.default_region)?;
    for (idx, dungeon) in settings.active_dungeons.iter().enumerate() {
        crate::validation::require_non_empty(&format!("active_dungeons[{idx}]"), dungeon)?;
    }

    let dungeons_json = serde_json::to_string(&settings.active_dungeons)?;
    let now = chrono::Utc::now().timestamp_millis();

    let conn = pool.get()?;
    let rows = conn.execute(
        "UPDATE bot_settings
         SET current_season_id = ?1,
             current_season_name = ?2,
             default_region = ?3,
             default_realm = ?4,
             active_dungeons = ?5,
             beta_channel = ?6,
             updated_at = ?7
         WHERE id = ?8",
        params![
            settings.season_id,
            settings.season_name,
            settings.default_region.trim().to_ascii_lowercase(),
            settings.default_realm,
            dungeons_json,
            settings.beta_channel as i32,
            now,
            BOT_SETTINGS_ID,
        ],
    )?;
    if rows == 0 {
        return Err(AppError::NotFound("Bot settings".into()));
    }

    tracing::info!(season = %settings.season_name, dungeons = settings.active_dungeons.len(), "Bot settings updated");
    drop(conn);
    get(pool)
}
