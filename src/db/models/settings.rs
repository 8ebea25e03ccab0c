use serde::{Deserialize, Serialize};

/// Singleton row id of `bot_settings`.
pub const BOT_SETTINGS_ID: i64 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotSettings {
    pub season_id: i64,
    pub season_name: String,
    pub default_region: String,
    pub default_realm: String,
    pub active_dungeons: Vec<String>,
    pub beta_channel: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}
