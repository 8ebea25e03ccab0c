use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::db::models::CharacterIdentity;
use crate::engine::collector::DEFAULT_CHARACTER_DELAY;
use crate::error::AppError;
use crate::upstream::raiderio;

/// Roster file inside the data directory.
pub const ROSTER_FILE_NAME: &str = "config.json";

const DEFAULT_SYNC_INTERVAL_SECS: u64 = 30 * 60;
const DEFAULT_SYNC_INITIAL_DELAY_SECS: u64 = 10;

#[derive(Debug, Clone)]
pub struct BlizzardCredentials {
    pub client_id: String,
    pub client_secret: String,
}

/// Runtime configuration, loaded once at startup.
///
/// | Env Var                   | Default                          |
/// |---------------------------|----------------------------------|
/// | `MPLUS_DATA_DIR`          | `<platform data dir>/mplus-ledger` |
/// | `RAIDERIO_BASE_URL`       | `https://raider.io`              |
/// | `RAIDERIO_API_KEY`        | unset                            |
/// | `BLIZZARD_CLIENT_ID`      | unset (authoritative specs off)  |
/// | `BLIZZARD_CLIENT_SECRET`  | unset                            |
/// | `SYNC_INTERVAL_SECS`      | `1800`                           |
/// | `SYNC_INITIAL_DELAY_SECS` | `10`                             |
/// | `CHARACTER_DELAY_MS`      | `1000`                           |
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub raiderio_base_url: String,
    pub raiderio_api_key: Option<String>,
    pub blizzard: Option<BlizzardCredentials>,
    pub sync_interval: Duration,
    pub sync_initial_delay: Duration,
    pub character_delay: Duration,
    pub roster: Vec<CharacterIdentity>,
}

#[derive(Debug, Deserialize)]
struct RosterFile {
    #[serde(default)]
    characters: Vec<CharacterIdentity>,
}

impl AppConfig {
    /// `.env`, then the process environment, then the roster file.
    pub fn load() -> Result<Self, AppError> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "Loaded .env");
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let var = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let data_dir = match var("MPLUS_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => dirs::data_dir()
                .map(|d| d.join("mplus-ledger"))
                .ok_or_else(|| AppError::Config("no platform data directory; set MPLUS_DATA_DIR".into()))?,
        };

        let blizzard = match (var("BLIZZARD_CLIENT_ID"), var("BLIZZARD_CLIENT_SECRET")) {
            (Some(client_id), Some(client_secret)) => Some(BlizzardCredentials {
                client_id,
                client_secret,
            }),
            (None, None) => None,
            _ => {
                return Err(AppError::Config(
                    "BLIZZARD_CLIENT_ID and BLIZZARD_CLIENT_SECRET must be set together".into(),
                ))
            }
        };

        let sync_interval = parse_u64(&var, "SYNC_INTERVAL_SECS", DEFAULT_SYNC_INTERVAL_SECS)?;
        if sync_interval == 0 {
            return Err(AppError::Config("SYNC_INTERVAL_SECS must be greater than 0".into()));
        }
        let initial_delay = parse_u64(&var, "SYNC_INITIAL_DELAY_SECS", DEFAULT_SYNC_INITIAL_DELAY_SECS)?;
        let character_delay = parse_u64(
            &var,
            "CHARACTER_DELAY_MS",
            DEFAULT_CHARACTER_DELAY.as_millis() as u64,
        )?;

        let roster = load_roster(&data_dir)?;

        Ok(Self {
            raiderio_base_url: var("RAIDERIO_BASE_URL").unwrap_or_else(|| raiderio::DEFAULT_BASE_URL.into()),
            raiderio_api_key: var("RAIDERIO_API_KEY"),
            blizzard,
            sync_interval: Duration::from_secs(sync_interval),
            sync_initial_delay: Duration::from_secs(initial_delay),
            character_delay: Duration::from_millis(character_delay),
            roster,
            data_dir,
        })
    }
}

fn parse_u64(var: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> Result<u64, AppError> {
    match var(key) {
        Some(raw) => raw
            .parse()
            .map_err(|_| AppError::Config(format!("{key} must be a non-negative integer (got '{raw}')"))),
        None => Ok(default),
    }
}

/// Read `<data_dir>/config.json`. A missing file is an empty roster.
pub fn load_roster(data_dir: &Path) -> Result<Vec<CharacterIdentity>, AppError> {
    let path = data_dir.join(ROSTER_FILE_NAME);
    let text = match std::fs::read_to_string(&path) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(path = %path.display(), "Roster file not found, no characters will be synced");
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };

    let file: RosterFile = serde_json::from_str(&text)
        .map_err(|e| AppError::Config(format!("{}: {e}", path.display())))?;

    for (idx, c) in file.characters.iter().enumerate() {
        if c.name.trim().is_empty() || c.realm_slug().is_empty() || c.region_code().is_empty() {
            return Err(AppError::Config(format!(
                "{}: character #{idx} needs name, realm and region",
                path.display()
            )));
        }
    }
    Ok(file.characters)
}
