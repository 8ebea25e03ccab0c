use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::db::models::{CharacterIdentity, Role};
use crate::error::AppError;
use crate::upstream::{status_error, ParsedProfile, ProfileField, ProfileSource, SeasonScore, UpstreamRun};

pub const DEFAULT_BASE_URL: &str = "https://raider.io";

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct RioProfile {
    name: Option<String>,
    class: Option<String>,
    active_spec_name: Option<String>,
    active_spec_role: Option<String>,
    #[serde(default)]
    mythic_plus_best_runs: Vec<RioRun>,
    #[serde(default)]
    mythic_plus_alternate_runs: Vec<RioRun>,
    #[serde(default)]
    mythic_plus_recent_runs: Vec<RioRun>,
    #[serde(default)]
    mythic_plus_scores_by_season: Vec<RioSeasonScores>,
}

#[derive(Debug, Deserialize)]
struct RioRun {
    dungeon: String,
    mythic_level: i32,
    completed_at: String,
    #[serde(default)]
    clear_time_ms: i64,
    keystone_run_id: Option<i64>,
    #[serde(default)]
    num_keystone_upgrades: i32,
    #[serde(default)]
    score: f64,
    #[serde(default)]
    affixes: Vec<RioAffix>,
}

#[derive(Debug, Deserialize)]
struct RioAffix {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RioSeasonScores {
    season: String,
    scores: RioScores,
}

#[derive(Debug, Default, Deserialize)]
struct RioScores {
    #[serde(default)]
    all: f64,
    #[serde(default)]
    dps: f64,
    #[serde(default)]
    healer: f64,
    #[serde(default)]
    tank: f64,
}

#[derive(Debug, Deserialize)]
struct RioError {
    message: Option<String>,
}

impl From<RioRun> for UpstreamRun {
    fn from(run: RioRun) -> Self {
        UpstreamRun {
            dungeon: run.dungeon,
            mythic_level: run.mythic_level,
            completed_at: run.completed_at,
            clear_time_ms: run.clear_time_ms,
            keystone_run_id: run.keystone_run_id,
            num_keystone_upgrades: run.num_keystone_upgrades,
            score: run.score,
            affixes: run.affixes.into_iter().map(|a| a.name).collect(),
        }
    }
}

/// Convert a Raider.IO profile body. A body without `name` is malformed.
fn profile_from_body(body: &str) -> Result<ParsedProfile, AppError> {
    let raw: RioProfile = serde_json::from_str(body)
        .map_err(|e| AppError::Upstream(format!("Raider.IO: malformed profile: {e}")))?;

    let name = raw
        .name
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| AppError::Upstream("Raider.IO: profile response missing name".into()))?;

    Ok(ParsedProfile {
        name,
        class: raw.class,
        active_spec_name: raw.active_spec_name,
        active_spec_role: raw.active_spec_role.as_deref().map(Role::parse),
        best_runs: raw.mythic_plus_best_runs.into_iter().map(Into::into).collect(),
        alternate_runs: raw.mythic_plus_alternate_runs.into_iter().map(Into::into).collect(),
        recent_runs: raw.mythic_plus_recent_runs.into_iter().map(Into::into).collect(),
        season_scores: raw
            .mythic_plus_scores_by_season
            .into_iter()
            .map(|s| SeasonScore {
                season: s.season,
                all: s.scores.all,
                dps: s.scores.dps,
                healer: s.scores.healer,
                tank: s.scores.tank,
            })
            .collect(),
    })
}

// ============================================================================
// RaiderIoClient
// ============================================================================

/// HTTP client for the Raider.IO public character API.
pub struct RaiderIoClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl RaiderIoClient {
    pub fn new(base_url: String, api_key: Option<String>) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("mplus-ledger/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AppError::Internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl ProfileSource for RaiderIoClient {
    /// `GET /api/v1/characters/profile?region&realm&name&fields`
    async fn fetch_profile(
        &self,
        identity: &CharacterIdentity,
        fields: &[ProfileField],
    ) -> Result<ParsedProfile, AppError> {
        let fields = fields
            .iter()
            .map(|f| f.as_query())
            .collect::<Vec<_>>()
            .join(",");
        let region = identity.region_code();
        let realm = identity.realm_slug();

        let mut req = self
            .http
            .get(format!("{}/api/v1/characters/profile", self.base_url))
            .query(&[
                ("region", region.as_str()),
                ("realm", realm.as_str()),
                ("name", identity.name.as_str()),
                ("fields", fields.as_str()),
            ]);
        if let Some(ref key) = self.api_key {
            req = req.query(&[("access_key", key.as_str())]);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            // Raider.IO answers 400 with a message for unknown characters
            let message = serde_json::from_str::<RioError>(&body)
                .ok()
                .and_then(|e| e.message)
                .unwrap_or_else(|| body.clone());
            if message.to_ascii_lowercase().contains("could not find") {
                return Err(AppError::NotFound(format!("Raider.IO: character {identity}")));
            }
            return Err(status_error("Raider.IO", status, &message));
        }

        let profile = profile_from_body(&body)?;
        tracing::debug!(
            character = %identity,
            best = profile.best_runs.len(),
            alternate = profile.alternate_runs.len(),
            recent = profile.recent_runs.len(),
            "Raider.IO profile fetched"
        );
        Ok(profile)
    }
}
