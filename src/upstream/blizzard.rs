use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::db::models::CharacterIdentity;
use crate::engine::spec_resolver::{role_for_spec, SpecAssignment, SpecKey, SpecLookup};
use crate::error::AppError;
use crate::upstream::{status_error, AuthoritativeSpecSource};

const OAUTH_URL: &str = "https://oauth.battle.net/token";

/// Refresh the token this long before Blizzard says it expires.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct SeasonProfile {
    #[serde(default)]
    best_runs: Vec<KeystoneRun>,
}

#[derive(Debug, Deserialize)]
struct KeystoneRun {
    completed_timestamp: i64,
    keystone_level: i32,
    dungeon: NamedRef,
    #[serde(default)]
    members: Vec<KeystoneMember>,
}

#[derive(Debug, Deserialize)]
struct NamedRef {
    name: String,
}

#[derive(Debug, Deserialize)]
struct KeystoneMember {
    character: NamedRef,
    specialization: Option<NamedRef>,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Build the spec lookup for `character_name` from a season profile body.
/// Runs where the character is missing from the member list are skipped.
fn lookup_from_body(character_name: &str, body: &str) -> Result<SpecLookup, AppError> {
    let profile: SeasonProfile = serde_json::from_str(body)
        .map_err(|e| AppError::Upstream(format!("Blizzard: malformed keystone profile: {e}")))?;

    let mut lookup = SpecLookup::new();
    for run in profile.best_runs {
        let spec = run
            .members
            .iter()
            .find(|m| m.character.name.eq_ignore_ascii_case(character_name))
            .and_then(|m| m.specialization.as_ref());

        if let Some(spec) = spec {
            lookup.insert(
                SpecKey::new(run.dungeon.name, run.keystone_level, run.completed_timestamp),
                SpecAssignment {
                    spec_name: spec.name.clone(),
                    role: role_for_spec(&spec.name),
                },
            );
        }
    }
    Ok(lookup)
}

// ============================================================================
// BlizzardClient
// ============================================================================

/// Blizzard Game Data / Profile API client using client-credentials OAuth.
pub struct BlizzardClient {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    token: Mutex<Option<CachedToken>>,
}

impl BlizzardClient {
    pub fn new(client_id: String, client_secret: String) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| AppError::Internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            client_id,
            client_secret,
            token: Mutex::new(None),
        })
    }

    async fn access_token(&self) -> Result<String, AppError> {
        let mut cached = self.token.lock().await;
        if let Some(ref token) = *cached {
            if Instant::now() < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        let resp = self
            .http
            .post(OAUTH_URL)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(status_error("Blizzard OAuth", status, &body));
        }
        let token: TokenResponse = resp.json().await?;

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        tracing::debug!(expires_in = token.expires_in, "Blizzard access token refreshed");
        Ok(token.access_token)
    }
}

#[async_trait]
impl AuthoritativeSpecSource for BlizzardClient {
    async fn fetch_authoritative_specs(
        &self,
        identity: &CharacterIdentity,
        season_id: i64,
    ) -> Result<SpecLookup, AppError> {
        let token = self.access_token().await?;
        let region = identity.region_code();
        let url = format!(
            "https://{region}.api.blizzard.com/profile/wow/character/{}/{}/mythic-keystone-profile/season/{season_id}",
            urlencoding::encode(&identity.realm_slug()),
            urlencoding::encode(&identity.name.to_lowercase()),
        );
        let namespace = format!("profile-{region}");

        let resp = self
            .http
            .get(url)
            .bearer_auth(token)
            .query(&[("namespace", namespace.as_str()), ("locale", "en_US")])
            .send()
            .await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(status_error("Blizzard", status, &body));
        }

        let lookup = lookup_from_body(&identity.name, &body)?;
        tracing::debug!(character = %identity, season_id, entries = lookup.len(), "Blizzard spec lookup built");
        Ok(lookup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::Role;

    const BODY: &str = r#"{
        "best_runs": [
            {
                "completed_timestamp": 1726860792000,
                "duration": 1712345,
                "keystone_level": 12,
                "is_completed_within_time": true,
                "dungeon": {"name": "The Dawnbreaker", "id": 505},
                "members": [
                    {"character": {"name": "Jaina", "realm": {"slug": "silvermoon"}}, "specialization": {"name": "Fire", "id": 63}},
                    {"character": {"name": "Anduin", "realm": {"slug": "silvermoon"}}, "specialization": {"name": "Holy", "id": 257}}
                ]
            },
            {
                "completed_timestamp": 1726900000000,
                "keystone_level": 10,
                "dungeon": {"name": "Halls of Atonement"},
                "members": [
                    {"character": {"name": "Someone"}, "specialization": {"name": "Blood"}}
                ]
            }
        ]
    }"#;

    #[test]
    fn test_lookup_uses_own_member_entry() {
        let lookup = lookup_from_body("jaina", BODY).unwrap();
        assert_eq!(lookup.len(), 1);
        let hit = &lookup[&SpecKey::new("The Dawnbreaker", 12, 1_726_860_792_000)];
        assert_eq!(hit.spec_name, "Fire");
        assert_eq!(hit.role, Role::Dps);
    }

    #[test]
    fn test_lookup_role_from_spec() {
        let lookup = lookup_from_body("Anduin", BODY).unwrap();
        let hit = lookup.values().next().unwrap();
        assert_eq!(hit.role, Role::Healing);
    }

    #[test]
    fn test_empty_and_malformed_profiles() {
        assert!(lookup_from_body("Jaina", "{}").unwrap().is_empty());
        assert!(matches!(lookup_from_body("Jaina", "[1,2"), Err(AppError::Upstream(_))));
    }
}
