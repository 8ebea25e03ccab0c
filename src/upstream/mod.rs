//! Upstream run sources consumed by the collector.
//!
//! The collector only sees the [`ProfileSource`] and
//! [`AuthoritativeSpecSource`] traits; the HTTP clients behind them live in
//! [`raiderio`] and [`blizzard`].

pub mod blizzard;
pub mod raiderio;
pub mod types;

use async_trait::async_trait;

use crate::db::models::CharacterIdentity;
use crate::engine::spec_resolver::SpecLookup;
use crate::error::AppError;
pub use types::*;

/// Fetches a character profile with its run lists.
///
/// Errors: `NotFound` when upstream has no such character, `Network` for
/// transport failures and 5xx answers, `Upstream` for other bad answers or a
/// body without a character name.
#[async_trait]
pub trait ProfileSource: Send + Sync {
    async fn fetch_profile(
        &self,
        identity: &CharacterIdentity,
        fields: &[ProfileField],
    ) -> Result<ParsedProfile, AppError>;
}

/// Best-effort per-run spec data keyed by (dungeon, level, completion time).
#[async_trait]
pub trait AuthoritativeSpecSource: Send + Sync {
    async fn fetch_authoritative_specs(
        &self,
        identity: &CharacterIdentity,
        season_id: i64,
    ) -> Result<SpecLookup, AppError>;
}

/// Map a non-success HTTP status to the error taxonomy.
pub(crate) fn status_error(source: &str, status: reqwest::StatusCode, body: &str) -> AppError {
    if status == reqwest::StatusCode::NOT_FOUND {
        AppError::NotFound(format!("{source}: {body}"))
    } else if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        AppError::Network(format!("{source} API error ({status}): {body}"))
    } else {
        AppError::Upstream(format!("{source} API error ({status}): {body}"))
    }
}
