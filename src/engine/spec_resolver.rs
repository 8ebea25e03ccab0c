//! Decides which specialization a stored run is attributed to.
//!
//! The authoritative source (the game's own per-run member list) wins when it
//! has an entry under the run's exact (dungeon, level, completion time) key.
//! Otherwise the character's current spec is used. Historical runs played on a
//! spec the character has since dropped are mis-attributed in that case; the
//! `source` tag on the result makes this visible.

use std::collections::HashMap;

use serde::Serialize;

use crate::db::models::Role;

/// Composite key identifying a run across upstream sources.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SpecKey {
    pub dungeon: String,
    pub keystone_level: i32,
    /// Epoch milliseconds.
    pub completed_timestamp: i64,
}

impl SpecKey {
    pub fn new(dungeon: impl Into<String>, keystone_level: i32, completed_timestamp: i64) -> Self {
        Self {
            dungeon: dungeon.into(),
            keystone_level,
            completed_timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecAssignment {
    pub spec_name: String,
    pub role: Role,
}

pub type SpecLookup = HashMap<SpecKey, SpecAssignment>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecSource {
    Authoritative,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSpec {
    pub spec_name: Option<String>,
    pub role: Role,
    pub source: SpecSource,
}

/// Resolve the spec for the run identified by `key`.
///
/// `authoritative = None` (lookup unavailable or failed) always falls back.
pub fn resolve_spec(
    key: &SpecKey,
    authoritative: Option<&SpecLookup>,
    fallback_spec: Option<&str>,
    fallback_role: Option<Role>,
) -> ResolvedSpec {
    if let Some(hit) = authoritative.and_then(|lookup| lookup.get(key)) {
        return ResolvedSpec {
            spec_name: Some(hit.spec_name.clone()),
            role: hit.role,
            source: SpecSource::Authoritative,
        };
    }

    let role = fallback_role
        .or_else(|| fallback_spec.map(role_for_spec))
        .unwrap_or(Role::Dps);
    ResolvedSpec {
        spec_name: fallback_spec.map(String::from),
        role,
        source: SpecSource::Fallback,
    }
}

/// Role for a specialization name. Anything not a tank or healer spec is DPS.
pub fn role_for_spec(spec_name: &str) -> Role {
    match spec_name.trim().to_ascii_lowercase().as_str() {
        "blood" | "vengeance" | "guardian" | "brewmaster" | "protection" => Role::Tank,
        "restoration" | "holy" | "discipline" | "mistweaver" | "preservation" => Role::Healing,
        _ => Role::Dps,
    }
}
