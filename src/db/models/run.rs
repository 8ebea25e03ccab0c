use serde::{Deserialize, Serialize};

use super::Role;

// ============================================================================
// Runs
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: i64,
    pub character_id: i64,
    pub dungeon: String,
    pub mythic_level: i32,
    /// Epoch milliseconds.
    pub completed_timestamp: i64,
    /// Milliseconds, 0 when unknown.
    pub clear_time_ms: i64,
    pub keystone_run_id: Option<i64>,
    pub timed: bool,
    pub score: f64,
    pub num_keystone_upgrades: i32,
    pub spec_name: Option<String>,
    pub spec_role: Option<Role>,
    pub affixes: Vec<String>,
    pub season: Option<String>,
    pub created_at: i64,
}

/// Fields written by `insert_run`. The dedup key is
/// (character, dungeon, mythic_level, completed_timestamp).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRun {
    pub dungeon: String,
    pub mythic_level: i32,
    pub completed_timestamp: i64,
    pub clear_time_ms: i64,
    pub keystone_run_id: Option<i64>,
    pub timed: bool,
    pub score: f64,
    pub num_keystone_upgrades: i32,
    pub spec_name: Option<String>,
    pub spec_role: Option<Role>,
    pub affixes: Vec<String>,
    pub season: Option<String>,
}

/// Result of `insert_run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "id", rename_all = "snake_case")]
pub enum InsertOutcome {
    /// A new row was created.
    Inserted(i64),
    /// The row existed and its spec or score differed; mutable fields rewritten.
    Updated(i64),
    /// The row existed unchanged. Nothing was written.
    Duplicate(i64),
}

impl InsertOutcome {
    /// True when a row was created or changed.
    pub fn inserted(&self) -> bool {
        !matches!(self, InsertOutcome::Duplicate(_))
    }

    pub fn id(&self) -> i64 {
        match *self {
            InsertOutcome::Inserted(id) | InsertOutcome::Updated(id) | InsertOutcome::Duplicate(id) => id,
        }
    }
}

/// Filters shared by the run queries. Realm and region are required.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunFilter {
    pub realm: String,
    pub region: String,
    pub dungeon: Option<String>,
    pub season: Option<String>,
    pub min_level: Option<i32>,
    pub limit: Option<i64>,
}

impl RunFilter {
    pub fn new(realm: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            realm: realm.into(),
            region: region.into(),
            ..Default::default()
        }
    }

    pub fn season(mut self, season: impl Into<String>) -> Self {
        self.season = Some(season.into());
        self
    }

    pub fn dungeon(mut self, dungeon: impl Into<String>) -> Self {
        self.dungeon = Some(dungeon.into());
        self
    }

    pub fn min_level(mut self, level: i32) -> Self {
        self.min_level = Some(level);
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpecRunCount {
    pub spec_name: String,
    pub run_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreStats {
    pub character_count: i64,
    pub run_count: i64,
    pub latest_run_timestamp: Option<i64>,
    pub storage_size_bytes: i64,
}
