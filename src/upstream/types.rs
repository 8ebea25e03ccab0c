use serde::{Deserialize, Serialize};

use crate::db::models::Role;

// ============================================================================
// Request
// ============================================================================

/// Profile sections that can be requested in a single fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileField {
    BestRuns,
    AlternateRuns,
    RecentRuns,
    SeasonScores,
}

impl ProfileField {
    pub const ALL: [ProfileField; 4] = [
        ProfileField::BestRuns,
        ProfileField::AlternateRuns,
        ProfileField::RecentRuns,
        ProfileField::SeasonScores,
    ];

    pub fn as_query(&self) -> &'static str {
        match self {
            ProfileField::BestRuns => "mythic_plus_best_runs",
            ProfileField::AlternateRuns => "mythic_plus_alternate_runs",
            ProfileField::RecentRuns => "mythic_plus_recent_runs",
            ProfileField::SeasonScores => "mythic_plus_scores_by_season:current",
        }
    }
}

// ============================================================================
// Parsed profile
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParsedProfile {
    pub name: String,
    pub class: Option<String>,
    pub active_spec_name: Option<String>,
    pub active_spec_role: Option<Role>,
    pub best_runs: Vec<UpstreamRun>,
    pub alternate_runs: Vec<UpstreamRun>,
    pub recent_runs: Vec<UpstreamRun>,
    pub season_scores: Vec<SeasonScore>,
}

impl ParsedProfile {
    /// Every run list in fetch order: best, alternate, recent.
    pub fn all_runs(&self) -> impl Iterator<Item = &UpstreamRun> {
        self.best_runs
            .iter()
            .chain(self.alternate_runs.iter())
            .chain(self.recent_runs.iter())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamRun {
    pub dungeon: String,
    pub mythic_level: i32,
    /// ISO 8601 completion time.
    pub completed_at: String,
    pub clear_time_ms: i64,
    pub keystone_run_id: Option<i64>,
    pub num_keystone_upgrades: i32,
    pub score: f64,
    pub affixes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonScore {
    pub season: String,
    pub all: f64,
    pub dps: f64,
    pub healer: f64,
    pub tank: f64,
}
