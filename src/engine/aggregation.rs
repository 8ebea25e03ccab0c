//! Weekly and seasonal read models over stored runs: tier buckets, the
//! Great Vault key level, resilient level, and display projections.

use std::collections::HashMap;

use chrono::{DateTime, Datelike, Duration, TimeZone, Utc, Weekday};
use serde::Serialize;

use crate::db::models::{Run, RunFilter, SpecRunCount};
use crate::db::repos::{runs, settings};
use crate::db::DbPool;
use crate::error::AppError;

/// Lowest key level the vault ever offers.
pub const VAULT_FLOOR: i32 = 2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierCounts {
    pub thirteen_plus: u32,
    pub twelve: u32,
    pub ten_to_eleven: u32,
    pub nine_or_below: u32,
}

impl TierCounts {
    fn add(&mut self, level: i32) {
        match level {
            l if l >= 13 => self.thirteen_plus += 1,
            12 => self.twelve += 1,
            10 | 11 => self.ten_to_eleven += 1,
            _ => self.nine_or_below += 1,
        }
    }

    pub fn total(&self) -> u32 {
        self.thirteen_plus + self.twelve + self.ten_to_eleven + self.nine_or_below
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyStats {
    pub tiers: TierCounts,
    pub all_weekly_run_count: u32,
    pub vault_key_level: i32,
}

// ============================================================================
// Pure rules
// ============================================================================

/// Bucket the runs completed at or after `week_start_ms` and derive the
/// vault key level.
pub fn weekly_stats(runs: &[Run], week_start_ms: i64, resilient_level: i32) -> WeeklyStats {
    let mut tiers = TierCounts::default();
    let mut highest_timed: Option<i32> = None;
    let mut highest_untimed: Option<i32> = None;

    for run in runs.iter().filter(|r| r.completed_timestamp >= week_start_ms) {
        tiers.add(run.mythic_level);
        let slot = if run.timed { &mut highest_timed } else { &mut highest_untimed };
        *slot = Some(slot.map_or(run.mythic_level, |h| h.max(run.mythic_level)));
    }

    let untimed_proposal = highest_untimed.map_or(0, |h| (h - 1).max(VAULT_FLOOR));
    let vault_key_level = VAULT_FLOOR
        .max(resilient_level)
        .max(highest_timed.unwrap_or(0))
        .max(untimed_proposal);

    WeeklyStats {
        tiers,
        all_weekly_run_count: tiers.total(),
        vault_key_level,
    }
}

/// Highest level timed in every dungeon the character has run, 0 when any
/// of those dungeons has no timed run.
pub fn resilient_level_from_runs<'a>(runs: impl IntoIterator<Item = &'a Run>) -> i32 {
    let mut max_timed: HashMap<&str, i32> = HashMap::new();
    for run in runs {
        let entry = max_timed.entry(run.dungeon.as_str()).or_insert(0);
        if run.timed {
            *entry = (*entry).max(run.mythic_level);
        }
    }
    min_of_timed_maxima(&max_timed)
}

/// Same rule restricted to `dungeon_pool`; pool dungeons never run count as
/// untimed. An empty pool means no restriction.
pub fn resilient_level_in_pool(runs: &[Run], dungeon_pool: &[String]) -> i32 {
    if dungeon_pool.is_empty() {
        return resilient_level_from_runs(runs);
    }

    let mut max_timed: HashMap<&str, i32> = dungeon_pool.iter().map(|d| (d.as_str(), 0)).collect();
    for run in runs.iter().filter(|r| r.timed) {
        if let Some(entry) = max_timed.get_mut(run.dungeon.as_str()) {
            *entry = (*entry).max(run.mythic_level);
        }
    }
    min_of_timed_maxima(&max_timed)
}

fn min_of_timed_maxima(max_timed: &HashMap<&str, i32>) -> i32 {
    let timed_dungeons = max_timed.values().filter(|&&l| l > 0).count();
    if timed_dungeons != max_timed.len() {
        return 0;
    }
    max_timed.values().copied().min().unwrap_or(0)
}

/// Most recent weekly reset at or before `now`. EU resets Wednesday 04:00
/// UTC, every other region Tuesday 15:00 UTC.
pub fn week_start(region: &str, now: DateTime<Utc>) -> DateTime<Utc> {
    let (reset_day, reset_hour) = if region.trim().eq_ignore_ascii_case("eu") {
        (Weekday::Wed, 4)
    } else {
        (Weekday::Tue, 15)
    };

    let days_back = (now.weekday().num_days_from_monday() + 7 - reset_day.num_days_from_monday()) % 7;
    let reset_date = now.date_naive() - Duration::days(days_back as i64);
    let candidate = reset_date
        .and_hms_opt(reset_hour, 0, 0)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .unwrap_or(now);

    if candidate > now {
        candidate - Duration::days(7)
    } else {
        candidate
    }
}

// ============================================================================
// Store-backed projections
// ============================================================================

/// Resilient level over the character's stored runs under `filter`.
pub fn resilient_level(
    pool: &DbPool,
    character_name: &str,
    filter: &RunFilter,
    dungeon_pool: Option<&[String]>,
) -> Result<i32, AppError> {
    let runs = runs::get_by_spec(pool, character_name, None, &unlimited(filter))?;
    Ok(match dungeon_pool {
        Some(dungeons) => resilient_level_in_pool(&runs, dungeons),
        None => resilient_level_from_runs(&runs),
    })
}

/// Weekly stats for the current reset week of `region`, with the resilient
/// level measured against the configured dungeon pool.
pub fn weekly_summary(
    pool: &DbPool,
    character_name: &str,
    filter: &RunFilter,
    region: &str,
    now: DateTime<Utc>,
) -> Result<WeeklyStats, AppError> {
    let dungeon_pool = settings::get(pool)?.active_dungeons;
    let runs = runs::get_by_spec(pool, character_name, None, &unlimited(filter))?;
    let resilient = resilient_level_in_pool(&runs, &dungeon_pool);
    let boundary = week_start(region, now);

    let stats = weekly_stats(&runs, boundary.timestamp_millis(), resilient);
    tracing::debug!(
        character = character_name,
        week_start = %boundary,
        runs = stats.all_weekly_run_count,
        vault = stats.vault_key_level,
        resilient,
        "Weekly summary computed"
    );
    Ok(stats)
}

/// Best run per dungeon for `spec` (all specs when `None`).
pub fn best_runs_for_display(
    pool: &DbPool,
    character_name: &str,
    spec: Option<&str>,
    filter: &RunFilter,
) -> Result<Vec<Run>, AppError> {
    runs::get_best_per_dungeon(pool, character_name, spec, filter)
}

pub fn available_specs(pool: &DbPool, character_name: &str, filter: &RunFilter) -> Result<Vec<String>, AppError> {
    runs::get_available_specs(pool, character_name, filter)
}

pub fn run_counts_by_spec(
    pool: &DbPool,
    character_name: &str,
    filter: &RunFilter,
) -> Result<Vec<SpecRunCount>, AppError> {
    runs::get_counts_by_spec(pool, character_name, filter)
}

fn unlimited(filter: &RunFilter) -> RunFilter {
    RunFilter {
        limit: None,
        ..filter.clone()
    }
}
