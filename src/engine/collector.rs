//! Run ingestion: upstream profile -> spec resolution -> run store.
//!
//! Characters are collected strictly one after another with a fixed pause in
//! between to stay under upstream rate limits. Each character's outcome is
//! independent; a failure is recorded and the batch moves on.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::db::models::{
    BotSettings, CharacterIdentity, CharacterProfile, InsertOutcome, NewRun, SyncHistoryEntry, SyncType,
};
use crate::db::repos::{characters, runs, settings, sync_history};
use crate::db::DbPool;
use crate::engine::spec_resolver::{resolve_spec, SpecKey, SpecLookup, SpecSource};
use crate::error::AppError;
use crate::upstream::{AuthoritativeSpecSource, ProfileField, ProfileSource, UpstreamRun};

/// Default pause between two characters of a batch.
pub const DEFAULT_CHARACTER_DELAY: Duration = Duration::from_millis(1000);

// ============================================================================
// Reports
// ============================================================================

/// Counters for one collected character.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CharacterReport {
    pub character_id: i64,
    /// Rows created or changed.
    pub runs_added: u32,
    /// Subset of `runs_added` that rewrote an existing row.
    pub runs_updated: u32,
    /// Re-observed runs that changed nothing.
    pub runs_skipped: u32,
    /// Upstream runs that could not be mapped (e.g. unparseable date).
    pub runs_invalid: u32,
    pub resolved_authoritative: u32,
    pub resolved_fallback: u32,
    /// Whether the authoritative spec lookup succeeded for this character.
    pub authoritative_available: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CharacterOutcome {
    Collected(CharacterReport),
    NotFound { message: String },
    /// Runs stored before the failure are still counted.
    Failed {
        kind: String,
        message: String,
        runs_added: u32,
        runs_skipped: u32,
    },
}

impl CharacterOutcome {
    fn from_error(e: &AppError, partial: &CharacterReport) -> Self {
        match e {
            AppError::NotFound(_) => CharacterOutcome::NotFound {
                message: e.to_string(),
            },
            other => CharacterOutcome::Failed {
                kind: other.kind().to_string(),
                message: other.to_string(),
                runs_added: partial.runs_added,
                runs_skipped: partial.runs_skipped,
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CharacterOutcome::Collected(_))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CharacterResult {
    pub character: CharacterIdentity,
    pub outcome: CharacterOutcome,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub successful: u32,
    pub failed: u32,
    pub total_runs_added: u32,
    pub total_runs_skipped: u32,
    pub duration_ms: u64,
    pub per_character: Vec<CharacterResult>,
}

impl BatchReport {
    fn record(&mut self, character: CharacterIdentity, outcome: CharacterOutcome) {
        match outcome {
            CharacterOutcome::Collected(ref report) => {
                self.successful += 1;
                self.total_runs_added += report.runs_added;
                self.total_runs_skipped += report.runs_skipped;
            }
            CharacterOutcome::Failed {
                runs_added,
                runs_skipped,
                ..
            } => {
                self.failed += 1;
                self.total_runs_added += runs_added;
                self.total_runs_skipped += runs_skipped;
            }
            CharacterOutcome::NotFound { .. } => self.failed += 1,
        }
        self.per_character.push(CharacterResult { character, outcome });
    }
}

#[derive(Debug, Clone)]
pub struct CollectOptions {
    pub sync_type: SyncType,
    pub fields: Vec<ProfileField>,
    /// Write a `sync_history` row for the batch.
    pub record_history: bool,
}

impl Default for CollectOptions {
    fn default() -> Self {
        Self {
            sync_type: SyncType::Auto,
            fields: ProfileField::ALL.to_vec(),
            record_history: true,
        }
    }
}

// ============================================================================
// RunCollector
// ============================================================================

pub struct RunCollector {
    pool: DbPool,
    profiles: Arc<dyn ProfileSource>,
    specs: Option<Arc<dyn AuthoritativeSpecSource>>,
    character_delay: Duration,
}

impl RunCollector {
    pub fn new(pool: DbPool, profiles: Arc<dyn ProfileSource>) -> Self {
        Self {
            pool,
            profiles,
            specs: None,
            character_delay: DEFAULT_CHARACTER_DELAY,
        }
    }

    pub fn with_spec_source(mut self, specs: Arc<dyn AuthoritativeSpecSource>) -> Self {
        self.specs = Some(specs);
        self
    }

    pub fn with_character_delay(mut self, delay: Duration) -> Self {
        self.character_delay = delay;
        self
    }

    /// Collect every character in order. Never fails as a whole: each
    /// character's error is captured in its `CharacterOutcome`.
    pub async fn collect_many(
        &self,
        characters: &[CharacterIdentity],
        options: &CollectOptions,
    ) -> BatchReport {
        let started = Instant::now();
        let started_at = chrono::Utc::now().timestamp_millis();
        let settings = match settings::get(&self.pool) {
            Ok(s) => Some(s),
            Err(e) => {
                tracing::warn!("Bot settings unavailable, runs will carry no season: {}", e);
                None
            }
        };

        tracing::info!(
            characters = characters.len(),
            sync_type = options.sync_type.as_str(),
            "Run collection starting"
        );

        let mut batch = BatchReport::default();
        for (idx, identity) in characters.iter().enumerate() {
            if idx > 0 && !self.character_delay.is_zero() {
                tokio::time::sleep(self.character_delay).await;
            }

            let mut report = CharacterReport::default();
            let outcome = match self
                .collect_into(identity, settings.as_ref(), &options.fields, &mut report)
                .await
            {
                Ok(()) => CharacterOutcome::Collected(report),
                Err(e) => {
                    tracing::warn!(
                        character = %identity,
                        kind = e.kind(),
                        stored = report.runs_added,
                        "Run collection failed: {}",
                        e
                    );
                    CharacterOutcome::from_error(&e, &report)
                }
            };
            batch.record(identity.clone(), outcome);
        }
        batch.duration_ms = started.elapsed().as_millis() as u64;

        tracing::info!(
            successful = batch.successful,
            failed = batch.failed,
            added = batch.total_runs_added,
            skipped = batch.total_runs_skipped,
            duration_ms = batch.duration_ms,
            "Run collection finished"
        );

        if options.record_history {
            let entry = SyncHistoryEntry {
                timestamp: started_at,
                sync_type: options.sync_type,
                runs_added: batch.total_runs_added as i64,
                characters_processed: characters.len() as i64,
                duration_ms: Some(batch.duration_ms as i64),
                success: batch.failed == 0,
                error_message: (batch.failed > 0)
                    .then(|| format!("{} of {} characters failed", batch.failed, characters.len())),
            };
            if let Err(e) = sync_history::add(&self.pool, &entry) {
                tracing::error!("Failed to record sync history: {}", e);
            }
        }

        batch
    }

    /// Collect one character: fetch, upsert, resolve specs, insert runs.
    pub async fn collect_character(
        &self,
        identity: &CharacterIdentity,
        settings: Option<&BotSettings>,
        fields: &[ProfileField],
    ) -> Result<CharacterReport, AppError> {
        let mut report = CharacterReport::default();
        self.collect_into(identity, settings, fields, &mut report).await?;
        Ok(report)
    }

    /// Fills `report` as it goes, so the counters survive an error.
    async fn collect_into(
        &self,
        identity: &CharacterIdentity,
        settings: Option<&BotSettings>,
        fields: &[ProfileField],
        report: &mut CharacterReport,
    ) -> Result<(), AppError> {
        let profile = self.profiles.fetch_profile(identity, fields).await?;

        let character_id = characters::upsert(
            &self.pool,
            identity,
            &CharacterProfile {
                class_name: profile.class.clone(),
                active_spec_name: profile.active_spec_name.clone(),
                active_spec_role: profile.active_spec_role,
            },
        )?;

        let lookup = self.authoritative_lookup(identity, settings).await;
        let season = settings.map(|s| s.season_name.clone());

        report.character_id = character_id;
        report.authoritative_available = lookup.is_some();

        for run in profile.all_runs() {
            let new_run = match map_run(
                run,
                lookup.as_ref(),
                profile.active_spec_name.as_deref(),
                profile.active_spec_role,
                season.clone(),
            ) {
                Ok((new_run, source)) => {
                    match source {
                        SpecSource::Authoritative => report.resolved_authoritative += 1,
                        SpecSource::Fallback => report.resolved_fallback += 1,
                    }
                    new_run
                }
                Err(e) => {
                    tracing::warn!(character = %identity, dungeon = %run.dungeon, "Skipping unmappable run: {}", e);
                    report.runs_invalid += 1;
                    continue;
                }
            };

            match runs::insert(&self.pool, character_id, &new_run) {
                Ok(InsertOutcome::Inserted(_)) => report.runs_added += 1,
                Ok(InsertOutcome::Updated(_)) => {
                    report.runs_added += 1;
                    report.runs_updated += 1;
                }
                Ok(InsertOutcome::Duplicate(_)) => report.runs_skipped += 1,
                Err(e) if e.is_persistence() => return Err(e),
                Err(e) => {
                    tracing::warn!(character = %identity, dungeon = %run.dungeon, "Rejected run: {}", e);
                    report.runs_invalid += 1;
                }
            }
        }

        tracing::info!(
            character = %identity,
            added = report.runs_added,
            updated = report.runs_updated,
            skipped = report.runs_skipped,
            authoritative = report.resolved_authoritative,
            fallback = report.resolved_fallback,
            "Character collected"
        );
        Ok(())
    }

    /// Best-effort authoritative spec data. `None` downgrades every run to
    /// the character's current spec.
    async fn authoritative_lookup(
        &self,
        identity: &CharacterIdentity,
        settings: Option<&BotSettings>,
    ) -> Option<SpecLookup> {
        let specs = self.specs.as_ref()?;
        let season_id = settings?.season_id;
        match specs.fetch_authoritative_specs(identity, season_id).await {
            Ok(lookup) => Some(lookup),
            Err(e) => {
                tracing::warn!(
                    character = %identity,
                    kind = e.kind(),
                    "Authoritative spec lookup failed, using current spec: {}", e
                );
                None
            }
        }
    }
}

/// Map an upstream run into store fields, attributing its spec.
fn map_run(
    run: &UpstreamRun,
    lookup: Option<&SpecLookup>,
    fallback_spec: Option<&str>,
    fallback_role: Option<crate::db::models::Role>,
    season: Option<String>,
) -> Result<(NewRun, SpecSource), AppError> {
    let completed_timestamp = crate::validation::parse_timestamp_ms("completed_at", &run.completed_at)?;
    let key = SpecKey::new(run.dungeon.clone(), run.mythic_level, completed_timestamp);
    let resolved = resolve_spec(&key, lookup, fallback_spec, fallback_role);

    let new_run = NewRun {
        dungeon: run.dungeon.clone(),
        mythic_level: run.mythic_level,
        completed_timestamp,
        clear_time_ms: run.clear_time_ms.max(0),
        keystone_run_id: run.keystone_run_id,
        timed: run.num_keystone_upgrades > 0,
        score: run.score,
        num_keystone_upgrades: run.num_keystone_upgrades.clamp(0, 3),
        spec_name: resolved.spec_name,
        spec_role: Some(resolved.role),
        affixes: run.affixes.clone(),
        season,
    };
    Ok((new_run, resolved.source))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::db::init_test_db;
    use crate::db::models::{Role, RunFilter};
    use crate::engine::spec_resolver::SpecAssignment;
    use crate::upstream::ParsedProfile;

    const T1: &str = "2024-09-20T19:33:12.000Z";
    const T1_MS: i64 = 1_726_860_792_000;
    const T2: &str = "2024-09-21T10:00:00.000Z";

    #[derive(Clone)]
    enum Reply {
        Profile(ParsedProfile),
        NotFound,
        Network,
    }

    struct FakeProfiles {
        replies: HashMap<String, Reply>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeProfiles {
        fn new(replies: Vec<(&str, Reply)>) -> Arc<Self> {
            Arc::new(Self {
                replies: replies.into_iter().map(|(n, r)| (n.to_string(), r)).collect(),
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ProfileSource for FakeProfiles {
        async fn fetch_profile(
            &self,
            identity: &CharacterIdentity,
            _fields: &[ProfileField],
        ) -> Result<ParsedProfile, AppError> {
            self.calls.lock().unwrap().push(identity.name.clone());
            match self.replies.get(&identity.name) {
                Some(Reply::Profile(p)) => Ok(p.clone()),
                Some(Reply::Network) => Err(AppError::Network("timed out".into())),
                Some(Reply::NotFound) | None => {
                    Err(AppError::NotFound(format!("character {identity}")))
                }
            }
        }
    }

    struct FakeSpecs(Option<SpecLookup>);

    #[async_trait]
    impl AuthoritativeSpecSource for FakeSpecs {
        async fn fetch_authoritative_specs(
            &self,
            _identity: &CharacterIdentity,
            _season_id: i64,
        ) -> Result<SpecLookup, AppError> {
            self.0
                .clone()
                .ok_or_else(|| AppError::Network("blizzard unreachable".into()))
        }
    }

    fn upstream_run(dungeon: &str, level: i32, completed_at: &str, upgrades: i32) -> UpstreamRun {
        UpstreamRun {
            dungeon: dungeon.into(),
            mythic_level: level,
            completed_at: completed_at.into(),
            clear_time_ms: 1_700_000,
            keystone_run_id: Some(1),
            num_keystone_upgrades: upgrades,
            score: 250.0,
            affixes: vec!["Fortified".into()],
        }
    }

    fn profile(name: &str, runs: Vec<UpstreamRun>) -> ParsedProfile {
        ParsedProfile {
            name: name.into(),
            class: Some("Death Knight".into()),
            active_spec_name: Some("Blood".into()),
            active_spec_role: Some(Role::Tank),
            best_runs: runs,
            ..Default::default()
        }
    }

    fn ident(name: &str) -> CharacterIdentity {
        CharacterIdentity::new(name, "silvermoon", "eu")
    }

    fn collector(pool: &DbPool, profiles: Arc<FakeProfiles>) -> RunCollector {
        RunCollector::new(pool.clone(), profiles).with_character_delay(Duration::ZERO)
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_going() {
        let pool = init_test_db().unwrap();
        let profiles = FakeProfiles::new(vec![
            ("Arthas", Reply::Profile(profile("Arthas", vec![upstream_run("The Dawnbreaker", 12, T1, 1)]))),
            ("Ghost", Reply::NotFound),
            ("Sylvanas", Reply::Profile(profile("Sylvanas", vec![upstream_run("Halls of Atonement", 10, T2, 2)]))),
        ]);
        let roster = vec![ident("Arthas"), ident("Ghost"), ident("Sylvanas")];

        let batch = collector(&pool, profiles.clone())
            .collect_many(&roster, &CollectOptions::default())
            .await;

        assert_eq!(batch.successful, 2);
        assert_eq!(batch.failed, 1);
        assert_eq!(batch.total_runs_added, 2);
        assert!(batch.per_character[0].outcome.is_success());
        assert!(matches!(batch.per_character[1].outcome, CharacterOutcome::NotFound { .. }));
        assert!(batch.per_character[2].outcome.is_success());
        assert_eq!(*profiles.calls.lock().unwrap(), vec!["Arthas", "Ghost", "Sylvanas"]);

        let history = sync_history::get_recent(&pool, Some(1)).unwrap();
        assert_eq!(history[0].runs_added, 2);
        assert_eq!(history[0].characters_processed, 3);
        assert!(!history[0].success);
    }

    #[tokio::test]
    async fn test_network_failure_is_reported_with_kind() {
        let pool = init_test_db().unwrap();
        let profiles = FakeProfiles::new(vec![("Arthas", Reply::Network)]);
        let batch = collector(&pool, profiles)
            .collect_many(&[ident("Arthas")], &CollectOptions::default())
            .await;

        assert_eq!(batch.failed, 1);
        match &batch.per_character[0].outcome {
            CharacterOutcome::Failed { kind, .. } => assert_eq!(kind, "network"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_storage_failure_keeps_runs_already_stored() {
        let pool = init_test_db().unwrap();
        pool.get()
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER reject_grim_batol BEFORE INSERT ON mythic_runs
                 WHEN NEW.dungeon = 'Grim Batol'
                 BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
            )
            .unwrap();
        let runs = vec![
            upstream_run("The Dawnbreaker", 12, T1, 1),
            upstream_run("Grim Batol", 11, T2, 1),
            upstream_run("Halls of Atonement", 10, T2, 1),
        ];
        let profiles = FakeProfiles::new(vec![("Arthas", Reply::Profile(profile("Arthas", runs)))]);

        let batch = collector(&pool, profiles)
            .collect_many(&[ident("Arthas")], &CollectOptions::default())
            .await;

        assert_eq!(batch.failed, 1);
        assert_eq!(batch.total_runs_added, 1);
        match &batch.per_character[0].outcome {
            CharacterOutcome::Failed { kind, runs_added, .. } => {
                assert_eq!(kind, "database");
                assert_eq!(*runs_added, 1);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        let history = sync_history::get_recent(&pool, Some(1)).unwrap();
        assert_eq!(history[0].runs_added, 1);
        assert!(!history[0].success);
    }

    #[tokio::test]
    async fn test_second_pass_skips_everything() {
        let pool = init_test_db().unwrap();
        let runs = vec![
            upstream_run("The Dawnbreaker", 12, T1, 1),
            upstream_run("Halls of Atonement", 10, T2, 0),
        ];
        let profiles = FakeProfiles::new(vec![("Arthas", Reply::Profile(profile("Arthas", runs)))]);
        let collector = collector(&pool, profiles);

        let first = collector.collect_many(&[ident("Arthas")], &CollectOptions::default()).await;
        assert_eq!(first.total_runs_added, 2);

        let second = collector.collect_many(&[ident("Arthas")], &CollectOptions::default()).await;
        assert_eq!(second.successful, 1);
        assert_eq!(second.total_runs_added, 0);
        assert_eq!(second.total_runs_skipped, 2);
    }

    #[tokio::test]
    async fn test_run_in_best_and_recent_lists_stored_once() {
        let pool = init_test_db().unwrap();
        let run = upstream_run("The Dawnbreaker", 12, T1, 1);
        let mut p = profile("Arthas", vec![run.clone()]);
        p.recent_runs = vec![UpstreamRun { keystone_run_id: None, ..run }];
        let profiles = FakeProfiles::new(vec![("Arthas", Reply::Profile(p))]);

        let batch = collector(&pool, profiles)
            .collect_many(&[ident("Arthas")], &CollectOptions::default())
            .await;
        assert_eq!(batch.total_runs_added, 1);
        assert_eq!(batch.total_runs_skipped, 1);
    }

    #[tokio::test]
    async fn test_authoritative_spec_is_stored() {
        let pool = init_test_db().unwrap();
        let profiles = FakeProfiles::new(vec![(
            "Arthas",
            Reply::Profile(profile(
                "Arthas",
                vec![
                    upstream_run("The Dawnbreaker", 15, T1, 1),
                    upstream_run("Halls of Atonement", 10, T2, 1),
                ],
            )),
        )]);
        let mut lookup = SpecLookup::new();
        lookup.insert(
            SpecKey::new("The Dawnbreaker", 15, T1_MS),
            SpecAssignment { spec_name: "Frost".into(), role: Role::Dps },
        );
        let collector = collector(&pool, profiles).with_spec_source(Arc::new(FakeSpecs(Some(lookup))));

        let report = collector
            .collect_character(&ident("Arthas"), settings::get(&pool).ok().as_ref(), &ProfileField::ALL)
            .await
            .unwrap();
        assert!(report.authoritative_available);
        assert_eq!(report.resolved_authoritative, 1);
        assert_eq!(report.resolved_fallback, 1);

        let stored = runs::get_by_spec(&pool, "Arthas", Some("Frost"), &RunFilter::new("silvermoon", "eu")).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].spec_role, Some(Role::Dps));
        assert_eq!(stored[0].season.as_deref(), Some("season-tww-3"));
    }

    #[tokio::test]
    async fn test_authoritative_failure_falls_back() {
        let pool = init_test_db().unwrap();
        let profiles = FakeProfiles::new(vec![(
            "Arthas",
            Reply::Profile(profile("Arthas", vec![upstream_run("The Dawnbreaker", 15, T1, 1)])),
        )]);
        let collector = collector(&pool, profiles).with_spec_source(Arc::new(FakeSpecs(None)));

        let batch = collector.collect_many(&[ident("Arthas")], &CollectOptions::default()).await;
        match &batch.per_character[0].outcome {
            CharacterOutcome::Collected(report) => {
                assert!(!report.authoritative_available);
                assert_eq!(report.resolved_fallback, 1);
                assert_eq!(report.runs_added, 1);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        let stored = runs::get_by_spec(&pool, "Arthas", Some("Blood"), &RunFilter::new("silvermoon", "eu")).unwrap();
        assert_eq!(stored.len(), 1);
    }

    #[tokio::test]
    async fn test_unparseable_run_is_counted_not_fatal() {
        let pool = init_test_db().unwrap();
        let profiles = FakeProfiles::new(vec![(
            "Arthas",
            Reply::Profile(profile(
                "Arthas",
                vec![
                    upstream_run("The Dawnbreaker", 12, "last tuesday", 1),
                    upstream_run("Halls of Atonement", 10, T2, 0),
                ],
            )),
        )]);
        let batch = collector(&pool, profiles)
            .collect_many(&[ident("Arthas")], &CollectOptions::default())
            .await;
        match &batch.per_character[0].outcome {
            CharacterOutcome::Collected(report) => {
                assert_eq!(report.runs_invalid, 1);
                assert_eq!(report.runs_added, 1);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_map_run_derives_timed_from_upgrades() {
        let (timed, _) = map_run(&upstream_run("X", 10, T1, 2), None, Some("Blood"), Some(Role::Tank), None).unwrap();
        assert!(timed.timed);
        assert_eq!(timed.completed_timestamp, T1_MS);
        let (depleted, source) = map_run(&upstream_run("X", 10, T1, 0), None, Some("Blood"), Some(Role::Tank), None).unwrap();
        assert!(!depleted.timed);
        assert_eq!(source, SpecSource::Fallback);
    }
}
