//! Daily stats cache.
//!
//! Scores are recomputed at most once per reset period. The period starts at
//! 10:00 UTC each day; a stats row stamped at or after the latest boundary is
//! served as is. Refreshes are single-flight per sport: concurrent readers of
//! a stale row wait for the one refresh and share its outcome, success or
//! failure, instead of repeating it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::engine::{ScoreEngine, ScoreError};
use crate::models::{ScoreCategory, Sport, SportRegistry, Stat};
use crate::storage::{Datastore, StorageError};

/// Hour of day (UTC) at which cached stats expire.
pub const RESET_HOUR_UTC: u32 = 10;

/// Errors that can occur while serving stats.
#[derive(Debug, Error)]
pub enum StatsError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Scoring error: {0}")]
    Score(#[from] ScoreError),

    /// The outcome of a refresh shared with every reader waiting on it.
    #[error(transparent)]
    Shared(Arc<StatsError>),
}

impl StatsError {
    /// The underlying error, looking through shared outcomes.
    pub fn root(&self) -> &StatsError {
        match self {
            StatsError::Shared(inner) => inner.root(),
            other => other,
        }
    }
}

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// The latest reset boundary at or before `now`.
pub fn previous_reset_boundary(now: DateTime<Utc>) -> DateTime<Utc> {
    let today = now.date_naive();
    let anchor = today
        .and_hms_opt(RESET_HOUR_UTC, 0, 0)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .unwrap_or(now);
    if anchor > now {
        anchor - Duration::days(1)
    } else {
        anchor
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
}

impl Freshness {
    pub fn of(stat: &Stat, boundary: DateTime<Utc>) -> Self {
        match (stat.etl_timestamp, &stat.etl_json) {
            (Some(stamped), Some(_)) if stamped >= boundary => Freshness::Fresh,
            _ => Freshness::Stale,
        }
    }
}

/// Scores of a sport's active year and when they were computed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EtlStats {
    pub sport: Sport,
    pub year: i32,

    /// When the scores were fetched.
    pub etl_time: DateTime<Utc>,

    /// The reset boundary the scores were checked against.
    pub etl_refresh_time: DateTime<Utc>,

    pub score_categories: Vec<ScoreCategory>,
}

/// Per-sport refresh coordination.
#[derive(Default)]
struct RefreshSlot {
    /// Held for the whole of a refresh.
    running: tokio::sync::Mutex<()>,

    /// Number of refresh attempts that have finished.
    finished: AtomicU64,

    /// Error of the latest attempt, tagged with its attempt number.
    failure: Mutex<Option<(u64, Arc<StatsError>)>>,

    /// Bumped by every invalidation; a refresh only persists when unchanged.
    generation: Mutex<u64>,
}

impl RefreshSlot {
    fn generation(&self) -> u64 {
        *self.generation.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Error of an attempt that finished after `seen` attempts, if it failed.
    fn failed_since(&self, seen: u64) -> Option<Arc<StatsError>> {
        let failure = self.failure.lock().unwrap_or_else(PoisonError::into_inner);
        match &*failure {
            Some((attempt, err)) if *attempt > seen => Some(Arc::clone(err)),
            _ => None,
        }
    }

    fn finish(&self, outcome: Result<EtlStats, StatsError>) -> Result<EtlStats, StatsError> {
        let mut failure = self.failure.lock().unwrap_or_else(PoisonError::into_inner);
        let attempt = self.finished.fetch_add(1, Ordering::SeqCst) + 1;
        match outcome {
            Ok(stats) => {
                *failure = None;
                Ok(stats)
            }
            Err(err) => {
                let shared = Arc::new(err);
                *failure = Some((attempt, Arc::clone(&shared)));
                Err(StatsError::Shared(shared))
            }
        }
    }

    /// Write `stat` unless the sport was invalidated after `generation`.
    fn persist_if_current(
        &self,
        store: &dyn Datastore,
        generation: u64,
        stat: &Stat,
    ) -> Result<bool, StorageError> {
        let current = self.generation.lock().unwrap_or_else(PoisonError::into_inner);
        if *current != generation {
            return Ok(false);
        }
        store.set_stat(stat)?;
        Ok(true)
    }
}

/// Serves cached stats, refreshing them through the engine when stale.
pub struct StatsCache {
    store: Arc<dyn Datastore>,
    engine: ScoreEngine,
    registry: Arc<SportRegistry>,
    clock: Arc<dyn Clock>,
    slots: Mutex<HashMap<Sport, Arc<RefreshSlot>>>,
}

impl StatsCache {
    pub fn new(
        store: Arc<dyn Datastore>,
        engine: ScoreEngine,
        registry: Arc<SportRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            engine,
            registry,
            clock,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Stats for the sport's active year, or `None` without an active year.
    ///
    /// Readers that queued behind a failed refresh get that refresh's error.
    pub async fn get_stats(&self, sport: Sport) -> Result<Option<EtlStats>, StatsError> {
        let Some(stat) = self.with_store(move |store| store.get_stat(sport)).await? else {
            debug!("No active year for {}", sport);
            return Ok(None);
        };
        let boundary = previous_reset_boundary(self.clock.now());
        if Freshness::of(&stat, boundary) == Freshness::Fresh {
            return Ok(Some(cached(stat, boundary)?));
        }

        let slot = self.slot(sport);
        let seen = slot.finished.load(Ordering::SeqCst);
        let _running = slot.running.lock().await;

        // Another caller may have refreshed while this one waited.
        let Some(stat) = self.with_store(move |store| store.get_stat(sport)).await? else {
            return Ok(None);
        };
        if Freshness::of(&stat, boundary) == Freshness::Fresh {
            debug!("Stats for {} refreshed by a concurrent request", sport);
            return Ok(Some(cached(stat, boundary)?));
        }
        if let Some(err) = slot.failed_since(seen) {
            debug!("Stats for {} failed in a concurrent refresh", sport);
            return Err(StatsError::Shared(err));
        }

        let outcome = self.refresh(&slot, sport, stat.year, boundary).await;
        slot.finish(outcome).map(Some)
    }

    /// Drop the sport's cached scores.
    ///
    /// A refresh already in flight will not write back scores computed from
    /// the roster it read before this call.
    pub fn invalidate(&self, sport: Sport) -> Result<(), StorageError> {
        let slot = self.slot(sport);
        let mut generation = slot.generation.lock().unwrap_or_else(PoisonError::into_inner);
        *generation += 1;
        self.store.clear_stat(sport)
    }

    fn slot(&self, sport: Sport) -> Arc<RefreshSlot> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(sport).or_default())
    }

    /// Run a store call on the blocking pool.
    async fn with_store<T, F>(&self, call: F) -> Result<T, StatsError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Datastore) -> Result<T, StorageError> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let value = tokio::task::spawn_blocking(move || call(store.as_ref()))
            .await
            .map_err(|e| StorageError::Blocking(e.to_string()))??;
        Ok(value)
    }

    async fn refresh(
        &self,
        slot: &Arc<RefreshSlot>,
        sport: Sport,
        year: i32,
        boundary: DateTime<Utc>,
    ) -> Result<EtlStats, StatsError> {
        info!(sport = %sport, year, "Refreshing stats");

        let generation = slot.generation();
        let (friends, players) = self
            .with_store(move |store| Ok((store.get_friends(sport)?, store.get_players(sport)?)))
            .await?;
        let categories = self.registry.for_sport(sport);
        let score_categories = self
            .engine
            .score_categories(&categories, year, &friends, &players)
            .await?;

        let etl_time = self.clock.now();
        let etl_json = serde_json::to_string(&score_categories)
            .map_err(|e| StorageError::Blob(e.to_string()))?;
        let stat = Stat {
            sport,
            year,
            etl_timestamp: Some(etl_time),
            etl_json: Some(etl_json),
        };
        let writer = Arc::clone(slot);
        let persisted = self
            .with_store(move |store| writer.persist_if_current(store, generation, &stat))
            .await?;

        if persisted {
            info!(
                sport = %sport,
                year,
                categories = score_categories.len(),
                "Stats refreshed"
            );
        } else {
            info!(sport = %sport, year, "Roster changed during refresh; scores not cached");
        }
        Ok(EtlStats {
            sport,
            year,
            etl_time,
            etl_refresh_time: boundary,
            score_categories,
        })
    }
}

fn cached(stat: Stat, boundary: DateTime<Utc>) -> Result<EtlStats, StatsError> {
    let (Some(etl_time), Some(json)) = (stat.etl_timestamp, stat.etl_json) else {
        let missing = format!("no cached scores for {} {}", stat.sport, stat.year);
        return Err(StorageError::Blob(missing).into());
    };
    let score_categories: Vec<ScoreCategory> =
        serde_json::from_str(&json).map_err(|e| StorageError::Blob(e.to_string()))?;
    Ok(EtlStats {
        sport: stat.sport,
        year: stat.year,
        etl_time,
        etl_refresh_time: boundary,
        score_categories,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FetchError;
    use crate::models::{
        CategoryKind, Friend, FriendId, NameScore, Player, PlayerId, SourceId, Year,
    };
    use crate::roster::{save_friends, save_players, save_years};
    use crate::sources::{BulkSource, ScoreSource, SourceRegistry};
    use crate::storage::SqliteStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct FixedClock(DateTime<Utc>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    /// Counts calls; optionally fails or waits before answering.
    #[derive(Default)]
    struct CountingBulk {
        calls: AtomicUsize,
        fail: AtomicBool,
        delay_ms: u64,
    }

    #[async_trait]
    impl BulkSource for CountingBulk {
        async fn name_scores(
            &self,
            _kind: CategoryKind,
            _year: i32,
            _ids: &[SourceId],
        ) -> Result<HashMap<SourceId, NameScore>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.delay_ms > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(FetchError::HttpStatus {
                    status: 503,
                    url: "stub://teams".to_string(),
                });
            }
            Ok(HashMap::new())
        }
    }

    fn at(raw: &str) -> DateTime<Utc> {
        raw.parse().unwrap()
    }

    fn stat_at(stamp: Option<&str>) -> Stat {
        Stat {
            sport: Sport::Mlb,
            year: 2019,
            etl_timestamp: stamp.map(at),
            etl_json: Some("[]".to_string()),
        }
    }

    fn cache(store: Arc<SqliteStore>, bulk: Arc<CountingBulk>, now: &str) -> StatsCache {
        let mut sources = SourceRegistry::new();
        for kind in [CategoryKind::MlbTeam, CategoryKind::MlbHitter, CategoryKind::MlbPitcher] {
            sources = sources.with_scorer(kind, ScoreSource::BulkKeyed(bulk.clone()));
        }
        StatsCache::new(
            store,
            ScoreEngine::new(Arc::new(sources)),
            Arc::new(SportRegistry::default()),
            Arc::new(FixedClock(at(now))),
        )
    }

    fn store_with_active_year() -> Arc<SqliteStore> {
        let store = SqliteStore::open_in_memory().unwrap();
        save_years(&store, Sport::Mlb, &[Year { value: 2019, active: true }]).unwrap();
        save_friends(
            &store,
            Sport::Mlb,
            &[Friend {
                id: FriendId::new(0),
                display_order: 1,
                name: "Carl".to_string(),
            }],
        )
        .unwrap();
        Arc::new(store)
    }

    fn draft_team(store: &SqliteStore) {
        let registry = SportRegistry::default();
        let friend_id = store.get_friends(Sport::Mlb).unwrap()[0].id;
        save_players(
            store,
            &registry,
            Sport::Mlb,
            &[Player {
                id: PlayerId::new(0),
                category_id: registry.for_sport(Sport::Mlb)[0].id,
                source_id: SourceId::new(112),
                friend_id,
                display_order: 1,
            }],
        )
        .unwrap();
    }

    #[test]
    fn test_boundary_before_anchor_uses_yesterday() {
        assert_eq!(
            previous_reset_boundary(at("2019-08-22T00:00:00Z")),
            at("2019-08-21T10:00:00Z")
        );
    }

    #[test]
    fn test_boundary_after_anchor_uses_today() {
        assert_eq!(
            previous_reset_boundary(at("2019-08-22T15:30:00Z")),
            at("2019-08-22T10:00:00Z")
        );
        assert_eq!(
            previous_reset_boundary(at("2019-08-22T10:00:00Z")),
            at("2019-08-22T10:00:00Z")
        );
    }

    #[test]
    fn test_freshness_against_boundary() {
        let boundary = previous_reset_boundary(at("2019-08-22T00:00:00Z"));

        assert_eq!(
            Freshness::of(&stat_at(Some("2019-08-21T09:00:00Z")), boundary),
            Freshness::Stale
        );
        assert_eq!(
            Freshness::of(&stat_at(Some("2019-08-21T11:00:00Z")), boundary),
            Freshness::Fresh
        );
        assert_eq!(
            Freshness::of(&stat_at(Some("2019-08-21T10:00:00Z")), boundary),
            Freshness::Fresh
        );
        assert_eq!(Freshness::of(&stat_at(None), boundary), Freshness::Stale);

        let mut cleared = stat_at(Some("2019-08-21T11:00:00Z"));
        cleared.etl_json = None;
        assert_eq!(Freshness::of(&cleared, boundary), Freshness::Stale);
    }

    #[tokio::test]
    async fn test_no_active_year_is_empty() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let stats = cache(store, Arc::default(), "2019-08-22T00:00:00Z");

        assert_eq!(stats.get_stats(Sport::Mlb).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_stale_refreshes_then_serves_cache() {
        let store = store_with_active_year();
        let bulk = Arc::new(CountingBulk::default());
        let stats = cache(Arc::clone(&store), Arc::clone(&bulk), "2019-08-22T00:00:00Z");

        let first = stats.get_stats(Sport::Mlb).await.unwrap().unwrap();
        let second = stats.get_stats(Sport::Mlb).await.unwrap().unwrap();

        assert_eq!(first, second);
        assert_eq!(first.year, 2019);
        assert_eq!(first.etl_refresh_time, at("2019-08-21T10:00:00Z"));
        assert_eq!(first.score_categories.len(), 3);
        assert_eq!(first.score_categories[0].friend_scores[0].name, "Carl");
        // Nobody owns players, so nothing was fetched.
        assert_eq!(bulk.calls.load(Ordering::SeqCst), 0);
        assert!(store.get_stat(Sport::Mlb).unwrap().unwrap().etl_timestamp.is_some());
    }

    #[tokio::test]
    async fn test_fresh_row_is_not_recomputed() {
        let store = store_with_active_year();
        store.set_stat(&stat_at(Some("2019-08-21T11:00:00Z"))).unwrap();
        let stats = cache(Arc::clone(&store), Arc::default(), "2019-08-22T00:00:00Z");

        let served = stats.get_stats(Sport::Mlb).await.unwrap().unwrap();

        assert!(served.score_categories.is_empty());
        assert_eq!(served.etl_time, at("2019-08-21T11:00:00Z"));
    }

    #[tokio::test]
    async fn test_corrupt_blob_is_an_error() {
        let store = store_with_active_year();
        let mut corrupt = stat_at(Some("2019-08-21T11:00:00Z"));
        corrupt.etl_json = Some("{not json".to_string());
        store.set_stat(&corrupt).unwrap();
        let stats = cache(store, Arc::default(), "2019-08-22T00:00:00Z");

        let err = stats.get_stats(Sport::Mlb).await.unwrap_err();

        assert!(matches!(err, StatsError::Storage(StorageError::Blob(_))));
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_row() {
        let store = store_with_active_year();
        draft_team(&store);
        let stale = stat_at(Some("2019-08-21T09:00:00Z"));
        store.set_stat(&stale).unwrap();
        let bulk = Arc::new(CountingBulk::default());
        bulk.fail.store(true, Ordering::SeqCst);
        let stats = cache(Arc::clone(&store), bulk, "2019-08-22T00:00:00Z");

        let err = stats.get_stats(Sport::Mlb).await.unwrap_err();

        assert!(matches!(err.root(), StatsError::Score(ScoreError::Fetch { .. })));
        assert_eq!(store.get_stat(Sport::Mlb).unwrap(), Some(stale));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_stale_reads_refresh_once() {
        let store = store_with_active_year();
        draft_team(&store);
        let bulk = Arc::new(CountingBulk {
            delay_ms: 50,
            ..Default::default()
        });
        let stats = Arc::new(cache(store, Arc::clone(&bulk), "2019-08-22T00:00:00Z"));

        let mut readers = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let stats = Arc::clone(&stats);
            readers.spawn(async move { stats.get_stats(Sport::Mlb).await });
        }
        let mut served = Vec::new();
        while let Some(joined) = readers.join_next().await {
            served.push(joined.unwrap().unwrap().unwrap());
        }

        assert_eq!(bulk.calls.load(Ordering::SeqCst), 1);
        assert!(served.windows(2).all(|pair| pair[0] == pair[1]));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_readers_share_a_failed_refresh() {
        let store = store_with_active_year();
        draft_team(&store);
        let bulk = Arc::new(CountingBulk {
            delay_ms: 100,
            ..Default::default()
        });
        bulk.fail.store(true, Ordering::SeqCst);
        let stats = Arc::new(cache(store, Arc::clone(&bulk), "2019-08-22T00:00:00Z"));

        let mut readers = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let stats = Arc::clone(&stats);
            readers.spawn(async move { stats.get_stats(Sport::Mlb).await });
        }
        let mut failures = 0;
        while let Some(joined) = readers.join_next().await {
            let err = joined.unwrap().unwrap_err();
            assert!(matches!(err.root(), StatsError::Score(ScoreError::Fetch { .. })));
            failures += 1;
        }

        assert_eq!(failures, 8);
        assert_eq!(bulk.calls.load(Ordering::SeqCst), 1);

        // A later reader tries again.
        assert!(stats.get_stats(Sport::Mlb).await.is_err());
        assert_eq!(bulk.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_rename_during_refresh_is_served_next() {
        let store = store_with_active_year();
        draft_team(&store);
        let bulk = Arc::new(CountingBulk {
            delay_ms: 300,
            ..Default::default()
        });
        let stats = Arc::new(cache(
            Arc::clone(&store),
            Arc::clone(&bulk),
            "2019-08-22T00:00:00Z",
        ));

        let in_flight = {
            let stats = Arc::clone(&stats);
            tokio::spawn(async move { stats.get_stats(Sport::Mlb).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let mut carl = store.get_friends(Sport::Mlb).unwrap()[0].clone();
        carl.name = "Renamed".to_string();
        save_friends(store.as_ref(), Sport::Mlb, &[carl]).unwrap();
        stats.invalidate(Sport::Mlb).unwrap();

        let before = in_flight.await.unwrap().unwrap().unwrap();
        assert_eq!(before.score_categories[0].friend_scores[0].name, "Carl");
        assert_eq!(
            store.get_stat(Sport::Mlb).unwrap().unwrap().etl_json,
            None
        );

        let after = stats.get_stats(Sport::Mlb).await.unwrap().unwrap();
        assert_eq!(after.score_categories[0].friend_scores[0].name, "Renamed");
        assert_eq!(bulk.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_clears_fresh_row() {
        let store = store_with_active_year();
        store.set_stat(&stat_at(Some("2019-08-21T11:00:00Z"))).unwrap();
        let stats = cache(Arc::clone(&store), Arc::default(), "2019-08-22T00:00:00Z");

        stats.invalidate(Sport::Mlb).unwrap();

        let row = store.get_stat(Sport::Mlb).unwrap().unwrap();
        assert_eq!(row.etl_timestamp, None);
        let served = stats.get_stats(Sport::Mlb).await.unwrap().unwrap();
        assert_eq!(served.etl_time, at("2019-08-22T00:00:00Z"));
    }
}
