//! The pool facade used by the API and the CLI.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::engine::ScoreEngine;
use crate::etl::{Clock, EtlStats, StatsCache, StatsError};
use crate::fetch::{FetchError, RequestCache};
use crate::models::{
    CategoryId, Friend, Player, PlayerCategory, SearchResult, Sport, SportRegistry, Year,
};
use crate::roster::{self, RosterError};
use crate::sources::{rank_results, SourceRegistry};
use crate::storage::{Datastore, StorageError};

/// Errors returned by pool operations.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error(transparent)]
    Stats(#[from] StatsError),

    #[error(transparent)]
    Roster(#[from] RosterError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Unknown category {0}")]
    UnknownCategory(CategoryId),

    #[error("Invalid search: {0}")]
    InvalidSearch(String),

    #[error("Searching {category}: {source}")]
    Search {
        category: String,
        #[source]
        source: FetchError,
    },
}

/// Stats, roster edits, and search over one datastore.
pub struct Pool {
    store: Arc<dyn Datastore>,
    registry: Arc<SportRegistry>,
    sources: Arc<SourceRegistry>,
    request_cache: Arc<RequestCache>,
    stats: StatsCache,
}

impl Pool {
    pub fn new(
        store: Arc<dyn Datastore>,
        registry: Arc<SportRegistry>,
        sources: Arc<SourceRegistry>,
        request_cache: Arc<RequestCache>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let stats = StatsCache::new(
            Arc::clone(&store),
            ScoreEngine::new(Arc::clone(&sources)),
            Arc::clone(&registry),
            clock,
        );
        Self {
            store,
            registry,
            sources,
            request_cache,
            stats,
        }
    }

    pub fn registry(&self) -> &SportRegistry {
        &self.registry
    }

    /// Scores of the sport's active year, or `None` without one.
    pub async fn get_stats(&self, sport: Sport) -> Result<Option<EtlStats>, PoolError> {
        Ok(self.stats.get_stats(sport).await?)
    }

    pub fn years(&self, sport: Sport) -> Result<Vec<Year>, PoolError> {
        Ok(self.store.get_years(sport)?)
    }

    pub fn friends(&self, sport: Sport) -> Result<Vec<Friend>, PoolError> {
        Ok(self.store.get_friends(sport)?)
    }

    pub fn players(&self, sport: Sport) -> Result<Vec<Player>, PoolError> {
        Ok(self.store.get_players(sport)?)
    }

    /// Replace the active year's friends and drop the cached scores.
    pub fn save_friends(&self, sport: Sport, friends: &[Friend]) -> Result<(), PoolError> {
        roster::save_friends(self.store.as_ref(), sport, friends)?;
        self.invalidate_after_save(sport);
        Ok(())
    }

    /// Replace the active year's players and drop the cached scores.
    pub fn save_players(&self, sport: Sport, players: &[Player]) -> Result<(), PoolError> {
        roster::save_players(self.store.as_ref(), &self.registry, sport, players)?;
        self.invalidate_after_save(sport);
        Ok(())
    }

    pub fn save_years(&self, sport: Sport, years: &[Year]) -> Result<(), PoolError> {
        Ok(roster::save_years(self.store.as_ref(), sport, years)?)
    }

    /// Forget every cached response and the sport's cached scores.
    pub fn clear_cache(&self, sport: Sport) -> Result<(), PoolError> {
        self.request_cache.clear();
        self.stats.invalidate(sport)?;
        info!("Cleared caches for {}", sport);
        Ok(())
    }

    /// Search a category's provider, best matches first.
    pub async fn search(
        &self,
        category_id: CategoryId,
        year: i32,
        query: &str,
        active_only: bool,
    ) -> Result<Vec<SearchResult>, PoolError> {
        if query.trim().is_empty() {
            return Err(PoolError::InvalidSearch("query must not be empty".to_string()));
        }
        let category = self.category(category_id)?;
        let searcher = self.sources.searcher(category.kind).ok_or_else(|| {
            PoolError::InvalidSearch(format!("{} cannot be searched", category.name))
        })?;

        let results = searcher
            .search(category.kind, year, query, active_only)
            .await
            .map_err(|source| PoolError::Search {
                category: category.name.clone(),
                source,
            })?;
        Ok(rank_results(results, query))
    }

    /// The roster is already committed, so a failed clear is retried once and
    /// then only logged; the scores catch up at the next daily reset.
    fn invalidate_after_save(&self, sport: Sport) {
        if let Err(first) = self.stats.invalidate(sport) {
            warn!("Clearing {} stats after a roster save failed, retrying: {}", sport, first);
            if let Err(err) = self.stats.invalidate(sport) {
                warn!("Stats for {} stay cached until the next reset: {}", sport, err);
            }
        }
    }

    fn category(&self, id: CategoryId) -> Result<&PlayerCategory, PoolError> {
        self.registry.get(id).ok_or(PoolError::UnknownCategory(id))
    }
}
