//! External score providers.
//!
//! Each category kind is scored by one of two provider shapes:
//! - **Player-keyed** ([`PlayerSource`]): one batched name lookup for every
//!   source id plus one stat lookup per source id
//! - **Bulk-keyed** ([`BulkSource`]): a single call returning
//!   `source id -> (name, score)` for everything the provider knows
//!
//! Providers only translate third-party JSON into that normalized shape;
//! aggregation lives in [`crate::calculate`] and fan-out in [`crate::engine`].

pub mod mlb;
pub mod nfl;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::fetch::{FetchError, Fetcher};
use crate::models::{CategoryKind, NameScore, SearchResult, SourceId};

/// Provider needing separate name and per-player stat lookups.
#[async_trait]
pub trait PlayerSource: Send + Sync {
    /// Resolve names for all `ids` in one request.
    async fn names(
        &self,
        kind: CategoryKind,
        ids: &[SourceId],
    ) -> Result<HashMap<SourceId, String>, FetchError>;

    /// Fetch the season stat of a single player.
    async fn stat(&self, kind: CategoryKind, year: i32, id: SourceId) -> Result<i64, FetchError>;
}

/// Provider returning every name and score in a single request.
#[async_trait]
pub trait BulkSource: Send + Sync {
    /// `ids` lists the players of interest; providers may return more.
    async fn name_scores(
        &self,
        kind: CategoryKind,
        year: i32,
        ids: &[SourceId],
    ) -> Result<HashMap<SourceId, NameScore>, FetchError>;
}

/// Provider lookup of candidate players or teams by name.
#[async_trait]
pub trait Searcher: Send + Sync {
    async fn search(
        &self,
        kind: CategoryKind,
        year: i32,
        query: &str,
        active_only: bool,
    ) -> Result<Vec<SearchResult>, FetchError>;
}

/// How a category's scores are fetched.
#[derive(Clone)]
pub enum ScoreSource {
    PlayerKeyed(Arc<dyn PlayerSource>),
    BulkKeyed(Arc<dyn BulkSource>),
}

/// Base URLs and keys of the third-party providers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_mlb_stats_url")]
    pub mlb_stats_url: String,

    #[serde(default = "default_mlb_lookup_url")]
    pub mlb_lookup_url: String,

    #[serde(default = "default_nfl_url")]
    pub nfl_url: String,

    #[serde(default = "default_nfl_app_key")]
    pub nfl_app_key: String,
}

fn default_mlb_stats_url() -> String {
    "http://statsapi.mlb.com".to_string()
}

fn default_mlb_lookup_url() -> String {
    "http://lookup-service-prod.mlb.com".to_string()
}

fn default_nfl_url() -> String {
    "https://api.fantasy.nfl.com".to_string()
}

fn default_nfl_app_key() -> String {
    "test_key_1".to_string()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            mlb_stats_url: default_mlb_stats_url(),
            mlb_lookup_url: default_mlb_lookup_url(),
            nfl_url: default_nfl_url(),
            nfl_app_key: default_nfl_app_key(),
        }
    }
}

/// Scorers and searchers for each category kind.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    scorers: HashMap<CategoryKind, ScoreSource>,
    searchers: HashMap<CategoryKind, Arc<dyn Searcher>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wire the MLB and NFL providers onto a shared fetcher.
    pub fn providers(fetcher: Arc<Fetcher>, config: &ProviderConfig) -> Self {
        let mlb_teams = Arc::new(mlb::MlbTeams::new(
            Arc::clone(&fetcher),
            &config.mlb_stats_url,
        ));
        let mlb_players = Arc::new(mlb::MlbPlayers::new(
            Arc::clone(&fetcher),
            &config.mlb_stats_url,
            &config.mlb_lookup_url,
        ));
        let nfl = nfl::NflClient::new(fetcher, &config.nfl_url, &config.nfl_app_key);
        let nfl_teams = Arc::new(nfl::NflTeams::new(nfl.clone()));
        let nfl_players = Arc::new(nfl::NflPlayers::new(nfl));

        Self::new()
            .with_scorer(CategoryKind::MlbTeam, ScoreSource::BulkKeyed(mlb_teams.clone()))
            .with_searcher(CategoryKind::MlbTeam, mlb_teams)
            .with_scorer(
                CategoryKind::MlbHitter,
                ScoreSource::PlayerKeyed(mlb_players.clone()),
            )
            .with_searcher(CategoryKind::MlbHitter, mlb_players.clone())
            .with_scorer(
                CategoryKind::MlbPitcher,
                ScoreSource::PlayerKeyed(mlb_players.clone()),
            )
            .with_searcher(CategoryKind::MlbPitcher, mlb_players)
            .with_scorer(CategoryKind::NflTeam, ScoreSource::BulkKeyed(nfl_teams.clone()))
            .with_searcher(CategoryKind::NflTeam, nfl_teams)
            .with_scorer(CategoryKind::NflQb, ScoreSource::BulkKeyed(nfl_players.clone()))
            .with_searcher(CategoryKind::NflQb, nfl_players.clone())
            .with_scorer(CategoryKind::NflMisc, ScoreSource::BulkKeyed(nfl_players.clone()))
            .with_searcher(CategoryKind::NflMisc, nfl_players)
    }

    pub fn with_scorer(mut self, kind: CategoryKind, source: ScoreSource) -> Self {
        self.scorers.insert(kind, source);
        self
    }

    pub fn with_searcher(mut self, kind: CategoryKind, searcher: Arc<dyn Searcher>) -> Self {
        self.searchers.insert(kind, searcher);
        self
    }

    pub fn scorer(&self, kind: CategoryKind) -> Option<ScoreSource> {
        self.scorers.get(&kind).cloned()
    }

    pub fn searcher(&self, kind: CategoryKind) -> Option<Arc<dyn Searcher>> {
        self.searchers.get(&kind).cloned()
    }
}

/// Order search results: prefix matches, then other matches, then the rest.
pub fn rank_results(mut results: Vec<SearchResult>, query: &str) -> Vec<SearchResult> {
    let query = query.trim().to_lowercase();
    let rank = |result: &SearchResult| {
        let name = result.name.to_lowercase();
        if name.starts_with(&query) {
            0
        } else if name.contains(&query) {
            1
        } else {
            2
        }
    };
    results.sort_by(|a, b| {
        rank(a)
            .cmp(&rank(b))
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.source_id.cmp(&b.source_id))
    });
    results
}

/// Case-insensitive substring match used by the team searchers.
pub(crate) fn name_matches(name: &str, query: &str) -> bool {
    name.to_lowercase().contains(&query.trim().to_lowercase())
}
