//! Score categorization engine.
//!
//! Fans out one task per category of a sport, and within player-keyed
//! categories one names task plus one stat task per distinct source id.
//! The first failure in any fan-out group aborts and joins every sibling
//! task before the error is returned.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::calculate::{
    build_score_category, name_scores_from_field_maps, name_scores_from_source_map,
    CalculateError,
};
use crate::fetch::FetchError;
use crate::models::{
    CategoryId, CategoryKind, Friend, Player, PlayerCategory, ScoreCategory, SourceId,
};
use crate::sources::{ScoreSource, SourceRegistry};

/// Errors that can occur while scoring a sport.
#[derive(Debug, Error)]
pub enum ScoreError {
    #[error("Player references unknown category {0}")]
    UnknownCategory(CategoryId),

    #[error("No score source for {0:?}")]
    NoSource(CategoryKind),

    #[error("Fetching {category} scores: {source}")]
    Fetch {
        category: String,
        #[source]
        source: FetchError,
    },

    #[error("Expected {expected} name and stat results for {category}, got {received}")]
    Incomplete {
        category: String,
        expected: usize,
        received: usize,
    },

    #[error(transparent)]
    Missing(#[from] CalculateError),

    #[error("Score task failed: {0}")]
    Task(String),
}

/// A single fan-in message from a player-keyed fetch.
#[derive(Debug)]
enum Lookup {
    Name(SourceId, String),
    Stat(SourceId, i64),
}

/// Computes ordered score categories from the configured score sources.
#[derive(Clone)]
pub struct ScoreEngine {
    sources: Arc<SourceRegistry>,
}

impl ScoreEngine {
    pub fn new(sources: Arc<SourceRegistry>) -> Self {
        Self { sources }
    }

    /// Score every category concurrently, ordered by display order.
    ///
    /// Players whose category is not listed are rejected before any fetch.
    pub async fn score_categories(
        &self,
        categories: &[PlayerCategory],
        year: i32,
        friends: &[Friend],
        players: &[Player],
    ) -> Result<Vec<ScoreCategory>, ScoreError> {
        let mut by_category: HashMap<CategoryId, Vec<Player>> =
            categories.iter().map(|c| (c.id, Vec::new())).collect();
        for player in players {
            by_category
                .get_mut(&player.category_id)
                .ok_or(ScoreError::UnknownCategory(player.category_id))?
                .push(player.clone());
        }

        info!(
            "Scoring {} categories for {} with {} players",
            categories.len(),
            year,
            players.len()
        );

        let friends = Arc::new(friends.to_vec());
        let mut tasks = JoinSet::new();
        for category in categories {
            let category = category.clone();
            let players = by_category.remove(&category.id).unwrap_or_default();
            let sources = Arc::clone(&self.sources);
            let friends = Arc::clone(&friends);
            tasks.spawn(async move {
                fetch_category(&sources, &category, year, &friends, &players).await
            });
        }

        let mut scored = join_or_abort(tasks).await?;
        scored.sort_by_key(|sc| sc.display_order);
        Ok(scored)
    }

    /// Score a single category.
    pub async fn fetch_scores(
        &self,
        category: &PlayerCategory,
        year: i32,
        friends: &[Friend],
        players: &[Player],
    ) -> Result<ScoreCategory, ScoreError> {
        fetch_category(&self.sources, category, year, friends, players).await
    }
}

async fn fetch_category(
    sources: &SourceRegistry,
    category: &PlayerCategory,
    year: i32,
    friends: &[Friend],
    players: &[Player],
) -> Result<ScoreCategory, ScoreError> {
    let ids: Vec<SourceId> = players
        .iter()
        .map(|p| p.source_id)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    if ids.is_empty() {
        debug!("No players in {}, skipping fetch", category.name);
        return Ok(build_score_category(category, friends, players, &HashMap::new()));
    }

    let source = sources
        .scorer(category.kind)
        .ok_or(ScoreError::NoSource(category.kind))?;
    let fetch_err = |source: FetchError| ScoreError::Fetch {
        category: category.name.clone(),
        source,
    };

    let name_scores = match source {
        ScoreSource::BulkKeyed(bulk) => {
            let source_scores = bulk
                .name_scores(category.kind, year, &ids)
                .await
                .map_err(fetch_err)?;
            name_scores_from_source_map(players, &source_scores)
        }
        ScoreSource::PlayerKeyed(player_source) => {
            let mut tasks = JoinSet::new();

            let names_source = Arc::clone(&player_source);
            let names_ids = ids.clone();
            let kind = category.kind;
            let names_category = category.name.clone();
            tasks.spawn(async move {
                let names = names_source
                    .names(kind, &names_ids)
                    .await
                    .map_err(|source| ScoreError::Fetch {
                        category: names_category,
                        source,
                    })?;
                Ok::<_, ScoreError>(
                    names
                        .into_iter()
                        .map(|(id, name)| Lookup::Name(id, name))
                        .collect::<Vec<_>>(),
                )
            });

            for &id in &ids {
                let stat_source = Arc::clone(&player_source);
                let stat_category = category.name.clone();
                tasks.spawn(async move {
                    let stat = stat_source
                        .stat(kind, year, id)
                        .await
                        .map_err(|source| ScoreError::Fetch {
                            category: stat_category,
                            source,
                        })?;
                    Ok::<_, ScoreError>(vec![Lookup::Stat(id, stat)])
                });
            }

            let lookups: Vec<Lookup> = join_or_abort(tasks).await?.into_iter().flatten().collect();

            let expected = 2 * ids.len();
            if lookups.len() != expected {
                return Err(ScoreError::Incomplete {
                    category: category.name.clone(),
                    expected,
                    received: lookups.len(),
                });
            }

            let mut names = HashMap::with_capacity(ids.len());
            let mut stats = HashMap::with_capacity(ids.len());
            for lookup in lookups {
                match lookup {
                    Lookup::Name(id, name) => {
                        names.insert(id, name);
                    }
                    Lookup::Stat(id, stat) => {
                        stats.insert(id, stat);
                    }
                }
            }
            name_scores_from_field_maps(players, &names, &stats)?
        }
    };

    debug!(
        "Scored {} players in {} for {}",
        players.len(),
        category.name,
        year
    );
    Ok(build_score_category(category, friends, players, &name_scores))
}

/// Collect every task result, or abort and join the rest on the first error.
async fn join_or_abort<T: Send + 'static>(
    mut tasks: JoinSet<Result<T, ScoreError>>,
) -> Result<Vec<T>, ScoreError> {
    let mut results = Vec::with_capacity(tasks.len());
    while let Some(joined) = tasks.join_next().await {
        let outcome = joined
            .map_err(|e| ScoreError::Task(e.to_string()))
            .and_then(|result| result);
        match outcome {
            Ok(value) => results.push(value),
            Err(err) => {
                debug!("Aborting {} sibling tasks: {}", tasks.len(), err);
                tasks.shutdown().await;
                return Err(err);
            }
        }
    }
    Ok(results)
}
