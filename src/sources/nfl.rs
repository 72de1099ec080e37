//! NFL fantasy API: team records and player touchdowns.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use super::{name_matches, BulkSource, Searcher};
use crate::fetch::{parse_url, FetchError, Fetcher};
use crate::models::{CategoryKind, NameScore, SearchResult, SourceId};

const PASSING_TD: &str = "6";
const RUSHING_TD: &str = "15";
const RECEIVING_TD: &str = "22";
const RETURN_TD: &str = "28";

/// Quarterback, running back, wide receiver, tight end.
const SEARCH_POSITION_IDS: &str = "1,2,3,4";

/// Shared URL building for the fantasy API, which wants the app key on
/// every request.
#[derive(Clone)]
pub struct NflClient {
    fetcher: Arc<Fetcher>,
    base_url: String,
    app_key: String,
}

impl NflClient {
    pub fn new(fetcher: Arc<Fetcher>, base_url: &str, app_key: &str) -> Self {
        Self {
            fetcher,
            base_url: base_url.trim_end_matches('/').to_string(),
            app_key: app_key.to_string(),
        }
    }

    fn url(&self, path: &str, params: &[(&str, String)]) -> Result<Url, FetchError> {
        let mut url = parse_url(&format!("{}/v2/{}", self.base_url, path))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("appKey", &self.app_key);
            for (key, value) in params {
                query.append_pair(key, value);
            }
        }
        Ok(url)
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, FetchError> {
        self.fetcher.fetch_json(&self.url(path, params)?).await
    }
}

// ── Teams ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Schedule {
    #[serde(rename = "nflTeams", default)]
    teams: HashMap<String, NflTeam>,
}

#[derive(Debug, Deserialize)]
struct NflTeam {
    #[serde(rename = "fullName")]
    full_name: String,
    #[serde(default)]
    record: String,
}

/// Leading wins count of a `W-L-T` record.
fn record_wins(record: &str) -> Result<i64, FetchError> {
    let wins = record.split('-').next().unwrap_or_default();
    if wins.is_empty() || !wins.bytes().all(|b| b.is_ascii_digit()) {
        return Err(FetchError::Payload(format!("invalid NFL record {:?}", record)));
    }
    wins.parse()
        .map_err(|_| FetchError::Payload(format!("invalid NFL record {:?}", record)))
}

fn parse_source_id(raw: &str) -> Result<SourceId, FetchError> {
    raw.parse()
        .map_err(|_| FetchError::Payload(format!("invalid NFL source id {:?}", raw)))
}

/// Team wins from the season schedule.
pub struct NflTeams {
    client: NflClient,
}

impl NflTeams {
    pub fn new(client: NflClient) -> Self {
        Self { client }
    }

    async fn teams(&self, year: i32) -> Result<Vec<(SourceId, NflTeam)>, FetchError> {
        let schedule: Schedule = self
            .client
            .get("nfl/schedule", &[("season", year.to_string())])
            .await?;
        schedule
            .teams
            .into_iter()
            .map(|(id, team)| Ok((parse_source_id(&id)?, team)))
            .collect()
    }
}

#[async_trait]
impl BulkSource for NflTeams {
    async fn name_scores(
        &self,
        _kind: CategoryKind,
        year: i32,
        _ids: &[SourceId],
    ) -> Result<HashMap<SourceId, NameScore>, FetchError> {
        self.teams(year)
            .await?
            .into_iter()
            .map(|(id, team)| {
                let wins = record_wins(&team.record)?;
                Ok((id, NameScore::new(team.full_name, wins)))
            })
            .collect()
    }
}

#[async_trait]
impl Searcher for NflTeams {
    async fn search(
        &self,
        _kind: CategoryKind,
        year: i32,
        query: &str,
        _active_only: bool,
    ) -> Result<Vec<SearchResult>, FetchError> {
        let mut results: Vec<SearchResult> = self
            .teams(year)
            .await?
            .into_iter()
            .filter(|(_, team)| name_matches(&team.full_name, query))
            .map(|(source_id, team)| SearchResult {
                details: format!("{} Record", team.record),
                name: team.full_name,
                source_id,
            })
            .collect();
        results.sort_by_key(|r| r.source_id);
        Ok(results)
    }
}

// ── Players ──────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct PlayerSearch {
    #[serde(default)]
    games: HashMap<String, Game>,
}

#[derive(Debug, Deserialize)]
struct Game {
    #[serde(default)]
    players: HashMap<String, NflPlayer>,
}

#[derive(Debug, Deserialize)]
struct NflPlayer {
    #[serde(rename = "playerId")]
    player_id: String,
    name: String,
    #[serde(default)]
    position: String,
    #[serde(rename = "nflTeamAbbr", default)]
    team: String,
    #[serde(default)]
    stats: HashMap<String, Value>,
}

impl PlayerSearch {
    /// Responses carry a single game entry holding every player.
    fn into_players(self) -> Vec<NflPlayer> {
        self.games
            .into_values()
            .next()
            .map(|game| game.players.into_values().collect())
            .unwrap_or_default()
    }
}

impl NflPlayer {
    fn matches(&self, kind: CategoryKind) -> bool {
        match self.position.as_str() {
            "QB" => kind == CategoryKind::NflQb,
            "RB" | "WR" | "TE" => kind == CategoryKind::NflMisc,
            _ => false,
        }
    }

    /// Season stats for `year`, or the latest season listed.
    fn season_stats(&self, year: i32) -> Result<HashMap<String, i64>, FetchError> {
        let seasons = self
            .stats
            .get("season")
            .and_then(Value::as_object)
            .ok_or_else(|| {
                FetchError::Payload(format!("no season stats for player {}", self.player_id))
            })?;
        let season = seasons
            .get(&year.to_string())
            .or_else(|| seasons.iter().max_by(|a, b| a.0.cmp(b.0)).map(|(_, v)| v))
            .and_then(Value::as_object)
            .ok_or_else(|| {
                FetchError::Payload(format!("empty season stats for player {}", self.player_id))
            })?;

        season
            .iter()
            .map(|(key, value)| Ok((key.clone(), stat_value(value)?)))
            .collect()
    }
}

/// Stat values arrive as strings, occasionally as bare numbers.
fn stat_value(value: &Value) -> Result<i64, FetchError> {
    match value {
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| FetchError::Payload(format!("invalid NFL stat {:?}", s))),
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| FetchError::Payload(format!("invalid NFL stat {}", n))),
        other => Err(FetchError::Payload(format!("invalid NFL stat {}", other))),
    }
}

/// Touchdowns counted toward a category.
fn touchdowns(kind: CategoryKind, stats: &HashMap<String, i64>) -> i64 {
    let keys: &[&str] = match kind {
        CategoryKind::NflQb => &[PASSING_TD, RUSHING_TD],
        CategoryKind::NflMisc => &[RUSHING_TD, RECEIVING_TD, RETURN_TD],
        _ => &[],
    };
    keys.iter().filter_map(|key| stats.get(*key)).sum()
}

/// Quarterback and skill position touchdowns.
pub struct NflPlayers {
    client: NflClient,
}

impl NflPlayers {
    pub fn new(client: NflClient) -> Self {
        Self { client }
    }

    fn services(year: i32, ids: &[SourceId]) -> String {
        let services: Vec<Value> = ids
            .iter()
            .map(|id| {
                serde_json::json!({
                    "playerDetails": format!("season={}&playerId={}", year, id)
                })
            })
            .collect();
        Value::Array(services).to_string()
    }
}

#[async_trait]
impl BulkSource for NflPlayers {
    async fn name_scores(
        &self,
        kind: CategoryKind,
        year: i32,
        ids: &[SourceId],
    ) -> Result<HashMap<SourceId, NameScore>, FetchError> {
        let wanted: HashSet<SourceId> = ids.iter().copied().collect();
        let search: PlayerSearch = self
            .client
            .get("batchservices", &[("services", Self::services(year, ids))])
            .await?;

        let mut name_scores = HashMap::with_capacity(wanted.len());
        for player in search.into_players() {
            let id = parse_source_id(&player.player_id)?;
            if !wanted.contains(&id) {
                continue;
            }
            let stats = player.season_stats(year)?;
            name_scores.insert(id, NameScore::new(player.name, touchdowns(kind, &stats)));
        }
        Ok(name_scores)
    }
}

#[async_trait]
impl Searcher for NflPlayers {
    async fn search(
        &self,
        kind: CategoryKind,
        _year: i32,
        query: &str,
        _active_only: bool,
    ) -> Result<Vec<SearchResult>, FetchError> {
        let search: PlayerSearch = self
            .client
            .get(
                "players/autocomplete",
                &[
                    ("positionIds", SEARCH_POSITION_IDS.to_string()),
                    ("query", query.trim().to_string()),
                ],
            )
            .await?;

        search
            .into_players()
            .into_iter()
            .filter(|player| player.matches(kind) && name_matches(&player.name, query))
            .map(|player| {
                Ok(SearchResult {
                    details: format!("Team: {}, Position: {}", player.team, player.position),
                    source_id: parse_source_id(&player.player_id)?,
                    name: player.name,
                })
            })
            .collect()
    }
}
