//! MLB stats API and player lookup service.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::{name_matches, BulkSource, PlayerSource, Searcher};
use crate::fetch::{parse_url, FetchError, Fetcher};
use crate::models::{CategoryKind, NameScore, SearchResult, SourceId};

// ── Teams ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Standings {
    #[serde(default)]
    records: Vec<DivisionRecords>,
}

#[derive(Debug, Deserialize)]
struct DivisionRecords {
    #[serde(rename = "teamRecords", default)]
    team_records: Vec<TeamRecord>,
}

#[derive(Debug, Deserialize)]
struct TeamRecord {
    team: TeamName,
    wins: i64,
    losses: i64,
}

#[derive(Debug, Deserialize)]
struct TeamName {
    id: SourceId,
    name: String,
}

/// Team wins from the regular season standings.
pub struct MlbTeams {
    fetcher: Arc<Fetcher>,
    base_url: String,
}

impl MlbTeams {
    pub fn new(fetcher: Arc<Fetcher>, base_url: &str) -> Self {
        Self {
            fetcher,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn standings_url(&self, year: i32) -> Result<Url, FetchError> {
        let mut url = parse_url(&format!(
            "{}/api/v1/standings/regularSeason",
            self.base_url
        ))?;
        url.query_pairs_mut()
            .append_pair("leagueId", "103,104")
            .append_pair("season", &year.to_string());
        Ok(url)
    }

    async fn team_records(&self, year: i32) -> Result<Vec<TeamRecord>, FetchError> {
        let standings: Standings = self.fetcher.fetch_json(&self.standings_url(year)?).await?;
        Ok(standings
            .records
            .into_iter()
            .flat_map(|division| division.team_records)
            .collect())
    }
}

#[async_trait]
impl BulkSource for MlbTeams {
    async fn name_scores(
        &self,
        _kind: CategoryKind,
        year: i32,
        _ids: &[SourceId],
    ) -> Result<HashMap<SourceId, NameScore>, FetchError> {
        Ok(self
            .team_records(year)
            .await?
            .into_iter()
            .map(|record| (record.team.id, NameScore::new(record.team.name, record.wins)))
            .collect())
    }
}

#[async_trait]
impl Searcher for MlbTeams {
    async fn search(
        &self,
        _kind: CategoryKind,
        year: i32,
        query: &str,
        _active_only: bool,
    ) -> Result<Vec<SearchResult>, FetchError> {
        Ok(self
            .team_records(year)
            .await?
            .into_iter()
            .filter(|record| name_matches(&record.team.name, query))
            .map(|record| SearchResult {
                details: format!("{} - {} Record", record.wins, record.losses),
                name: record.team.name,
                source_id: record.team.id,
            })
            .collect())
    }
}

// ── Hitters and pitchers ─────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct People {
    #[serde(default)]
    people: Vec<Person>,
}

#[derive(Debug, Deserialize)]
struct Person {
    id: SourceId,
    #[serde(rename = "fullName")]
    full_name: String,
}

#[derive(Debug, Deserialize)]
struct PlayerStats {
    #[serde(default)]
    stats: Vec<StatGroup>,
}

#[derive(Debug, Deserialize)]
struct StatGroup {
    group: GroupName,
    #[serde(default)]
    splits: Vec<Split>,
}

#[derive(Debug, Deserialize)]
struct GroupName {
    #[serde(rename = "displayName")]
    display_name: String,
}

#[derive(Debug, Deserialize)]
struct Split {
    stat: SeasonStat,
}

#[derive(Debug, Default, Deserialize)]
struct SeasonStat {
    #[serde(rename = "homeRuns", default)]
    home_runs: i64,
    #[serde(default)]
    wins: i64,
}

impl PlayerStats {
    /// The last split of a group holds the season total across teams.
    fn last_stat(&self, group: &str, stat: fn(&SeasonStat) -> i64) -> i64 {
        self.stats
            .iter()
            .find(|g| g.group.display_name == group)
            .and_then(|g| g.splits.last())
            .map(|split| stat(&split.stat))
            .unwrap_or(0)
    }

    fn stat_for(&self, kind: CategoryKind) -> Result<i64, FetchError> {
        match kind {
            CategoryKind::MlbHitter => Ok(self.last_stat("hitting", |s| s.home_runs)),
            CategoryKind::MlbPitcher => Ok(self.last_stat("pitching", |s| s.wins)),
            other => Err(FetchError::Payload(format!(
                "no MLB player stat for category {:?}",
                other
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PlayerSearch {
    search_player_all: SearchPlayerAll,
}

#[derive(Debug, Deserialize)]
struct SearchPlayerAll {
    #[serde(rename = "queryResults")]
    query_results: QueryResults,
}

#[derive(Debug, Deserialize)]
struct QueryResults {
    /// Absent when nothing matched, an object for one match, an array otherwise.
    row: Option<Rows>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Rows {
    Many(Vec<PlayerBio>),
    One(PlayerBio),
}

#[derive(Debug, Deserialize)]
struct PlayerBio {
    #[serde(default)]
    position: String,
    #[serde(default)]
    birth_country: String,
    #[serde(default)]
    birth_date: String,
    #[serde(default)]
    team_abbrev: String,
    name_display_first_last: String,
    player_id: String,
}

impl PlayerBio {
    fn matches(&self, kind: CategoryKind) -> bool {
        match self.position.as_str() {
            "P" => kind == CategoryKind::MlbPitcher,
            _ => kind == CategoryKind::MlbHitter,
        }
    }

    fn birth_day(&self) -> &str {
        self.birth_date.get(..10).unwrap_or("?")
    }

    fn into_result(self) -> Result<SearchResult, FetchError> {
        let source_id = self.player_id.parse().map_err(|_| {
            FetchError::Payload(format!("invalid MLB player id {:?}", self.player_id))
        })?;
        Ok(SearchResult {
            details: format!(
                "team:{}, position:{}, born:{},{}",
                self.team_abbrev,
                self.position,
                self.birth_country,
                self.birth_day()
            ),
            name: self.name_display_first_last,
            source_id,
        })
    }
}

/// Home runs for hitters and wins for pitchers.
pub struct MlbPlayers {
    fetcher: Arc<Fetcher>,
    base_url: String,
    lookup_url: String,
}

impl MlbPlayers {
    pub fn new(fetcher: Arc<Fetcher>, base_url: &str, lookup_url: &str) -> Self {
        Self {
            fetcher,
            base_url: base_url.trim_end_matches('/').to_string(),
            lookup_url: lookup_url.trim_end_matches('/').to_string(),
        }
    }

    fn names_url(&self, ids: &[SourceId]) -> Result<Url, FetchError> {
        let joined = ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let mut url = parse_url(&format!("{}/api/v1/people", self.base_url))?;
        url.query_pairs_mut()
            .append_pair("personIds", &joined)
            .append_pair("fields", "people,id,fullName");
        Ok(url)
    }

    fn stat_url(&self, year: i32, id: SourceId) -> Result<Url, FetchError> {
        let mut url = parse_url(&format!("{}/api/v1/people/{}/stats", self.base_url, id))?;
        url.query_pairs_mut()
            .append_pair("season", &year.to_string())
            .append_pair("stats", "season")
            .append_pair(
                "fields",
                "stats,group,displayName,splits,stat,homeRuns,wins",
            );
        Ok(url)
    }

    fn search_url(&self, query: &str, active_only: bool) -> Result<Url, FetchError> {
        let mut url = parse_url(&format!(
            "{}/json/named.search_player_all.bam",
            self.lookup_url
        ))?;
        url.query_pairs_mut()
            .append_pair("name_part", &format!("'{}%'", query.trim()))
            .append_pair("active_sw", if active_only { "'Y'" } else { "'N'" })
            .append_pair("sport_code", "'mlb'");
        for column in [
            "player_id",
            "name_display_first_last",
            "position",
            "team_abbrev",
            "birth_country",
            "birth_date",
        ] {
            url.query_pairs_mut()
                .append_pair("search_player_all.col_in", column);
        }
        Ok(url)
    }
}

#[async_trait]
impl PlayerSource for MlbPlayers {
    async fn names(
        &self,
        _kind: CategoryKind,
        ids: &[SourceId],
    ) -> Result<HashMap<SourceId, String>, FetchError> {
        let wanted: HashSet<SourceId> = ids.iter().copied().collect();
        let people: People = self.fetcher.fetch_json(&self.names_url(ids)?).await?;

        let names: HashMap<SourceId, String> = people
            .people
            .into_iter()
            .filter(|person| wanted.contains(&person.id))
            .map(|person| (person.id, person.full_name))
            .collect();
        if names.len() != wanted.len() {
            return Err(FetchError::Payload(format!(
                "expected {} MLB player names, got {}",
                wanted.len(),
                names.len()
            )));
        }
        debug!("Resolved {} MLB player names", names.len());
        Ok(names)
    }

    async fn stat(&self, kind: CategoryKind, year: i32, id: SourceId) -> Result<i64, FetchError> {
        let stats: PlayerStats = self.fetcher.fetch_json(&self.stat_url(year, id)?).await?;
        stats.stat_for(kind)
    }
}

#[async_trait]
impl Searcher for MlbPlayers {
    async fn search(
        &self,
        kind: CategoryKind,
        _year: i32,
        query: &str,
        active_only: bool,
    ) -> Result<Vec<SearchResult>, FetchError> {
        let search: PlayerSearch = self
            .fetcher
            .fetch_json(&self.search_url(query, active_only)?)
            .await?;
        let bios = match search.search_player_all.query_results.row {
            None => Vec::new(),
            Some(Rows::One(bio)) => vec![bio],
            Some(Rows::Many(bios)) => bios,
        };
        bios.into_iter()
            .filter(|bio| bio.matches(kind))
            .map(PlayerBio::into_result)
            .collect()
    }
}
