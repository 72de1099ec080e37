//! Score aggregation.
//!
//! Turns resolved player names and scores into ordered friend totals:
//! - Players are grouped by friend and ordered by display order
//! - A friend's total sums every player, or only the two highest when the
//!   category is top-two-only and the friend has more than two players
//! - Friends are ordered by display order

use std::collections::HashMap;

use thiserror::Error;

use crate::models::{
    Friend, FriendId, FriendScore, NameScore, Player, PlayerCategory, PlayerId, PlayerScore,
    ScoreCategory, SourceId,
};

/// A provider response did not cover every requested player.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CalculateError {
    #[error("no name for player {player} (source {source_id})")]
    MissingName { player: PlayerId, source_id: SourceId },

    #[error("no stat for player {player} (source {source_id})")]
    MissingStat { player: PlayerId, source_id: SourceId },
}

/// Total a friend's player scores.
pub fn friend_total(scores: &[i64], top_two_only: bool) -> i64 {
    if top_two_only && scores.len() > 2 {
        let mut sorted = scores.to_vec();
        sorted.sort_unstable();
        sorted[sorted.len() - 2..].iter().sum()
    } else {
        scores.iter().sum()
    }
}

/// Build the ordered friend scores for a category.
pub fn build_score_category(
    category: &PlayerCategory,
    friends: &[Friend],
    players: &[Player],
    name_scores: &HashMap<PlayerId, NameScore>,
) -> ScoreCategory {
    let mut friend_players: HashMap<FriendId, Vec<&Player>> = HashMap::new();
    for player in players {
        friend_players.entry(player.friend_id).or_default().push(player);
    }

    let mut friend_scores: Vec<FriendScore> = friends
        .iter()
        .map(|friend| {
            let owned = friend_players.remove(&friend.id).unwrap_or_default();
            build_friend_score(category, friend, &owned, name_scores)
        })
        .collect();
    friend_scores.sort_by_key(|fs| fs.display_order);

    ScoreCategory {
        category_id: category.id,
        name: category.name.clone(),
        description: category.description.clone(),
        display_order: category.display_order,
        friend_scores,
    }
}

fn build_friend_score(
    category: &PlayerCategory,
    friend: &Friend,
    players: &[&Player],
    name_scores: &HashMap<PlayerId, NameScore>,
) -> FriendScore {
    let mut player_scores: Vec<PlayerScore> = players
        .iter()
        .map(|player| {
            let resolved = name_scores.get(&player.id).cloned().unwrap_or_default();
            PlayerScore {
                player_id: player.id,
                name: resolved.name,
                score: resolved.score,
                display_order: player.display_order,
                source_id: player.source_id,
            }
        })
        .collect();
    player_scores.sort_by_key(|ps| ps.display_order);

    let scores: Vec<i64> = player_scores.iter().map(|ps| ps.score).collect();

    FriendScore {
        friend_id: friend.id,
        name: friend.name.clone(),
        score_type: category.score_type.clone(),
        score: friend_total(&scores, category.top_two_only),
        display_order: friend.display_order,
        player_scores,
    }
}

/// Join separately fetched names and stats onto players.
///
/// Every player must have both a name and a stat.
pub fn name_scores_from_field_maps(
    players: &[Player],
    names: &HashMap<SourceId, String>,
    stats: &HashMap<SourceId, i64>,
) -> Result<HashMap<PlayerId, NameScore>, CalculateError> {
    let mut name_scores = HashMap::with_capacity(players.len());
    for player in players {
        let name = names
            .get(&player.source_id)
            .ok_or(CalculateError::MissingName {
                player: player.id,
                source_id: player.source_id,
            })?;
        let stat = stats
            .get(&player.source_id)
            .ok_or(CalculateError::MissingStat {
                player: player.id,
                source_id: player.source_id,
            })?;
        name_scores.insert(player.id, NameScore::new(name.clone(), *stat));
    }
    Ok(name_scores)
}

/// Look players up in a provider's bulk `source id -> (name, score)` map.
///
/// Players the provider does not list resolve to an empty name and zero.
pub fn name_scores_from_source_map(
    players: &[Player],
    source_scores: &HashMap<SourceId, NameScore>,
) -> HashMap<PlayerId, NameScore> {
    players
        .iter()
        .map(|player| {
            let resolved = source_scores
                .get(&player.source_id)
                .cloned()
                .unwrap_or_default();
            (player.id, resolved)
        })
        .collect()
}
