//! Computed score models.

use serde::{Deserialize, Serialize};

use super::{CategoryId, FriendId, PlayerId, SourceId};

/// The friend scores for one category of a sport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreCategory {
    pub category_id: CategoryId,
    pub name: String,
    pub description: String,
    pub display_order: i32,
    pub friend_scores: Vec<FriendScore>,
}

/// A friend's total for a category, with the player scores behind it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FriendScore {
    pub friend_id: FriendId,
    pub name: String,
    pub score_type: String,
    pub score: i64,
    pub display_order: i32,
    pub player_scores: Vec<PlayerScore>,
}

/// The resolved name and score of a single player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerScore {
    pub player_id: PlayerId,
    pub name: String,
    pub score: i64,
    pub display_order: i32,
    pub source_id: SourceId,
}

/// A provider's normalized view of one player or team.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameScore {
    pub name: String,
    pub score: i64,
}

impl NameScore {
    pub fn new(name: impl Into<String>, score: i64) -> Self {
        Self {
            name: name.into(),
            score,
        }
    }
}

/// A candidate player or team returned by a provider search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub name: String,
    pub details: String,
    pub source_id: SourceId,
}
