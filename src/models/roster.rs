//! Pool roster rows: friends, their players, seasons, and the cached stats row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{CategoryId, FriendId, PlayerId, SourceId, Sport};

/// A pool participant for the active year of a sport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Friend {
    pub id: FriendId,
    pub display_order: i32,
    pub name: String,
}

/// A drafted athlete or team owned by a friend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub category_id: CategoryId,
    pub source_id: SourceId,
    pub friend_id: FriendId,
    pub display_order: i32,
}

/// A season of a sport. At most one year per sport is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Year {
    pub value: i32,
    pub active: bool,
}

/// The cached stats row for the active year of a sport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    pub sport: Sport,
    pub year: i32,

    /// When the cached scores were computed; `None` after a cache clear.
    pub etl_timestamp: Option<DateTime<Utc>>,

    /// Serialized `Vec<ScoreCategory>`.
    pub etl_json: Option<String>,
}

impl Stat {
    /// An empty row for a year that has never been scored.
    pub fn empty(sport: Sport, year: i32) -> Self {
        Self {
            sport,
            year,
            etl_timestamp: None,
            etl_json: None,
        }
    }
}
