//! Sports, player categories, and the registry that ties them together.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use super::CategoryId;

/// A sport the pool tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sport {
    Mlb,
    Nfl,
}

impl Sport {
    pub const ALL: [Sport; 2] = [Sport::Mlb, Sport::Nfl];

    /// Stable numeric id used in storage.
    pub fn id(&self) -> i64 {
        match self {
            Sport::Mlb => 1,
            Sport::Nfl => 2,
        }
    }

    pub fn from_id(id: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.id() == id)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Sport::Mlb => "MLB",
            Sport::Nfl => "NFL",
        }
    }

    /// URL path segment.
    pub fn slug(&self) -> &'static str {
        match self {
            Sport::Mlb => "mlb",
            Sport::Nfl => "nfl",
        }
    }
}

impl fmt::Display for Sport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.slug())
    }
}

impl FromStr for Sport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mlb" => Ok(Sport::Mlb),
            "nfl" => Ok(Sport::Nfl),
            other => Err(format!("unknown sport: {}", other)),
        }
    }
}

/// Which provider adapter scores a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryKind {
    MlbTeam,
    MlbHitter,
    MlbPitcher,
    NflTeam,
    NflQb,
    NflMisc,
}

impl CategoryKind {
    pub fn sport(&self) -> Sport {
        match self {
            CategoryKind::MlbTeam | CategoryKind::MlbHitter | CategoryKind::MlbPitcher => {
                Sport::Mlb
            }
            CategoryKind::NflTeam | CategoryKind::NflQb | CategoryKind::NflMisc => Sport::Nfl,
        }
    }
}

/// A scoring class within a sport (a.k.a. player type).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerCategory {
    pub id: CategoryId,
    pub kind: CategoryKind,
    pub name: String,
    pub description: String,

    /// Label for the score column, e.g. "wins".
    pub score_type: String,

    pub display_order: i32,

    /// Only the two highest player scores count toward a friend's total.
    #[serde(default)]
    pub top_two_only: bool,
}

impl PlayerCategory {
    pub fn sport(&self) -> Sport {
        self.kind.sport()
    }
}

/// Category metadata for every sport, built once at startup.
#[derive(Debug, Clone)]
pub struct SportRegistry {
    categories: Vec<PlayerCategory>,
}

impl SportRegistry {
    /// Build a registry, rejecting duplicate ids and duplicate display
    /// orders within a sport.
    pub fn new(mut categories: Vec<PlayerCategory>) -> Result<Self, String> {
        let mut ids = HashSet::new();
        let mut orders = HashSet::new();
        for category in &categories {
            if !ids.insert(category.id) {
                return Err(format!("duplicate category id {}", category.id));
            }
            if !orders.insert((category.sport(), category.display_order)) {
                return Err(format!(
                    "duplicate display order {} for {}",
                    category.display_order,
                    category.sport()
                ));
            }
        }
        categories.sort_by_key(|c| (c.sport(), c.display_order));
        Ok(Self { categories })
    }

    /// Categories of a sport, in display order.
    pub fn for_sport(&self, sport: Sport) -> Vec<PlayerCategory> {
        self.categories
            .iter()
            .filter(|c| c.sport() == sport)
            .cloned()
            .collect()
    }

    pub fn get(&self, id: CategoryId) -> Option<&PlayerCategory> {
        self.categories.iter().find(|c| c.id == id)
    }

    pub fn all(&self) -> &[PlayerCategory] {
        &self.categories
    }
}

impl Default for SportRegistry {
    fn default() -> Self {
        Self {
            categories: default_categories(),
        }
    }
}

/// The six categories the pool has always scored.
pub fn default_categories() -> Vec<PlayerCategory> {
    fn category(
        id: i64,
        kind: CategoryKind,
        name: &str,
        description: &str,
        score_type: &str,
        display_order: i32,
        top_two_only: bool,
    ) -> PlayerCategory {
        PlayerCategory {
            id: CategoryId::new(id),
            kind,
            name: name.to_string(),
            description: description.to_string(),
            score_type: score_type.to_string(),
            display_order,
            top_two_only,
        }
    }

    vec![
        category(1, CategoryKind::MlbTeam, "Teams", "Wins per team", "Wins", 0, false),
        category(
            2,
            CategoryKind::MlbHitter,
            "Hitting",
            "Home runs of the top two hitters",
            "Home Runs",
            1,
            true,
        ),
        category(
            3,
            CategoryKind::MlbPitcher,
            "Pitching",
            "Wins of the top two pitchers",
            "Wins",
            2,
            true,
        ),
        category(4, CategoryKind::NflTeam, "Teams", "Wins per team", "Wins", 0, false),
        category(
            5,
            CategoryKind::NflQb,
            "Quarterbacks",
            "Touchdowns of the top two quarterbacks",
            "TDs",
            1,
            true,
        ),
        category(
            6,
            CategoryKind::NflMisc,
            "Misc",
            "Touchdowns of the top two running backs, wide receivers, and tight ends",
            "TDs",
            2,
            true,
        ),
    ]
}
