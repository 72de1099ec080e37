//! Persistence for rosters and cached stats.
//!
//! The core only needs a narrow surface:
//! - Reads of the active year's friends and players and every year of a sport
//! - Get, upsert and clear of the stats row
//! - A transaction that applies [`WriteOp`]s and reports rows affected
//!
//! [`SqliteStore`] is the production implementation.

pub mod sqlite;

pub use sqlite::SqliteStore;

use std::fmt;

use thiserror::Error;

use crate::models::{CategoryId, Friend, FriendId, Player, PlayerId, SourceId, Sport, Stat, Year};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Database lock poisoned")]
    LockPoisoned,

    #[error("Invalid stored value: {0}")]
    Blob(String),

    #[error("Multiple active years for {0}")]
    MultipleActiveYears(Sport),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Blocking storage task failed: {0}")]
    Blocking(String),
}

/// A single roster write executed inside a transaction.
///
/// Friends and players are always added to the sport's active year.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    DeleteFriend {
        id: FriendId,
    },
    AddFriend {
        sport: Sport,
        display_order: i32,
        name: String,
    },
    SetFriend {
        id: FriendId,
        display_order: i32,
        name: String,
    },
    DeletePlayer {
        id: PlayerId,
    },
    AddPlayer {
        sport: Sport,
        category_id: CategoryId,
        source_id: SourceId,
        friend_id: FriendId,
        display_order: i32,
    },
    SetPlayer {
        id: PlayerId,
        display_order: i32,
    },
    ClearYearActive {
        sport: Sport,
    },
    DeleteYear {
        sport: Sport,
        year: i32,
    },
    AddYear {
        sport: Sport,
        year: i32,
    },
    SetYearActive {
        sport: Sport,
        year: i32,
    },
}

impl WriteOp {
    /// Short operation name used in error messages.
    pub fn name(&self) -> &'static str {
        match self {
            WriteOp::DeleteFriend { .. } => "del_friend",
            WriteOp::AddFriend { .. } => "add_friend",
            WriteOp::SetFriend { .. } => "set_friend",
            WriteOp::DeletePlayer { .. } => "del_player",
            WriteOp::AddPlayer { .. } => "add_player",
            WriteOp::SetPlayer { .. } => "set_player",
            WriteOp::ClearYearActive { .. } => "clr_year_active",
            WriteOp::DeleteYear { .. } => "del_year",
            WriteOp::AddYear { .. } => "add_year",
            WriteOp::SetYearActive { .. } => "set_year_active",
        }
    }
}

impl fmt::Display for WriteOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An open write transaction.
///
/// Dropping a transaction without committing rolls it back.
pub trait Transaction {
    /// Apply one write, returning the number of rows it affected.
    fn exec(&mut self, op: &WriteOp) -> Result<usize, StorageError>;

    fn commit(self: Box<Self>) -> Result<(), StorageError>;

    fn rollback(self: Box<Self>) -> Result<(), StorageError>;
}

/// Roster and stats persistence.
pub trait Datastore: Send + Sync {
    /// Every year of a sport, oldest first.
    fn get_years(&self, sport: Sport) -> Result<Vec<Year>, StorageError>;

    /// Friends of the sport's active year, in display order.
    fn get_friends(&self, sport: Sport) -> Result<Vec<Friend>, StorageError>;

    /// Players of the sport's active year, in display order.
    fn get_players(&self, sport: Sport) -> Result<Vec<Player>, StorageError>;

    /// The stats row of the active year, or `None` without an active year.
    ///
    /// A year that has never been scored yields an empty row.
    fn get_stat(&self, sport: Sport) -> Result<Option<Stat>, StorageError>;

    /// Insert or replace the stats row for `stat.year`.
    fn set_stat(&self, stat: &Stat) -> Result<(), StorageError>;

    /// Null the timestamp and scores of the active year's stats row.
    fn clear_stat(&self, sport: Sport) -> Result<(), StorageError>;

    fn begin(&self) -> Result<Box<dyn Transaction + '_>, StorageError>;
}
