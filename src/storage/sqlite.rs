//! SQLite-backed [`Datastore`].

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, warn};

use super::{Datastore, StorageError, Transaction, WriteOp};
use crate::models::{
    CategoryId, Friend, FriendId, Player, PlayerId, SourceId, Sport, Stat, Year,
};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS years (
        sport INTEGER NOT NULL,
        year INTEGER NOT NULL,
        active INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (sport, year)
    );
    CREATE UNIQUE INDEX IF NOT EXISTS years_single_active ON years (sport) WHERE active = 1;

    CREATE TABLE IF NOT EXISTS friends (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        sport INTEGER NOT NULL,
        year INTEGER NOT NULL,
        display_order INTEGER NOT NULL,
        name TEXT NOT NULL,
        FOREIGN KEY (sport, year) REFERENCES years (sport, year) ON DELETE CASCADE
    );

    CREATE TABLE IF NOT EXISTS players (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        sport INTEGER NOT NULL,
        year INTEGER NOT NULL,
        category_id INTEGER NOT NULL,
        source_id INTEGER NOT NULL,
        friend_id INTEGER NOT NULL REFERENCES friends (id) ON DELETE CASCADE,
        display_order INTEGER NOT NULL,
        FOREIGN KEY (sport, year) REFERENCES years (sport, year) ON DELETE CASCADE
    );

    CREATE TABLE IF NOT EXISTS stats (
        sport INTEGER NOT NULL,
        year INTEGER NOT NULL,
        etl_timestamp TEXT,
        etl_json TEXT,
        PRIMARY KEY (sport, year),
        FOREIGN KEY (sport, year) REFERENCES years (sport, year) ON DELETE CASCADE
    );
";

/// A single SQLite connection shared behind a mutex.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a database file and apply the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let store = Self::from_connection(Connection::open(path)?)?;
        info!("Opened database {}", path.display());
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }
}

fn active_year(conn: &Connection, sport: Sport) -> Result<Option<i32>, StorageError> {
    Ok(conn
        .query_row(
            "SELECT year FROM years WHERE sport = ?1 AND active = 1",
            params![sport.id()],
            |row| row.get(0),
        )
        .optional()?)
}

impl Datastore for SqliteStore {
    fn get_years(&self, sport: Sport) -> Result<Vec<Year>, StorageError> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT year, active FROM years WHERE sport = ?1 ORDER BY year")?;
        let years = stmt
            .query_map(params![sport.id()], |row| {
                Ok(Year {
                    value: row.get(0)?,
                    active: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        if years.iter().filter(|y| y.active).count() > 1 {
            return Err(StorageError::MultipleActiveYears(sport));
        }
        Ok(years)
    }

    fn get_friends(&self, sport: Sport) -> Result<Vec<Friend>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT f.id, f.display_order, f.name
             FROM friends f
             JOIN years y ON y.sport = f.sport AND y.year = f.year AND y.active = 1
             WHERE f.sport = ?1
             ORDER BY f.display_order, f.id",
        )?;
        let friends = stmt
            .query_map(params![sport.id()], |row| {
                Ok(Friend {
                    id: FriendId::new(row.get(0)?),
                    display_order: row.get(1)?,
                    name: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(friends)
    }

    fn get_players(&self, sport: Sport) -> Result<Vec<Player>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT p.id, p.category_id, p.source_id, p.friend_id, p.display_order
             FROM players p
             JOIN years y ON y.sport = p.sport AND y.year = p.year AND y.active = 1
             WHERE p.sport = ?1
             ORDER BY p.category_id, p.friend_id, p.display_order, p.id",
        )?;
        let players = stmt
            .query_map(params![sport.id()], |row| {
                Ok(Player {
                    id: PlayerId::new(row.get(0)?),
                    category_id: CategoryId::new(row.get(1)?),
                    source_id: SourceId::new(row.get(2)?),
                    friend_id: FriendId::new(row.get(3)?),
                    display_order: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(players)
    }

    fn get_stat(&self, sport: Sport) -> Result<Option<Stat>, StorageError> {
        let conn = self.lock()?;
        let Some(year) = active_year(&conn, sport)? else {
            return Ok(None);
        };

        let row: Option<(Option<DateTime<Utc>>, Option<String>)> = conn
            .query_row(
                "SELECT etl_timestamp, etl_json FROM stats WHERE sport = ?1 AND year = ?2",
                params![sport.id(), year],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        Ok(Some(match row {
            Some((etl_timestamp, etl_json)) => Stat {
                sport,
                year,
                etl_timestamp,
                etl_json,
            },
            None => Stat::empty(sport, year),
        }))
    }

    fn set_stat(&self, stat: &Stat) -> Result<(), StorageError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO stats (sport, year, etl_timestamp, etl_json)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (sport, year) DO UPDATE
             SET etl_timestamp = excluded.etl_timestamp, etl_json = excluded.etl_json",
            params![stat.sport.id(), stat.year, stat.etl_timestamp, stat.etl_json],
        )?;
        debug!("Saved stats for {} {}", stat.sport, stat.year);
        Ok(())
    }

    fn clear_stat(&self, sport: Sport) -> Result<(), StorageError> {
        let conn = self.lock()?;
        let cleared = conn.execute(
            "UPDATE stats SET etl_timestamp = NULL, etl_json = NULL
             WHERE sport = ?1
             AND year = (SELECT year FROM years WHERE sport = ?1 AND active = 1)",
            params![sport.id()],
        )?;
        debug!("Cleared {} stats rows for {}", cleared, sport);
        Ok(())
    }

    fn begin(&self) -> Result<Box<dyn Transaction + '_>, StorageError> {
        let conn = self.lock()?;
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(Box::new(SqliteTransaction {
            conn,
            finished: false,
        }))
    }
}

/// Holds the connection lock for the lifetime of the transaction.
struct SqliteTransaction<'a> {
    conn: MutexGuard<'a, Connection>,
    finished: bool,
}

impl Transaction for SqliteTransaction<'_> {
    fn exec(&mut self, op: &WriteOp) -> Result<usize, StorageError> {
        let conn = &self.conn;
        let affected = match op {
            WriteOp::DeleteFriend { id } => {
                conn.execute("DELETE FROM friends WHERE id = ?1", params![id.get()])?
            }
            WriteOp::AddFriend {
                sport,
                display_order,
                name,
            } => conn.execute(
                "INSERT INTO friends (sport, year, display_order, name)
                 SELECT sport, year, ?2, ?3 FROM years WHERE sport = ?1 AND active = 1",
                params![sport.id(), display_order, name],
            )?,
            WriteOp::SetFriend {
                id,
                display_order,
                name,
            } => conn.execute(
                "UPDATE friends SET display_order = ?1, name = ?2 WHERE id = ?3",
                params![display_order, name, id.get()],
            )?,
            WriteOp::DeletePlayer { id } => {
                conn.execute("DELETE FROM players WHERE id = ?1", params![id.get()])?
            }
            WriteOp::AddPlayer {
                sport,
                category_id,
                source_id,
                friend_id,
                display_order,
            } => conn.execute(
                "INSERT INTO players (sport, year, category_id, source_id, friend_id, display_order)
                 SELECT f.sport, f.year, ?2, ?3, f.id, ?5
                 FROM friends f
                 JOIN years y ON y.sport = f.sport AND y.year = f.year AND y.active = 1
                 WHERE f.sport = ?1 AND f.id = ?4",
                params![
                    sport.id(),
                    category_id.get(),
                    source_id.get(),
                    friend_id.get(),
                    display_order
                ],
            )?,
            WriteOp::SetPlayer { id, display_order } => conn.execute(
                "UPDATE players SET display_order = ?1 WHERE id = ?2",
                params![display_order, id.get()],
            )?,
            WriteOp::ClearYearActive { sport } => conn.execute(
                "UPDATE years SET active = 0 WHERE sport = ?1 AND active = 1",
                params![sport.id()],
            )?,
            WriteOp::DeleteYear { sport, year } => conn.execute(
                "DELETE FROM years WHERE sport = ?1 AND year = ?2",
                params![sport.id(), year],
            )?,
            WriteOp::AddYear { sport, year } => conn.execute(
                "INSERT INTO years (sport, year, active) VALUES (?1, ?2, 0)",
                params![sport.id(), year],
            )?,
            WriteOp::SetYearActive { sport, year } => conn.execute(
                "UPDATE years SET active = 1 WHERE sport = ?1 AND year = ?2",
                params![sport.id(), year],
            )?,
        };
        Ok(affected)
    }

    fn commit(mut self: Box<Self>) -> Result<(), StorageError> {
        self.conn.execute_batch("COMMIT")?;
        self.finished = true;
        Ok(())
    }

    fn rollback(mut self: Box<Self>) -> Result<(), StorageError> {
        self.finished = true;
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }
}

impl Drop for SqliteTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                warn!("Rolling back abandoned transaction: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn apply(store: &SqliteStore, ops: &[WriteOp]) {
        let mut tx = store.begin().unwrap();
        for op in ops {
            assert_eq!(tx.exec(op).unwrap(), 1, "{}", op);
        }
        tx.commit().unwrap();
    }

    fn seeded() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        apply(
            &store,
            &[
                WriteOp::AddYear {
                    sport: Sport::Mlb,
                    year: 2019,
                },
                WriteOp::SetYearActive {
                    sport: Sport::Mlb,
                    year: 2019,
                },
                WriteOp::AddFriend {
                    sport: Sport::Mlb,
                    display_order: 1,
                    name: "Carl".to_string(),
                },
            ],
        );
        store
    }

    #[test]
    fn test_open_creates_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("pool.db");

        let store = SqliteStore::open(&path).unwrap();

        assert!(path.exists());
        assert!(store.get_years(Sport::Mlb).unwrap().is_empty());
    }

    #[test]
    fn test_friends_and_players_of_active_year() {
        let store = seeded();
        let carl = store.get_friends(Sport::Mlb).unwrap()[0].clone();
        apply(
            &store,
            &[WriteOp::AddPlayer {
                sport: Sport::Mlb,
                category_id: CategoryId::new(2),
                source_id: SourceId::new(547180),
                friend_id: carl.id,
                display_order: 1,
            }],
        );

        let players = store.get_players(Sport::Mlb).unwrap();
        assert_eq!(players.len(), 1);
        assert_eq!(players[0].friend_id, carl.id);
        assert_eq!(players[0].source_id, SourceId::new(547180));
        assert!(store.get_friends(Sport::Nfl).unwrap().is_empty());
    }

    #[test]
    fn test_add_friend_without_active_year_affects_nothing() {
        let store = SqliteStore::open_in_memory().unwrap();
        let mut tx = store.begin().unwrap();

        let affected = tx
            .exec(&WriteOp::AddFriend {
                sport: Sport::Nfl,
                display_order: 1,
                name: "Nobody".to_string(),
            })
            .unwrap();

        assert_eq!(affected, 0);
        tx.rollback().unwrap();
    }

    #[test]
    fn test_single_active_year_enforced() {
        let store = seeded();
        let mut tx = store.begin().unwrap();
        tx.exec(&WriteOp::AddYear {
            sport: Sport::Mlb,
            year: 2020,
        })
        .unwrap();

        let second = tx.exec(&WriteOp::SetYearActive {
            sport: Sport::Mlb,
            year: 2020,
        });

        assert!(matches!(second, Err(StorageError::Sqlite(_))));
    }

    #[test]
    fn test_dropped_transaction_rolls_back() {
        let store = seeded();
        {
            let mut tx = store.begin().unwrap();
            tx.exec(&WriteOp::AddFriend {
                sport: Sport::Mlb,
                display_order: 2,
                name: "Dropped".to_string(),
            })
            .unwrap();
        }

        assert_eq!(store.get_friends(Sport::Mlb).unwrap().len(), 1);
    }

    #[test]
    fn test_stat_lifecycle() {
        let store = seeded();
        assert_eq!(store.get_stat(Sport::Nfl).unwrap(), None);
        assert_eq!(
            store.get_stat(Sport::Mlb).unwrap(),
            Some(Stat::empty(Sport::Mlb, 2019))
        );

        let stamped = Stat {
            sport: Sport::Mlb,
            year: 2019,
            etl_timestamp: Some("2019-08-21T11:00:00Z".parse().unwrap()),
            etl_json: Some("[]".to_string()),
        };
        store.set_stat(&stamped).unwrap();
        assert_eq!(store.get_stat(Sport::Mlb).unwrap(), Some(stamped.clone()));

        store.set_stat(&stamped).unwrap();
        store.clear_stat(Sport::Mlb).unwrap();
        assert_eq!(
            store.get_stat(Sport::Mlb).unwrap(),
            Some(Stat::empty(Sport::Mlb, 2019))
        );
    }

    #[test]
    fn test_delete_year_cascades() {
        let store = seeded();
        store
            .set_stat(&Stat {
                sport: Sport::Mlb,
                year: 2019,
                etl_timestamp: None,
                etl_json: Some("[]".to_string()),
            })
            .unwrap();

        apply(
            &store,
            &[
                WriteOp::ClearYearActive { sport: Sport::Mlb },
                WriteOp::DeleteYear {
                    sport: Sport::Mlb,
                    year: 2019,
                },
            ],
        );

        assert!(store.get_years(Sport::Mlb).unwrap().is_empty());
        assert_eq!(store.get_stat(Sport::Mlb).unwrap(), None);
        let conn = store.lock().unwrap();
        let friends: i64 = conn
            .query_row("SELECT COUNT(*) FROM friends", [], |row| row.get(0))
            .unwrap();
        assert_eq!(friends, 0);
    }
}
