//! Roster diff and transactional persist.
//!
//! Saving a roster compares the desired collection against the stored one by
//! id and applies the difference in one transaction: deletes, then inserts,
//! then updates. Years clear the active flag first so every write touches
//! exactly one row. Any write affecting a different number of rows aborts
//! the transaction.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::{Friend, Player, SportRegistry, Sport, Year};
use crate::storage::{Datastore, StorageError, WriteOp};

/// Errors that can occur while saving a roster.
#[derive(Debug, Error)]
pub enum RosterError {
    #[error("Invalid roster: {0}")]
    Validation(String),

    #[error("Loading current roster: {0}")]
    Load(#[source] StorageError),

    #[error("Starting transaction: {0}")]
    Begin(#[source] StorageError),

    #[error("Saving: {operation}: {source}")]
    Write {
        operation: &'static str,
        #[source]
        source: StorageError,
    },

    #[error("Saving: {operation}: expected 1 row affected, got {affected}")]
    Consistency {
        operation: &'static str,
        affected: usize,
    },

    #[error("Committing: {0}")]
    Commit(#[source] StorageError),

    #[error("{cause}; rollback also failed: {rollback}")]
    RollbackFailed {
        cause: Box<RosterError>,
        rollback: StorageError,
    },
}

/// An item compared by id against its stored version.
pub trait RosterItem {
    type Key: Eq + Hash + Copy;

    fn key(&self) -> Self::Key;

    /// Whether any mutable field differs from the stored version.
    fn differs(&self, stored: &Self) -> bool;
}

impl RosterItem for Friend {
    type Key = crate::models::FriendId;

    fn key(&self) -> Self::Key {
        self.id
    }

    fn differs(&self, stored: &Self) -> bool {
        self.display_order != stored.display_order || self.name != stored.name
    }
}

impl RosterItem for Player {
    type Key = crate::models::PlayerId;

    fn key(&self) -> Self::Key {
        self.id
    }

    fn differs(&self, stored: &Self) -> bool {
        self.display_order != stored.display_order
    }
}

impl RosterItem for Year {
    type Key = i32;

    fn key(&self) -> Self::Key {
        self.value
    }

    /// The active flag is rewritten wholesale, never diffed per year.
    fn differs(&self, _stored: &Self) -> bool {
        false
    }
}

/// The writes needed to turn a stored collection into the desired one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterDiff<T> {
    pub to_insert: Vec<T>,
    pub to_update: Vec<T>,
    pub to_delete: Vec<T>,
}

impl<T> RosterDiff<T> {
    pub fn is_empty(&self) -> bool {
        self.to_insert.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }
}

/// Partition `desired` against `current` by id.
///
/// Output follows the order of the inputs.
pub fn diff<T: RosterItem + Clone>(current: &[T], desired: &[T]) -> RosterDiff<T> {
    let stored: HashMap<T::Key, &T> = current.iter().map(|item| (item.key(), item)).collect();
    let wanted: HashSet<T::Key> = desired.iter().map(RosterItem::key).collect();

    let mut to_insert = Vec::new();
    let mut to_update = Vec::new();
    for item in desired {
        match stored.get(&item.key()) {
            None => to_insert.push(item.clone()),
            Some(previous) if item.differs(previous) => to_update.push(item.clone()),
            Some(_) => {}
        }
    }
    let to_delete = current
        .iter()
        .filter(|item| !wanted.contains(&item.key()))
        .cloned()
        .collect();

    RosterDiff {
        to_insert,
        to_update,
        to_delete,
    }
}

/// Apply `ops` in order inside one transaction.
///
/// Each write must affect exactly one row. On failure the transaction is
/// rolled back and the error names the failing operation. An empty list
/// touches nothing.
pub fn execute_in_transaction(store: &dyn Datastore, ops: &[WriteOp]) -> Result<(), RosterError> {
    if ops.is_empty() {
        return Ok(());
    }

    let mut tx = store.begin().map_err(RosterError::Begin)?;
    let mut failure = None;
    for op in ops {
        match tx.exec(op) {
            Ok(1) => {}
            Ok(affected) => {
                failure = Some(RosterError::Consistency {
                    operation: op.name(),
                    affected,
                });
                break;
            }
            Err(source) => {
                failure = Some(RosterError::Write {
                    operation: op.name(),
                    source,
                });
                break;
            }
        }
    }

    match failure {
        None => {
            tx.commit().map_err(RosterError::Commit)?;
            debug!("Committed {} writes", ops.len());
            Ok(())
        }
        Some(cause) => {
            warn!("Rolling back roster save: {}", cause);
            match tx.rollback() {
                Ok(()) => Err(cause),
                Err(rollback) => Err(RosterError::RollbackFailed {
                    cause: Box::new(cause),
                    rollback,
                }),
            }
        }
    }
}

/// Reconcile the active year's friends of a sport.
pub fn save_friends(
    store: &dyn Datastore,
    sport: Sport,
    desired: &[Friend],
) -> Result<(), RosterError> {
    let current = store.get_friends(sport).map_err(RosterError::Load)?;
    let plan = diff(&current, desired);
    debug!(
        "{} friends: {} inserts, {} updates, {} deletes",
        sport,
        plan.to_insert.len(),
        plan.to_update.len(),
        plan.to_delete.len()
    );

    let mut ops = Vec::new();
    ops.extend(
        plan.to_delete
            .iter()
            .map(|f| WriteOp::DeleteFriend { id: f.id }),
    );
    ops.extend(plan.to_insert.iter().map(|f| WriteOp::AddFriend {
        sport,
        display_order: f.display_order,
        name: f.name.clone(),
    }));
    ops.extend(plan.to_update.iter().map(|f| WriteOp::SetFriend {
        id: f.id,
        display_order: f.display_order,
        name: f.name.clone(),
    }));

    execute_in_transaction(store, &ops)?;
    info!("Saved {} friends for {}", desired.len(), sport);
    Ok(())
}

/// Reconcile the active year's players of a sport.
///
/// Every player must belong to a category of the sport.
pub fn save_players(
    store: &dyn Datastore,
    registry: &SportRegistry,
    sport: Sport,
    desired: &[Player],
) -> Result<(), RosterError> {
    for player in desired {
        match registry.get(player.category_id) {
            Some(category) if category.sport() == sport => {}
            _ => {
                return Err(RosterError::Validation(format!(
                    "player {} has unknown {} category {}",
                    player.id, sport, player.category_id
                )))
            }
        }
    }

    let current = store.get_players(sport).map_err(RosterError::Load)?;
    let plan = diff(&current, desired);
    debug!(
        "{} players: {} inserts, {} updates, {} deletes",
        sport,
        plan.to_insert.len(),
        plan.to_update.len(),
        plan.to_delete.len()
    );

    let mut ops = Vec::new();
    ops.extend(
        plan.to_delete
            .iter()
            .map(|p| WriteOp::DeletePlayer { id: p.id }),
    );
    ops.extend(plan.to_insert.iter().map(|p| WriteOp::AddPlayer {
        sport,
        category_id: p.category_id,
        source_id: p.source_id,
        friend_id: p.friend_id,
        display_order: p.display_order,
    }));
    ops.extend(plan.to_update.iter().map(|p| WriteOp::SetPlayer {
        id: p.id,
        display_order: p.display_order,
    }));

    execute_in_transaction(store, &ops)?;
    info!("Saved {} players for {}", desired.len(), sport);
    Ok(())
}

/// Reconcile the years of a sport and its active year.
///
/// An empty desired set is ignored. At most one desired year may be active.
pub fn save_years(store: &dyn Datastore, sport: Sport, desired: &[Year]) -> Result<(), RosterError> {
    if desired.is_empty() {
        debug!("No years given for {}, skipping save", sport);
        return Ok(());
    }

    let mut active = desired.iter().filter(|y| y.active);
    let desired_active = active.next().map(|y| y.value);
    if active.next().is_some() {
        return Err(RosterError::Validation(format!(
            "multiple active years for {}",
            sport
        )));
    }
    let mut seen = HashSet::new();
    if let Some(duplicate) = desired.iter().find(|y| !seen.insert(y.value)) {
        return Err(RosterError::Validation(format!(
            "duplicate year {} for {}",
            duplicate.value, sport
        )));
    }

    let current = store.get_years(sport).map_err(RosterError::Load)?;
    let current_active = current.iter().find(|y| y.active).map(|y| y.value);
    let plan = diff(&current, desired);
    if plan.is_empty() && current_active == desired_active {
        debug!("Years for {} unchanged", sport);
        return Ok(());
    }

    let mut ops = Vec::new();
    if current_active.is_some() {
        ops.push(WriteOp::ClearYearActive { sport });
    }
    ops.extend(plan.to_delete.iter().map(|y| WriteOp::DeleteYear {
        sport,
        year: y.value,
    }));
    ops.extend(plan.to_insert.iter().map(|y| WriteOp::AddYear {
        sport,
        year: y.value,
    }));
    if let Some(year) = desired_active {
        ops.push(WriteOp::SetYearActive { sport, year });
    }

    execute_in_transaction(store, &ops)?;
    info!(
        "Saved {} years for {}, active {:?}",
        desired.len(),
        sport,
        desired_active
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CategoryId, FriendId, PlayerId, SourceId, Stat};
    use crate::storage::{SqliteStore, Transaction};
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    fn friend(id: i64, display_order: i32, name: &str) -> Friend {
        Friend {
            id: FriendId::new(id),
            display_order,
            name: name.to_string(),
        }
    }

    fn year(value: i32, active: bool) -> Year {
        Year { value, active }
    }

    /// Records writes and fails the configured one.
    #[derive(Default)]
    struct ScriptedStore {
        friends: Vec<Friend>,
        years: Vec<Year>,
        fail_at: Option<usize>,
        affected_at_failure: Option<usize>,
        fail_rollback: bool,
        log: Mutex<Vec<String>>,
    }

    struct ScriptedTx<'a> {
        store: &'a ScriptedStore,
        writes: usize,
    }

    impl Transaction for ScriptedTx<'_> {
        fn exec(&mut self, op: &WriteOp) -> Result<usize, StorageError> {
            let index = self.writes;
            self.writes += 1;
            self.store.log.lock().unwrap().push(op.name().to_string());
            if self.store.fail_at == Some(index) {
                return match self.store.affected_at_failure {
                    Some(affected) => Ok(affected),
                    None => Err(StorageError::LockPoisoned),
                };
            }
            Ok(1)
        }

        fn commit(self: Box<Self>) -> Result<(), StorageError> {
            self.store.log.lock().unwrap().push("commit".to_string());
            Ok(())
        }

        fn rollback(self: Box<Self>) -> Result<(), StorageError> {
            self.store.log.lock().unwrap().push("rollback".to_string());
            if self.store.fail_rollback {
                return Err(StorageError::Blob("rollback refused".to_string()));
            }
            Ok(())
        }
    }

    impl Datastore for ScriptedStore {
        fn get_years(&self, _sport: Sport) -> Result<Vec<Year>, StorageError> {
            Ok(self.years.clone())
        }

        fn get_friends(&self, _sport: Sport) -> Result<Vec<Friend>, StorageError> {
            Ok(self.friends.clone())
        }

        fn get_players(&self, _sport: Sport) -> Result<Vec<Player>, StorageError> {
            Ok(Vec::new())
        }

        fn get_stat(&self, _sport: Sport) -> Result<Option<Stat>, StorageError> {
            Ok(None)
        }

        fn set_stat(&self, _stat: &Stat) -> Result<(), StorageError> {
            Ok(())
        }

        fn clear_stat(&self, _sport: Sport) -> Result<(), StorageError> {
            Ok(())
        }

        fn begin(&self) -> Result<Box<dyn Transaction + '_>, StorageError> {
            self.log.lock().unwrap().push("begin".to_string());
            Ok(Box::new(ScriptedTx {
                store: self,
                writes: 0,
            }))
        }
    }

    impl ScriptedStore {
        fn log(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    fn seeded_sqlite() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        save_years(&store, Sport::Mlb, &[year(2019, true)]).unwrap();
        store
    }

    #[test]
    fn test_diff_partitions_by_id() {
        let current = vec![friend(1, 1, "A"), friend(2, 2, "B"), friend(3, 3, "C")];
        let desired = vec![friend(2, 2, "B2"), friend(3, 3, "C"), friend(4, 4, "D")];

        let plan = diff(&current, &desired);

        assert_eq!(plan.to_insert, vec![friend(4, 4, "D")]);
        assert_eq!(plan.to_update, vec![friend(2, 2, "B2")]);
        assert_eq!(plan.to_delete, vec![friend(1, 1, "A")]);
    }

    #[test]
    fn test_diff_identical_is_empty() {
        let current = vec![friend(1, 1, "A"), friend(2, 2, "B")];
        assert!(diff(&current, &current.clone()).is_empty());
    }

    #[test]
    fn test_player_diff_ignores_reassignment() {
        let stored = Player {
            id: PlayerId::new(1),
            category_id: CategoryId::new(2),
            source_id: SourceId::new(10),
            friend_id: FriendId::new(1),
            display_order: 1,
        };
        let mut moved = stored.clone();
        moved.source_id = SourceId::new(11);
        assert!(!moved.differs(&stored));
        moved.display_order = 2;
        assert!(moved.differs(&stored));
    }

    #[test]
    fn test_empty_ops_skip_transaction() {
        let store = ScriptedStore::default();
        execute_in_transaction(&store, &[]).unwrap();
        assert!(store.log().is_empty());
    }

    #[test]
    fn test_write_order_deletes_inserts_updates() {
        let store = ScriptedStore {
            friends: vec![friend(1, 1, "A"), friend(2, 2, "B")],
            ..Default::default()
        };

        save_friends(
            &store,
            Sport::Mlb,
            &[friend(2, 1, "B"), friend(0, 2, "New")],
        )
        .unwrap();

        assert_eq!(
            store.log(),
            vec!["begin", "del_friend", "add_friend", "set_friend", "commit"]
        );
    }

    #[test]
    fn test_failed_write_rolls_back() {
        let store = ScriptedStore {
            friends: vec![friend(1, 1, "A")],
            fail_at: Some(1),
            ..Default::default()
        };

        let err = save_friends(&store, Sport::Mlb, &[friend(5, 1, "X"), friend(6, 2, "Y")])
            .unwrap_err();

        assert!(matches!(err, RosterError::Write { operation: "add_friend", .. }));
        assert!(err.to_string().starts_with("Saving: add_friend: "));
        assert_eq!(store.log().last().map(String::as_str), Some("rollback"));
        assert!(!store.log().contains(&"commit".to_string()));
    }

    #[test]
    fn test_unexpected_row_count_is_consistency_error() {
        let store = ScriptedStore {
            friends: vec![friend(1, 1, "A")],
            fail_at: Some(0),
            affected_at_failure: Some(0),
            ..Default::default()
        };

        let err = save_friends(&store, Sport::Mlb, &[]).unwrap_err();

        assert!(matches!(
            err,
            RosterError::Consistency {
                operation: "del_friend",
                affected: 0
            }
        ));
    }

    #[test]
    fn test_rollback_failure_reports_both() {
        let store = ScriptedStore {
            friends: vec![friend(1, 1, "A")],
            fail_at: Some(0),
            fail_rollback: true,
            ..Default::default()
        };

        let err = save_friends(&store, Sport::Mlb, &[]).unwrap_err();

        match err {
            RosterError::RollbackFailed { cause, rollback } => {
                assert!(matches!(*cause, RosterError::Write { .. }));
                assert!(rollback.to_string().contains("rollback refused"));
            }
            other => panic!("expected rollback failure, got {:?}", other),
        }
    }

    #[test]
    fn test_years_multiple_active_rejected_before_writes() {
        let store = ScriptedStore::default();

        let err = save_years(&store, Sport::Nfl, &[year(2018, true), year(2019, true)])
            .unwrap_err();

        assert!(matches!(err, RosterError::Validation(_)));
        assert!(store.log().is_empty());
    }

    #[test]
    fn test_years_empty_is_skipped() {
        let store = ScriptedStore {
            years: vec![year(2019, true)],
            ..Default::default()
        };
        save_years(&store, Sport::Nfl, &[]).unwrap();
        assert!(store.log().is_empty());
    }

    #[test]
    fn test_years_clear_active_first() {
        let store = ScriptedStore {
            years: vec![year(2018, false), year(2019, true)],
            ..Default::default()
        };

        save_years(&store, Sport::Nfl, &[year(2018, false), year(2020, true)]).unwrap();

        assert_eq!(
            store.log(),
            vec![
                "begin",
                "clr_year_active",
                "del_year",
                "add_year",
                "set_year_active",
                "commit"
            ]
        );
    }

    #[test]
    fn test_years_unchanged_is_noop() {
        let store = ScriptedStore {
            years: vec![year(2018, false), year(2019, true)],
            ..Default::default()
        };
        save_years(&store, Sport::Nfl, &[year(2019, true), year(2018, false)]).unwrap();
        assert!(store.log().is_empty());
    }

    #[test]
    fn test_sqlite_replace_active_year() {
        let store = seeded_sqlite();

        save_years(&store, Sport::Mlb, &[year(2020, true)]).unwrap();

        assert_eq!(store.get_years(Sport::Mlb).unwrap(), vec![year(2020, true)]);
    }

    #[test]
    fn test_sqlite_partial_save_rolled_back() {
        let store = seeded_sqlite();
        save_friends(&store, Sport::Mlb, &[friend(0, 1, "Carl")]).unwrap();
        let carl = store.get_friends(Sport::Mlb).unwrap()[0].id;

        // The second write targets a friend that does not exist.
        let err = execute_in_transaction(
            &store,
            &[
                WriteOp::SetFriend {
                    id: carl,
                    display_order: 9,
                    name: "Carl".to_string(),
                },
                WriteOp::AddFriend {
                    sport: Sport::Mlb,
                    display_order: 2,
                    name: "Dana".to_string(),
                },
                WriteOp::SetFriend {
                    id: FriendId::new(999),
                    display_order: 1,
                    name: "Ghost".to_string(),
                },
            ],
        )
        .unwrap_err();

        assert!(matches!(
            err,
            RosterError::Consistency {
                operation: "set_friend",
                affected: 0
            }
        ));
        assert_eq!(
            store.get_friends(Sport::Mlb).unwrap(),
            vec![Friend {
                id: carl,
                display_order: 1,
                name: "Carl".to_string()
            }]
        );
    }

    #[test]
    fn test_save_players_validates_category() {
        let store = seeded_sqlite();
        let registry = SportRegistry::default();
        let nfl_category = registry.for_sport(Sport::Nfl)[0].id;
        let player = Player {
            id: PlayerId::new(0),
            category_id: nfl_category,
            source_id: SourceId::new(1),
            friend_id: FriendId::new(1),
            display_order: 1,
        };

        let err = save_players(&store, &registry, Sport::Mlb, &[player]).unwrap_err();

        assert!(matches!(err, RosterError::Validation(_)));
    }

    #[test]
    fn test_sqlite_players_round_trip() {
        let store = seeded_sqlite();
        let registry = SportRegistry::default();
        save_friends(&store, Sport::Mlb, &[friend(0, 1, "Carl")]).unwrap();
        let carl = store.get_friends(Sport::Mlb).unwrap()[0].id;
        let hitting = registry.for_sport(Sport::Mlb)[1].id;
        let new_player = |source: i64, order: i32| Player {
            id: PlayerId::new(0),
            category_id: hitting,
            source_id: SourceId::new(source),
            friend_id: carl,
            display_order: order,
        };

        save_players(
            &store,
            &registry,
            Sport::Mlb,
            &[new_player(100, 1), new_player(101, 2)],
        )
        .unwrap();
        let mut stored = store.get_players(Sport::Mlb).unwrap();
        assert_eq!(stored.len(), 2);

        stored.remove(0);
        stored[0].display_order = 1;
        save_players(&store, &registry, Sport::Mlb, &stored).unwrap();

        let after = store.get_players(Sport::Mlb).unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].source_id, SourceId::new(101));
        assert_eq!(after[0].display_order, 1);
    }
}
