use crate::app_dirs::AppDirs;
use crate::error::RepsError;
use crate::workout::WorkoutLibrary;
use chrono::{DateTime, Local};
use itertools::Itertools;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// One persisted personal record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordEntry {
    pub value: u32,
    pub at: DateTime<Local>,
}

/// Denormalized exercise metadata kept alongside the records so the report
/// can render without the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMeta {
    pub id: String,
    pub name: String,
    pub max_is_good: bool,
}

/// A user's persisted best-record aggregate: one snapshot per user, not per
/// session. `version` backs the conditional update.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordSnapshot {
    pub records: HashMap<String, RecordEntry>,
    pub exercises: Vec<RecordMeta>,
    pub version: i64,
}

/// The minimal set of per-exercise updates a session produces.
pub type RecordPatch = HashMap<String, RecordEntry>;

/// Result of comparing a session against the persisted snapshot.
#[derive(Debug, Clone)]
pub struct Reconciliation {
    /// Exercise ids that improved, sorted.
    pub improved: Vec<String>,
    pub patch: RecordPatch,
    /// Metadata rows for the patched exercises.
    pub meta: Vec<RecordMeta>,
}

/// Apply a patch to a snapshot: per-exercise replacement, keyed by id.
/// Applying the same patch twice changes nothing after the first time.
pub fn apply_patch(snapshot: &mut RecordSnapshot, patch: &RecordPatch) {
    for (id, entry) in patch {
        snapshot.records.insert(id.clone(), entry.clone());
    }
}

/// Decides, per exercise, whether a session result beats the persisted best
/// under that exercise's comparison policy, and builds the write patch.
pub struct Reconciler<'a> {
    library: &'a WorkoutLibrary,
}

impl<'a> Reconciler<'a> {
    pub fn new(library: &'a WorkoutLibrary) -> Self {
        Self { library }
    }

    fn improves(&self, id: &str, value: u32, prev: u32) -> bool {
        if prev == 0 {
            return value > 0;
        }
        let max_is_good = self
            .library
            .exercise(id)
            .map(|e| e.max_is_good)
            .unwrap_or(false);
        if max_is_good {
            value > prev
        } else {
            value < prev
        }
    }

    pub fn reconcile(
        &self,
        results: &HashMap<String, u32>,
        previous: Option<&RecordSnapshot>,
    ) -> Reconciliation {
        let now = Local::now();
        let mut patch = RecordPatch::new();
        let mut meta = Vec::new();

        for (id, &value) in results.iter().sorted_by(|a, b| a.0.cmp(b.0)) {
            let prev = previous
                .and_then(|s| s.records.get(id))
                .map(|e| e.value)
                .unwrap_or(0);
            if !self.improves(id, value, prev) {
                continue;
            }
            patch.insert(id.clone(), RecordEntry { value, at: now });
            meta.push(match self.library.exercise(id) {
                Some(ex) => RecordMeta {
                    id: ex.id.clone(),
                    name: ex.name.clone(),
                    max_is_good: ex.max_is_good,
                },
                None => RecordMeta {
                    id: id.clone(),
                    name: id.clone(),
                    max_is_good: false,
                },
            });
        }

        let improved = patch.keys().cloned().sorted().collect();
        Reconciliation {
            improved,
            patch,
            meta,
        }
    }
}

/// Narrow persistence surface for the per-user record snapshot.
pub trait RecordStore {
    fn get(&self, user: &str) -> Result<Option<RecordSnapshot>, RepsError>;

    /// Create the snapshot for a user that has none. Fails with `Conflict`
    /// when one appeared in the meantime.
    fn set(&mut self, user: &str, snapshot: &RecordSnapshot) -> Result<(), RepsError>;

    /// Field-level merge keyed by exercise id, conditional on `base_version`
    /// still being the committed one.
    fn update(
        &mut self,
        user: &str,
        base_version: i64,
        patch: &RecordPatch,
        meta: &[RecordMeta],
    ) -> Result<(), RepsError>;
}

/// Sqlite-backed record store.
#[derive(Debug)]
pub struct SqliteRecordStore {
    conn: Connection,
}

impl SqliteRecordStore {
    pub fn open_default() -> Result<Self, RepsError> {
        let db_path = AppDirs::db_path().unwrap_or_else(|| PathBuf::from("reps_records.db"));
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::open(db_path)
    }

    pub fn open<P: AsRef<std::path::Path>>(path: P) -> Result<Self, RepsError> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, RepsError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, RepsError> {
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS snapshots (
                user_id TEXT PRIMARY KEY,
                version INTEGER NOT NULL
            )
            "#,
            [],
        )?;
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                user_id TEXT NOT NULL,
                exercise_id TEXT NOT NULL,
                value INTEGER NOT NULL,
                at TEXT NOT NULL,
                PRIMARY KEY (user_id, exercise_id)
            )
            "#,
            [],
        )?;
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS record_exercises (
                user_id TEXT NOT NULL,
                exercise_id TEXT NOT NULL,
                name TEXT NOT NULL,
                max_is_good BOOLEAN NOT NULL,
                PRIMARY KEY (user_id, exercise_id)
            )
            "#,
            [],
        )?;
        Ok(Self { conn })
    }

    fn parse_at(raw: &str) -> Result<DateTime<Local>, RepsError> {
        DateTime::parse_from_rfc3339(raw)
            .map(|t| t.with_timezone(&Local))
            .map_err(|e| RepsError::Persistence(format!("bad record timestamp: {e}")))
    }
}

impl RecordStore for SqliteRecordStore {
    fn get(&self, user: &str) -> Result<Option<RecordSnapshot>, RepsError> {
        let version: Option<i64> = self
            .conn
            .query_row(
                "SELECT version FROM snapshots WHERE user_id = ?1",
                [user],
                |row| row.get(0),
            )
            .optional()?;
        let Some(version) = version else {
            return Ok(None);
        };

        let mut records = HashMap::new();
        let mut stmt = self
            .conn
            .prepare("SELECT exercise_id, value, at FROM records WHERE user_id = ?1")?;
        let rows = stmt.query_map([user], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, u32>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        for row in rows {
            let (id, value, at) = row?;
            records.insert(
                id,
                RecordEntry {
                    value,
                    at: Self::parse_at(&at)?,
                },
            );
        }

        let mut exercises = Vec::new();
        let mut stmt = self.conn.prepare(
            "SELECT exercise_id, name, max_is_good FROM record_exercises WHERE user_id = ?1 ORDER BY exercise_id",
        )?;
        let rows = stmt.query_map([user], |row| {
            Ok(RecordMeta {
                id: row.get(0)?,
                name: row.get(1)?,
                max_is_good: row.get(2)?,
            })
        })?;
        for row in rows {
            exercises.push(row?);
        }

        Ok(Some(RecordSnapshot {
            records,
            exercises,
            version,
        }))
    }

    fn set(&mut self, user: &str, snapshot: &RecordSnapshot) -> Result<(), RepsError> {
        let tx = self.conn.transaction()?;
        let created = tx.execute(
            "INSERT INTO snapshots (user_id, version) VALUES (?1, ?2) ON CONFLICT(user_id) DO NOTHING",
            params![user, snapshot.version],
        )?;
        if created == 0 {
            return Err(RepsError::Conflict);
        }
        for (id, entry) in &snapshot.records {
            tx.execute(
                "INSERT OR REPLACE INTO records (user_id, exercise_id, value, at) VALUES (?1, ?2, ?3, ?4)",
                params![user, id, entry.value, entry.at.to_rfc3339()],
            )?;
        }
        for meta in &snapshot.exercises {
            tx.execute(
                "INSERT OR REPLACE INTO record_exercises (user_id, exercise_id, name, max_is_good) VALUES (?1, ?2, ?3, ?4)",
                params![user, meta.id, meta.name, meta.max_is_good],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn update(
        &mut self,
        user: &str,
        base_version: i64,
        patch: &RecordPatch,
        meta: &[RecordMeta],
    ) -> Result<(), RepsError> {
        let tx = self.conn.transaction()?;
        let swapped = tx.execute(
            "UPDATE snapshots SET version = version + 1 WHERE user_id = ?1 AND version = ?2",
            params![user, base_version],
        )?;
        if swapped == 0 {
            return Err(RepsError::Conflict);
        }
        for (id, entry) in patch {
            tx.execute(
                "INSERT OR REPLACE INTO records (user_id, exercise_id, value, at) VALUES (?1, ?2, ?3, ?4)",
                params![user, id, entry.value, entry.at.to_rfc3339()],
            )?;
        }
        for m in meta {
            tx.execute(
                "INSERT OR REPLACE INTO record_exercises (user_id, exercise_id, name, max_is_good) VALUES (?1, ?2, ?3, ?4)",
                params![user, m.id, m.name, m.max_is_good],
            )?;
        }
        tx.commit()?;
        Ok(())
    }
}

/// Read the committed snapshot, compute the improvement patch, and write it
/// conditionally. A version conflict (another completion won the race) is
/// retried once against the fresher snapshot. An empty patch issues no write
/// at all, so non-improving sessions never bump timestamps.
pub fn reconcile_and_commit<S: RecordStore>(
    store: &mut S,
    library: &WorkoutLibrary,
    user: &str,
    results: &HashMap<String, u32>,
) -> Result<Reconciliation, RepsError> {
    let reconciler = Reconciler::new(library);
    let mut retried = false;

    loop {
        let previous = store.get(user)?;
        let rec = reconciler.reconcile(results, previous.as_ref());
        if rec.patch.is_empty() {
            return Ok(rec);
        }

        let outcome = match &previous {
            None => {
                let mut snapshot = RecordSnapshot {
                    version: 1,
                    exercises: rec.meta.clone(),
                    ..Default::default()
                };
                apply_patch(&mut snapshot, &rec.patch);
                store.set(user, &snapshot)
            }
            Some(prev) => store.update(user, prev.version, &rec.patch, &rec.meta),
        };

        match outcome {
            Ok(()) => return Ok(rec),
            Err(RepsError::Conflict) if !retried => {
                retried = true;
                continue;
            }
            Err(RepsError::Conflict) => {
                return Err(RepsError::Persistence(
                    "record snapshot kept changing during commit".to_string(),
                ))
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exercise::{Exercise, VideoVariants};
    use assert_matches::assert_matches;

    fn test_library() -> WorkoutLibrary {
        let mk = |id: &str, max_is_good: bool| Exercise {
            id: id.to_string(),
            name: id.to_string(),
            sets: 1,
            set_duration: None,
            rest: 10,
            uses_tracking: true,
            max_is_good,
            per_foot: false,
            video: VideoVariants::default(),
        };
        WorkoutLibrary::build(vec![mk("higher", true), mk("lower", false)], vec![]).unwrap()
    }

    fn snapshot_with(id: &str, value: u32) -> RecordSnapshot {
        let mut records = HashMap::new();
        records.insert(
            id.to_string(),
            RecordEntry {
                value,
                at: Local::now(),
            },
        );
        RecordSnapshot {
            records,
            exercises: vec![],
            version: 1,
        }
    }

    fn results(pairs: &[(&str, u32)]) -> HashMap<String, u32> {
        pairs
            .iter()
            .map(|(id, v)| (id.to_string(), *v))
            .collect()
    }

    #[test]
    fn test_lower_is_better_improvement() {
        let lib = test_library();
        let rec = Reconciler::new(&lib).reconcile(
            &results(&[("lower", 6)]),
            Some(&snapshot_with("lower", 8)),
        );

        assert_eq!(rec.improved, vec!["lower".to_string()]);
        assert_eq!(rec.patch["lower"].value, 6);
    }

    #[test]
    fn test_lower_is_better_regression_is_not_improvement() {
        let lib = test_library();
        let rec = Reconciler::new(&lib).reconcile(
            &results(&[("lower", 10)]),
            Some(&snapshot_with("lower", 8)),
        );

        assert!(rec.improved.is_empty());
        assert!(rec.patch.is_empty());
    }

    #[test]
    fn test_higher_is_better_improvement() {
        let lib = test_library();
        let rec = Reconciler::new(&lib).reconcile(
            &results(&[("higher", 25)]),
            Some(&snapshot_with("higher", 20)),
        );

        assert_eq!(rec.improved, vec!["higher".to_string()]);
        assert_eq!(rec.patch["higher"].value, 25);
    }

    #[test]
    fn test_higher_is_better_regression_is_not_improvement() {
        let lib = test_library();
        let rec = Reconciler::new(&lib).reconcile(
            &results(&[("higher", 15)]),
            Some(&snapshot_with("higher", 20)),
        );

        assert!(rec.improved.is_empty());
    }

    #[test]
    fn test_first_ever_zero_result_writes_nothing() {
        let lib = test_library();
        let rec = Reconciler::new(&lib).reconcile(&results(&[("higher", 0)]), None);

        assert!(rec.improved.is_empty());
        assert!(rec.patch.is_empty());
    }

    #[test]
    fn test_missing_snapshot_every_positive_result_improves() {
        let lib = test_library();
        let rec =
            Reconciler::new(&lib).reconcile(&results(&[("higher", 3), ("lower", 9)]), None);

        assert_eq!(
            rec.improved,
            vec!["higher".to_string(), "lower".to_string()]
        );
        assert_eq!(rec.meta.len(), 2);
    }

    #[test]
    fn test_zero_previous_value_acts_like_absent() {
        // A stored zero must not make "lower is better" treat 1 as a regression
        let lib = test_library();
        let rec = Reconciler::new(&lib).reconcile(
            &results(&[("lower", 1)]),
            Some(&snapshot_with("lower", 0)),
        );

        assert_eq!(rec.improved, vec!["lower".to_string()]);
    }

    #[test]
    fn test_apply_patch_is_idempotent() {
        let lib = test_library();
        let rec = Reconciler::new(&lib).reconcile(&results(&[("higher", 3)]), None);

        let mut once = RecordSnapshot::default();
        apply_patch(&mut once, &rec.patch);
        let mut twice = once.clone();
        apply_patch(&mut twice, &rec.patch);

        assert_eq!(once.records, twice.records);
    }

    #[test]
    fn test_sqlite_get_absent_user() {
        let store = SqliteRecordStore::open_in_memory().unwrap();
        assert!(store.get("nobody").unwrap().is_none());
    }

    #[test]
    fn test_sqlite_set_then_get_round_trip() {
        let mut store = SqliteRecordStore::open_in_memory().unwrap();
        let mut snapshot = snapshot_with("higher", 20);
        snapshot.exercises = vec![RecordMeta {
            id: "higher".to_string(),
            name: "higher".to_string(),
            max_is_good: true,
        }];

        store.set("u", &snapshot).unwrap();
        let loaded = store.get("u").unwrap().unwrap();

        assert_eq!(loaded.version, 1);
        assert_eq!(loaded.records["higher"].value, 20);
        assert_eq!(loaded.exercises, snapshot.exercises);
    }

    #[test]
    fn test_sqlite_set_conflicts_when_snapshot_exists() {
        let mut store = SqliteRecordStore::open_in_memory().unwrap();
        store.set("u", &snapshot_with("higher", 20)).unwrap();

        let result = store.set("u", &snapshot_with("higher", 30));
        assert_matches!(result, Err(RepsError::Conflict));
    }

    #[test]
    fn test_sqlite_update_merges_and_bumps_version() {
        let mut store = SqliteRecordStore::open_in_memory().unwrap();
        store.set("u", &snapshot_with("higher", 20)).unwrap();

        let mut patch = RecordPatch::new();
        patch.insert(
            "lower".to_string(),
            RecordEntry {
                value: 7,
                at: Local::now(),
            },
        );
        store.update("u", 1, &patch, &[]).unwrap();

        let loaded = store.get("u").unwrap().unwrap();
        assert_eq!(loaded.version, 2);
        assert_eq!(loaded.records.len(), 2);
        assert_eq!(loaded.records["higher"].value, 20);
        assert_eq!(loaded.records["lower"].value, 7);
    }

    #[test]
    fn test_sqlite_update_with_stale_version_conflicts() {
        let mut store = SqliteRecordStore::open_in_memory().unwrap();
        store.set("u", &snapshot_with("higher", 20)).unwrap();
        store.update("u", 1, &RecordPatch::new(), &[]).unwrap();

        let result = store.update("u", 1, &RecordPatch::new(), &[]);
        assert_matches!(result, Err(RepsError::Conflict));
    }

    #[test]
    fn test_commit_first_session_creates_snapshot() {
        let lib = test_library();
        let mut store = SqliteRecordStore::open_in_memory().unwrap();

        let rec =
            reconcile_and_commit(&mut store, &lib, "u", &results(&[("higher", 12)])).unwrap();
        assert_eq!(rec.improved, vec!["higher".to_string()]);

        let loaded = store.get("u").unwrap().unwrap();
        assert_eq!(loaded.records["higher"].value, 12);
        assert_eq!(loaded.version, 1);
        assert_eq!(loaded.exercises.len(), 1);
    }

    #[test]
    fn test_commit_non_improving_session_leaves_store_untouched() {
        let lib = test_library();
        let mut store = SqliteRecordStore::open_in_memory().unwrap();
        reconcile_and_commit(&mut store, &lib, "u", &results(&[("higher", 12)])).unwrap();
        let before = store.get("u").unwrap().unwrap();

        let rec =
            reconcile_and_commit(&mut store, &lib, "u", &results(&[("higher", 9)])).unwrap();
        assert!(rec.improved.is_empty());

        let after = store.get("u").unwrap().unwrap();
        assert_eq!(after.version, before.version);
        assert_eq!(after.records["higher"].at, before.records["higher"].at);
    }

    #[test]
    fn test_commit_improvement_touches_only_the_improved_entry() {
        let lib = test_library();
        let mut store = SqliteRecordStore::open_in_memory().unwrap();
        reconcile_and_commit(
            &mut store,
            &lib,
            "u",
            &results(&[("higher", 12), ("lower", 8)]),
        )
        .unwrap();
        let before = store.get("u").unwrap().unwrap();

        let rec =
            reconcile_and_commit(&mut store, &lib, "u", &results(&[("lower", 6)])).unwrap();
        assert_eq!(rec.improved, vec!["lower".to_string()]);

        let after = store.get("u").unwrap().unwrap();
        assert_eq!(after.records["lower"].value, 6);
        assert_eq!(after.records["higher"], before.records["higher"]);
        assert_eq!(after.version, before.version + 1);
    }

    #[test]
    fn test_commit_retries_once_on_conflict() {
        // Store double that reports a stale version on the first update
        struct Contended {
            inner: SqliteRecordStore,
            failed_once: bool,
        }

        impl RecordStore for Contended {
            fn get(&self, user: &str) -> Result<Option<RecordSnapshot>, RepsError> {
                self.inner.get(user)
            }
            fn set(&mut self, user: &str, snapshot: &RecordSnapshot) -> Result<(), RepsError> {
                self.inner.set(user, snapshot)
            }
            fn update(
                &mut self,
                user: &str,
                base_version: i64,
                patch: &RecordPatch,
                meta: &[RecordMeta],
            ) -> Result<(), RepsError> {
                if !self.failed_once {
                    self.failed_once = true;
                    return Err(RepsError::Conflict);
                }
                self.inner.update(user, base_version, patch, meta)
            }
        }

        let lib = test_library();
        let mut inner = SqliteRecordStore::open_in_memory().unwrap();
        inner.set("u", &snapshot_with("higher", 10)).unwrap();
        let mut store = Contended {
            inner,
            failed_once: false,
        };

        let rec =
            reconcile_and_commit(&mut store, &lib, "u", &results(&[("higher", 15)])).unwrap();
        assert_eq!(rec.improved, vec!["higher".to_string()]);
        assert_eq!(store.inner.get("u").unwrap().unwrap().records["higher"].value, 15);
    }

    #[test]
    fn test_commit_surfaces_persistence_failure() {
        struct Broken;

        impl RecordStore for Broken {
            fn get(&self, _user: &str) -> Result<Option<RecordSnapshot>, RepsError> {
                Err(RepsError::Persistence("store offline".to_string()))
            }
            fn set(&mut self, _user: &str, _snapshot: &RecordSnapshot) -> Result<(), RepsError> {
                Err(RepsError::Persistence("store offline".to_string()))
            }
            fn update(
                &mut self,
                _user: &str,
                _base_version: i64,
                _patch: &RecordPatch,
                _meta: &[RecordMeta],
            ) -> Result<(), RepsError> {
                Err(RepsError::Persistence("store offline".to_string()))
            }
        }

        let lib = test_library();
        let result =
            reconcile_and_commit(&mut Broken, &lib, "u", &results(&[("higher", 15)]));
        assert_matches!(result, Err(RepsError::Persistence(_)));
    }
}
