//! sqlite-store — embedded SQLite implementation of the ExpenseRepository
//! port, the per-device local backend.
//!
//! Purpose
//! - Persist expenses in a single-table, file-based database private to one
//!   machine; no network, no per-user scoping (the `user` argument is
//!   ignored).
//! - Implements the `ExpenseRepository` trait from the `domain` crate.
//!
//! Notes
//! - Uses `rusqlite` with the `bundled` feature for portability.
//! - The connection is opened lazily on first use and memoized; every
//!   operation runs the same idempotent ensure-open step first.
//! - A store constructed with no usable storage location runs disabled:
//!   every operation returns the empty/zero default instead of failing, so
//!   headless or read-only environments degrade instead of crashing.
//! - Timestamps are stored as milliseconds since UNIX_EPOCH and are clamped
//!   non-decreasing under the store lock (no backdating).

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use domain::{
    Clock, Expense, ExpenseId, ExpenseInput, ExpenseRepository, StoreError, SystemClock, UserId,
};
use rusqlite::{params, Connection};
use tracing::warn;

/// SQLite-backed expense store.
pub struct SqliteStore {
    inner: Mutex<Inner>,
    clock: Box<dyn Clock>,
}

struct Inner {
    /// `None` marks the disabled (no-op) store.
    path: Option<PathBuf>,
    /// Opened on first use, kept until the store is dropped.
    conn: Option<Connection>,
    /// Last insertion stamp, unix millis.
    last_millis: i64,
}

impl SqliteStore {
    /// Store backed by the given file. The file is not touched until the
    /// first operation.
    pub fn open<P: AsRef<Path>>(path: P) -> Self {
        Self::build(Some(path.as_ref().to_path_buf()))
    }

    /// Permanently disabled store: every operation resolves with the
    /// empty/zero default and nothing is ever written.
    pub fn disabled() -> Self {
        Self::build(None)
    }

    /// Construct from env var `DB_PATH` (defaults to `./data/expenses.db`).
    /// If the storage directory cannot be created, the store degrades to
    /// the disabled mode rather than failing construction.
    pub fn from_env() -> Self {
        let path = std::env::var("DB_PATH").unwrap_or_else(|_| "./data/expenses.db".to_string());
        if let Some(dir) = Path::new(&path).parent() {
            if !dir.as_os_str().is_empty() {
                if let Err(e) = std::fs::create_dir_all(dir) {
                    warn!(dir = %dir.display(), err = %e, "no usable storage location; expense store disabled");
                    return Self::disabled();
                }
            }
        }
        Self::open(path)
    }

    #[cfg(test)]
    fn with_clock<P: AsRef<Path>>(path: P, clock: Box<dyn Clock>) -> Self {
        let mut s = Self::open(path);
        s.clock = clock;
        s
    }

    fn build(path: Option<PathBuf>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                path,
                conn: None,
                last_millis: 0,
            }),
            clock: Box::new(SystemClock),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Backend("mutex poisoned".into()))
    }

    /// Idempotent ensure-ready check run before every operation. Returns
    /// `false` for the disabled store; a genuine open failure on a real
    /// path surfaces as `Unavailable`.
    fn ensure_open(inner: &mut Inner) -> Result<bool, StoreError> {
        if inner.conn.is_some() {
            return Ok(true);
        }
        let Some(path) = inner.path.clone() else {
            return Ok(false);
        };
        let conn = Connection::open(&path)
            .map_err(|e| StoreError::Unavailable(format!("open {}: {e}", path.display())))?;
        init_schema(&conn)?;
        inner.conn = Some(conn);
        Ok(true)
    }

    fn stamp(&self, inner: &mut Inner) -> i64 {
        let mut now = system_time_to_millis(self.clock.now());
        if now < inner.last_millis {
            now = inner.last_millis;
        }
        inner.last_millis = now;
        now
    }
}

fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS expenses (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            amount REAL NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            date INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_expenses_date ON expenses(date);
        CREATE INDEX IF NOT EXISTS idx_expenses_amount ON expenses(amount);
        "#,
    )
    .map_err(map_sqerr)?;
    Ok(())
}

fn map_sqerr<E: std::fmt::Display>(e: E) -> StoreError {
    StoreError::Backend(format!("sqlite error: {e}"))
}

fn system_time_to_millis(t: SystemTime) -> i64 {
    t.duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as i64
}

fn millis_to_system_time(millis: i64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(millis.max(0) as u64)
}

fn row_to_expense(row: &rusqlite::Row) -> Result<Expense, StoreError> {
    let id: i64 = row.get(0).map_err(map_sqerr)?;
    let amount: f64 = row.get(1).map_err(map_sqerr)?;
    let description: String = row.get(2).map_err(map_sqerr)?;
    let date: i64 = row.get(3).map_err(map_sqerr)?;
    Ok(Expense {
        id: ExpenseId::Serial(id),
        amount,
        description,
        date: millis_to_system_time(date),
    })
}

impl ExpenseRepository for SqliteStore {
    fn create(
        &self,
        _user: Option<&UserId>,
        input: ExpenseInput,
    ) -> Result<ExpenseId, StoreError> {
        let mut inner = self.lock()?;
        if !Self::ensure_open(&mut inner)? {
            warn!("expense store disabled; create is a no-op");
            return Ok(ExpenseId::Serial(0));
        }
        let date = self.stamp(&mut inner);
        let conn = inner
            .conn
            .as_ref()
            .ok_or_else(|| StoreError::Unavailable("connection missing".into()))?;
        conn.execute(
            "INSERT INTO expenses(amount, description, date) VALUES (?1, ?2, ?3)",
            params![input.amount, input.description, date],
        )
        .map_err(map_sqerr)?;
        Ok(ExpenseId::Serial(conn.last_insert_rowid()))
    }

    fn list(&self, _user: Option<&UserId>) -> Result<Vec<Expense>, StoreError> {
        let mut inner = self.lock()?;
        if !Self::ensure_open(&mut inner)? {
            return Ok(Vec::new());
        }
        let conn = inner
            .conn
            .as_ref()
            .ok_or_else(|| StoreError::Unavailable("connection missing".into()))?;
        let mut stmt = conn
            .prepare(
                "SELECT id, amount, description, date FROM expenses ORDER BY date DESC, id DESC",
            )
            .map_err(map_sqerr)?;
        let mut rows = stmt.query([]).map_err(map_sqerr)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(map_sqerr)? {
            out.push(row_to_expense(row)?);
        }
        Ok(out)
    }

    fn delete(&self, _user: Option<&UserId>, id: &ExpenseId) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if !Self::ensure_open(&mut inner)? {
            return Ok(());
        }
        let conn = inner
            .conn
            .as_ref()
            .ok_or_else(|| StoreError::Unavailable("connection missing".into()))?;
        match id {
            ExpenseId::Serial(n) => {
                // Zero rows affected means the id was already gone; resolve
                // silently, matching the port contract.
                conn.execute("DELETE FROM expenses WHERE id = ?1", params![n])
                    .map_err(map_sqerr)?;
            }
            // A document id can never name a local row.
            ExpenseId::Document(_) => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};

    /// Clock that replays a fixed sequence of millisecond stamps, then keeps
    /// returning the final one.
    struct SeqClock {
        stamps: Vec<i64>,
        idx: AtomicI64,
    }

    impl Clock for SeqClock {
        fn now(&self) -> SystemTime {
            let i = self.idx.fetch_add(1, Ordering::Relaxed) as usize;
            let millis = *self
                .stamps
                .get(i)
                .or(self.stamps.last())
                .unwrap_or(&0);
            millis_to_system_time(millis)
        }
    }

    fn tmp_store() -> (SqliteStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("t.db"));
        (store, dir)
    }

    fn input(amount: f64, desc: &str) -> ExpenseInput {
        ExpenseInput {
            amount,
            description: desc.into(),
        }
    }

    #[test]
    fn create_list_roundtrip() {
        let (store, _dir) = tmp_store();
        let id = store.create(None, input(123.45, "Coffee")).unwrap();
        assert!(matches!(id, ExpenseId::Serial(n) if n > 0));

        let items = store.list(None).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, id);
        assert_eq!(items[0].amount, 123.45);
        assert_eq!(items[0].description, "Coffee");
    }

    #[test]
    fn list_orders_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::with_clock(
            dir.path().join("t.db"),
            Box::new(SeqClock {
                stamps: vec![1_000, 2_000, 3_000, 4_000, 5_000],
                idx: AtomicI64::new(0),
            }),
        );
        for i in 0..5 {
            store.create(None, input(1.0, &format!("e{i}"))).unwrap();
        }
        let items = store.list(None).unwrap();
        assert_eq!(items.len(), 5);
        assert_eq!(items[0].description, "e4");
        for pair in items.windows(2) {
            assert!(pair[0].date >= pair[1].date);
        }
    }

    #[test]
    fn equal_stamps_break_ties_by_newest_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::with_clock(
            dir.path().join("t.db"),
            Box::new(SeqClock {
                stamps: vec![1_000, 1_000, 1_000],
                idx: AtomicI64::new(0),
            }),
        );
        for i in 0..3 {
            store.create(None, input(1.0, &format!("e{i}"))).unwrap();
        }
        let items = store.list(None).unwrap();
        assert_eq!(items[0].description, "e2");
        assert_eq!(items[2].description, "e0");
    }

    #[test]
    fn backdated_clock_is_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::with_clock(
            dir.path().join("t.db"),
            Box::new(SeqClock {
                stamps: vec![5_000, 1_000, 9_000],
                idx: AtomicI64::new(0),
            }),
        );
        for i in 0..3 {
            store.create(None, input(1.0, &format!("e{i}"))).unwrap();
        }
        let items = store.list(None).unwrap();
        // e1 was stamped at the clamped 5_000, not 1_000.
        let e1 = items.iter().find(|e| e.description == "e1").unwrap();
        assert_eq!(e1.date, millis_to_system_time(5_000));
    }

    #[test]
    fn delete_removes_one_row_and_missing_is_silent() {
        let (store, _dir) = tmp_store();
        let a = store.create(None, input(1.0, "a")).unwrap();
        let b = store.create(None, input(2.0, "b")).unwrap();

        store.delete(None, &a).unwrap();
        let items = store.list(None).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, b);

        // Deleting again, or deleting a foreign document id, resolves silently.
        store.delete(None, &a).unwrap();
        store
            .delete(None, &ExpenseId::Document("remote-doc".into()))
            .unwrap();
        assert_eq!(store.list(None).unwrap().len(), 1);
    }

    #[test]
    fn sum_tracks_creates_and_deletes() {
        let (store, _dir) = tmp_store();
        assert_eq!(store.sum(None).unwrap(), 0.0);

        let a = store.create(None, input(10.0, "")).unwrap();
        store.create(None, input(2.5, "")).unwrap();
        assert!((store.sum(None).unwrap() - 12.5).abs() < 1e-9);

        store.delete(None, &a).unwrap();
        assert!((store.sum(None).unwrap() - 2.5).abs() < 1e-9);
    }

    #[test]
    fn disabled_store_degrades_to_noop() {
        let store = SqliteStore::disabled();
        assert_eq!(store.create(None, input(5.0, "x")).unwrap(), ExpenseId::Serial(0));
        assert!(store.list(None).unwrap().is_empty());
        store.delete(None, &ExpenseId::Serial(1)).unwrap();
        assert_eq!(store.sum(None).unwrap(), 0.0);
    }

    #[test]
    fn reopen_same_file_sees_existing_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.db");
        {
            let store = SqliteStore::open(&path);
            store.create(None, input(3.0, "persisted")).unwrap();
        }
        let store = SqliteStore::open(&path);
        let items = store.list(None).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].description, "persisted");
    }

    #[test]
    fn open_failure_on_real_path_surfaces_unavailable() {
        // A directory path cannot be opened as a database file.
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path());
        let err = store.create(None, input(1.0, "x")).unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }
}
