use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::SystemTime;

use crate::{
    Clock, Expense, ExpenseId, ExpenseInput, ExpenseRepository, StoreError, SystemClock, UserId,
};

/// Simple in-memory repository for tests and local demos. Not built for high
/// concurrency beyond the internal mutex guarding the map.
///
/// It mirrors the *user-scoped* store's semantics — per-user isolation,
/// `NotAuthenticated` without a caller, opaque document ids, and the
/// date-range superset — so the remote contract is testable without a cloud
/// account.
pub struct InMemoryStore {
    inner: Mutex<Inner>,
    next_id: AtomicU64,
    clock: Box<dyn Clock>,
}

struct Inner {
    scopes: HashMap<String, Vec<Expense>>,
    // Last stamp handed out; create() never goes backwards.
    last: SystemTime,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Box::new(SystemClock))
    }

    pub fn with_clock(clock: Box<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                scopes: HashMap::new(),
                last: SystemTime::UNIX_EPOCH,
            }),
            next_id: AtomicU64::new(1),
            clock,
        }
    }

    fn require_user(user: Option<&UserId>) -> Result<&UserId, StoreError> {
        user.ok_or(StoreError::NotAuthenticated)
    }

    /// Expenses with `date` within `[start, end]` inclusive, newest first.
    /// Superset capability matching the cloud store.
    pub fn list_by_date_range(
        &self,
        user: Option<&UserId>,
        start: SystemTime,
        end: SystemTime,
    ) -> Result<Vec<Expense>, StoreError> {
        let user = Self::require_user(user)?;
        let inner = self
            .inner
            .lock()
            .map_err(|_| StoreError::Backend("mutex poisoned".into()))?;
        let mut out: Vec<Expense> = inner
            .scopes
            .get(user.as_str())
            .map(|v| {
                v.iter()
                    .filter(|e| e.date >= start && e.date <= end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        // Scopes hold insertion order with non-decreasing stamps, so a
        // reverse is an exact newest-first ordering even for equal stamps.
        out.reverse();
        Ok(out)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ExpenseRepository for InMemoryStore {
    fn create(
        &self,
        user: Option<&UserId>,
        input: ExpenseInput,
    ) -> Result<ExpenseId, StoreError> {
        let user = Self::require_user(user)?;
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| StoreError::Backend("mutex poisoned".into()))?;

        let mut now = self.clock.now();
        if now < inner.last {
            now = inner.last;
        }
        inner.last = now;

        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        let id = ExpenseId::Document(format!("mem-{n:06}"));
        inner
            .scopes
            .entry(user.as_str().to_string())
            .or_default()
            .push(Expense {
                id: id.clone(),
                amount: input.amount,
                description: input.description,
                date: now,
            });
        Ok(id)
    }

    fn list(&self, user: Option<&UserId>) -> Result<Vec<Expense>, StoreError> {
        let user = Self::require_user(user)?;
        let inner = self
            .inner
            .lock()
            .map_err(|_| StoreError::Backend("mutex poisoned".into()))?;
        let mut out: Vec<Expense> = inner
            .scopes
            .get(user.as_str())
            .cloned()
            .unwrap_or_default();
        out.reverse();
        Ok(out)
    }

    fn delete(&self, user: Option<&UserId>, id: &ExpenseId) -> Result<(), StoreError> {
        let user = Self::require_user(user)?;
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| StoreError::Backend("mutex poisoned".into()))?;
        if let Some(scope) = inner.scopes.get_mut(user.as_str()) {
            scope.retain(|e| &e.id != id);
        }
        // Unknown ids resolve silently, like both real backends.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    struct FixedSeq(Mutex<Vec<u64>>);
    impl Clock for FixedSeq {
        fn now(&self) -> SystemTime {
            let mut v = self.0.lock().expect("clock lock");
            let secs = if v.is_empty() { 0 } else { v.remove(0) };
            UNIX_EPOCH + Duration::from_secs(secs)
        }
    }

    fn user(name: &str) -> UserId {
        UserId::new(name).expect("valid")
    }

    fn input(amount: f64, desc: &str) -> ExpenseInput {
        ExpenseInput {
            amount,
            description: desc.into(),
        }
    }

    #[test]
    fn scopes_are_isolated_per_user() {
        let store = InMemoryStore::new();
        let alice = user("alice");
        let bob = user("bob");

        store.create(Some(&alice), input(1.0, "a")).expect("created");
        store.create(Some(&bob), input(2.0, "b")).expect("created");

        let a = store.list(Some(&alice)).expect("listed");
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].description, "a");
        assert_eq!(store.sum(Some(&bob)).expect("sum"), 2.0);
    }

    #[test]
    fn stamps_never_go_backwards() {
        let store = InMemoryStore::with_clock(Box::new(FixedSeq(Mutex::new(vec![100, 50, 200]))));
        let u = user("u");
        store.create(Some(&u), input(1.0, "first")).expect("created");
        store.create(Some(&u), input(1.0, "second")).expect("created");
        store.create(Some(&u), input(1.0, "third")).expect("created");

        let items = store.list(Some(&u)).expect("listed");
        for pair in items.windows(2) {
            assert!(pair[0].date >= pair[1].date);
        }
        // The backdated clock reading was clamped to the previous stamp.
        assert_eq!(items.len(), 3);
    }

    #[test]
    fn delete_of_unknown_id_is_silent() {
        let store = InMemoryStore::new();
        let u = user("u");
        store
            .delete(Some(&u), &ExpenseId::Document("nope".into()))
            .expect("silent");
        store
            .delete(Some(&u), &ExpenseId::Serial(99))
            .expect("silent");
    }

    #[test]
    fn range_query_is_inclusive_and_newest_first() {
        let store = InMemoryStore::with_clock(Box::new(FixedSeq(Mutex::new(vec![
            10, 20, 30, 40, 50,
        ]))));
        let u = user("u");
        for i in 0..5 {
            store
                .create(Some(&u), input(1.0, &format!("e{i}")))
                .expect("created");
        }

        let start = UNIX_EPOCH + Duration::from_secs(20);
        let end = UNIX_EPOCH + Duration::from_secs(40);
        let hits = store
            .list_by_date_range(Some(&u), start, end)
            .expect("range");
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].description, "e3");
        assert_eq!(hits[2].description, "e1");
    }

    #[test]
    fn unauthenticated_calls_are_rejected() {
        let store = InMemoryStore::new();
        assert!(matches!(
            store.create(None, input(1.0, "x")),
            Err(StoreError::NotAuthenticated)
        ));
        assert!(matches!(store.list(None), Err(StoreError::NotAuthenticated)));
        assert!(matches!(
            store.delete(None, &ExpenseId::Serial(1)),
            Err(StoreError::NotAuthenticated)
        ));
        assert!(matches!(
            store.list_by_date_range(None, UNIX_EPOCH, UNIX_EPOCH),
            Err(StoreError::NotAuthenticated)
        ));
    }
}
