//! Domain library for the expense tracker.
//!
//! This crate is dependency-free (inherits workspace metadata only) and holds
//! the domain types, the repository port (trait), and error definitions. Keep
//! adapters and IO concerns out of this crate.

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::SystemTime;

/// Opaque identifier scoping a user's records (the `sub` claim of a verified
/// Google ID token). The core treats it purely as a storage scope and never
/// interprets its contents.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UserId(String);

impl UserId {
    pub fn new<S: Into<String>>(s: S) -> Result<Self, StoreError> {
        let val = s.into();
        if val.trim().is_empty() {
            return Err(StoreError::InvalidUserId);
        }
        Ok(Self(val))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Backend-assigned identifier of a persisted expense.
///
/// The embedded store hands out auto-incrementing integers; the cloud store
/// hands out opaque document ids. Immutable once assigned.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ExpenseId {
    /// Auto-increment row id from the embedded store.
    Serial(i64),
    /// Opaque document id from the cloud store.
    Document(String),
}

impl ExpenseId {
    /// Parse an identifier from its external string form: integers become
    /// `Serial`, anything else non-empty becomes `Document`.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(StoreError::Backend("empty expense id".into()));
        }
        if let Ok(n) = trimmed.parse::<i64>() {
            return Ok(ExpenseId::Serial(n));
        }
        Ok(ExpenseId::Document(trimmed.to_string()))
    }
}

impl Display for ExpenseId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ExpenseId::Serial(n) => write!(f, "{}", n),
            ExpenseId::Document(s) => f.write_str(s),
        }
    }
}

/// Input data for creating a new expense. A strict subset of [`Expense`]:
/// the id and date are assigned by the store.
#[derive(Clone, Debug, PartialEq)]
pub struct ExpenseInput {
    pub amount: f64,
    pub description: String,
}

/// Stored expense record.
#[derive(Clone, Debug, PartialEq)]
pub struct Expense {
    pub id: ExpenseId,
    pub amount: f64,
    pub description: String,
    /// Creation timestamp, assigned by the store at insertion time.
    pub date: SystemTime,
}

/// Time source abstraction to make code testable.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

/// Wall-clock implementation used outside tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Repository port for persisting and loading expenses.
///
/// The caller's resolved user scope is passed explicitly into every call.
/// Globally scoped backends (the embedded store) ignore it; user-scoped
/// backends fail with [`StoreError::NotAuthenticated`] when it is `None`
/// and perform no write. Deleting an id that no record carries resolves
/// silently on every backend — ids are backend-assigned, so a miss means a
/// stale view, not a caller bug.
pub trait ExpenseRepository: Send + Sync {
    /// Stamp the current time, persist the record, return the new id.
    fn create(&self, user: Option<&UserId>, input: ExpenseInput)
        -> Result<ExpenseId, StoreError>;

    /// All records in the caller's scope, newest first. Eager and restartable.
    fn list(&self, user: Option<&UserId>) -> Result<Vec<Expense>, StoreError>;

    /// Remove the record with the given id from the caller's scope.
    fn delete(&self, user: Option<&UserId>, id: &ExpenseId) -> Result<(), StoreError>;

    /// Arithmetic sum of all visible amounts. Computed from `list`; nothing
    /// is persisted.
    fn sum(&self, user: Option<&UserId>) -> Result<f64, StoreError> {
        Ok(self.list(user)?.iter().map(|e| e.amount).sum())
    }
}

/// Core domain errors (no external error crates to keep deps at zero).
#[derive(Debug)]
pub enum StoreError {
    /// Rejected at the boundary before any write.
    InvalidAmount(String),
    InvalidUserId,
    /// A user-scoped backend was called with no resolved user.
    NotAuthenticated,
    /// The backend could not be opened or initialized.
    Unavailable(String),
    /// Passthrough of an underlying database failure.
    Backend(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::InvalidAmount(msg) => write!(f, "invalid amount: {}", msg),
            StoreError::InvalidUserId => write!(f, "invalid user id"),
            StoreError::NotAuthenticated => write!(f, "not authenticated"),
            StoreError::Unavailable(msg) => write!(f, "storage unavailable: {}", msg),
            StoreError::Backend(msg) => write!(f, "backend error: {}", msg),
        }
    }
}

impl Error for StoreError {}

/// Return a short about/version line for the binary to print.
pub fn about() -> String {
    let pkg = env!("CARGO_PKG_NAME");
    let ver = env!("CARGO_PKG_VERSION");
    format!("{} v{} — domain library loaded", pkg, ver)
}

// Re-export modules when added
pub mod adapters;
pub mod money;
pub mod service;
pub mod validate;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_id_rejects_blank() {
        assert!(matches!(UserId::new("   "), Err(StoreError::InvalidUserId)));
        let u = UserId::new("uid-123").expect("valid user id");
        assert_eq!(u.as_str(), "uid-123");
    }

    #[test]
    fn expense_id_parse_integer_becomes_serial() {
        let id = ExpenseId::parse("42").expect("parses");
        assert_eq!(id, ExpenseId::Serial(42));
    }

    #[test]
    fn expense_id_parse_opaque_becomes_document() {
        let id = ExpenseId::parse("0000000000123-a3b2").expect("parses");
        assert_eq!(id, ExpenseId::Document("0000000000123-a3b2".into()));
    }

    #[test]
    fn expense_id_parse_rejects_empty() {
        assert!(ExpenseId::parse("  ").is_err());
    }

    #[test]
    fn expense_id_display_roundtrips() {
        assert_eq!(ExpenseId::Serial(7).to_string(), "7");
        assert_eq!(ExpenseId::Document("abc".into()).to_string(), "abc");
    }
}
