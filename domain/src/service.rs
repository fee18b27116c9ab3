use crate::validate::{normalize_description, validate_amount};
use crate::{Expense, ExpenseId, ExpenseInput, ExpenseRepository, StoreError, UserId};

/// How many records the "recent expenses" view shows by default.
pub const DEFAULT_RECENT_LIMIT: usize = 15;

/// Application service orchestrating expense writes and reads.
///
/// It stays generic over the repository port so it runs unchanged against
/// the embedded store, the cloud store, or the in-memory test adapter. The
/// service owns boundary validation and normalization; timestamps and ids
/// are assigned by the store underneath.
pub struct ExpenseService<R: ExpenseRepository> {
    repo: R,
}

impl<R: ExpenseRepository> ExpenseService<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Validate and persist a new expense; returns the backend-assigned id.
    pub fn create(
        &self,
        user: Option<&UserId>,
        input: ExpenseInput,
    ) -> Result<ExpenseId, StoreError> {
        validate_amount(input.amount)?;
        let normalized = ExpenseInput {
            amount: input.amount,
            description: normalize_description(&input.description),
        };
        self.repo.create(user, normalized)
    }

    /// All expenses in the caller's scope, newest first.
    pub fn list(&self, user: Option<&UserId>) -> Result<Vec<Expense>, StoreError> {
        self.repo.list(user)
    }

    /// The most recent `limit` expenses, newest first.
    pub fn recent(&self, user: Option<&UserId>, limit: usize) -> Result<Vec<Expense>, StoreError> {
        let mut expenses = self.repo.list(user)?;
        // list() already orders newest-first; re-sort defensively since the
        // view is what users actually see.
        expenses.sort_by(|a, b| b.date.cmp(&a.date));
        expenses.truncate(limit);
        Ok(expenses)
    }

    /// Permanently remove one expense.
    pub fn delete(&self, user: Option<&UserId>, id: &ExpenseId) -> Result<(), StoreError> {
        self.repo.delete(user, id)
    }

    /// Running total over everything visible to the caller.
    pub fn total(&self, user: Option<&UserId>) -> Result<f64, StoreError> {
        self.repo.sum(user)
    }
}
