//! DynamoDB adapter implementing the `ExpenseRepository` port.
//!
//! Production-ready implementation backed by `aws-sdk-dynamodb`.
//! - Stores expenses in a single table keyed by `user_id` (partition) and
//!   `expense_id` (sort), so each user only ever sees their own partition.
//! - Document ids embed the creation timestamp, making the sort key
//!   chronological: newest-first listing is a reverse key scan and date-range
//!   queries are key-condition `BETWEEN`s, no filter expressions needed.
//! - Provides `from_env()` wiring using the `DYNAMO_TABLE_EXPENSES` env var
//!   (defaults to `Expenses`).
//!
//! Notes:
//! - The domain `ExpenseRepository` trait is synchronous. We bridge to the
//!   async AWS SDK using an internal `tokio::runtime::Runtime` and `block_on`.
//! - Every operation requires a caller: a `None` user is rejected with
//!   `NotAuthenticated` before any request is sent.

use aws_sdk_dynamodb::{types::AttributeValue, Client};
use aws_smithy_types::error::metadata::ProvideErrorMetadata;
use domain::{Expense, ExpenseId, ExpenseInput, ExpenseRepository, StoreError, UserId};
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::warn;

/// Repository backed by AWS DynamoDB.
///
/// Supports both standalone mode (creates its own Tokio runtime) and
/// server mode (reuses the existing runtime via `Handle::current()`).
#[derive(Clone)]
pub struct DynamoStore {
    table: String,
    client: Client,
    // Optional runtime - None when already inside a runtime (reuses it)
    rt: Option<std::sync::Arc<tokio::runtime::Runtime>>,
}

impl DynamoStore {
    /// Create a new store from an explicit table name and an AWS SDK client.
    ///
    /// If called from within a Tokio runtime, reuses the existing runtime.
    /// Otherwise creates a new runtime.
    pub fn with_client(table: impl Into<String>, client: Client) -> Result<Self, StoreError> {
        let rt = Self::maybe_create_runtime()?;
        Ok(Self {
            table: table.into(),
            client,
            rt,
        })
    }

    /// Construct with a table name but create a default AWS SDK client using env/IMDS.
    pub fn new(table: impl Into<String>) -> Result<Self, StoreError> {
        let rt = Self::maybe_create_runtime()?;
        let conf = Self::block_on_with_rt(&rt, aws_config::load_from_env());
        let client = Client::new(&conf);
        Ok(Self {
            table: table.into(),
            client,
            rt,
        })
    }

    /// Construct from the `DYNAMO_TABLE_EXPENSES` env var (defaults to `Expenses`).
    pub fn from_env() -> Result<Self, StoreError> {
        let table =
            std::env::var("DYNAMO_TABLE_EXPENSES").unwrap_or_else(|_| "Expenses".to_string());
        Self::new(table)
    }

    /// Check if we're inside a Tokio runtime. If yes, return None (reuse existing).
    /// If no, create a new runtime.
    fn maybe_create_runtime() -> Result<Option<std::sync::Arc<tokio::runtime::Runtime>>, StoreError>
    {
        if tokio::runtime::Handle::try_current().is_ok() {
            Ok(None)
        } else {
            let rt = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(2)
                .enable_all()
                .build()
                .map_err(|e| StoreError::Unavailable(format!("tokio runtime init: {e}")))?;
            Ok(Some(std::sync::Arc::new(rt)))
        }
    }

    /// Run an async future, using either our owned runtime or the current runtime.
    fn block_on<F: std::future::Future>(&self, fut: F) -> F::Output {
        Self::block_on_with_rt(&self.rt, fut)
    }

    fn block_on_with_rt<F: std::future::Future>(
        rt: &Option<std::sync::Arc<tokio::runtime::Runtime>>,
        fut: F,
    ) -> F::Output {
        match rt {
            Some(rt) => rt.block_on(fut),
            None => {
                // Inside an existing runtime - use block_in_place + Handle::current()
                tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(fut))
            }
        }
    }

    /// Expenses with `date` within `[start, end]` inclusive, newest first.
    ///
    /// Because the sort key starts with the zero-padded millisecond stamp,
    /// the range translates to a single key-condition `BETWEEN`.
    pub fn list_by_date_range(
        &self,
        user: Option<&UserId>,
        start: SystemTime,
        end: SystemTime,
    ) -> Result<Vec<Expense>, StoreError> {
        let user = require_user(user)?;
        let table = self.table.clone();
        let uid = user.as_str().to_string();
        let lo = format!("{:013}", system_time_to_millis(start));
        // '~' (0x7e) sorts after the '-' separator, so this upper bound
        // covers every id stamped within the end millisecond.
        let hi = format!("{:013}~", system_time_to_millis(end));
        let fut = async {
            self.client
                .query()
                .table_name(table)
                .key_condition_expression("user_id = :uid AND expense_id BETWEEN :lo AND :hi")
                .expression_attribute_values(":uid", AttributeValue::S(uid))
                .expression_attribute_values(":lo", AttributeValue::S(lo))
                .expression_attribute_values(":hi", AttributeValue::S(hi))
                .scan_index_forward(false)
                .send()
                .await
        };
        let out = self.block_on(fut).map_err(map_sdk_err)?;
        let mut res = Vec::new();
        for it in out.items().iter() {
            res.push(item_to_expense(it)?);
        }
        Ok(res)
    }
}

fn require_user(user: Option<&UserId>) -> Result<&UserId, StoreError> {
    user.ok_or(StoreError::NotAuthenticated)
}

impl ExpenseRepository for DynamoStore {
    fn create(&self, user: Option<&UserId>, input: ExpenseInput) -> Result<ExpenseId, StoreError> {
        let user = require_user(user)?;
        let table = self.table.clone();
        let now = SystemTime::now();
        let doc_id = make_document_id(now);
        let expense = Expense {
            id: ExpenseId::Document(doc_id.clone()),
            amount: input.amount,
            description: input.description,
            date: now,
        };
        let item = expense_to_item(user, &expense);
        let fut = async {
            self.client
                .put_item()
                .table_name(table)
                .set_item(Some(item))
                .send()
                .await
        };
        self.block_on(fut).map_err(map_sdk_err)?;
        Ok(ExpenseId::Document(doc_id))
    }

    fn list(&self, user: Option<&UserId>) -> Result<Vec<Expense>, StoreError> {
        let user = require_user(user)?;
        let table = self.table.clone();
        let uid = user.as_str().to_string();
        let fut = async {
            self.client
                .query()
                .table_name(table)
                .key_condition_expression("user_id = :uid")
                .expression_attribute_values(":uid", AttributeValue::S(uid))
                .scan_index_forward(false) // newest first
                .send()
                .await
        };
        let out = self.block_on(fut).map_err(map_sdk_err)?;
        let mut res = Vec::new();
        for it in out.items().iter() {
            res.push(item_to_expense(it)?);
        }
        Ok(res)
    }

    fn delete(&self, user: Option<&UserId>, id: &ExpenseId) -> Result<(), StoreError> {
        let user = require_user(user)?;
        let doc_id = match id {
            ExpenseId::Document(s) => s.clone(),
            // Serial ids never name a cloud document; nothing to delete.
            ExpenseId::Serial(_) => return Ok(()),
        };
        let table = self.table.clone();
        let uid = user.as_str().to_string();
        // Unconditional delete: a missing item resolves silently.
        let fut = async {
            self.client
                .delete_item()
                .table_name(table)
                .key("user_id", AttributeValue::S(uid))
                .key("expense_id", AttributeValue::S(doc_id))
                .send()
                .await
        };
        self.block_on(fut).map_err(map_sdk_err)?;
        Ok(())
    }
}

// Log at the adapter so failures are visible even when callers swallow
// the error, then re-raise.
fn map_sdk_err<E: ProvideErrorMetadata + std::fmt::Display>(e: E) -> StoreError {
    if e.code() == Some("ResourceNotFoundException") {
        warn!(err = %e, "dynamo table missing");
        return StoreError::Unavailable("missing table".into());
    }
    warn!(err = %e, code = e.code().unwrap_or("-"), "dynamo operation failed");
    StoreError::Backend(format!("dynamo error: {e}"))
}

fn system_time_to_millis(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

fn millis_to_system_time(millis: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(millis)
}

/// Sort key for a new document: zero-padded millisecond stamp plus a random
/// suffix. Lexicographic order on these ids is chronological order.
fn make_document_id(at: SystemTime) -> String {
    format!(
        "{:013}-{}",
        system_time_to_millis(at),
        uuid::Uuid::new_v4().simple()
    )
}

fn expense_to_item(user: &UserId, expense: &Expense) -> HashMap<String, AttributeValue> {
    let mut m = HashMap::new();
    m.insert(
        "user_id".into(),
        AttributeValue::S(user.as_str().to_string()),
    );
    m.insert(
        "expense_id".into(),
        AttributeValue::S(expense.id.to_string()),
    );
    m.insert("amount".into(), AttributeValue::N(expense.amount.to_string()));
    m.insert(
        "description".into(),
        AttributeValue::S(expense.description.clone()),
    );
    m.insert(
        "date".into(),
        AttributeValue::N(system_time_to_millis(expense.date).to_string()),
    );
    m
}

fn item_to_expense(item: &HashMap<String, AttributeValue>) -> Result<Expense, StoreError> {
    let expense_id = item
        .get("expense_id")
        .and_then(|v| v.as_s().ok())
        .ok_or_else(|| StoreError::Backend("item missing expense_id".into()))?;
    let amount = item
        .get("amount")
        .and_then(|v| v.as_n().ok())
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| StoreError::Backend("item missing amount".into()))?;
    let date = item
        .get("date")
        .and_then(|v| v.as_n().ok())
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| StoreError::Backend("item missing date".into()))?;
    // Backward-compatible default for items written without a description
    let description = item
        .get("description")
        .and_then(|v| v.as_s().ok())
        .map(|s| s.to_string())
        .unwrap_or_default();

    Ok(Expense {
        id: ExpenseId::Document(expense_id.to_string()),
        amount,
        description,
        date: millis_to_system_time(date),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(name: &str) -> UserId {
        UserId::new(name).unwrap()
    }

    fn sample_expense(millis: u64) -> Expense {
        Expense {
            id: ExpenseId::Document(make_document_id(millis_to_system_time(millis))),
            amount: 42.5,
            description: "lunch".into(),
            date: millis_to_system_time(millis),
        }
    }

    #[test]
    fn roundtrip_item_mapping() {
        let e = sample_expense(1_700_000_000_123);
        let item = expense_to_item(&user("alice"), &e);
        assert_eq!(
            item.get("user_id").unwrap().as_s().unwrap(),
            "alice"
        );
        let e2 = item_to_expense(&item).unwrap();
        assert_eq!(e.id, e2.id);
        assert_eq!(e.amount, e2.amount);
        assert_eq!(e.description, e2.description);
        assert_eq!(e.date, e2.date);
    }

    #[test]
    fn item_without_description_defaults_empty() {
        let mut item = HashMap::new();
        item.insert("user_id".into(), AttributeValue::S("u".into()));
        item.insert(
            "expense_id".into(),
            AttributeValue::S("0001700000000000-abc".into()),
        );
        item.insert("amount".into(), AttributeValue::N("9.99".into()));
        item.insert("date".into(), AttributeValue::N("1700000000000".into()));

        let e = item_to_expense(&item).unwrap();
        assert_eq!(e.description, "");
        assert_eq!(e.amount, 9.99);
    }

    #[test]
    fn item_missing_amount_is_rejected() {
        let mut item = HashMap::new();
        item.insert("user_id".into(), AttributeValue::S("u".into()));
        item.insert("expense_id".into(), AttributeValue::S("x".into()));
        item.insert("date".into(), AttributeValue::N("1700000000000".into()));
        assert!(matches!(
            item_to_expense(&item),
            Err(StoreError::Backend(_))
        ));
    }

    struct FakeSdkErr(aws_smithy_types::error::ErrorMetadata);

    impl FakeSdkErr {
        fn with_code(code: &str) -> Self {
            Self(
                aws_smithy_types::error::ErrorMetadata::builder()
                    .code(code)
                    .build(),
            )
        }
    }

    impl ProvideErrorMetadata for FakeSdkErr {
        fn meta(&self) -> &aws_smithy_types::error::ErrorMetadata {
            &self.0
        }
    }

    impl std::fmt::Display for FakeSdkErr {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.0.code().unwrap_or("unknown"))
        }
    }

    #[test]
    fn sdk_errors_map_to_store_errors() {
        let missing = map_sdk_err(FakeSdkErr::with_code("ResourceNotFoundException"));
        assert!(matches!(missing, StoreError::Unavailable(_)));

        let other = map_sdk_err(FakeSdkErr::with_code("ProvisionedThroughputExceededException"));
        assert!(matches!(other, StoreError::Backend(_)));
    }

    #[test]
    fn document_ids_sort_chronologically() {
        let a = make_document_id(millis_to_system_time(1_000));
        let b = make_document_id(millis_to_system_time(2_000));
        assert!(a < b);
        // Ids from the same millisecond stay within any range ending at it:
        // the '~' upper bound sorts after the '-' separator.
        let c = make_document_id(millis_to_system_time(2_000));
        let hi = format!("{:013}~", 2_000);
        assert!(b < hi && c < hi);
        let lo = format!("{:013}", 1_000);
        assert!(a >= lo);
    }
}
