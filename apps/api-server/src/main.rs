//! api-server — HTTP API for the expense tracker workspace.
//!
//! Exposes expense CRUD and summary endpoints with:
//! - Auth: Google ID token verification or disabled (debug) mode via X-Debug-User.
//! - Storage: In-memory, SQLite (file) when the `sqlite` feature is enabled, or
//!   DynamoDB when the `dynamo` feature is enabled.
//! - CORS: Configurable via CORS_ALLOW_ORIGIN (origin string) for the frontend.
//!
//! Run:
//! ```bash
//! # pretty logs (default); PORT optional
//! cargo run -p api-server
//!
//! # with Dynamo adapter enabled (requires AWS credentials in env)
//! STORAGE_PROVIDER=dynamo DYNAMO_TABLE_EXPENSES=Expenses \
//!   cargo run -p api-server --features dynamo
//! ```
//!
//! Configuration: See `config.rs` for all environment variables.
//!

mod config;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;

use axum::http::HeaderValue;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use domain::adapters::memory_repo::InMemoryStore;
use domain::money::format_usd;
use domain::service::DEFAULT_RECENT_LIMIT;
use domain::{Expense, ExpenseId, ExpenseInput, ExpenseRepository, StoreError, UserId};
use google_auth::GoogleUser;
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// Local repo abstraction supporting memory, sqlite, or dynamo (feature-gated).
enum RepoKind {
    Memory(InMemoryStore),
    #[cfg(feature = "sqlite")]
    Sqlite(sqlite_store::SqliteStore),
    #[cfg(feature = "dynamo")]
    Dynamo(dynamo_store::DynamoStore),
}

/// Date-range listing is a capability of the user-scoped backends only.
enum RangeError {
    Unsupported,
    Store(StoreError),
}

#[derive(Clone)]
struct AnyRepo {
    kind: Arc<RepoKind>,
}

#[allow(dead_code)]
impl AnyRepo {
    fn memory() -> Self {
        Self {
            kind: Arc::new(RepoKind::Memory(InMemoryStore::new())),
        }
    }

    #[cfg(feature = "sqlite")]
    fn sqlite_from_env() -> Self {
        Self {
            kind: Arc::new(RepoKind::Sqlite(sqlite_store::SqliteStore::from_env())),
        }
    }

    #[cfg(feature = "dynamo")]
    fn dynamo_from_env() -> Result<Self, StoreError> {
        Ok(Self {
            kind: Arc::new(RepoKind::Dynamo(dynamo_store::DynamoStore::from_env()?)),
        })
    }

    fn create(&self, user: Option<&UserId>, input: ExpenseInput) -> Result<ExpenseId, StoreError> {
        match &*self.kind {
            RepoKind::Memory(r) => r.create(user, input),
            #[cfg(feature = "sqlite")]
            RepoKind::Sqlite(r) => r.create(user, input),
            #[cfg(feature = "dynamo")]
            RepoKind::Dynamo(r) => r.create(user, input),
        }
    }

    fn list(&self, user: Option<&UserId>) -> Result<Vec<Expense>, StoreError> {
        match &*self.kind {
            RepoKind::Memory(r) => r.list(user),
            #[cfg(feature = "sqlite")]
            RepoKind::Sqlite(r) => r.list(user),
            #[cfg(feature = "dynamo")]
            RepoKind::Dynamo(r) => r.list(user),
        }
    }

    fn delete(&self, user: Option<&UserId>, id: &ExpenseId) -> Result<(), StoreError> {
        match &*self.kind {
            RepoKind::Memory(r) => r.delete(user, id),
            #[cfg(feature = "sqlite")]
            RepoKind::Sqlite(r) => r.delete(user, id),
            #[cfg(feature = "dynamo")]
            RepoKind::Dynamo(r) => r.delete(user, id),
        }
    }

    fn sum(&self, user: Option<&UserId>) -> Result<f64, StoreError> {
        match &*self.kind {
            RepoKind::Memory(r) => r.sum(user),
            #[cfg(feature = "sqlite")]
            RepoKind::Sqlite(r) => r.sum(user),
            #[cfg(feature = "dynamo")]
            RepoKind::Dynamo(r) => r.sum(user),
        }
    }

    fn list_by_date_range(
        &self,
        user: Option<&UserId>,
        start: SystemTime,
        end: SystemTime,
    ) -> Result<Vec<Expense>, RangeError> {
        match &*self.kind {
            RepoKind::Memory(r) => r
                .list_by_date_range(user, start, end)
                .map_err(RangeError::Store),
            // The local single-user ledger does not expose range queries.
            #[cfg(feature = "sqlite")]
            RepoKind::Sqlite(_) => Err(RangeError::Unsupported),
            #[cfg(feature = "dynamo")]
            RepoKind::Dynamo(r) => r
                .list_by_date_range(user, start, end)
                .map_err(RangeError::Store),
        }
    }
}

#[derive(Clone)]
struct AppState {
    repo: AnyRepo,
    auth_provider: config::AuthProvider,
    google_oauth_client_id: Option<String>,
}

#[tokio::main]
async fn main() {
    // Load and validate config first (fail fast on misconfiguration)
    let cfg = match config::Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    init_tracing(&cfg);
    cfg.warn_if_insecure();

    let repo = build_repo_from_env(&cfg);
    let state = AppState {
        repo,
        auth_provider: cfg.auth_provider.clone(),
        google_oauth_client_id: cfg.google_oauth_client_id.clone(),
    };

    // Request ID header name
    let x_request_id = axum::http::HeaderName::from_static("x-request-id");

    let mut app = Router::new()
        .route(
            "/api/expenses",
            get(list_expenses)
                .post(create_expense)
                .options(preflight),
        )
        .route("/api/expenses/recent", get(recent_expenses).options(preflight))
        .route("/api/expenses/range", get(range_expenses).options(preflight))
        .route("/api/expenses/total", get(total_expenses).options(preflight))
        .route(
            "/api/expenses/:id",
            axum::routing::delete(delete_expense).options(preflight),
        )
        .route("/api/me", get(get_me).options(preflight))
        .layer(PropagateRequestIdLayer::new(x_request_id.clone()))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("-");
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = %request_id,
                )
            }),
        )
        .layer(SetRequestIdLayer::new(x_request_id, MakeRequestUuid))
        .with_state(state);

    // CORS - already validated in Config::from_env()
    let cors = if cfg.cors_allow_origin == HeaderValue::from_static("*") {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::list([cfg.cors_allow_origin]))
            .allow_methods([
                axum::http::Method::GET,
                axum::http::Method::POST,
                axum::http::Method::DELETE,
                axum::http::Method::OPTIONS,
            ])
            .allow_headers([
                axum::http::header::AUTHORIZATION,
                axum::http::header::CONTENT_TYPE,
                axum::http::HeaderName::from_static("x-debug-user"),
            ])
    };
    app = app.layer(cors);

    let addr: SocketAddr = ([0, 0, 0, 0], cfg.port).into();
    info!(%addr, "api-server listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("bind port");
    axum::serve(listener, app).await.expect("server error");
}

fn init_tracing(cfg: &config::Config) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);
    match cfg.log_format {
        config::LogFormat::Json => {
            registry
                .with(
                    fmt::layer()
                        .json()
                        .with_target(true)
                        .with_timer(fmt::time::SystemTime)
                        .with_writer(std::io::stdout),
                )
                .init();
        }
        config::LogFormat::Pretty => {
            registry
                .with(
                    fmt::layer()
                        .pretty()
                        .with_target(true)
                        .with_writer(std::io::stdout),
                )
                .init();
        }
    }
}

// Construct a repository instance based on config and feature flags.
fn build_repo_from_env(cfg: &config::Config) -> AnyRepo {
    match cfg.storage_provider {
        #[cfg(feature = "sqlite")]
        config::StorageProvider::Sqlite => AnyRepo::sqlite_from_env(),
        #[cfg(feature = "dynamo")]
        config::StorageProvider::Dynamo => match AnyRepo::dynamo_from_env() {
            Ok(r) => r,
            Err(e) => {
                eprintln!("failed to init DynamoStore from env: {e}");
                AnyRepo::memory()
            }
        },
        _ => AnyRepo::memory(),
    }
}

#[derive(Deserialize)]
struct CreateExpenseReq {
    amount: f64,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Serialize)]
struct ExpenseOut {
    id: String,
    amount: f64,
    amount_display: String,
    description: String,
    date: String,
}

#[derive(Serialize)]
struct ListOut {
    expenses: Vec<ExpenseOut>,
    count: usize,
}

#[derive(Serialize)]
struct TotalOut {
    total: f64,
    total_display: String,
}

#[derive(Serialize)]
struct UserInfo {
    uid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    picture: Option<String>,
}

fn expense_to_out(e: Expense) -> ExpenseOut {
    ExpenseOut {
        id: e.id.to_string(),
        amount: e.amount,
        amount_display: format_usd(e.amount),
        description: e.description,
        date: http_common::system_time_to_rfc3339(e.date),
    }
}

enum AuthHttp {
    Unauthorized,
}

async fn verify_request_user(
    headers: &HeaderMap,
    auth_provider: &config::AuthProvider,
    google_oauth_client_id: &Option<String>,
) -> Result<GoogleUser, AuthHttp> {
    if *auth_provider == config::AuthProvider::None {
        let uid = headers
            .get("X-Debug-User")
            .and_then(|v| v.to_str().ok())
            .ok_or(AuthHttp::Unauthorized)?;
        return Ok(GoogleUser {
            uid: uid.to_string(),
            email: None,
            name: None,
            picture: None,
        });
    }

    // Google mode
    let auth = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthHttp::Unauthorized)?;
    let token = auth.strip_prefix("Bearer ").ok_or(AuthHttp::Unauthorized)?;
    // Validated at startup when auth_provider=Google, so this is always present
    let aud = google_oauth_client_id
        .as_ref()
        .ok_or(AuthHttp::Unauthorized)?;
    match google_auth::verify_async(token, aud).await {
        Ok(u) => Ok(u),
        Err(e) => {
            warn!(err=?e, "auth failed");
            Err(AuthHttp::Unauthorized)
        }
    }
}

fn unauthorized_response() -> axum::response::Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(http_common::json_error_with_message(
            "unauthorized",
            "missing or invalid token",
        )),
    )
        .into_response()
}

/// Resolve the authenticated caller into a storage scope key.
async fn require_user(state: &AppState, headers: &HeaderMap) -> Result<UserId, axum::response::Response> {
    let verified = verify_request_user(headers, &state.auth_provider, &state.google_oauth_client_id)
        .await
        .map_err(|AuthHttp::Unauthorized| unauthorized_response())?;
    UserId::new(verified.uid).map_err(|_| unauthorized_response())
}

fn store_error_response(op: &str, e: StoreError) -> axum::response::Response {
    match e {
        StoreError::NotAuthenticated | StoreError::InvalidUserId => {
            warn!(op, "rejected: not authenticated");
            unauthorized_response()
        }
        StoreError::InvalidAmount(msg) => (
            StatusCode::BAD_REQUEST,
            Json(http_common::json_error_with_message("invalid_amount", &msg)),
        )
            .into_response(),
        StoreError::Unavailable(msg) => {
            error!(op, err = %msg, "storage unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(http_common::json_err("storage_unavailable")),
            )
                .into_response()
        }
        StoreError::Backend(msg) => {
            error!(op, err = %msg, "backend error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(http_common::json_err("internal")),
            )
                .into_response()
        }
    }
}

async fn preflight() -> impl IntoResponse {
    StatusCode::NO_CONTENT
}

async fn create_expense(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateExpenseReq>,
) -> impl IntoResponse {
    let user = match require_user(&state, &headers).await {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    if let Err(e) = domain::validate::validate_amount(body.amount) {
        return store_error_response("create", e);
    }
    let description = domain::validate::normalize_description(
        body.description.as_deref().unwrap_or_default(),
    );

    let input = ExpenseInput {
        amount: body.amount,
        description,
    };
    match state.repo.create(Some(&user), input) {
        Ok(id) => {
            info!(expense_id = %id, "create ok");
            // Echo the expense back; local disabled mode still answers with id 0
            (
                StatusCode::CREATED,
                Json(serde_json::json!({
                    "id": id.to_string(),
                    "amount": body.amount,
                    "amount_display": format_usd(body.amount),
                })),
            )
                .into_response()
        }
        Err(e) => store_error_response("create", e),
    }
}

async fn list_expenses(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let user = match require_user(&state, &headers).await {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    match state.repo.list(Some(&user)) {
        Ok(items) => {
            let expenses: Vec<ExpenseOut> = items.into_iter().map(expense_to_out).collect();
            let count = expenses.len();
            (StatusCode::OK, Json(ListOut { expenses, count })).into_response()
        }
        Err(e) => store_error_response("list", e),
    }
}

#[derive(Deserialize)]
struct RecentQuery {
    limit: Option<usize>,
}

async fn recent_expenses(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<RecentQuery>,
) -> impl IntoResponse {
    let user = match require_user(&state, &headers).await {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    let limit = q.limit.unwrap_or(DEFAULT_RECENT_LIMIT);
    match state.repo.list(Some(&user)) {
        Ok(mut items) => {
            items.truncate(limit);
            let expenses: Vec<ExpenseOut> = items.into_iter().map(expense_to_out).collect();
            let count = expenses.len();
            (StatusCode::OK, Json(ListOut { expenses, count })).into_response()
        }
        Err(e) => store_error_response("recent", e),
    }
}

#[derive(Deserialize)]
struct RangeQuery {
    start: String,
    end: String,
}

async fn range_expenses(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<RangeQuery>,
) -> impl IntoResponse {
    let user = match require_user(&state, &headers).await {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    let (start, end) = match (
        http_common::parse_rfc3339(&q.start),
        http_common::parse_rfc3339(&q.end),
    ) {
        (Ok(s), Ok(e)) => (s, e),
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(http_common::json_error_with_message(
                    "bad_request",
                    "start and end must be RFC3339 timestamps",
                )),
            )
                .into_response()
        }
    };

    match state.repo.list_by_date_range(Some(&user), start, end) {
        Ok(items) => {
            let expenses: Vec<ExpenseOut> = items.into_iter().map(expense_to_out).collect();
            let count = expenses.len();
            (StatusCode::OK, Json(ListOut { expenses, count })).into_response()
        }
        Err(RangeError::Unsupported) => (
            StatusCode::NOT_IMPLEMENTED,
            Json(http_common::json_err("not_supported")),
        )
            .into_response(),
        Err(RangeError::Store(e)) => store_error_response("range", e),
    }
}

async fn total_expenses(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let user = match require_user(&state, &headers).await {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    match state.repo.sum(Some(&user)) {
        Ok(total) => (
            StatusCode::OK,
            Json(TotalOut {
                total,
                total_display: format_usd(total),
            }),
        )
            .into_response(),
        Err(e) => store_error_response("total", e),
    }
}

async fn delete_expense(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id_str): Path<String>,
) -> impl IntoResponse {
    let user = match require_user(&state, &headers).await {
        Ok(u) => u,
        Err(resp) => return resp,
    };

    let id = match ExpenseId::parse(&id_str) {
        Ok(id) => id,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(http_common::json_error_with_message(
                    "bad_request",
                    "invalid expense id",
                )),
            )
                .into_response()
        }
    };

    // Deleting an id that no longer exists still succeeds
    match state.repo.delete(Some(&user), &id) {
        Ok(()) => {
            info!(expense_id = %id, "delete ok");
            (StatusCode::NO_CONTENT, ()).into_response()
        }
        Err(e) => store_error_response("delete", e),
    }
}

async fn get_me(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let verified = match verify_request_user(
        &headers,
        &state.auth_provider,
        &state.google_oauth_client_id,
    )
    .await
    {
        Ok(v) => v,
        Err(AuthHttp::Unauthorized) => return unauthorized_response(),
    };

    (
        StatusCode::OK,
        Json(UserInfo {
            uid: verified.uid,
            email: verified.email,
            name: verified.name,
            picture: verified.picture,
        }),
    )
        .into_response()
}
