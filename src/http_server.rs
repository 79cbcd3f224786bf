//! Read-only JSON API over the ledger, plus the Prometheus scrape endpoint.

use {
    crate::{
        config::HttpConfig,
        ledger::{Ledger, error::LedgerError},
        metrics::handler::render,
        models::{AuditReport, Points, Statistics, Transaction, UserId},
    },
    axum::{
        Json, Router,
        extract::{Path, Query, State},
        http::StatusCode,
        response::{IntoResponse, Response},
        routing::get,
    },
    serde::{Deserialize, Serialize},
    std::sync::Arc,
    tracing::{error, info},
};

const DEFAULT_HISTORY_LIMIT: usize = 20;

#[derive(Clone)]
struct AppState {
    ledger: Arc<Ledger>,
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    #[serde(default = "default_history_limit")]
    limit: usize,
    #[serde(default)]
    offset: usize,
}

fn default_history_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}

#[derive(Debug, Serialize, PartialEq)]
struct BalanceResponse {
    user_id: UserId,
    balance: Points,
}

#[derive(Debug)]
enum ApiError {
    Ledger(LedgerError),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Ledger(e @ LedgerError::Storage(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, e.to_string())
            }
            ApiError::Ledger(e) => (StatusCode::BAD_REQUEST, e.to_string()),
            ApiError::Internal(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

async fn with_ledger<T, F>(state: AppState, operation: F) -> Result<T, ApiError>
where
    F: FnOnce(&Ledger) -> Result<T, LedgerError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(move || operation(&state.ledger))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(ApiError::Ledger)
}

async fn get_balance(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let balance = with_ledger(state, move |ledger| ledger.get_balance(user_id)).await?;
    Ok(Json(BalanceResponse { user_id, balance }))
}

async fn get_history(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<Vec<Transaction>>, ApiError> {
    let history = with_ledger(state, move |ledger| {
        ledger.history(user_id, params.limit, params.offset)
    })
    .await?;
    Ok(Json(history))
}

async fn get_audit(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> Result<Json<AuditReport>, ApiError> {
    let report = with_ledger(state, move |ledger| ledger.audit(user_id)).await?;
    Ok(Json(report))
}

async fn get_statistics(State(state): State<AppState>) -> Result<Json<Statistics>, ApiError> {
    let stats = with_ledger(state, |ledger| ledger.statistics()).await?;
    Ok(Json(stats))
}

async fn get_metrics() -> Result<String, ApiError> {
    render().map_err(|e| ApiError::Internal(e.to_string()))
}

pub fn router(ledger: Arc<Ledger>) -> Router {
    Router::new()
        .route("/users/{user_id}/balance", get(get_balance))
        .route("/users/{user_id}/history", get(get_history))
        .route("/users/{user_id}/audit", get(get_audit))
        .route("/statistics", get(get_statistics))
        .route("/metrics", get(get_metrics))
        .with_state(AppState { ledger })
}

pub async fn start_http_service(
    config: HttpConfig,
    ledger: Arc<Ledger>,
    mut shutdown_receiver: tokio::sync::broadcast::Receiver<()>,
) {
    let address = format!("{}:{}", config.address, config.port);

    let listener = match tokio::net::TcpListener::bind(&address).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind HTTP server to {}: {}", address, e);
            return;
        }
    };

    let shutdown = async move {
        shutdown_receiver.recv().await.ok();
        info!("HTTP server is shutting down...");
    };

    info!("Initializing HTTP server at {}", address);

    if let Err(e) = axum::serve(listener, router(ledger))
        .with_graceful_shutdown(shutdown)
        .await
    {
        error!("Error in HTTP server: {}", e);
    }
}
