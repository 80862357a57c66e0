mod ebay;
mod filter;
mod http;
mod idempotency;
mod jobs;
mod metrics;
mod models;
mod normalize;
mod pipeline;
mod reaper;
mod security;
mod store;

use axum::{
    Json, Router,
    extract::{Extension, Path, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use ebay::{BrowseClient, Marketplace};
use jobs::{JobQueue, JobRequest};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::ApiError;
use pipeline::IngestionPipeline;
use reaper::{DEFAULT_STALE_DAYS, StaleItemReaper};
use security::{AuthContext, AuthState, require_api_auth};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};
use store::Store;
use tokio::sync::Mutex;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    if let Err(err) = run().await {
        error!(target = "charityshop.api", "server crashed: {err}");
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_tracing();

    let auth_state = AuthState::from_env();

    let store = Store::connect(&database_url_from_env()).await?;
    store.migrate().await?;

    let market: Arc<dyn Marketplace> = Arc::new(BrowseClient::new());
    let ingestion = IngestionPipeline::new(store.clone(), market.clone());
    let reaper = StaleItemReaper::new(store.clone(), market);
    let (queue, _worker) = JobQueue::spawn(ingestion, reaper);
    spawn_reaper_schedule(queue.clone());

    let openapi_raw = include_str!("../docs/openapi.yaml");
    let openapi: serde_json::Value =
        serde_yaml::from_str(openapi_raw).unwrap_or(serde_json::json!({"openapi":"3.0.3"}));
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("prom recorder");
    let redis = std::env::var("REDIS_URL")
        .ok()
        .and_then(|u| redis::Client::open(u).ok());

    let state = AppState {
        store,
        queue,
        openapi: Arc::new(openapi),
        idempotency: Arc::new(Mutex::new(HashMap::new())),
        prometheus_handle,
        redis,
    };

    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);

    let protected = Router::new()
        .route("/charities/{id}/ingest", post(enqueue_ingest))
        .route("/sweeps", post(enqueue_sweep))
        .route("/jobs/{id}", get(get_job_status))
        .route_layer(middleware::from_fn_with_state(auth_state, require_api_auth));

    let app = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/openapi.json", get(openapi_json))
        .route("/docs", get(swagger_ui))
        .merge(protected)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(axum::extract::DefaultBodyLimit::max(body_limit_from_env()));

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8000);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target = "charityshop.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    store: Store,
    queue: JobQueue,
    openapi: Arc<serde_json::Value>,
    idempotency: Arc<Mutex<HashMap<String, EnqueueResponse>>>,
    prometheus_handle: PrometheusHandle,
    redis: Option<redis::Client>,
}

/// Health and readiness check.
///
/// - Method: `GET`
/// - Path: `/health`
/// - Auth: none
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "charityshop-api-rs",
    }))
}

async fn openapi_json(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json((*state.openapi).clone())
}

async fn swagger_ui() -> axum::http::Response<String> {
    let html = r#"<!doctype html>
<html>
<head>
  <meta charset='utf-8'/>
  <title>Charity Shop API Docs</title>
  <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@5/swagger-ui.css" />
</head>
<body>
  <div id="swagger-ui"></div>
  <script src="https://unpkg.com/swagger-ui-dist@5/swagger-ui-bundle.js"></script>
  <script>
    window.onload = () => {
      window.ui = SwaggerUIBundle({ url: '/openapi.json', dom_id: '#swagger-ui' });
    };
  </script>
</body>
</html>"#;
    axum::http::Response::builder()
        .header("Content-Type", "text/html; charset=utf-8")
        .body(html.to_string())
        .unwrap()
}

async fn metrics_endpoint(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
) -> axum::http::Response<String> {
    if let Ok(secret) = std::env::var("METRICS_KEY") {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return axum::http::Response::builder()
                .status(axum::http::StatusCode::UNAUTHORIZED)
                .body("unauthorized".into())
                .unwrap();
        }
    }
    let body = state.prometheus_handle.render();
    axum::http::Response::builder()
        .header("Content-Type", "text/plain; version=0.0.4")
        .body(body)
        .unwrap()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EnqueueResponse {
    job_id: String,
}

/// Enqueue an ingestion run for one charity.
///
/// - Method: `POST`
/// - Path: `/charities/{id}/ingest`
/// - Auth: `Authorization: Bearer <key>` or `X-Ops-Key: <key>`
/// - Honors `Idempotency-Key`: a retried trigger returns the original job.
async fn enqueue_ingest(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Path(charity_id): Path<i64>,
    headers: axum::http::HeaderMap,
) -> Result<Json<EnqueueResponse>, AppError> {
    crate::metrics::inc_requests("/charities/ingest");
    info!(
        target = "charityshop.api",
        operator = %context.operator,
        api_key = %context.api_key_id,
        charity_id,
        "ingestion trigger received",
    );

    if !state
        .store
        .charity_exists(charity_id)
        .await
        .map_err(|err| AppError::Internal(err.to_string()))?
    {
        return Err(AppError::NotFound("charity"));
    }

    let idempotency_key = headers
        .get("Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    if let Some(key) = idempotency_key {
        let cache_key = format!("ingest:{charity_id}:{key}");
        if let Some(client) = &state.redis {
            if let Some(existing) = idempotency::redis_get(client, &cache_key).await {
                return Ok(Json(existing));
            }
            let response = enqueue(&state.queue, JobRequest::Ingest { charity_id }).await?;
            let ttl = idempotency_ttl_from_env();
            idempotency::redis_set(client, &cache_key, &response, ttl).await;
            return Ok(Json(response));
        }
        if let Some(existing) = state.idempotency.lock().await.get(&cache_key).cloned() {
            return Ok(Json(existing));
        }
        let response = enqueue(&state.queue, JobRequest::Ingest { charity_id }).await?;
        state
            .idempotency
            .lock()
            .await
            .insert(cache_key, response.clone());
        return Ok(Json(response));
    }

    let response = enqueue(&state.queue, JobRequest::Ingest { charity_id }).await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct SweepRequest {
    #[serde(default = "default_stale_days")]
    stale_days: i64,
}

fn default_stale_days() -> i64 {
    DEFAULT_STALE_DAYS
}

/// Enqueue a stale-item sweep.
///
/// - Method: `POST`
/// - Path: `/sweeps`
/// - Body: optional `{"stale_days": n}`
async fn enqueue_sweep(
    State(state): State<AppState>,
    payload: Option<Json<SweepRequest>>,
) -> Result<Json<EnqueueResponse>, AppError> {
    crate::metrics::inc_requests("/sweeps");
    let stale_days = payload
        .map(|Json(request)| request.stale_days)
        .unwrap_or(DEFAULT_STALE_DAYS);
    if stale_days < 0 {
        return Err(AppError::Invalid("stale_days must not be negative"));
    }
    let response = enqueue(&state.queue, JobRequest::Sweep { stale_days }).await?;
    Ok(Json(response))
}

async fn get_job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<jobs::JobInfo>, AppError> {
    let Ok(uuid) = uuid::Uuid::parse_str(&id) else {
        return Err(AppError::Invalid("invalid job id"));
    };
    if let Some(info) = state.queue.get(uuid).await {
        Ok(Json(info))
    } else {
        Err(AppError::NotFound("job"))
    }
}

async fn enqueue(queue: &JobQueue, request: JobRequest) -> Result<EnqueueResponse, AppError> {
    let id = queue
        .enqueue(request)
        .await
        .map_err(|err| AppError::Internal(err.error))?;
    Ok(EnqueueResponse {
        job_id: id.to_string(),
    })
}

#[derive(Debug)]
enum AppError {
    NotFound(&'static str),
    Invalid(&'static str),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, detail) = match self {
            AppError::NotFound(what) => (StatusCode::NOT_FOUND, "not_found", what.to_string()),
            AppError::Invalid(detail) => {
                (StatusCode::BAD_REQUEST, "invalid_input", detail.to_string())
            }
            AppError::Internal(detail) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal", detail)
            }
        };
        let payload = ApiError {
            error: error.to_string(),
            detail: Some(detail),
        };
        (status, Json(payload)).into_response()
    }
}

/// Periodic sweep driven by `REAPER_INTERVAL_HOURS`; unset disables it.
fn spawn_reaper_schedule(queue: JobQueue) {
    let Some(hours) = std::env::var("REAPER_INTERVAL_HOURS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
    else {
        return;
    };
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(hours * 3600));
        // The first tick fires immediately; skip it so startup stays quiet.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(err) = queue
                .enqueue(JobRequest::Sweep {
                    stale_days: DEFAULT_STALE_DAYS,
                })
                .await
            {
                warn!(
                    target = "charityshop.reaper",
                    error = %err.error,
                    "failed to enqueue scheduled sweep"
                );
            }
        }
    });
}

fn database_url_from_env() -> String {
    std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://charityshop.db".to_string())
}

fn body_limit_from_env() -> usize {
    std::env::var("REQUEST_MAX_BYTES")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(256 * 1024)
}

fn idempotency_ttl_from_env() -> usize {
    std::env::var("IDEMPOTENCY_TTL_SECS")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(3600)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}
