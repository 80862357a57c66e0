use crate::models::ApiError;
use axum::{
    Json,
    body::Body,
    extract::State,
    http::{self, Request, StatusCode, header::HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{collections::HashMap, convert::Infallible, env, sync::Arc, time::Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AuthState {
    records: Arc<HashMap<String, OperatorRecord>>,
    limiter: Arc<FixedWindow>,
}

/// Identity attached to a request once its API key checked out.
#[derive(Clone, Debug)]
pub struct AuthContext {
    pub operator: String,
    pub api_key_id: String,
}

#[derive(Clone)]
struct OperatorRecord {
    operator: String,
    api_key_id: String,
}

impl AuthState {
    pub fn from_env() -> Self {
        let records = Arc::new(load_keys_from_env());
        let limiter = Arc::new(FixedWindow::from_env());
        Self { records, limiter }
    }

    fn authenticate(&self, presented: &str) -> Option<AuthContext> {
        self.records.get(presented).map(|record| AuthContext {
            operator: record.operator.clone(),
            api_key_id: record.api_key_id.clone(),
        })
    }
}

pub async fn require_api_auth(
    State(state): State<AuthState>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, Infallible> {
    let Some(presented) = extract_api_key(request.headers()) else {
        let response =
            unauthorized_response("missing_api_key", "Provide X-Ops-Key or Bearer token");
        return Ok(response);
    };

    let Some(context) = state.authenticate(&presented) else {
        let response = unauthorized_response("invalid_api_key", "Key not recognized");
        return Ok(response);
    };

    match state.limiter.consume(&context.operator).await {
        Ok(remaining) => {
            request.extensions_mut().insert(context.clone());
            let mut response = next.run(request).await;
            response.headers_mut().insert(
                "X-RateLimit-Remaining",
                HeaderValue::from_str(&remaining.to_string())
                    .unwrap_or_else(|_| HeaderValue::from_static("0")),
            );
            Ok(response)
        }
        Err(retry_after) => {
            let mut response = too_many_requests("rate_limited", "Too many requests");
            response.headers_mut().insert(
                http::header::RETRY_AFTER,
                HeaderValue::from_str(&retry_after.to_string())
                    .unwrap_or_else(|_| HeaderValue::from_static("1")),
            );
            Ok(response)
        }
    }
}

fn extract_api_key(headers: &http::HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(http::header::AUTHORIZATION)
        && let Ok(raw) = value.to_str()
        && raw.len() >= 7
        && raw[..6].eq_ignore_ascii_case("bearer")
    {
        return Some(raw[6..].trim().to_string());
    }
    headers
        .get("X-Ops-Key")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn unauthorized_response(code: &str, message: &str) -> Response {
    let payload = ApiError {
        error: code.to_string(),
        detail: Some(message.to_string()),
    };
    (StatusCode::UNAUTHORIZED, Json(payload)).into_response()
}

fn too_many_requests(code: &str, message: &str) -> Response {
    let payload = ApiError {
        error: code.to_string(),
        detail: Some(message.to_string()),
    };
    (StatusCode::TOO_MANY_REQUESTS, Json(payload)).into_response()
}

/// `OPS_API_KEYS` is a comma list of `operator:key` pairs.
fn load_keys_from_env() -> HashMap<String, OperatorRecord> {
    let raw = env::var("OPS_API_KEYS").unwrap_or_else(|_| "ops:dev-ops-key".to_string());
    let mut entries = HashMap::new();
    for (idx, token) in raw.split(',').enumerate() {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            continue;
        }
        let mut parts = trimmed.splitn(2, ':');
        let operator = parts.next().map(str::trim).filter(|s| !s.is_empty());
        let key = parts.next().map(str::trim).filter(|s| !s.is_empty());
        match (operator, key) {
            (Some(operator), Some(secret)) => {
                let record = OperatorRecord {
                    operator: operator.to_string(),
                    api_key_id: format!("key-{:02}", idx + 1),
                };
                entries.insert(secret.to_string(), record);
            }
            _ => warn!(
                target = "charityshop.api",
                "ignored malformed OPS_API_KEYS entry: {trimmed}"
            ),
        }
    }

    if entries.is_empty() {
        warn!(
            target = "charityshop.api",
            "OPS_API_KEYS produced no keys; falling back to dev credentials"
        );
        entries.insert(
            "dev-ops-key".to_string(),
            OperatorRecord {
                operator: "ops".to_string(),
                api_key_id: "key-01".to_string(),
            },
        );
    } else {
        info!(
            target = "charityshop.api",
            key_count = entries.len(),
            "loaded API keys from env"
        );
    }

    entries
}

/// Fixed-window request limiter, one window per operator.
struct FixedWindow {
    window_secs: u64,
    max_requests: u64,
    windows: Mutex<HashMap<String, WindowState>>,
}

struct WindowState {
    started: Instant,
    count: u64,
}

impl FixedWindow {
    fn from_env() -> Self {
        let window_secs = env::var("RATE_LIMIT_WINDOW_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(60);
        let max_requests = env::var("RATE_LIMIT_MAX_REQUESTS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(120);
        Self {
            window_secs,
            max_requests,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Ok(remaining) or Err(retry-after seconds).
    async fn consume(&self, key: &str) -> Result<u64, u64> {
        let mut guard = self.windows.lock().await;
        let now = Instant::now();
        let state = guard.entry(key.to_string()).or_insert(WindowState {
            started: now,
            count: 0,
        });

        if now.duration_since(state.started).as_secs() >= self.window_secs {
            state.started = now;
            state.count = 0;
        }

        if state.count < self.max_requests {
            state.count += 1;
            Ok(self.max_requests - state.count)
        } else {
            let elapsed = now.duration_since(state.started).as_secs();
            Err(self.window_secs.saturating_sub(elapsed).max(1))
        }
    }
}
