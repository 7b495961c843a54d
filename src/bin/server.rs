use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use anyhow::{Context, Result};
use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use xgnarly_rs::token::DEFAULT_VERSION;
use xgnarly_rs::{Token, TokenError, TokenRequest, build_token};

/// Server configuration
#[derive(Debug, Clone)]
struct ServerConfig {
    port: u16,
    /// Version used when a request does not name one.
    default_version: String,
    /// Environment code used when a request does not name one.
    default_env_code: u32,
}

impl ServerConfig {
    fn from_env() -> Self {
        Self {
            port: env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
            default_version: env::var("TOKEN_VERSION")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_VERSION.to_string()),
            default_env_code: env::var("TOKEN_ENV_CODE")
                .ok()
                .and_then(|c| c.parse().ok())
                .unwrap_or(0),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            default_version: DEFAULT_VERSION.to_string(),
            default_env_code: 0,
        }
    }
}

/// Application state shared across all requests
#[derive(Clone)]
struct AppState {
    config: Arc<ServerConfig>,
    metrics: Arc<Metrics>,
}

/// Server metrics
struct Metrics {
    total_requests: AtomicU64,
    requests_in_flight: AtomicU64,
    tokens_generated: AtomicU64,
    start_time: Instant,
}

impl Metrics {
    /// Count a request and return a guard that marks it finished on drop.
    fn begin(&self) -> RequestGuard<'_> {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.requests_in_flight.fetch_add(1, Ordering::Relaxed);
        RequestGuard(&self.requests_in_flight)
    }
}

/// RAII guard for tracking in-flight requests
struct RequestGuard<'a>(&'a AtomicU64);

impl<'a> Drop for RequestGuard<'a> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing/logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "server=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Read configuration from environment
    let config = ServerConfig::from_env();
    tracing::info!(
        "Default token version {}, env code {}",
        config.default_version,
        config.default_env_code
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let app = build_app(config);

    tracing::info!("Server listening on {}", addr);

    // Run server with graceful shutdown
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server shut down gracefully");
    Ok(())
}

/// Build the Axum application with routes and middleware
fn build_app(config: ServerConfig) -> Router {
    let metrics = Arc::new(Metrics {
        total_requests: AtomicU64::new(0),
        requests_in_flight: AtomicU64::new(0),
        tokens_generated: AtomicU64::new(0),
        start_time: Instant::now(),
    });

    let state = AppState {
        config: Arc::new(config),
        metrics,
    };

    Router::new()
        // Health check
        .route("/health", get(health_check))
        // API routes
        .route("/api/token", post(token_single))
        .route("/api/token/batch", post(token_batch))
        .route("/api/metrics", get(get_metrics))
        // Middleware
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Serialize, Deserialize)]
struct HealthResponse {
    status: String,
    version: String,
}

/// Token request body. Missing version/env code fall back to the server config.
#[derive(Deserialize)]
struct TokenBody {
    query: String,
    #[serde(default)]
    body: String,
    #[serde(default)]
    user_agent: String,
    #[serde(default)]
    env_code: Option<u32>,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    timestamp_ms: Option<u64>,
}

impl TokenBody {
    fn into_request(self, config: &ServerConfig) -> TokenRequest {
        TokenRequest {
            query: self.query,
            body: self.body,
            user_agent: self.user_agent,
            env_code: self.env_code.unwrap_or(config.default_env_code),
            version: self
                .version
                .unwrap_or_else(|| config.default_version.clone()),
            timestamp_ms: self.timestamp_ms,
        }
    }
}

/// Generate one token
async fn token_single(
    State(state): State<AppState>,
    Json(request): Json<TokenBody>,
) -> Result<Json<TokenResponse>, ApiError> {
    let _guard = state.metrics.begin();

    let request = request.into_request(&state.config);
    tracing::info!(
        "Generating token for {} byte query (version {})",
        request.query.len(),
        request.version
    );

    let token = build_token(&request).map_err(ApiError::from_token_error)?;
    state.metrics.tokens_generated.fetch_add(1, Ordering::Relaxed);

    Ok(Json(TokenResponse {
        success: true,
        data: TokenData::from_token(&token),
    }))
}

#[derive(Serialize, Deserialize)]
struct TokenResponse {
    success: bool,
    data: TokenData,
}

/// Generate tokens for several requests
async fn token_batch(
    State(state): State<AppState>,
    Json(request): Json<BatchTokenBody>,
) -> Result<Json<BatchTokenResponse>, ApiError> {
    let _guard = state.metrics.begin();

    if request.requests.is_empty() {
        return Err(ApiError::BadRequest("requests cannot be empty".to_string()));
    }

    tracing::info!("Generating {} tokens", request.requests.len());

    let data = request
        .requests
        .into_iter()
        .map(|body| {
            let token = build_token(&body.into_request(&state.config))
                .map_err(ApiError::from_token_error)?;
            state.metrics.tokens_generated.fetch_add(1, Ordering::Relaxed);
            Ok::<_, ApiError>(TokenData::from_token(&token))
        })
        .collect::<Result<Vec<_>, ApiError>>()?;

    Ok(Json(BatchTokenResponse {
        success: true,
        data,
    }))
}

#[derive(Deserialize)]
struct BatchTokenBody {
    requests: Vec<TokenBody>,
}

#[derive(Serialize, Deserialize)]
struct BatchTokenResponse {
    success: bool,
    data: Vec<TokenData>,
}

/// Get server metrics
async fn get_metrics(State(state): State<AppState>) -> Json<MetricsResponse> {
    Json(MetricsResponse {
        total_requests: state.metrics.total_requests.load(Ordering::Relaxed),
        requests_in_flight: state.metrics.requests_in_flight.load(Ordering::Relaxed),
        tokens_generated: state.metrics.tokens_generated.load(Ordering::Relaxed),
        uptime_seconds: state.metrics.start_time.elapsed().as_secs(),
    })
}

#[derive(Serialize, Deserialize)]
struct MetricsResponse {
    total_requests: u64,
    requests_in_flight: u64,
    tokens_generated: u64,
    uptime_seconds: u64,
}

/// Token data for API response
#[derive(Serialize, Deserialize)]
struct TokenData {
    /// Framed token, ready to percent-encode into a URL.
    token: String,
    ciphertext_hex: String,
    insert_offset: usize,
    rounds: usize,
    timestamp_ms: u64,
}

impl TokenData {
    fn from_token(token: &Token) -> Self {
        Self {
            token: token.encode(),
            ciphertext_hex: token.ciphertext_hex(),
            insert_offset: token.insert_offset(),
            rounds: token.rounds(),
            timestamp_ms: token.timestamp_ms(),
        }
    }
}

/// API error types
enum ApiError {
    BadRequest(String),
    InternalError(String),
}

impl ApiError {
    fn from_token_error(err: TokenError) -> Self {
        tracing::error!("Token error: {}", err);
        match err {
            TokenError::InputEncoding { .. }
            | TokenError::FieldTooLarge { .. }
            | TokenError::TooManyFields(_) => ApiError::BadRequest(err.to_string()),
            TokenError::Timestamp(_) => ApiError::InternalError(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::InternalError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(serde_json::json!({
            "success": false,
            "error": message
        }));

        (status, body).into_response()
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down gracefully...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down gracefully...");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, header};
    use tower::ServiceExt;

    fn post_json(uri: &str, json: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap()
    }

    async fn read_json<T: serde::de::DeserializeOwned>(response: Response) -> T {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let app = build_app(ServerConfig::default());
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let health: HealthResponse = read_json(response).await;
        assert_eq!(health.status, "healthy");
    }

    #[tokio::test]
    async fn test_single_token_matches_library() {
        let app = build_app(ServerConfig::default());
        let response = app
            .oneshot(post_json(
                "/api/token",
                r#"{"query":"aid=1988&count=20","user_agent":"Mozilla/5.0","version":"5.1.0","timestamp_ms":1767083930000}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body: TokenResponse = read_json(response).await;
        let expected = build_token(
            &TokenRequest::new("aid=1988&count=20", "", "Mozilla/5.0")
                .with_version("5.1.0")
                .with_timestamp_ms(1767083930000),
        )
        .unwrap();
        assert!(body.success);
        assert_eq!(body.data.token, expected.encode());
        assert_eq!(body.data.insert_offset, 61);
        assert_eq!(body.data.rounds, 12);
    }

    #[test]
    fn test_config_defaults_apply() {
        let config = ServerConfig {
            default_version: "5.1.0".to_string(),
            ..ServerConfig::default()
        };
        let request = TokenBody {
            query: "a=1".to_string(),
            body: String::new(),
            user_agent: String::new(),
            env_code: None,
            version: None,
            timestamp_ms: Some(1),
        }
        .into_request(&config);
        assert_eq!(request.version, "5.1.0");
        assert_eq!(request.env_code, 0);
    }

    #[tokio::test]
    async fn test_empty_batch_rejected() {
        let app = build_app(ServerConfig::default());
        let response = app
            .oneshot(post_json("/api/token/batch", r#"{"requests":[]}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_batch_tokens() {
        let app = build_app(ServerConfig::default());
        let response = app
            .oneshot(post_json(
                "/api/token/batch",
                r#"{"requests":[{"query":"a=1","timestamp_ms":1},{"query":"a=2","timestamp_ms":2}]}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: BatchTokenResponse = read_json(response).await;
        assert_eq!(body.data.len(), 2);
        assert_ne!(body.data[0].token, body.data[1].token);
    }
}
