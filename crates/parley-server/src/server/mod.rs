use crate::config::ServerConfig;
use crate::db::Database;
use crate::messages::MessageRepository;
use anyhow::Result;
use axum::{
    extract::State,
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use parley_relay::{ConnectionRegistry, LifecycleManager, MessageStore, RelayEngine};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{debug, info, warn, Level};

mod routes;

/// Server application state
pub struct AppState {
    /// Accepts connections and owns all registry writes
    pub lifecycle: LifecycleManager,
    /// Persists and forwards direct messages
    pub relay: RelayEngine,
    /// Message database
    pub db: Arc<Database>,
    /// Server configuration
    pub config: ServerConfig,
    /// Cancelled when the server is shutting down
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: ServerConfig, db: Arc<Database>, shutdown: CancellationToken) -> Self {
        let store: Arc<dyn MessageStore> = Arc::new(MessageRepository::new(Arc::clone(&db)));
        Self::with_store(config, db, store, shutdown)
    }

    /// Build state around an arbitrary message store.
    pub fn with_store(
        config: ServerConfig,
        db: Arc<Database>,
        store: Arc<dyn MessageStore>,
        shutdown: CancellationToken,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let lifecycle = LifecycleManager::new(Arc::clone(&registry), config.lifecycle_config());
        let relay = RelayEngine::new(registry, store).with_store_timeout(config.store_timeout);

        Self {
            lifecycle,
            relay,
            db,
            config,
            shutdown,
        }
    }

    /// The presence registry shared by lifecycle and relay
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        self.lifecycle.registry()
    }

    /// The message store behind the relay
    pub fn store(&self) -> &Arc<dyn MessageStore> {
        self.relay.store()
    }
}

/// Bind the configured address and run the server until `shutdown` fires.
pub async fn start(
    config: ServerConfig,
    db: Arc<Database>,
    shutdown: CancellationToken,
) -> Result<()> {
    let listener = TcpListener::bind(config.listen_addr).await?;
    info!("Starting Axum HTTP server on {}", listener.local_addr()?);

    let state = Arc::new(AppState::new(config, db, shutdown));
    serve(listener, state).await
}

/// Serve on an already bound listener.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    let sweeper = spawn_stale_sweeper(Arc::clone(&state));
    let shutdown = state.shutdown.clone();

    let app = create_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }

    info!("HTTP server stopped");
    Ok(())
}

/// Create the Axum router with all routes and middleware
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.allowed_origins);

    Router::new()
        .route("/", get(root_handler))
        .route("/ping", get(ping_handler))
        .route("/health", get(health_handler))
        .with_state(Arc::clone(&state))
        .merge(routes::websocket::router(Arc::clone(&state)))
        .nest("/api/messages", routes::messages::router(state))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(CompressionLayer::new())
        .layer(cors)
}

/// Only the configured origins, with credentials.
fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(origin = %origin, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}

/// Periodically drop bindings whose connection died without cleanup.
fn spawn_stale_sweeper(state: Arc<AppState>) -> Option<JoinHandle<()>> {
    let period = state.config.stale_sweep_interval?;
    let lifecycle = state.lifecycle.clone();
    let shutdown = state.shutdown.clone();

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = lifecycle.sweep_stale();
                    if removed > 0 {
                        info!(removed, "Swept stale bindings");
                    } else {
                        debug!("No stale bindings");
                    }
                }
            }
        }
    }))
}

async fn root_handler() -> &'static str {
    "Chat API is running"
}

async fn ping_handler() -> Json<serde_json::Value> {
    Json(json!({ "msg": "Ping Successful" }))
}

/// Health check endpoint (for load balancers)
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let connections = state.registry().bound_count();

    match state.db.health_check().await {
        Ok(true) => (
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "service": "parley-server",
                "version": env!("CARGO_PKG_VERSION"),
                "database": "healthy",
                "connections": connections
            })),
        ),
        Ok(false) => {
            warn!("Health check: database unhealthy");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": "parley-server",
                    "version": env!("CARGO_PKG_VERSION"),
                    "database": "unhealthy",
                    "connections": connections
                })),
            )
        }
        Err(e) => {
            warn!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": "parley-server",
                    "version": env!("CARGO_PKG_VERSION"),
                    "database": format!("error: {}", e),
                    "connections": connections
                })),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MigrationRunner;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use parley_relay::{ConnectionHandle, ConnectionId, UserId};
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    async fn create_test_state() -> Arc<AppState> {
        let db = Database::in_memory("test-server").await.unwrap();
        MigrationRunner::messages().run(&db).await.unwrap();

        Arc::new(AppState::new(
            ServerConfig::default(),
            Arc::new(db),
            CancellationToken::new(),
        ))
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_root_endpoint() {
        let app = create_router(create_test_state().await);

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"Chat API is running");
    }

    #[tokio::test]
    async fn test_ping_endpoint() {
        let app = create_router(create_test_state().await);

        let response = app
            .oneshot(Request::builder().uri("/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["msg"], "Ping Successful");
    }

    #[tokio::test]
    async fn test_health_endpoint_counts_bound_users() {
        let state = create_test_state().await;
        let (tx, _rx) = mpsc::channel(1);
        state.registry().bind(
            UserId::new("alice").unwrap(),
            ConnectionHandle::new(ConnectionId::new(), tx),
        );

        let response = create_router(state)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["service"], "parley-server");
        assert_eq!(json["connections"], 1);
    }

    #[tokio::test]
    async fn test_cors_allows_configured_origin() {
        let app = create_router(create_test_state().await);

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/ping")
                    .header(header::ORIGIN, "http://localhost:3000")
                    .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let headers = response.headers();
        assert_eq!(
            headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "http://localhost:3000"
        );
        assert_eq!(
            headers.get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS).unwrap(),
            "true"
        );
    }

    #[tokio::test]
    async fn test_cors_rejects_unknown_origin() {
        let app = create_router(create_test_state().await);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/ping")
                    .header(header::ORIGIN, "https://evil.example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert!(response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none());
    }

    #[tokio::test]
    async fn test_stale_sweeper_removes_dead_bindings() {
        let db = Database::in_memory("test-sweeper").await.unwrap();
        let config = ServerConfig {
            stale_sweep_interval: Some(std::time::Duration::from_millis(10)),
            ..ServerConfig::default()
        };
        let state = Arc::new(AppState::new(config, Arc::new(db), CancellationToken::new()));

        let (tx, rx) = mpsc::channel(1);
        state.registry().bind(
            UserId::new("ghost").unwrap(),
            ConnectionHandle::new(ConnectionId::new(), tx),
        );
        drop(rx);

        let sweeper = spawn_stale_sweeper(Arc::clone(&state)).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        assert_eq!(state.registry().bound_count(), 0);

        state.shutdown.cancel();
        sweeper.await.unwrap();
    }

    #[tokio::test]
    async fn test_sweeper_disabled() {
        let db = Database::in_memory("test-sweeper").await.unwrap();
        let config = ServerConfig {
            stale_sweep_interval: None,
            ..ServerConfig::default()
        };
        let state = Arc::new(AppState::new(config, Arc::new(db), CancellationToken::new()));

        assert!(spawn_stale_sweeper(state).is_none());
    }
}
