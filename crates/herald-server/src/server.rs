//! `HeraldServer`: axum HTTP + WebSocket surface.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE, LOCATION, ORIGIN};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use futures::StreamExt;
use herald_broker::SharedBroker;
use herald_core::{Identity, Notification, NotificationRequest, Role};
use herald_settings::HeraldSettings;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::auth::{Authenticated, Caller, TokenVerifier};
use crate::error::ApiError;
use crate::health::{self, HealthResponse};
use crate::metrics::{
    BROKER_ERRORS_TOTAL, NOTIFICATIONS_PUBLISHED_TOTAL, NOTIFICATIONS_REJECTED_TOTAL,
};
use crate::relay::{self, RelayTiming};
use crate::shutdown::ShutdownCoordinator;

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Process-wide broker handle.
    pub broker: SharedBroker,
    /// Bearer-token verifier.
    pub verifier: Arc<TokenVerifier>,
    /// Relay session deadlines.
    pub timing: RelayTiming,
    /// Browser origins allowed for CORS and relay upgrades.
    pub allowed_origins: Arc<Vec<String>>,
    /// Largest inbound WebSocket message, in bytes.
    pub max_message_size: usize,
    /// Shutdown coordinator; sessions hold child tokens of its root.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Relay sessions currently running.
    pub active_sessions: Arc<AtomicUsize>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle, when a recorder is installed.
    pub metrics_handle: Option<PrometheusHandle>,
}

/// The Herald server.
pub struct HeraldServer {
    host: String,
    port: u16,
    state: AppState,
}

impl HeraldServer {
    /// Build a server from loaded settings and a connected broker.
    pub fn new(
        settings: &HeraldSettings,
        broker: SharedBroker,
        metrics_handle: Option<PrometheusHandle>,
    ) -> Self {
        if settings.auth.jwt_secret.is_empty() {
            warn!("auth.jwtSecret is empty; tokens signed with an empty secret will be accepted");
        }
        let state = AppState {
            broker,
            verifier: Arc::new(TokenVerifier::new(&settings.auth.jwt_secret)),
            timing: RelayTiming::from(&settings.relay),
            allowed_origins: Arc::new(settings.server.allowed_origins.clone()),
            max_message_size: settings.server.max_message_size,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            active_sessions: Arc::new(AtomicUsize::new(0)),
            start_time: Instant::now(),
            metrics_handle,
        };
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            state,
        }
    }

    /// Build the axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/notifications", post(publish_handler))
            .route("/notifications/ws", get(relay_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .layer(cors_layer(&self.state.allowed_origins))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Bind and serve in a background task until shutdown is initiated.
    ///
    /// Returns the bound address (useful with port 0) and the server task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let listener = TcpListener::bind((self.host.as_str(), self.port)).await?;
        let addr = listener.local_addr()?;
        let router = self.router();
        let stop = self.state.shutdown.token();

        info!(%addr, broker = self.state.broker.name(), "herald listening");
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(stop.cancelled_owned())
                .await
            {
                error!(error = %e, "server error");
            }
        });
        Ok((addr, handle))
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    /// Relay sessions currently running.
    pub fn active_sessions(&self) -> usize {
        self.state.active_sessions.load(Ordering::Relaxed)
    }
}

fn cors_layer(allowed: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin, "ignoring invalid allowed origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
}

/// POST /notifications
async fn publish_handler(
    State(state): State<AppState>,
    caller: Result<Authenticated, ApiError>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let result = publish_notification(&state, caller, &headers, &body).await;
    if let Err(e) = &result {
        counter!(NOTIFICATIONS_REJECTED_TOTAL, "reason" => e.code()).increment(1);
        debug!(error = %e, "notification rejected");
    }
    result?;
    Ok((StatusCode::CREATED, [(LOCATION, "/notifications")]))
}

async fn publish_notification(
    state: &AppState,
    caller: Result<Authenticated, ApiError>,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<(), ApiError> {
    let Authenticated(caller) = caller?;
    caller.require(Role::Courier, "publish notifications")?;

    if !is_json(headers) {
        return Err(ApiError::UnsupportedMediaType);
    }
    let request: NotificationRequest =
        serde_json::from_slice(body).map_err(|e| ApiError::MalformedBody(e.to_string()))?;
    let notification = Notification::try_from(request)?;

    if let Err(e) = herald_broker::publish(state.broker.as_ref(), &notification).await {
        warn!(error = %e, courier = %caller.identity, "publish failed");
        counter!(BROKER_ERRORS_TOTAL, "op" => e.op()).increment(1);
        return Err(e.into());
    }
    counter!(NOTIFICATIONS_PUBLISHED_TOTAL).increment(1);
    Ok(())
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
}

/// GET /notifications/ws
async fn relay_handler(
    State(state): State<AppState>,
    Authenticated(caller): Authenticated,
    headers: HeaderMap,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if let Err(e) = authorize_relay(&caller, &state.allowed_origins, &headers) {
        debug!(error = %e, user = %caller.identity, "relay refused");
        return e.into_response();
    }
    let ws = match upgrade {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let identity = caller.identity;
    ws.max_message_size(state.max_message_size)
        .on_upgrade(move |socket| serve_relay(socket, identity, state))
}

fn authorize_relay(caller: &Caller, allowed: &[String], headers: &HeaderMap) -> Result<(), ApiError> {
    caller.require(Role::Sender, "open a relay connection")?;
    check_origin(allowed, headers.get(ORIGIN))
}

/// Browsers always send `Origin`; clients that omit it are not subject to the check.
fn check_origin(allowed: &[String], origin: Option<&HeaderValue>) -> Result<(), ApiError> {
    let Some(origin) = origin else {
        return Ok(());
    };
    if allowed.is_empty() {
        return Ok(());
    }
    let origin = origin
        .to_str()
        .map_err(|_| ApiError::OriginNotAllowed("<non-ascii>".into()))?;
    if allowed.iter().any(|candidate| candidate == origin) {
        Ok(())
    } else {
        Err(ApiError::OriginNotAllowed(origin.to_owned()))
    }
}

async fn serve_relay(socket: WebSocket, identity: Identity, state: AppState) {
    let (writer, reader) = socket.split();
    let _active = ActiveSession::enter(&state.active_sessions);
    let shutdown = state.shutdown.token();
    if let Err(e) = relay::run_session(
        writer,
        reader,
        &identity,
        state.broker.as_ref(),
        state.timing,
        &shutdown,
    )
    .await
    {
        debug!(error = %e, user = %identity, "relay session not started");
    }
}

/// Counts a running session for `/health` until dropped.
struct ActiveSession(Arc<AtomicUsize>);

impl ActiveSession {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        let _ = counter.fetch_add(1, Ordering::Relaxed);
        Self(Arc::clone(counter))
    }
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        let _ = self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.active_sessions.load(Ordering::Relaxed),
        state.broker.name(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics_handle {
        Some(handle) => (
            [(CONTENT_TYPE, "text/plain; version=0.0.4")],
            crate::metrics::render(handle),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
