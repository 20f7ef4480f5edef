//! HTTP surface: session endpoints and the stream upgrade.

use crate::config::ServerConfig;
use crate::gateway::{ReadinessProber, StreamGate};
use crate::relay::{StreamRelay, TeardownCoordinator};
use crate::session::SessionManager;
use crate::transport::{websocket, UpgradePolicy};
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{json, Value};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use vmgate_core::{ResourceRuntime, SessionId, StreamPhase, VmError, VmResult};

pub const START_ENDPOINT: &str = "/vm/start";
pub const STOP_ENDPOINT: &str = "/vm/{id}/stop";
pub const STREAM_ENDPOINT: &str = "/vm/{id}/stream";
pub const INFO_ENDPOINT: &str = "/vm/{id}/info";

/// Shared, read-only state for all handlers.
pub struct AppState {
    manager: SessionManager,
    prober: ReadinessProber,
    policy: UpgradePolicy,
    cors: CorsLayer,
    runtime: Arc<dyn ResourceRuntime>,
}

impl AppState {
    pub fn new(config: &ServerConfig, runtime: Arc<dyn ResourceRuntime>) -> Self {
        Self {
            manager: SessionManager::new(runtime.clone(), config.settle),
            prober: ReadinessProber::new(runtime.clone(), config.readiness),
            policy: UpgradePolicy::from_config(config),
            cors: cors_layer(&config.allowed_origins),
            runtime,
        }
    }
}

/// Error response body: `{error, output?}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    output: Option<String>,
}

impl From<VmError> for ApiError {
    fn from(e: VmError) -> Self {
        let status = match &e {
            VmError::InvalidId(_) => StatusCode::BAD_REQUEST,
            VmError::OriginDenied(_) => StatusCode::FORBIDDEN,
            VmError::Resolution(_) | VmError::NotReady(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let output = match &e {
            VmError::Provisioning { output, .. } => Some(output.clone()),
            _ => None,
        };
        Self {
            status,
            message: e.to_string(),
            output,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = match self.output {
            Some(output) => json!({ "error": self.message, "output": output }),
            None => json!({ "error": self.message }),
        };
        (self.status, Json(body)).into_response()
    }
}

#[derive(Debug, Serialize)]
struct StartResponse {
    #[serde(rename = "VMID")]
    vm_id: SessionId,
    #[serde(rename = "containerId")]
    container_id: String,
    running: bool,
    message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    logs: Option<String>,
}

#[derive(Debug, Serialize)]
struct InfoResponse {
    #[serde(rename = "VMID")]
    vm_id: SessionId,
    container: Value,
}

/// Cross-origin policy for the HTTP API. Unparseable origins are skipped.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(origin = %origin, error = %e, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::PATCH,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::ORIGIN,
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
            HeaderName::from_static("x-requested-with"),
        ])
        .expose_headers([header::CONTENT_LENGTH, header::CONTENT_TYPE])
        .allow_credentials(true)
        .max_age(Duration::from_secs(86_400))
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = state.cors.clone();
    Router::new()
        .route(START_ENDPOINT, post(handle_start))
        .route(STOP_ENDPOINT, post(handle_stop))
        .route(STREAM_ENDPOINT, get(handle_stream))
        .route(INFO_ENDPOINT, get(handle_info))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Bind, serve until `shutdown` resolves, then return.
pub async fn run(
    config: ServerConfig,
    runtime: Arc<dyn ResourceRuntime>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> VmResult<()> {
    let listener = TcpListener::bind(SocketAddr::new(config.bind, config.port)).await?;
    info!(
        addr = %listener.local_addr()?,
        image = %config.image,
        network = %config.network,
        "vmgate-server listening"
    );

    let app = build_router(Arc::new(AppState::new(&config, runtime)));
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn handle_start(
    State(state): State<Arc<AppState>>,
) -> Result<Json<StartResponse>, ApiError> {
    let session = state.manager.create().await.map_err(|e| {
        warn!(error = %e, "vm start failed");
        ApiError::from(e)
    })?;
    let running = session.is_running();
    Ok(Json(StartResponse {
        vm_id: session.id,
        container_id: session.container_id,
        running,
        message: "vm started",
        logs: session.diagnostics.filter(|_| !running),
    }))
}

async fn handle_stop(
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let id = SessionId::parse(&raw_id)?;
    state.manager.stop(&id).await;
    Ok(Json(json!({ "message": "vm stopped" })))
}

async fn handle_info(
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
) -> Result<Json<InfoResponse>, ApiError> {
    let id = SessionId::parse(&raw_id)?;
    let container = state.manager.info(&id).await;
    Ok(Json(InfoResponse {
        vm_id: id,
        container,
    }))
}

/// Gate on readiness, then upgrade and relay.
///
/// A readiness failure answers 502 and leaves the resource in place; only a
/// stream that was actually relayed tears its resource down.
async fn handle_stream(
    State(state): State<Arc<AppState>>,
    Path(raw_id): Path<String>,
    headers: HeaderMap,
    upgrade: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let id = SessionId::parse(&raw_id)?;
    let origin = headers
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok());
    state.policy.check_origin(origin).map_err(|e| {
        warn!(session_id = %id, error = %e, "stream origin rejected");
        ApiError::from(e)
    })?;

    let mut gate = StreamGate::new(id.clone());
    let service = open_stream(&state.prober, &mut gate).await?;

    let runtime = state.runtime.clone();
    let failed_id = id.clone();
    Ok(state
        .policy
        .apply(upgrade)
        .on_failed_upgrade(move |e| {
            warn!(session_id = %failed_id, error = %e, "websocket upgrade failed");
        })
        .on_upgrade(move |socket| run_stream(gate, service, socket, runtime))
        .into_response())
}

/// Run `gate` to `Ready`.
///
/// On failure the gate goes `Failed(_) -> Terminated` and the resource is
/// left alone.
async fn open_stream(
    prober: &ReadinessProber,
    gate: &mut StreamGate,
) -> Result<TcpStream, ApiError> {
    let resource = gate.session_id().resource_name();
    match prober.open(gate, &resource).await {
        Ok(service) => Ok(service),
        Err(e) => {
            warn!(
                session_id = %gate.session_id(),
                phase = %gate.phase(),
                error = %e,
                "stream not ready"
            );
            gate.advance(StreamPhase::Terminated);
            Err(ApiError::from(e))
        }
    }
}

async fn run_stream(
    mut gate: StreamGate,
    service: TcpStream,
    socket: WebSocket,
    runtime: Arc<dyn ResourceRuntime>,
) {
    gate.advance(StreamPhase::Streaming);
    let id = gate.session_id().clone();
    info!(session_id = %id, "stream started");

    let (source, sink) = websocket::split(socket);
    let teardown = Arc::new(TeardownCoordinator::new(runtime, id.clone()));
    let outcome = StreamRelay::new(id.clone(), teardown)
        .run(service, source, sink)
        .await;

    gate.advance(StreamPhase::Terminated);
    debug!(
        session_id = %id,
        first_finished = ?outcome.first_finished,
        bytes_to_resource = outcome.bytes_to_resource,
        bytes_to_client = outcome.bytes_to_client,
        "stream finished"
    );
}
