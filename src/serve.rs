/// HTTP control surface for the worker.
use crate::config::ControlConfig;
use crate::process::{ProcessError, ProcessManager, ProcessStatus, LOG_ARTIFACT};
use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, DefaultBodyLimit, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;

/// Shared handler state. Every handler holds the manager lock for its whole
/// check-then-act sequence, including the wait inside a stop.
#[derive(Clone)]
pub struct AppState {
    manager: Arc<Mutex<ProcessManager>>,
}

impl AppState {
    pub fn new(manager: ProcessManager) -> Self {
        Self {
            manager: Arc::new(Mutex::new(manager)),
        }
    }
}

type ApiResponse = (StatusCode, Json<serde_json::Value>);

fn respond_error(code: StatusCode, message: impl Into<String>) -> ApiResponse {
    (code, Json(serde_json::json!({"error": message.into()})))
}

fn respond_done() -> ApiResponse {
    (StatusCode::OK, Json(serde_json::json!({"status": "done"})))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route(
            "/cmd/start",
            post(cmd_start).layer(DefaultBodyLimit::disable()),
        )
        .route("/cmd/stop", get(cmd_stop))
        .route("/cmd/status", get(cmd_status))
        .route("/logs/remove", get(logs_remove))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Serve until SIGINT or SIGTERM, then stop the worker if it is running.
pub async fn run(config: &ControlConfig) -> Result<(), Box<dyn std::error::Error>> {
    if !config.worker.command_exists() {
        tracing::warn!(
            command = %config.worker.command,
            "worker command not found; set [worker] command or pass --worker"
        );
    }

    let manager = ProcessManager::new(config.worker.clone(), LOG_ARTIFACT);
    let state = AppState::new(manager);

    let addr = format!("{}:{}", config.server.bind, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;
    tracing::info!("counter-control listening on {local_addr}");

    serve_until(listener, state, crate::signals::shutdown_requested()).await?;
    Ok(())
}

/// Serve on `listener` until `shutdown` resolves, drain in-flight requests,
/// then stop the worker if one is still running.
pub async fn serve_until(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(listener, router(state.clone()))
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!("server drained, cleaning up worker");
    state.manager.lock().await.close().await;
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"ok": true}))
}

/// Decode the start value from the first JSON value in `body`.
///
/// `null`, `{}` and `{"start": null}` mean 0. The field name matches
/// case-insensitively, preferring an exact `start`. Anything after the first
/// value is ignored.
fn parse_start(body: &[u8]) -> Result<i64, String> {
    let value = match serde_json::Deserializer::from_slice(body)
        .into_iter::<serde_json::Value>()
        .next()
    {
        Some(Ok(value)) => value,
        Some(Err(e)) => return Err(e.to_string()),
        None => return Err("empty body".to_string()),
    };

    let object = match value {
        serde_json::Value::Null => return Ok(0),
        serde_json::Value::Object(object) => object,
        other => return Err(format!("expected an object, got {other}")),
    };

    let field = object.get("start").or_else(|| {
        object
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case("start"))
            .map(|(_, v)| v)
    });
    match field {
        None | Some(serde_json::Value::Null) => Ok(0),
        Some(v) => v
            .as_i64()
            .ok_or_else(|| format!("start is not an integer: {v}")),
    }
}

/// The body is decoded by hand so clients need not send a JSON content type.
async fn cmd_start(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> ApiResponse {
    let start = match body
        .map_err(|e| e.body_text())
        .and_then(|body| parse_start(&body))
    {
        Ok(start) => start,
        Err(e) => {
            tracing::debug!("rejecting start payload: {e}");
            return respond_error(StatusCode::BAD_REQUEST, "Invalid request payload");
        }
    };
    tracing::info!(start, "start requested");

    let mut manager = state.manager.lock().await;
    match manager.start(start) {
        Ok(pid) => (StatusCode::CREATED, Json(serde_json::json!({"pid": pid}))),
        Err(ProcessError::AlreadyRunning { pid }) => {
            tracing::warn!(pid, "ignoring start requested while worker is running");
            respond_error(StatusCode::BAD_REQUEST, "Application already started")
        }
        Err(e) => {
            tracing::error!("{e}");
            respond_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("While starting command: {e}"),
            )
        }
    }
}

async fn cmd_stop(State(state): State<AppState>) -> ApiResponse {
    let mut manager = state.manager.lock().await;
    if !manager.is_running() {
        tracing::info!("ignoring stop requested before start");
        return respond_error(StatusCode::BAD_REQUEST, "Application not started");
    }

    match manager.stop().await {
        Ok(report) => {
            tracing::debug!(
                pid = report.pid,
                status = ?report.status,
                killed = report.killed,
                "stop complete"
            );
            respond_done()
        }
        Err(ProcessError::NotRunning) => {
            respond_error(StatusCode::BAD_REQUEST, "Application not started")
        }
        Err(e) => respond_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn cmd_status(State(state): State<AppState>) -> Json<ProcessStatus> {
    Json(state.manager.lock().await.status())
}

async fn logs_remove(State(state): State<AppState>) -> ApiResponse {
    let manager = state.manager.lock().await;
    if manager.is_running() {
        tracing::info!("attempt to remove log of running worker; stop it first with /cmd/stop");
        return respond_error(
            StatusCode::BAD_REQUEST,
            "Cannot clear logs of running command",
        );
    }

    match manager.remove_log_artifact().await {
        Ok(()) => respond_done(),
        Err(e) => {
            tracing::error!(path = %manager.log_path().display(), "removing worker log failed: {e}");
            respond_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("While removing logs: {e}"),
            )
        }
    }
}
