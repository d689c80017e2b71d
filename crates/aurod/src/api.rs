use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::Path;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Json;
use axum::Router;
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::monitor::Mirror;
use crate::monitor::MirrorState;

/// Response for the /v1/ping endpoint
#[derive(Serialize)]
struct PingResponse {
    status: String,
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    mirror: Mirror,
}

/// Handler for GET /v1/ping
#[tracing::instrument]
async fn ping() -> impl IntoResponse {
    tracing::debug!("Handling /v1/ping request");
    (
        StatusCode::OK,
        Json(PingResponse {
            status: "ok".to_string(),
        }),
    )
}

/// Handler for GET /v1/machines
///
/// Serves the full mirror: machine rows plus loading/error flags, so the
/// dashboard can render skeletons and failures without a separate endpoint.
#[tracing::instrument(skip(state))]
async fn machines(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.mirror.load_full();
    (StatusCode::OK, Json(MirrorState::clone(&snapshot)))
}

/// Handler for GET /v1/machines/{id}
#[tracing::instrument(skip(state))]
async fn machine(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    let snapshot = state.mirror.load_full();
    match snapshot.machines.iter().find(|m| m.id == id) {
        Some(machine) => (StatusCode::OK, Json(machine.clone())).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Create the API router with all endpoints
fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/ping", get(ping))
        .route("/v1/machines", get(machines))
        .route("/v1/machines/:id", get(machine))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP API server
///
/// Binds to the specified address and serves the mirror until the provided
/// shutdown signal is triggered.
pub async fn serve(
    listen: String,
    port: u16,
    mirror: Mirror,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> anyhow::Result<()> {
    let state = Arc::new(AppState { mirror });
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", listen, port).parse()?;
    tracing::info!("Starting HTTP API server on {}", addr);

    let listener = TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            tracing::info!("HTTP API server shutting down gracefully");
        })
        .await?;

    Ok(())
}
