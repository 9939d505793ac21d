use crate::pool::{ConnectionPool, PoolStatus};
use crate::utils::error::Result;
use axum::{extract::State, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info};

#[derive(Clone)]
struct ApiState {
    pool: Arc<ConnectionPool>,
}

/// JSON snapshot served by `GET /status`.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub generated_at: DateTime<Utc>,
    pub pools: HashMap<String, PoolStatus>,
}

/// Serve the read-only pool status API on `bind_addr`.
pub async fn start_status_server(
    bind_addr: &str,
    pool: Arc<ConnectionPool>,
) -> Result<JoinHandle<()>> {
    let listener = TcpListener::bind(bind_addr).await?;
    let local_addr = listener.local_addr()?;

    let router = build_router(ApiState { pool });

    info!("Pool status API listening on {}", local_addr);

    let server = axum::serve(listener, router.into_make_service());

    let handle = tokio::spawn(async move {
        if let Err(err) = server.await {
            error!("Pool status API error: {}", err);
        }
    });

    Ok(handle)
}

fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/status", get(handle_get_status))
        .route("/healthz", get(handle_healthz))
        .with_state(state)
}

/// GET /status - per-address pool counters
async fn handle_get_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let pools = state.pool.status().await;
    Json(StatusResponse {
        generated_at: Utc::now(),
        pools,
    })
}

async fn handle_healthz() -> &'static str {
    "ok"
}
