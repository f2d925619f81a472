//! HTTP liveness, status and metrics endpoints.

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use std::net::SocketAddr;

use crate::executor::EngineHandle;
use crate::metrics::Metrics;

#[derive(Clone)]
pub struct HealthState {
    pub metrics: Metrics,
    pub engine: EngineHandle,
    pub degraded_after: u64,
    pub started_at: DateTime<Utc>,
}

pub fn build_router(state: HealthState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn index(State(state): State<HealthState>) -> impl IntoResponse {
    let uptime = Utc::now() - state.started_at;
    match state.engine.get_status().await {
        Ok(s) => format!(
            "Parity prediction bot is running\n\
             uptime: {}m\n\
             last game: {}\n\
             history: {}/{}\n\
             mode: {} (even {} / odd {})\n\
             predictions: {} made, {} won, {} lost\n",
            uptime.num_minutes(),
            s.last_game_number
                .map(|g| format!("#{}", g))
                .unwrap_or_else(|| "none".to_string()),
            s.history_len,
            s.history_capacity,
            s.mode,
            s.thresholds.even,
            s.thresholds.odd,
            s.counters.predictions_made,
            s.counters.predictions_won,
            s.counters.predictions_lost
        ),
        Err(_) => "Parity prediction bot: engine unavailable\n".to_string(),
    }
}

async fn health(State(state): State<HealthState>) -> impl IntoResponse {
    if state.metrics.is_degraded(state.degraded_after) {
        (StatusCode::SERVICE_UNAVAILABLE, "DEGRADED")
    } else {
        (StatusCode::OK, "OK")
    }
}

async fn metrics(State(state): State<HealthState>) -> impl IntoResponse {
    state.metrics.export_prometheus()
}

pub async fn serve(state: HealthState, port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "🌐 Health server listening");
    axum::serve(listener, build_router(state)).await?;
    Ok(())
}
