//! HTTP health endpoint - reports which access keys are configured

use crate::config::KeysConfig;
use anyhow::Result;
use axum::{extract::State, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use std::future::Future;
use tokio::net::TcpListener;

/// Route serving [`HealthStatus`]
pub const HEALTH_PATH: &str = "/api/health";

/// Presence of each key, never its value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub ok: bool,
    pub url: bool,
    pub anon: bool,
    pub service: bool,
}

impl HealthStatus {
    pub fn from_keys(keys: &KeysConfig) -> Self {
        let url = keys.public_url.is_some();
        let anon = keys.anon_key.is_some();
        let service = keys.service_key.is_some();
        Self {
            ok: url && anon,
            url,
            anon,
            service,
        }
    }
}

pub fn router(status: HealthStatus) -> Router {
    Router::new()
        .route(HEALTH_PATH, get(health))
        .with_state(status)
}

async fn health(State(status): State<HealthStatus>) -> Json<HealthStatus> {
    Json(status)
}

/// Serve the health endpoint until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, status: HealthStatus, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tracing::info!("Health endpoint on http://{}{}", listener.local_addr()?, HEALTH_PATH);
    axum::serve(listener, router(status))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
