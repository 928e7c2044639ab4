//! Liveness and readiness probes

use axum::Json;
use serde::{Deserialize, Serialize};

/// Probe response body
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: &'static str,
}

/// Liveness probe: the process is up
pub async fn health() -> Json<HealthStatus> {
    Json(HealthStatus { status: "ok" })
}

/// Readiness probe: the process is accepting traffic
pub async fn readiness() -> Json<HealthStatus> {
    Json(HealthStatus { status: "ready" })
}
