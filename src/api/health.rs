use axum::{
    Json,
    extract::{Query, State as AxumState},
    response::IntoResponse,
};
use serde_json::json;
use std::collections::HashMap;
use tracing::error;

use crate::SharedState;

/// Health check. `?format=json` adds uptime and queue depth.
pub async fn root(
    AxumState(state): AxumState<SharedState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    if params.get("format").map(String::as_str) != Some("json") {
        return "hook_deploy - healthy".into_response();
    }

    let queued = match state.queue.len().await {
        Ok(n) => Some(n),
        Err(e) => {
            error!("Failed to count queued builds: {}", e);
            None
        }
    };

    Json(json!({
        "name": "hook_deploy",
        "version": env!("CARGO_PKG_VERSION"),
        "started_at": state.started_at.to_rfc3339(),
        "uptime_seconds": state.start_time.elapsed().as_secs(),
        "queued_builds": queued,
        "configured_branches": state.authenticator.branch_count(),
        "status": if queued.is_some() { "healthy" } else { "degraded" },
    }))
    .into_response()
}
