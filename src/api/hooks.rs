//! Push hook endpoint

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State as AxumState},
    http::{HeaderMap, StatusCode},
};
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use crate::SharedState;
use crate::payload::Payload;

pub const SIGNATURE_HEADER: &str = "X-Hub-Signature";

type HookResponse = (StatusCode, Json<Value>);

fn respond(status: StatusCode, message: impl Into<String>) -> HookResponse {
    (status, Json(json!({ "status": message.into() })))
}

fn malformed(payload: impl std::fmt::Display) -> HookResponse {
    respond(
        StatusCode::BAD_REQUEST,
        format!("Malformed request payload: {}", payload),
    )
}

/// POST /hooks/{branch}
///
/// Authenticates the body against the branch's secret, checks the push is for
/// that branch, and queues a build. The build itself runs in the dispatcher.
pub async fn handle_hook(
    AxumState(state): AxumState<SharedState>,
    Path(branch): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> HookResponse {
    // a header that is not valid text can never match, but it was still sent
    let signature = headers
        .get(SIGNATURE_HEADER)
        .map(|v| v.to_str().unwrap_or_default());

    if let Err(e) = state.authenticator.authenticate(&branch, signature, &body) {
        warn!("Rejected hook for branch '{}': {}", branch, e);
        return respond(StatusCode::FORBIDDEN, e.to_string());
    }

    let payload = match Payload::from_slice(&body) {
        Ok(p) => p,
        Err(e) => {
            info!("Could not parse hook body: {}", e);
            return malformed(String::from_utf8_lossy(&body));
        }
    };
    debug!("Hook payload for '{}': {}", branch, payload);

    let git_ref = match payload.git_ref() {
        Ok(r) => r,
        Err(e) => {
            error!("{}", e);
            return malformed(&payload);
        }
    };

    if !payload.validate(&branch) {
        return match payload.branch() {
            Ok(pushed) if pushed != branch => {
                info!(
                    "Push to '{}' does not match hook branch '{}', skipping",
                    pushed, branch
                );
                respond(
                    StatusCode::BAD_REQUEST,
                    format!("Incorrect branch \"{}\" -- skipping build", pushed),
                )
            }
            _ => {
                error!("No repository field in push payload");
                malformed(&payload)
            }
        };
    }

    let repo_name = match payload.repo_name() {
        Ok(name) => name,
        Err(e) => {
            error!("{}", e);
            return malformed(&payload);
        }
    };

    match state.queue.add(&payload).await {
        Ok(id) => {
            info!(
                "Queued build {} for ref {} of repo '{}'",
                id, git_ref, repo_name
            );
            respond(
                StatusCode::ACCEPTED,
                format!("Build started for ref {} of repo {}", git_ref, repo_name),
            )
        }
        Err(e) => {
            error!("Failed to queue build: {}", e);
            respond(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to queue build: {}", e),
            )
        }
    }
}
