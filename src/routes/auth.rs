//! Auth routes — development credential issue and bearer extraction.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::Json;
use serde::Deserialize;
use tracing::{error, info};

use crate::state::AppState;

/// Pull the token out of an `Authorization: Bearer <token>` header.
pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    Some(token.trim())
}

#[derive(Deserialize)]
pub struct DevTokenRequest {
    handle: String,
}

/// `POST /api/dev/token`: issue a credential for a provisioned participant.
/// Answers 404 unless `DEV_TOKEN_ISSUE` is enabled.
pub async fn dev_token(
    State(state): State<AppState>,
    Json(body): Json<DevTokenRequest>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    if !state.settings.dev_token_issue {
        return Err(StatusCode::NOT_FOUND);
    }

    let handle = body.handle.trim().to_lowercase();
    if !state.presence.pair().contains(&handle) {
        return Err(StatusCode::FORBIDDEN);
    }

    let participant = state
        .store
        .find_participant_by_handle(&handle)
        .await
        .map_err(|e| {
            error!(error = %e, "dev token: participant lookup failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::NOT_FOUND)?;

    let token = state.tokens.issue(participant.id).map_err(|e| {
        error!(error = %e, "dev token: signing failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    info!(participant = %participant.handle, "dev token issued");
    Ok(Json(serde_json::json!({ "token": token, "participant": participant })))
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
