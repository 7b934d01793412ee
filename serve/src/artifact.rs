//! Artifact download surface with scope enforcement.
//!
//! The store itself keeps scope as metadata only; this layer compares the
//! caller's session/user/tenant headers against the artifact's scope and
//! answers not-found on any mismatch, so existence is never disclosed.

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

use penguiflow::ArtifactScope;

use super::app::AppState;

const SESSION_HEADER: &str = "x-pf-session";
const USER_HEADER: &str = "x-pf-user";
const TENANT_HEADER: &str = "x-pf-tenant";

/// Caller scope from request headers; absent headers stay unset.
fn caller_scope(headers: &HeaderMap) -> ArtifactScope {
    let get = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    ArtifactScope {
        tenant_id: get(TENANT_HEADER),
        user_id: get(USER_HEADER),
        session_id: get(SESSION_HEADER),
        trace_id: None,
    }
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "not found").into_response()
}

pub(crate) async fn download(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let caller = caller_scope(&headers);
    let reference = match state.flow.artifacts().get_ref(&id).await {
        Ok(reference) => reference,
        Err(_) => return not_found(),
    };
    if !reference.scope.admits(&caller) {
        return not_found();
    }
    match state.flow.artifacts().get(&id).await {
        Ok(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, reference.mime_type)],
            bytes,
        )
            .into_response(),
        Err(_) => not_found(),
    }
}

pub(crate) async fn meta(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let caller = caller_scope(&headers);
    match state.flow.artifacts().get_ref(&id).await {
        Ok(reference) if reference.scope.admits(&caller) => Json(reference).into_response(),
        _ => not_found(),
    }
}
