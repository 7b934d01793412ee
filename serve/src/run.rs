//! Query and resume endpoints: both return an SSE stream of the trace.

use std::collections::BTreeMap;
use std::convert::Infallible;

use axum::{
    extract::State,
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    Json,
};
use futures_util::stream::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::Value;

use penguiflow::streaming::{SseAdapter, SseFrame};
use penguiflow::{PlanningHints, Query, RunHandle};

use super::app::AppState;

/// `POST /run` body, mirroring the query entry point.
#[derive(Debug, Deserialize)]
pub struct RunRequest {
    pub query: String,
    pub session_id: String,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub images: Vec<penguiflow::ArtifactRef>,
    #[serde(default)]
    pub tool_context: BTreeMap<String, Value>,
    #[serde(default)]
    pub llm_context: BTreeMap<String, Value>,
    #[serde(default)]
    pub planning_hints: Option<PlanningHints>,
}

impl RunRequest {
    fn into_query(self) -> Query {
        Query {
            text: self.query,
            session_id: self.session_id,
            tenant_id: self.tenant_id,
            user_id: self.user_id,
            images: self.images,
            tool_context: self.tool_context,
            llm_context: self.llm_context,
            hints: self.planning_hints.unwrap_or_default(),
        }
    }
}

/// `POST /resume` body.
#[derive(Debug, Deserialize)]
pub struct ResumeRequest {
    pub resume_token: String,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub tool_context: BTreeMap<String, Value>,
}

pub(crate) async fn run_query(
    State(state): State<AppState>,
    Json(request): Json<RunRequest>,
) -> Response {
    let handle = state.flow.run(request.into_query());
    sse_response(handle).await
}

pub(crate) async fn resume(
    State(state): State<AppState>,
    Json(request): Json<ResumeRequest>,
) -> Response {
    match state
        .flow
        .resume(&request.resume_token, request.result)
        .await
    {
        Ok(handle) => sse_response(handle).await,
        Err(e) => {
            tracing::debug!(error = %e, "resume rejected");
            (StatusCode::NOT_FOUND, "pause record not found").into_response()
        }
    }
}

/// Encodes the run's event stream as SSE frames. The planner task keeps
/// running if the client disconnects; the trace stays queryable.
async fn sse_response(handle: RunHandle) -> Response {
    let subscription = handle.events().await;
    let mut adapter = SseAdapter::new();
    let stream = subscription
        .into_stream()
        .flat_map(move |event| futures_util::stream::iter(adapter.encode(event)))
        .map(|frame| Ok::<Event, Infallible>(frame_to_event(frame)));
    sse_with_keepalive(stream).into_response()
}

fn sse_with_keepalive<S>(stream: S) -> Sse<S>
where
    S: Stream<Item = Result<Event, Infallible>> + Send + 'static,
{
    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn frame_to_event(frame: SseFrame) -> Event {
    let event = Event::default().event(&frame.event);
    match event.json_data(&frame.data) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(error = %e, "unencodable SSE frame");
            Event::default().event("error").data("{\"class\":\"Encoding\"}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// **Scenario**: a full run request maps onto the query type.
    #[test]
    fn run_request_maps_to_query() {
        let request: RunRequest = serde_json::from_value(json!({
            "query": "weather in paris",
            "session_id": "s1",
            "user_id": "u1",
            "planning_hints": {"max_parallel": 2, "budget": {"max_hops": 4}}
        }))
        .unwrap();
        let query = request.into_query();
        assert_eq!(query.text, "weather in paris");
        assert_eq!(query.user_id.as_deref(), Some("u1"));
        assert_eq!(query.hints.max_parallel, Some(2));
        assert_eq!(query.hints.max_hops(), Some(4));
    }

    /// **Scenario**: a resume request tolerates a missing result.
    #[test]
    fn resume_request_defaults() {
        let request: ResumeRequest =
            serde_json::from_value(json!({"resume_token": "pfr_x"})).unwrap();
        assert!(request.result.is_none());
        assert!(request.tool_context.is_empty());
    }
}
