//! Steering endpoint: forwards user signals to the session controller.

use axum::{extract::State, Json};
use serde_json::json;

use penguiflow::session::SteeringEvent;

use super::app::AppState;

pub(crate) async fn steer(
    State(state): State<AppState>,
    Json(event): Json<SteeringEvent>,
) -> Json<serde_json::Value> {
    let accepted = state.flow.steer(event).await;
    Json(json!({ "accepted": accepted }))
}
