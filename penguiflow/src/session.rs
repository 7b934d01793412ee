//! Session controller: session/tenant/user scoping, task-state updates, and
//! steering input consumed by the planner at its next decision point.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use flow_event::EventKind;

use crate::bus::EventBus;

/// Lifecycle of one background task within a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Running,
    Paused,
    Steering,
    Completed,
    Failed,
}

/// State of one task, published as `state_update` events.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskState {
    pub task_id: String,
    pub session_id: String,
    pub status: TaskStatus,
    pub last_update_id: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Value>,
}

/// Inbound steering surface payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SteeringEvent {
    pub session_id: String,
    pub task_id: String,
    /// `USER_MESSAGE` queues for the planner; other types publish directly.
    pub event_type: String,
    pub payload: Value,
    pub source: String,
}

#[derive(Default)]
struct Session {
    tasks: HashMap<String, TaskState>,
    steering: HashMap<String, VecDeque<Value>>,
}

/// Owns sessions keyed by session id. Publishes task updates onto the task's
/// trace; steering messages are an additional signal for the planner, never a
/// replacement for the original query.
pub struct SessionController {
    bus: Arc<EventBus>,
    sessions: DashMap<String, Session>,
}

impl SessionController {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            sessions: DashMap::new(),
        }
    }

    /// Registers a task bound to `trace_id` and publishes its initial state.
    pub async fn register_task(
        &self,
        session_id: &str,
        task_id: &str,
        trace_id: &str,
    ) -> TaskState {
        let state = TaskState {
            task_id: task_id.to_string(),
            session_id: session_id.to_string(),
            status: TaskStatus::Running,
            last_update_id: uuid::Uuid::new_v4().to_string(),
            attributes: [(
                "trace_id".to_string(),
                Value::String(trace_id.to_string()),
            )]
            .into_iter()
            .collect(),
        };
        self.sessions
            .entry(session_id.to_string())
            .or_default()
            .tasks
            .insert(task_id.to_string(), state.clone());
        self.publish_task_state(&state).await;
        state
    }

    /// Updates a task's status and publishes the new state. Unknown tasks are
    /// ignored.
    pub async fn update_status(&self, session_id: &str, task_id: &str, status: TaskStatus) {
        let updated = {
            let mut session = match self.sessions.get_mut(session_id) {
                Some(s) => s,
                None => return,
            };
            match session.tasks.get_mut(task_id) {
                Some(task) => {
                    task.status = status;
                    task.last_update_id = uuid::Uuid::new_v4().to_string();
                    Some(task.clone())
                }
                None => None,
            }
        };
        if let Some(state) = updated {
            self.publish_task_state(&state).await;
        }
    }

    pub fn task(&self, session_id: &str, task_id: &str) -> Option<TaskState> {
        self.sessions
            .get(session_id)
            .and_then(|s| s.tasks.get(task_id).cloned())
    }

    /// Finds a task by id across sessions (task ids are unique per runtime).
    pub fn find_task(&self, task_id: &str) -> Option<TaskState> {
        self.sessions
            .iter()
            .find_map(|s| s.tasks.get(task_id).cloned())
    }

    /// Accepts a steering event. `USER_MESSAGE` payloads queue for the task's
    /// planner; `NOTIFICATION`/`CONTEXT_PATCH` publish immediately. Returns
    /// whether the event was accepted.
    pub async fn steer(&self, event: SteeringEvent) -> bool {
        let trace_id = match self.task(&event.session_id, &event.task_id) {
            Some(task) => task
                .attributes
                .get("trace_id")
                .and_then(Value::as_str)
                .map(str::to_string),
            None => return false,
        };
        match event.event_type.as_str() {
            "USER_MESSAGE" => {
                self.sessions
                    .entry(event.session_id.clone())
                    .or_default()
                    .steering
                    .entry(event.task_id.clone())
                    .or_default()
                    .push_back(event.payload);
                self.update_status(&event.session_id, &event.task_id, TaskStatus::Steering)
                    .await;
                true
            }
            "NOTIFICATION" | "CONTEXT_PATCH" => {
                if let Some(trace_id) = trace_id {
                    self.bus
                        .emit(
                            &trace_id,
                            EventKind::StateUpdate,
                            Some("session".to_string()),
                            serde_json::json!({
                                "update": event.event_type,
                                "payload": event.payload,
                                "source": event.source,
                            }),
                        )
                        .await;
                }
                true
            }
            _ => false,
        }
    }

    /// Drains queued steering messages for a task; called by the planner at
    /// each decision point.
    pub async fn drain_steering(&self, session_id: &str, task_id: &str) -> Vec<Value> {
        let drained: Vec<Value> = {
            let mut session = match self.sessions.get_mut(session_id) {
                Some(s) => s,
                None => return Vec::new(),
            };
            session
                .steering
                .get_mut(task_id)
                .map(|q| q.drain(..).collect())
                .unwrap_or_default()
        };
        if !drained.is_empty() {
            self.update_status(session_id, task_id, TaskStatus::Running)
                .await;
        }
        drained
    }

    async fn publish_task_state(&self, state: &TaskState) {
        let Some(trace_id) = state.attributes.get("trace_id").and_then(Value::as_str) else {
            return;
        };
        self.bus
            .emit(
                trace_id,
                EventKind::StateUpdate,
                Some("session".to_string()),
                serde_json::json!({
                    "update": "TASK_STATE",
                    "task": state,
                }),
            )
            .await;
    }
}
