//! In-memory state store. Not persistent; implements the full capability set
//! so single-process runs get durable-within-process pause/resume.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use flow_event::PlannerEvent;

use super::{
    BulkEventStore, PlannerStateStore, RemoteBinding, StateStore, StateStoreError,
};

/// In-memory [`StateStore`] with planner-state and bulk capabilities.
#[derive(Default)]
pub struct InMemoryStateStore {
    events: RwLock<HashMap<String, Vec<PlannerEvent>>>,
    planner_state: RwLock<HashMap<String, Value>>,
    bindings: RwLock<Vec<RemoteBinding>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remote bindings saved so far, in insertion order.
    pub async fn remote_bindings(&self) -> Vec<RemoteBinding> {
        self.bindings.read().await.clone()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn save_event(&self, event: &PlannerEvent) -> Result<(), StateStoreError> {
        self.events
            .write()
            .await
            .entry(event.trace_id.clone())
            .or_default()
            .push(event.clone());
        Ok(())
    }

    async fn load_history(&self, trace_id: &str) -> Result<Vec<PlannerEvent>, StateStoreError> {
        let mut history = self
            .events
            .read()
            .await
            .get(trace_id)
            .cloned()
            .unwrap_or_default();
        // seq takes precedence over insertion order on read.
        history.sort_by_key(|e| e.seq);
        Ok(history)
    }

    async fn save_remote_binding(&self, binding: &RemoteBinding) -> Result<(), StateStoreError> {
        self.bindings.write().await.push(binding.clone());
        Ok(())
    }
}

#[async_trait]
impl PlannerStateStore for InMemoryStateStore {
    async fn save_planner_state(
        &self,
        token: &str,
        payload: &Value,
    ) -> Result<(), StateStoreError> {
        // Last-write-wins per token.
        self.planner_state
            .write()
            .await
            .insert(token.to_string(), payload.clone());
        Ok(())
    }

    async fn load_planner_state(&self, token: &str) -> Result<Option<Value>, StateStoreError> {
        Ok(self.planner_state.read().await.get(token).cloned())
    }
}

#[async_trait]
impl BulkEventStore for InMemoryStateStore {
    async fn save_events(&self, events: &[PlannerEvent]) -> Result<(), StateStoreError> {
        let mut guard = self.events.write().await;
        for event in events {
            guard
                .entry(event.trace_id.clone())
                .or_default()
                .push(event.clone());
        }
        Ok(())
    }
}
