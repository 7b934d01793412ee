//! State store contract: a narrow required surface plus discrete optional
//! capabilities, detected once at wiring time.
//!
//! Hot-path callers go through [`StateStoreHandle`], whose guards downgrade
//! every store failure to telemetry — a broken store must never fail a query.

mod in_memory;

pub use in_memory::InMemoryStateStore;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use flow_event::PlannerEvent;

/// Store-side failure. Hot paths never see this type; the handle converts it
/// to telemetry.
#[derive(Debug, Error)]
pub enum StateStoreError {
    #[error("storage: {0}")]
    Storage(String),
    #[error("serialization: {0}")]
    Serialization(String),
}

/// Binding of a trace to a remote execution context (playground socket,
/// upstream run id, and the like).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RemoteBinding {
    pub trace_id: String,
    pub remote_kind: String,
    pub remote_id: String,
    #[serde(default)]
    pub meta: Value,
}

/// Required store surface.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn save_event(&self, event: &PlannerEvent) -> Result<(), StateStoreError>;

    /// Event history for a trace in deterministic order: by `seq` when
    /// present on the records, insertion order otherwise.
    async fn load_history(&self, trace_id: &str) -> Result<Vec<PlannerEvent>, StateStoreError>;

    async fn save_remote_binding(&self, binding: &RemoteBinding) -> Result<(), StateStoreError>;
}

/// Optional capability: durable planner-pause snapshots keyed by resume
/// token.
#[async_trait]
pub trait PlannerStateStore: Send + Sync {
    async fn save_planner_state(&self, token: &str, payload: &Value)
        -> Result<(), StateStoreError>;

    /// `Ok(None)` and `Ok(Some({}))` are both "missing" to the runtime, which
    /// tolerates legacy stores that return an empty object.
    async fn load_planner_state(&self, token: &str) -> Result<Option<Value>, StateStoreError>;
}

/// Optional capability: batched event writes.
#[async_trait]
pub trait BulkEventStore: Send + Sync {
    async fn save_events(&self, events: &[PlannerEvent]) -> Result<(), StateStoreError>;
}

/// Wiring-time bundle of the store and its detected capabilities.
///
/// Presence is typed: a capability is either wired or it is not; no call
/// probes with exceptions. All hot-path methods are infallible and count
/// faults instead of propagating them.
#[derive(Clone, Default)]
pub struct StateStoreHandle {
    base: Option<Arc<dyn StateStore>>,
    planner: Option<Arc<dyn PlannerStateStore>>,
    bulk: Option<Arc<dyn BulkEventStore>>,
    faults: Arc<AtomicU64>,
}

impl StateStoreHandle {
    /// No store wired; every offer is a no-op.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(base: Arc<dyn StateStore>) -> Self {
        Self {
            base: Some(base),
            ..Self::default()
        }
    }

    pub fn with_planner_state(mut self, planner: Arc<dyn PlannerStateStore>) -> Self {
        self.planner = Some(planner);
        self
    }

    pub fn with_bulk(mut self, bulk: Arc<dyn BulkEventStore>) -> Self {
        self.bulk = Some(bulk);
        self
    }

    /// Wires the in-memory store with every capability it implements.
    pub fn in_memory() -> Self {
        let store = Arc::new(InMemoryStateStore::new());
        Self::new(store.clone())
            .with_planner_state(store.clone())
            .with_bulk(store)
    }

    pub fn has_store(&self) -> bool {
        self.base.is_some()
    }

    pub fn has_planner_state(&self) -> bool {
        self.planner.is_some()
    }

    /// Store faults swallowed so far (telemetry counter).
    pub fn fault_count(&self) -> u64 {
        self.faults.load(Ordering::Relaxed)
    }

    fn record_fault(&self, op: &str, error: &StateStoreError) {
        self.faults.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(target: "penguiflow::store", op, error = %error, "store_fault");
    }

    /// Offers one event; failures become telemetry.
    pub async fn offer_event(&self, event: &PlannerEvent) {
        if let Some(store) = &self.base {
            if let Err(e) = store.save_event(event).await {
                self.record_fault("save_event", &e);
            }
        }
    }

    /// Offers a batch, using the bulk capability when wired and falling back
    /// to per-event writes.
    pub async fn offer_events(&self, events: &[PlannerEvent]) {
        if events.is_empty() {
            return;
        }
        if let Some(bulk) = &self.bulk {
            if let Err(e) = bulk.save_events(events).await {
                self.record_fault("save_events", &e);
            }
            return;
        }
        for event in events {
            self.offer_event(event).await;
        }
    }

    pub async fn load_history(&self, trace_id: &str) -> Vec<PlannerEvent> {
        match &self.base {
            None => Vec::new(),
            Some(store) => match store.load_history(trace_id).await {
                Ok(history) => history,
                Err(e) => {
                    self.record_fault("load_history", &e);
                    Vec::new()
                }
            },
        }
    }

    pub async fn offer_remote_binding(&self, binding: &RemoteBinding) {
        if let Some(store) = &self.base {
            if let Err(e) = store.save_remote_binding(binding).await {
                self.record_fault("save_remote_binding", &e);
            }
        }
    }

    /// Persists a pause snapshot. Returns whether the snapshot is durable
    /// (a planner-state capability is wired and the write succeeded).
    pub async fn save_planner_state(&self, token: &str, payload: &Value) -> bool {
        match &self.planner {
            None => false,
            Some(store) => match store.save_planner_state(token, payload).await {
                Ok(()) => true,
                Err(e) => {
                    self.record_fault("save_planner_state", &e);
                    false
                }
            },
        }
    }

    /// Loads a pause snapshot; empty objects read as missing.
    pub async fn load_planner_state(&self, token: &str) -> Option<Value> {
        let store = self.planner.as_ref()?;
        match store.load_planner_state(token).await {
            Ok(Some(Value::Object(map))) if map.is_empty() => None,
            Ok(found) => found,
            Err(e) => {
                self.record_fault("load_planner_state", &e);
                None
            }
        }
    }
}
