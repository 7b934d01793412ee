//! Pause/resume controller: opaque resume tokens, snapshot persistence, and
//! expiry-as-missing semantics.
//!
//! Snapshots go through the state store's planner-state capability when one
//! is wired, making resumes work across processes; otherwise the pause is
//! local to this process. Missing and expired records are indistinguishable.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use crate::planner::PlannerState;
use crate::store::StateStoreHandle;

/// Pause/resume errors.
#[derive(Debug, Error)]
pub enum PauseError {
    /// Token unknown, already consumed, or expired — deliberately one error.
    #[error("pause record not found")]
    PauseNotFound,
    #[error("pause snapshot encode: {0}")]
    Encode(String),
    #[error("pause snapshot decode: {0}")]
    Decode(String),
}

/// Durable record for one paused run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PauseRecord {
    pub resume_token: String,
    pub trace_id: String,
    pub session_id: String,
    pub reason: String,
    pub payload: Value,
    /// Expiry wall-clock; accessing an expired record reads as missing.
    pub expires_at_ms: i64,
    /// Serialized [`PlannerState`].
    pub planner_state: Value,
}

impl PauseRecord {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at_ms
    }

    /// Decodes the snapshot back into planner state.
    pub fn state(&self) -> Result<PlannerState, PauseError> {
        serde_json::from_value(self.planner_state.clone())
            .map_err(|e| PauseError::Decode(e.to_string()))
    }
}

/// Interactive-component pause bookkeeping: created at tool-call start for
/// interactive components, destroyed on resume or expiry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PendingInteraction {
    pub tool_call_id: String,
    pub tool_name: String,
    /// Component kind (form, confirm, select_option, ...).
    pub component: String,
    pub props: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_token: Option<String>,
    pub created_at_ms: i64,
}

/// Mints tokens, persists snapshots, loads them back exactly once.
pub struct PauseController {
    store: StateStoreHandle,
    local: DashMap<String, PauseRecord>,
    interactions: DashMap<String, PendingInteraction>,
    ttl: Duration,
}

impl PauseController {
    pub fn new(store: StateStoreHandle, ttl: Duration) -> Self {
        Self {
            store,
            local: DashMap::new(),
            interactions: DashMap::new(),
            ttl,
        }
    }

    /// Opaque unguessable token: 256 bits of uuid entropy behind a stable
    /// prefix.
    fn mint_token() -> String {
        format!(
            "pfr_{}{}",
            uuid::Uuid::new_v4().simple(),
            uuid::Uuid::new_v4().simple()
        )
    }

    /// Snapshots `state` and persists it under a fresh token. The record is
    /// always kept locally; durability across processes depends on the wired
    /// store capability.
    pub async fn pause(
        &self,
        reason: &str,
        payload: Value,
        state: &PlannerState,
    ) -> Result<PauseRecord, PauseError> {
        let planner_state =
            serde_json::to_value(state).map_err(|e| PauseError::Encode(e.to_string()))?;
        let record = PauseRecord {
            resume_token: Self::mint_token(),
            trace_id: state.trace_id.clone(),
            session_id: state.query.session_id.clone(),
            reason: reason.to_string(),
            payload,
            expires_at_ms: chrono::Utc::now().timestamp_millis() + self.ttl.as_millis() as i64,
            planner_state,
        };
        let record_value =
            serde_json::to_value(&record).map_err(|e| PauseError::Encode(e.to_string()))?;
        let durable = self
            .store
            .save_planner_state(&record.resume_token, &record_value)
            .await;
        if !durable {
            tracing::debug!(
                target: "penguiflow::pause",
                trace_id = %record.trace_id,
                "pause snapshot is local-only (no planner-state store capability)"
            );
        }
        self.local.insert(record.resume_token.clone(), record.clone());
        Ok(record)
    }

    /// Takes the record for `token`, consuming it. Expired or unknown tokens
    /// fail identically with [`PauseError::PauseNotFound`].
    pub async fn resume(&self, token: &str) -> Result<PauseRecord, PauseError> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let record = match self.local.remove(token) {
            Some((_, record)) => Some(record),
            None => match self.store.load_planner_state(token).await {
                Some(value) => serde_json::from_value::<PauseRecord>(value).ok(),
                None => None,
            },
        };
        let record = record.ok_or(PauseError::PauseNotFound)?;
        if record.is_expired(now_ms) {
            return Err(PauseError::PauseNotFound);
        }
        // Consume the durable copy: an empty object reads as missing.
        self.store
            .save_planner_state(token, &serde_json::json!({}))
            .await;
        if let Some(interaction_key) = self
            .interactions
            .iter()
            .find(|e| e.value().resume_token.as_deref() == Some(token))
            .map(|e| e.key().clone())
        {
            self.interactions.remove(&interaction_key);
        }
        Ok(record)
    }

    /// Registers an interactive-component pause for a tool call.
    pub fn register_interaction(&self, interaction: PendingInteraction) {
        self.interactions
            .insert(interaction.tool_call_id.clone(), interaction);
    }

    pub fn interaction(&self, tool_call_id: &str) -> Option<PendingInteraction> {
        self.interactions
            .get(tool_call_id)
            .map(|e| e.value().clone())
    }
}
