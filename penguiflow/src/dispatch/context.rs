//! Per-call context handed to tools: scoped artifact access, a chunk
//! side-channel, deadline and cancellation, and the run's scope metadata.
//!
//! Artifact puts through the context emit `artifact_stored` for fresh writes;
//! tools never talk to the bus directly.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Instant;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use flow_event::EventKind;

use crate::artifacts::{ArtifactError, ArtifactRef, ArtifactScope, ArtifactStore, PutRequest};
use crate::bus::EventBus;

/// Context for one tool invocation.
pub struct ToolContext {
    call_id: String,
    tool: String,
    trace_id: String,
    scope: ArtifactScope,
    artifacts: Arc<dyn ArtifactStore>,
    bus: Arc<EventBus>,
    cancel: CancellationToken,
    deadline: Option<Instant>,
    /// Per-stream sequence counters for `emit_chunk`.
    chunk_seqs: Mutex<HashMap<String, u64>>,
    tool_context: BTreeMap<String, Value>,
}

impl ToolContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        call_id: String,
        tool: String,
        trace_id: String,
        scope: ArtifactScope,
        artifacts: Arc<dyn ArtifactStore>,
        bus: Arc<EventBus>,
        cancel: CancellationToken,
        deadline: Option<Instant>,
        tool_context: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            call_id,
            tool,
            trace_id,
            scope,
            artifacts,
            bus,
            cancel,
            deadline,
            chunk_seqs: Mutex::new(HashMap::new()),
            tool_context,
        }
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Scope metadata of the run (tenant/user/session/trace).
    pub fn scope(&self) -> &ArtifactScope {
        &self.scope
    }

    /// Free-form per-query tool context passed through from the caller.
    pub fn tool_context(&self) -> &BTreeMap<String, Value> {
        &self.tool_context
    }

    /// Deadline for this call, when one applies. Tools doing long work should
    /// poll [`Self::is_cancelled`] or check the remaining time.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; `None` when unbounded.
    pub fn remaining(&self) -> Option<std::time::Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
            || self
                .remaining()
                .is_some_and(|left| left == std::time::Duration::ZERO)
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Stores bytes under the run's scope. Emits `artifact_stored` when the
    /// bytes are new to the store.
    pub async fn put_bytes(&self, mut request: PutRequest) -> Result<ArtifactRef, ArtifactError> {
        if request.scope == ArtifactScope::default() {
            request.scope = self.scope.clone();
        }
        let outcome = self.artifacts.put_bytes(request).await?;
        if outcome.newly_stored {
            self.emit_artifact_stored(&outcome.reference).await;
        }
        Ok(outcome.reference)
    }

    /// UTF-8 text convenience over [`Self::put_bytes`].
    pub async fn put_text(
        &self,
        text: impl Into<String>,
        mime: &str,
    ) -> Result<ArtifactRef, ArtifactError> {
        self.put_bytes(PutRequest::text(text).with_mime(mime)).await
    }

    pub async fn get_artifact(&self, id: &str) -> Result<Vec<u8>, ArtifactError> {
        self.artifacts.get(id).await
    }

    pub(crate) async fn emit_artifact_stored(&self, reference: &ArtifactRef) {
        self.bus
            .emit(
                &self.trace_id,
                EventKind::ArtifactStored,
                Some(self.tool.clone()),
                serde_json::json!({
                    "id": reference.id,
                    "mime_type": reference.mime_type,
                    "size_bytes": reference.size_bytes,
                    "filename": reference.filename,
                }),
            )
            .await;
    }

    /// Emits one frame on a named chunk stream (`artifact_chunk` events).
    /// Frame sequence numbers are per stream, starting at 0.
    pub async fn emit_chunk(&self, stream_id: &str, chunk: Value, done: bool) {
        let seq = {
            let mut seqs = self.chunk_seqs.lock().expect("chunk seq lock");
            let next = seqs.entry(stream_id.to_string()).or_insert(0);
            let seq = *next;
            *next += 1;
            seq
        };
        self.bus
            .emit(
                &self.trace_id,
                EventKind::ArtifactChunk,
                Some(self.tool.clone()),
                serde_json::json!({
                    "stream_id": stream_id,
                    "seq": seq,
                    "done": done,
                    "chunk": chunk,
                }),
            )
            .await;
    }
}
