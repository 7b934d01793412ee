//! Event bus: per-trace ordered event log with multi-subscriber fan-out.
//!
//! One logical writer per trace (the planner task and the tool tasks it owns)
//! serialized by a per-trace lock; `seq` is assigned under that lock, so
//! `(trace_id, seq)` is a contiguous total order. Subscribers get bounded
//! buffers: lossy kinds are dropped when a subscriber lags (reported to that
//! subscriber once per lag episode), preserved kinds make the producer wait.
//!
//! Every emitted event is offered to the state store through the infallible
//! guard; persistence failures never reach the hot path.

use std::collections::VecDeque;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::ReceiverStream;

use flow_event::{validate_payload, EventKind, PlannerEvent};

use crate::store::StateStoreHandle;

/// Bus sizing knobs.
#[derive(Clone, Debug)]
pub struct BusConfig {
    /// Per-subscriber bounded buffer.
    pub subscriber_buffer: usize,
    /// Retained tail per trace, serving late subscribers.
    pub retention_events: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: 256,
            retention_events: 2_048,
        }
    }
}

struct SubscriberSlot {
    tx: mpsc::Sender<PlannerEvent>,
    /// Lossy events dropped since the last delivered diagnostic.
    dropped: u64,
    first_dropped_seq: Option<u64>,
}

impl SubscriberSlot {
    fn pending_diagnostic(&self, trace_id: &str, seq: u64) -> Option<PlannerEvent> {
        if self.dropped == 0 {
            return None;
        }
        Some(PlannerEvent {
            event_id: uuid::Uuid::new_v4().to_string(),
            // Subscriber-local: reuses the triggering event's seq and is not
            // part of the trace log.
            seq,
            ts_ms: chrono::Utc::now().timestamp_millis(),
            trace_id: trace_id.to_string(),
            kind: EventKind::StateUpdate,
            node: Some("bus".to_string()),
            payload: serde_json::json!({
                "update": "diagnostic",
                "diagnostic": "subscriber_lagged",
                "dropped": self.dropped,
                "first_dropped_seq": self.first_dropped_seq,
            }),
        })
    }

    fn record_drop(&mut self, seq: u64) {
        if self.dropped == 0 {
            self.first_dropped_seq = Some(seq);
        }
        self.dropped += 1;
    }

    fn clear_drops(&mut self) {
        self.dropped = 0;
        self.first_dropped_seq = None;
    }
}

#[derive(Default)]
struct TraceChannel {
    next_seq: u64,
    tail: VecDeque<PlannerEvent>,
    subscribers: Vec<SubscriberSlot>,
    closed: bool,
}

/// Per-trace ordered event log with backpressured fan-out.
pub struct EventBus {
    config: BusConfig,
    store: StateStoreHandle,
    traces: DashMap<String, Arc<Mutex<TraceChannel>>>,
}

impl EventBus {
    pub fn new(config: BusConfig, store: StateStoreHandle) -> Self {
        Self {
            config,
            store,
            traces: DashMap::new(),
        }
    }

    /// Bus with default sizing and no persistence.
    pub fn detached() -> Self {
        Self::new(BusConfig::default(), StateStoreHandle::none())
    }

    fn channel(&self, trace_id: &str) -> Arc<Mutex<TraceChannel>> {
        self.traces
            .entry(trace_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(TraceChannel::default())))
            .value()
            .clone()
    }

    /// Emits one event, assigning the next `seq`. Returns the built record.
    ///
    /// Emitting on a closed trace (after `done`/`error`) is a no-op returning
    /// the record unassigned to any subscriber; the caller is expected not to.
    pub async fn emit(
        &self,
        trace_id: &str,
        kind: EventKind,
        node: Option<String>,
        payload: Value,
    ) -> PlannerEvent {
        if let Err(e) = validate_payload(kind, &payload) {
            tracing::warn!(target: "penguiflow::bus", %trace_id, error = %e, "malformed event payload");
        }

        let channel = self.channel(trace_id);
        let mut guard = channel.lock().await;
        let event = PlannerEvent {
            event_id: uuid::Uuid::new_v4().to_string(),
            seq: guard.next_seq,
            ts_ms: chrono::Utc::now().timestamp_millis(),
            trace_id: trace_id.to_string(),
            kind,
            node,
            payload,
        };
        guard.next_seq += 1;

        guard.tail.push_back(event.clone());
        while guard.tail.len() > self.config.retention_events {
            guard.tail.pop_front();
        }

        self.store.offer_event(&event).await;

        let mut live: Vec<SubscriberSlot> = Vec::with_capacity(guard.subscribers.len());
        for mut slot in guard.subscribers.drain(..) {
            if deliver(&mut slot, trace_id, &event).await {
                live.push(slot);
            }
        }
        guard.subscribers = live;

        if kind.is_terminal() {
            guard.closed = true;
            guard.subscribers.clear();
        }
        event
    }

    /// Subscribes to a trace. With `since_seq`, retained events with
    /// `seq >= since_seq` are replayed first (bounded by retention);
    /// without it, delivery starts at the next emitted event.
    pub async fn subscribe(&self, trace_id: &str, since_seq: Option<u64>) -> Subscription {
        let channel = self.channel(trace_id);
        let mut guard = channel.lock().await;
        let replay: Vec<PlannerEvent> = match since_seq {
            None => Vec::new(),
            Some(since) => guard
                .tail
                .iter()
                .filter(|e| e.seq >= since)
                .cloned()
                .collect(),
        };
        let capacity = self.config.subscriber_buffer.max(replay.len() + 1);
        let (tx, rx) = mpsc::channel(capacity);
        for event in replay {
            // Capacity was sized for the replay; this cannot fail.
            let _ = tx.try_send(event);
        }
        if !guard.closed {
            guard.subscribers.push(SubscriberSlot {
                tx,
                dropped: 0,
                first_dropped_seq: None,
            });
        }
        Subscription {
            trace_id: trace_id.to_string(),
            rx,
        }
    }

    /// Reopens a trace closed by a terminal event so a resumed run can keep
    /// emitting; new subscribers attach live again.
    pub async fn reopen(&self, trace_id: &str) {
        let channel = self.channel(trace_id);
        channel.lock().await.closed = false;
    }

    /// Retained tail for a trace (most recent `retention_events`).
    pub async fn history(&self, trace_id: &str) -> Vec<PlannerEvent> {
        let channel = self.channel(trace_id);
        let guard = channel.lock().await;
        guard.tail.iter().cloned().collect()
    }

    /// Next `seq` to be assigned for a trace.
    pub async fn cursor(&self, trace_id: &str) -> u64 {
        let channel = self.channel(trace_id);
        let guard = channel.lock().await;
        guard.next_seq
    }
}

/// Delivers `event` to one subscriber respecting the drop policy. Returns
/// false when the subscriber is gone.
async fn deliver(slot: &mut SubscriberSlot, trace_id: &str, event: &PlannerEvent) -> bool {
    if event.kind.is_lossy() {
        if let Some(diag) = slot.pending_diagnostic(trace_id, event.seq) {
            match slot.tx.try_send(diag) {
                Ok(()) => slot.clear_drops(),
                Err(mpsc::error::TrySendError::Full(_)) => {
                    // Still lagging: this lossy event joins the dropped count.
                    slot.record_drop(event.seq);
                    return true;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => return false,
            }
        }
        match slot.tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                slot.record_drop(event.seq);
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    } else {
        // Preserved events: the producer waits for buffer space.
        if let Some(diag) = slot.pending_diagnostic(trace_id, event.seq) {
            if slot.tx.send(diag).await.is_err() {
                return false;
            }
            slot.clear_drops();
        }
        slot.tx.send(event.clone()).await.is_ok()
    }
}

/// One subscriber's ordered view of a trace.
pub struct Subscription {
    trace_id: String,
    rx: mpsc::Receiver<PlannerEvent>,
}

impl Subscription {
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Next event, or `None` once the trace closed and the buffer drained.
    pub async fn recv(&mut self) -> Option<PlannerEvent> {
        self.rx.recv().await
    }

    /// Adapts the subscription into a `Stream` for adapter pipelines.
    pub fn into_stream(self) -> ReceiverStream<PlannerEvent> {
        ReceiverStream::new(self.rx)
    }

    /// Drains whatever is ready without waiting.
    pub fn drain_ready(&mut self) -> Vec<PlannerEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            out.push(event);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chunk_payload(i: usize) -> Value {
        json!({"channel": "answer", "text": format!("c{i}"), "done": false})
    }

    /// **Scenario**: seq is contiguous from 0 and event ids are unique.
    #[tokio::test]
    async fn seq_contiguous_and_ids_unique() {
        let bus = EventBus::detached();
        let mut ids = std::collections::HashSet::new();
        for i in 0..5 {
            let ev = bus
                .emit("tr", EventKind::Thinking, None, json!({"text": format!("t{i}")}))
                .await;
            assert_eq!(ev.seq, i);
            assert!(ids.insert(ev.event_id));
        }
        assert_eq!(bus.cursor("tr").await, 5);
    }

    /// **Scenario**: a subscriber attached before emission receives events in
    /// seq order; a late subscriber replays the retained tail from since_seq.
    #[tokio::test]
    async fn subscribers_see_seq_order_and_replay() {
        let bus = EventBus::detached();
        let mut early = bus.subscribe("tr", None).await;
        for i in 0..3 {
            bus.emit("tr", EventKind::Thinking, None, json!({"text": format!("t{i}")}))
                .await;
        }
        let mut late = bus.subscribe("tr", Some(1)).await;

        for expected in 0..3 {
            assert_eq!(early.recv().await.unwrap().seq, expected);
        }
        assert_eq!(late.recv().await.unwrap().seq, 1);
        assert_eq!(late.recv().await.unwrap().seq, 2);
    }

    /// **Scenario**: a slow subscriber drops lossy chunks, keeps every
    /// preserved event in order, and receives exactly one lag diagnostic.
    #[tokio::test]
    async fn lossy_drop_with_single_diagnostic() {
        let bus = EventBus::new(
            BusConfig {
                subscriber_buffer: 4,
                retention_events: 128,
            },
            StateStoreHandle::none(),
        );
        let mut sub = bus.subscribe("tr", None).await;

        // Overflow the 4-slot buffer with 10 lossy chunks.
        for i in 0..10 {
            bus.emit("tr", EventKind::Chunk, None, chunk_payload(i)).await;
        }
        // Drain what made it through; frees the buffer.
        let drained = sub.drain_ready();
        assert_eq!(drained.len(), 4);
        assert!(drained.iter().all(|e| e.kind == EventKind::Chunk));

        // The next preserved event is preceded by exactly one diagnostic.
        bus.emit(
            "tr",
            EventKind::Done,
            None,
            json!({"answer_action_seq": 0}),
        )
        .await;
        let diag = sub.recv().await.unwrap();
        assert_eq!(diag.kind, EventKind::StateUpdate);
        assert_eq!(diag.payload["diagnostic"], "subscriber_lagged");
        assert_eq!(diag.payload["dropped"], 6);
        let done = sub.recv().await.unwrap();
        assert_eq!(done.kind, EventKind::Done);
        // Terminal event closes the stream.
        assert!(sub.recv().await.is_none());
    }

    /// **Scenario**: every emitted event is offered to the state store.
    #[tokio::test]
    async fn events_offered_to_store() {
        let handle = StateStoreHandle::in_memory();
        let bus = EventBus::new(BusConfig::default(), handle.clone());
        for i in 0..3 {
            bus.emit("tr", EventKind::Thinking, None, json!({"text": format!("{i}")}))
                .await;
        }
        assert_eq!(handle.load_history("tr").await.len(), 3);
        assert_eq!(handle.fault_count(), 0);
    }

    /// **Scenario**: subscribing after the terminal event replays the tail
    /// and then ends.
    #[tokio::test]
    async fn late_subscribe_after_close_ends() {
        let bus = EventBus::detached();
        bus.emit("tr", EventKind::Done, None, json!({"answer_action_seq": 0}))
            .await;
        let mut sub = bus.subscribe("tr", Some(0)).await;
        assert_eq!(sub.recv().await.unwrap().kind, EventKind::Done);
        assert!(sub.recv().await.is_none());
    }
}
