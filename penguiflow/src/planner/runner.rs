//! The planner loop: decide, act, observe, reflect, finish or pause.
//!
//! Deterministic given the same model outputs. All failure reaches the model
//! as observations; the run only fails for planner-level faults (provider
//! errors, vision mismatch) or cancellation.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use flow_event::EventKind;

use crate::artifacts::ArtifactScope;
use crate::bus::EventBus;
use crate::catalog::{ToolCatalog, ToolDescriptor, Visibility};
use crate::dispatch::{StepContext, ToolDispatcher};
use crate::limits::RuntimeLimits;
use crate::llm::PlannerLlm;
use crate::message::Message;
use crate::pause::{PauseController, PauseRecord};
use crate::planner::{Action, PlannerState, StepObservation};
use crate::query::Query;
use crate::session::{SessionController, TaskStatus};
use crate::trajectory::{StepDraft, TrajectoryRecorder};

/// System prompt seeding every run's message list.
pub const PLANNER_SYSTEM_PROMPT: &str = "You are a planning agent. Each turn, reply with exactly \
one action: think to reason, plan to call tools, finish to answer, or pause to wait for outside \
input. Use only the tools listed; observations are the results of your previous plan.";

const BUDGET_FALLBACK_ANSWER: &str =
    "The planning budget ran out before the task completed; no answer was produced.";

/// Terminal result of one trace.
#[derive(Clone, Debug, PartialEq)]
pub enum RunOutcome {
    Finished {
        answer: String,
        answer_action_seq: u64,
    },
    Paused {
        resume_token: String,
        reason: String,
    },
    Failed {
        class: String,
        message: String,
    },
    Cancelled,
}

/// Reflection knobs. The reflector model inherits the primary unless a
/// dedicated one is wired.
#[derive(Clone, Debug)]
pub struct ReflectionConfig {
    pub enabled: bool,
    pub max_revisions: u32,
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_revisions: 1,
        }
    }
}

/// Constructor-injected dependencies of the planner.
pub struct PlannerSeams {
    pub llm: Arc<dyn PlannerLlm>,
    /// Optional dedicated reflection model; defaults to `llm`.
    pub reflector: Option<Arc<dyn PlannerLlm>>,
    pub catalog: Arc<ToolCatalog>,
    pub dispatcher: Arc<ToolDispatcher>,
    pub bus: Arc<EventBus>,
    pub trajectory: Arc<TrajectoryRecorder>,
    pub pause: Arc<PauseController>,
    pub session: Option<Arc<SessionController>>,
}

/// The ReAct planner.
pub struct Planner {
    seams: PlannerSeams,
    limits: RuntimeLimits,
    reflection: ReflectionConfig,
}

impl Planner {
    pub fn new(seams: PlannerSeams, limits: RuntimeLimits, reflection: ReflectionConfig) -> Self {
        Self {
            seams,
            limits,
            reflection,
        }
    }

    /// Runs one query to a terminal outcome.
    pub async fn run_query(
        &self,
        query: Query,
        trace_id: String,
        cancel: CancellationToken,
    ) -> RunOutcome {
        if let Some(session) = &self.seams.session {
            session
                .register_task(&query.session_id, &trace_id, &trace_id)
                .await;
        }
        if !query.images.is_empty() && !self.seams.llm.profile().supports_vision {
            return self
                .fail(
                    &trace_id,
                    "VisionUnsupported",
                    "the configured model does not accept image attachments",
                )
                .await;
        }
        let state = PlannerState::initial(
            trace_id,
            query,
            PLANNER_SYSTEM_PROMPT,
            self.limits.max_hops,
        );
        self.drive(state, cancel).await
    }

    /// Continues a paused run. `extra` (e.g. a form submission) becomes the
    /// next observation before the loop re-enters planning.
    pub async fn resume_run(
        &self,
        record: PauseRecord,
        extra: Option<Value>,
        cancel: CancellationToken,
    ) -> RunOutcome {
        self.seams.bus.reopen(&record.trace_id).await;
        let mut state = match record.state() {
            Ok(state) => state,
            Err(e) => {
                return self
                    .fail(&record.trace_id, "SnapshotDecode", &e.to_string())
                    .await;
            }
        };
        if let Some(session) = &self.seams.session {
            session
                .update_status(&state.query.session_id, &state.trace_id, TaskStatus::Running)
                .await;
        }
        if let Some(extra) = extra {
            let resumed_action = if state.pending_calls.is_empty() {
                Action::think("resume input received")
            } else {
                Action::plan(state.pending_calls.clone())
            };
            state.messages.push(Message::observation(extra.clone()));
            self.seams.trajectory.append(
                &state.trace_id,
                StepDraft::new(resumed_action)
                    .with_observation(extra)
                    .with_metadata("resumed", Value::Bool(true)),
            );
            state.pending_calls.clear();
        }
        self.drive(state, cancel).await
    }

    /// The loop. Phases: drain steering → budget check → decide → execute.
    async fn drive(&self, mut state: PlannerState, cancel: CancellationToken) -> RunOutcome {
        let trace_id = state.trace_id.clone();
        let scope = scope_for(&state);
        let visibility = visibility_for(&state.query);
        let tools = self.visible_tools(&state.query, &visibility);
        let step_cap: Option<Arc<Semaphore>> = state
            .query
            .hints
            .max_parallel
            .map(|n| Arc::new(Semaphore::new(n.max(1))));

        loop {
            if cancel.is_cancelled() {
                return self.cancelled(&trace_id).await;
            }

            self.drain_steering(&mut state).await;

            if state.hops_remaining == 0 {
                return self.forced_finish(&mut state, &cancel).await;
            }

            let action = tokio::select! {
                _ = cancel.cancelled() => return self.cancelled(&trace_id).await,
                decided = self.seams.llm.decide(&state.messages, &tools) => match decided {
                    Ok(action) => action,
                    Err(e) => return self.fail(&trace_id, "LlmError", &e.to_string()).await,
                },
            };

            let action_seq = state.next_action_seq;
            state.next_action_seq += 1;
            let started = Instant::now();
            tracing::debug!(
                target: "penguiflow::planner",
                %trace_id,
                action_seq,
                kind = action.kind(),
                hops_remaining = state.hops_remaining,
                "action decided"
            );

            match action {
                Action::Think { ref text } => {
                    self.seams
                        .bus
                        .emit(
                            &trace_id,
                            EventKind::Thinking,
                            None,
                            serde_json::json!({"text": text, "action_seq": action_seq}),
                        )
                        .await;
                    state.messages.push(Message::assistant(text.clone()));
                    state.last_draft = Some(text.clone());
                    self.seams.trajectory.append(
                        &trace_id,
                        StepDraft::new(action.clone())
                            .with_latency_ms(started.elapsed().as_millis() as u64)
                            .with_metadata("action_seq", action_seq.into()),
                    );
                    state.hops_remaining -= 1;
                }
                Action::Plan { ref parallel } => {
                    self.seams
                        .bus
                        .emit(
                            &trace_id,
                            EventKind::StepStart,
                            None,
                            serde_json::json!({
                                "action_seq": action_seq,
                                "hops_remaining": state.hops_remaining,
                            }),
                        )
                        .await;

                    let step_ctx = StepContext {
                        trace_id: trace_id.clone(),
                        scope: scope.clone(),
                        visibility: visibility.clone(),
                        cancel: cancel.child_token(),
                        deadline: None,
                        step_cap: step_cap.clone(),
                        tool_context: state.query.tool_context.clone(),
                    };
                    // Order-preserving join: results come back in declared
                    // call order regardless of completion order.
                    let outcomes = join_all(
                        parallel
                            .iter()
                            .map(|call| self.seams.dispatcher.dispatch(call, &step_ctx)),
                    )
                    .await;
                    if cancel.is_cancelled() {
                        return self.cancelled(&trace_id).await;
                    }

                    let observation = StepObservation::from_outcomes(&outcomes).to_value();
                    state.messages.push(Message::observation(observation.clone()));
                    let latency_ms = started.elapsed().as_millis() as u64;
                    self.seams.trajectory.append(
                        &trace_id,
                        StepDraft::new(action.clone())
                            .with_observation(observation)
                            .with_latency_ms(latency_ms)
                            .with_metadata("action_seq", action_seq.into()),
                    );
                    self.seams
                        .bus
                        .emit(
                            &trace_id,
                            EventKind::StepEnd,
                            None,
                            serde_json::json!({
                                "action_seq": action_seq,
                                "latency_ms": latency_ms,
                            }),
                        )
                        .await;
                    state.hops_remaining -= 1;
                }
                Action::Finish { answer, sources } => {
                    return self
                        .finish(&mut state, answer, sources, self.reflection.enabled, &cancel)
                        .await;
                }
                Action::Pause { reason, payload } => {
                    return self.pause_run(&mut state, &reason, payload).await;
                }
            }
        }
    }

    /// Streams the gated answer, reflecting when enabled, and emits `done`.
    async fn finish(
        &self,
        state: &mut PlannerState,
        answer: String,
        sources: Vec<String>,
        reflect: bool,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        let trace_id = state.trace_id.clone();
        let mut answer = answer;
        let mut gate = state.next_finish_seq;
        state.next_finish_seq += 1;

        if reflect {
            let reflector = self
                .seams
                .reflector
                .clone()
                .unwrap_or_else(|| Arc::clone(&self.seams.llm));
            loop {
                if cancel.is_cancelled() {
                    return self.cancelled(&trace_id).await;
                }
                // Draft chunks: not final, buffered by adapters until the
                // gate resolves.
                self.stream_answer(&trace_id, gate, &answer, false).await;
                if state.revisions_done >= self.reflection.max_revisions {
                    break;
                }
                let reflection = match reflector.reflect(&state.messages, &answer).await {
                    Ok(reflection) => reflection,
                    Err(e) => {
                        tracing::warn!(
                            target: "penguiflow::planner",
                            %trace_id,
                            error = %e,
                            "reflection failed, accepting draft"
                        );
                        break;
                    }
                };
                match reflection.revise {
                    None => break,
                    Some(revised) => {
                        state.revisions_done += 1;
                        gate = state.next_finish_seq;
                        state.next_finish_seq += 1;
                        self.seams
                            .bus
                            .emit(
                                &trace_id,
                                EventKind::Revision,
                                None,
                                serde_json::json!({
                                    "action_seq": gate,
                                    "text": revised,
                                    "score": reflection.score,
                                    "critique": reflection.critique,
                                }),
                            )
                            .await;
                        answer = revised;
                    }
                }
            }
        } else {
            self.stream_answer(&trace_id, gate, &answer, true).await;
        }

        state.last_draft = Some(answer.clone());
        self.seams.trajectory.append(
            &trace_id,
            StepDraft::new(Action::finish_with_sources(answer.clone(), sources.clone()))
                .with_metadata("answer_action_seq", gate.into()),
        );
        // Status update lands before `done`; the terminal event closes the
        // trace for subscribers.
        if let Some(session) = &self.seams.session {
            session
                .update_status(&state.query.session_id, &trace_id, TaskStatus::Completed)
                .await;
        }
        self.seams
            .bus
            .emit(
                &trace_id,
                EventKind::Done,
                None,
                serde_json::json!({
                    "answer_action_seq": gate,
                    "answer": answer,
                    "sources": sources,
                }),
            )
            .await;
        RunOutcome::Finished {
            answer,
            answer_action_seq: gate,
        }
    }

    /// Budget exhausted: diagnostic, then a forced finish with the best
    /// content available.
    async fn forced_finish(&self, state: &mut PlannerState, cancel: &CancellationToken) -> RunOutcome {
        let trace_id = state.trace_id.clone();
        self.seams
            .bus
            .emit(
                &trace_id,
                EventKind::StateUpdate,
                None,
                serde_json::json!({
                    "update": "diagnostic",
                    "diagnostic": "budget_exhausted",
                }),
            )
            .await;
        let answer = state
            .last_draft
            .clone()
            .or_else(|| state.last_assistant_text().map(str::to_string))
            .unwrap_or_else(|| BUDGET_FALLBACK_ANSWER.to_string());
        self.finish(state, answer, Vec::new(), false, cancel).await
    }

    /// Pause: snapshot, persist, emit `pause` and a closing `done` carrying
    /// the pause object.
    async fn pause_run(
        &self,
        state: &mut PlannerState,
        reason: &str,
        payload: Value,
    ) -> RunOutcome {
        let trace_id = state.trace_id.clone();
        let record = match self.seams.pause.pause(reason, payload.clone(), state).await {
            Ok(record) => record,
            Err(e) => return self.fail(&trace_id, "PauseFailed", &e.to_string()).await,
        };
        self.seams.trajectory.append(
            &trace_id,
            StepDraft::new(Action::pause(reason, payload.clone()))
                .with_metadata("resume_token", record.resume_token.clone().into()),
        );
        self.seams
            .bus
            .emit(
                &trace_id,
                EventKind::Pause,
                None,
                serde_json::json!({
                    "resume_token": record.resume_token,
                    "reason": reason,
                    "payload": payload,
                }),
            )
            .await;
        if let Some(session) = &self.seams.session {
            session
                .update_status(&state.query.session_id, &trace_id, TaskStatus::Paused)
                .await;
        }
        self.seams
            .bus
            .emit(
                &trace_id,
                EventKind::Done,
                None,
                serde_json::json!({
                    "answer_action_seq": Value::Null,
                    "pause": {"resume_token": record.resume_token, "reason": reason},
                }),
            )
            .await;
        RunOutcome::Paused {
            resume_token: record.resume_token,
            reason: reason.to_string(),
        }
    }

    async fn stream_answer(&self, trace_id: &str, gate: u64, answer: &str, is_final: bool) {
        let pieces = chunk_text(answer, self.limits.answer_chunk_chars);
        let count = pieces.len();
        for (i, piece) in pieces.into_iter().enumerate() {
            self.seams
                .bus
                .emit(
                    trace_id,
                    EventKind::Chunk,
                    None,
                    serde_json::json!({
                        "channel": "answer",
                        "text": piece,
                        "done": i + 1 == count,
                        "action_seq": gate,
                        "final": is_final,
                    }),
                )
                .await;
        }
    }

    async fn drain_steering(&self, state: &mut PlannerState) {
        let Some(session) = &self.seams.session else {
            return;
        };
        for signal in session
            .drain_steering(&state.query.session_id, &state.trace_id)
            .await
        {
            let text = signal
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            state
                .messages
                .push(Message::user(format!("[steering] {text}")));
        }
    }

    /// Catalog listing for the run: visibility filtering plus
    /// `preferred_nodes` surfacing.
    fn visible_tools(&self, query: &Query, visibility: &Visibility) -> Vec<Arc<ToolDescriptor>> {
        let mut tools = self.seams.catalog.list(visibility);
        if !query.hints.preferred_nodes.is_empty() {
            let preferred: HashSet<&str> = query
                .hints
                .preferred_nodes
                .iter()
                .map(String::as_str)
                .collect();
            tools.sort_by_key(|d| !preferred.contains(d.name.as_str()));
        }
        tools
    }

    async fn fail(&self, trace_id: &str, class: &str, message: &str) -> RunOutcome {
        self.mark_failed(trace_id).await;
        self.seams
            .bus
            .emit(
                trace_id,
                EventKind::Error,
                None,
                serde_json::json!({
                    "class": class,
                    "message": message,
                    "trace_id": trace_id,
                }),
            )
            .await;
        tracing::warn!(target: "penguiflow::planner", %trace_id, class, message, "run failed");
        RunOutcome::Failed {
            class: class.to_string(),
            message: message.to_string(),
        }
    }

    async fn cancelled(&self, trace_id: &str) -> RunOutcome {
        self.mark_failed(trace_id).await;
        self.seams
            .bus
            .emit(
                trace_id,
                EventKind::Error,
                None,
                serde_json::json!({
                    "class": "Cancelled",
                    "message": "cancelled",
                    "trace_id": trace_id,
                }),
            )
            .await;
        RunOutcome::Cancelled
    }

    /// Tasks are registered with `task_id == trace_id`; failure paths flip
    /// the task state before the terminal event closes the trace.
    async fn mark_failed(&self, trace_id: &str) {
        if let Some(session) = &self.seams.session {
            if let Some(task) = session.find_task(trace_id) {
                session
                    .update_status(&task.session_id, trace_id, TaskStatus::Failed)
                    .await;
            }
        }
    }
}

fn scope_for(state: &PlannerState) -> ArtifactScope {
    ArtifactScope {
        tenant_id: state.query.tenant_id.clone(),
        user_id: state.query.user_id.clone(),
        session_id: Some(state.query.session_id.clone()),
        trace_id: Some(state.trace_id.clone()),
    }
}

fn visibility_for(query: &Query) -> Visibility {
    Visibility {
        disallow: query.hints.disallow_nodes.iter().cloned().collect(),
        ..Visibility::default()
    }
}

/// Splits text into chunks of at most `size` characters (at least one chunk).
fn chunk_text(text: &str, size: usize) -> Vec<String> {
    if text.is_empty() {
        return vec![String::new()];
    }
    let size = size.max(1);
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(size)
        .map(|piece| piece.iter().collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: chunking covers the whole text and respects the size.
    #[test]
    fn chunk_text_covers_input() {
        let pieces = chunk_text("abcdefg", 3);
        assert_eq!(pieces, vec!["abc", "def", "g"]);
        assert_eq!(chunk_text("", 3), vec![String::new()]);
        assert_eq!(chunk_text("xy", 10), vec!["xy"]);
    }

    /// **Scenario**: visibility derives its disallow set from hints.
    #[test]
    fn visibility_from_hints() {
        let mut query = Query::new("q", "s");
        query.hints.disallow_nodes = vec!["net.fetch".to_string()];
        let visibility = visibility_for(&query);
        assert!(visibility.disallow.contains("net.fetch"));
        assert!(visibility.allow.is_none());
    }
}
