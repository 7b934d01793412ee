//! # PenguiFlow
//!
//! An agent-orchestration runtime: a single query is expanded by a ReAct
//! planner into a dynamic sequence of tool invocations, each producing a
//! structured observation fed back to the model until a terminating answer.
//! The crate is the core that keeps that loop correct under concurrency,
//! failure, and pause/resume.
//!
//! ## Design principles
//!
//! - **One-way event flow**: the planner and dispatcher emit onto a per-trace
//!   [`EventBus`]; streaming adapters and stores subscribe. Nothing points
//!   back at the planner.
//! - **Observations are the only failure channel**: tool-layer failures reach
//!   the model as structured [`ToolError`] observations, never as exceptions
//!   or stack traces.
//! - **Constructor-injected seams**: the LLM, artifact store, state store,
//!   and external transport are trait objects wired once by the
//!   [`PenguiFlow`] builder; capability detection happens at wiring time.
//! - **Artifacts never enter model context**: schema-marked and sniffed
//!   binary fields are redacted to compact references before the planner
//!   observes them.
//!
//! ## Main modules
//!
//! - [`planner`]: [`Planner`], [`Action`], [`PlannerState`] — the ReAct state
//!   machine with reflection, hop budget, and the answer gate.
//! - [`dispatch`]: [`ToolDispatcher`], [`ToolContext`], [`CallRetryPolicy`] —
//!   bounded, retried, validated tool invocation.
//! - [`catalog`] / [`registry`]: tool metadata and structural schema
//!   validation ([`ToolCatalog`], [`SchemaRegistry`]).
//! - [`artifacts`]: [`ArtifactStore`], [`InMemoryArtifactStore`],
//!   [`ArtifactRedactor`], [`ObservationClamp`].
//! - [`bus`]: [`EventBus`], per-trace ordered fan-out with backpressure.
//! - [`trajectory`]: append-only per-trace [`Step`] log.
//! - [`pause`]: [`PauseController`], durable pause/resume records.
//! - [`store`]: [`StateStore`] contract, capability traits, in-memory impl.
//! - [`streaming`]: SSE and typed run-event adapters over the bus.
//! - [`session`]: session/task scoping and steering input.
//! - [`runtime`]: the [`PenguiFlow`] composition root and [`RunHandle`].
//!
//! Key types are re-exported at the crate root:
//! `use penguiflow::{PenguiFlow, Query, Action, MockLlm};`.

pub mod artifacts;
pub mod bus;
pub mod catalog;
pub mod dispatch;
pub mod limits;
pub mod llm;
pub mod message;
pub mod pause;
pub mod planner;
pub mod query;
pub mod registry;
pub mod runtime;
pub mod session;
pub mod store;
pub mod streaming;
pub mod tools;
pub mod trajectory;

pub use artifacts::{
    ArtifactRedactor, ArtifactRef, ArtifactScope, ArtifactStore, InMemoryArtifactStore,
    ObservationClamp,
};
pub use bus::{EventBus, Subscription};
pub use catalog::{LoadingMode, SideEffects, ToolCatalog, ToolDescriptor};
pub use dispatch::{CallRetryPolicy, ToolContext, ToolDispatcher, ToolError, ToolErrorClass};
pub use limits::RuntimeLimits;
pub use llm::{MockLlm, ModelProfile, PlannerLlm, Reflection};
pub use message::Message;
pub use pause::{PauseController, PauseRecord, PendingInteraction};
pub use planner::{Action, PlannedCall, Planner, PlannerState, RunOutcome};
pub use query::{PlanningHints, Query};
pub use registry::SchemaRegistry;
pub use runtime::{PenguiFlow, RunHandle};
pub use session::{SessionController, TaskState, TaskStatus};
pub use store::{InMemoryStateStore, StateStore, StateStoreHandle};
pub use tools::{FnTool, Tool, ToolFailure, ToolImpl};
pub use trajectory::{Step, TrajectoryRecorder};
