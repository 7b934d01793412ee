//! Composition root: wires the planner, dispatcher, stores, bus, and session
//! controller from injected seams, with in-memory defaults for everything
//! except the model.

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::artifacts::{
    ArtifactStore, ArtifactStoreConfig, InMemoryArtifactStore, ObservationClamp,
};
use crate::bus::{BusConfig, EventBus, Subscription};
use crate::catalog::{CatalogError, ToolCatalog, ToolDescriptor, ToolOrigin};
use crate::dispatch::{DispatcherConfig, ToolDispatcher};
use crate::limits::RuntimeLimits;
use crate::llm::PlannerLlm;
use crate::pause::{PauseController, PauseError};
use crate::planner::{Planner, PlannerSeams, ReflectionConfig, RunOutcome};
use crate::query::Query;
use crate::registry::{SchemaError, SchemaRegistry};
use crate::session::{SessionController, SteeringEvent};
use crate::store::StateStoreHandle;
use crate::tools::{ExternalTransport, Tool, ToolImpl, TransportConfig};
use crate::trajectory::TrajectoryRecorder;

/// Wiring errors surfaced at build time, before any query runs.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("a PlannerLlm must be wired before build()")]
    MissingLlm,
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// Builder for [`PenguiFlow`]. Tools are registered here; the catalog is
/// immutable after `build()`.
pub struct PenguiFlowBuilder {
    llm: Option<Arc<dyn PlannerLlm>>,
    reflector: Option<Arc<dyn PlannerLlm>>,
    limits: RuntimeLimits,
    artifacts: Option<Arc<dyn ArtifactStore>>,
    store: StateStoreHandle,
    transport: Option<Arc<dyn ExternalTransport>>,
    reflection: ReflectionConfig,
    reject_placeholders: bool,
    registrations: Vec<(String, ToolDescriptor, ToolImpl)>,
}

impl PenguiFlowBuilder {
    pub fn with_llm(mut self, llm: Arc<dyn PlannerLlm>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Dedicated reflection model; the primary is used otherwise.
    pub fn with_reflector(mut self, reflector: Arc<dyn PlannerLlm>) -> Self {
        self.reflector = Some(reflector);
        self
    }

    pub fn with_limits(mut self, limits: RuntimeLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_artifact_store(mut self, artifacts: Arc<dyn ArtifactStore>) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    pub fn with_state_store(mut self, store: StateStoreHandle) -> Self {
        self.store = store;
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn ExternalTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_reflection(mut self, reflection: ReflectionConfig) -> Self {
        self.reflection = reflection;
        self
    }

    /// Reject template placeholders in tool arguments instead of invoking.
    pub fn reject_placeholders(mut self) -> Self {
        self.reject_placeholders = true;
        self
    }

    /// Registers a native tool under `ns`; its descriptor supplies schemas
    /// and limits.
    pub fn register_tool(mut self, ns: &str, tool: Arc<dyn Tool>) -> Self {
        let descriptor = tool.descriptor();
        self.registrations
            .push((ns.to_string(), descriptor, ToolImpl::Native(tool)));
        self
    }

    /// Registers an externally-transported tool under `ns`.
    pub fn register_external_tool(
        mut self,
        ns: &str,
        mut descriptor: ToolDescriptor,
        config: TransportConfig,
    ) -> Self {
        descriptor.origin = ToolOrigin::External;
        self.registrations
            .push((ns.to_string(), descriptor, ToolImpl::External(config)));
        self
    }

    /// Wires everything. Fails fast on catalog/schema collisions.
    pub fn build(self) -> Result<PenguiFlow, BuildError> {
        let llm = self.llm.ok_or(BuildError::MissingLlm)?;
        let limits = self.limits;

        let artifacts: Arc<dyn ArtifactStore> = self.artifacts.unwrap_or_else(|| {
            Arc::new(InMemoryArtifactStore::new(ArtifactStoreConfig {
                max_artifact_bytes: limits.max_artifact_bytes,
                ..ArtifactStoreConfig::default()
            }))
        });
        let bus = Arc::new(EventBus::new(
            BusConfig {
                subscriber_buffer: limits.subscriber_buffer,
                retention_events: limits.retention_events,
            },
            self.store.clone(),
        ));
        let catalog = Arc::new(ToolCatalog::new());
        let registry = Arc::new(SchemaRegistry::new());
        let clamp = ObservationClamp {
            max_observation_chars: limits.max_observation_chars,
            auto_artifact_threshold: limits.auto_artifact_threshold,
            preview_chars: limits.observation_preview_chars,
        };
        let mut dispatcher = ToolDispatcher::new(
            Arc::clone(&catalog),
            Arc::clone(&registry),
            Arc::clone(&artifacts),
            Arc::clone(&bus),
            clamp,
            DispatcherConfig {
                parallel_cap: limits.parallel_cap,
                default_tool_concurrency: limits.tool_concurrency,
                reject_placeholders: self.reject_placeholders,
                ..DispatcherConfig::default()
            },
        );
        if let Some(transport) = self.transport {
            dispatcher = dispatcher.with_transport(transport);
        }
        let dispatcher = Arc::new(dispatcher);

        for (ns, descriptor, implementation) in self.registrations {
            let input_schema = descriptor.input_schema.clone();
            let output_schema = descriptor.output_schema.clone();
            let qualified = catalog.register(&ns, descriptor)?;
            registry.register(&qualified, &input_schema, &output_schema)?;
            dispatcher.bind(&qualified, implementation);
        }

        let trajectory = Arc::new(TrajectoryRecorder::new());
        let pause = Arc::new(PauseController::new(self.store.clone(), limits.pause_ttl));
        let session = Arc::new(SessionController::new(Arc::clone(&bus)));
        let planner = Arc::new(Planner::new(
            PlannerSeams {
                llm,
                reflector: self.reflector,
                catalog: Arc::clone(&catalog),
                dispatcher: Arc::clone(&dispatcher),
                bus: Arc::clone(&bus),
                trajectory: Arc::clone(&trajectory),
                pause: Arc::clone(&pause),
                session: Some(Arc::clone(&session)),
            },
            limits,
            self.reflection,
        ));

        Ok(PenguiFlow {
            planner,
            bus,
            catalog,
            registry,
            artifacts,
            trajectory,
            pause,
            session,
            dispatcher,
        })
    }
}

/// The wired runtime. One instance serves many queries.
pub struct PenguiFlow {
    planner: Arc<Planner>,
    bus: Arc<EventBus>,
    catalog: Arc<ToolCatalog>,
    registry: Arc<SchemaRegistry>,
    artifacts: Arc<dyn ArtifactStore>,
    trajectory: Arc<TrajectoryRecorder>,
    pause: Arc<PauseController>,
    session: Arc<SessionController>,
    dispatcher: Arc<ToolDispatcher>,
}

impl PenguiFlow {
    pub fn builder() -> PenguiFlowBuilder {
        PenguiFlowBuilder {
            llm: None,
            reflector: None,
            limits: RuntimeLimits::default(),
            artifacts: None,
            store: StateStoreHandle::none(),
            transport: None,
            reflection: ReflectionConfig::default(),
            reject_placeholders: false,
            registrations: Vec::new(),
        }
    }

    /// Accepts a query: spawns its planner task and returns the stream
    /// handle.
    pub fn run(&self, query: Query) -> RunHandle {
        let trace_id = format!("tr_{}", uuid::Uuid::new_v4().simple());
        let cancel = CancellationToken::new();
        let planner = Arc::clone(&self.planner);
        let join = tokio::spawn({
            let trace_id = trace_id.clone();
            let cancel = cancel.clone();
            async move { planner.run_query(query, trace_id, cancel).await }
        });
        RunHandle {
            trace_id,
            bus: Arc::clone(&self.bus),
            cancel,
            join,
        }
    }

    /// Resumes a paused run. The optional `result` becomes the next
    /// observation (e.g. the user's form submission).
    pub async fn resume(
        &self,
        resume_token: &str,
        result: Option<Value>,
    ) -> Result<RunHandle, PauseError> {
        let record = self.pause.resume(resume_token).await?;
        let trace_id = record.trace_id.clone();
        let cancel = CancellationToken::new();
        let planner = Arc::clone(&self.planner);
        let join = tokio::spawn({
            let cancel = cancel.clone();
            async move { planner.resume_run(record, result, cancel).await }
        });
        Ok(RunHandle {
            trace_id,
            bus: Arc::clone(&self.bus),
            cancel,
            join,
        })
    }

    /// Steering surface: returns whether the event was accepted.
    pub async fn steer(&self, event: SteeringEvent) -> bool {
        self.session.steer(event).await
    }

    pub fn artifacts(&self) -> &Arc<dyn ArtifactStore> {
        &self.artifacts
    }

    pub fn trajectory(&self) -> &Arc<TrajectoryRecorder> {
        &self.trajectory
    }

    pub fn catalog(&self) -> &Arc<ToolCatalog> {
        &self.catalog
    }

    pub fn registry(&self) -> &Arc<SchemaRegistry> {
        &self.registry
    }

    pub fn session(&self) -> &Arc<SessionController> {
        &self.session
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn dispatcher(&self) -> &Arc<ToolDispatcher> {
        &self.dispatcher
    }

    /// Subscribes to an arbitrary trace (late subscribers replay from
    /// `since_seq`).
    pub async fn events(&self, trace_id: &str, since_seq: Option<u64>) -> Subscription {
        self.bus.subscribe(trace_id, since_seq).await
    }
}

/// Handle for one running (or resumed) trace.
pub struct RunHandle {
    trace_id: String,
    bus: Arc<EventBus>,
    cancel: CancellationToken,
    join: JoinHandle<RunOutcome>,
}

impl RunHandle {
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Subscribes from the start of the trace (replaying anything already
    /// emitted).
    pub async fn events(&self) -> Subscription {
        self.bus.subscribe(&self.trace_id, Some(0)).await
    }

    /// Subscribes from `since_seq` (or live-only with `None`).
    pub async fn events_since(&self, since_seq: Option<u64>) -> Subscription {
        self.bus.subscribe(&self.trace_id, since_seq).await
    }

    /// Cancels the planner task and every outstanding tool call under it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits for the terminal outcome.
    pub async fn join(self) -> RunOutcome {
        match self.join.await {
            Ok(outcome) => outcome,
            Err(e) => RunOutcome::Failed {
                class: "JoinError".to_string(),
                message: e.to_string(),
            },
        }
    }
}
