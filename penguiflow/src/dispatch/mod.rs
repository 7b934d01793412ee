//! Tool dispatcher: turns a planner-produced call into an observation under
//! bounded concurrency and explicit failure semantics.
//!
//! Failures never propagate out of the dispatcher as errors; every path ends
//! in either a redacted, clamped output or a structured [`ToolError`] the
//! planner observes. Transient failures retry inside the dispatcher; only the
//! final outcome surfaces.

mod context;
mod retry;

pub use context::ToolContext;
pub use retry::CallRetryPolicy;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use flow_event::EventKind;

use crate::artifacts::{ArtifactError, ArtifactScope, ArtifactStore, ObservationClamp};
use crate::artifacts::redact::ArtifactRedactor;
use crate::bus::EventBus;
use crate::catalog::{ToolCatalog, ToolDescriptor, Visibility};
use crate::planner::PlannedCall;
use crate::registry::SchemaRegistry;
use crate::tools::{ExternalTransport, ToolFailure, ToolImpl, TransportConfig};

static ENV_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder regex"));
static TEMPLATE_ARG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^<[A-Za-z][A-Za-z0-9 _-]*>$").expect("template regex"));

/// Failure classes surfaced to the planner inside observations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolErrorClass {
    ArgsRejected,
    SchemaMismatch,
    NotActivatable,
    UnknownTool,
    AuthConfig,
    Timeout,
    Upstream5xx,
    RateLimited,
    Transport,
    QuotaExceeded,
    ArtifactTooLarge,
    Cancelled,
    Internal,
}

/// Structured tool failure observed by the planner. The model never sees
/// stack traces; this is the whole story.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolError {
    pub class: ToolErrorClass,
    pub message: String,
    /// Retries performed before giving up (0 when the first attempt failed
    /// terminally).
    pub retries: u32,
}

impl ToolError {
    pub fn new(class: ToolErrorClass, message: impl Into<String>, retries: u32) -> Self {
        Self {
            class,
            message: message.into(),
            retries,
        }
    }

    fn terminal(class: ToolErrorClass, message: impl Into<String>) -> Self {
        Self::new(class, message, 0)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| {
            serde_json::json!({"class": "Internal", "message": "unencodable error", "retries": 0})
        })
    }
}

fn classify(failure: &ToolFailure) -> ToolErrorClass {
    match failure.status {
        Some(429) => ToolErrorClass::RateLimited,
        Some(code) if (500..=599).contains(&code) => ToolErrorClass::Upstream5xx,
        Some(_) => ToolErrorClass::Transport,
        None if failure.retriable => ToolErrorClass::Transport,
        None => ToolErrorClass::Internal,
    }
}

/// Dispatcher-wide knobs; per-tool values come from descriptors.
#[derive(Clone, Debug)]
pub struct DispatcherConfig {
    /// Planner-level cap on calls in flight across all tools.
    pub parallel_cap: usize,
    /// Per-tool concurrency when the descriptor declares none.
    pub default_tool_concurrency: usize,
    /// Return `ArgsRejected` for template placeholders in arguments instead
    /// of invoking the tool.
    pub reject_placeholders: bool,
    pub default_retry: CallRetryPolicy,
    /// Per-attempt timeout when the descriptor declares none.
    pub default_timeout: Option<Duration>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            parallel_cap: 50,
            default_tool_concurrency: 10,
            reject_placeholders: false,
            default_retry: CallRetryPolicy::default(),
            default_timeout: Some(Duration::from_secs(60)),
        }
    }
}

/// Per-step dispatch context shared by the calls of one `Plan`.
#[derive(Clone)]
pub struct StepContext {
    pub trace_id: String,
    pub scope: ArtifactScope,
    pub visibility: Visibility,
    pub cancel: CancellationToken,
    pub deadline: Option<Instant>,
    /// Per-query fan-out cap from planning hints (`max_parallel`).
    pub step_cap: Option<Arc<Semaphore>>,
    pub tool_context: BTreeMap<String, Value>,
}

impl StepContext {
    pub fn new(trace_id: impl Into<String>, scope: ArtifactScope) -> Self {
        Self {
            trace_id: trace_id.into(),
            scope,
            visibility: Visibility::default(),
            cancel: CancellationToken::new(),
            deadline: None,
            step_cap: None,
            tool_context: BTreeMap::new(),
        }
    }
}

/// Result of one dispatched call; exactly one of `output`/`error` is set.
#[derive(Clone, Debug)]
pub struct CallOutcome {
    pub tool: String,
    pub call_id: String,
    pub output: Option<Value>,
    pub error: Option<ToolError>,
    pub latency_ms: u64,
}

impl CallOutcome {
    /// Entry for the step observation's `tool_results` list.
    pub fn to_result_value(&self) -> Value {
        let mut out = serde_json::json!({
            "tool": self.tool,
            "call_id": self.call_id,
        });
        let fields = out.as_object_mut().expect("object literal");
        match (&self.output, &self.error) {
            (Some(output), _) => {
                fields.insert("output".to_string(), output.clone());
            }
            (None, Some(error)) => {
                fields.insert("error".to_string(), error.to_value());
            }
            (None, None) => {}
        }
        out
    }
}

enum Attempt {
    Done(Result<Value, ToolFailure>),
    TimedOut,
}

/// Dispatches planner tool calls: validation, semaphores, retry, timeout,
/// redaction, clamping.
pub struct ToolDispatcher {
    catalog: Arc<ToolCatalog>,
    registry: Arc<SchemaRegistry>,
    artifacts: Arc<dyn ArtifactStore>,
    bus: Arc<EventBus>,
    clamp: ObservationClamp,
    config: DispatcherConfig,
    impls: DashMap<String, ToolImpl>,
    transport: Option<Arc<dyn ExternalTransport>>,
    per_tool: DashMap<String, Arc<Semaphore>>,
    global: Arc<Semaphore>,
    /// Redaction side channels keyed by call id.
    side_channels: DashMap<String, BTreeMap<String, Value>>,
}

impl ToolDispatcher {
    pub fn new(
        catalog: Arc<ToolCatalog>,
        registry: Arc<SchemaRegistry>,
        artifacts: Arc<dyn ArtifactStore>,
        bus: Arc<EventBus>,
        clamp: ObservationClamp,
        config: DispatcherConfig,
    ) -> Self {
        let global = Arc::new(Semaphore::new(config.parallel_cap.max(1)));
        Self {
            catalog,
            registry,
            artifacts,
            bus,
            clamp,
            config,
            impls: DashMap::new(),
            transport: None,
            per_tool: DashMap::new(),
            global,
            side_channels: DashMap::new(),
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn ExternalTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Binds an implementation to a qualified tool name.
    pub fn bind(&self, qualified_name: &str, implementation: ToolImpl) {
        self.impls.insert(qualified_name.to_string(), implementation);
    }

    /// Redaction side channel for a call, when anything was redacted.
    pub fn side_channel(&self, call_id: &str) -> Option<BTreeMap<String, Value>> {
        self.side_channels.get(call_id).map(|e| e.value().clone())
    }

    fn tool_semaphore(&self, descriptor: &ToolDescriptor) -> Arc<Semaphore> {
        self.per_tool
            .entry(descriptor.name.clone())
            .or_insert_with(|| {
                Arc::new(Semaphore::new(
                    descriptor
                        .max_concurrency
                        .unwrap_or(self.config.default_tool_concurrency)
                        .max(1),
                ))
            })
            .value()
            .clone()
    }

    /// Runs one call end to end, emitting `tool_call_*` events. Never fails;
    /// failures become [`ToolError`] outcomes.
    pub async fn dispatch(&self, call: &PlannedCall, step: &StepContext) -> CallOutcome {
        let started = Instant::now();
        self.bus
            .emit(
                &step.trace_id,
                EventKind::ToolCallStart,
                Some(call.tool.clone()),
                serde_json::json!({"call_id": call.call_id, "tool": call.tool}),
            )
            .await;
        self.bus
            .emit(
                &step.trace_id,
                EventKind::ToolCallArgs,
                Some(call.tool.clone()),
                serde_json::json!({"call_id": call.call_id, "args": call.args}),
            )
            .await;

        let result = self.execute(call, step).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        self.bus
            .emit(
                &step.trace_id,
                EventKind::ToolCallEnd,
                Some(call.tool.clone()),
                serde_json::json!({
                    "call_id": call.call_id,
                    "latency_ms": latency_ms,
                    "ok": result.is_ok(),
                }),
            )
            .await;

        let outcome = match result {
            Ok(output) => CallOutcome {
                tool: call.tool.clone(),
                call_id: call.call_id.clone(),
                output: Some(output),
                error: None,
                latency_ms,
            },
            Err(error) => CallOutcome {
                tool: call.tool.clone(),
                call_id: call.call_id.clone(),
                output: None,
                error: Some(error),
                latency_ms,
            },
        };
        self.bus
            .emit(
                &step.trace_id,
                EventKind::ToolCallResult,
                Some(call.tool.clone()),
                outcome.to_result_value(),
            )
            .await;
        outcome
    }

    async fn execute(&self, call: &PlannedCall, step: &StepContext) -> Result<Value, ToolError> {
        let descriptor = self.catalog.lookup(&call.tool).map_err(|e| {
            ToolError::terminal(ToolErrorClass::UnknownTool, e.to_string())
        })?;

        if !step.visibility.disallow.is_empty() && step.visibility.disallow.contains(&call.tool) {
            return Err(ToolError::terminal(
                ToolErrorClass::NotActivatable,
                format!("tool `{}` is disallowed for this run", call.tool),
            ));
        }

        if descriptor.loading_mode == crate::catalog::LoadingMode::Deferred
            && !self.catalog.is_activated(&descriptor.name)
        {
            self.catalog
                .activate(&descriptor.name, &step.visibility)
                .map_err(|e| ToolError::terminal(ToolErrorClass::NotActivatable, e.to_string()))?;
        }

        let implementation = self.impls.get(&call.tool).map(|e| e.value().clone()).ok_or_else(|| {
            ToolError::terminal(
                ToolErrorClass::Internal,
                format!("no implementation bound for `{}`", call.tool),
            )
        })?;

        let resolved_transport = match &implementation {
            ToolImpl::External(config) => Some(resolve_transport_env(config)?),
            ToolImpl::Native(_) => None,
        };

        if self.config.reject_placeholders {
            if let Some(path) = find_template_placeholder(&call.args, "") {
                tracing::debug!(
                    target: "penguiflow::dispatch",
                    tool = %call.tool,
                    %path,
                    "planner_args_suspect"
                );
                return Err(ToolError::terminal(
                    ToolErrorClass::ArgsRejected,
                    format!("template placeholder in arguments at `{path}`"),
                ));
            }
        }

        if let Err(e) = self.registry.validate_in(&call.tool, &call.args) {
            tracing::debug!(
                target: "penguiflow::dispatch",
                tool = %call.tool,
                error = %e,
                "planner_args_suspect"
            );
            return Err(ToolError::terminal(ToolErrorClass::SchemaMismatch, e.to_string()));
        }

        // Fair FIFO acquisition: planner cap, then per-query fan-out cap,
        // then per-tool cap.
        let _global = acquire(&self.global, &step.cancel).await?;
        let _step = match &step.step_cap {
            Some(cap) => Some(acquire(cap, &step.cancel).await?),
            None => None,
        };
        let _tool = acquire(&self.tool_semaphore(&descriptor), &step.cancel).await?;

        let ctx = ToolContext::new(
            call.call_id.clone(),
            call.tool.clone(),
            step.trace_id.clone(),
            step.scope.clone(),
            Arc::clone(&self.artifacts),
            Arc::clone(&self.bus),
            step.cancel.child_token(),
            step.deadline,
            step.tool_context.clone(),
        );

        let policy = descriptor
            .retry
            .clone()
            .unwrap_or_else(|| self.config.default_retry.clone());
        let timeout = descriptor.timeout().or(self.config.default_timeout);

        let mut attempt: u32 = 0;
        let output = loop {
            if step.cancel.is_cancelled() {
                return Err(ToolError::new(ToolErrorClass::Cancelled, "cancelled", attempt));
            }

            let invocation = self.invoke(
                &implementation,
                resolved_transport.as_ref(),
                &call.tool,
                call.args.clone(),
                &ctx,
            );
            let attempted = tokio::select! {
                _ = step.cancel.cancelled() => {
                    return Err(ToolError::new(ToolErrorClass::Cancelled, "cancelled", attempt));
                }
                attempted = run_with_timeout(timeout, invocation) => attempted,
            };

            match attempted {
                Attempt::Done(Ok(output)) => break output,
                Attempt::Done(Err(failure)) => {
                    if policy.should_retry(attempt, &failure) {
                        tracing::debug!(
                            target: "penguiflow::dispatch",
                            tool = %call.tool,
                            attempt,
                            error = %failure,
                            "retrying tool call"
                        );
                        tokio::time::sleep(policy.delay(attempt, &call.call_id)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(ToolError::new(classify(&failure), failure.to_string(), attempt));
                }
                Attempt::TimedOut => {
                    let failure = ToolFailure::transient("attempt timed out");
                    if policy.should_retry(attempt, &failure) {
                        attempt += 1;
                        continue;
                    }
                    return Err(ToolError::new(
                        ToolErrorClass::Timeout,
                        "tool call timed out",
                        attempt,
                    ));
                }
            }
        };

        if let Err(e) = self.registry.validate_out(&call.tool, &output) {
            return Err(ToolError::new(ToolErrorClass::SchemaMismatch, e.to_string(), attempt));
        }

        let schemas = self.registry.schemas(&call.tool);
        let redacted = ArtifactRedactor::redact(&output, schemas.as_deref().map(|s| s.output()));
        let mut observed = redacted.value;
        let mut side_channel = redacted.side_channel;
        self.spill_large_values(call, &ctx, &mut observed, &mut side_channel)
            .await;
        if !side_channel.is_empty() {
            self.side_channels.insert(call.call_id.clone(), side_channel);
        }

        let clamped = self
            .clamp
            .clamp(&call.tool, observed, self.artifacts.as_ref(), &step.scope)
            .await
            .map_err(|e| match e {
                ArtifactError::TooLarge { .. } => {
                    ToolError::new(ToolErrorClass::ArtifactTooLarge, e.to_string(), attempt)
                }
                _ => ToolError::new(ToolErrorClass::QuotaExceeded, e.to_string(), attempt),
            })?;
        if let Some(stored) = &clamped.stored {
            if stored.newly_stored {
                ctx.emit_artifact_stored(&stored.reference).await;
            }
        }
        Ok(clamped.value)
    }

    /// Redacted values past the auto-artifact threshold spill to the store
    /// (one `artifact_stored` per fresh write): the observation field becomes
    /// `{artifact, summary, preview}` and the side channel keeps the compact
    /// reference instead of the bytes.
    async fn spill_large_values(
        &self,
        call: &PlannedCall,
        ctx: &ToolContext,
        observed: &mut Value,
        side_channel: &mut BTreeMap<String, Value>,
    ) {
        for (path, original) in side_channel.iter_mut() {
            let (bytes, mime, size) = match original {
                Value::String(text) => (text.clone().into_bytes(), "text/plain", text.len()),
                ref other => {
                    let serialized = other.to_string();
                    let len = serialized.len();
                    (serialized.into_bytes(), "application/json", len)
                }
            };
            if size < self.clamp.auto_artifact_threshold {
                continue;
            }
            let preview_source = match original {
                Value::String(text) => text.clone(),
                ref other => other.to_string(),
            };
            let request = crate::artifacts::PutRequest::bytes(bytes)
                .with_mime(mime)
                .with_namespace(format!("tool.{}", call.tool));
            match ctx.put_bytes(request).await {
                Ok(reference) => {
                    let spilled = serde_json::json!({
                        "artifact": &reference,
                        "summary": format!(
                            "{} field of {size} bytes stored as artifact", call.tool
                        ),
                        "preview": crate::artifacts::clamp::truncate_chars(
                            &preview_source,
                            self.clamp.preview_chars,
                        ),
                    });
                    if !crate::artifacts::redact::set_at_path(observed, path, spilled) {
                        tracing::warn!(
                            target: "penguiflow::dispatch",
                            tool = %call.tool,
                            %path,
                            "failed to replace spilled field in observation"
                        );
                    }
                    *original = serde_json::json!({"artifact_id": reference.id});
                }
                Err(e) => {
                    tracing::warn!(
                        target: "penguiflow::dispatch",
                        tool = %call.tool,
                        %path,
                        error = %e,
                        "artifact spill failed, value stays in the side channel"
                    );
                }
            }
        }
    }

    async fn invoke(
        &self,
        implementation: &ToolImpl,
        transport_config: Option<&TransportConfig>,
        tool: &str,
        args: Value,
        ctx: &ToolContext,
    ) -> Result<Value, ToolFailure> {
        match implementation {
            ToolImpl::Native(callable) => callable.call(args, ctx).await,
            ToolImpl::External(_) => {
                let config = transport_config.expect("resolved before invoke");
                match &self.transport {
                    Some(transport) => transport.invoke(config, tool, args, ctx).await,
                    None => Err(ToolFailure::fatal("no external transport wired")),
                }
            }
        }
    }
}

async fn acquire(
    semaphore: &Arc<Semaphore>,
    cancel: &CancellationToken,
) -> Result<tokio::sync::OwnedSemaphorePermit, ToolError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(ToolError::terminal(ToolErrorClass::Cancelled, "cancelled")),
        permit = semaphore.clone().acquire_owned() => permit.map_err(|_| {
            ToolError::terminal(ToolErrorClass::Internal, "semaphore closed")
        }),
    }
}

async fn run_with_timeout<F>(timeout: Option<Duration>, invocation: F) -> Attempt
where
    F: std::future::Future<Output = Result<Value, ToolFailure>>,
{
    match timeout {
        Some(limit) => match tokio::time::timeout(limit, invocation).await {
            Ok(done) => Attempt::Done(done),
            Err(_) => Attempt::TimedOut,
        },
        None => Attempt::Done(invocation.await),
    }
}

/// Substitutes `${VAR}` placeholders in transport config strings from the
/// process environment; a missing variable is a fatal auth config error.
fn resolve_transport_env(config: &TransportConfig) -> Result<TransportConfig, ToolError> {
    let mut resolved = config.clone();
    resolved.endpoint = substitute(&config.endpoint)?;
    for value in resolved.headers.values_mut() {
        *value = substitute(value)?;
    }
    for value in resolved.auth.values_mut() {
        *value = substitute(value)?;
    }
    Ok(resolved)
}

fn substitute(input: &str) -> Result<String, ToolError> {
    let mut out = String::with_capacity(input.len());
    let mut last = 0;
    for caps in ENV_PLACEHOLDER.captures_iter(input) {
        let whole = caps.get(0).expect("capture 0");
        let var = &caps[1];
        out.push_str(&input[last..whole.start()]);
        match std::env::var(var) {
            Ok(value) => out.push_str(&value),
            Err(_) => {
                return Err(ToolError::terminal(
                    ToolErrorClass::AuthConfig,
                    format!("environment variable `{var}` is not set"),
                ));
            }
        }
        last = whole.end();
    }
    out.push_str(&input[last..]);
    Ok(out)
}

/// First argument string that looks like an unfilled template placeholder
/// (`${VAR}` or `<placeholder>`), excluding artifact placeholders.
fn find_template_placeholder(value: &Value, path: &str) -> Option<String> {
    match value {
        Value::String(s) => {
            if s.starts_with("<artifact:") {
                return None;
            }
            if ENV_PLACEHOLDER.is_match(s) || TEMPLATE_ARG.is_match(s) {
                return Some(if path.is_empty() { "$".to_string() } else { path.to_string() });
            }
            None
        }
        Value::Object(fields) => fields.iter().find_map(|(name, field)| {
            let child = if path.is_empty() {
                name.clone()
            } else {
                format!("{path}.{name}")
            };
            find_template_placeholder(field, &child)
        }),
        Value::Array(elems) => elems
            .iter()
            .enumerate()
            .find_map(|(i, elem)| find_template_placeholder(elem, &format!("{path}[{i}]"))),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// **Scenario**: `${VAR}` substitution fills from env and fails fatal on
    /// a missing variable.
    #[test]
    fn transport_env_substitution() {
        std::env::set_var("PF_DISPATCH_TEST_TOKEN", "s3cr3t");
        let config = TransportConfig {
            kind: "http".to_string(),
            endpoint: "https://api.example.com".to_string(),
            headers: [("authorization".to_string(), "Bearer ${PF_DISPATCH_TEST_TOKEN}".to_string())]
                .into_iter()
                .collect(),
            auth: BTreeMap::new(),
        };
        let resolved = resolve_transport_env(&config).unwrap();
        assert_eq!(resolved.headers["authorization"], "Bearer s3cr3t");
        std::env::remove_var("PF_DISPATCH_TEST_TOKEN");

        let err = resolve_transport_env(&TransportConfig {
            endpoint: "${PF_DISPATCH_TEST_MISSING}".to_string(),
            ..TransportConfig::default()
        })
        .unwrap_err();
        assert_eq!(err.class, ToolErrorClass::AuthConfig);
    }

    /// **Scenario**: template placeholders are found deep in args; artifact
    /// placeholders are not flagged.
    #[test]
    fn template_placeholder_detection() {
        let args = json!({"query": "ok", "auth": {"token": "${API_KEY}"}});
        assert_eq!(
            find_template_placeholder(&args, "").as_deref(),
            Some("auth.token")
        );
        let args = json!({"items": ["fine", "<your-region>"]});
        assert_eq!(
            find_template_placeholder(&args, "").as_deref(),
            Some("items[1]")
        );
        let args = json!({"ref": "<artifact:png size=12>"});
        assert!(find_template_placeholder(&args, "").is_none());
    }

    /// **Scenario**: upstream statuses classify to the documented classes.
    #[test]
    fn failure_classification() {
        assert_eq!(classify(&ToolFailure::status(503, "x")), ToolErrorClass::Upstream5xx);
        assert_eq!(classify(&ToolFailure::status(429, "x")), ToolErrorClass::RateLimited);
        assert_eq!(classify(&ToolFailure::status(404, "x")), ToolErrorClass::Transport);
        assert_eq!(classify(&ToolFailure::transient("x")), ToolErrorClass::Transport);
        assert_eq!(classify(&ToolFailure::fatal("x")), ToolErrorClass::Internal);
    }

    /// **Scenario**: ToolError serializes with the class name the planner
    /// observes (e.g. `Upstream5xx`).
    #[test]
    fn tool_error_wire_shape() {
        let err = ToolError::new(ToolErrorClass::Upstream5xx, "503 three times", 2);
        let value = err.to_value();
        assert_eq!(value["class"], "Upstream5xx");
        assert_eq!(value["retries"], 2);
    }
}
