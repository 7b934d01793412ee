//! Tool plug-in contract.
//!
//! A tool is a descriptor plus an async callable. Implementations are
//! registered explicitly into the catalog as a value of the [`ToolImpl`] sum
//! type — native Rust callables or external transport configs — never
//! discovered by reflection.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::catalog::ToolDescriptor;
use crate::dispatch::ToolContext;

/// Failure returned by a tool. Carries enough for the dispatcher's retry
/// policy: an optional upstream status code and a transience flag.
#[derive(Clone, Debug)]
pub struct ToolFailure {
    pub message: String,
    pub status: Option<u16>,
    pub retriable: bool,
}

impl ToolFailure {
    /// Non-retriable failure.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            retriable: false,
        }
    }

    /// Retriable failure without an upstream status.
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            retriable: true,
        }
    }

    /// Failure carrying an upstream status code; retriability is decided by
    /// the call's retry policy (`retry_on_status`).
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: Some(status),
            retriable: false,
        }
    }
}

impl std::fmt::Display for ToolFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(code) => write!(f, "{} (status {code})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// A single callable tool.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Descriptor with the local (un-namespaced) name; the catalog qualifies
    /// it at registration.
    fn descriptor(&self) -> ToolDescriptor;

    /// Executes the tool. `args` were already validated against the input
    /// schema; output will be validated against the output schema.
    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolFailure>;
}

/// Connection config for a tool living behind an external transport.
/// String values may contain `${VAR}` placeholders substituted from the
/// process environment at dispatch time.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Transport discriminator understood by the wired [`ExternalTransport`].
    pub kind: String,
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub auth: BTreeMap<String, String>,
}

/// Seam for external tool invocation (MCP-style clients plug in here; none
/// ships with the runtime).
#[async_trait]
pub trait ExternalTransport: Send + Sync {
    async fn invoke(
        &self,
        config: &TransportConfig,
        tool: &str,
        args: Value,
        ctx: &ToolContext,
    ) -> Result<Value, ToolFailure>;
}

/// How a registered tool is implemented.
#[derive(Clone)]
pub enum ToolImpl {
    Native(Arc<dyn Tool>),
    External(TransportConfig),
}

impl std::fmt::Debug for ToolImpl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Native(_) => f.write_str("ToolImpl::Native(..)"),
            Self::External(config) => write!(f, "ToolImpl::External({})", config.kind),
        }
    }
}

/// Closure-backed tool for tests and demos.
///
/// # Examples
///
/// ```rust,ignore
/// let tool = FnTool::new(
///     ToolDescriptor::new("echo", "Echo the input"),
///     |args, _ctx| async move { Ok(args) },
/// );
/// ```
pub struct FnTool<F> {
    descriptor: ToolDescriptor,
    f: F,
}

impl<F, Fut> FnTool<F>
where
    F: Fn(Value, &ToolContext) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<Value, ToolFailure>> + Send,
{
    pub fn new(descriptor: ToolDescriptor, f: F) -> Self {
        Self { descriptor, f }
    }
}

#[async_trait]
impl<F, Fut> Tool for FnTool<F>
where
    F: Fn(Value, &ToolContext) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<Value, ToolFailure>> + Send,
{
    fn descriptor(&self) -> ToolDescriptor {
        self.descriptor.clone()
    }

    async fn call(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolFailure> {
        (self.f)(args, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: failure constructors set status and retriability.
    #[test]
    fn failure_constructors() {
        let fatal = ToolFailure::fatal("bad input");
        assert!(!fatal.retriable);
        assert!(fatal.status.is_none());

        let transient = ToolFailure::transient("flaky network");
        assert!(transient.retriable);

        let upstream = ToolFailure::status(503, "unavailable");
        assert_eq!(upstream.status, Some(503));
        assert_eq!(upstream.to_string(), "unavailable (status 503)");
    }
}
