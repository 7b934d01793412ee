//! Tool catalog: descriptor records with namespacing, collision detection,
//! visibility-aware ordered listing, and a stable fingerprint.
//!
//! Descriptors are immutable after registration and owned by the catalog for
//! the lifetime of the runtime. Prompt construction reads the catalog — never
//! reflection.

pub mod yaml_specs;

use std::collections::HashSet;

use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;

use crate::dispatch::CallRetryPolicy;

/// Declared hazard level of a tool; safer classes list first.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SideEffects {
    #[default]
    Pure,
    Read,
    Write,
    External,
    Stateful,
}

impl SideEffects {
    /// Ordering rank; lower is safer.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Pure => 0,
            Self::Read => 1,
            Self::Write => 2,
            Self::External => 3,
            Self::Stateful => 4,
        }
    }
}

/// Whether a tool is visible in prompts from the start or only after
/// activation-on-first-use.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadingMode {
    #[default]
    Always,
    Deferred,
}

/// Where a tool's implementation lives; used for collision diagnostics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolOrigin {
    #[default]
    Native,
    External,
}

fn empty_schema() -> Value {
    Value::Object(serde_json::Map::new())
}

/// Metadata for one tool. `name` is the local name before registration and
/// the `{ns}.{local}` qualified name afterwards.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "empty_schema")]
    pub input_schema: Value,
    #[serde(default = "empty_schema")]
    pub output_schema: Value,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub side_effects: SideEffects,
    #[serde(default)]
    pub loading_mode: LoadingMode,
    #[serde(default)]
    pub examples: Vec<Value>,
    #[serde(default)]
    pub retry: Option<CallRetryPolicy>,
    /// Per-attempt timeout in seconds.
    #[serde(default)]
    pub timeout_s: Option<f64>,
    #[serde(default)]
    pub max_concurrency: Option<usize>,
    #[serde(default)]
    pub origin: ToolOrigin,
}

impl ToolDescriptor {
    /// Minimal descriptor: name + description, empty schemas, safe defaults.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: empty_schema(),
            output_schema: empty_schema(),
            tags: Vec::new(),
            side_effects: SideEffects::default(),
            loading_mode: LoadingMode::default(),
            examples: Vec::new(),
            retry: None,
            timeout_s: None,
            max_concurrency: None,
            origin: ToolOrigin::default(),
        }
    }

    pub fn with_schemas(mut self, input: Value, output: Value) -> Self {
        self.input_schema = input;
        self.output_schema = output;
        self
    }

    pub fn with_side_effects(mut self, side_effects: SideEffects) -> Self {
        self.side_effects = side_effects;
        self
    }

    pub fn with_loading_mode(mut self, loading_mode: LoadingMode) -> Self {
        self.loading_mode = loading_mode;
        self
    }

    pub fn with_retry(mut self, retry: CallRetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_timeout_s(mut self, timeout_s: f64) -> Self {
        self.timeout_s = Some(timeout_s);
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = Some(max_concurrency);
        self
    }

    /// Namespace part of a qualified name; empty before registration.
    pub fn namespace(&self) -> &str {
        self.name.split_once('.').map(|(ns, _)| ns).unwrap_or("")
    }

    /// Per-attempt timeout as a duration.
    pub fn timeout(&self) -> Option<std::time::Duration> {
        self.timeout_s.map(std::time::Duration::from_secs_f64)
    }
}

/// Catalog errors.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("tool `{name}` already registered ({existing:?} vs {new:?})")]
    NameCollision {
        name: String,
        existing: ToolOrigin,
        new: ToolOrigin,
    },
    #[error("unknown tool `{0}`")]
    NotFound(String),
    #[error("tool `{0}` is not activatable under the current visibility policy")]
    NotActivatable(String),
    #[error("invalid namespace `{0}`: must be non-empty without dots")]
    InvalidNamespace(String),
}

/// Per-run visibility policy applied to listings and deferred activation.
#[derive(Clone, Debug, Default)]
pub struct Visibility {
    /// Include deferred tools that have not been activated yet.
    pub include_deferred: bool,
    /// When set, only these qualified names are visible.
    pub allow: Option<HashSet<String>>,
    /// Qualified names hidden for this run.
    pub disallow: HashSet<String>,
    /// Namespace listed ahead of others at equal loading mode.
    pub preferred_namespace: Option<String>,
}

impl Visibility {
    fn admits(&self, name: &str) -> bool {
        if self.disallow.contains(name) {
            return false;
        }
        match &self.allow {
            Some(allow) => allow.contains(name),
            None => true,
        }
    }
}

/// Owns [`ToolDescriptor`] records for the lifetime of the runtime.
#[derive(Default)]
pub struct ToolCatalog {
    tools: DashMap<String, Arc<ToolDescriptor>>,
    activated: DashSet<String>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `descriptor` under `{ns}.{local_name}`. Rejects duplicate
    /// qualified names, including native-vs-external pairs.
    pub fn register(
        &self,
        ns: &str,
        mut descriptor: ToolDescriptor,
    ) -> Result<String, CatalogError> {
        if ns.is_empty() || ns.contains('.') {
            return Err(CatalogError::InvalidNamespace(ns.to_string()));
        }
        let qualified = format!("{ns}.{}", descriptor.name);
        if let Some(existing) = self.tools.get(&qualified) {
            return Err(CatalogError::NameCollision {
                name: qualified,
                existing: existing.origin,
                new: descriptor.origin,
            });
        }
        descriptor.name = qualified.clone();
        self.tools.insert(qualified.clone(), Arc::new(descriptor));
        Ok(qualified)
    }

    /// Descriptor for a qualified name.
    pub fn lookup(&self, qualified_name: &str) -> Result<Arc<ToolDescriptor>, CatalogError> {
        self.tools
            .get(qualified_name)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| CatalogError::NotFound(qualified_name.to_string()))
    }

    /// Marks a deferred tool activated for the rest of the runtime's life,
    /// if the visibility policy admits it.
    pub fn activate(
        &self,
        qualified_name: &str,
        visibility: &Visibility,
    ) -> Result<(), CatalogError> {
        let descriptor = self.lookup(qualified_name)?;
        if !visibility.admits(&descriptor.name) {
            return Err(CatalogError::NotActivatable(qualified_name.to_string()));
        }
        self.activated.insert(qualified_name.to_string());
        Ok(())
    }

    pub fn is_activated(&self, qualified_name: &str) -> bool {
        self.activated.contains(qualified_name)
    }

    /// Ordered listing under `visibility`.
    ///
    /// Tie-breaks: loading mode (`always` first), preferred namespace,
    /// side-effect rank (safer first), shorter qualified name, then
    /// lexicographic.
    pub fn list(&self, visibility: &Visibility) -> Vec<Arc<ToolDescriptor>> {
        let mut visible: Vec<Arc<ToolDescriptor>> = self
            .tools
            .iter()
            .filter(|e| visibility.admits(e.key()))
            .filter(|e| {
                e.value().loading_mode == LoadingMode::Always
                    || visibility.include_deferred
                    || self.activated.contains(e.key())
            })
            .map(|e| Arc::clone(e.value()))
            .collect();
        visible.sort_by(|a, b| {
            let mode = |d: &ToolDescriptor| (d.loading_mode == LoadingMode::Deferred) as u8;
            let ns_rank = |d: &ToolDescriptor| match &visibility.preferred_namespace {
                Some(ns) => (d.namespace() != ns) as u8,
                None => 0,
            };
            mode(a)
                .cmp(&mode(b))
                .then(ns_rank(a).cmp(&ns_rank(b)))
                .then(a.side_effects.rank().cmp(&b.side_effects.rank()))
                .then(a.name.len().cmp(&b.name.len()))
                .then(a.name.cmp(&b.name))
        });
        visible
    }

    /// Stable hash of the visible catalog; used by caches and the prompt
    /// layer to detect drift.
    pub fn fingerprint(&self, visibility: &Visibility) -> String {
        let mut hasher = Sha256::new();
        for descriptor in self.list(visibility) {
            hasher.update(descriptor.name.as_bytes());
            hasher.update([0]);
            hasher.update(descriptor.description.as_bytes());
            hasher.update([0]);
            hasher.update(descriptor.input_schema.to_string().as_bytes());
            hasher.update([0]);
            hasher.update(descriptor.output_schema.to_string().as_bytes());
            hasher.update([0xff]);
        }
        let digest = hasher.finalize();
        let mut out = String::with_capacity(64);
        for byte in digest {
            out.push_str(&format!("{byte:02x}"));
        }
        out
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(name: &str, side_effects: SideEffects, mode: LoadingMode) -> ToolDescriptor {
        ToolDescriptor::new(name, format!("{name} tool"))
            .with_side_effects(side_effects)
            .with_loading_mode(mode)
    }

    /// **Scenario**: registration namespaces the tool and rejects duplicates,
    /// including a native-vs-external pair.
    #[test]
    fn register_namespaces_and_rejects_duplicates() {
        let catalog = ToolCatalog::new();
        let qualified = catalog
            .register("weather", descriptor("current", SideEffects::Read, LoadingMode::Always))
            .unwrap();
        assert_eq!(qualified, "weather.current");

        let mut external = descriptor("current", SideEffects::Read, LoadingMode::Always);
        external.origin = ToolOrigin::External;
        let err = catalog.register("weather", external).unwrap_err();
        assert!(matches!(
            err,
            CatalogError::NameCollision { existing: ToolOrigin::Native, new: ToolOrigin::External, .. }
        ));
    }

    /// **Scenario**: listing orders by loading mode, then side-effect safety,
    /// then shorter names; deferred tools hide until activated.
    #[test]
    fn list_ordering_and_deferred_hiding() {
        let catalog = ToolCatalog::new();
        catalog
            .register("fs", descriptor("write", SideEffects::Write, LoadingMode::Always))
            .unwrap();
        catalog
            .register("fs", descriptor("read", SideEffects::Read, LoadingMode::Always))
            .unwrap();
        catalog
            .register("net", descriptor("fetch", SideEffects::External, LoadingMode::Deferred))
            .unwrap();

        let visibility = Visibility::default();
        let names: Vec<_> = catalog
            .list(&visibility)
            .iter()
            .map(|d| d.name.clone())
            .collect();
        assert_eq!(names, vec!["fs.read", "fs.write"]);

        catalog.activate("net.fetch", &visibility).unwrap();
        let names: Vec<_> = catalog
            .list(&visibility)
            .iter()
            .map(|d| d.name.clone())
            .collect();
        assert_eq!(names, vec!["fs.read", "fs.write", "net.fetch"]);
    }

    /// **Scenario**: a disallowed deferred tool cannot be activated.
    #[test]
    fn disallowed_tool_is_not_activatable() {
        let catalog = ToolCatalog::new();
        catalog
            .register("net", descriptor("fetch", SideEffects::External, LoadingMode::Deferred))
            .unwrap();
        let visibility = Visibility {
            disallow: ["net.fetch".to_string()].into_iter().collect(),
            ..Visibility::default()
        };
        assert!(matches!(
            catalog.activate("net.fetch", &visibility),
            Err(CatalogError::NotActivatable(_))
        ));
    }

    /// **Scenario**: the fingerprint is stable across identical catalogs and
    /// changes when visibility changes.
    #[test]
    fn fingerprint_stable_and_visibility_sensitive() {
        let build = || {
            let catalog = ToolCatalog::new();
            catalog
                .register("a", descriptor("one", SideEffects::Pure, LoadingMode::Always))
                .unwrap();
            catalog
                .register("b", descriptor("two", SideEffects::Read, LoadingMode::Always))
                .unwrap();
            catalog
        };
        let visibility = Visibility::default();
        assert_eq!(
            build().fingerprint(&visibility),
            build().fingerprint(&visibility)
        );
        let narrowed = Visibility {
            disallow: ["b.two".to_string()].into_iter().collect(),
            ..Visibility::default()
        };
        assert_ne!(
            build().fingerprint(&visibility),
            build().fingerprint(&narrowed)
        );
    }
}
