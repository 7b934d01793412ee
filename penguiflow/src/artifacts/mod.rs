//! Artifact layer: content-addressed references, the store contract, and the
//! redaction/clamp pipeline that keeps artifact bytes out of model context.

pub mod clamp;
pub mod memory;
pub mod redact;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

pub use clamp::ObservationClamp;
pub use memory::{ArtifactStoreConfig, CleanupStrategy, InMemoryArtifactStore};
pub use redact::{ArtifactRedactor, RedactedOutput};

/// Scope metadata attached to artifacts. The store does not authorize reads;
/// an external surface compares these fields against the caller.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactScope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

impl ArtifactScope {
    pub fn for_session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            ..Self::default()
        }
    }

    /// True when every scope field present on `self` matches the caller.
    /// Used by download surfaces; a mismatch must read as not-found.
    pub fn admits(&self, caller: &ArtifactScope) -> bool {
        fn ok(owned: &Option<String>, caller: &Option<String>) -> bool {
            match owned {
                None => true,
                Some(v) => caller.as_deref() == Some(v.as_str()),
            }
        }
        ok(&self.tenant_id, &caller.tenant_id)
            && ok(&self.user_id, &caller.user_id)
            && ok(&self.session_id, &caller.session_id)
    }
}

/// Compact reference to stored content. Shared freely; never owns bytes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// `{namespace}_{first 12 hex chars of sha256}`; content-addressed.
    pub id: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub sha256: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default)]
    pub scope: ArtifactScope,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub source_meta: BTreeMap<String, Value>,
}

/// Artifact store errors. Expected outcomes (missing, quota) are variants,
/// not panics.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact `{0}` not found")]
    NotFound(String),
    #[error("artifact of {size} bytes exceeds the {limit}-byte limit")]
    TooLarge { size: usize, limit: usize },
    #[error("artifact store quota exceeded ({0})")]
    QuotaExceeded(String),
}

/// Request for a `put` operation; built via [`PutRequest::bytes`] or
/// [`PutRequest::text`].
#[derive(Clone, Debug)]
pub struct PutRequest {
    pub data: Vec<u8>,
    pub mime_type: String,
    pub filename: Option<String>,
    pub namespace: String,
    pub scope: ArtifactScope,
    pub source_meta: BTreeMap<String, Value>,
}

impl PutRequest {
    pub fn bytes(data: Vec<u8>) -> Self {
        Self {
            data,
            mime_type: "application/octet-stream".to_string(),
            filename: None,
            namespace: "art".to_string(),
            scope: ArtifactScope::default(),
            source_meta: BTreeMap::new(),
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            mime_type: "text/plain".to_string(),
            ..Self::bytes(text.into().into_bytes())
        }
    }

    pub fn with_mime(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_scope(mut self, scope: ArtifactScope) -> Self {
        self.scope = scope;
        self
    }
}

/// Result of a put: the reference plus whether bytes were newly written.
/// `artifact_stored` events are emitted for new writes only.
#[derive(Clone, Debug)]
pub struct PutOutcome {
    pub reference: ArtifactRef,
    pub newly_stored: bool,
}

/// Content-addressed blob store contract. Implementations must dedup on
/// identical bytes within a namespace and enforce the size limit.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn put_bytes(&self, request: PutRequest) -> Result<PutOutcome, ArtifactError>;

    /// Bytes for `id`; touches recency for LRU stores.
    async fn get(&self, id: &str) -> Result<Vec<u8>, ArtifactError>;

    async fn get_ref(&self, id: &str) -> Result<ArtifactRef, ArtifactError>;

    async fn exists(&self, id: &str) -> bool;

    /// Removes `id`; returns whether it was present.
    async fn delete(&self, id: &str) -> Result<bool, ArtifactError>;

    /// UTF-8 text convenience over [`Self::put_bytes`].
    async fn put_text(&self, request: PutRequest) -> Result<PutOutcome, ArtifactError> {
        self.put_bytes(request).await
    }
}

/// Lowercase hex sha256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Content-addressed id for a namespace + byte hash.
pub fn artifact_id(namespace: &str, sha256: &str) -> String {
    format!("{namespace}_{}", &sha256[..12.min(sha256.len())])
}
