//! In-memory artifact store. Not persistent; the contract's reference
//! implementation and the default wiring for tests and single-process runs.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{
    artifact_id, sha256_hex, ArtifactError, ArtifactRef, ArtifactStore, PutOutcome, PutRequest,
};

/// What to do under byte/count pressure.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CleanupStrategy {
    /// Evict least-recently-used first (reads touch recency).
    #[default]
    Lru,
    /// Evict oldest insertion first; reads do not reorder.
    Fifo,
    /// Never evict; puts fail with `QuotaExceeded` under pressure.
    None,
}

/// Limits for the in-memory store.
#[derive(Clone, Debug)]
pub struct ArtifactStoreConfig {
    pub max_artifact_bytes: usize,
    pub max_total_bytes: usize,
    pub max_entries: usize,
    /// Byte cap per session scope; `None` disables the per-session cap.
    pub max_bytes_per_session: Option<usize>,
    /// Per-ref lifetime; expired refs read as missing.
    pub ttl: Option<Duration>,
    pub strategy: CleanupStrategy,
}

impl Default for ArtifactStoreConfig {
    fn default() -> Self {
        Self {
            max_artifact_bytes: 32 * 1024 * 1024,
            max_total_bytes: 256 * 1024 * 1024,
            max_entries: 10_000,
            max_bytes_per_session: None,
            ttl: None,
            strategy: CleanupStrategy::Lru,
        }
    }
}

struct StoredArtifact {
    bytes: Vec<u8>,
    reference: ArtifactRef,
    expires_at: Option<Instant>,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, StoredArtifact>,
    /// Eviction order, front = next victim.
    order: VecDeque<String>,
    total_bytes: usize,
    session_bytes: HashMap<String, usize>,
}

impl Inner {
    fn purge_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.expires_at.is_some_and(|at| at <= now))
            .map(|(id, _)| id.clone())
            .collect();
        for id in expired {
            self.remove(&id);
        }
    }

    fn remove(&mut self, id: &str) -> bool {
        let Some(entry) = self.entries.remove(id) else {
            return false;
        };
        self.total_bytes -= entry.bytes.len();
        if let Some(session) = &entry.reference.scope.session_id {
            if let Some(sum) = self.session_bytes.get_mut(session) {
                *sum = sum.saturating_sub(entry.bytes.len());
            }
        }
        self.order.retain(|o| o != id);
        true
    }

    fn touch(&mut self, id: &str) {
        if let Some(pos) = self.order.iter().position(|o| o == id) {
            self.order.remove(pos);
            self.order.push_back(id.to_string());
        }
    }

    /// Evicts the front victim, optionally restricted to one session.
    fn evict_one(&mut self, session: Option<&str>) -> bool {
        let victim = match session {
            None => self.order.front().cloned(),
            Some(session) => self
                .order
                .iter()
                .find(|id| {
                    self.entries
                        .get(*id)
                        .is_some_and(|e| e.reference.scope.session_id.as_deref() == Some(session))
                })
                .cloned(),
        };
        match victim {
            Some(id) => self.remove(&id),
            None => false,
        }
    }
}

/// In-memory [`ArtifactStore`] with content-addressed dedup, TTL, and
/// LRU/FIFO eviction.
pub struct InMemoryArtifactStore {
    config: ArtifactStoreConfig,
    inner: Mutex<Inner>,
}

impl InMemoryArtifactStore {
    pub fn new(config: ArtifactStoreConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Store with default limits (LRU, no TTL).
    pub fn with_defaults() -> Self {
        Self::new(ArtifactStoreConfig::default())
    }

    /// Number of live (non-expired) artifacts.
    pub async fn len(&self) -> usize {
        let mut inner = self.inner.lock().await;
        inner.purge_expired(Instant::now());
        inner.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn make_room(&self, inner: &mut Inner, incoming: usize) -> Result<(), ArtifactError> {
        while inner.total_bytes + incoming > self.config.max_total_bytes
            || inner.entries.len() + 1 > self.config.max_entries
        {
            if self.config.strategy == CleanupStrategy::None || !inner.evict_one(None) {
                return Err(ArtifactError::QuotaExceeded(format!(
                    "{} bytes stored, {} incoming",
                    inner.total_bytes, incoming
                )));
            }
        }
        Ok(())
    }

    fn make_session_room(
        &self,
        inner: &mut Inner,
        session: &str,
        incoming: usize,
    ) -> Result<(), ArtifactError> {
        let Some(cap) = self.config.max_bytes_per_session else {
            return Ok(());
        };
        while inner.session_bytes.get(session).copied().unwrap_or(0) + incoming > cap {
            if self.config.strategy == CleanupStrategy::None || !inner.evict_one(Some(session)) {
                return Err(ArtifactError::QuotaExceeded(format!(
                    "session `{session}` over its {cap}-byte cap"
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn put_bytes(&self, request: PutRequest) -> Result<PutOutcome, ArtifactError> {
        if request.data.len() > self.config.max_artifact_bytes {
            return Err(ArtifactError::TooLarge {
                size: request.data.len(),
                limit: self.config.max_artifact_bytes,
            });
        }
        let now = Instant::now();
        let sha256 = sha256_hex(&request.data);
        let id = artifact_id(&request.namespace, &sha256);

        let mut inner = self.inner.lock().await;
        inner.purge_expired(now);

        if inner.entries.contains_key(&id) {
            if self.config.strategy == CleanupStrategy::Lru {
                inner.touch(&id);
            }
            let reference = inner.entries[&id].reference.clone();
            return Ok(PutOutcome {
                reference,
                newly_stored: false,
            });
        }

        self.make_room(&mut inner, request.data.len())?;
        if let Some(session) = request.scope.session_id.clone() {
            self.make_session_room(&mut inner, &session, request.data.len())?;
        }

        let reference = ArtifactRef {
            id: id.clone(),
            mime_type: request.mime_type,
            size_bytes: request.data.len() as u64,
            sha256,
            filename: request.filename,
            scope: request.scope,
            source_meta: request.source_meta,
        };
        inner.total_bytes += request.data.len();
        if let Some(session) = &reference.scope.session_id {
            *inner.session_bytes.entry(session.clone()).or_default() += request.data.len();
        }
        inner.order.push_back(id.clone());
        inner.entries.insert(
            id,
            StoredArtifact {
                bytes: request.data,
                reference: reference.clone(),
                expires_at: self.config.ttl.map(|ttl| now + ttl),
            },
        );
        Ok(PutOutcome {
            reference,
            newly_stored: true,
        })
    }

    async fn get(&self, id: &str) -> Result<Vec<u8>, ArtifactError> {
        let mut inner = self.inner.lock().await;
        inner.purge_expired(Instant::now());
        if !inner.entries.contains_key(id) {
            return Err(ArtifactError::NotFound(id.to_string()));
        }
        if self.config.strategy == CleanupStrategy::Lru {
            inner.touch(id);
        }
        Ok(inner.entries[id].bytes.clone())
    }

    async fn get_ref(&self, id: &str) -> Result<ArtifactRef, ArtifactError> {
        let mut inner = self.inner.lock().await;
        inner.purge_expired(Instant::now());
        inner
            .entries
            .get(id)
            .map(|e| e.reference.clone())
            .ok_or_else(|| ArtifactError::NotFound(id.to_string()))
    }

    async fn exists(&self, id: &str) -> bool {
        let mut inner = self.inner.lock().await;
        inner.purge_expired(Instant::now());
        inner.entries.contains_key(id)
    }

    async fn delete(&self, id: &str) -> Result<bool, ArtifactError> {
        let mut inner = self.inner.lock().await;
        Ok(inner.remove(id))
    }
}
