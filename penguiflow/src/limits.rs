//! Runtime limits: every tunable the runtime reads, with built-in defaults
//! and an env override path (`PENGUIFLOW_*` variables).
//!
//! The `config` crate fills the process environment from `.env`/XDG first;
//! this module only reads it.

use std::time::Duration;

/// Bounded knobs for the whole runtime. Constructed once and shared.
#[derive(Clone, Debug)]
pub struct RuntimeLimits {
    /// Hard cap on a single artifact's bytes.
    pub max_artifact_bytes: usize,
    /// Redacted observation budget; above this the clamp engages.
    pub max_observation_chars: usize,
    /// At or above this serialized size the observation is stored as an
    /// artifact instead of truncated inline.
    pub auto_artifact_threshold: usize,
    /// Characters of an auto-stored observation kept inline as preview.
    pub observation_preview_chars: usize,
    /// Default hop budget when the query carries none.
    pub max_hops: u32,
    /// Planner-level cap on tool calls in flight.
    pub parallel_cap: usize,
    /// Default per-tool concurrency when the descriptor has none.
    pub tool_concurrency: usize,
    /// Per-subscriber bounded buffer on the event bus.
    pub subscriber_buffer: usize,
    /// Retained tail length per trace for late subscribers.
    pub retention_events: usize,
    /// Pause record lifetime.
    pub pause_ttl: Duration,
    /// Answer text is chunked into pieces of this many characters.
    pub answer_chunk_chars: usize,
    /// Bounded reflection revisions per run.
    pub max_revisions: u32,
}

impl Default for RuntimeLimits {
    fn default() -> Self {
        Self {
            max_artifact_bytes: 32 * 1024 * 1024,
            max_observation_chars: 6_000,
            auto_artifact_threshold: 32_000,
            observation_preview_chars: 280,
            max_hops: 8,
            parallel_cap: 50,
            tool_concurrency: 10,
            subscriber_buffer: 256,
            retention_events: 2_048,
            pause_ttl: Duration::from_secs(30 * 60),
            answer_chunk_chars: 512,
            max_revisions: 1,
        }
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl RuntimeLimits {
    /// Reads limits from `PENGUIFLOW_*` env vars, falling back to defaults.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            max_artifact_bytes: env_usize("PENGUIFLOW_MAX_ARTIFACT_BYTES", d.max_artifact_bytes),
            max_observation_chars: env_usize(
                "PENGUIFLOW_MAX_OBSERVATION_CHARS",
                d.max_observation_chars,
            ),
            auto_artifact_threshold: env_usize(
                "PENGUIFLOW_AUTO_ARTIFACT_THRESHOLD",
                d.auto_artifact_threshold,
            ),
            observation_preview_chars: d.observation_preview_chars,
            max_hops: env_u32("PENGUIFLOW_MAX_HOPS", d.max_hops),
            parallel_cap: env_usize("PENGUIFLOW_PARALLEL_CAP", d.parallel_cap),
            tool_concurrency: d.tool_concurrency,
            subscriber_buffer: env_usize("PENGUIFLOW_SUBSCRIBER_BUFFER", d.subscriber_buffer),
            retention_events: env_usize("PENGUIFLOW_RETENTION_EVENTS", d.retention_events),
            pause_ttl: Duration::from_secs(
                env_usize("PENGUIFLOW_PAUSE_TTL_S", d.pause_ttl.as_secs() as usize) as u64,
            ),
            answer_chunk_chars: d.answer_chunk_chars,
            max_revisions: d.max_revisions,
        }
    }

    /// Bootstraps the process environment from `.env`/XDG config, then reads
    /// limits. Errors from the bootstrap are logged and ignored; env vars
    /// already set always win.
    pub fn load() -> Self {
        if let Err(e) = env_config::load_and_apply("penguiflow", None) {
            tracing::warn!(error = %e, "config bootstrap failed, using process env only");
        }
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: env overrides take effect and malformed values fall back.
    #[test]
    fn env_overrides_and_fallback() {
        std::env::set_var("PENGUIFLOW_MAX_HOPS", "3");
        std::env::set_var("PENGUIFLOW_PARALLEL_CAP", "not-a-number");
        let limits = RuntimeLimits::from_env();
        assert_eq!(limits.max_hops, 3);
        assert_eq!(limits.parallel_cap, RuntimeLimits::default().parallel_cap);
        std::env::remove_var("PENGUIFLOW_MAX_HOPS");
        std::env::remove_var("PENGUIFLOW_PARALLEL_CAP");
    }

    /// **Scenario**: defaults match their documented values.
    #[test]
    fn defaults_match_documented_values() {
        let d = RuntimeLimits::default();
        assert_eq!(d.parallel_cap, 50);
        assert_eq!(d.tool_concurrency, 10);
        assert!(d.auto_artifact_threshold > d.max_observation_chars);
    }
}
