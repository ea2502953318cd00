//! Engine configuration with environment overrides.

use chrono::Duration;

/// Tunables for the flow engine and session mapper.
///
/// Values resolve from the environment (via `dotenvy`) when not provided
/// explicitly, falling back to defaults suitable for tests.
#[derive(Clone, Debug)]
pub struct FlowEngineConfig {
    /// Upper bound on concurrently executing fibers.
    pub worker_limit: usize,
    /// How long mapper state lingers after a session closes before cleanup.
    pub cleanup_ttl: Duration,
}

impl Default for FlowEngineConfig {
    fn default() -> Self {
        Self {
            worker_limit: Self::resolve_worker_limit(None),
            cleanup_ttl: Self::resolve_cleanup_ttl(None),
        }
    }
}

impl FlowEngineConfig {
    pub const DEFAULT_CLEANUP_TTL_MS: i64 = 30_000;

    #[must_use]
    pub fn new(worker_limit: Option<usize>, cleanup_ttl: Option<Duration>) -> Self {
        Self {
            worker_limit: Self::resolve_worker_limit(worker_limit),
            cleanup_ttl: Self::resolve_cleanup_ttl(cleanup_ttl),
        }
    }

    #[must_use]
    pub fn with_cleanup_ttl(mut self, ttl: Duration) -> Self {
        self.cleanup_ttl = ttl;
        self
    }

    fn resolve_worker_limit(provided: Option<usize>) -> usize {
        if let Some(limit) = provided {
            return limit.max(1);
        }
        dotenvy::dotenv().ok();
        std::env::var("LEDGERFLOW_WORKER_LIMIT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1)
            })
    }

    fn resolve_cleanup_ttl(provided: Option<Duration>) -> Duration {
        if let Some(ttl) = provided {
            return ttl;
        }
        dotenvy::dotenv().ok();
        let millis = std::env::var("LEDGERFLOW_CLEANUP_TTL_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(Self::DEFAULT_CLEANUP_TTL_MS);
        Duration::milliseconds(millis)
    }
}
