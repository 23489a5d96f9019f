//! Configuration for the generation orchestrator.
//!
//! One process-wide config struct, set at session start. Values outside the
//! supported ranges are clamped with a warning rather than rejected, so a
//! bad editor preference can never keep the tool from starting.

use std::time::Duration;

/// Default number of concurrent outbound calls.
pub const DEFAULT_MAX_CONCURRENT: usize = 4;

/// Hard ceiling on concurrent outbound calls.
///
/// Generative-AI providers rate limit aggressively; pushing concurrency
/// past this causes cascading HTTP 429 responses.
pub const MAX_MAX_CONCURRENT: usize = 16;

/// Default dispatcher queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 32;

/// Default minimum spacing between call starts.
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(200);

/// Default maximum retry attempts after the first failed HTTP attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay for exponential backoff.
pub const DEFAULT_BASE_BACKOFF: Duration = Duration::from_millis(250);

/// Default cap on a single backoff delay.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(8);

/// Default per-attempt HTTP timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default maximum age of a terminal cache entry before eviction.
pub const DEFAULT_CACHE_MAX_AGE: Duration = Duration::from_secs(300);

/// Configuration for the orchestrator and its dispatcher.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Maximum concurrent outbound HTTP calls (worker count).
    /// Default: 4. Clamped to 1..=16.
    pub max_concurrent: usize,
    /// Dispatcher queue capacity. Enqueue past this fails fast with
    /// `Backpressure`. Default: 32. Minimum: 1.
    pub queue_capacity: usize,
    /// Minimum spacing between call starts, to respect provider rate
    /// limits. Default: 200ms. Zero disables pacing.
    pub min_interval: Duration,
    /// Maximum retry attempts per request after the first HTTP attempt.
    /// Default: 3.
    pub max_retries: u32,
    /// Base delay for exponential backoff between attempts.
    /// Actual delay = base * 2^retry (e.g., 250ms, 500ms, 1s).
    /// Default: 250ms.
    pub base_backoff: Duration,
    /// Cap on a single backoff delay. Default: 8s.
    pub max_backoff: Duration,
    /// Timeout for a single HTTP attempt, enforced by the dispatcher
    /// independently of backoff delays. Default: 30s.
    pub request_timeout: Duration,
    /// Maximum age of a terminal cache entry before `evict` removes it.
    /// Default: 300s.
    pub cache_max_age: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            min_interval: DEFAULT_MIN_INTERVAL,
            max_retries: DEFAULT_MAX_RETRIES,
            base_backoff: DEFAULT_BASE_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            cache_max_age: DEFAULT_CACHE_MAX_AGE,
        }
    }
}

impl OrchestratorConfig {
    /// Returns a copy with out-of-range values clamped to supported ranges.
    ///
    /// Logs a warning for each clamped field.
    pub fn validated(mut self) -> Self {
        self.max_concurrent = clamp_max_concurrent(self.max_concurrent);
        if self.queue_capacity == 0 {
            tracing::warn!(
                requested = self.queue_capacity,
                "queue_capacity of 0 would reject every request, clamping to 1"
            );
            self.queue_capacity = 1;
        }
        if self.max_backoff < self.base_backoff {
            tracing::warn!(
                base_ms = self.base_backoff.as_millis() as u64,
                max_ms = self.max_backoff.as_millis() as u64,
                "max_backoff below base_backoff, raising to base_backoff"
            );
            self.max_backoff = self.base_backoff;
        }
        self
    }
}

/// Clamps worker count to the valid range and logs a warning if clamped.
fn clamp_max_concurrent(value: usize) -> usize {
    if value == 0 {
        tracing::warn!(
            requested = value,
            max = MAX_MAX_CONCURRENT,
            "max_concurrent must be at least 1, clamping"
        );
        1
    } else if value > MAX_MAX_CONCURRENT {
        tracing::warn!(
            requested = value,
            max = MAX_MAX_CONCURRENT,
            "max_concurrent above maximum, clamping to {} (prevents provider rate limiting)",
            MAX_MAX_CONCURRENT
        );
        MAX_MAX_CONCURRENT
    } else {
        value
    }
}
