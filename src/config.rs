//! Tunables the core owns directly (as opposed to manifest content).
//!
//! The front-end reads these from its own configuration layer and hands the
//! core a populated [`RuntimeConfig`]; the core never reads environment
//! variables or files itself.

use std::time::Duration;

/// Bounded exponential backoff used by the Applier for transient errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base: Duration,
    /// Multiplier applied to the delay after each attempt.
    pub factor: u32,
    /// Upper bound on the delay, regardless of `factor`.
    pub cap: Duration,
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
}

impl RetryPolicy {
    /// The delay to wait before retrying for the given zero-indexed attempt
    /// number (0 = first retry, after the initial attempt failed).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let scaled = self.base.saturating_mul(self.factor.saturating_pow(attempt));
        scaled.min(self.cap)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            factor: 2,
            cap: Duration::from_secs(8),
            max_attempts: 4,
        }
    }
}

/// Runtime tunables for the Engine Client, State Probe, Fileset Engine,
/// Planner, and Applier.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Worker pool size for the Applier; also the default bound for the
    /// compose-invocation semaphore. `1` forces fully sequential execution.
    pub parallelism: usize,
    /// Bound on concurrent compose invocations. Defaults to `parallelism`.
    pub compose_semaphore: usize,
    /// Bound on concurrent helper-container invocations against a single
    /// volume (always 1 in practice, but left configurable for tests).
    pub helper_semaphore_per_volume: usize,
    /// Timeout applied to every subprocess invocation.
    pub command_timeout: Duration,
    /// Helper image reference used for file-level work inside volumes.
    pub helper_image: String,
    /// Backoff policy for transient (`Unavailable`/`Timeout`) errors.
    pub retry: RetryPolicy,
    /// Grace period the Applier waits for workers to unwind after
    /// cancellation before forcibly detaching them.
    pub cancellation_grace: Duration,
    /// Byte budget before an upload tar stream is split into chunks.
    pub tar_chunk_bytes: usize,
    /// How many times the Destroy Pipeline retries a volume removal that
    /// failed because the volume is still in use, waiting 2s between tries.
    pub volume_busy_retries: u32,
}

impl RuntimeConfig {
    /// The number of available OS threads, floored at 2 so a single-core
    /// host still gets some concurrency between independent stacks.
    fn default_parallelism() -> usize {
        std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(2)
            .max(2)
    }

    /// Force strictly sequential execution (`parallelism = 1`).
    #[must_use]
    pub fn sequential() -> Self {
        Self {
            parallelism: 1,
            compose_semaphore: 1,
            helper_semaphore_per_volume: 1,
            ..Self::default()
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let parallelism = Self::default_parallelism();
        Self {
            parallelism,
            compose_semaphore: parallelism,
            helper_semaphore_per_volume: 1,
            command_timeout: Duration::from_secs(30),
            helper_image: "docker.io/dockform/helper:latest".to_string(),
            retry: RetryPolicy::default(),
            cancellation_grace: Duration::from_secs(10),
            tar_chunk_bytes: 64 * 1024 * 1024,
            volume_busy_retries: 2,
        }
    }
}
