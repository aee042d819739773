//! Cooperative cancellation threaded through every public entry point.
//!
//! There is no implicit cancellation via exceptions or process-wide signal
//! handlers: a caller that wants to abort an in-progress probe, plan, or
//! apply hands this token in up front and calls [`CancellationToken::cancel`]
//! from wherever it likes (a Ctrl-C handler, a timeout, a test).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cheap, cloneable, `Send + Sync` cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a fresh, not-yet-cancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// True once [`CancellationToken::cancel`] has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
