//! The progress sink the Applier reports through: a seam for an optional
//! terminal UI. The core must function identically when the sink is a
//! no-op.

/// Lifecycle phase of one operation, as observed by the Applier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// The operation has been scheduled and begun executing.
    Start,
    /// A transient error is being retried.
    Retry,
    /// The operation completed successfully.
    Ok,
    /// The operation failed after exhausting retries.
    Fail,
    /// The operation was never attempted because a dependency failed.
    Skip,
}

/// One progress notification emitted by the Applier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    /// Human-readable description of the operation, e.g. `"Service web/nginx"`.
    pub operation: String,
    /// Lifecycle phase this event reports.
    pub phase: Phase,
    /// Additional detail (an error message, a retry reason), when relevant.
    pub message: Option<String>,
}

/// A sink the Applier reports [`ProgressEvent`]s through.
///
/// Implementations must not block for long: the Applier calls this
/// synchronously from the scheduling loop.
pub trait ProgressSink: Send + Sync {
    /// Handle one progress event.
    fn report(&self, event: ProgressEvent);
}

/// A sink that discards every event; the default when no terminal UI is
/// attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgressSink;

impl ProgressSink for NoopProgressSink {
    fn report(&self, _event: ProgressEvent) {}
}
