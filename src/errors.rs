//! Error taxonomy for the reconciliation core.
//!
//! Every fallible entry point in this crate returns [`Result<T>`]. Errors are
//! grouped by [`Kind`] rather than by call site, so a front-end can map a
//! small, stable set of kinds to exit codes and user-facing hints instead of
//! pattern-matching on engine-specific strings.

use std::time::Duration;
use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The seven error kinds the core ever produces.
///
/// Retries (see [`crate::config::RetryPolicy`]) are only ever attempted for
/// [`Kind::Unavailable`] and [`Kind::Timeout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// A manifest error surfaced by the Planner: unknown volume reference,
    /// conflicting filesets, an invalid identifier pattern.
    InvalidInput,
    /// A referenced resource (file path, engine context) is absent.
    NotFound,
    /// The engine daemon is not reachable.
    Unavailable,
    /// The engine or compose reported a failure; its diagnostic is attached.
    External,
    /// A destructive operation cannot proceed (e.g. a volume still in use).
    Conflict,
    /// A single command exceeded its deadline.
    Timeout,
    /// A parse or invariant failure inside the core itself.
    Internal,
}

/// The crate's single error type.
///
/// Carries the [`Kind`], an `operation` label identifying what was being
/// attempted, and the underlying engine diagnostic or source error when one
/// exists.
#[derive(Error, Debug)]
#[error("{operation}: {message}")]
pub struct Error {
    /// Which of the seven kinds this error belongs to.
    pub kind: Kind,
    /// What the core was trying to do, e.g. `"compose up (web/nginx)"`.
    pub operation: String,
    /// Human-readable detail; for `External` this is the engine's own
    /// diagnostic, propagated verbatim.
    pub message: String,
    /// Underlying error, when this wraps an I/O or parse failure.
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl Error {
    /// Build an error of the given kind with no underlying source.
    pub fn new(kind: Kind, operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            operation: operation.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Attach an underlying error as the source chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// True if this kind is eligible for the Applier's retry policy.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, Kind::Unavailable | Kind::Timeout)
    }

    /// True if this is the specific "resource not found" kind, which the
    /// Destroy Pipeline treats as success rather than failure.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.kind == Kind::NotFound
    }

    /// Manifest/plan-construction error.
    pub fn invalid_input(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Kind::InvalidInput, operation, message)
    }

    /// A referenced resource does not exist.
    pub fn not_found(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Kind::NotFound, operation, message)
    }

    /// The engine daemon could not be reached.
    pub fn unavailable(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Kind::Unavailable, operation, message)
    }

    /// The engine ran the command and reported failure.
    pub fn external(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Kind::External, operation, message)
    }

    /// A destructive operation could not proceed (resource busy/in-use).
    pub fn conflict(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Kind::Conflict, operation, message)
    }

    /// A command exceeded its deadline.
    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::new(
            Kind::Timeout,
            operation,
            format!("timed out after {after:?}"),
        )
    }

    /// A parse failure or broken invariant inside the core.
    pub fn internal(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Kind::Internal, operation, message)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::new(Kind::Internal, "spawn subprocess", e.to_string()).with_source(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(Error::unavailable("ping", "daemon down").is_retryable());
        assert!(Error::timeout("compose up", Duration::from_secs(1)).is_retryable());
        assert!(!Error::external("compose up", "exit 1").is_retryable());
        assert!(!Error::invalid_input("plan", "bad ref").is_retryable());
    }

    #[test]
    fn not_found_detection() {
        assert!(Error::not_found("remove volume", "no such volume").is_not_found());
        assert!(!Error::conflict("remove volume", "in use").is_not_found());
    }

    #[test]
    fn display_includes_operation_and_message() {
        let err = Error::external("compose up (web/nginx)", "exit code 1");
        let rendered = err.to_string();
        assert!(rendered.contains("compose up (web/nginx)"));
        assert!(rendered.contains("exit code 1"));
    }
}
