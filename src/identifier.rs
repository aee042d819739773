//! Deployment identifier: the label value that scopes every resource this
//! crate is allowed to see, create, or destroy.

use crate::errors::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A validated deployment identifier, matching `[A-Za-z0-9-]+`.
///
/// Stamped as the [`crate::labels::IDENTIFIER`] label on every managed
/// resource. Resources lacking it are invisible to the core: list operations
/// filter by it, and write operations never touch a resource that doesn't
/// carry it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identifier(String);

impl Identifier {
    /// Validate and wrap a raw identifier string.
    pub fn new(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(Error::invalid_input(
                "parse identifier",
                "identifier cannot be empty",
            ));
        }
        if !raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(Error::invalid_input(
                "parse identifier",
                format!("identifier {raw:?} must match [A-Za-z0-9-]+"),
            ));
        }
        Ok(Self(raw))
    }

    /// The raw label value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_alnum_and_hyphen() {
        assert!(Identifier::new("demo-stack-1").is_ok());
    }

    #[test]
    fn rejects_empty() {
        assert!(Identifier::new("").is_err());
    }

    #[test]
    fn rejects_invalid_characters() {
        for bad in ["demo_stack", "demo.stack", "demo stack", "démo"] {
            assert!(Identifier::new(bad).is_err(), "{bad:?} should be rejected");
        }
    }
}
