//! The secret provider: an external collaborator the core consumes but never
//! implements a decryption backend for.

use crate::errors::Result;
use crate::manifest::SecretRef;
use async_trait::async_trait;

/// Resolves an opaque [`SecretRef`] into plaintext key/value pairs.
///
/// Implementations live outside this crate (a SOPS-backed provider, a
/// vault client, ...). The core only ever consumes the resulting pairs,
/// feeding them into compose's inline environment for both hash computation
/// and runtime.
#[async_trait]
pub trait SecretProvider: Send + Sync {
    /// Resolve a reference into plaintext pairs, or an error.
    async fn resolve(&self, secret_ref: &SecretRef) -> Result<Vec<(String, String)>>;
}

/// A provider that resolves every reference to an empty set of pairs.
///
/// Used in tests and as the default when a manifest declares no
/// `sops_refs`, so callers never need an `Option<dyn SecretProvider>`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSecretProvider;

#[async_trait]
impl SecretProvider for NullSecretProvider {
    async fn resolve(&self, _secret_ref: &SecretRef) -> Result<Vec<(String, String)>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_provider_resolves_empty() {
        let provider = NullSecretProvider;
        let pairs = provider.resolve(&SecretRef("anything".into())).await.unwrap();
        assert!(pairs.is_empty());
    }
}
