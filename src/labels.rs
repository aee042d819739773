//! Fixed label keys stamped on every resource this crate manages.

/// Label key carrying the deployment [`crate::identifier::Identifier`].
pub const IDENTIFIER: &str = "io.dockform.identifier";

/// Label key carrying a service's compose config hash, set on the running
/// container so state probing does not need to recompute it every run.
pub const SERVICE_CONFIG_HASH: &str = "io.dockform.service.config-hash";

/// Build the `--label key=value` pair docker/compose expect for the
/// identifier label.
#[must_use]
pub fn identifier_label(identifier: &crate::identifier::Identifier) -> (String, String) {
    (IDENTIFIER.to_string(), identifier.to_string())
}

/// Build the `--label key=value` pair for a service's config hash.
#[must_use]
pub fn config_hash_label(hash: &str) -> (String, String) {
    (SERVICE_CONFIG_HASH.to_string(), hash.to_string())
}

/// Render a label filter argument, e.g. `label=io.dockform.identifier=demo`.
#[must_use]
pub fn identifier_filter(identifier: &crate::identifier::Identifier) -> String {
    format!("{IDENTIFIER}={identifier}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::Identifier;

    #[test]
    fn filter_format() {
        let id = Identifier::new("demo").unwrap();
        assert_eq!(identifier_filter(&id), "io.dockform.identifier=demo");
    }
}
