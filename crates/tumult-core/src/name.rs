//! Qualified node-type names.

use std::fmt;

/// Namespace of the node types shipped with the core.
pub const CORE_NAMESPACE: &str = "urn:tumult:core";

/// A pluggable node type is addressed by `(namespace, local name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QualifiedName {
    namespace: String,
    local: String,
}

impl QualifiedName {
    /// Create a qualified name.
    pub fn new(namespace: impl Into<String>, local: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), local: local.into() }
    }

    /// A name in the core namespace.
    pub fn core(local: impl Into<String>) -> Self {
        Self::new(CORE_NAMESPACE, local)
    }

    /// Namespace URI.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Local name.
    pub fn local(&self) -> &str {
        &self.local
    }

    /// True if this name is `local` in the core namespace.
    pub fn is_core(&self, local: &str) -> bool {
        self.namespace == CORE_NAMESPACE && self.local == local
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}{}", self.namespace, self.local)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_clark_notation() {
        let name = QualifiedName::new("urn:x", "Actor");
        assert_eq!(name.to_string(), "{urn:x}Actor");
    }

    #[test]
    fn core_names_are_recognized() {
        assert!(QualifiedName::core("While").is_core("While"));
        assert!(!QualifiedName::new("urn:x", "While").is_core("While"));
    }
}
