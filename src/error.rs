//! Error types for Stackform.
//!
//! Every failure surfaced while declaring or synthesizing a stack is a
//! variant of [`Error`]. There is no recovery logic: a synthesis either
//! produces a complete template or fails with one of these diagnostics.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Stackform operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for Stackform.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Construct Tree Errors
    // ========================================================================
    /// Stack name does not satisfy the provider naming rules.
    #[error("Invalid stack name '{name}': {message}")]
    InvalidStackName {
        /// Offending name
        name: String,
        /// Why it was rejected
        message: String,
    },

    /// Construct id is empty or contains a path separator.
    #[error("Invalid construct id '{0}': ids must be non-empty and may not contain '/'")]
    InvalidConstructId(String),

    /// Two siblings share the same construct id.
    #[error("There is already a construct with id '{id}' under '{parent}'")]
    DuplicateConstructId {
        /// Parent path
        parent: String,
        /// Conflicting id
        id: String,
    },

    /// Two resources resolve to the same logical id.
    #[error("Duplicate logical id '{logical_id}' (from '{path}')")]
    DuplicateLogicalId {
        /// Logical id
        logical_id: String,
        /// Construct path of the second resource
        path: String,
    },

    /// A construct path does not exist in the tree.
    #[error("Construct '{0}' not found")]
    ConstructNotFound(String),

    // ========================================================================
    // Resource Errors
    // ========================================================================
    /// Invalid availability zone count for a network.
    #[error("Invalid availability zone count {requested}: {message}")]
    InvalidAzCount {
        /// Requested AZ count
        requested: usize,
        /// Why it was rejected
        message: String,
    },

    /// A resource property failed validation.
    #[error("Invalid property '{property}' on '{resource}': {message}")]
    InvalidProperty {
        /// Construct path or logical id
        resource: String,
        /// Property name
        property: String,
        /// Error message
        message: String,
    },

    /// A code asset directory or file is missing.
    #[error("Cannot find asset at {}", .0.display())]
    AssetNotFound(PathBuf),

    /// The same HTTP method was added twice on one API resource.
    #[error("Method {method} already exists on resource '{path}'")]
    DuplicateRoute {
        /// HTTP method
        method: String,
        /// Resource path
        path: String,
    },

    // ========================================================================
    // Synthesis Errors
    // ========================================================================
    /// An expression references a logical id that is not in the template.
    #[error("Resource '{from}' references unknown logical id '{target}'")]
    UnresolvedReference {
        /// Referencing resource (or output)
        from: String,
        /// Missing target
        target: String,
    },

    /// The resource graph contains a cycle.
    #[error("Dependency cycle detected: {0}")]
    DependencyCycle(String),

    /// A template could not be parsed.
    #[error("Invalid template: {0}")]
    InvalidTemplate(String),

    // ========================================================================
    // IO / Serialization
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Directory traversal error while fingerprinting or staging assets.
    #[error("Asset traversal error: {0}")]
    Walk(#[from] walkdir::Error),
}

impl Error {
    /// Build an [`Error::InvalidProperty`].
    pub fn invalid_property(
        resource: impl Into<String>,
        property: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidProperty {
            resource: resource.into(),
            property: property.into(),
            message: message.into(),
        }
    }

    /// Whether this error originates in the construct tree rather than in
    /// template-level validation.
    pub fn is_declaration_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidStackName { .. }
                | Error::InvalidConstructId(_)
                | Error::DuplicateConstructId { .. }
                | Error::DuplicateLogicalId { .. }
                | Error::ConstructNotFound(_)
                | Error::InvalidAzCount { .. }
                | Error::InvalidProperty { .. }
                | Error::AssetNotFound(_)
                | Error::DuplicateRoute { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::DuplicateConstructId {
            parent: "Stack/MyVpc".to_string(),
            id: "PublicSubnet1".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "There is already a construct with id 'PublicSubnet1' under 'Stack/MyVpc'"
        );

        let err = Error::AssetNotFound(PathBuf::from("lambdas/missing"));
        assert!(err.to_string().contains("lambdas/missing"));
    }

    #[test]
    fn test_declaration_classification() {
        assert!(Error::InvalidAzCount {
            requested: 0,
            message: "must be at least 1".into()
        }
        .is_declaration_error());
        assert!(!Error::DependencyCycle("a -> b -> a".into()).is_declaration_error());
    }
}
