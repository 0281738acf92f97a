// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Core error type for scheme registration and codec operations
#[derive(Error, Debug, Diagnostic)]
pub enum CoreError {
    /// A GVK is already bound to a different Rust type
    #[error("Kind {gvk} is already registered to {existing}, cannot register {requested}")]
    #[diagnostic(
        code(example::duplicate_kind),
        help("Each group/version/kind may only be bound to one type. Rename the kind or register it under another version")
    )]
    DuplicateKind {
        #[allow(unused)]
        gvk: String,
        #[allow(unused)]
        existing: String,
        #[allow(unused)]
        requested: String,
    },

    /// Kind is not known to the scheme
    #[error("No kind {gvk} is registered in the scheme")]
    #[diagnostic(
        code(example::unknown_kind),
        help("Register the kind with Scheme::add_known_type before decoding it")
    )]
    UnknownKind {
        #[allow(unused)]
        gvk: String,
    },

    /// Decoded object does not match the kind served at this path
    #[error("Expected kind {expected}, got {found}")]
    #[diagnostic(
        code(example::kind_mismatch),
        help("Check the apiVersion and kind fields of the submitted object")
    )]
    KindMismatch {
        #[allow(unused)]
        expected: String,
        #[allow(unused)]
        found: String,
    },

    /// Invalid API version string
    #[error("Invalid API version: {api_version}")]
    #[diagnostic(
        code(example::invalid_api_version),
        help("Use an API version like 'v1' or 'example.example-org.io/v1alpha1'")
    )]
    InvalidApiVersion {
        #[allow(unused)]
        api_version: String,
    },

    /// Content type cannot be decoded
    #[error("Unsupported media type: {media_type}")]
    #[diagnostic(
        code(example::unsupported_media_type),
        help("Supported media types: application/json, application/yaml, application/vnd.kubernetes.bincode")
    )]
    UnsupportedMediaType {
        #[allow(unused)]
        media_type: String,
    },

    /// None of the accepted media types can be produced
    #[error("None of the requested media types are acceptable: {accept}")]
    #[diagnostic(
        code(example::not_acceptable),
        help("Request application/json, application/yaml or application/vnd.kubernetes.bincode")
    )]
    NotAcceptable {
        #[allow(unused)]
        accept: String,
    },

    /// Serialization error
    #[error("Serialization error: {message}")]
    #[diagnostic(
        code(example::serialization_error),
        help("Ensure the object is well-formed for the declared content type")
    )]
    Serialization {
        #[allow(unused)]
        message: String,
        #[source]
        #[allow(unused)]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    /// Create a DuplicateKind error
    pub fn duplicate_kind(
        gvk: impl Into<String>,
        existing: impl Into<String>,
        requested: impl Into<String>,
    ) -> Self {
        Self::DuplicateKind {
            gvk: gvk.into(),
            existing: existing.into(),
            requested: requested.into(),
        }
    }

    /// Create an UnknownKind error
    pub fn unknown_kind(gvk: impl Into<String>) -> Self {
        Self::UnknownKind { gvk: gvk.into() }
    }

    /// Create a KindMismatch error
    pub fn kind_mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::KindMismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Create an InvalidApiVersion error
    pub fn invalid_api_version(api_version: impl Into<String>) -> Self {
        Self::InvalidApiVersion {
            api_version: api_version.into(),
        }
    }

    /// Create an UnsupportedMediaType error
    pub fn unsupported_media_type(media_type: impl Into<String>) -> Self {
        Self::UnsupportedMediaType {
            media_type: media_type.into(),
        }
    }

    /// Create a NotAcceptable error
    pub fn not_acceptable(accept: impl Into<String>) -> Self {
        Self::NotAcceptable {
            accept: accept.into(),
        }
    }

    /// Create a Serialization error
    pub fn serialization(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Serialization {
            message: message.into(),
            source,
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::serialization(format!("JSON error: {}", err), Some(Box::new(err)))
    }
}

impl From<serde_yaml::Error> for CoreError {
    fn from(err: serde_yaml::Error) -> Self {
        CoreError::serialization(format!("YAML error: {}", err), Some(Box::new(err)))
    }
}

impl From<bincode::Error> for CoreError {
    fn from(err: bincode::Error) -> Self {
        let message = format!("binary error: {}", err);
        let source: Box<dyn std::error::Error + Send + Sync> = err;
        CoreError::serialization(message, Some(source))
    }
}
