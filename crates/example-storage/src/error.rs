// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use example_core::CoreError;
use miette::Diagnostic;
use thiserror::Error;

/// Errors returned by storage plugins.
///
/// Every variant maps to one machine-readable reason and HTTP status code.
#[derive(Error, Debug, Diagnostic)]
pub enum StorageError {
    /// Object does not exist
    #[error("{resource} \"{name}\" not found")]
    #[diagnostic(
        code(storage::not_found),
        help("Verify the object name and namespace")
    )]
    NotFound { resource: String, name: String },

    /// Object with the same identity already exists
    #[error("{resource} \"{name}\" already exists")]
    #[diagnostic(
        code(storage::already_exists),
        help("Choose a different name or update the existing object")
    )]
    AlreadyExists { resource: String, name: String },

    /// Optimistic concurrency check failed
    #[error("Operation cannot be fulfilled on {resource} \"{name}\": {message}")]
    #[diagnostic(
        code(storage::conflict),
        help("Re-read the object and apply your changes to the latest version")
    )]
    Conflict {
        resource: String,
        name: String,
        message: String,
    },

    /// Object failed validation
    #[error("{resource} \"{name}\" is invalid: {message}")]
    #[diagnostic(
        code(storage::invalid),
        help("Fix the reported fields and resubmit the object")
    )]
    Invalid {
        resource: String,
        name: String,
        message: String,
    },

    /// Malformed request (selectors, continue tokens, mismatched identity)
    #[error("{message}")]
    #[diagnostic(code(storage::bad_request))]
    BadRequest { message: String },

    /// Requested resource version is no longer retained
    #[error("{message}")]
    #[diagnostic(
        code(storage::resource_expired),
        help("Relist to obtain a fresh resource version, then watch from it")
    )]
    ResourceExpired { message: String },

    /// Verb is not served for this resource
    #[error("{verb} is not supported on resources of kind {resource}")]
    #[diagnostic(code(storage::method_not_allowed))]
    MethodNotAllowed { verb: String, resource: String },

    /// Backend is unreachable or overloaded
    #[error("storage backend unavailable: {message}")]
    #[diagnostic(
        code(storage::unavailable),
        help("Retry the request later")
    )]
    Unavailable { message: String },

    /// Unexpected backend failure
    #[error("internal storage error: {message}")]
    #[diagnostic(code(storage::internal))]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

impl StorageError {
    pub fn not_found(resource: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            name: name.into(),
        }
    }

    pub fn already_exists(resource: impl Into<String>, name: impl Into<String>) -> Self {
        Self::AlreadyExists {
            resource: resource.into(),
            name: name.into(),
        }
    }

    pub fn conflict(
        resource: impl Into<String>,
        name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Conflict {
            resource: resource.into(),
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn invalid(
        resource: impl Into<String>,
        name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Invalid {
            resource: resource.into(),
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    pub fn resource_expired(message: impl Into<String>) -> Self {
        Self::ResourceExpired {
            message: message.into(),
        }
    }

    pub fn method_not_allowed(verb: impl Into<String>, resource: impl Into<String>) -> Self {
        Self::MethodNotAllowed {
            verb: verb.into(),
            resource: resource.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn internal(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Internal {
            message: message.into(),
            source,
        }
    }

    /// Machine-readable reason, as reported in a `Status` body
    pub fn reason(&self) -> &'static str {
        match self {
            StorageError::NotFound { .. } => "NotFound",
            StorageError::AlreadyExists { .. } => "AlreadyExists",
            StorageError::Conflict { .. } => "Conflict",
            StorageError::Invalid { .. } => "Invalid",
            StorageError::BadRequest { .. } => "BadRequest",
            StorageError::ResourceExpired { .. } => "Expired",
            StorageError::MethodNotAllowed { .. } => "MethodNotAllowed",
            StorageError::Unavailable { .. } => "ServiceUnavailable",
            StorageError::Internal { .. } => "InternalError",
        }
    }

    /// HTTP status code for this error
    pub fn code(&self) -> u16 {
        match self {
            StorageError::NotFound { .. } => 404,
            StorageError::AlreadyExists { .. } | StorageError::Conflict { .. } => 409,
            StorageError::Invalid { .. } => 422,
            StorageError::BadRequest { .. } => 400,
            StorageError::ResourceExpired { .. } => 410,
            StorageError::MethodNotAllowed { .. } => 405,
            StorageError::Unavailable { .. } => 503,
            StorageError::Internal { .. } => 500,
        }
    }
}

impl From<CoreError> for StorageError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Serialization { .. } | CoreError::KindMismatch { .. } => {
                StorageError::bad_request(err.to_string())
            }
            _ => StorageError::internal(err.to_string(), Some(Box::new(err))),
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::internal(format!("JSON error: {}", err), Some(Box::new(err)))
    }
}
