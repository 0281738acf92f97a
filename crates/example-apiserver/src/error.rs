// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use example_core::k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;
use example_core::CoreError;
use example_storage::StorageError;
use miette::Diagnostic;
use thiserror::Error;

/// Request-time error, rendered as a `Status` body
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("{0}")]
    NotFound(String),

    /// Resource already exists (409)
    #[error("{0}")]
    AlreadyExists(String),

    /// Conflict - concurrent modification (409)
    #[error("{0}")]
    Conflict(String),

    /// Validation failed (422)
    #[error("{0}")]
    Invalid(String),

    /// Invalid input (400)
    #[error("{0}")]
    BadRequest(String),

    /// Verb not served for this resource (405)
    #[error("{0}")]
    MethodNotAllowed(String),

    /// No acceptable response media type (406)
    #[error("{0}")]
    NotAcceptable(String),

    /// Request body media type cannot be decoded (415)
    #[error("{0}")]
    UnsupportedMediaType(String),

    /// Requested resource version is no longer retained (410)
    #[error("{0}")]
    Expired(String),

    /// Backend temporarily unavailable (503)
    #[error("{0}")]
    ServiceUnavailable(String),

    /// Internal server error (500)
    #[error("{0}")]
    Internal(String),
}

/// Result type for request handling
pub type Result<T> = std::result::Result<T, ApiError>;

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::AlreadyExists(_) | ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Invalid(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::NotAcceptable(_) => StatusCode::NOT_ACCEPTABLE,
            ApiError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::Expired(_) => StatusCode::GONE,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable reason carried in the `Status` body
    pub fn reason(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "NotFound",
            ApiError::AlreadyExists(_) => "AlreadyExists",
            ApiError::Conflict(_) => "Conflict",
            ApiError::Invalid(_) => "Invalid",
            ApiError::BadRequest(_) => "BadRequest",
            ApiError::MethodNotAllowed(_) => "MethodNotAllowed",
            ApiError::NotAcceptable(_) => "NotAcceptable",
            ApiError::UnsupportedMediaType(_) => "UnsupportedMediaType",
            ApiError::Expired(_) => "Expired",
            ApiError::ServiceUnavailable(_) => "ServiceUnavailable",
            ApiError::Internal(_) => "InternalError",
        }
    }

    pub fn status(&self) -> Status {
        Status {
            code: Some(i32::from(self.status_code().as_u16())),
            message: Some(self.to_string()),
            reason: Some(self.reason().to_string()),
            status: Some("Failure".to_string()),
            ..Default::default()
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self.status())).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        let message = err.to_string();
        match err {
            StorageError::NotFound { .. } => ApiError::NotFound(message),
            StorageError::AlreadyExists { .. } => ApiError::AlreadyExists(message),
            StorageError::Conflict { .. } => ApiError::Conflict(message),
            StorageError::Invalid { .. } => ApiError::Invalid(message),
            StorageError::BadRequest { .. } => ApiError::BadRequest(message),
            StorageError::ResourceExpired { .. } => ApiError::Expired(message),
            StorageError::MethodNotAllowed { .. } => ApiError::MethodNotAllowed(message),
            StorageError::Unavailable { .. } => ApiError::ServiceUnavailable(message),
            StorageError::Internal { .. } => ApiError::Internal(message),
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        let message = err.to_string();
        match err {
            CoreError::UnsupportedMediaType { .. } => ApiError::UnsupportedMediaType(message),
            CoreError::NotAcceptable { .. } => ApiError::NotAcceptable(message),
            CoreError::Serialization { .. }
            | CoreError::KindMismatch { .. }
            | CoreError::InvalidApiVersion { .. } => ApiError::BadRequest(message),
            CoreError::UnknownKind { .. } | CoreError::DuplicateKind { .. } => {
                ApiError::Internal(message)
            }
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::BadRequest(format!("JSON error: {}", err))
    }
}

/// Configuration, assembly and serving errors. These abort startup.
#[derive(Error, Debug, Diagnostic)]
pub enum ServerError {
    /// A declared kind has no storage backend
    #[error("missing storage for resource {resource}")]
    #[diagnostic(
        code(apiserver::missing_storage),
        help("Register a storage backend for {resource} in the {group_version} storage registry")
    )]
    MissingStorage {
        #[allow(unused)]
        resource: String,
        #[allow(unused)]
        group_version: String,
    },

    /// Storage registered under a name no kind declares
    #[error("storage registered for unknown resource {resource} in {group_version}")]
    #[diagnostic(
        code(apiserver::unknown_resource),
        help("Storage names must match the plural name of a kind registered in the scheme")
    )]
    UnknownResource {
        #[allow(unused)]
        resource: String,
        #[allow(unused)]
        group_version: String,
    },

    /// Storage configured for a group-version the scheme does not know
    #[error("group version {group_version} is not registered in the scheme")]
    #[diagnostic(
        code(apiserver::unknown_group_version),
        help("Install the API group into the scheme before configuring its storage")
    )]
    UnknownGroupVersion {
        #[allow(unused)]
        group_version: String,
    },

    /// Two API groups claim the same REST path
    #[error("API group {group} is already installed at {path}")]
    #[diagnostic(
        code(apiserver::duplicate_group),
        help("Each API group may only be installed once")
    )]
    DuplicateGroup {
        #[allow(unused)]
        group: String,
        #[allow(unused)]
        path: String,
    },

    /// Required configuration is absent or out of range
    #[error("invalid configuration: {message}")]
    #[diagnostic(code(apiserver::invalid_config))]
    InvalidConfig {
        #[allow(unused)]
        message: String,
    },

    /// TLS material could not be produced or loaded
    #[error("TLS setup failed: {message}")]
    #[diagnostic(
        code(apiserver::tls),
        help("Check --cert-dir permissions or the --tls-cert-file/--tls-private-key-file paths")
    )]
    Tls {
        #[allow(unused)]
        message: String,
    },

    /// The listener could not be bound or failed while serving
    #[error("failed to serve on {address}: {source}")]
    #[diagnostic(
        code(apiserver::serve),
        help("Check that the address is free and the process may bind to it")
    )]
    Serve {
        #[allow(unused)]
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// Scheme or codec error during assembly
    #[error(transparent)]
    #[diagnostic(transparent)]
    Core(#[from] CoreError),
}

impl ServerError {
    pub fn missing_storage(resource: impl Into<String>, group_version: impl Into<String>) -> Self {
        Self::MissingStorage {
            resource: resource.into(),
            group_version: group_version.into(),
        }
    }

    pub fn unknown_resource(resource: impl Into<String>, group_version: impl Into<String>) -> Self {
        Self::UnknownResource {
            resource: resource.into(),
            group_version: group_version.into(),
        }
    }

    pub fn unknown_group_version(group_version: impl Into<String>) -> Self {
        Self::UnknownGroupVersion {
            group_version: group_version.into(),
        }
    }

    pub fn duplicate_group(group: impl Into<String>, path: impl Into<String>) -> Self {
        Self::DuplicateGroup {
            group: group.into(),
            path: path.into(),
        }
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    pub fn tls(message: impl Into<String>) -> Self {
        Self::Tls {
            message: message.into(),
        }
    }

    pub fn serve(address: impl ToString, source: std::io::Error) -> Self {
        Self::Serve {
            address: address.to_string(),
            source,
        }
    }
}
