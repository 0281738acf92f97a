//! ExampleService Core - API machinery shared by the server crates
//!
//! This crate provides:
//! - Group/version/kind identifiers
//! - The `Resource` trait and the type-erased `DynamicObject`
//! - The `Scheme` type registry and the content-negotiating `CodecFactory`
//! - Watch event types and build version information

pub mod codec;
pub mod error;
pub mod events;
pub mod object;
pub mod resources;
pub mod scheme;
pub mod types;
pub mod version;

// Re-export commonly used types
pub use codec::{CodecFactory, MediaType, Serializer};
pub use error::{CoreError, Result};
pub use events::{WatchEvent, WatchEventType};
pub use object::DynamicObject;
pub use resources::{is_valid_name, validate_base, Resource, ResourceError, ResourceList};
pub use scheme::{AddToSchemeFn, KindInfo, KindRole, Scheme, SchemeBuilder};
pub use types::{GroupResource, GroupVersion, GroupVersionKind, GroupVersionResource, ResourceVersion};
pub use version::VersionInfo;

// Re-export k8s-openapi types for convenience
pub use k8s_openapi;
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ListMeta, ObjectMeta};
