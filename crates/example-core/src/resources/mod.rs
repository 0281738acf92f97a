use crate::ResourceVersion;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ListMeta, ObjectMeta};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Base validation for all resources
pub fn validate_base(metadata: &ObjectMeta) -> Result<(), ResourceError> {
    let name = metadata
        .name
        .as_deref()
        .ok_or_else(|| ResourceError::MissingField("metadata.name".to_string()))?;

    if !is_valid_name(name) {
        return Err(ResourceError::InvalidName(name.to_string()));
    }

    if let Some(namespace) = metadata.namespace.as_deref() {
        if !is_valid_name(namespace) {
            return Err(ResourceError::InvalidNamespace(namespace.to_string()));
        }
    }

    Ok(())
}

/// Trait for API kinds served as REST resources.
///
/// The group and version are not part of the type: the same Rust type may be
/// registered under several group-versions in a [`Scheme`](crate::Scheme).
pub trait Resource: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Kind name (e.g., "ExampleResource")
    const KIND: &'static str;

    /// Plural, lowercase REST resource name (e.g., "exampleresources")
    const PLURAL: &'static str;

    /// Whether objects live inside a namespace
    const NAMESPACED: bool;

    /// Get the metadata of this resource
    fn metadata(&self) -> &ObjectMeta;

    /// Get mutable metadata
    fn metadata_mut(&mut self) -> &mut ObjectMeta;

    /// Get the resource version
    fn resource_version(&self) -> Option<ResourceVersion> {
        self.metadata()
            .resource_version
            .as_ref()
            .map(ResourceVersion::new)
    }

    /// Set the resource version
    fn set_resource_version(&mut self, version: ResourceVersion) {
        self.metadata_mut().resource_version = Some(version.0);
    }

    /// Validate the resource
    fn validate(&self) -> Result<(), ResourceError> {
        validate_base(self.metadata())
    }
}

/// Trait for the list variant of a kind, returned by collection verbs
pub trait ResourceList: Serialize + DeserializeOwned + Send + Sync + 'static {
    type Item: Resource;

    /// Kind name of the list (e.g., "ExampleResourceList")
    const KIND: &'static str;

    fn list_metadata(&self) -> &ListMeta;

    fn items(&self) -> &[Self::Item];
}

/// Why an object failed validation
#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("{0} is required")]
    MissingField(String),

    #[error("invalid name {0:?}: must be a lowercase RFC 1123 subdomain")]
    InvalidName(String),

    #[error("invalid namespace {0:?}: must be a lowercase RFC 1123 subdomain")]
    InvalidNamespace(String),

    #[error("{0}")]
    ValidationFailed(String),
}

const MAX_NAME_LEN: usize = 253;

/// Whether `name` is a valid object name: lowercase alphanumerics, `-` and
/// `.`, starting and ending with an alphanumeric
pub fn is_valid_name(name: &str) -> bool {
    let edge_ok = |c: Option<char>| c.is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit());

    name.len() <= MAX_NAME_LEN
        && edge_ok(name.chars().next())
        && edge_ok(name.chars().last())
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        for good in ["a", "example-1", "example.example-org.io", "0abc"] {
            assert!(is_valid_name(good), "{} should be valid", good);
        }
        let too_long = "a".repeat(MAX_NAME_LEN + 1);
        for bad in ["", "Example", "-a", "a.", "a_b", "a b", too_long.as_str()] {
            assert!(!is_valid_name(bad), "{:?} should be invalid", bad);
        }
    }

    #[test]
    fn test_metadata_checks() {
        let mut meta = ObjectMeta::default();
        let err = validate_base(&meta).unwrap_err();
        assert_eq!(err.to_string(), "metadata.name is required");

        meta.name = Some("UPPER".to_string());
        assert!(matches!(validate_base(&meta), Err(ResourceError::InvalidName(n)) if n == "UPPER"));

        meta.name = Some("ok".to_string());
        meta.namespace = Some("not_valid".to_string());
        assert!(matches!(
            validate_base(&meta),
            Err(ResourceError::InvalidNamespace(_))
        ));

        meta.namespace = None;
        assert!(validate_base(&meta).is_ok());
    }
}
