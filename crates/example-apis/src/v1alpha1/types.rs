use example_core::{ListMeta, ObjectMeta, Resource, ResourceList};
use serde::{Deserialize, Serialize};

fn default_count() -> i32 {
    1
}

fn default_enabled() -> bool {
    true
}

/// ExampleResource represents a generic example resource.
///
/// ```yaml
/// apiVersion: example.example-org.io/v1alpha1
/// kind: ExampleResource
/// metadata:
///   name: my-example
/// spec:
///   name: "example-1"
///   count: 5
///   enabled: true
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExampleResource {
    #[serde(default)]
    pub metadata: ObjectMeta,

    pub spec: ExampleResourceSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ExampleResourceStatus>,
}

/// Desired state, written by clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExampleResourceSpec {
    pub name: String,

    #[serde(default = "default_count")]
    pub count: i32,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl Default for ExampleResourceSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            count: default_count(),
            enabled: default_enabled(),
        }
    }
}

/// Observed state, written only through the status subresource
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExampleResourceStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl ExampleResource {
    pub fn new(name: impl Into<String>, spec: ExampleResourceSpec) -> Self {
        Self {
            metadata: ObjectMeta {
                name: Some(name.into()),
                ..Default::default()
            },
            spec,
            status: None,
        }
    }
}

impl Resource for ExampleResource {
    const KIND: &'static str = "ExampleResource";
    const PLURAL: &'static str = "exampleresources";
    const NAMESPACED: bool = false;

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

/// ExampleResourceList is a list of ExampleResource objects
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExampleResourceList {
    #[serde(default)]
    pub metadata: ListMeta,

    #[serde(default)]
    pub items: Vec<ExampleResource>,
}

impl ResourceList for ExampleResourceList {
    type Item = ExampleResource;
    const KIND: &'static str = "ExampleResourceList";

    fn list_metadata(&self) -> &ListMeta {
        &self.metadata
    }

    fn items(&self) -> &[ExampleResource] {
        &self.items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_spec_defaults() {
        let resource: ExampleResource = serde_json::from_value(json!({
            "metadata": {"name": "a"},
            "spec": {"name": "a"}
        }))
        .unwrap();

        assert_eq!(resource.spec.count, 1);
        assert!(resource.spec.enabled);
        assert!(resource.status.is_none());
    }

    #[test]
    fn test_spec_name_required() {
        let result: Result<ExampleResource, _> = serde_json::from_value(json!({
            "metadata": {"name": "a"},
            "spec": {"count": 2}
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_explicit_values_kept() {
        let resource: ExampleResource = serde_json::from_value(json!({
            "metadata": {"name": "a"},
            "spec": {"name": "a", "count": 0, "enabled": false},
            "status": {"phase": "Ready", "observedGeneration": 2}
        }))
        .unwrap();

        assert_eq!(resource.spec.count, 0);
        assert!(!resource.spec.enabled);
        let status = resource.status.unwrap();
        assert_eq!(status.phase.as_deref(), Some("Ready"));
        assert_eq!(status.observed_generation, Some(2));
    }

    #[test]
    fn test_validate_requires_metadata_name() {
        let resource = ExampleResource::default();
        assert!(resource.validate().is_err());

        let resource = ExampleResource::new("my-example", ExampleResourceSpec::default());
        assert!(resource.validate().is_ok());
    }
}
