use crate::{CoreError, GroupVersionKind, Resource, ResourceVersion, Result};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Type-erased API object.
///
/// Storage plugins and the serving engine pass objects around in this form.
/// `data` holds every top-level field other than the type meta and metadata,
/// typically `spec` and `status`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DynamicObject {
    #[serde(rename = "apiVersion", default, skip_serializing_if = "String::is_empty")]
    pub api_version: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,

    #[serde(default)]
    pub metadata: ObjectMeta,

    #[serde(flatten)]
    pub data: Map<String, Value>,
}

impl DynamicObject {
    pub fn new(gvk: &GroupVersionKind) -> Self {
        Self {
            api_version: gvk.api_version(),
            kind: gvk.kind.clone(),
            ..Default::default()
        }
    }

    /// Convert a typed resource into its type-erased form
    pub fn from_typed<T: Resource>(resource: &T, gvk: &GroupVersionKind) -> Result<Self> {
        let mut object: DynamicObject = serde_json::from_value(serde_json::to_value(resource)?)?;
        object.api_version = gvk.api_version();
        object.kind = gvk.kind.clone();
        Ok(object)
    }

    /// Convert back into a typed resource
    pub fn to_typed<T: Resource>(&self) -> Result<T> {
        if !self.kind.is_empty() && self.kind != T::KIND {
            return Err(CoreError::kind_mismatch(T::KIND, self.kind.clone()));
        }
        Ok(serde_json::from_value(serde_json::to_value(self)?)?)
    }

    pub fn gvk(&self) -> GroupVersionKind {
        GroupVersionKind::from_api_version_kind(&self.api_version, &self.kind)
    }

    pub fn name(&self) -> Option<&str> {
        self.metadata.name.as_deref()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.metadata.namespace.as_deref()
    }

    pub fn resource_version(&self) -> Option<ResourceVersion> {
        self.metadata
            .resource_version
            .as_ref()
            .map(ResourceVersion::new)
    }

    pub fn set_resource_version(&mut self, version: ResourceVersion) {
        self.metadata.resource_version = Some(version.0);
    }

    pub fn spec(&self) -> Option<&Value> {
        self.data.get("spec")
    }

    pub fn status(&self) -> Option<&Value> {
        self.data.get("status")
    }

    /// Replace the status stanza; `None` removes it
    pub fn set_status(&mut self, status: Option<Value>) {
        match status {
            Some(status) => {
                self.data.insert("status".to_string(), status);
            }
            None => {
                self.data.remove("status");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flattened_fields() {
        let value = json!({
            "apiVersion": "example.example-org.io/v1alpha1",
            "kind": "ExampleResource",
            "metadata": {"name": "a", "resourceVersion": "3"},
            "spec": {"name": "a"},
            "status": {"phase": "Ready"}
        });

        let object: DynamicObject = serde_json::from_value(value.clone()).unwrap();
        assert_eq!(object.name(), Some("a"));
        assert_eq!(object.resource_version(), Some(ResourceVersion::from("3")));
        assert_eq!(object.spec(), Some(&json!({"name": "a"})));
        assert_eq!(object.gvk().kind, "ExampleResource");

        assert_eq!(serde_json::to_value(&object).unwrap(), value);
    }

    #[test]
    fn test_set_status() {
        let mut object = DynamicObject::default();
        object.set_status(Some(json!({"phase": "Ready"})));
        assert!(object.status().is_some());
        object.set_status(None);
        assert!(object.status().is_none());
    }
}
