//! Type registry mapping group/version/kind identities to Rust types.
//!
//! A [`Scheme`] is built mutably during process initialisation and then frozen
//! behind an `Arc`. Every registration method takes `&mut self`, so once the
//! scheme is shared with the configuration pipeline it can no longer change.

use crate::{CoreError, DynamicObject, GroupVersion, GroupVersionKind, Resource, ResourceList, Result};
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::any::{type_name, TypeId};
use std::collections::BTreeMap;
use tracing::debug;

/// Decodes a wire value into the kind's Rust type and back again, applying
/// serde defaults and dropping unknown fields along the way.
type NormalizeFn = fn(Value) -> std::result::Result<Value, serde_json::Error>;

fn normalize<T: Serialize + DeserializeOwned>(
    value: Value,
) -> std::result::Result<Value, serde_json::Error> {
    let typed: T = serde_json::from_value(value)?;
    serde_json::to_value(typed)
}

/// What a registered kind is used for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KindRole {
    /// A REST resource that needs a storage plugin
    Object {
        plural: &'static str,
        namespaced: bool,
    },
    /// The list variant returned by collection verbs
    List { item_kind: &'static str },
    /// Cross-cutting meta types (Status, discovery documents)
    Unversioned,
}

/// Type descriptor for one registered GVK
#[derive(Debug, Clone)]
pub struct KindInfo {
    pub gvk: GroupVersionKind,
    pub type_name: &'static str,
    pub role: KindRole,
    type_id: TypeId,
    normalize: NormalizeFn,
}

impl KindInfo {
    pub fn plural(&self) -> Option<&'static str> {
        match self.role {
            KindRole::Object { plural, .. } => Some(plural),
            _ => None,
        }
    }

    pub fn namespaced(&self) -> bool {
        matches!(self.role, KindRole::Object { namespaced: true, .. })
    }

    pub fn is_object(&self) -> bool {
        matches!(self.role, KindRole::Object { .. })
    }
}

/// Registry of known kinds
#[derive(Debug, Clone, Default)]
pub struct Scheme {
    kinds: BTreeMap<GroupVersionKind, KindInfo>,
    /// Versions per group, in preference order
    versions: BTreeMap<String, Vec<String>>,
}

impl Scheme {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a REST kind under the given group-version
    pub fn add_known_type<T: Resource>(&mut self, gv: &GroupVersion) -> Result<()> {
        self.insert(
            gv,
            KindInfo {
                gvk: gv.with_kind(T::KIND),
                type_name: type_name::<T>(),
                role: KindRole::Object {
                    plural: T::PLURAL,
                    namespaced: T::NAMESPACED,
                },
                type_id: TypeId::of::<T>(),
                normalize: normalize::<T>,
            },
        )
    }

    /// Register the list variant of a kind under the given group-version
    pub fn add_list_type<L: ResourceList>(&mut self, gv: &GroupVersion) -> Result<()> {
        self.insert(
            gv,
            KindInfo {
                gvk: gv.with_kind(L::KIND),
                type_name: type_name::<L>(),
                role: KindRole::List {
                    item_kind: <L::Item as Resource>::KIND,
                },
                type_id: TypeId::of::<L>(),
                normalize: normalize::<L>,
            },
        )
    }

    /// Register a kind shared by every group (status objects, discovery documents)
    pub fn add_unversioned_type<T>(&mut self, gv: &GroupVersion, kind: &str) -> Result<()>
    where
        T: Serialize + DeserializeOwned + 'static,
    {
        let info = KindInfo {
            gvk: gv.with_kind(kind),
            type_name: type_name::<T>(),
            role: KindRole::Unversioned,
            type_id: TypeId::of::<T>(),
            normalize: normalize::<T>,
        };

        match self.kinds.get(&info.gvk) {
            Some(existing) if existing.type_id == info.type_id => Ok(()),
            Some(existing) => Err(CoreError::duplicate_kind(
                info.gvk.to_string(),
                existing.type_name,
                info.type_name,
            )),
            None => {
                debug!("Registered unversioned kind {}", info.gvk);
                self.kinds.insert(info.gvk.clone(), info);
                Ok(())
            }
        }
    }

    /// Register the meta types every API server needs under `v1`
    pub fn add_unversioned_meta_types(&mut self) -> Result<()> {
        let gv = GroupVersion::new("", "v1");
        self.add_unversioned_type::<metav1::Status>(&gv, "Status")?;
        self.add_unversioned_type::<metav1::APIVersions>(&gv, "APIVersions")?;
        self.add_unversioned_type::<metav1::APIGroupList>(&gv, "APIGroupList")?;
        self.add_unversioned_type::<metav1::APIGroup>(&gv, "APIGroup")?;
        self.add_unversioned_type::<metav1::APIResourceList>(&gv, "APIResourceList")?;
        Ok(())
    }

    /// Override the preferred version order for a group
    pub fn set_version_priority(&mut self, group: &str, versions: &[&str]) {
        self.versions.insert(
            group.to_string(),
            versions.iter().map(|v| v.to_string()).collect(),
        );
    }

    fn insert(&mut self, gv: &GroupVersion, info: KindInfo) -> Result<()> {
        if let Some(existing) = self.kinds.get(&info.gvk) {
            if existing.type_id == info.type_id {
                return Ok(());
            }
            return Err(CoreError::duplicate_kind(
                info.gvk.to_string(),
                existing.type_name,
                info.type_name,
            ));
        }

        let versions = self.versions.entry(gv.group.clone()).or_default();
        if !versions.contains(&gv.version) {
            versions.push(gv.version.clone());
        }

        debug!("Registered kind {} as {}", info.gvk, info.type_name);
        self.kinds.insert(info.gvk.clone(), info);
        Ok(())
    }

    pub fn kind_info(&self, gvk: &GroupVersionKind) -> Option<&KindInfo> {
        self.kinds.get(gvk)
    }

    pub fn recognizes(&self, gvk: &GroupVersionKind) -> bool {
        self.kinds.contains_key(gvk)
    }

    /// All kinds in a group-version that need storage
    pub fn object_kinds<'a>(&'a self, gv: &GroupVersion) -> impl Iterator<Item = &'a KindInfo> + 'a {
        let gv = gv.clone();
        self.kinds.values().filter(move |info| {
            info.is_object() && info.gvk.group == gv.group && info.gvk.version == gv.version
        })
    }

    /// Find the REST kind served under `plural` in a group-version
    pub fn resource_kind(&self, gv: &GroupVersion, plural: &str) -> Option<&KindInfo> {
        self.object_kinds(gv).find(|info| info.plural() == Some(plural))
    }

    /// The list kind registered for an item kind, if any
    pub fn list_kind(&self, item: &GroupVersionKind) -> Option<&KindInfo> {
        self.kinds.values().find(|info| {
            info.gvk.group == item.group
                && info.gvk.version == item.version
                && matches!(info.role, KindRole::List { item_kind } if item_kind == item.kind)
        })
    }

    /// Every GVK a Rust type is registered under
    pub fn kinds_for<T: 'static>(&self) -> Vec<GroupVersionKind> {
        let id = TypeId::of::<T>();
        self.kinds
            .values()
            .filter(|info| info.type_id == id)
            .map(|info| info.gvk.clone())
            .collect()
    }

    /// Versioned groups, excluding the unversioned meta types
    pub fn groups(&self) -> Vec<String> {
        self.versions.keys().cloned().collect()
    }

    pub fn is_versioned_group(&self, group: &str) -> bool {
        self.versions.contains_key(group)
    }

    /// Group-versions of a group, preferred first
    pub fn prioritized_versions(&self, group: &str) -> Vec<GroupVersion> {
        self.versions
            .get(group)
            .map(|versions| {
                versions
                    .iter()
                    .map(|v| GroupVersion::new(group, v.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every versioned group-version known to the scheme
    pub fn group_versions(&self) -> Vec<GroupVersion> {
        self.versions
            .keys()
            .flat_map(|group| self.prioritized_versions(group))
            .collect()
    }

    /// Decode a wire value into the registered type and re-encode it.
    ///
    /// The value must not carry `apiVersion`/`kind`; the caller owns type meta.
    pub fn normalize(&self, gvk: &GroupVersionKind, value: Value) -> Result<Value> {
        let info = self
            .kinds
            .get(gvk)
            .ok_or_else(|| CoreError::unknown_kind(gvk.to_string()))?;

        (info.normalize)(value).map_err(|e| {
            CoreError::serialization(
                format!("failed to decode {}: {}", gvk, e),
                Some(Box::new(e)),
            )
        })
    }

    /// Normalize an object of a registered kind, keeping its type meta.
    ///
    /// Objects assembled outside a codec, such as the result of applying a
    /// patch, go through this before they are stored.
    pub fn normalize_object(&self, object: DynamicObject) -> Result<DynamicObject> {
        let gvk = object.gvk();
        let DynamicObject {
            api_version,
            kind,
            metadata,
            data,
        } = object;

        let mut fields = data;
        fields.insert("metadata".to_string(), serde_json::to_value(metadata)?);

        let normalized = self.normalize(&gvk, Value::Object(fields))?;
        let mut object: DynamicObject = serde_json::from_value(normalized)?;
        object.api_version = api_version;
        object.kind = kind;
        Ok(object)
    }
}

/// Signature of a registration function contributed by an API package
pub type AddToSchemeFn = fn(&mut Scheme) -> Result<()>;

/// Collects registration functions and applies them in order
#[derive(Debug, Clone, Default)]
pub struct SchemeBuilder {
    funcs: Vec<AddToSchemeFn>,
}

impl SchemeBuilder {
    pub fn new(funcs: &[AddToSchemeFn]) -> Self {
        Self {
            funcs: funcs.to_vec(),
        }
    }

    pub fn register(mut self, func: AddToSchemeFn) -> Self {
        self.funcs.push(func);
        self
    }

    pub fn add_to_scheme(&self, scheme: &mut Scheme) -> Result<()> {
        for func in &self.funcs {
            func(scheme)?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ListMeta, ObjectMeta};
    use serde::Deserialize;
    use serde_json::json;

    fn default_size() -> i32 {
        3
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    pub struct WidgetSpec {
        pub color: String,
        #[serde(default = "default_size")]
        pub size: i32,
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    pub struct Widget {
        #[serde(default)]
        pub metadata: ObjectMeta,
        pub spec: WidgetSpec,
    }

    impl Resource for Widget {
        const KIND: &'static str = "Widget";
        const PLURAL: &'static str = "widgets";
        const NAMESPACED: bool = true;

        fn metadata(&self) -> &ObjectMeta {
            &self.metadata
        }

        fn metadata_mut(&mut self) -> &mut ObjectMeta {
            &mut self.metadata
        }
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    pub struct WidgetList {
        #[serde(default)]
        pub metadata: ListMeta,
        pub items: Vec<Widget>,
    }

    impl ResourceList for WidgetList {
        type Item = Widget;
        const KIND: &'static str = "WidgetList";

        fn list_metadata(&self) -> &ListMeta {
            &self.metadata
        }

        fn items(&self) -> &[Widget] {
            &self.items
        }
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct Gadget {
        #[serde(default)]
        metadata: ObjectMeta,
    }

    impl Resource for Gadget {
        const KIND: &'static str = "Widget";
        const PLURAL: &'static str = "gadgets";
        const NAMESPACED: bool = false;

        fn metadata(&self) -> &ObjectMeta {
            &self.metadata
        }

        fn metadata_mut(&mut self) -> &mut ObjectMeta {
            &mut self.metadata
        }
    }

    pub fn widget_gv() -> GroupVersion {
        GroupVersion::new("toys.example.io", "v1")
    }

    pub fn widget_scheme() -> Scheme {
        let mut scheme = Scheme::new();
        scheme.add_known_type::<Widget>(&widget_gv()).unwrap();
        scheme.add_list_type::<WidgetList>(&widget_gv()).unwrap();
        scheme.add_unversioned_meta_types().unwrap();
        scheme
    }

    #[test]
    fn test_registration_is_idempotent() {
        let mut scheme = widget_scheme();
        scheme.add_known_type::<Widget>(&widget_gv()).unwrap();
        scheme.add_unversioned_meta_types().unwrap();

        assert_eq!(scheme.object_kinds(&widget_gv()).count(), 1);
        assert_eq!(scheme.kinds_for::<Widget>().len(), 1);
    }

    #[test]
    fn test_duplicate_kind_rejected() {
        let mut scheme = widget_scheme();
        let err = scheme.add_known_type::<Gadget>(&widget_gv()).unwrap_err();
        assert!(matches!(err, CoreError::DuplicateKind { .. }));
        assert!(err.to_string().contains("toys.example.io/v1/Widget"));
    }

    #[test]
    fn test_same_type_multiple_versions() {
        let mut scheme = widget_scheme();
        let beta = GroupVersion::new("toys.example.io", "v1beta1");
        scheme.add_known_type::<Widget>(&beta).unwrap();

        assert_eq!(scheme.kinds_for::<Widget>().len(), 2);
        let versions: Vec<_> = scheme
            .prioritized_versions("toys.example.io")
            .into_iter()
            .map(|gv| gv.version)
            .collect();
        assert_eq!(versions, vec!["v1", "v1beta1"]);

        scheme.set_version_priority("toys.example.io", &["v1beta1", "v1"]);
        assert_eq!(
            scheme.prioritized_versions("toys.example.io")[0].version,
            "v1beta1"
        );
    }

    #[test]
    fn test_resource_and_list_lookup() {
        let scheme = widget_scheme();
        let info = scheme.resource_kind(&widget_gv(), "widgets").unwrap();
        assert_eq!(info.gvk.kind, "Widget");
        assert!(info.namespaced());

        let list = scheme.list_kind(&info.gvk).unwrap();
        assert_eq!(list.gvk.kind, "WidgetList");

        assert!(scheme.resource_kind(&widget_gv(), "gadgets").is_none());
        assert!(scheme.recognizes(&GroupVersionKind::new("", "v1", "Status")));
        assert!(!scheme.is_versioned_group(""));
    }

    #[test]
    fn test_normalize_applies_defaults() {
        let scheme = widget_scheme();
        let gvk = widget_gv().with_kind("Widget");

        let value = scheme
            .normalize(&gvk, json!({"metadata": {"name": "w"}, "spec": {"color": "red"}}))
            .unwrap();
        assert_eq!(value["spec"]["size"], 3);

        let err = scheme.normalize(&gvk, json!({"spec": {}})).unwrap_err();
        assert!(matches!(err, CoreError::Serialization { .. }));
    }

    #[test]
    fn test_normalize_object_drops_unknown_fields() {
        let scheme = widget_scheme();
        let gvk = widget_gv().with_kind("Widget");
        let mut object = DynamicObject::new(&gvk);
        object.metadata.name = Some("w".to_string());
        object.metadata.resource_version = Some("4".to_string());
        object.data.insert("spec".to_string(), json!({"color": "red", "shine": true}));
        object.data.insert("extra".to_string(), json!(1));

        let normalized = scheme.normalize_object(object).unwrap();
        assert_eq!(normalized.gvk(), gvk);
        assert_eq!(normalized.metadata.resource_version.as_deref(), Some("4"));
        assert_eq!(normalized.data["spec"], json!({"color": "red", "size": 3}));
        assert!(!normalized.data.contains_key("extra"));

        let unknown = DynamicObject::new(&widget_gv().with_kind("Sprocket"));
        assert!(matches!(
            scheme.normalize_object(unknown),
            Err(CoreError::UnknownKind { .. })
        ));
    }

    #[test]
    fn test_scheme_builder() {
        fn add_widgets(scheme: &mut Scheme) -> Result<()> {
            scheme.add_known_type::<Widget>(&widget_gv())
        }

        let builder = SchemeBuilder::new(&[add_widgets]).register(|s| s.add_unversioned_meta_types());
        let mut scheme = Scheme::new();
        builder.add_to_scheme(&mut scheme).unwrap();

        assert!(scheme.recognizes(&widget_gv().with_kind("Widget")));
        assert!(scheme.recognizes(&GroupVersionKind::new("", "v1", "APIGroupList")));
    }
}
