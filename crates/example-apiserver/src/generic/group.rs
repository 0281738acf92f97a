use crate::ServerError;
use example_core::{CodecFactory, GroupVersion, GroupVersionKind, KindInfo, Scheme};
use example_storage::{RestStorage, StorageRegistry, Verb};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Everything needed to serve one API group: its kinds, codecs and the
/// storage of every served version
pub struct ApiGroupInfo {
    pub group: String,
    pub scheme: Arc<Scheme>,
    pub codecs: CodecFactory,
    /// Versions in preference order
    pub prioritized_versions: Vec<GroupVersion>,
    /// Storage per version
    pub versioned_storage: BTreeMap<String, StorageRegistry>,
}

impl ApiGroupInfo {
    pub fn new(group: impl Into<String>, scheme: Arc<Scheme>, codecs: CodecFactory) -> Self {
        let group = group.into();
        let prioritized_versions = scheme.prioritized_versions(&group);
        Self {
            group,
            scheme,
            codecs,
            prioritized_versions,
            versioned_storage: BTreeMap::new(),
        }
    }

    pub fn with_storage(mut self, version: impl Into<String>, storage: StorageRegistry) -> Self {
        self.versioned_storage.insert(version.into(), storage);
        self
    }
}

/// One resource bound to its backend
#[derive(Clone)]
pub(crate) struct InstalledResource {
    pub kind: KindInfo,
    pub list_kind: String,
    pub storage: Arc<dyn RestStorage>,
}

impl InstalledResource {
    pub fn gvk(&self) -> &GroupVersionKind {
        &self.kind.gvk
    }

    pub fn namespaced(&self) -> bool {
        self.kind.namespaced()
    }

    pub fn supports(&self, verb: Verb) -> bool {
        self.storage.verbs().contains(&verb)
    }
}

#[derive(Clone)]
pub(crate) struct InstalledVersion {
    pub group_version: GroupVersion,
    pub resources: BTreeMap<String, InstalledResource>,
}

#[derive(Clone)]
pub(crate) struct InstalledGroup {
    pub name: String,
    pub codecs: CodecFactory,
    /// Preferred version first
    pub versions: Vec<InstalledVersion>,
}

impl InstalledGroup {
    /// Pair every declared kind with its storage.
    ///
    /// A declared version without a storage entry is bound against an empty
    /// registry, so any kind it declares fails as missing storage. Storage
    /// registered under a name no kind declares, or for a version the group
    /// does not declare, is rejected as well.
    pub fn build(info: ApiGroupInfo) -> Result<Self, ServerError> {
        let ApiGroupInfo {
            group,
            scheme,
            codecs,
            prioritized_versions,
            mut versioned_storage,
        } = info;

        if let Some(version) = versioned_storage
            .keys()
            .find(|v| !prioritized_versions.iter().any(|gv| &gv.version == *v))
        {
            return Err(ServerError::unknown_group_version(
                GroupVersion::new(group, version.clone()).to_string(),
            ));
        }

        let mut versions = Vec::new();
        for group_version in prioritized_versions {
            let registry = versioned_storage
                .remove(&group_version.version)
                .unwrap_or_default();

            let mut resources = BTreeMap::new();
            for kind in scheme.object_kinds(&group_version) {
                let plural = kind.plural().unwrap_or_default();
                let storage = registry
                    .get(plural)
                    .ok_or_else(|| ServerError::missing_storage(plural, group_version.to_string()))?;
                let list_kind = scheme
                    .list_kind(&kind.gvk)
                    .map(|list| list.gvk.kind.clone())
                    .unwrap_or_else(|| format!("{}List", kind.gvk.kind));

                debug!("Binding {} to {}", kind.gvk, plural);
                resources.insert(
                    plural.to_string(),
                    InstalledResource {
                        kind: kind.clone(),
                        list_kind,
                        storage: storage.clone(),
                    },
                );
            }

            if let Some(unknown) = registry.resources().find(|r| !resources.contains_key(*r)) {
                return Err(ServerError::unknown_resource(unknown, group_version.to_string()));
            }

            versions.push(InstalledVersion {
                group_version,
                resources,
            });
        }

        Ok(Self {
            name: group,
            codecs,
            versions,
        })
    }

    pub fn version(&self, version: &str) -> Option<&InstalledVersion> {
        self.versions
            .iter()
            .find(|v| v.group_version.version == version)
    }

    pub fn preferred(&self) -> Option<&InstalledVersion> {
        self.versions.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use example_apis::v1alpha1::{self, ExampleResource};
    use example_storage::MemoryStorage;

    fn scheme() -> Arc<Scheme> {
        let mut scheme = Scheme::new();
        example_apis::install(&mut scheme).unwrap();
        scheme.add_unversioned_meta_types().unwrap();
        Arc::new(scheme)
    }

    fn group_info(scheme: Arc<Scheme>) -> ApiGroupInfo {
        let codecs = CodecFactory::new(scheme.clone());
        ApiGroupInfo::new(v1alpha1::GROUP_NAME, scheme, codecs)
    }

    #[test]
    fn test_missing_storage_names_resource() {
        let info = group_info(scheme()).with_storage(v1alpha1::VERSION, StorageRegistry::new());
        let err = InstalledGroup::build(info).err().unwrap();
        assert_eq!(err.to_string(), "missing storage for resource exampleresources");
    }

    #[test]
    fn test_version_without_storage_entry_fails() {
        let err = InstalledGroup::build(group_info(scheme())).err().unwrap();
        assert!(matches!(err, ServerError::MissingStorage { .. }));
        assert_eq!(err.to_string(), "missing storage for resource exampleresources");
    }

    #[test]
    fn test_binds_storage() {
        let gv = v1alpha1::scheme_group_version();
        let registry = StorageRegistry::new().with(
            "exampleresources",
            Arc::new(MemoryStorage::for_kind::<ExampleResource>(&gv)),
        );
        let group = InstalledGroup::build(group_info(scheme()).with_storage(v1alpha1::VERSION, registry)).unwrap();

        let version = group.preferred().unwrap();
        assert_eq!(version.group_version, gv);
        let resource = &version.resources["exampleresources"];
        assert_eq!(resource.gvk().kind, "ExampleResource");
        assert_eq!(resource.list_kind, "ExampleResourceList");
        assert!(!resource.namespaced());
        assert!(resource.supports(Verb::Watch));
    }

    #[test]
    fn test_unknown_storage_rejected() {
        let gv = v1alpha1::scheme_group_version();
        let storage: Arc<dyn RestStorage> = Arc::new(MemoryStorage::for_kind::<ExampleResource>(&gv));
        let registry = StorageRegistry::new()
            .with("exampleresources", storage.clone())
            .with("gadgets", storage.clone());
        let err = InstalledGroup::build(group_info(scheme()).with_storage(v1alpha1::VERSION, registry))
            .err()
            .unwrap();
        assert!(matches!(err, ServerError::UnknownResource { .. }));

        let registry = StorageRegistry::new().with("exampleresources", storage);
        let err = InstalledGroup::build(group_info(scheme()).with_storage("v9", registry))
            .err()
            .unwrap();
        assert!(matches!(err, ServerError::UnknownGroupVersion { .. }));
    }
}
