//! Assembly of the ExampleService API server.
//!
//! [`Config`] pairs the generic engine configuration with the storage of each
//! served group-version. It can only be turned into a running server through
//! [`Config::complete`], which yields a [`CompletedConfig`], and then
//! [`CompletedConfig::new_server`].

use crate::config::{CompletedGenericConfig, GenericConfig};
use crate::generic::{ApiGroupInfo, GenericApiServer};
use crate::ServerError;
use axum::Router;
use example_core::GroupVersion;
use example_storage::{MemoryStorageConfig, StorageRegistry};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Settings a storage provider may apply to the backends it builds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageOptions {
    pub watch_buffer: usize,
    pub bookmark_interval: Duration,
}

impl StorageOptions {
    /// Settings for an in-memory backend
    pub fn memory(&self) -> MemoryStorageConfig {
        MemoryStorageConfig {
            watch_buffer: self.watch_buffer,
            bookmark_interval: self.bookmark_interval,
            ..Default::default()
        }
    }
}

/// Builds the storage registry of one group-version once the engine
/// configuration is complete
pub type StorageProvider = Arc<dyn Fn(&StorageOptions) -> StorageRegistry + Send + Sync>;

/// Configuration specific to this server
#[derive(Clone, Default)]
pub struct ExtraConfig {
    /// Storage per group-version
    pub storage: BTreeMap<GroupVersion, StorageProvider>,
}

impl ExtraConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `group_version` from an already built registry
    pub fn with_registry(self, group_version: GroupVersion, registry: StorageRegistry) -> Self {
        self.with_provider(group_version, Arc::new(move |_: &StorageOptions| registry.clone()))
    }

    pub fn with_provider(mut self, group_version: GroupVersion, provider: StorageProvider) -> Self {
        self.storage.insert(group_version, provider);
        self
    }
}

impl fmt::Debug for ExtraConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtraConfig")
            .field("storage", &self.storage.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Server configuration, possibly partial
#[derive(Clone, Default)]
pub struct Config {
    pub generic: GenericConfig,
    pub extra: ExtraConfig,
}

impl Config {
    pub fn new(generic: GenericConfig, extra: ExtraConfig) -> Self {
        Self { generic, extra }
    }

    /// Fill in defaults and validate.
    ///
    /// Storage may only be configured for group-versions the scheme knows, and
    /// only under the plural name of a kind the scheme declares there. A
    /// configuration without any storage is valid; the server then only serves
    /// discovery and its health endpoints, unless the scheme declares kinds,
    /// in which case [`CompletedConfig::new_server`] reports them as missing.
    pub fn complete(self) -> Result<CompletedConfig, ServerError> {
        let generic = self.generic.complete()?;
        let scheme = generic.scheme.clone();
        let options = StorageOptions {
            watch_buffer: generic.watch_buffer,
            bookmark_interval: generic.bookmark_interval,
        };

        let known = scheme.group_versions();
        let mut registries = BTreeMap::new();
        for (group_version, provider) in self.extra.storage {
            if !known.contains(&group_version) {
                return Err(ServerError::unknown_group_version(group_version.to_string()));
            }

            let registry = provider(&options);
            for resource in registry.resources() {
                if scheme.resource_kind(&group_version, resource).is_none() {
                    return Err(ServerError::unknown_resource(
                        resource,
                        group_version.to_string(),
                    ));
                }
            }
            debug!(
                "Storage for {}: {}",
                group_version,
                registry.resources().collect::<Vec<_>>().join(", ")
            );
            registries.insert(group_version, registry);
        }

        Ok(CompletedConfig {
            inner: CompletedConfigInner {
                generic,
                registries,
            },
        })
    }
}

struct CompletedConfigInner {
    generic: CompletedGenericConfig,
    registries: BTreeMap<GroupVersion, StorageRegistry>,
}

/// A validated configuration. Only [`Config::complete`] produces one.
pub struct CompletedConfig {
    inner: CompletedConfigInner,
}

impl CompletedConfig {
    pub fn generic(&self) -> &CompletedGenericConfig {
        &self.inner.generic
    }

    /// Group-versions with storage configured
    pub fn storage_group_versions(&self) -> impl Iterator<Item = &GroupVersion> {
        self.inner.registries.keys()
    }

    /// The partial form of this configuration; completing it again yields
    /// the same result
    pub fn to_config(&self) -> Config {
        let extra = self
            .inner
            .registries
            .iter()
            .fold(ExtraConfig::new(), |extra, (gv, registry)| {
                extra.with_registry(gv.clone(), registry.clone())
            });
        Config::new(self.inner.generic.to_config(), extra)
    }

    /// Assemble the server, installing every API group the scheme declares.
    ///
    /// Fails if a kind the scheme declares has no storage.
    pub fn new_server(self) -> Result<ExampleServer, ServerError> {
        let CompletedConfigInner {
            generic,
            mut registries,
        } = self.inner;
        let scheme = generic.scheme.clone();
        let codecs = generic.codecs.clone();
        let mut server = GenericApiServer::new(generic);

        for group in scheme.groups() {
            let mut info = ApiGroupInfo::new(group.as_str(), scheme.clone(), codecs.clone());
            for group_version in scheme.prioritized_versions(&group) {
                let registry = registries.remove(&group_version).unwrap_or_default();
                info = info.with_storage(group_version.version, registry);
            }
            server.install_api_group(info)?;
        }

        info!(
            "Assembled API server with groups: {}",
            server.installed_groups().collect::<Vec<_>>().join(", ")
        );
        Ok(ExampleServer { server })
    }
}

/// The assembled server, ready to run
pub struct ExampleServer {
    server: GenericApiServer,
}

impl ExampleServer {
    pub fn generic(&self) -> &GenericApiServer {
        &self.server
    }

    /// The HTTP application, for serving in-process
    pub fn router(&self, shutdown: CancellationToken) -> Router {
        self.server.router(shutdown)
    }

    /// Serve until `cancel` fires or serving fails
    pub async fn run(self, cancel: CancellationToken) -> Result<(), ServerError> {
        info!(
            "Starting ExampleService API server on {}",
            self.server.config().address()
        );
        self.server.run(cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::plain_config;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, Request, StatusCode};
    use example_apis::v1alpha1::{self, ExampleResource};
    use example_core::Scheme;
    use example_storage::MemoryStorage;
    use futures_util::StreamExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn scheme() -> Arc<Scheme> {
        let mut scheme = Scheme::new();
        example_apis::install(&mut scheme).unwrap();
        scheme.add_unversioned_meta_types().unwrap();
        Arc::new(scheme)
    }

    fn memory_provider() -> StorageProvider {
        Arc::new(|options: &StorageOptions| {
            let storage = MemoryStorage::for_kind::<ExampleResource>(&v1alpha1::scheme_group_version())
                .with_config(options.memory());
            StorageRegistry::new().with("exampleresources", Arc::new(storage))
        })
    }

    fn config(extra: ExtraConfig) -> Config {
        Config::new(plain_config(scheme()), extra)
    }

    #[test]
    fn test_missing_storage_fails_assembly() {
        let completed = config(ExtraConfig::new()).complete().unwrap();
        let err = completed.new_server().err().unwrap();
        assert_eq!(err.to_string(), "missing storage for resource exampleresources");
    }

    #[test]
    fn test_empty_scheme_without_storage_is_valid() {
        let mut scheme = Scheme::new();
        scheme.add_unversioned_meta_types().unwrap();
        let config = Config::new(plain_config(Arc::new(scheme)), ExtraConfig::new());

        let server = config.complete().unwrap().new_server().unwrap();
        assert_eq!(server.generic().installed_groups().count(), 0);
    }

    #[test]
    fn test_complete_rejects_unknown_storage() {
        let unknown_gv = GroupVersion::new("other.example-org.io", "v1");
        let err = config(ExtraConfig::new().with_provider(unknown_gv, memory_provider()))
            .complete()
            .err()
            .unwrap();
        assert!(matches!(err, ServerError::UnknownGroupVersion { .. }));

        let gv = v1alpha1::scheme_group_version();
        let registry = StorageRegistry::new().with(
            "gadgets",
            Arc::new(MemoryStorage::for_kind::<ExampleResource>(&gv)),
        );
        let err = config(ExtraConfig::new().with_registry(gv, registry))
            .complete()
            .err()
            .unwrap();
        assert_eq!(
            err.to_string(),
            "storage registered for unknown resource gadgets in example.example-org.io/v1alpha1"
        );
    }

    #[test]
    fn test_complete_is_idempotent() {
        let gv = v1alpha1::scheme_group_version();
        let first = config(ExtraConfig::new().with_provider(gv.clone(), memory_provider()))
            .complete()
            .unwrap();
        let second = first.to_config().complete().unwrap();

        assert_eq!(first.generic().address(), second.generic().address());
        assert_eq!(first.generic().tls, second.generic().tls);
        assert_eq!(first.generic().watch_buffer, second.generic().watch_buffer);
        assert_eq!(
            first.storage_group_versions().collect::<Vec<_>>(),
            second.storage_group_versions().collect::<Vec<_>>()
        );
        assert_eq!(
            first.inner.registries[&gv].resources().collect::<Vec<_>>(),
            second.inner.registries[&gv].resources().collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_provider_receives_completed_options() {
        let gv = v1alpha1::scheme_group_version();
        let seen = Arc::new(std::sync::Mutex::new(None));
        let recorded = seen.clone();
        let provider: StorageProvider = Arc::new(move |options: &StorageOptions| {
            *recorded.lock().unwrap() = Some(*options);
            StorageRegistry::new()
        });

        let mut generic = plain_config(scheme());
        generic.watch_buffer = Some(7);
        Config::new(generic, ExtraConfig::new().with_provider(gv, provider))
            .complete()
            .unwrap();

        let options = seen.lock().unwrap().unwrap();
        assert_eq!(options.watch_buffer, 7);
        assert_eq!(options.bookmark_interval, crate::config::DEFAULT_BOOKMARK_INTERVAL);
    }

    #[tokio::test]
    async fn test_served_resource_lifecycle() {
        let gv = v1alpha1::scheme_group_version();
        let server = config(ExtraConfig::new().with_provider(gv, memory_provider()))
            .complete()
            .unwrap()
            .new_server()
            .unwrap();
        let router = server.router(CancellationToken::new());
        let collection = "/apis/example.example-org.io/v1alpha1/exampleresources";

        let watch = router
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("{}?watch=true&timeoutSeconds=1", collection))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(watch.status(), StatusCode::OK);

        let created = router
            .clone()
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri(collection)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(
                        json!({"metadata": {"name": "b"}, "spec": {"name": "b"}}).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(created.status(), StatusCode::CREATED);

        let mut frames = watch.into_body().into_data_stream();
        let first = frames.next().await.unwrap().unwrap();
        let event: Value = serde_json::from_slice(&first).unwrap();
        assert_eq!(event["type"], "ADDED");
        assert_eq!(event["object"]["metadata"]["name"], "b");
        assert_eq!(event["object"]["spec"]["count"], 1);

        let fetched = router
            .oneshot(
                Request::builder()
                    .uri(format!("{}/b", collection))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let bytes = to_bytes(fetched.into_body(), usize::MAX).await.unwrap();
        let object: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(object["spec"]["enabled"], true);
    }
}
