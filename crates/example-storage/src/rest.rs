//! The contract a backend implements to serve one resource kind

use crate::{FieldSelector, LabelSelector, Result, StorageError};
use async_trait::async_trait;
use example_core::{DynamicObject, ResourceVersion, WatchEvent};
use futures_util::Stream;
use serde_json::Value;
use std::fmt;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

/// Per-request context passed to every storage call
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    namespace: Option<String>,
    cancel: CancellationToken,
}

impl RequestContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            namespace: None,
            cancel,
        }
    }

    pub fn with_namespace(mut self, namespace: Option<String>) -> Self {
        self.namespace = namespace;
        self
    }

    /// Namespace from the request path; `None` for cluster-scoped requests
    /// and for lists across all namespaces
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Fires when the client disconnects or the server shuts down
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// REST verbs a storage plugin may serve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Verb {
    Get,
    List,
    Watch,
    Create,
    Update,
    Patch,
    Delete,
}

impl Verb {
    pub const ALL: &'static [Verb] = &[
        Verb::Create,
        Verb::Delete,
        Verb::Get,
        Verb::List,
        Verb::Patch,
        Verb::Update,
        Verb::Watch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Get => "get",
            Verb::List => "list",
            Verb::Watch => "watch",
            Verb::Create => "create",
            Verb::Update => "update",
            Verb::Patch => "patch",
            Verb::Delete => "delete",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Options for collection reads
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub label_selector: LabelSelector,
    pub field_selector: FieldSelector,
    /// Maximum number of items to return; `None` returns everything
    pub limit: Option<usize>,
    /// Token from a previous truncated list
    pub continue_token: Option<String>,
}

/// Options for watch streams
#[derive(Debug, Clone, Default)]
pub struct WatchOptions {
    pub label_selector: LabelSelector,
    pub field_selector: FieldSelector,
    /// Resume after this version. `None` or `"0"` first replays the current
    /// state as `Added` events.
    pub resource_version: Option<String>,
    /// Emit periodic bookmark events
    pub allow_bookmarks: bool,
}

/// Preconditions for deletion
#[derive(Debug, Clone, Default)]
pub struct DeleteOptions {
    pub resource_version: Option<String>,
}

/// Result of a list call
#[derive(Debug, Clone, Default)]
pub struct ObjectList {
    pub items: Vec<DynamicObject>,
    /// Storage version the list was read at
    pub resource_version: ResourceVersion,
    /// Set when the result was truncated by `limit`
    pub continue_token: Option<String>,
    pub remaining_item_count: Option<i64>,
}

/// Transforms the current object into the desired one.
///
/// A non-empty `metadata.resourceVersion` on the returned object is checked
/// against the stored version.
pub type UpdateFn = Box<dyn FnOnce(DynamicObject) -> Result<DynamicObject> + Send>;

/// An update applying a JSON merge patch (RFC 7386) to the stored object
pub fn apply_merge_patch(patch: Value) -> UpdateFn {
    Box::new(move |current| {
        let mut value = serde_json::to_value(current)?;
        json_patch::merge(&mut value, &patch);
        serde_json::from_value(value).map_err(|e| StorageError::bad_request(e.to_string()))
    })
}

/// Stream of watch events; ends on cancellation or after an error item
pub type WatchStream = Pin<Box<dyn Stream<Item = Result<WatchEvent>> + Send>>;

/// Backend serving one resource kind
#[async_trait]
pub trait RestStorage: Send + Sync {
    /// Verbs this backend serves
    fn verbs(&self) -> &[Verb] {
        Verb::ALL
    }

    /// Store a new object; `AlreadyExists` if the identity is taken
    async fn create(&self, ctx: &RequestContext, object: DynamicObject) -> Result<DynamicObject>;

    async fn get(&self, ctx: &RequestContext, name: &str) -> Result<DynamicObject>;

    async fn list(&self, ctx: &RequestContext, options: &ListOptions) -> Result<ObjectList>;

    /// Replace the object through `update`. The stored status is kept.
    async fn update(
        &self,
        ctx: &RequestContext,
        name: &str,
        update: UpdateFn,
    ) -> Result<DynamicObject>;

    /// Apply a patch to the stored object. `patch` maps the stored object to
    /// its patched form; see [`apply_merge_patch`].
    async fn patch(
        &self,
        ctx: &RequestContext,
        name: &str,
        patch: UpdateFn,
    ) -> Result<DynamicObject> {
        self.update(ctx, name, patch).await
    }

    /// Replace only the status of the object through `update`
    async fn update_status(
        &self,
        ctx: &RequestContext,
        name: &str,
        update: UpdateFn,
    ) -> Result<DynamicObject>;

    /// Remove the object, returning its last state
    async fn delete(
        &self,
        ctx: &RequestContext,
        name: &str,
        options: &DeleteOptions,
    ) -> Result<DynamicObject>;

    async fn watch(&self, ctx: &RequestContext, options: &WatchOptions) -> Result<WatchStream>;
}

/// Restricts a backend to a subset of verbs.
///
/// Calls for any other verb fail with `MethodNotAllowed` without reaching the
/// wrapped backend.
pub struct Restricted<S> {
    inner: S,
    resource: String,
    verbs: Vec<Verb>,
}

impl<S: RestStorage> Restricted<S> {
    pub fn new(inner: S, resource: impl Into<String>, verbs: &[Verb]) -> Self {
        let mut verbs = verbs.to_vec();
        verbs.sort();
        verbs.dedup();
        Self {
            inner,
            resource: resource.into(),
            verbs,
        }
    }

    fn check(&self, verb: Verb) -> Result<()> {
        if self.verbs.contains(&verb) {
            Ok(())
        } else {
            Err(StorageError::method_not_allowed(verb.as_str(), &self.resource))
        }
    }
}

#[async_trait]
impl<S: RestStorage> RestStorage for Restricted<S> {
    fn verbs(&self) -> &[Verb] {
        &self.verbs
    }

    async fn create(&self, ctx: &RequestContext, object: DynamicObject) -> Result<DynamicObject> {
        self.check(Verb::Create)?;
        self.inner.create(ctx, object).await
    }

    async fn get(&self, ctx: &RequestContext, name: &str) -> Result<DynamicObject> {
        self.check(Verb::Get)?;
        self.inner.get(ctx, name).await
    }

    async fn list(&self, ctx: &RequestContext, options: &ListOptions) -> Result<ObjectList> {
        self.check(Verb::List)?;
        self.inner.list(ctx, options).await
    }

    async fn update(
        &self,
        ctx: &RequestContext,
        name: &str,
        update: UpdateFn,
    ) -> Result<DynamicObject> {
        self.check(Verb::Update)?;
        self.inner.update(ctx, name, update).await
    }

    async fn patch(
        &self,
        ctx: &RequestContext,
        name: &str,
        patch: UpdateFn,
    ) -> Result<DynamicObject> {
        self.check(Verb::Patch)?;
        self.inner.patch(ctx, name, patch).await
    }

    async fn update_status(
        &self,
        ctx: &RequestContext,
        name: &str,
        update: UpdateFn,
    ) -> Result<DynamicObject> {
        self.check(Verb::Update)?;
        self.inner.update_status(ctx, name, update).await
    }

    async fn delete(
        &self,
        ctx: &RequestContext,
        name: &str,
        options: &DeleteOptions,
    ) -> Result<DynamicObject> {
        self.check(Verb::Delete)?;
        self.inner.delete(ctx, name, options).await
    }

    async fn watch(&self, ctx: &RequestContext, options: &WatchOptions) -> Result<WatchStream> {
        self.check(Verb::Watch)?;
        self.inner.watch(ctx, options).await
    }
}
