//! In-memory storage backend.
//!
//! Objects live in a `BTreeMap` behind a single `RwLock`, so writes are
//! serialized per backend instance. Every write advances a revision counter
//! that doubles as the resource version. Committed events are kept in a
//! bounded history for watch resumption and fanned out to live watchers over
//! a broadcast channel.

use crate::{
    DeleteOptions, FieldSelector, LabelSelector, ListOptions, ObjectList, RequestContext,
    RestStorage, Result, StorageError, UpdateFn, WatchOptions, WatchStream,
};
use async_trait::async_trait;
use chrono::{SubsecRound, Utc};
use example_core::k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use example_core::{
    DynamicObject, GroupResource, GroupVersion, GroupVersionKind, Resource, WatchEvent,
    WatchEventType,
};
use futures_util::StreamExt;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Tuning for [`MemoryStorage`]
#[derive(Debug, Clone)]
pub struct MemoryStorageConfig {
    /// Committed events retained for watch resumption
    pub history_limit: usize,
    /// Events buffered per watcher before it is closed with `ResourceExpired`
    pub watch_buffer: usize,
    /// Interval between bookmark events on watches that asked for them
    pub bookmark_interval: Duration,
    /// Capacity of the fan-out channel shared by all watchers
    pub broadcast_capacity: usize,
}

impl Default for MemoryStorageConfig {
    fn default() -> Self {
        Self {
            history_limit: 1000,
            watch_buffer: 100,
            bookmark_interval: Duration::from_secs(60),
            broadcast_capacity: 4096,
        }
    }
}

type ValidateFn = fn(&DynamicObject) -> std::result::Result<(), String>;

fn validate_as<T: Resource>(object: &DynamicObject) -> std::result::Result<(), String> {
    let typed: T = object.to_typed().map_err(|e| e.to_string())?;
    typed.validate().map_err(|e| e.to_string())
}

#[derive(Debug)]
struct StoredEvent {
    revision: u64,
    event: WatchEvent,
    /// The object before a modification
    previous: Option<DynamicObject>,
}

impl StoredEvent {
    /// The event as seen through `filter`. A modification moving the object
    /// into or out of the filtered set shows up as an addition or deletion.
    fn visible_to(&self, filter: &Filter) -> Option<WatchEvent> {
        let matches = filter.matches(&self.event.object);
        let matched = match (&self.event.event_type, &self.previous) {
            (WatchEventType::Modified, Some(previous)) => filter.matches(previous),
            _ => matches,
        };
        match (matched, matches) {
            (true, true) => Some(self.event.clone()),
            (false, true) => Some(WatchEvent::added(self.event.object.clone())),
            (true, false) => Some(WatchEvent::deleted(self.event.object.clone())),
            (false, false) => None,
        }
    }
}

/// (namespace, name); the namespace is empty for cluster-scoped kinds
type ObjectKey = (String, String);

#[derive(Default)]
struct State {
    revision: u64,
    /// Highest revision no longer present in `history`
    compacted: u64,
    objects: BTreeMap<ObjectKey, DynamicObject>,
    history: VecDeque<Arc<StoredEvent>>,
}

/// Namespace and selector filter shared by list and watch
#[derive(Debug, Clone)]
struct Filter {
    namespace: Option<String>,
    labels: LabelSelector,
    fields: FieldSelector,
}

impl Filter {
    fn matches(&self, object: &DynamicObject) -> bool {
        if let Some(ns) = &self.namespace {
            if object.namespace() != Some(ns.as_str()) {
                return false;
            }
        }
        self.labels.matches(object.metadata.labels.as_ref()) && self.fields.matches(object)
    }
}

/// Reference storage plugin keeping objects of one kind in memory
pub struct MemoryStorage {
    gvk: GroupVersionKind,
    resource: GroupResource,
    namespaced: bool,
    validate: ValidateFn,
    config: MemoryStorageConfig,
    state: RwLock<State>,
    events: broadcast::Sender<Arc<StoredEvent>>,
}

impl MemoryStorage {
    /// Create an empty store for kind `T` served under `gv`
    pub fn for_kind<T: Resource>(gv: &GroupVersion) -> Self {
        let config = MemoryStorageConfig::default();
        let (events, _) = broadcast::channel(config.broadcast_capacity);
        Self {
            gvk: gv.with_kind(T::KIND),
            resource: gv.with_resource(T::PLURAL).group_resource(),
            namespaced: T::NAMESPACED,
            validate: validate_as::<T>,
            config,
            state: RwLock::new(State::default()),
            events,
        }
    }

    pub fn with_config(mut self, config: MemoryStorageConfig) -> Self {
        let (events, _) = broadcast::channel(config.broadcast_capacity.max(1));
        self.events = events;
        self.config = config;
        self
    }

    pub fn gvk(&self) -> &GroupVersionKind {
        &self.gvk
    }

    fn resource_name(&self) -> String {
        self.resource.to_string()
    }

    fn not_found(&self, name: &str) -> StorageError {
        StorageError::not_found(self.resource_name(), name)
    }

    fn key(&self, ctx: &RequestContext, name: &str) -> Result<ObjectKey> {
        if !self.namespaced {
            return Ok((String::new(), name.to_string()));
        }
        let namespace = ctx.namespace().ok_or_else(|| {
            StorageError::bad_request(format!("namespace is required for {}", self.resource))
        })?;
        Ok((namespace.to_string(), name.to_string()))
    }

    fn filter(&self, ctx: &RequestContext, labels: &LabelSelector, fields: &FieldSelector) -> Filter {
        Filter {
            namespace: ctx.namespace().filter(|_| self.namespaced).map(str::to_string),
            labels: labels.clone(),
            fields: fields.clone(),
        }
    }

    /// Force the object's type meta and namespace to match this store and the request
    fn assign_identity(&self, ctx: &RequestContext, object: &mut DynamicObject) -> Result<()> {
        object.api_version = self.gvk.api_version();
        object.kind = self.gvk.kind.clone();

        if !self.namespaced {
            object.metadata.namespace = None;
            return Ok(());
        }

        let namespace = ctx.namespace().ok_or_else(|| {
            StorageError::bad_request(format!("namespace is required for {}", self.resource))
        })?;
        match object.namespace() {
            Some(existing) if existing != namespace => Err(StorageError::bad_request(
                "the namespace of the provided object does not match the namespace sent on the request",
            )),
            _ => {
                object.metadata.namespace = Some(namespace.to_string());
                Ok(())
            }
        }
    }

    fn check_name(&self, object: &mut DynamicObject, name: &str) -> Result<()> {
        match object.name() {
            None => {
                object.metadata.name = Some(name.to_string());
                Ok(())
            }
            Some(n) if n == name => Ok(()),
            Some(n) => Err(StorageError::bad_request(format!(
                "the name of the object ({}) does not match the name on the URL ({})",
                n, name
            ))),
        }
    }

    /// Optimistic concurrency: a stated resource version must be the stored one
    fn check_precondition(&self, current: &DynamicObject, requested: Option<&str>) -> Result<()> {
        let requested = match requested.filter(|rv| !rv.is_empty()) {
            Some(rv) => rv,
            None => return Ok(()),
        };
        if current.metadata.resource_version.as_deref() != Some(requested) {
            return Err(StorageError::conflict(
                self.resource_name(),
                current.name().unwrap_or_default(),
                "the object has been modified; please apply your changes to the latest version and try again",
            ));
        }
        Ok(())
    }

    fn validate(&self, object: &DynamicObject) -> Result<()> {
        (self.validate)(object).map_err(|message| {
            StorageError::invalid(self.resource_name(), object.name().unwrap_or_default(), message)
        })
    }

    /// Advance the revision and publish the event
    fn commit(
        &self,
        state: &mut State,
        revision: u64,
        event: WatchEvent,
        previous: Option<DynamicObject>,
    ) {
        state.revision = revision;
        let stored = Arc::new(StoredEvent {
            revision,
            event,
            previous,
        });

        state.history.push_back(stored.clone());
        while state.history.len() > self.config.history_limit {
            if let Some(dropped) = state.history.pop_front() {
                state.compacted = dropped.revision;
            }
        }

        // No receivers just means nobody is watching
        let _ = self.events.send(stored);
    }
}

/// Everything except the status stanza
fn spec_fields(object: &DynamicObject) -> Map<String, Value> {
    let mut data = object.data.clone();
    data.remove("status");
    data
}

fn generate_name(prefix: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}{}", prefix, &suffix[..5])
}

fn encode_continue(key: &ObjectKey) -> String {
    format!("{}/{}", key.0, key.1)
}

fn decode_continue(token: &str) -> Result<ObjectKey> {
    token
        .split_once('/')
        .map(|(ns, name)| (ns.to_string(), name.to_string()))
        .filter(|(_, name)| !name.is_empty())
        .ok_or_else(|| StorageError::bad_request(format!("invalid continue token {:?}", token)))
}

#[async_trait]
impl RestStorage for MemoryStorage {
    async fn create(&self, ctx: &RequestContext, mut object: DynamicObject) -> Result<DynamicObject> {
        self.assign_identity(ctx, &mut object)?;

        if object.name().unwrap_or_default().is_empty() {
            match object.metadata.generate_name.as_deref() {
                Some(prefix) if !prefix.is_empty() => {
                    object.metadata.name = Some(generate_name(prefix));
                }
                _ => {
                    return Err(StorageError::invalid(
                        self.resource_name(),
                        "",
                        "metadata.name: Required value: name or generateName is required",
                    ))
                }
            }
        }
        if object
            .metadata
            .resource_version
            .as_deref()
            .is_some_and(|rv| !rv.is_empty())
        {
            return Err(StorageError::bad_request(
                "resourceVersion should not be set on objects to be created",
            ));
        }

        // Status is only written through the status subresource
        object.set_status(None);
        self.validate(&object)?;

        let name = object.name().unwrap_or_default().to_string();
        let key = self.key(ctx, &name)?;

        let mut state = self.state.write().await;
        if state.objects.contains_key(&key) {
            return Err(StorageError::already_exists(self.resource_name(), name));
        }

        let revision = state.revision + 1;
        object.metadata.uid = Some(Uuid::new_v4().to_string());
        object.metadata.creation_timestamp = Some(Time(Utc::now().trunc_subsecs(0)));
        object.metadata.generation = Some(1);
        object.set_resource_version(revision.into());

        state.objects.insert(key, object.clone());
        self.commit(&mut state, revision, WatchEvent::added(object.clone()), None);

        info!("Created {} {} with version {}", self.resource, name, revision);
        Ok(object)
    }

    async fn get(&self, ctx: &RequestContext, name: &str) -> Result<DynamicObject> {
        let key = self.key(ctx, name)?;
        debug!("Getting {} {}", self.resource, name);

        let state = self.state.read().await;
        state
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| self.not_found(name))
    }

    async fn list(&self, ctx: &RequestContext, options: &ListOptions) -> Result<ObjectList> {
        let start = options
            .continue_token
            .as_deref()
            .map(decode_continue)
            .transpose()?;
        let filter = self.filter(ctx, &options.label_selector, &options.field_selector);

        let state = self.state.read().await;
        let mut selected: Vec<(&ObjectKey, &DynamicObject)> = state
            .objects
            .iter()
            .filter(|(key, _)| start.as_ref().is_none_or(|start| *key > start))
            .filter(|(_, object)| filter.matches(object))
            .collect();

        let mut continue_token = None;
        let mut remaining_item_count = None;
        if let Some(limit) = options.limit.filter(|limit| *limit > 0) {
            if selected.len() > limit {
                remaining_item_count = Some((selected.len() - limit) as i64);
                selected.truncate(limit);
                continue_token = selected.last().map(|(key, _)| encode_continue(key));
            }
        }

        debug!(
            "Listed {} {} at version {}",
            selected.len(),
            self.resource,
            state.revision
        );

        Ok(ObjectList {
            items: selected.into_iter().map(|(_, object)| object.clone()).collect(),
            resource_version: state.revision.into(),
            continue_token,
            remaining_item_count,
        })
    }

    async fn update(&self, ctx: &RequestContext, name: &str, update: UpdateFn) -> Result<DynamicObject> {
        let key = self.key(ctx, name)?;

        let mut state = self.state.write().await;
        let current = state
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| self.not_found(name))?;

        let mut object = update(current.clone())?;
        self.check_precondition(&current, object.metadata.resource_version.as_deref())?;
        self.check_name(&mut object, name)?;
        self.assign_identity(ctx, &mut object)?;

        // Server-owned fields survive any client update
        object.metadata.uid = current.metadata.uid.clone();
        object.metadata.creation_timestamp = current.metadata.creation_timestamp.clone();
        object.metadata.generation = current.metadata.generation;
        object.metadata.resource_version = current.metadata.resource_version.clone();
        object.set_status(current.status().cloned());

        if object == current {
            debug!("No changes to {} {}", self.resource, name);
            return Ok(current);
        }
        if spec_fields(&object) != spec_fields(&current) {
            object.metadata.generation = Some(current.metadata.generation.unwrap_or(0) + 1);
        }
        self.validate(&object)?;

        let revision = state.revision + 1;
        object.set_resource_version(revision.into());
        state.objects.insert(key, object.clone());
        self.commit(
            &mut state,
            revision,
            WatchEvent::modified(object.clone()),
            Some(current),
        );

        info!("Updated {} {} with version {}", self.resource, name, revision);
        Ok(object)
    }

    async fn update_status(
        &self,
        ctx: &RequestContext,
        name: &str,
        update: UpdateFn,
    ) -> Result<DynamicObject> {
        let key = self.key(ctx, name)?;

        let mut state = self.state.write().await;
        let current = state
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| self.not_found(name))?;

        let mut requested = update(current.clone())?;
        self.check_precondition(&current, requested.metadata.resource_version.as_deref())?;
        self.check_name(&mut requested, name)?;

        let mut object = current.clone();
        object.set_status(requested.status().cloned());
        if object == current {
            return Ok(current);
        }
        self.validate(&object)?;

        let revision = state.revision + 1;
        object.set_resource_version(revision.into());
        state.objects.insert(key, object.clone());
        self.commit(
            &mut state,
            revision,
            WatchEvent::modified(object.clone()),
            Some(current),
        );

        info!("Updated status of {} {} with version {}", self.resource, name, revision);
        Ok(object)
    }

    async fn delete(
        &self,
        ctx: &RequestContext,
        name: &str,
        options: &DeleteOptions,
    ) -> Result<DynamicObject> {
        let key = self.key(ctx, name)?;

        let mut state = self.state.write().await;
        let current = state
            .objects
            .get(&key)
            .ok_or_else(|| self.not_found(name))?;
        self.check_precondition(current, options.resource_version.as_deref())?;

        let mut object = state
            .objects
            .remove(&key)
            .ok_or_else(|| self.not_found(name))?;
        let revision = state.revision + 1;
        object.set_resource_version(revision.into());
        self.commit(&mut state, revision, WatchEvent::deleted(object.clone()), None);

        info!("Deleted {} {} at version {}", self.resource, name, revision);
        Ok(object)
    }

    async fn watch(&self, ctx: &RequestContext, options: &WatchOptions) -> Result<WatchStream> {
        let filter = self.filter(ctx, &options.label_selector, &options.field_selector);

        // Subscribe under the read lock so no commit falls between the
        // replayed state and the live feed
        let (initial, start, receiver) = {
            let state = self.state.read().await;
            let receiver = self.events.subscribe();

            match options
                .resource_version
                .as_deref()
                .filter(|rv| !rv.is_empty() && *rv != "0")
            {
                None => {
                    let initial: Vec<WatchEvent> = state
                        .objects
                        .values()
                        .filter(|object| filter.matches(object))
                        .cloned()
                        .map(WatchEvent::added)
                        .collect();
                    (initial, state.revision, receiver)
                }
                Some(rv) => {
                    let from: u64 = rv.parse().map_err(|_| {
                        StorageError::bad_request(format!("invalid resource version {:?}", rv))
                    })?;
                    if from < state.compacted {
                        return Err(StorageError::resource_expired(format!(
                            "too old resource version: {} ({})",
                            from,
                            state.compacted + 1
                        )));
                    }
                    if from > state.revision {
                        return Err(StorageError::resource_expired(format!(
                            "too large resource version: {} (current {})",
                            from, state.revision
                        )));
                    }
                    let initial: Vec<WatchEvent> = state
                        .history
                        .iter()
                        .filter(|stored| stored.revision > from)
                        .filter_map(|stored| stored.visible_to(&filter))
                        .collect();
                    (initial, state.revision, receiver)
                }
            }
        };

        debug!(
            "Starting watch on {} from version {} with {} replayed events",
            self.resource,
            start,
            initial.len()
        );

        let (tx, rx) = mpsc::channel(self.config.watch_buffer.max(1));
        let (fail_tx, fail_rx) = oneshot::channel();

        let watcher = Watcher {
            gvk: self.gvk.clone(),
            filter,
            cancel: ctx.cancellation().clone(),
            bookmark_interval: options
                .allow_bookmarks
                .then_some(self.config.bookmark_interval.max(Duration::from_millis(1))),
        };
        tokio::spawn(watcher.run(initial, start, receiver, tx, fail_tx));

        let events = ReceiverStream::new(rx).map(Ok);
        let failure = futures_util::stream::once(fail_rx)
            .filter_map(|r| async move { r.ok().map(Err::<WatchEvent, StorageError>) });
        Ok(Box::pin(events.chain(failure)))
    }
}

/// Task feeding one watch stream from the shared broadcast channel
struct Watcher {
    gvk: GroupVersionKind,
    filter: Filter,
    cancel: CancellationToken,
    bookmark_interval: Option<Duration>,
}

impl Watcher {
    async fn run(
        self,
        initial: Vec<WatchEvent>,
        mut last_revision: u64,
        mut events: broadcast::Receiver<Arc<StoredEvent>>,
        tx: mpsc::Sender<WatchEvent>,
        fail_tx: oneshot::Sender<StorageError>,
    ) {
        for event in initial {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                sent = tx.send(event) => {
                    if sent.is_err() {
                        return;
                    }
                }
            }
        }

        let period = self.bookmark_interval.unwrap_or(Duration::from_secs(3600));
        let mut bookmarks = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        let failure = loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break None,
                _ = tx.closed() => break None,
                _ = bookmarks.tick(), if self.bookmark_interval.is_some() => {
                    // A full buffer already carries progress; skip this bookmark
                    let _ = tx.try_send(WatchEvent::bookmark(&self.gvk, last_revision.into()));
                }
                received = events.recv() => match received {
                    Ok(stored) => {
                        if stored.revision <= last_revision {
                            continue;
                        }
                        last_revision = stored.revision;
                        let Some(event) = stored.visible_to(&self.filter) else {
                            continue;
                        };
                        match tx.try_send(event) {
                            Ok(()) => {}
                            Err(TrySendError::Full(_)) => {
                                break Some(StorageError::resource_expired(
                                    "watch buffer overflow: client is not keeping up",
                                ))
                            }
                            Err(TrySendError::Closed(_)) => break None,
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        break Some(StorageError::resource_expired(format!(
                            "watch fell behind by {} events",
                            missed
                        )))
                    }
                    Err(RecvError::Closed) => break None,
                },
            }
        };

        if let Some(err) = failure {
            warn!("Closing watch on {}: {}", self.gvk, err);
            let _ = fail_tx.send(err);
        } else {
            debug!("Watch on {} finished", self.gvk);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{apply_merge_patch, Restricted, Verb};
    use example_apis::v1alpha1::{self, ExampleResource};
    use example_core::{CodecFactory, MediaType, ObjectMeta, ResourceVersion, Scheme};
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::timeout;

    fn codecs() -> CodecFactory {
        let mut scheme = Scheme::new();
        example_apis::install(&mut scheme).unwrap();
        CodecFactory::new(Arc::new(scheme))
    }

    fn decode(value: Value) -> DynamicObject {
        codecs()
            .decode(value.to_string().as_bytes(), MediaType::Json, None)
            .unwrap()
    }

    fn example(name: &str) -> DynamicObject {
        decode(json!({
            "apiVersion": "example.example-org.io/v1alpha1",
            "kind": "ExampleResource",
            "metadata": {"name": name},
            "spec": {"name": name}
        }))
    }

    fn storage() -> MemoryStorage {
        MemoryStorage::for_kind::<ExampleResource>(&v1alpha1::scheme_group_version())
    }

    fn set_count(count: i64, resource_version: Option<String>) -> UpdateFn {
        Box::new(move |mut object| {
            object
                .data
                .get_mut("spec")
                .and_then(Value::as_object_mut)
                .ok_or_else(|| StorageError::bad_request("missing spec"))?
                .insert("count".to_string(), json!(count));
            object.metadata.resource_version = resource_version;
            Ok(object)
        })
    }

    #[tokio::test]
    async fn test_create_then_get_applies_defaults() {
        let storage = storage();
        let ctx = RequestContext::default();

        let created = storage.create(&ctx, example("a")).await.unwrap();
        assert!(created.metadata.uid.is_some());
        assert_eq!(created.metadata.generation, Some(1));

        let fetched: ExampleResource = storage.get(&ctx, "a").await.unwrap().to_typed().unwrap();
        assert_eq!(fetched.spec.count, 1);
        assert!(fetched.spec.enabled);
        assert!(!fetched.metadata.resource_version.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_duplicate() {
        let storage = storage();
        let ctx = RequestContext::default();

        storage.create(&ctx, example("a")).await.unwrap();
        let err = storage.create(&ctx, example("a")).await.unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_create_generate_name_and_invalid() {
        let storage = storage();
        let ctx = RequestContext::default();

        let mut object = example("x");
        object.metadata.name = None;
        object.metadata.generate_name = Some("example-".to_string());
        let created = storage.create(&ctx, object).await.unwrap();
        let name = created.name().unwrap();
        assert!(name.starts_with("example-"));
        assert_eq!(name.len(), "example-".len() + 5);

        let mut object = example("x");
        object.metadata.name = Some("Not_Valid".to_string());
        let err = storage.create(&ctx, object).await.unwrap_err();
        assert!(matches!(err, StorageError::Invalid { .. }));
    }

    #[tokio::test]
    async fn test_update_with_stale_version_conflicts() {
        let storage = storage();
        let ctx = RequestContext::default();

        let created = storage.create(&ctx, example("a")).await.unwrap();
        let stale = created.metadata.resource_version.clone();

        storage
            .update(&ctx, "a", set_count(2, stale.clone()))
            .await
            .unwrap();

        let err = storage
            .update(&ctx, "a", set_count(5, stale))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict { .. }));

        let current = storage.get(&ctx, "a").await.unwrap();
        let updated = storage
            .update(&ctx, "a", set_count(5, current.metadata.resource_version))
            .await
            .unwrap();
        assert_eq!(updated.metadata.generation, Some(3));

        let fetched: ExampleResource = storage.get(&ctx, "a").await.unwrap().to_typed().unwrap();
        assert_eq!(fetched.spec.count, 5);
    }

    #[tokio::test]
    async fn test_update_preserves_status() {
        let storage = storage();
        let ctx = RequestContext::default();
        storage.create(&ctx, example("a")).await.unwrap();

        storage
            .update_status(
                &ctx,
                "a",
                Box::new(|mut object| {
                    object.set_status(Some(json!({"phase": "Ready"})));
                    Ok(object)
                }),
            )
            .await
            .unwrap();

        let updated = storage
            .update(
                &ctx,
                "a",
                Box::new(|mut object| {
                    object.set_status(Some(json!({"phase": "Hijacked"})));
                    object.metadata.resource_version = None;
                    Ok(object)
                }),
            )
            .await
            .unwrap();
        assert_eq!(updated.status(), Some(&json!({"phase": "Ready"})));
        assert_eq!(updated.metadata.generation, Some(1));
    }

    #[tokio::test]
    async fn test_patch_merges() {
        let storage = storage();
        let ctx = RequestContext::default();
        storage.create(&ctx, example("a")).await.unwrap();

        let patched = storage
            .patch(&ctx, "a", apply_merge_patch(json!({"spec": {"enabled": false}})))
            .await
            .unwrap();
        let typed: ExampleResource = patched.to_typed().unwrap();
        assert!(!typed.spec.enabled);
        assert_eq!(typed.spec.name, "a");
    }

    #[tokio::test]
    async fn test_delete_then_get_not_found() {
        let storage = storage();
        let ctx = RequestContext::default();
        storage.create(&ctx, example("a")).await.unwrap();

        let err = storage
            .delete(
                &ctx,
                "a",
                &DeleteOptions {
                    resource_version: Some("999".to_string()),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict { .. }));

        storage
            .delete(&ctx, "a", &DeleteOptions::default())
            .await
            .unwrap();
        let err = storage.get(&ctx, "a").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));

        let err = storage
            .delete(&ctx, "a", &DeleteOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_list_selectors_and_pagination() {
        let storage = storage();
        let ctx = RequestContext::default();
        for (name, tier) in [("a", "web"), ("b", "db"), ("c", "web"), ("d", "web")] {
            let mut object = example(name);
            object.metadata.labels = Some([("tier".to_string(), tier.to_string())].into());
            storage.create(&ctx, object).await.unwrap();
        }

        let options = ListOptions {
            label_selector: LabelSelector::parse("tier=web").unwrap(),
            limit: Some(2),
            ..Default::default()
        };
        let page = storage.list(&ctx, &options).await.unwrap();
        let names: Vec<_> = page.items.iter().filter_map(|o| o.name()).collect();
        assert_eq!(names, vec!["a", "c"]);
        assert_eq!(page.remaining_item_count, Some(1));
        assert_eq!(page.resource_version, ResourceVersion::from(4u64));

        let options = ListOptions {
            continue_token: page.continue_token,
            ..options
        };
        let page = storage.list(&ctx, &options).await.unwrap();
        let names: Vec<_> = page.items.iter().filter_map(|o| o.name()).collect();
        assert_eq!(names, vec!["d"]);
        assert!(page.continue_token.is_none());

        let options = ListOptions {
            field_selector: FieldSelector::parse("metadata.name=b").unwrap(),
            ..Default::default()
        };
        assert_eq!(storage.list(&ctx, &options).await.unwrap().items.len(), 1);
    }

    #[tokio::test]
    async fn test_watch_receives_added_before_list() {
        let storage = storage();
        let ctx = RequestContext::default();

        let list = storage.list(&ctx, &ListOptions::default()).await.unwrap();
        let mut stream = storage
            .watch(
                &ctx,
                &WatchOptions {
                    resource_version: Some(list.resource_version.to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        storage.create(&ctx, example("b")).await.unwrap();

        let event = timeout(Duration::from_secs(5), stream.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(event.event_type, WatchEventType::Added);
        assert_eq!(event.object.name(), Some("b"));
    }

    #[tokio::test]
    async fn test_watch_replays_current_state_and_resumes() {
        let storage = storage();
        let ctx = RequestContext::default();
        storage.create(&ctx, example("a")).await.unwrap();
        let created_b = storage.create(&ctx, example("b")).await.unwrap();
        storage
            .delete(&ctx, "a", &DeleteOptions::default())
            .await
            .unwrap();

        // Without a version, the current state is replayed as ADDED
        let mut stream = storage.watch(&ctx, &WatchOptions::default()).await.unwrap();
        let event = stream.next().await.unwrap().unwrap();
        assert_eq!(event.event_type, WatchEventType::Added);
        assert_eq!(event.object.name(), Some("b"));

        // Resuming from b's version replays only the deletion of a
        let mut stream = storage
            .watch(
                &ctx,
                &WatchOptions {
                    resource_version: created_b.metadata.resource_version.clone(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let event = stream.next().await.unwrap().unwrap();
        assert_eq!(event.event_type, WatchEventType::Deleted);
        assert_eq!(event.object.name(), Some("a"));
        assert_eq!(event.resource_version(), Some(ResourceVersion::from(3u64)));
    }

    #[tokio::test]
    async fn test_watch_expired_resource_version() {
        let storage = storage().with_config(MemoryStorageConfig {
            history_limit: 2,
            ..Default::default()
        });
        let ctx = RequestContext::default();
        for name in ["a", "b", "c", "d"] {
            storage.create(&ctx, example(name)).await.unwrap();
        }

        let result = storage
            .watch(
                &ctx,
                &WatchOptions {
                    resource_version: Some("1".to_string()),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(result, Err(StorageError::ResourceExpired { .. })));

        let result = storage
            .watch(
                &ctx,
                &WatchOptions {
                    resource_version: Some("2".to_string()),
                    ..Default::default()
                },
            )
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_watch_rejects_future_resource_version() {
        let storage = storage();
        let ctx = RequestContext::default();
        let watch_from = |rv: &str| WatchOptions {
            resource_version: Some(rv.to_string()),
            ..Default::default()
        };

        let result = storage.watch(&ctx, &watch_from("100")).await;
        assert!(matches!(result, Err(StorageError::ResourceExpired { .. })));

        storage.create(&ctx, example("a")).await.unwrap();
        assert!(storage.watch(&ctx, &watch_from("1")).await.is_ok());
        let result = storage.watch(&ctx, &watch_from("2")).await;
        assert!(matches!(result, Err(StorageError::ResourceExpired { .. })));
    }

    #[tokio::test]
    async fn test_watch_selector_transitions() {
        let storage = storage();
        let ctx = RequestContext::default();
        storage.create(&ctx, example("a")).await.unwrap();
        storage.create(&ctx, example("b")).await.unwrap();

        let options = WatchOptions {
            resource_version: Some("2".to_string()),
            label_selector: LabelSelector::parse("tier=web").unwrap(),
            ..Default::default()
        };
        let live = storage.watch(&ctx, &options).await.unwrap();

        for tier in ["web", "db"] {
            storage
                .patch(
                    &ctx,
                    "a",
                    apply_merge_patch(json!({"metadata": {"labels": {"tier": tier}}})),
                )
                .await
                .unwrap();
        }
        // Never matched, never seen
        storage
            .patch(
                &ctx,
                "b",
                apply_merge_patch(json!({"metadata": {"labels": {"tier": "db"}}})),
            )
            .await
            .unwrap();

        let replayed = storage.watch(&ctx, &options).await.unwrap();
        for mut stream in [live, replayed] {
            let mut events = Vec::new();
            while let Ok(Some(item)) = timeout(Duration::from_millis(200), stream.next()).await {
                events.push(item.unwrap());
            }
            let seen: Vec<_> = events
                .iter()
                .map(|e| (e.event_type, e.object.name().unwrap_or_default().to_string()))
                .collect();
            assert_eq!(
                seen,
                [
                    (WatchEventType::Added, "a".to_string()),
                    (WatchEventType::Deleted, "a".to_string()),
                ]
            );
            assert_eq!(events[1].resource_version(), Some(ResourceVersion::from(4u64)));
        }
    }

    #[tokio::test]
    async fn test_slow_watcher_expires() {
        let storage = storage().with_config(MemoryStorageConfig {
            watch_buffer: 2,
            ..Default::default()
        });
        let ctx = RequestContext::default();
        let list = storage.list(&ctx, &ListOptions::default()).await.unwrap();
        let mut stream = storage
            .watch(
                &ctx,
                &WatchOptions {
                    resource_version: Some(list.resource_version.to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        for i in 0..10 {
            storage.create(&ctx, example(&format!("r{}", i))).await.unwrap();
        }

        let mut added = 0;
        let mut expired = false;
        while let Ok(Some(item)) = timeout(Duration::from_secs(5), stream.next()).await {
            match item {
                Ok(_) => added += 1,
                Err(err) => {
                    expired = matches!(err, StorageError::ResourceExpired { .. });
                }
            }
        }
        assert!(expired);
        assert!(added < 10);
    }

    #[tokio::test]
    async fn test_watch_bookmarks() {
        let storage = storage().with_config(MemoryStorageConfig {
            bookmark_interval: Duration::from_millis(20),
            ..Default::default()
        });
        let ctx = RequestContext::default();
        storage.create(&ctx, example("a")).await.unwrap();

        let mut stream = storage
            .watch(
                &ctx,
                &WatchOptions {
                    resource_version: Some("1".to_string()),
                    allow_bookmarks: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let event = timeout(Duration::from_secs(5), stream.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(event.event_type, WatchEventType::Bookmark);
        assert_eq!(event.resource_version(), Some(ResourceVersion::from("1")));
    }

    #[tokio::test]
    async fn test_watch_ends_on_cancel() {
        let storage = storage();
        let cancel = CancellationToken::new();
        let ctx = RequestContext::new(cancel.clone());

        let mut stream = storage.watch(&ctx, &WatchOptions::default()).await.unwrap();
        cancel.cancel();

        let next = timeout(Duration::from_secs(5), stream.next()).await.unwrap();
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn test_restricted_verbs() {
        let storage = Restricted::new(storage(), "exampleresources", &[Verb::Create]);
        let ctx = RequestContext::default();

        storage.create(&ctx, example("a")).await.unwrap();
        let err = storage.get(&ctx, "a").await.unwrap_err();
        assert!(matches!(err, StorageError::MethodNotAllowed { .. }));
        assert_eq!(storage.verbs(), &[Verb::Create]);
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct Note {
        #[serde(default)]
        metadata: ObjectMeta,
        #[serde(default)]
        text: String,
    }

    impl Resource for Note {
        const KIND: &'static str = "Note";
        const PLURAL: &'static str = "notes";
        const NAMESPACED: bool = true;

        fn metadata(&self) -> &ObjectMeta {
            &self.metadata
        }

        fn metadata_mut(&mut self) -> &mut ObjectMeta {
            &mut self.metadata
        }
    }

    #[tokio::test]
    async fn test_namespace_isolation() {
        let gv = GroupVersion::new("notes.example.io", "v1");
        let storage = MemoryStorage::for_kind::<Note>(&gv);
        let gvk = gv.with_kind("Note");

        let mut note = DynamicObject::new(&gvk);
        note.metadata.name = Some("n".to_string());

        let team_a = RequestContext::default().with_namespace(Some("team-a".to_string()));
        let team_b = RequestContext::default().with_namespace(Some("team-b".to_string()));

        let created = storage.create(&team_a, note.clone()).await.unwrap();
        assert_eq!(created.namespace(), Some("team-a"));
        storage.create(&team_b, note.clone()).await.unwrap();

        assert!(storage.get(&RequestContext::default(), "n").await.is_err());
        let all = storage
            .list(&RequestContext::default(), &ListOptions::default())
            .await
            .unwrap();
        assert_eq!(all.items.len(), 2);
        let only_a = storage.list(&team_a, &ListOptions::default()).await.unwrap();
        assert_eq!(only_a.items.len(), 1);

        let mut wrong = note;
        wrong.metadata.namespace = Some("team-b".to_string());
        let err = storage.create(&team_a, wrong).await.unwrap_err();
        assert!(matches!(err, StorageError::BadRequest { .. }));
    }
}
