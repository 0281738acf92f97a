use crate::{DynamicObject, GroupVersionKind, ResourceVersion};
use serde::{Deserialize, Serialize};

/// Watch event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WatchEventType {
    Added,
    Modified,
    Deleted,
    Bookmark,
    Error,
}

impl WatchEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WatchEventType::Added => "ADDED",
            WatchEventType::Modified => "MODIFIED",
            WatchEventType::Deleted => "DELETED",
            WatchEventType::Bookmark => "BOOKMARK",
            WatchEventType::Error => "ERROR",
        }
    }
}

/// One change notification, as it appears on the wire: `{"type": ..., "object": ...}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchEvent<T = DynamicObject> {
    #[serde(rename = "type")]
    pub event_type: WatchEventType,
    pub object: T,
}

impl<T> WatchEvent<T> {
    pub fn new(event_type: WatchEventType, object: T) -> Self {
        Self { event_type, object }
    }

    pub fn added(object: T) -> Self {
        Self::new(WatchEventType::Added, object)
    }

    pub fn modified(object: T) -> Self {
        Self::new(WatchEventType::Modified, object)
    }

    pub fn deleted(object: T) -> Self {
        Self::new(WatchEventType::Deleted, object)
    }

    /// Convert the carried object, keeping the event type
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> WatchEvent<U> {
        WatchEvent {
            event_type: self.event_type,
            object: f(self.object),
        }
    }
}

impl WatchEvent<DynamicObject> {
    /// A progress marker carrying only the kind and a resource version
    pub fn bookmark(gvk: &GroupVersionKind, resource_version: ResourceVersion) -> Self {
        let mut object = DynamicObject::new(gvk);
        object.set_resource_version(resource_version);
        Self::new(WatchEventType::Bookmark, object)
    }

    pub fn resource_version(&self) -> Option<ResourceVersion> {
        self.object.resource_version()
    }
}
