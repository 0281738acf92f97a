//! ExampleService Storage - the storage plugin contract and an in-memory backend
//!
//! This crate provides:
//! - `RestStorage`, the trait a backend implements to serve one resource kind
//! - Verb restriction for kinds that only expose part of the REST surface
//! - `StorageRegistry`, binding plural resource names to backends
//! - Label and field selectors
//! - `MemoryStorage`, a reference backend with watch support

pub mod error;
pub mod memory;
pub mod registry;
pub mod rest;
pub mod selector;

// Re-export commonly used types
pub use error::{Result, StorageError};
pub use memory::{MemoryStorage, MemoryStorageConfig};
pub use registry::StorageRegistry;
pub use rest::{
    apply_merge_patch, DeleteOptions, ListOptions, ObjectList, RequestContext, RestStorage, Restricted, UpdateFn,
    Verb, WatchOptions, WatchStream,
};
pub use selector::{FieldSelector, LabelSelector};
