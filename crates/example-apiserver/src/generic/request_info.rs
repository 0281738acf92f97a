//! Resolution of `/apis/...` paths into discovery targets and resource requests

use axum::http::Method;
use example_core::GroupVersion;
use example_storage::Verb;

/// Target of a request below `/apis`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiPath {
    /// `/apis`
    Groups,
    /// `/apis/<group>`
    Group(String),
    /// `/apis/<group>/<version>`
    Version(GroupVersion),
    /// Anything addressing a resource collection or object
    Resource(RequestInfo),
}

/// A resolved resource request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInfo {
    pub group_version: GroupVersion,
    pub namespace: Option<String>,
    pub resource: String,
    pub name: Option<String>,
    pub subresource: Option<String>,
}

impl ApiPath {
    /// Parse the part of the path after `/apis`
    pub fn parse(path: &str) -> Option<Self> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        match segments.as_slice() {
            [] => Some(ApiPath::Groups),
            [group] => Some(ApiPath::Group(group.to_string())),
            [group, version] => Some(ApiPath::Version(GroupVersion::new(*group, *version))),
            [group, version, "namespaces", namespace, resource, rest @ ..] => {
                RequestInfo::from_segments(group, version, Some(*namespace), resource, rest)
                    .map(ApiPath::Resource)
            }
            [group, version, resource, rest @ ..] => {
                RequestInfo::from_segments(group, version, None, resource, rest)
                    .map(ApiPath::Resource)
            }
        }
    }
}

impl RequestInfo {
    fn from_segments(
        group: &str,
        version: &str,
        namespace: Option<&str>,
        resource: &str,
        rest: &[&str],
    ) -> Option<Self> {
        let (name, subresource) = match rest {
            [] => (None, None),
            [name] => (Some(*name), None),
            [name, subresource] => (Some(*name), Some(*subresource)),
            _ => return None,
        };

        Some(Self {
            group_version: GroupVersion::new(group, version),
            namespace: namespace.map(str::to_string),
            resource: resource.to_string(),
            name: name.map(str::to_string),
            subresource: subresource.map(str::to_string),
        })
    }

    /// The storage verb for an HTTP method on this path, if any
    pub fn verb(&self, method: &Method, watch: bool) -> Option<Verb> {
        let verb = match (method, self.name.is_some()) {
            (&Method::GET, false) if watch => Verb::Watch,
            (&Method::GET, false) => Verb::List,
            (&Method::GET, true) => Verb::Get,
            (&Method::POST, false) => Verb::Create,
            (&Method::PUT, true) => Verb::Update,
            (&Method::PATCH, true) => Verb::Patch,
            (&Method::DELETE, true) => Verb::Delete,
            _ => return None,
        };
        Some(verb)
    }

    /// Resource label used in logs and metrics, e.g. `exampleresources/status`
    pub fn resource_path(&self) -> String {
        match &self.subresource {
            Some(sub) => format!("{}/{}", self.resource, sub),
            None => self.resource.clone(),
        }
    }
}
