//! Discovery documents derived from the installed groups

use super::group::{InstalledGroup, InstalledVersion};
use example_core::k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    APIGroup, APIGroupList, APIResource, APIResourceList, APIVersions, GroupVersionForDiscovery,
};
use example_storage::Verb;

const STATUS_VERBS: [Verb; 3] = [Verb::Get, Verb::Patch, Verb::Update];

fn for_discovery(version: &InstalledVersion) -> GroupVersionForDiscovery {
    GroupVersionForDiscovery {
        group_version: version.group_version.api_version(),
        version: version.group_version.version.clone(),
    }
}

/// `/apis/<group>`
pub fn api_group(group: &InstalledGroup) -> APIGroup {
    APIGroup {
        name: group.name.clone(),
        preferred_version: group.preferred().map(for_discovery),
        versions: group.versions.iter().map(for_discovery).collect(),
        ..Default::default()
    }
}

/// `/apis`
pub fn api_group_list<'a>(groups: impl Iterator<Item = &'a InstalledGroup>) -> APIGroupList {
    APIGroupList {
        groups: groups.map(api_group).collect(),
    }
}

/// `/apis/<group>/<version>`
pub fn api_resource_list(version: &InstalledVersion) -> APIResourceList {
    let mut resources = Vec::new();

    for (plural, resource) in &version.resources {
        let kind = resource.gvk().kind.clone();
        let verbs = resource.storage.verbs();

        resources.push(APIResource {
            name: plural.clone(),
            singular_name: kind.to_lowercase(),
            namespaced: resource.namespaced(),
            kind: kind.clone(),
            verbs: verbs.iter().map(|v| v.as_str().to_string()).collect(),
            ..Default::default()
        });

        let status_verbs: Vec<String> = STATUS_VERBS
            .iter()
            .filter(|v| verbs.contains(*v))
            .map(|v| v.as_str().to_string())
            .collect();
        if resource.supports(Verb::Update) || resource.supports(Verb::Patch) {
            resources.push(APIResource {
                name: format!("{}/status", plural),
                singular_name: String::new(),
                namespaced: resource.namespaced(),
                kind,
                verbs: status_verbs,
                ..Default::default()
            });
        }
    }

    APIResourceList {
        group_version: version.group_version.api_version(),
        resources,
    }
}

/// `/api`. No legacy core group is served.
pub fn api_versions() -> APIVersions {
    APIVersions {
        versions: Vec::new(),
        ..Default::default()
    }
}
