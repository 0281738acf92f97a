use super::types::{ExampleResource, ExampleResourceList};
use example_core::{GroupResource, GroupVersion, Result, Scheme, SchemeBuilder};

/// GroupName is the group name for the ExampleService API
pub const GROUP_NAME: &str = "example.example-org.io";

pub const VERSION: &str = "v1alpha1";

/// Group-version used to register these objects
pub fn scheme_group_version() -> GroupVersion {
    GroupVersion::new(GROUP_NAME, VERSION)
}

/// Group-qualified resource for an unqualified resource name
pub fn resource(resource: &str) -> GroupResource {
    scheme_group_version().with_resource(resource).group_resource()
}

pub fn scheme_builder() -> SchemeBuilder {
    SchemeBuilder::new(&[add_known_types])
}

/// Add the types in this group-version to the given scheme
pub fn add_to_scheme(scheme: &mut Scheme) -> Result<()> {
    scheme_builder().add_to_scheme(scheme)
}

fn add_known_types(scheme: &mut Scheme) -> Result<()> {
    let gv = scheme_group_version();
    scheme.add_known_type::<ExampleResource>(&gv)?;
    scheme.add_list_type::<ExampleResourceList>(&gv)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use example_core::Resource;

    #[test]
    fn test_resource_helper() {
        let gr = resource(ExampleResource::PLURAL);
        assert_eq!(gr.group, GROUP_NAME);
        assert_eq!(gr.to_string(), "exampleresources.example.example-org.io");
    }

    #[test]
    fn test_add_to_scheme() {
        let mut scheme = Scheme::new();
        add_to_scheme(&mut scheme).unwrap();
        add_to_scheme(&mut scheme).unwrap();

        let info = scheme
            .resource_kind(&scheme_group_version(), "exampleresources")
            .unwrap();
        assert_eq!(info.gvk.kind, "ExampleResource");
        assert!(!info.namespaced());
        assert_eq!(
            scheme.list_kind(&info.gvk).unwrap().gvk.kind,
            "ExampleResourceList"
        );
    }
}
