//! Version v1alpha1 of the `example.example-org.io` API group

mod register;
mod types;

pub use register::{add_to_scheme, resource, scheme_builder, scheme_group_version, GROUP_NAME, VERSION};
pub use types::{ExampleResource, ExampleResourceList, ExampleResourceSpec, ExampleResourceStatus};
