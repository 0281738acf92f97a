//! API types served by ExampleService
//!
//! Each version lives in its own module and contributes an `add_to_scheme`
//! registration function. [`install`] registers every version of the group.

pub mod v1alpha1;

use example_core::{Result, Scheme};
use tracing::debug;

pub use v1alpha1::GROUP_NAME;

/// Register all versions of the API group into the scheme, preferred version first
pub fn install(scheme: &mut Scheme) -> Result<()> {
    v1alpha1::add_to_scheme(scheme)?;
    scheme.set_version_priority(GROUP_NAME, &[v1alpha1::VERSION]);
    debug!("Installed API group {}", GROUP_NAME);
    Ok(())
}
