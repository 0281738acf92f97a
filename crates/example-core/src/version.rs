//! Build information for the server binary.
//!
//! Values are injected at compile time through the environment:
//!
//! ```text
//! EXAMPLE_SERVICE_VERSION=v0.1.0 \
//! EXAMPLE_SERVICE_GIT_COMMIT=$(git rev-parse HEAD) \
//! EXAMPLE_SERVICE_GIT_TREE_STATE=clean \
//! EXAMPLE_SERVICE_BUILD_DATE=$(date -u '+%Y-%m-%dT%H:%M:%SZ') \
//! cargo build --release
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

const UNKNOWN: &str = "unknown";

/// Version information reported by `version` and served on `/version`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    pub version: String,
    pub git_commit: String,
    pub git_tree_state: String,
    pub build_date: String,
    pub rust_version: String,
    pub platform: String,
}

impl VersionInfo {
    /// Version information of the running binary
    pub fn get() -> Self {
        Self {
            version: option_env!("EXAMPLE_SERVICE_VERSION")
                .unwrap_or(env!("CARGO_PKG_VERSION"))
                .to_string(),
            git_commit: option_env!("EXAMPLE_SERVICE_GIT_COMMIT")
                .unwrap_or(UNKNOWN)
                .to_string(),
            git_tree_state: option_env!("EXAMPLE_SERVICE_GIT_TREE_STATE")
                .unwrap_or(UNKNOWN)
                .to_string(),
            build_date: option_env!("EXAMPLE_SERVICE_BUILD_DATE")
                .unwrap_or(UNKNOWN)
                .to_string(),
            rust_version: option_env!("EXAMPLE_SERVICE_RUSTC_VERSION")
                .unwrap_or(UNKNOWN)
                .to_string(),
            platform: format!("{}/{}", std::env::consts::OS, std::env::consts::ARCH),
        }
    }

    /// Multi-line report printed by the `version` command
    pub fn report(&self) -> String {
        format!(
            "ExampleService Server\n  \
             Version:       {}\n  \
             Git Commit:    {}\n  \
             Git Tree:      {}\n  \
             Build Date:    {}\n  \
             Rust Version:  {}\n  \
             Platform:      {}\n",
            self.version,
            self.git_commit,
            self.git_tree_state,
            self.build_date,
            self.rust_version,
            self.platform
        )
    }
}

impl fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ExampleService API Server {} (commit: {}, built: {}, rust: {}, platform: {})",
            self.version, self.git_commit, self.build_date, self.rust_version, self.platform
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_info_defaults() {
        let info = VersionInfo::get();
        assert!(!info.version.is_empty());
        assert!(info.platform.contains('/'));
        if option_env!("EXAMPLE_SERVICE_VERSION").is_none() {
            assert_eq!(info.version, env!("CARGO_PKG_VERSION"));
        }
    }

    #[test]
    fn test_report_layout() {
        let info = VersionInfo {
            version: "v1.2.3".to_string(),
            git_commit: "abc123".to_string(),
            git_tree_state: "clean".to_string(),
            build_date: "2024-01-01T00:00:00Z".to_string(),
            rust_version: "rustc 1.84.0".to_string(),
            platform: "linux/x86_64".to_string(),
        };

        let report = info.report();
        assert!(report.starts_with("ExampleService Server\n"));
        assert!(report.contains("  Version:       v1.2.3\n"));
        assert!(report.contains("  Git Tree:      clean\n"));
        assert!(info.to_string().contains("commit: abc123"));

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["gitTreeState"], "clean");
    }
}
