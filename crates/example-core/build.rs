use std::process::Command;

const INJECTED: &[&str] = &[
    "EXAMPLE_SERVICE_VERSION",
    "EXAMPLE_SERVICE_GIT_COMMIT",
    "EXAMPLE_SERVICE_GIT_TREE_STATE",
    "EXAMPLE_SERVICE_BUILD_DATE",
];

fn main() {
    let rustc = std::env::var("RUSTC").unwrap_or_else(|_| "rustc".to_string());
    let rustc_version = Command::new(rustc)
        .arg("--version")
        .output()
        .ok()
        .and_then(|out| String::from_utf8(out.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string());

    println!("cargo:rustc-env=EXAMPLE_SERVICE_RUSTC_VERSION={}", rustc_version);

    // Build metadata is injected through the environment, e.g.
    //   EXAMPLE_SERVICE_VERSION=v0.1.0 EXAMPLE_SERVICE_GIT_COMMIT=$(git rev-parse HEAD) cargo build
    for var in INJECTED {
        println!("cargo:rerun-if-env-changed={}", var);
    }
    println!("cargo:rerun-if-changed=build.rs");
}
