//! Guards the release workflow that ships the `comstar` binary.

use std::path::Path;

fn release_workflow_content() -> String {
    let workspace_root = Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .parent()
        .unwrap();
    let path = workspace_root.join(".github/workflows/release.yml");
    std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("failed to read {}: {}", path.display(), e))
}

#[test]
fn release_workflow_runs_on_published_release() {
    let content = release_workflow_content();
    assert!(content.contains("release:"), "workflow must trigger on releases");
    assert!(
        content.contains("types: [published]"),
        "workflow must only run for published releases"
    );
}

#[test]
fn release_workflow_builds_linux_and_windows() {
    let content = release_workflow_content();
    assert!(content.contains("ubuntu-latest"));
    assert!(content.contains("windows-latest"));
    assert!(
        content.contains("cargo build --release"),
        "workflow must build in release mode"
    );
    assert!(content.contains("-p comstar-cli"));
}

#[test]
fn release_workflow_uploads_per_platform_binary() {
    let content = release_workflow_content();
    assert!(content.contains("binary: comstar\n"));
    assert!(content.contains("binary: comstar.exe"));
    assert!(
        content.contains("gh release upload"),
        "workflow must attach the binary to the release"
    );
}
