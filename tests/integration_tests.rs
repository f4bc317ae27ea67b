//! End-to-end tests of discovery and copy orchestration over in-memory fakes,
//! plus CLI tests against the built binary

mod common;

use common::{descriptor, FakeRegistry, FakeTransfer};
use ecr_mirror::{MirrorEngine, RegistryDiscovery, SyncSettings};
use serial_test::serial;
use std::process::Command;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

fn settings(max_parallel: usize) -> SyncSettings {
    SyncSettings {
        max_parallel,
        copy_timeout: Some(Duration::from_secs(30)),
        cooldown: Duration::ZERO,
    }
}

#[tokio::test]
async fn test_alpine_scenario_copies_matching_tags_only() {
    let registry = Arc::new(FakeRegistry::default());
    let transfer =
        Arc::new(FakeTransfer::default().with_image("library/alpine", &["3.8", "3.9", "3.10", "latest"]));
    let engine = MirrorEngine::new(registry, transfer.clone(), settings(4));

    let summary = engine
        .run(&[descriptor("library/alpine", "123.dkr/alpine-mirror", &["3.*"], &["3.9"])])
        .await
        .unwrap();

    assert_eq!(summary.total_items, 2);
    assert_eq!(summary.copied, 2);
    assert_eq!(
        transfer.copied_destinations(),
        vec!["123.dkr/alpine-mirror:3.10", "123.dkr/alpine-mirror:3.8"]
    );
}

#[tokio::test]
async fn test_concurrency_never_exceeds_pool_width() {
    let tags: Vec<String> = (0..100).map(|i| format!("1.{}", i)).collect();
    let tag_refs: Vec<&str> = tags.iter().map(String::as_str).collect();

    let registry = Arc::new(FakeRegistry::default());
    let transfer = Arc::new(
        FakeTransfer::default()
            .with_image("library/busybox", &tag_refs)
            .with_delay(Duration::from_millis(5)),
    );
    let engine = MirrorEngine::new(registry, transfer.clone(), settings(4));

    let summary = engine
        .run(&[descriptor("library/busybox", "123.dkr/busybox", &[], &[])])
        .await
        .unwrap();

    assert_eq!(summary.copied, 100);
    let peak = transfer.max_in_flight.load(Ordering::SeqCst);
    assert!(peak <= 4, "peak concurrency {} exceeded pool width", peak);
    assert!(peak > 1, "copies never overlapped");
    assert_eq!(transfer.in_flight.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_failing_item_does_not_stop_the_rest() {
    let registry = Arc::new(FakeRegistry::default());
    let transfer = Arc::new(
        FakeTransfer::default()
            .with_image("library/nginx", &["1.24", "1.25", "1.26"])
            .failing_on("library/nginx:1.24"),
    );
    let engine = MirrorEngine::new(registry, transfer.clone(), settings(1));

    let summary = engine
        .run(&[descriptor("library/nginx", "123.dkr/nginx", &[], &[])])
        .await
        .unwrap();

    assert_eq!(summary.copied, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(
        transfer.copied_destinations(),
        vec!["123.dkr/nginx:1.25", "123.dkr/nginx:1.26"]
    );
}

#[tokio::test]
async fn test_unreachable_upstream_only_skips_its_mirror() {
    let registry = Arc::new(FakeRegistry::default());
    let transfer = Arc::new(FakeTransfer::default().with_image("library/redis", &["7"]));
    let engine = MirrorEngine::new(registry, transfer, settings(4));

    let summary = engine
        .run(&[
            descriptor("gone.example/app", "123.dkr/app", &[], &[]),
            descriptor("library/redis", "123.dkr/redis", &[], &[]),
        ])
        .await
        .unwrap();

    assert_eq!(summary.copied, 1);
    assert_eq!(summary.unresolved.len(), 1);
    assert!(summary.unresolved[0].1.contains("gone.example/app"));
}

#[tokio::test]
async fn test_auth_failure_aborts_before_any_copy() {
    let registry = Arc::new(FakeRegistry {
        deny_auth: true,
        ..Default::default()
    });
    let transfer = Arc::new(FakeTransfer::default().with_image("library/redis", &["7"]));
    let engine = MirrorEngine::new(registry, transfer.clone(), settings(4));

    let result = engine
        .run(&[descriptor("library/redis", "123.dkr/redis", &[], &[])])
        .await;

    assert!(result.is_err());
    assert!(transfer.copied_destinations().is_empty());
}

#[tokio::test]
async fn test_discovery_feeds_sync() {
    let registry = Arc::new(
        FakeRegistry::default()
            .with_repository("alpine", &[("upstream-image", "library/alpine"), ("upstream-tags", "3.+")])
            .with_repository("internal-app", &[("team", "payments")])
            .with_repository("nginx", &[("upstream-image", "library/nginx"), ("ignore-tags", "+-rc")]),
    );
    let transfer = Arc::new(
        FakeTransfer::default()
            .with_image("library/alpine", &["3.19", "edge"])
            .with_image("library/nginx", &["1.25", "1.26-rc"]),
    );

    let report = RegistryDiscovery::new(registry.clone(), None)
        .discover()
        .await
        .unwrap();
    assert_eq!(report.repositories_scanned, 3);
    assert_eq!(report.mirrors.len(), 2);

    let engine = MirrorEngine::new(registry.clone(), transfer.clone(), settings(4));
    let summary = engine.run(&report.mirrors).await.unwrap();

    assert_eq!(registry.auth_calls.load(Ordering::SeqCst), 1);
    assert_eq!(summary.copied, 2);
    assert_eq!(
        transfer.copied_destinations(),
        vec![
            "123456789012.dkr.ecr.us-east-1.amazonaws.com/alpine:3.19",
            "123456789012.dkr.ecr.us-east-1.amazonaws.com/nginx:1.25",
        ]
    );
}

#[test]
#[serial]
fn test_cli_help() {
    let output = Command::new(env!("CARGO_BIN_EXE_ecr-mirror"))
        .arg("--help")
        .output()
        .expect("Failed to execute command");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(stdout.contains("sync"));
    assert!(stdout.contains("copy"));
    assert!(stdout.contains("list-repos"));
    assert!(stdout.contains("doctor"));
}

#[test]
#[serial]
fn test_copy_rejects_reference_without_tag() {
    let dir = tempfile::TempDir::new().unwrap();
    let config_path = dir.path().join("config.yml");
    std::fs::write(&config_path, "logging:\n  color: false\n").unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_ecr-mirror"))
        .args(["--config", config_path.to_str().unwrap(), "copy", "alpine", "123.dkr/alpine"])
        .output()
        .expect("Failed to execute command");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("image:tag"));
}

#[test]
#[serial]
fn test_error_handling_invalid_config() {
    let dir = tempfile::TempDir::new().unwrap();
    let config_path = dir.path().join("invalid-config.yml");
    std::fs::write(&config_path, "invalid: yaml: content: [").unwrap();

    let output = Command::new(env!("CARGO_BIN_EXE_ecr-mirror"))
        .args(["--config", config_path.to_str().unwrap(), "list-repos"])
        .output()
        .expect("Failed to execute command");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("parse") || stderr.contains("config"));
}

/// Config pointing at fake `aws` and `skopeo` scripts; the `broken` tag fails to copy
#[cfg(unix)]
fn fake_tools_config(dir: &tempfile::TempDir) -> std::path::PathBuf {
    // base64("AWS:pw")
    let aws = common::write_script(
        dir,
        "aws",
        r#"echo '{"authorizationData":[{"authorizationToken":"QVdTOnB3"}]}'"#,
    );
    let skopeo = common::write_script(
        dir,
        "skopeo",
        r#"case "$1" in
  list-tags) echo '{"Repository":"library/app","Tags":["1.0","broken"]}' ;;
  copy) case "$2" in *:broken) echo 'manifest unknown' >&2; exit 1 ;; esac ;;
esac"#,
    );

    let config_path = dir.path().join("config.yml");
    std::fs::write(
        &config_path,
        format!(
            "sync:\n  cooldown_secs: 0\n  copy_timeout: 60\ntools:\n  aws: {}\n  skopeo: {}\nlogging:\n  color: false\n",
            aws, skopeo
        ),
    )
    .unwrap();
    config_path
}

#[cfg(unix)]
fn run_copy(config_path: &std::path::Path, extra: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_ecr-mirror"))
        .args(["--config", config_path.to_str().unwrap(), "copy", "library/app:*", "123.dkr/app"])
        .args(extra)
        .output()
        .expect("Failed to execute command")
}

#[cfg(unix)]
#[test]
#[serial]
fn test_failed_copy_exits_zero_by_default() {
    let dir = tempfile::TempDir::new().unwrap();
    let config_path = fake_tools_config(&dir);

    let output = run_copy(&config_path, &[]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("library/app:broken"));
}

#[cfg(unix)]
#[test]
#[serial]
fn test_fail_on_error_exits_non_zero() {
    let dir = tempfile::TempDir::new().unwrap();
    let config_path = fake_tools_config(&dir);

    let output = run_copy(&config_path, &["--fail-on-error"]);

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Copy finished with failures"));
}
