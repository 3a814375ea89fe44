use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::Value;
use std::path::{Path, PathBuf};

fn mvs_cache() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("mvs-cache");
    cmd.env_remove("MVS_IMAGE_CACHE_MB")
        .env_remove("MVS_IMAGE_CACHE_MIN_SLOTS")
        .env_remove("MVS_IMAGE_CACHE_WORKERS")
        .env_remove("MVS_CACHE_LOG");
    cmd
}

fn json_stdout(cmd: &mut assert_cmd::Command) -> Value {
    let output = cmd.assert().success().get_output().stdout.clone();
    serde_json::from_slice(&output).expect("stdout should contain valid json")
}

/// Writes a `width x height` PNG whose red channel is 255 on odd columns
fn write_png(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
    let path = dir.join(name);
    let image = image::RgbImage::from_fn(width, height, |x, _| {
        let value = if x % 2 == 1 { 255 } else { 0 };
        image::Rgb([value, value, 0])
    });
    image.save(&path).expect("png should be written");
    path
}

#[test]
fn plan_reports_budget_limited_slots() {
    let value = json_stdout(
        mvs_cache()
            .args(["plan", "--views", "100", "--max-width", "1000", "--max-height", "1000"])
            .args(["--budget-mb", "120"]),
    );

    assert_eq!(value["per_image_bytes"], 12_000_000);
    assert_eq!(value["slot_count"], 10);
    assert_eq!(value["covers_all_views"], false);
}

#[test]
fn plan_applies_slot_floor_and_view_cap() {
    let value = json_stdout(
        mvs_cache()
            .args(["plan", "--views", "3", "--max-width", "1000", "--max-height", "1000"])
            .args(["--budget-mb", "1", "--min-slots", "5"]),
    );

    assert_eq!(value["slot_count"], 3);
    assert_eq!(value["covers_all_views"], true);
}

#[test]
fn plan_rejects_zero_budget() {
    mvs_cache()
        .args(["plan", "--views", "10", "--max-width", "64", "--max-height", "64"])
        .args(["--budget-mb", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to size the cache"));
}

#[test]
fn plan_reads_config_file() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let config = temp.path().join("cache.toml");
    std::fs::write(&config, "memory_budget_mb = 1\nmin_slots = 2\n").unwrap();

    let value = json_stdout(
        mvs_cache()
            .arg("--config")
            .arg(&config)
            .args(["plan", "--views", "10", "--max-width", "1000", "--max-height", "1000"]),
    );

    assert_eq!(value["slot_count"], 2);
    assert_eq!(value["memory_budget"], 1024 * 1024);
}

#[test]
fn plan_fails_for_missing_config_file() {
    mvs_cache()
        .args(["--config", "/nonexistent/mvs-cache.toml"])
        .args(["plan", "--views", "10", "--max-width", "64", "--max-height", "64"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read config"));
}

#[test]
fn plan_uses_environment_budget() {
    let value = json_stdout(
        mvs_cache()
            .env("MVS_IMAGE_CACHE_MB", "1")
            .env("MVS_IMAGE_CACHE_MIN_SLOTS", "3")
            .args(["plan", "--views", "10", "--max-width", "1000", "--max-height", "1000"]),
    );

    assert_eq!(value["slot_count"], 3);
}

#[test]
fn simulate_evicts_and_reads_consistent_pixels() {
    let value = json_stdout(
        mvs_cache()
            .args(["simulate", "--views", "16", "--width", "512", "--height", "256"])
            .args(["--budget-mb", "1", "--min-slots", "4", "--workers", "2"])
            .args(["--clients", "3", "--waves", "2", "--accesses", "20"]),
    );

    assert_eq!(value["slot_count"], 4);
    assert_eq!(value["accesses"], 120);
    assert_eq!(value["mismatched_samples"], 0);
    assert_eq!(value["async_failures"], 0);

    let requests = value["hits"].as_u64().unwrap() + value["misses"].as_u64().unwrap();
    assert!(requests >= 120);
    assert!(value["evictions"].as_u64().unwrap() > 0);
}

#[test]
fn sample_interpolates_file_pixels() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let first = write_png(temp.path(), "view-0.png", 3, 2);
    let second = write_png(temp.path(), "view-1.png", 4, 4);

    let value = json_stdout(
        mvs_cache()
            .arg("sample")
            .arg(&first)
            .arg(&second)
            .args(["--image", "0", "--x", "0.5", "--y", "1", "--budget-mb", "1"]),
    );

    assert_eq!(value["width"], 3);
    assert_eq!(value["height"], 2);
    assert_eq!(value["color"][0].as_f64().unwrap(), 0.5);
    assert_eq!(value["color"][1].as_f64().unwrap(), 0.5);
    assert_eq!(value["color"][2].as_f64().unwrap(), 0.0);
}

#[test]
fn sample_rejects_point_outside_image() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let path = write_png(temp.path(), "view.png", 3, 2);

    mvs_cache()
        .arg("sample")
        .arg(&path)
        .args(["--x", "-1", "--y", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to sample image"));
}

#[test]
fn sample_rejects_unknown_view_index() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let path = write_png(temp.path(), "view.png", 3, 2);

    mvs_cache()
        .arg("sample")
        .arg(&path)
        .args(["--image", "4", "--x", "0", "--y", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("out of range"));
}

#[test]
fn sample_fails_for_missing_file() {
    let temp = tempfile::tempdir().expect("temp dir should be created");

    mvs_cache()
        .arg("sample")
        .arg(temp.path().join("missing.png"))
        .args(["--x", "0", "--y", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read image header"));
}

#[test]
fn version_prints_package_version() {
    mvs_cache()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}
