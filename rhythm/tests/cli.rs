//! CLI tests: spawn the `rhythm` binary and check files and exit codes.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use rhythm::exit_codes;
use rhythm::io::init::ProjectPaths;
use rhythm::io::run_info::load_run_info;

fn rhythm(args: &[&str], cwd: &Path) -> Output {
    Command::new(env!("CARGO_BIN_EXE_rhythm"))
        .current_dir(cwd)
        .args(args)
        .output()
        .expect("spawn rhythm")
}

fn init(root: &Path) -> ProjectPaths {
    let output = rhythm(&["init", "proj", "--run-name", "cli"], root);
    assert_eq!(output.status.code(), Some(exit_codes::OK), "{output:?}");
    ProjectPaths::new(root.join("proj").canonicalize().expect("canonical root"))
}

#[test]
fn init_twice_without_force_fails() {
    let temp = tempfile::tempdir().expect("tempdir");
    let paths = init(temp.path());
    assert!(paths.config_path.is_file());

    let output = rhythm(&["init", "proj"], temp.path());
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    let output = rhythm(&["init", "proj", "--force"], temp.path());
    assert_eq!(output.status.code(), Some(exit_codes::OK));
}

#[test]
fn rois_from_points_saves_all_artifacts() {
    let temp = tempfile::tempdir().expect("tempdir");
    let paths = init(temp.path());
    let points = temp.path().join("points.json");
    fs::write(&points, "[[[1.0, 1.0], [4.0, 1.0], [4.0, 4.0], [1.0, 4.0]]]").expect("points");

    let config = paths.config_path.to_string_lossy().into_owned();
    let output = rhythm(
        &[
            "rois", "--config", &config, "--points", "points.json", "--height", "8", "--width",
            "8",
        ],
        temp.path(),
    );
    assert_eq!(output.status.code(), Some(exit_codes::OK), "{output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Number of ROIs: 1"));
    assert!(stdout.contains("run_data: written"));

    assert!(paths.analysis_dir.join("ROIs.frd").is_file());
    let info = load_run_info(&paths.run_info_path).expect("run info");
    assert_eq!(info["ROIs"]["points"][0][2], serde_json::json!([4.0, 4.0]));

    let output = rhythm(&["show", "--config", &config, "--module", "ROIs"], temp.path());
    assert_eq!(output.status.code(), Some(exit_codes::OK), "{output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("select_mode: points"));
    assert!(stdout.contains("mask_images[0]: bool (8, 8)"));
}

#[test]
fn rois_no_overwrite_reports_skips() {
    let temp = tempfile::tempdir().expect("tempdir");
    let paths = init(temp.path());
    fs::write(temp.path().join("points.json"), "[[[0, 0], [3, 0], [0, 3]]]").expect("points");
    let config = paths.config_path.to_string_lossy().into_owned();
    let args = [
        "rois", "--config", &config, "--points", "points.json", "--height", "4", "--width", "4",
    ];
    assert_eq!(rhythm(&args, temp.path()).status.code(), Some(exit_codes::OK));

    let mut rerun = args.to_vec();
    rerun.push("--no-overwrite");
    let output = rhythm(&rerun, temp.path());
    assert_eq!(output.status.code(), Some(exit_codes::OK), "{output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("config: skipped"));
    assert!(stdout.contains("run_data: skipped"));
    assert!(stdout.contains("run_info: skipped"));
}

#[test]
fn misnamed_config_is_a_precondition_failure() {
    let temp = tempfile::tempdir().expect("tempdir");
    let paths = init(temp.path());
    let renamed = paths.configs_dir.join("project.yaml");
    fs::copy(&paths.config_path, &renamed).expect("copy config");
    fs::write(temp.path().join("points.json"), "[[[0, 0], [3, 0], [0, 3]]]").expect("points");

    let config = renamed.to_string_lossy().into_owned();
    let output = rhythm(
        &[
            "rois", "--config", &config, "--points", "points.json", "--height", "4", "--width",
            "4",
        ],
        temp.path(),
    );
    assert_eq!(output.status.code(), Some(exit_codes::PRECONDITION));
    assert!(String::from_utf8_lossy(&output.stderr).contains("config.yaml"));
    assert!(!paths.analysis_dir.join("ROIs.frd").exists());
}

#[test]
fn missing_config_is_a_precondition_failure() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("points.json"), "[[[0, 0], [3, 0], [0, 3]]]").expect("points");
    let missing = temp.path().join("missing").join("config.yaml");

    let config = missing.to_string_lossy().into_owned();
    let output = rhythm(
        &[
            "rois", "--config", &config, "--points", "points.json", "--height", "4", "--width",
            "4",
        ],
        temp.path(),
    );
    assert_eq!(output.status.code(), Some(exit_codes::PRECONDITION), "{output:?}");
    assert!(String::from_utf8_lossy(&output.stderr).contains("must exist"));
    assert!(!missing.exists());
}
