//! Integration tests for the `mdflow` binary.

use std::path::Path;
use std::process::Command;

const SYSTEM: &str = r#"{
  "molecule": {
    "title": "water dimer",
    "atoms": [
      {"name": "O", "element": 8, "residue_name": "HOH", "residue_number": 1},
      {"name": "H1", "element": 1, "residue_name": "HOH", "residue_number": 1},
      {"name": "O", "element": 8, "residue_name": "HOH", "residue_number": 2},
      {"name": "H1", "element": 1, "residue_name": "HOH", "residue_number": 2}
    ],
    "bonds": [[0, 1], [2, 3]],
    "coords": [[10.0, 10.0, 10.0], [11.0, 10.0, 10.0], [13.0, 10.0, 10.0], [14.0, 10.0, 10.0]]
  },
  "structure": {
    "atoms": [
      {"mass": 15.999, "charge": -0.2, "sigma": 0.315, "epsilon": 0.636},
      {"mass": 1.008, "charge": 0.2},
      {"mass": 15.999, "charge": -0.2, "sigma": 0.315, "epsilon": 0.636},
      {"mass": 1.008, "charge": 0.2}
    ],
    "bonds": [
      {"i": 0, "j": 1, "length": 0.09572, "k": 50000.0},
      {"i": 2, "j": 3, "length": 0.09572, "k": 50000.0}
    ],
    "positions": [[1.0, 1.0, 1.0], [1.1, 1.0, 1.0], [1.3, 1.0, 1.0], [1.4, 1.0, 1.0]],
    "box_vectors": [[2.0, 0.0, 0.0], [0.0, 2.0, 0.0], [0.0, 0.0, 2.0]]
  }
}"#;

fn mdflow(dir: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_mdflow"));
    cmd.current_dir(dir)
        .env_remove("CUDA_VISIBLE_DEVICES")
        .env_remove("MDFLOW_MANAGED_CLUSTER");
    cmd
}

#[test]
fn test_platforms_lists_fallback_order() {
    let dir = tempfile::tempdir().unwrap();
    let output = mdflow(dir.path()).arg("platforms").output().unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let names: Vec<_> = stdout.lines().filter_map(|l| l.split_whitespace().next()).collect();
    assert_eq!(names, vec!["CUDA", "OpenCL", "CPU", "Reference"]);
    assert!(stdout.contains("CPU        available"));
}

#[test]
fn test_minimize_then_nvt_builds_history() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("system.json"), SYSTEM).unwrap();
    std::fs::write(
        dir.path().join("job.toml"),
        "[job]\njob_id = 1\nsystem_id = \"dimer\"\nstage = \"min\"\ntime = 0.1\nseed = 9\nplatform = \"Reference\"\n",
    )
    .unwrap();

    let status = mdflow(dir.path())
        .args(["run", "--config", "job.toml", "--history", "run.json", "--input", "system.json"])
        .status()
        .unwrap();
    assert!(status.success());

    let status = mdflow(dir.path())
        .args(["run", "--config", "job.toml", "--history", "run.json", "--stage", "nvt"])
        .status()
        .unwrap();
    assert!(status.success());

    let history: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join("run.json")).unwrap()).unwrap();
    let stages: Vec<_> = history["records"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["stage"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(stages, vec!["SETUP", "MINIMIZATION", "NVT"]);
}

#[test]
fn test_missing_input_fails() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("job.toml"), "[job]\nsystem_id = \"x\"\nstage = \"nvt\"\n").unwrap();
    let output = mdflow(dir.path())
        .args(["run", "--config", "job.toml", "--history", "run.json"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("--input"));
}
