use std::fs;
use std::path::Path;
use std::process::Command;

const WORKSPACE: &str = r#"{
    "x_unit": "TOF",
    "instrument": {
        "name": "cli-test",
        "source": [0.0, 0.0, -15.0],
        "detectors": { "1": { "position": [0.5, 0.0, 5.0] } }
    },
    "spectra": [
        { "detector_ids": [1], "x": [25000.0, 25500.0, 26000.0], "y": [3.0, 5.0] }
    ]
}"#;

const CONFIG: &str = r#"{ "q_mode": "|Q|", "emode": "Elastic" }"#;

fn write_inputs(dir: &Path) -> (String, String) {
    let ws = dir.join("ws.json");
    let config = dir.join("config.json");
    fs::write(&ws, WORKSPACE).unwrap();
    fs::write(&config, CONFIG).unwrap();
    (
        ws.to_string_lossy().into_owned(),
        config.to_string_lossy().into_owned(),
    )
}

fn rustmd() -> Command {
    Command::new(env!("CARGO_BIN_EXE_rustmd"))
}

#[test]
fn test_convert_appends_and_writes_report() {
    let dir = tempfile::tempdir().unwrap();
    let (ws, config) = write_inputs(dir.path());
    let report_path = dir.path().join("report.json");

    let status = rustmd()
        .args(["convert", &ws, &ws, "--config", &config, "--output"])
        .arg(&report_path)
        .status()
        .unwrap();
    assert!(status.success());

    let report: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&report_path).unwrap()).unwrap();
    assert_eq!(report["n_events"], 4);
    assert_eq!(report["n_dropped"], 0);
    assert_eq!(report["runs"].as_array().unwrap().len(), 2);
    assert_eq!(report["runs"][1]["run_index"], 1);
    assert_eq!(report["description"]["dims"][0]["name"], "|Q|");
    assert_eq!(report["total_signal"], 16.0);
}

#[test]
fn test_local_min_max_prints_json() {
    let dir = tempfile::tempdir().unwrap();
    let (ws, config) = write_inputs(dir.path());

    let output = rustmd()
        .args(["min-max", &ws, "--config", &config, "--local"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let min = report["min"][0].as_f64().unwrap();
    let max = report["max"][0].as_f64().unwrap();
    assert!((min - 0.121_87).abs() < 1e-4);
    assert!((max - 0.126_745).abs() < 1e-4);
    assert_eq!(report["dims"][0], "|Q|");
}

#[test]
fn test_info_and_failures() {
    let dir = tempfile::tempdir().unwrap();
    let (ws, config) = write_inputs(dir.path());

    let output = rustmd().args(["info", &ws]).output().unwrap();
    assert!(output.status.success());
    let text = String::from_utf8(output.stdout).unwrap();
    assert!(text.contains("Instrument: cli-test"));
    assert!(text.contains("Spectra: 1"));

    let missing = dir.path().join("absent.json");
    let output = rustmd()
        .args(["convert", &missing.to_string_lossy(), "--config", &config])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Error"));
}
